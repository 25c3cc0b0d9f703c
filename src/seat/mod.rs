//! `wl_seat` tracking and per-seat notifications.
//!
//! Seats come and go at the compositor's discretion and each one gains and
//! loses pointer, keyboard and touch capabilities over time. Every seat is
//! assigned a stable logical index (the smallest one not in use when it
//! appears) so embedders can address "player 0", "player 1" and so on
//! without caring about wayland object identity.
//!
//! Capability changes are pushed to [`SeatListener`]s keyed by that index;
//! consumers are expected to re-fetch their device handles through
//! [`SeatDevices`] when notified (pull model). When a seat is revoked its
//! listeners are told *before* the seat is torn down, giving them a chance
//! to release device handles first.

use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};
use wayland_client::protocol::{wl_keyboard, wl_pointer, wl_seat, wl_touch};
use wayland_client::{Connection, Dispatch, Proxy, QueueHandle, WEnum};

use crate::platform::PlatformState;
use crate::registry::{BindContext, GlobalBinder, ProviderId, UnbindContext};
use crate::utils::{ListenerId, Listeners};

/// Highest `wl_seat` version this crate binds.
pub const SEAT_VERSION: u32 = 8;

/// The capability flags of one seat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeatCapabilities {
    /// The seat has a pointer device.
    pub pointer: bool,
    /// The seat has a keyboard device.
    pub keyboard: bool,
    /// The seat has a touch device.
    pub touch: bool,
}

impl SeatCapabilities {
    fn from_wl(caps: wl_seat::Capability) -> Self {
        SeatCapabilities {
            pointer: caps.contains(wl_seat::Capability::Pointer),
            keyboard: caps.contains(wl_seat::Capability::Keyboard),
            touch: caps.contains(wl_seat::Capability::Touch),
        }
    }
}

/// Observes the lifecycle of one seat index.
pub trait SeatListener: Send + Sync {
    /// The capability set of the seat changed.
    ///
    /// Device handles fetched earlier may be stale; re-fetch them through
    /// [`SeatDevices`].
    fn capabilities_changed(&self, _seat: u32, _caps: SeatCapabilities) {}

    /// The seat is about to go away.
    ///
    /// Delivered while the seat still exists so listeners can release the
    /// device handles they hold.
    fn seat_released(&self, _seat: u32) {}
}

/// Creates input device protocol objects for a seat index.
///
/// Every call creates a fresh protocol object; the caller owns it and is
/// responsible for releasing it. Creation is refused when the seat does not
/// currently advertise the corresponding capability.
pub trait SeatDevices: Send + Sync {
    /// Creates a pointer device for the seat, if it has pointer capability.
    fn pointer_device(&self, seat: u32) -> Option<wl_pointer::WlPointer>;

    /// Creates a keyboard device for the seat, if it has keyboard
    /// capability.
    fn keyboard_device(&self, seat: u32) -> Option<wl_keyboard::WlKeyboard>;

    /// Creates a touch device for the seat, if it has touch capability.
    fn touch_device(&self, seat: u32) -> Option<wl_touch::WlTouch>;
}

/// User data attached to input device protocol objects, routing their
/// events back to the consumer of that seat index.
#[derive(Debug, Clone, Copy)]
pub struct DeviceData {
    pub(crate) seat: u32,
}

/// User data attached to bound `wl_seat` proxies.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SeatData {
    index: u32,
}

#[derive(Debug)]
struct SeatEntry {
    seat: wl_seat::WlSeat,
    registry_id: u32,
    index: u32,
    caps: SeatCapabilities,
    name: String,
}

struct Inner {
    qh: QueueHandle<PlatformState>,
    provider_id: ProviderId,
    entries: Vec<SeatEntry>,
    listeners: Listeners<u32, dyn SeatListener>,
}

impl std::fmt::Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inner")
            .field("entries", &self.entries)
            .field("listeners", &self.listeners)
            .finish_non_exhaustive()
    }
}

/// Binder and tracker for `wl_seat` globals.
#[derive(Debug, Clone)]
pub struct SeatState {
    inner: Arc<Mutex<Inner>>,
}

/// Smallest index not claimed by any live seat.
fn lowest_free_index(used: impl Iterator<Item = u32>) -> u32 {
    let used: Vec<u32> = used.collect();
    let mut index = 0;
    while used.contains(&index) {
        index += 1;
    }
    index
}

impl SeatState {
    /// Creates the seat state with no known seats.
    pub fn new(qh: QueueHandle<PlatformState>) -> Self {
        SeatState {
            inner: Arc::new(Mutex::new(Inner {
                qh,
                provider_id: ProviderId::next(),
                entries: Vec::new(),
                listeners: Listeners::new(),
            })),
        }
    }

    /// Registers a listener for the seat `index`.
    ///
    /// The index does not have to exist yet; the listener fires as soon as
    /// a seat with that index appears and gains capabilities.
    pub fn add_listener(&self, index: u32, listener: Arc<dyn SeatListener>) -> ListenerId {
        self.inner.lock().unwrap().listeners.add(index, listener)
    }

    /// Removes a previously registered listener.
    pub fn remove_listener(&self, id: &ListenerId) -> bool {
        self.inner.lock().unwrap().listeners.remove(id)
    }

    /// Indices of the seats currently live, in announcement order.
    pub fn indices(&self) -> Vec<u32> {
        self.inner
            .lock()
            .unwrap()
            .entries
            .iter()
            .map(|entry| entry.index)
            .collect()
    }

    /// Current capabilities of the seat `index`, if it exists.
    pub fn capabilities(&self, index: u32) -> Option<SeatCapabilities> {
        let inner = self.inner.lock().unwrap();
        inner.entries.iter().find(|entry| entry.index == index).map(|entry| entry.caps)
    }

    /// Name of the seat `index`, if it exists and was named.
    pub fn name(&self, index: u32) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .entries
            .iter()
            .find(|entry| entry.index == index)
            .map(|entry| entry.name.clone())
    }

    fn handle_capabilities(&self, index: u32, capabilities: WEnum<wl_seat::Capability>) {
        let WEnum::Value(capabilities) = capabilities else {
            return;
        };
        let caps = SeatCapabilities::from_wl(capabilities);

        let listeners = {
            let mut inner = self.inner.lock().unwrap();
            let Some(entry) = inner.entries.iter_mut().find(|entry| entry.index == index) else {
                return;
            };
            entry.caps = caps;
            info!(
                seat = index,
                name = %entry.name,
                pointer = caps.pointer,
                keyboard = caps.keyboard,
                touch = caps.touch,
                "seat capabilities changed"
            );
            inner.listeners.snapshot(&index)
        };

        for listener in listeners {
            listener.capabilities_changed(index, caps);
        }
    }

    fn handle_name(&self, index: u32, name: String) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.entries.iter_mut().find(|entry| entry.index == index) {
            debug!(seat = index, name = %name, "seat named");
            entry.name = name;
        }
    }

    fn with_device<D: Proxy>(
        &self,
        index: u32,
        has_cap: impl FnOnce(SeatCapabilities) -> bool,
        create: impl FnOnce(&wl_seat::WlSeat, &QueueHandle<PlatformState>) -> D,
    ) -> Option<D> {
        let inner = self.inner.lock().unwrap();
        let entry = inner.entries.iter().find(|entry| entry.index == index)?;
        if !has_cap(entry.caps) {
            return None;
        }
        Some(create(&entry.seat, &inner.qh))
    }
}

impl GlobalBinder for SeatState {
    fn try_bind(&self, id: u32, interface: &str, version: u32, ctx: &BindContext<'_>) -> bool {
        if interface != "wl_seat" {
            return false;
        }

        let (provider_id, first) = {
            let mut inner = self.inner.lock().unwrap();
            let index = lowest_free_index(inner.entries.iter().map(|entry| entry.index));
            let version = version.min(SEAT_VERSION);
            let seat = ctx
                .registry
                .bind::<wl_seat::WlSeat, _, _>(id, version, ctx.qh, SeatData { index });

            let first = inner.entries.is_empty();
            inner.entries.push(SeatEntry {
                seat,
                registry_id: id,
                index,
                caps: SeatCapabilities::default(),
                name: String::new(),
            });
            info!(id, version, seat = index, "bound wl_seat");
            (inner.provider_id, first)
        };

        if first
            && !ctx
                .providers
                .seat_devices_slot()
                .register(provider_id, Arc::new(self.clone()))
        {
            warn!("a seat device provider is already registered");
        }
        true
    }

    fn try_unbind(&self, id: u32, ctx: &UnbindContext<'_>) -> bool {
        // Listeners are notified while the seat entry is still visible, so
        // they can release device handles before the seat goes away.
        let (index, listeners) = {
            let inner = self.inner.lock().unwrap();
            let Some(entry) = inner.entries.iter().find(|entry| entry.registry_id == id) else {
                return false;
            };
            (entry.index, inner.listeners.snapshot(&entry.index))
        };

        info!(id, seat = index, "seat global revoked");
        for listener in listeners {
            listener.seat_released(index);
        }

        let (provider_id, last) = {
            let mut inner = self.inner.lock().unwrap();
            if let Some(position) = inner.entries.iter().position(|entry| entry.registry_id == id) {
                let entry = inner.entries.remove(position);
                if entry.seat.version() >= 5 {
                    entry.seat.release();
                }
            }
            (inner.provider_id, inner.entries.is_empty())
        };

        if last {
            ctx.providers.seat_devices_slot().unregister(provider_id);
        }
        true
    }
}

impl SeatDevices for SeatState {
    fn pointer_device(&self, seat: u32) -> Option<wl_pointer::WlPointer> {
        self.with_device(
            seat,
            |caps| caps.pointer,
            |wl_seat, qh| wl_seat.get_pointer(qh, DeviceData { seat }),
        )
    }

    fn keyboard_device(&self, seat: u32) -> Option<wl_keyboard::WlKeyboard> {
        self.with_device(
            seat,
            |caps| caps.keyboard,
            |wl_seat, qh| wl_seat.get_keyboard(qh, DeviceData { seat }),
        )
    }

    fn touch_device(&self, seat: u32) -> Option<wl_touch::WlTouch> {
        self.with_device(
            seat,
            |caps| caps.touch,
            |wl_seat, qh| wl_seat.get_touch(qh, DeviceData { seat }),
        )
    }
}

impl Dispatch<wl_seat::WlSeat, SeatData> for PlatformState {
    fn event(
        state: &mut Self,
        _seat: &wl_seat::WlSeat,
        event: wl_seat::Event,
        data: &SeatData,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        match event {
            wl_seat::Event::Capabilities { capabilities } => {
                state.seats.handle_capabilities(data.index, capabilities);
            }
            wl_seat::Event::Name { name } => {
                state.seats.handle_name(data.index, name);
            }
            _ => {}
        }
    }
}

impl Dispatch<wl_touch::WlTouch, DeviceData> for PlatformState {
    fn event(
        _state: &mut Self,
        _touch: &wl_touch::WlTouch,
        _event: wl_touch::Event,
        data: &DeviceData,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        // Touch devices can be created through SeatDevices but no consumer
        // interprets their events yet.
        debug!(seat = data.seat, "dropping touch event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_fill_the_lowest_hole() {
        assert_eq!(lowest_free_index([].into_iter()), 0);
        assert_eq!(lowest_free_index([0].into_iter()), 1);
        assert_eq!(lowest_free_index([0, 1, 2].into_iter()), 3);
    }

    #[test]
    fn revoked_index_is_reused_before_higher_ones() {
        // Seats 0, 1, 2 live; seat 1 goes away; the next seat must get 1.
        assert_eq!(lowest_free_index([0, 2].into_iter()), 1);
        // Order of the live set must not matter.
        assert_eq!(lowest_free_index([2, 0].into_iter()), 1);
        assert_eq!(lowest_free_index([1, 2].into_iter()), 0);
    }

    #[test]
    fn capability_flags_mirror_the_wl_bitfield() {
        let caps = SeatCapabilities::from_wl(wl_seat::Capability::Pointer | wl_seat::Capability::Keyboard);
        assert!(caps.pointer);
        assert!(caps.keyboard);
        assert!(!caps.touch);

        let none = SeatCapabilities::from_wl(wl_seat::Capability::empty());
        assert_eq!(none, SeatCapabilities::default());
    }
}

//! Pointer consumer: focus, cursor control and frame-batched axes.

use std::sync::{Arc, Mutex, Weak};

use bitflags::bitflags;
use cursor_icon::CursorIcon;
use tracing::debug;
use wayland_client::protocol::wl_pointer;
use wayland_client::{Connection, Dispatch, Proxy, QueueHandle, WEnum};
use wayland_protocols::wp::cursor_shape::v1::client::wp_cursor_shape_device_v1;
use wayland_protocols::wp::pointer_constraints::zv1::client::zwp_locked_pointer_v1;
use wayland_protocols::wp::relative_pointer::zv1::client::zwp_relative_pointer_v1;

use crate::config::RelativeMotion;
use crate::input::{InputObserver, MouseButton};
use crate::platform::PlatformState;
use crate::pointers::cursor_shape::shape_for_icon;
use crate::registry::Providers;
use crate::seat::{DeviceData, SeatCapabilities, SeatListener, SeatState};
use crate::utils::ListenerId;
use crate::window::{WeakWindow, Window, WindowId};

const BTN_LEFT: u32 = 0x110;
const BTN_RIGHT: u32 = 0x111;
const BTN_MIDDLE: u32 = 0x112;
const BTN_SIDE: u32 = 0x113;
const BTN_EXTRA: u32 = 0x114;

fn map_button(code: u32) -> Option<MouseButton> {
    match code {
        BTN_LEFT => Some(MouseButton::Left),
        BTN_RIGHT => Some(MouseButton::Right),
        BTN_MIDDLE => Some(MouseButton::Middle),
        BTN_SIDE => Some(MouseButton::Side),
        BTN_EXTRA => Some(MouseButton::Extra),
        _ => None,
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    struct FrameAxes: u8 {
        const VERTICAL = 0x1;
        const HORIZONTAL = 0x2;
    }
}

/// Axis values accumulated between two `frame` events.
#[derive(Debug, Default)]
struct PendingFrame {
    axes: FrameAxes,
    vertical: f64,
}

impl PendingFrame {
    fn record_axis(&mut self, axis: wl_pointer::Axis, value: f64) {
        match axis {
            wl_pointer::Axis::VerticalScroll => {
                self.axes |= FrameAxes::VERTICAL;
                self.vertical += value;
            }
            wl_pointer::Axis::HorizontalScroll => {
                // Seen but unconsumed; no horizontal scroll is reported.
                self.axes |= FrameAxes::HORIZONTAL;
            }
            _ => {}
        }
    }

    /// Converts the accumulated vertical axis into a scroll delta and
    /// resets the frame. Positive deltas scroll away from the user.
    fn take_scroll(&mut self) -> Option<f32> {
        let scroll = self
            .axes
            .contains(FrameAxes::VERTICAL)
            .then(|| -(self.vertical * 8.0) as f32);
        *self = PendingFrame::default();
        scroll
    }
}

/// Desired cursor presentation, re-applied on every pointer enter.
#[derive(Debug, Clone, Copy)]
struct CursorConfig {
    visible: bool,
    locked: bool,
    shape: CursorIcon,
}

impl Default for CursorConfig {
    fn default() -> Self {
        CursorConfig {
            visible: true,
            locked: false,
            shape: CursorIcon::Default,
        }
    }
}

pub(crate) struct MouseInner {
    seat: u32,
    providers: Arc<Providers>,
    seats: SeatState,
    observer: Arc<dyn InputObserver>,
    relative_mode: RelativeMotion,
    pointer: Option<wl_pointer::WlPointer>,
    shape_device: Option<wp_cursor_shape_device_v1::WpCursorShapeDeviceV1>,
    relative: Option<zwp_relative_pointer_v1::ZwpRelativePointerV1>,
    locked: Option<zwp_locked_pointer_v1::ZwpLockedPointerV1>,
    enter_serial: Option<u32>,
    focus: Option<(WindowId, WeakWindow)>,
    frame: PendingFrame,
    cursor: CursorConfig,
    listener: Option<ListenerId>,
}

impl std::fmt::Debug for MouseInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MouseInner")
            .field("seat", &self.seat)
            .field("pointer", &self.pointer)
            .field("focus", &self.focus.as_ref().map(|(id, _)| *id))
            .field("cursor", &self.cursor)
            .finish_non_exhaustive()
    }
}

impl MouseInner {
    fn release_devices(&mut self) {
        if let Some(locked) = self.locked.take() {
            locked.destroy();
        }
        if let Some(shape_device) = self.shape_device.take() {
            shape_device.destroy();
        }
        if let Some(relative) = self.relative.take() {
            relative.destroy();
        }
        if let Some(pointer) = self.pointer.take() {
            if pointer.version() >= 3 {
                pointer.release();
            }
            debug!(seat = self.seat, "released pointer devices");
        }
        self.enter_serial = None;
        self.focus = None;
        self.frame = PendingFrame::default();
    }
}

impl Drop for MouseInner {
    fn drop(&mut self) {
        self.release_devices();
        if let Some(listener) = self.listener.take() {
            self.seats.remove_listener(&listener);
        }
    }
}

/// Pointer consumer for one seat index.
///
/// Clones share the same consumer; the devices are released when the last
/// handle is dropped.
#[derive(Debug, Clone)]
pub struct Mouse {
    inner: Arc<Mutex<MouseInner>>,
}

struct MouseSeatHook {
    inner: Weak<Mutex<MouseInner>>,
}

impl SeatListener for MouseSeatHook {
    fn capabilities_changed(&self, _seat: u32, caps: SeatCapabilities) {
        if let Some(inner) = self.inner.upgrade() {
            Mouse { inner }.sync_devices(caps);
        }
    }

    fn seat_released(&self, _seat: u32) {
        if let Some(inner) = self.inner.upgrade() {
            Mouse { inner }.sync_devices(SeatCapabilities::default());
        }
    }
}

/// Builds a pointer consumer for `seat` and starts following its
/// capabilities.
pub(crate) fn create_mouse(
    state: &mut PlatformState,
    seat: u32,
    observer: Arc<dyn InputObserver>,
) -> Mouse {
    let mouse = Mouse {
        inner: Arc::new(Mutex::new(MouseInner {
            seat,
            providers: state.providers.clone(),
            seats: state.seats.clone(),
            observer,
            relative_mode: state.config.relative_motion,
            pointer: None,
            shape_device: None,
            relative: None,
            locked: None,
            enter_serial: None,
            focus: None,
            frame: PendingFrame::default(),
            cursor: CursorConfig::default(),
            listener: None,
        })),
    };

    let hook = Arc::new(MouseSeatHook {
        inner: Arc::downgrade(&mouse.inner),
    });
    let listener = state.seats.add_listener(seat, hook);
    mouse.inner.lock().unwrap().listener = Some(listener);

    state.devices.insert_mouse(seat, &mouse);

    // The seat may already advertise a pointer.
    if let Some(caps) = state.seats.capabilities(seat) {
        mouse.sync_devices(caps);
    }
    mouse
}

impl Mouse {
    pub(crate) fn from_inner(inner: Arc<Mutex<MouseInner>>) -> Self {
        Mouse { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<Mutex<MouseInner>> {
        Arc::downgrade(&self.inner)
    }

    /// The seat index this consumer follows.
    pub fn seat(&self) -> u32 {
        self.inner.lock().unwrap().seat
    }

    /// Whether a pointer device is currently held.
    pub fn has_device(&self) -> bool {
        self.inner.lock().unwrap().pointer.is_some()
    }

    /// Whether the cursor is shown over our windows.
    pub fn cursor_visible(&self) -> bool {
        self.inner.lock().unwrap().cursor.visible
    }

    /// Whether a pointer lock is requested.
    pub fn cursor_locked(&self) -> bool {
        self.inner.lock().unwrap().cursor.locked
    }

    /// Shows or hides the cursor over our windows.
    pub fn set_cursor_visible(&self, visible: bool) {
        self.inner.lock().unwrap().cursor.visible = visible;
        self.apply_cursor();
    }

    /// Picks the cursor shape shown while the cursor is visible.
    pub fn set_cursor_shape(&self, shape: CursorIcon) {
        self.inner.lock().unwrap().cursor.shape = shape;
        self.apply_cursor();
    }

    /// Requests or releases a pointer lock on the focused window.
    ///
    /// The lock is confined to the window the pointer currently focuses; a
    /// request without pointer focus is remembered and established on the
    /// next enter.
    pub fn set_cursor_locked(&self, locked: bool) {
        self.inner.lock().unwrap().cursor.locked = locked;
        self.apply_lock();
    }

    pub(crate) fn sync_devices(&self, caps: SeatCapabilities) {
        if caps.pointer {
            self.acquire_devices();
        } else {
            self.inner.lock().unwrap().release_devices();
        }
    }

    fn acquire_devices(&self) {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        if inner.pointer.is_some() {
            return;
        }

        let Some(devices) = inner.providers.seat_devices() else {
            return;
        };
        let Some(pointer) = devices.pointer_device(inner.seat) else {
            return;
        };
        inner.shape_device = inner
            .providers
            .cursor_shapes()
            .and_then(|shapes| shapes.shape_device(&pointer));
        inner.relative = inner
            .providers
            .relative()
            .and_then(|source| source.relative_pointer(&pointer, inner.seat));

        debug!(
            seat = inner.seat,
            shapes = inner.shape_device.is_some(),
            relative = inner.relative.is_some(),
            "acquired pointer devices"
        );
        inner.pointer = Some(pointer);
    }

    /// Re-sends the current cursor visibility and shape. Needs the serial
    /// of a pointer enter, so it is a no-op without pointer focus.
    fn apply_cursor(&self) {
        let inner = self.inner.lock().unwrap();
        let Some(serial) = inner.enter_serial else {
            return;
        };
        let Some(pointer) = &inner.pointer else {
            return;
        };

        if inner.cursor.visible {
            if let Some(shape_device) = &inner.shape_device {
                shape_device.set_shape(serial, shape_for_icon(inner.cursor.shape));
            }
        } else {
            pointer.set_cursor(serial, None, 0, 0);
        }
    }

    /// Establishes or destroys the pointer lock to match the requested
    /// state.
    fn apply_lock(&self) {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;

        if !inner.cursor.locked {
            if let Some(locked) = inner.locked.take() {
                locked.destroy();
                debug!(seat = inner.seat, "pointer unlocked");
            }
            return;
        }
        if inner.locked.is_some() || inner.enter_serial.is_none() {
            return;
        }
        let Some(pointer) = inner.pointer.clone() else {
            return;
        };
        let Some(window) = inner.focus.as_ref().and_then(|(_, weak)| weak.upgrade()) else {
            return;
        };
        let Some(surface) = window.surface() else {
            return;
        };
        let Some(locks) = inner.providers.constraints() else {
            return;
        };

        // Confine the lock to the window area.
        let (width, height) = window.size();
        let region = inner
            .providers
            .compositor()
            .and_then(|compositor| compositor.create_region());
        if let Some(region) = &region {
            region.add(0, 0, width as i32, height as i32);
        }
        let locked = locks.lock_pointer(&surface, &pointer, region.as_ref(), inner.seat);
        if let Some(region) = region {
            region.destroy();
        }

        if let Some(locked) = locked {
            debug!(seat = inner.seat, "pointer locked");
            inner.locked = Some(locked);
        }
    }

    pub(crate) fn handle_enter(&self, serial: u32, window: Option<Window>) {
        let (seat, observer, focus) = {
            let mut guard = self.inner.lock().unwrap();
            let inner = &mut *guard;
            inner.enter_serial = Some(serial);
            inner.focus = window.as_ref().map(|window| (window.id(), window.downgrade()));
            inner.frame = PendingFrame::default();
            (
                inner.seat,
                inner.observer.clone(),
                inner.focus.as_ref().map(|(id, _)| *id),
            )
        };

        self.apply_cursor();
        self.apply_lock();
        observer.pointer_focus(seat, focus);
    }

    pub(crate) fn handle_leave(&self) {
        let (seat, observer) = {
            let mut guard = self.inner.lock().unwrap();
            let inner = &mut *guard;
            inner.enter_serial = None;
            inner.focus = None;
            inner.frame = PendingFrame::default();
            (inner.seat, inner.observer.clone())
        };
        observer.pointer_focus(seat, None);
    }

    pub(crate) fn handle_motion(&self, x: f64, y: f64) {
        let (seat, observer, window) = {
            let inner = self.inner.lock().unwrap();
            let window = inner.focus.as_ref().and_then(|(_, weak)| weak.upgrade());
            (inner.seat, inner.observer.clone(), window)
        };

        // Surface coordinates are logical; scale them to pixels the way the
        // focused window is scaled.
        let scale = window.map(|window| window.scale_factor()).unwrap_or(1.0);
        observer.pointer_position(seat, (x * scale) as f32, (y * scale) as f32);
    }

    pub(crate) fn handle_button(&self, button: u32, state: WEnum<wl_pointer::ButtonState>) {
        let Some(button) = map_button(button) else {
            return;
        };
        let pressed = matches!(state, WEnum::Value(wl_pointer::ButtonState::Pressed));
        let (seat, observer) = {
            let inner = self.inner.lock().unwrap();
            (inner.seat, inner.observer.clone())
        };
        observer.pointer_button(seat, button, pressed);
    }

    pub(crate) fn handle_axis(&self, axis: WEnum<wl_pointer::Axis>, value: f64) {
        let WEnum::Value(axis) = axis else {
            return;
        };
        self.inner.lock().unwrap().frame.record_axis(axis, value);
    }

    pub(crate) fn handle_frame(&self) {
        let (seat, observer, scroll) = {
            let mut inner = self.inner.lock().unwrap();
            let scroll = inner.frame.take_scroll();
            (inner.seat, inner.observer.clone(), scroll)
        };
        if let Some(delta) = scroll {
            observer.pointer_scroll(seat, delta);
        }
    }

    pub(crate) fn handle_relative_motion(&self, dx: f64, dy: f64, dx_unaccel: f64, dy_unaccel: f64) {
        let (seat, observer, mode) = {
            let inner = self.inner.lock().unwrap();
            (inner.seat, inner.observer.clone(), inner.relative_mode)
        };
        let (dx, dy) = match mode {
            RelativeMotion::Accelerated => (dx, dy),
            RelativeMotion::Raw => (dx_unaccel, dy_unaccel),
        };
        if dx != 0.0 || dy != 0.0 {
            observer.pointer_motion(seat, dx as f32, dy as f32);
        }
    }
}

impl Dispatch<wl_pointer::WlPointer, DeviceData> for PlatformState {
    fn event(
        state: &mut Self,
        _pointer: &wl_pointer::WlPointer,
        event: wl_pointer::Event,
        data: &DeviceData,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        let Some(mouse) = state.devices.mouse(data.seat) else {
            return;
        };
        match event {
            wl_pointer::Event::Enter { serial, surface, .. } => {
                let window = surface
                    .data::<WindowId>()
                    .copied()
                    .and_then(|id| state.windows.get(id));
                mouse.handle_enter(serial, window);
            }
            wl_pointer::Event::Leave { .. } => mouse.handle_leave(),
            wl_pointer::Event::Motion {
                surface_x,
                surface_y,
                ..
            } => mouse.handle_motion(surface_x, surface_y),
            wl_pointer::Event::Button {
                button,
                state: button_state,
                ..
            } => mouse.handle_button(button, button_state),
            wl_pointer::Event::Axis { axis, value, .. } => mouse.handle_axis(axis, value),
            wl_pointer::Event::Frame => mouse.handle_frame(),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_five_known_buttons_map() {
        assert_eq!(map_button(BTN_LEFT), Some(MouseButton::Left));
        assert_eq!(map_button(BTN_RIGHT), Some(MouseButton::Right));
        assert_eq!(map_button(BTN_MIDDLE), Some(MouseButton::Middle));
        assert_eq!(map_button(BTN_SIDE), Some(MouseButton::Side));
        assert_eq!(map_button(BTN_EXTRA), Some(MouseButton::Extra));
        // BTN_FORWARD and friends are dropped.
        assert_eq!(map_button(0x115), None);
        assert_eq!(map_button(0), None);
    }

    #[test]
    fn vertical_axis_accumulates_and_inverts() {
        let mut frame = PendingFrame::default();
        frame.record_axis(wl_pointer::Axis::VerticalScroll, 2.5);
        frame.record_axis(wl_pointer::Axis::VerticalScroll, 2.5);

        assert_eq!(frame.take_scroll(), Some(-40.0));
        // The frame resets after being taken.
        assert_eq!(frame.take_scroll(), None);
    }

    #[test]
    fn horizontal_axis_is_not_reported() {
        let mut frame = PendingFrame::default();
        frame.record_axis(wl_pointer::Axis::HorizontalScroll, 5.0);
        assert_eq!(frame.take_scroll(), None);

        // A mixed frame only reports the vertical part.
        frame.record_axis(wl_pointer::Axis::HorizontalScroll, 5.0);
        frame.record_axis(wl_pointer::Axis::VerticalScroll, -1.0);
        assert_eq!(frame.take_scroll(), Some(8.0));
    }

    #[test]
    fn empty_frames_produce_no_scroll() {
        let mut frame = PendingFrame::default();
        assert_eq!(frame.take_scroll(), None);
    }
}

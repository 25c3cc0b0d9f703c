use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::compositor::SurfaceSource;
use crate::output::OutputQueries;
use crate::pointers::constraints::PointerLocks;
use crate::pointers::cursor_shape::CursorShapes;
use crate::pointers::relative::RelativeMotionSource;
use crate::seat::SeatDevices;
use crate::shell::{DecorationSource, ShellSource};

static NEXT_PROVIDER_ID: AtomicUsize = AtomicUsize::new(0);

/// Identity token of a provider registration.
///
/// Every binder instance allocates one and uses it for all of its
/// registrations, so a binder that lost its slot to a competitor cannot
/// evict the competitor with a late unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderId(usize);

impl ProviderId {
    /// Allocates a fresh, process-unique id.
    pub fn next() -> Self {
        ProviderId(NEXT_PROVIDER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A single-occupancy registration slot for one capability kind.
pub struct ProviderSlot<T: ?Sized> {
    slot: Mutex<Option<(ProviderId, Arc<T>)>>,
}

impl<T: ?Sized> std::fmt::Debug for ProviderSlot<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSlot")
            .field("occupied", &self.registrant().is_some())
            .finish_non_exhaustive()
    }
}

impl<T: ?Sized> Default for ProviderSlot<T> {
    fn default() -> Self {
        ProviderSlot { slot: Mutex::new(None) }
    }
}

impl<T: ?Sized> ProviderSlot<T> {
    /// Registers `provider` under `id`.
    ///
    /// Refused when the slot is already occupied; the first registrant of a
    /// kind wins and keeps the slot until it unregisters.
    pub fn register(&self, id: ProviderId, provider: Arc<T>) -> bool {
        let mut slot = self.slot.lock().unwrap();
        if slot.is_some() {
            return false;
        }
        *slot = Some((id, provider));
        true
    }

    /// Clears the slot, but only if `id` is the current registrant.
    ///
    /// A stale unregister from a binder that never held the slot (or lost
    /// it earlier) must not evict the active provider.
    pub fn unregister(&self, id: ProviderId) -> bool {
        let mut slot = self.slot.lock().unwrap();
        match *slot {
            Some((current, _)) if current == id => {
                *slot = None;
                true
            }
            _ => false,
        }
    }

    /// The currently registered provider, if any.
    pub fn get(&self) -> Option<Arc<T>> {
        self.slot.lock().unwrap().as_ref().map(|(_, provider)| provider.clone())
    }

    /// Identity of the current registrant, if any.
    pub fn registrant(&self) -> Option<ProviderId> {
        self.slot.lock().unwrap().as_ref().map(|(id, _)| *id)
    }
}

/// The capability provider registry.
///
/// One slot per capability kind. Binders register here when their global is
/// bound and unregister when it is revoked; consumers look capabilities up
/// at use time and treat an empty slot as a missing capability, never as an
/// error. The registry is created by [`Smelter::connect`](crate::Smelter::connect)
/// and threaded to every component that needs it.
#[derive(Debug, Default)]
pub struct Providers {
    compositor: ProviderSlot<dyn SurfaceSource>,
    seat_devices: ProviderSlot<dyn SeatDevices>,
    shell: ProviderSlot<dyn ShellSource>,
    decorations: ProviderSlot<dyn DecorationSource>,
    cursor_shapes: ProviderSlot<dyn CursorShapes>,
    constraints: ProviderSlot<dyn PointerLocks>,
    relative: ProviderSlot<dyn RelativeMotionSource>,
    outputs: ProviderSlot<dyn OutputQueries>,
}

impl Providers {
    /// The surface factory, while a compositor global is bound.
    pub fn compositor(&self) -> Option<Arc<dyn SurfaceSource>> {
        self.compositor.get()
    }

    /// The seat device factory, while at least one seat exists.
    pub fn seat_devices(&self) -> Option<Arc<dyn SeatDevices>> {
        self.seat_devices.get()
    }

    /// The shell surface factory, while an xdg_wm_base global is bound.
    pub fn shell(&self) -> Option<Arc<dyn ShellSource>> {
        self.shell.get()
    }

    /// The decoration factory, while a decoration manager is bound.
    pub fn decorations(&self) -> Option<Arc<dyn DecorationSource>> {
        self.decorations.get()
    }

    /// The cursor shape device factory, while the global is bound.
    pub fn cursor_shapes(&self) -> Option<Arc<dyn CursorShapes>> {
        self.cursor_shapes.get()
    }

    /// The pointer lock factory, while the global is bound.
    pub fn constraints(&self) -> Option<Arc<dyn PointerLocks>> {
        self.constraints.get()
    }

    /// The relative pointer factory, while the global is bound.
    pub fn relative(&self) -> Option<Arc<dyn RelativeMotionSource>> {
        self.relative.get()
    }

    /// Output property queries, while at least one output exists.
    pub fn outputs(&self) -> Option<Arc<dyn OutputQueries>> {
        self.outputs.get()
    }

    /// Slot used by the compositor binder.
    pub fn compositor_slot(&self) -> &ProviderSlot<dyn SurfaceSource> {
        &self.compositor
    }

    /// Slot used by the seat binder.
    pub fn seat_devices_slot(&self) -> &ProviderSlot<dyn SeatDevices> {
        &self.seat_devices
    }

    /// Slot used by the shell binder for its wm base role.
    pub fn shell_slot(&self) -> &ProviderSlot<dyn ShellSource> {
        &self.shell
    }

    /// Slot used by the shell binder for its decoration role.
    pub fn decorations_slot(&self) -> &ProviderSlot<dyn DecorationSource> {
        &self.decorations
    }

    /// Slot used by the cursor shape binder.
    pub fn cursor_shapes_slot(&self) -> &ProviderSlot<dyn CursorShapes> {
        &self.cursor_shapes
    }

    /// Slot used by the pointer constraints binder.
    pub fn constraints_slot(&self) -> &ProviderSlot<dyn PointerLocks> {
        &self.constraints
    }

    /// Slot used by the relative pointer binder.
    pub fn relative_slot(&self) -> &ProviderSlot<dyn RelativeMotionSource> {
        &self.relative
    }

    /// Slot used by the output binder.
    pub fn outputs_slot(&self) -> &ProviderSlot<dyn OutputQueries> {
        &self.outputs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_registration_wins() {
        let slot: ProviderSlot<str> = Default::default();
        let first = ProviderId::next();
        let second = ProviderId::next();

        assert!(slot.register(first, Arc::from("first")));
        assert!(!slot.register(second, Arc::from("second")));

        assert_eq!(slot.get().as_deref(), Some("first"));
        assert_eq!(slot.registrant(), Some(first));
    }

    #[test]
    fn unregister_is_guarded_by_registrant_identity() {
        let slot: ProviderSlot<str> = Default::default();
        let first = ProviderId::next();
        let second = ProviderId::next();

        assert!(slot.register(first, Arc::from("first")));
        assert!(slot.unregister(first));
        assert!(slot.get().is_none());

        // The slot changed hands; a late unregister from the previous
        // holder must not evict the new provider.
        assert!(slot.register(second, Arc::from("second")));
        assert!(!slot.unregister(first));
        assert_eq!(slot.get().as_deref(), Some("second"));
    }

    #[test]
    fn unregister_on_an_empty_slot_is_a_no_op() {
        let slot: ProviderSlot<str> = Default::default();
        assert!(!slot.unregister(ProviderId::next()));
        assert!(slot.get().is_none());
    }

    #[test]
    fn provider_ids_are_unique() {
        let a = ProviderId::next();
        let b = ProviderId::next();
        assert_ne!(a, b);
    }
}

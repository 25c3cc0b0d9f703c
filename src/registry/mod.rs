//! Global registry tracking and binder fan-out.
//!
//! The compositor advertises its globals through `wl_registry`. This module
//! keeps the authoritative directory of what currently exists and turns the
//! announce/revoke stream into bind and unbind decisions:
//!
//! - every announcement is recorded (unless blocklisted) and offered to the
//!   registered [`GlobalBinder`]s in a fixed order; the first binder to
//!   claim it wins,
//! - every revocation removes the directory entry and is offered to every
//!   binder, each checking whether the id is one of its own,
//! - announcements and revocations nobody claims are forwarded to
//!   [`GlobalsObserver`]s, so embedders can bind protocols this crate does
//!   not understand.
//!
//! Revoking an id that was never recorded is a silent no-op.

use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{debug, debug_span, info};
use wayland_client::protocol::wl_registry;
use wayland_client::{Connection, Dispatch, QueueHandle};

use crate::config::Blocklist;
use crate::platform::PlatformState;
use crate::utils::{ListenerId, Listeners};

mod binding;
mod errors;
mod providers;

pub use binding::RoleBinding;
pub use errors::{ErrorRoutes, ProtocolErrorSink};
pub use providers::{ProviderId, ProviderSlot, Providers};

pub(crate) use errors::report_unclaimed;

/// Interface name and version a global was announced with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalMeta {
    /// Interface name, e.g. `wl_seat`.
    pub interface: String,
    /// Version advertised by the compositor.
    pub version: u32,
}

/// Everything a binder needs to bind a freshly announced global.
pub struct BindContext<'a> {
    /// The registry the global was announced on.
    pub registry: &'a wl_registry::WlRegistry,
    /// Queue handle for creating protocol objects.
    pub qh: &'a QueueHandle<PlatformState>,
    /// Capability registry to publish providers into.
    pub providers: &'a Arc<Providers>,
    /// Protocol error routing table.
    pub errors: &'a ErrorRoutes,
}

impl std::fmt::Debug for BindContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindContext").finish_non_exhaustive()
    }
}

/// Context handed to binders when a global is revoked.
pub struct UnbindContext<'a> {
    /// Capability registry to withdraw providers from.
    pub providers: &'a Arc<Providers>,
    /// Protocol error routing table.
    pub errors: &'a ErrorRoutes,
}

impl std::fmt::Debug for UnbindContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnbindContext").finish_non_exhaustive()
    }
}

/// A component that may claim announced globals.
///
/// Binders are offered globals in registration order; the first one whose
/// [`try_bind`](GlobalBinder::try_bind) returns `true` owns the global
/// until it claims the matching revocation in
/// [`try_unbind`](GlobalBinder::try_unbind).
pub trait GlobalBinder: Send + Sync {
    /// Offers an announced global. Returns whether it was claimed.
    fn try_bind(&self, id: u32, interface: &str, version: u32, ctx: &BindContext<'_>) -> bool;

    /// Offers a revoked registry id. Returns whether this binder owned it
    /// and released it.
    fn try_unbind(&self, id: u32, ctx: &UnbindContext<'_>) -> bool;
}

/// Observes announcements and revocations no binder claimed.
pub trait GlobalsObserver: Send + Sync {
    /// A global no binder understands was announced.
    fn announced(&self, _id: u32, _interface: &str, _version: u32) {}

    /// A previously announced, unclaimed global was revoked.
    fn revoked(&self, _id: u32) {}
}

/// Insertion-ordered record of the globals currently advertised.
///
/// This is the single source of truth for what exists right now; binders
/// and observers are driven from its admit/forget edges. Blocklisted
/// interfaces are suppressed before they reach it.
#[derive(Debug, Default)]
pub struct GlobalDirectory {
    globals: IndexMap<u32, GlobalMeta>,
    blocklist: Blocklist,
}

impl GlobalDirectory {
    /// Creates an empty directory filtering through `blocklist`.
    pub fn new(blocklist: Blocklist) -> Self {
        GlobalDirectory {
            globals: IndexMap::new(),
            blocklist,
        }
    }

    /// Records an announced global, unless its interface is blocklisted.
    ///
    /// Returns whether the global was admitted.
    pub fn admit(&mut self, id: u32, interface: &str, version: u32) -> bool {
        if self.blocklist.contains(interface) {
            info!(id, interface, "ignoring blocklisted global");
            return false;
        }
        self.globals.insert(
            id,
            GlobalMeta {
                interface: interface.to_string(),
                version,
            },
        );
        true
    }

    /// Removes a revoked global from the record.
    ///
    /// Returns `None` for ids that were never admitted, in which case the
    /// revocation must not be propagated anywhere.
    pub fn forget(&mut self, id: u32) -> Option<GlobalMeta> {
        self.globals.shift_remove(&id)
    }

    /// Looks up the announcement data of a live global.
    pub fn get(&self, id: u32) -> Option<&GlobalMeta> {
        self.globals.get(&id)
    }

    /// Whether `id` is currently advertised.
    pub fn contains(&self, id: u32) -> bool {
        self.globals.contains_key(&id)
    }

    /// Iterates over the live globals in announcement order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &GlobalMeta)> {
        self.globals.iter().map(|(id, meta)| (*id, meta))
    }

    /// Number of live globals.
    pub fn len(&self) -> usize {
        self.globals.len()
    }

    /// Whether no global is currently advertised.
    pub fn is_empty(&self) -> bool {
        self.globals.is_empty()
    }
}

/// Owner of the `wl_registry` and driver of the binder fan-out.
pub struct RegistryState {
    registry: wl_registry::WlRegistry,
    directory: GlobalDirectory,
    binders: Vec<Arc<dyn GlobalBinder>>,
    unhandled: Listeners<(), dyn GlobalsObserver>,
    providers: Arc<Providers>,
    errors: ErrorRoutes,
}

impl std::fmt::Debug for RegistryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryState")
            .field("registry", &self.registry)
            .field("directory", &self.directory)
            .field("binders", &self.binders.len())
            .finish_non_exhaustive()
    }
}

impl RegistryState {
    /// Creates the registry state around an already created `wl_registry`.
    ///
    /// `binders` are offered globals in the given order. Binders that feed
    /// providers consumed by other binders' notifications must come first.
    pub fn new(
        registry: wl_registry::WlRegistry,
        blocklist: Blocklist,
        binders: Vec<Arc<dyn GlobalBinder>>,
        providers: Arc<Providers>,
        errors: ErrorRoutes,
    ) -> Self {
        RegistryState {
            registry,
            directory: GlobalDirectory::new(blocklist),
            binders,
            unhandled: Listeners::new(),
            providers,
            errors,
        }
    }

    /// The live global directory.
    pub fn directory(&self) -> &GlobalDirectory {
        &self.directory
    }

    /// The underlying registry proxy.
    pub fn registry(&self) -> &wl_registry::WlRegistry {
        &self.registry
    }

    /// Adds an observer for globals no binder claims.
    pub fn add_observer(&mut self, observer: Arc<dyn GlobalsObserver>) -> ListenerId {
        self.unhandled.add((), observer)
    }

    /// Removes a previously added observer.
    pub fn remove_observer(&mut self, id: &ListenerId) -> bool {
        self.unhandled.remove(id)
    }

    fn handle_announce(&mut self, id: u32, interface: &str, version: u32, qh: &QueueHandle<PlatformState>) {
        let _span = debug_span!("registry_global", id, interface, version).entered();

        if !self.directory.admit(id, interface, version) {
            return;
        }

        let ctx = BindContext {
            registry: &self.registry,
            qh,
            providers: &self.providers,
            errors: &self.errors,
        };
        for binder in &self.binders {
            if binder.try_bind(id, interface, version, &ctx) {
                debug!("global claimed");
                return;
            }
        }

        debug!("global left unbound");
        for observer in self.unhandled.snapshot_all() {
            observer.announced(id, interface, version);
        }
    }

    fn handle_revoke(&mut self, id: u32) {
        let Some(meta) = self.directory.forget(id) else {
            // Never announced to us (or blocklisted): nothing to revoke.
            return;
        };
        let _span = debug_span!("registry_global_remove", id, interface = %meta.interface).entered();

        let ctx = UnbindContext {
            providers: &self.providers,
            errors: &self.errors,
        };
        for binder in &self.binders {
            if binder.try_unbind(id, &ctx) {
                debug!("global released by its binder");
                return;
            }
        }

        for observer in self.unhandled.snapshot_all() {
            observer.revoked(id);
        }
    }
}

impl Dispatch<wl_registry::WlRegistry, ()> for PlatformState {
    fn event(
        state: &mut Self,
        _registry: &wl_registry::WlRegistry,
        event: wl_registry::Event,
        _data: &(),
        _conn: &Connection,
        qh: &QueueHandle<Self>,
    ) {
        match event {
            wl_registry::Event::Global {
                name,
                interface,
                version,
            } => {
                state.registry.handle_announce(name, &interface, version, qh);
            }
            wl_registry::Event::GlobalRemove { name } => {
                state.registry.handle_revoke(name);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory(blocked: &str) -> GlobalDirectory {
        GlobalDirectory::new(Blocklist::parse(blocked))
    }

    #[test]
    fn admitted_globals_are_recorded_in_order() {
        let mut dir = directory("");
        assert!(dir.admit(1, "wl_compositor", 6));
        assert!(dir.admit(2, "wl_seat", 8));

        let names: Vec<_> = dir.iter().map(|(id, meta)| (id, meta.interface.as_str())).collect();
        assert_eq!(names, vec![(1, "wl_compositor"), (2, "wl_seat")]);
        assert_eq!(dir.get(2).map(|meta| meta.version), Some(8));
    }

    #[test]
    fn blocklisted_interfaces_are_suppressed() {
        let mut dir = directory("wl_seat,zwp_relative_pointer_manager_v1");
        assert!(!dir.admit(1, "wl_seat", 8));
        assert!(dir.admit(2, "wl_output", 4));

        assert!(!dir.contains(1));
        assert_eq!(dir.len(), 1);
    }

    #[test]
    fn forgetting_an_unknown_id_is_a_no_op() {
        let mut dir = directory("");
        dir.admit(1, "wl_output", 4);

        assert!(dir.forget(99).is_none());
        assert_eq!(dir.len(), 1);

        let meta = dir.forget(1).expect("admitted global");
        assert_eq!(meta.interface, "wl_output");
        assert!(dir.is_empty());
    }

    #[test]
    fn a_blocked_global_cannot_be_forgotten() {
        // The revoke for a suppressed announcement must look unknown.
        let mut dir = directory("wl_seat");
        dir.admit(1, "wl_seat", 8);
        assert!(dir.forget(1).is_none());
    }
}

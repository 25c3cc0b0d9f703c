//! `zwp_pointer_constraints_v1` binding and pointer locking.

use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};
use wayland_client::protocol::{wl_pointer, wl_region, wl_surface};
use wayland_client::{Connection, Dispatch, QueueHandle};
use wayland_protocols::wp::pointer_constraints::zv1::client::{
    zwp_locked_pointer_v1, zwp_pointer_constraints_v1,
};

use crate::platform::PlatformState;
use crate::registry::{BindContext, GlobalBinder, ProviderId, RoleBinding, UnbindContext};
use crate::seat::DeviceData;

/// Highest `zwp_pointer_constraints_v1` version this crate binds.
pub const POINTER_CONSTRAINTS_VERSION: u32 = 1;

/// Creates pointer locks, while the global is bound.
pub trait PointerLocks: Send + Sync {
    /// The bound constraints manager handle.
    fn constraints(&self) -> Option<zwp_pointer_constraints_v1::ZwpPointerConstraintsV1>;

    /// Locks `pointer` to its current position while it is over `surface`.
    ///
    /// The lock is persistent: it re-activates whenever its activation
    /// conditions are met again, until destroyed.
    fn lock_pointer(
        &self,
        surface: &wl_surface::WlSurface,
        pointer: &wl_pointer::WlPointer,
        region: Option<&wl_region::WlRegion>,
        seat: u32,
    ) -> Option<zwp_locked_pointer_v1::ZwpLockedPointerV1>;
}

#[derive(Debug)]
struct Inner {
    qh: QueueHandle<PlatformState>,
    binding: RoleBinding<zwp_pointer_constraints_v1::ZwpPointerConstraintsV1>,
    provider_id: ProviderId,
}

/// Binder for the pointer constraints global.
#[derive(Debug, Clone)]
pub struct PointerConstraintsState {
    inner: Arc<Mutex<Inner>>,
}

impl PointerConstraintsState {
    /// Creates the unbound pointer constraints state.
    pub fn new(qh: QueueHandle<PlatformState>) -> Self {
        PointerConstraintsState {
            inner: Arc::new(Mutex::new(Inner {
                qh,
                binding: RoleBinding::new(),
                provider_id: ProviderId::next(),
            })),
        }
    }
}

impl GlobalBinder for PointerConstraintsState {
    fn try_bind(&self, id: u32, interface: &str, version: u32, ctx: &BindContext<'_>) -> bool {
        if interface != "zwp_pointer_constraints_v1" {
            return false;
        }

        let provider_id = {
            let mut inner = self.inner.lock().unwrap();
            if inner.binding.is_bound() {
                warn!(id, "refusing duplicate zwp_pointer_constraints_v1 global");
                return false;
            }
            let version = version.min(POINTER_CONSTRAINTS_VERSION);
            let constraints = ctx
                .registry
                .bind::<zwp_pointer_constraints_v1::ZwpPointerConstraintsV1, _, _>(id, version, ctx.qh, ());
            inner.binding.install(id, constraints);
            info!(id, version, "bound zwp_pointer_constraints_v1");
            inner.provider_id
        };

        if !ctx
            .providers
            .constraints_slot()
            .register(provider_id, Arc::new(self.clone()))
        {
            warn!("a pointer lock provider is already registered");
        }
        true
    }

    fn try_unbind(&self, id: u32, ctx: &UnbindContext<'_>) -> bool {
        let (constraints, provider_id) = {
            let mut inner = self.inner.lock().unwrap();
            let Some(constraints) = inner.binding.release_if(id) else {
                return false;
            };
            (constraints, inner.provider_id)
        };

        constraints.destroy();
        ctx.providers.constraints_slot().unregister(provider_id);
        info!(id, "zwp_pointer_constraints_v1 global revoked");
        true
    }
}

impl PointerLocks for PointerConstraintsState {
    fn constraints(&self) -> Option<zwp_pointer_constraints_v1::ZwpPointerConstraintsV1> {
        self.inner.lock().unwrap().binding.handle().cloned()
    }

    fn lock_pointer(
        &self,
        surface: &wl_surface::WlSurface,
        pointer: &wl_pointer::WlPointer,
        region: Option<&wl_region::WlRegion>,
        seat: u32,
    ) -> Option<zwp_locked_pointer_v1::ZwpLockedPointerV1> {
        let inner = self.inner.lock().unwrap();
        let constraints = inner.binding.handle()?;
        Some(constraints.lock_pointer(
            surface,
            pointer,
            region,
            zwp_pointer_constraints_v1::Lifetime::Persistent,
            &inner.qh,
            DeviceData { seat },
        ))
    }
}

impl Dispatch<zwp_pointer_constraints_v1::ZwpPointerConstraintsV1, ()> for PlatformState {
    fn event(
        _state: &mut Self,
        _constraints: &zwp_pointer_constraints_v1::ZwpPointerConstraintsV1,
        _event: zwp_pointer_constraints_v1::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        // zwp_pointer_constraints_v1 has no events
    }
}

impl Dispatch<zwp_locked_pointer_v1::ZwpLockedPointerV1, DeviceData> for PlatformState {
    fn event(
        _state: &mut Self,
        _locked: &zwp_locked_pointer_v1::ZwpLockedPointerV1,
        event: zwp_locked_pointer_v1::Event,
        data: &DeviceData,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        match event {
            zwp_locked_pointer_v1::Event::Locked => {
                debug!(seat = data.seat, "pointer lock engaged");
            }
            zwp_locked_pointer_v1::Event::Unlocked => {
                debug!(seat = data.seat, "pointer lock disengaged");
            }
            _ => {}
        }
    }
}

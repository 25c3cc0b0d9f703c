//! `zwp_relative_pointer_manager_v1` binding and relative motion routing.

use std::sync::{Arc, Mutex};

use tracing::{info, warn};
use wayland_client::protocol::wl_pointer;
use wayland_client::{Connection, Dispatch, QueueHandle};
use wayland_protocols::wp::relative_pointer::zv1::client::{
    zwp_relative_pointer_manager_v1, zwp_relative_pointer_v1,
};

use crate::platform::PlatformState;
use crate::registry::{BindContext, GlobalBinder, ProviderId, RoleBinding, UnbindContext};
use crate::seat::DeviceData;

/// Highest `zwp_relative_pointer_manager_v1` version this crate binds.
pub const RELATIVE_POINTER_VERSION: u32 = 1;

/// Creates relative pointer objects, while the global is bound.
pub trait RelativeMotionSource: Send + Sync {
    /// Creates a relative pointer tied to `pointer`.
    fn relative_pointer(
        &self,
        pointer: &wl_pointer::WlPointer,
        seat: u32,
    ) -> Option<zwp_relative_pointer_v1::ZwpRelativePointerV1>;
}

#[derive(Debug)]
struct Inner {
    qh: QueueHandle<PlatformState>,
    binding: RoleBinding<zwp_relative_pointer_manager_v1::ZwpRelativePointerManagerV1>,
    provider_id: ProviderId,
}

/// Binder for the relative pointer manager global.
#[derive(Debug, Clone)]
pub struct RelativePointerState {
    inner: Arc<Mutex<Inner>>,
}

impl RelativePointerState {
    /// Creates the unbound relative pointer state.
    pub fn new(qh: QueueHandle<PlatformState>) -> Self {
        RelativePointerState {
            inner: Arc::new(Mutex::new(Inner {
                qh,
                binding: RoleBinding::new(),
                provider_id: ProviderId::next(),
            })),
        }
    }
}

impl GlobalBinder for RelativePointerState {
    fn try_bind(&self, id: u32, interface: &str, version: u32, ctx: &BindContext<'_>) -> bool {
        if interface != "zwp_relative_pointer_manager_v1" {
            return false;
        }

        let provider_id = {
            let mut inner = self.inner.lock().unwrap();
            if inner.binding.is_bound() {
                warn!(id, "refusing duplicate zwp_relative_pointer_manager_v1 global");
                return false;
            }
            let version = version.min(RELATIVE_POINTER_VERSION);
            let manager = ctx
                .registry
                .bind::<zwp_relative_pointer_manager_v1::ZwpRelativePointerManagerV1, _, _>(
                    id, version, ctx.qh, (),
                );
            inner.binding.install(id, manager);
            info!(id, version, "bound zwp_relative_pointer_manager_v1");
            inner.provider_id
        };

        if !ctx
            .providers
            .relative_slot()
            .register(provider_id, Arc::new(self.clone()))
        {
            warn!("a relative motion provider is already registered");
        }
        true
    }

    fn try_unbind(&self, id: u32, ctx: &UnbindContext<'_>) -> bool {
        let (manager, provider_id) = {
            let mut inner = self.inner.lock().unwrap();
            let Some(manager) = inner.binding.release_if(id) else {
                return false;
            };
            (manager, inner.provider_id)
        };

        manager.destroy();
        ctx.providers.relative_slot().unregister(provider_id);
        info!(id, "zwp_relative_pointer_manager_v1 global revoked");
        true
    }
}

impl RelativeMotionSource for RelativePointerState {
    fn relative_pointer(
        &self,
        pointer: &wl_pointer::WlPointer,
        seat: u32,
    ) -> Option<zwp_relative_pointer_v1::ZwpRelativePointerV1> {
        let inner = self.inner.lock().unwrap();
        let manager = inner.binding.handle()?;
        Some(manager.get_relative_pointer(pointer, &inner.qh, DeviceData { seat }))
    }
}

impl Dispatch<zwp_relative_pointer_manager_v1::ZwpRelativePointerManagerV1, ()> for PlatformState {
    fn event(
        _state: &mut Self,
        _manager: &zwp_relative_pointer_manager_v1::ZwpRelativePointerManagerV1,
        _event: zwp_relative_pointer_manager_v1::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        // zwp_relative_pointer_manager_v1 has no events
    }
}

impl Dispatch<zwp_relative_pointer_v1::ZwpRelativePointerV1, DeviceData> for PlatformState {
    fn event(
        state: &mut Self,
        _relative: &zwp_relative_pointer_v1::ZwpRelativePointerV1,
        event: zwp_relative_pointer_v1::Event,
        data: &DeviceData,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let zwp_relative_pointer_v1::Event::RelativeMotion {
            dx,
            dy,
            dx_unaccel,
            dy_unaccel,
            ..
        } = event
        {
            if let Some(mouse) = state.devices.mouse(data.seat) {
                mouse.handle_relative_motion(dx, dy, dx_unaccel, dy_unaccel);
            }
        }
    }
}

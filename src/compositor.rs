//! `wl_compositor` binding and surface creation.

use std::sync::{Arc, Mutex};

use tracing::{info, warn};
use wayland_client::protocol::{wl_compositor, wl_region, wl_surface};
use wayland_client::{Connection, Dispatch, QueueHandle};

use crate::platform::PlatformState;
use crate::registry::{BindContext, GlobalBinder, ProviderId, RoleBinding, UnbindContext};
use crate::window::WindowId;

/// Highest `wl_compositor` version this crate binds.
pub const COMPOSITOR_VERSION: u32 = 6;

/// Creates surfaces and regions, while a compositor global is bound.
pub trait SurfaceSource: Send + Sync {
    /// The bound compositor handle.
    fn compositor(&self) -> Option<wl_compositor::WlCompositor>;

    /// Creates a surface owned by the window `id`.
    fn create_surface(&self, id: WindowId) -> Option<wl_surface::WlSurface>;

    /// Creates an empty region.
    fn create_region(&self) -> Option<wl_region::WlRegion>;
}

#[derive(Debug)]
struct Inner {
    qh: QueueHandle<PlatformState>,
    binding: RoleBinding<wl_compositor::WlCompositor>,
    provider_id: ProviderId,
}

/// Binder for the `wl_compositor` global.
///
/// Single role: a second compositor announcement is refused and falls
/// through to the unhandled-global observers.
#[derive(Debug, Clone)]
pub struct CompositorState {
    inner: Arc<Mutex<Inner>>,
}

impl CompositorState {
    /// Creates the unbound compositor state.
    pub fn new(qh: QueueHandle<PlatformState>) -> Self {
        CompositorState {
            inner: Arc::new(Mutex::new(Inner {
                qh,
                binding: RoleBinding::new(),
                provider_id: ProviderId::next(),
            })),
        }
    }

    /// Whether a compositor is currently bound.
    pub fn is_bound(&self) -> bool {
        self.inner.lock().unwrap().binding.is_bound()
    }
}

impl GlobalBinder for CompositorState {
    fn try_bind(&self, id: u32, interface: &str, version: u32, ctx: &BindContext<'_>) -> bool {
        if interface != "wl_compositor" {
            return false;
        }

        let provider_id = {
            let mut inner = self.inner.lock().unwrap();
            if inner.binding.is_bound() {
                warn!(id, "refusing duplicate wl_compositor global");
                return false;
            }

            let version = version.min(COMPOSITOR_VERSION);
            let compositor = ctx
                .registry
                .bind::<wl_compositor::WlCompositor, _, _>(id, version, ctx.qh, ());
            inner.binding.install(id, compositor);
            info!(id, version, "bound wl_compositor");
            inner.provider_id
        };

        if !ctx
            .providers
            .compositor_slot()
            .register(provider_id, Arc::new(self.clone()))
        {
            warn!("a surface provider is already registered");
        }
        true
    }

    fn try_unbind(&self, id: u32, ctx: &UnbindContext<'_>) -> bool {
        let provider_id = {
            let mut inner = self.inner.lock().unwrap();
            if inner.binding.release_if(id).is_none() {
                return false;
            }
            inner.provider_id
        };

        // wl_compositor has no destructor request; dropping the proxy is
        // enough.
        ctx.providers.compositor_slot().unregister(provider_id);
        info!(id, "wl_compositor global revoked");
        true
    }
}

impl SurfaceSource for CompositorState {
    fn compositor(&self) -> Option<wl_compositor::WlCompositor> {
        self.inner.lock().unwrap().binding.handle().cloned()
    }

    fn create_surface(&self, id: WindowId) -> Option<wl_surface::WlSurface> {
        let inner = self.inner.lock().unwrap();
        let compositor = inner.binding.handle()?;
        Some(compositor.create_surface(&inner.qh, id))
    }

    fn create_region(&self) -> Option<wl_region::WlRegion> {
        let inner = self.inner.lock().unwrap();
        let compositor = inner.binding.handle()?;
        Some(compositor.create_region(&inner.qh, ()))
    }
}

impl Dispatch<wl_compositor::WlCompositor, ()> for PlatformState {
    fn event(
        _state: &mut Self,
        _compositor: &wl_compositor::WlCompositor,
        _event: wl_compositor::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        // wl_compositor has no events
    }
}

impl Dispatch<wl_region::WlRegion, ()> for PlatformState {
    fn event(
        _state: &mut Self,
        _region: &wl_region::WlRegion,
        _event: wl_region::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        // wl_region has no events
    }
}

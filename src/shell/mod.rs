//! xdg shell and decoration manager binding.
//!
//! One owner composing two independent roles: the `xdg_wm_base` global
//! (window surfaces, ping handling) and the `zxdg_decoration_manager_v1`
//! global (server side decorations). Either role can be bound while the
//! other is absent, each keeps its own provider registration and its own
//! protocol error table.

use std::sync::{Arc, Mutex};

use tracing::{error, info, warn};
use wayland_client::protocol::wl_surface;
use wayland_client::{Connection, Dispatch, QueueHandle};
use wayland_protocols::xdg::decoration::zv1::client::{
    zxdg_decoration_manager_v1, zxdg_toplevel_decoration_v1,
};
use wayland_protocols::xdg::shell::client::{xdg_surface, xdg_toplevel, xdg_wm_base};

use crate::platform::PlatformState;
use crate::registry::{
    BindContext, GlobalBinder, ProtocolErrorSink, ProviderId, RoleBinding, UnbindContext,
};
use crate::window::WindowId;

use wayland_backend::protocol::ProtocolError;

/// Highest `xdg_wm_base` version this crate binds.
pub const WM_BASE_VERSION: u32 = 6;

/// Highest `zxdg_decoration_manager_v1` version this crate binds.
pub const DECORATION_VERSION: u32 = 1;

/// Creates shell surfaces, while an `xdg_wm_base` global is bound.
pub trait ShellSource: Send + Sync {
    /// The bound wm base handle.
    fn wm_base(&self) -> Option<xdg_wm_base::XdgWmBase>;

    /// Assigns the toplevel role to `surface`, returning the xdg surface
    /// and toplevel pair.
    fn shell_surface(
        &self,
        surface: &wl_surface::WlSurface,
        id: WindowId,
    ) -> Option<(xdg_surface::XdgSurface, xdg_toplevel::XdgToplevel)>;
}

/// Creates toplevel decorations, while a decoration manager is bound.
pub trait DecorationSource: Send + Sync {
    /// The bound decoration manager handle.
    fn decoration_manager(&self) -> Option<zxdg_decoration_manager_v1::ZxdgDecorationManagerV1>;

    /// Creates a decoration object for `toplevel`.
    fn decorate(
        &self,
        toplevel: &xdg_toplevel::XdgToplevel,
        id: WindowId,
    ) -> Option<zxdg_toplevel_decoration_v1::ZxdgToplevelDecorationV1>;
}

struct Inner {
    qh: QueueHandle<PlatformState>,
    wm_base: RoleBinding<xdg_wm_base::XdgWmBase>,
    wm_provider: ProviderId,
    decoration: RoleBinding<zxdg_decoration_manager_v1::ZxdgDecorationManagerV1>,
    decoration_provider: ProviderId,
}

impl std::fmt::Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inner")
            .field("wm_base", &self.wm_base)
            .field("decoration", &self.decoration)
            .finish_non_exhaustive()
    }
}

/// Binder for the two shell roles.
#[derive(Debug, Clone)]
pub struct ShellState {
    inner: Arc<Mutex<Inner>>,
}

impl ShellState {
    /// Creates the unbound shell state.
    pub fn new(qh: QueueHandle<PlatformState>) -> Self {
        ShellState {
            inner: Arc::new(Mutex::new(Inner {
                qh,
                wm_base: RoleBinding::new(),
                wm_provider: ProviderId::next(),
                decoration: RoleBinding::new(),
                decoration_provider: ProviderId::next(),
            })),
        }
    }

    /// Whether the wm base role is currently bound.
    pub fn has_wm_base(&self) -> bool {
        self.inner.lock().unwrap().wm_base.is_bound()
    }

    /// Whether the decoration role is currently bound.
    pub fn has_decoration_manager(&self) -> bool {
        self.inner.lock().unwrap().decoration.is_bound()
    }

    fn bind_wm_base(&self, id: u32, version: u32, ctx: &BindContext<'_>) -> bool {
        let provider_id = {
            let mut inner = self.inner.lock().unwrap();
            if inner.wm_base.is_bound() {
                warn!(id, "refusing duplicate xdg_wm_base global");
                return false;
            }
            let version = version.min(WM_BASE_VERSION);
            let wm_base = ctx
                .registry
                .bind::<xdg_wm_base::XdgWmBase, _, _>(id, version, ctx.qh, ());
            inner.wm_base.install(id, wm_base);
            info!(id, version, "bound xdg_wm_base");
            inner.wm_provider
        };

        if !ctx
            .providers
            .shell_slot()
            .register(provider_id, Arc::new(self.clone()))
        {
            warn!("a shell surface provider is already registered");
        }
        ctx.errors.insert(id, Arc::new(WmBaseErrors));
        true
    }

    fn bind_decoration(&self, id: u32, version: u32, ctx: &BindContext<'_>) -> bool {
        let provider_id = {
            let mut inner = self.inner.lock().unwrap();
            if inner.decoration.is_bound() {
                warn!(id, "refusing duplicate zxdg_decoration_manager_v1 global");
                return false;
            }
            let version = version.min(DECORATION_VERSION);
            let manager = ctx
                .registry
                .bind::<zxdg_decoration_manager_v1::ZxdgDecorationManagerV1, _, _>(id, version, ctx.qh, ());
            inner.decoration.install(id, manager);
            info!(id, version, "bound zxdg_decoration_manager_v1");
            inner.decoration_provider
        };

        if !ctx
            .providers
            .decorations_slot()
            .register(provider_id, Arc::new(self.clone()))
        {
            warn!("a decoration provider is already registered");
        }
        ctx.errors.insert(id, Arc::new(DecorationErrors));
        true
    }
}

impl GlobalBinder for ShellState {
    fn try_bind(&self, id: u32, interface: &str, version: u32, ctx: &BindContext<'_>) -> bool {
        match interface {
            "xdg_wm_base" => self.bind_wm_base(id, version, ctx),
            "zxdg_decoration_manager_v1" => self.bind_decoration(id, version, ctx),
            _ => false,
        }
    }

    fn try_unbind(&self, id: u32, ctx: &UnbindContext<'_>) -> bool {
        enum Released {
            WmBase(xdg_wm_base::XdgWmBase, ProviderId),
            Decoration(zxdg_decoration_manager_v1::ZxdgDecorationManagerV1, ProviderId),
        }

        let released = {
            let mut inner = self.inner.lock().unwrap();
            if let Some(wm_base) = inner.wm_base.release_if(id) {
                Released::WmBase(wm_base, inner.wm_provider)
            } else if let Some(manager) = inner.decoration.release_if(id) {
                Released::Decoration(manager, inner.decoration_provider)
            } else {
                return false;
            }
        };

        match released {
            Released::WmBase(wm_base, provider_id) => {
                ctx.errors.remove(id);
                wm_base.destroy();
                ctx.providers.shell_slot().unregister(provider_id);
                info!(id, "xdg_wm_base global revoked");
            }
            Released::Decoration(manager, provider_id) => {
                ctx.errors.remove(id);
                manager.destroy();
                ctx.providers.decorations_slot().unregister(provider_id);
                info!(id, "zxdg_decoration_manager_v1 global revoked");
            }
        }
        true
    }
}

impl ShellSource for ShellState {
    fn wm_base(&self) -> Option<xdg_wm_base::XdgWmBase> {
        self.inner.lock().unwrap().wm_base.handle().cloned()
    }

    fn shell_surface(
        &self,
        surface: &wl_surface::WlSurface,
        id: WindowId,
    ) -> Option<(xdg_surface::XdgSurface, xdg_toplevel::XdgToplevel)> {
        let inner = self.inner.lock().unwrap();
        let wm_base = inner.wm_base.handle()?;
        let xdg_surface = wm_base.get_xdg_surface(surface, &inner.qh, id);
        let toplevel = xdg_surface.get_toplevel(&inner.qh, id);
        Some((xdg_surface, toplevel))
    }
}

impl DecorationSource for ShellState {
    fn decoration_manager(&self) -> Option<zxdg_decoration_manager_v1::ZxdgDecorationManagerV1> {
        self.inner.lock().unwrap().decoration.handle().cloned()
    }

    fn decorate(
        &self,
        toplevel: &xdg_toplevel::XdgToplevel,
        id: WindowId,
    ) -> Option<zxdg_toplevel_decoration_v1::ZxdgToplevelDecorationV1> {
        let inner = self.inner.lock().unwrap();
        let manager = inner.decoration.handle()?;
        Some(manager.get_toplevel_decoration(toplevel, &inner.qh, id))
    }
}

/// Error table for objects of the wm base role.
#[derive(Debug)]
pub(crate) struct WmBaseErrors;

pub(crate) fn wm_base_error_message(code: u32) -> &'static str {
    match code {
        0 => "surface already has another role",
        1 => "wm base destroyed while shell surfaces were still alive",
        2 => "operation attempted on a popup that is not the topmost one",
        3 => "invalid parent surface for a popup",
        4 => "surface was in an invalid state for the request",
        5 => "positioner is incomplete",
        6 => "did not respond to a ping in time",
        _ => "unknown shell error",
    }
}

impl ProtocolErrorSink for WmBaseErrors {
    fn on_error(&self, error: &ProtocolError) -> bool {
        match error.object_interface.as_str() {
            "xdg_wm_base" | "xdg_surface" | "xdg_toplevel" | "xdg_popup" | "xdg_positioner" => {
                error!(
                    object = error.object_id,
                    interface = %error.object_interface,
                    code = error.code,
                    "shell protocol error: {}",
                    wm_base_error_message(error.code)
                );
                true
            }
            _ => false,
        }
    }
}

/// Error table for objects of the decoration role.
#[derive(Debug)]
pub(crate) struct DecorationErrors;

pub(crate) fn decoration_error_message(code: u32) -> &'static str {
    match code {
        0 => "toplevel has a buffer attached before its first configure",
        1 => "toplevel already has a decoration object",
        2 => "toplevel was destroyed before its decoration object",
        _ => "unknown decoration error",
    }
}

impl ProtocolErrorSink for DecorationErrors {
    fn on_error(&self, error: &ProtocolError) -> bool {
        match error.object_interface.as_str() {
            "zxdg_decoration_manager_v1" | "zxdg_toplevel_decoration_v1" => {
                error!(
                    object = error.object_id,
                    code = error.code,
                    "decoration protocol error: {}",
                    decoration_error_message(error.code)
                );
                true
            }
            _ => false,
        }
    }
}

impl Dispatch<xdg_wm_base::XdgWmBase, ()> for PlatformState {
    fn event(
        _state: &mut Self,
        wm_base: &xdg_wm_base::XdgWmBase,
        event: xdg_wm_base::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let xdg_wm_base::Event::Ping { serial } = event {
            wm_base.pong(serial);
        }
    }
}

impl Dispatch<zxdg_decoration_manager_v1::ZxdgDecorationManagerV1, ()> for PlatformState {
    fn event(
        _state: &mut Self,
        _manager: &zxdg_decoration_manager_v1::ZxdgDecorationManagerV1,
        _event: zxdg_decoration_manager_v1::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        // zxdg_decoration_manager_v1 has no events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn protocol_error(interface: &str, code: u32) -> ProtocolError {
        ProtocolError {
            code,
            object_id: 42,
            object_interface: interface.to_string(),
            message: String::new(),
        }
    }

    #[test]
    fn wm_base_sink_claims_only_shell_objects() {
        let sink = WmBaseErrors;
        assert!(sink.on_error(&protocol_error("xdg_toplevel", 0)));
        assert!(sink.on_error(&protocol_error("xdg_wm_base", 6)));
        assert!(!sink.on_error(&protocol_error("zxdg_toplevel_decoration_v1", 1)));
        assert!(!sink.on_error(&protocol_error("wl_surface", 0)));
    }

    #[test]
    fn decoration_sink_claims_only_decoration_objects() {
        let sink = DecorationErrors;
        assert!(sink.on_error(&protocol_error("zxdg_toplevel_decoration_v1", 2)));
        assert!(!sink.on_error(&protocol_error("xdg_surface", 1)));
    }

    #[test]
    fn error_tables_cover_every_documented_code() {
        for code in 0..=6 {
            assert_ne!(wm_base_error_message(code), "unknown shell error");
        }
        assert_eq!(wm_base_error_message(7), "unknown shell error");

        for code in 0..=2 {
            assert_ne!(decoration_error_message(code), "unknown decoration error");
        }
        assert_eq!(decoration_error_message(3), "unknown decoration error");
    }
}

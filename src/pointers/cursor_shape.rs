//! `wp_cursor_shape_manager_v1` binding and cursor icon mapping.

use std::sync::{Arc, Mutex};

use cursor_icon::CursorIcon;
use tracing::{info, warn};
use wayland_client::protocol::wl_pointer;
use wayland_client::{Connection, Dispatch, QueueHandle};
use wayland_protocols::wp::cursor_shape::v1::client::{
    wp_cursor_shape_device_v1, wp_cursor_shape_manager_v1,
};

use crate::platform::PlatformState;
use crate::registry::{BindContext, GlobalBinder, ProviderId, RoleBinding, UnbindContext};

/// Highest `wp_cursor_shape_manager_v1` version this crate binds.
pub const CURSOR_SHAPE_VERSION: u32 = 1;

/// Creates cursor shape devices, while the global is bound.
pub trait CursorShapes: Send + Sync {
    /// Creates a shape device driving the cursor of `pointer`.
    fn shape_device(
        &self,
        pointer: &wl_pointer::WlPointer,
    ) -> Option<wp_cursor_shape_device_v1::WpCursorShapeDeviceV1>;
}

#[derive(Debug)]
struct Inner {
    qh: QueueHandle<PlatformState>,
    binding: RoleBinding<wp_cursor_shape_manager_v1::WpCursorShapeManagerV1>,
    provider_id: ProviderId,
}

/// Binder for the cursor shape manager global.
#[derive(Debug, Clone)]
pub struct CursorShapeState {
    inner: Arc<Mutex<Inner>>,
}

impl CursorShapeState {
    /// Creates the unbound cursor shape state.
    pub fn new(qh: QueueHandle<PlatformState>) -> Self {
        CursorShapeState {
            inner: Arc::new(Mutex::new(Inner {
                qh,
                binding: RoleBinding::new(),
                provider_id: ProviderId::next(),
            })),
        }
    }
}

impl GlobalBinder for CursorShapeState {
    fn try_bind(&self, id: u32, interface: &str, version: u32, ctx: &BindContext<'_>) -> bool {
        if interface != "wp_cursor_shape_manager_v1" {
            return false;
        }

        let provider_id = {
            let mut inner = self.inner.lock().unwrap();
            if inner.binding.is_bound() {
                warn!(id, "refusing duplicate wp_cursor_shape_manager_v1 global");
                return false;
            }
            let version = version.min(CURSOR_SHAPE_VERSION);
            let manager = ctx
                .registry
                .bind::<wp_cursor_shape_manager_v1::WpCursorShapeManagerV1, _, _>(id, version, ctx.qh, ());
            inner.binding.install(id, manager);
            info!(id, version, "bound wp_cursor_shape_manager_v1");
            inner.provider_id
        };

        if !ctx
            .providers
            .cursor_shapes_slot()
            .register(provider_id, Arc::new(self.clone()))
        {
            warn!("a cursor shape provider is already registered");
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
        ctx.providers.cursor_shapes_slot().unregister(provider_id);
        info!(id, "wp_cursor_shape_manager_v1 global revoked");
        true
    }
}

impl CursorShapes for CursorShapeState {
    fn shape_device(
        &self,
        pointer: &wl_pointer::WlPointer,
    ) -> Option<wp_cursor_shape_device_v1::WpCursorShapeDeviceV1> {
        let inner = self.inner.lock().unwrap();
        let manager = inner.binding.handle()?;
        Some(manager.get_pointer(pointer, &inner.qh, ()))
    }
}

/// Maps the crate's public cursor vocabulary onto protocol shapes.
pub fn shape_for_icon(icon: CursorIcon) -> wp_cursor_shape_device_v1::Shape {
    use wp_cursor_shape_device_v1::Shape;
    match icon {
        CursorIcon::Default => Shape::Default,
        CursorIcon::ContextMenu => Shape::ContextMenu,
        CursorIcon::Help => Shape::Help,
        CursorIcon::Pointer => Shape::Pointer,
        CursorIcon::Progress => Shape::Progress,
        CursorIcon::Wait => Shape::Wait,
        CursorIcon::Cell => Shape::Cell,
        CursorIcon::Crosshair => Shape::Crosshair,
        CursorIcon::Text => Shape::Text,
        CursorIcon::VerticalText => Shape::VerticalText,
        CursorIcon::Alias => Shape::Alias,
        CursorIcon::Copy => Shape::Copy,
        CursorIcon::Move => Shape::Move,
        CursorIcon::NoDrop => Shape::NoDrop,
        CursorIcon::NotAllowed => Shape::NotAllowed,
        CursorIcon::Grab => Shape::Grab,
        CursorIcon::Grabbing => Shape::Grabbing,
        CursorIcon::EResize => Shape::EResize,
        CursorIcon::NResize => Shape::NResize,
        CursorIcon::NeResize => Shape::NeResize,
        CursorIcon::NwResize => Shape::NwResize,
        CursorIcon::SResize => Shape::SResize,
        CursorIcon::SeResize => Shape::SeResize,
        CursorIcon::SwResize => Shape::SwResize,
        CursorIcon::WResize => Shape::WResize,
        CursorIcon::EwResize => Shape::EwResize,
        CursorIcon::NsResize => Shape::NsResize,
        CursorIcon::NeswResize => Shape::NeswResize,
        CursorIcon::NwseResize => Shape::NwseResize,
        CursorIcon::ColResize => Shape::ColResize,
        CursorIcon::RowResize => Shape::RowResize,
        CursorIcon::AllScroll => Shape::AllScroll,
        CursorIcon::ZoomIn => Shape::ZoomIn,
        CursorIcon::ZoomOut => Shape::ZoomOut,
        _ => Shape::Default,
    }
}

impl Dispatch<wp_cursor_shape_manager_v1::WpCursorShapeManagerV1, ()> for PlatformState {
    fn event(
        _state: &mut Self,
        _manager: &wp_cursor_shape_manager_v1::WpCursorShapeManagerV1,
        _event: wp_cursor_shape_manager_v1::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        // wp_cursor_shape_manager_v1 has no events
    }
}

impl Dispatch<wp_cursor_shape_device_v1::WpCursorShapeDeviceV1, ()> for PlatformState {
    fn event(
        _state: &mut Self,
        _device: &wp_cursor_shape_device_v1::WpCursorShapeDeviceV1,
        _event: wp_cursor_shape_device_v1::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        // wp_cursor_shape_device_v1 has no events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wp_cursor_shape_device_v1::Shape;

    #[test]
    fn common_icons_map_to_their_protocol_twin() {
        assert_eq!(shape_for_icon(CursorIcon::Default), Shape::Default);
        assert_eq!(shape_for_icon(CursorIcon::Text), Shape::Text);
        assert_eq!(shape_for_icon(CursorIcon::Grabbing), Shape::Grabbing);
        assert_eq!(shape_for_icon(CursorIcon::NwseResize), Shape::NwseResize);
    }
}

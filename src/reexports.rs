//! Reexports of crates, that are part of the public api, for convenience

#[cfg(feature = "calloop")]
pub use calloop;
pub use cursor_icon;
pub use wayland_backend;
pub use wayland_client;
pub use wayland_protocols;
pub use xkbcommon;

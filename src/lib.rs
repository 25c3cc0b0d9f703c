#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

//! # Smelter: Wayland platform integration for applications
//!
//! This crate connects an application to a Wayland compositor and maps the
//! session onto a small set of owned abstractions: [`Window`](window::Window)
//! for an xdg toplevel with negotiated configures, [`Mouse`](input::Mouse)
//! and [`Keyboard`](input::Keyboard) for the input devices of a seat, and
//! output queries for monitor properties. Globals advertised by the
//! compositor are bound through a pluggable registry layer and surfaced as
//! capability providers that consumers look up at use time.
//!
//! ## Structure of the crate
//!
//! - [`platform`] owns the connection and the event pump; start there.
//! - [`registry`] binds and revokes globals and routes protocol errors.
//! - [`compositor`], [`seat`], [`output`], [`shell`] and [`pointers`] are
//!   the binders for the individual globals, each publishing a capability
//!   provider.
//! - [`window`] and [`input`] are the consumer-facing abstractions built on
//!   top of those providers.
//!
//! ## The event pump and state handling
//!
//! All protocol dispatch runs on the thread that pumps the
//! [`Smelter`]: call [`Smelter::pump_once`] or
//! [`Smelter::pump_until_empty`] from your main loop, or insert a
//! [`SmelterSource`](platform::SmelterSource) into a [`calloop`] event loop
//! on the `calloop` feature. Neither call blocks; observer notifications
//! are delivered synchronously from inside the pump, with the crate's
//! internal locks released so observers may call back in.
//!
//! ## Logging
//!
//! Smelter uses [`tracing`] for its internal logging. To limit the log
//! level at compile time in release builds, enable the corresponding
//! [`tracing`] features from your binary crate:
//!
//! ```toml
//! [dependencies]
//! tracing = { version = "0.1", features = ["max_level_trace", "release_max_level_debug"] }
//! ```

pub mod compositor;
pub mod config;
pub mod input;
pub mod output;
pub mod platform;
pub mod pointers;
pub mod registry;
pub mod seat;
pub mod shell;
pub mod utils;
pub mod window;

pub mod reexports;

pub use crate::config::{Blocklist, Config, RelativeMotion};
pub use crate::platform::{ConnectError, PlatformState, Smelter};

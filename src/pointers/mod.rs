//! Pointer extension protocols: cursor shapes, pointer locking and
//! relative motion.
//!
//! Three small single-role binders sharing the same shape. Each exposes a
//! factory for per-pointer protocol objects through the provider registry;
//! consumers tolerate the absence of any of them.

pub mod constraints;
pub mod cursor_shape;
pub mod relative;

pub use constraints::PointerConstraintsState;
pub use cursor_shape::CursorShapeState;
pub use relative::RelativePointerState;

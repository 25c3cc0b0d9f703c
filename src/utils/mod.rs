//! Various utilities used across the crate.

pub(crate) mod ids;
mod listeners;

pub use self::listeners::ListenerId;
pub(crate) use self::listeners::Listeners;

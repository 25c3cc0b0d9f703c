//! Input device consumers and event delivery.
//!
//! A [`Mouse`] or [`Keyboard`] consumes the devices of one seat index. Each
//! consumer follows its seat through capability changes (acquiring and
//! releasing the underlying protocol objects as the capability comes and
//! goes) and delivers interpreted events to the [`InputObserver`] it was
//! created with.
//!
//! Delivery is synchronous from the event pump, with all internal locks
//! released, so observers may call back into the crate.

use std::collections::HashMap;
use std::sync::{Mutex, Weak};

use xkbcommon::xkb;

use crate::window::WindowId;

pub mod keyboard;
pub mod mouse;

pub use self::keyboard::Keyboard;
pub use self::mouse::Mouse;

pub(crate) use self::keyboard::create_keyboard;
pub(crate) use self::mouse::create_mouse;

/// A mouse button this crate reports.
///
/// Buttons outside this set are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MouseButton {
    /// Left button.
    Left,
    /// Right button.
    Right,
    /// Middle (wheel) button.
    Middle,
    /// First side button.
    Side,
    /// Second side button.
    Extra,
}

/// One key press or release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEvent {
    /// Hardware key code, as reported by the compositor.
    pub code: u32,
    /// Keysym resolved through the active keymap and modifier state.
    pub keysym: xkb::Keysym,
    /// Text the key produces, for presses that generate any.
    pub text: Option<String>,
    /// Whether the key was pressed or released.
    pub pressed: bool,
}

/// Summary of the active keyboard modifiers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modifiers {
    /// The "control" key.
    pub ctrl: bool,
    /// The "alt" key.
    pub alt: bool,
    /// The "shift" key.
    pub shift: bool,
    /// The "caps lock" key.
    pub caps_lock: bool,
    /// The "logo" key, also known as the "windows" key.
    pub logo: bool,
    /// The "num lock" key.
    pub num_lock: bool,
}

impl Modifiers {
    /// Recomputes the flags from an xkb state.
    pub(crate) fn update_with(&mut self, state: &xkb::State) {
        self.ctrl = state.mod_name_is_active(&xkb::MOD_NAME_CTRL, xkb::STATE_MODS_EFFECTIVE);
        self.alt = state.mod_name_is_active(&xkb::MOD_NAME_ALT, xkb::STATE_MODS_EFFECTIVE);
        self.shift = state.mod_name_is_active(&xkb::MOD_NAME_SHIFT, xkb::STATE_MODS_EFFECTIVE);
        self.caps_lock = state.mod_name_is_active(&xkb::MOD_NAME_CAPS, xkb::STATE_MODS_EFFECTIVE);
        self.logo = state.mod_name_is_active(&xkb::MOD_NAME_LOGO, xkb::STATE_MODS_EFFECTIVE);
        self.num_lock = state.mod_name_is_active(&xkb::MOD_NAME_NUM, xkb::STATE_MODS_EFFECTIVE);
    }
}

/// Receives the interpreted input events of one seat.
///
/// All methods default to doing nothing. One observer is attached per
/// consumer at creation time; the `seat` argument carries the seat index
/// the event originated from, so one observer can serve several seats.
pub trait InputObserver: Send + Sync {
    /// Absolute pointer position over the focused window, in pixels.
    fn pointer_position(&self, _seat: u32, _x: f32, _y: f32) {}

    /// Relative pointer motion, independent of the cursor position.
    fn pointer_motion(&self, _seat: u32, _dx: f32, _dy: f32) {}

    /// A mouse button was pressed or released.
    fn pointer_button(&self, _seat: u32, _button: MouseButton, _pressed: bool) {}

    /// Vertical scroll, positive away from the user.
    fn pointer_scroll(&self, _seat: u32, _delta: f32) {}

    /// The pointer entered (`Some`) or left (`None`) a window.
    fn pointer_focus(&self, _seat: u32, _window: Option<WindowId>) {}

    /// A key was pressed or released.
    fn key(&self, _seat: u32, _event: &KeyEvent) {}

    /// The keyboard modifier state changed.
    fn modifiers(&self, _seat: u32, _modifiers: &Modifiers) {}

    /// The compositor communicated its key repeat parameters.
    ///
    /// `rate` is repeats per second, `delay` the milliseconds before the
    /// first repeat; repeat synthesis itself is the embedder's concern.
    fn repeat_info(&self, _seat: u32, _rate: i32, _delay: i32) {}

    /// The keyboard focus moved to a window (`Some`) or away (`None`).
    fn keyboard_focus(&self, _seat: u32, _window: Option<WindowId>) {}
}

/// Weak index of the input consumers, keyed by seat index.
///
/// Device protocol events are routed through this map; entries do not keep
/// consumers alive and stale ones are pruned as they are encountered.
#[derive(Default)]
pub(crate) struct DeviceMap {
    mice: HashMap<u32, Weak<Mutex<mouse::MouseInner>>>,
    keyboards: HashMap<u32, Weak<Mutex<keyboard::KeyboardInner>>>,
}

impl std::fmt::Debug for DeviceMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceMap")
            .field("mice", &self.mice.len())
            .field("keyboards", &self.keyboards.len())
            .finish()
    }
}

impl DeviceMap {
    pub fn insert_mouse(&mut self, seat: u32, mouse: &Mouse) {
        self.mice.insert(seat, mouse.downgrade());
    }

    pub fn insert_keyboard(&mut self, seat: u32, keyboard: &Keyboard) {
        self.keyboards.insert(seat, keyboard.downgrade());
    }

    pub fn mouse(&mut self, seat: u32) -> Option<Mouse> {
        match self.mice.get(&seat).map(Weak::upgrade) {
            Some(Some(inner)) => Some(Mouse::from_inner(inner)),
            Some(None) => {
                self.mice.remove(&seat);
                None
            }
            None => None,
        }
    }

    pub fn keyboard(&mut self, seat: u32) -> Option<Keyboard> {
        match self.keyboards.get(&seat).map(Weak::upgrade) {
            Some(Some(inner)) => Some(Keyboard::from_inner(inner)),
            Some(None) => {
                self.keyboards.remove(&seat);
                None
            }
            None => None,
        }
    }
}

//! Keyboard consumer: keymap handling and key event translation.
//!
//! The compositor supplies the keymap as a memory-mappable fd; it is
//! compiled with xkbcommon and every key event is translated through the
//! resulting state into a keysym plus the text it produces.

use std::os::fd::OwnedFd;
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, info, warn};
use wayland_client::protocol::wl_keyboard;
use wayland_client::{Connection, Dispatch, Proxy, QueueHandle, WEnum};
use xkbcommon::xkb;

use crate::input::{InputObserver, KeyEvent, Modifiers};
use crate::platform::PlatformState;
use crate::registry::Providers;
use crate::seat::{DeviceData, SeatCapabilities, SeatListener, SeatState};
use crate::utils::ListenerId;
use crate::window::{WeakWindow, Window, WindowId};

/// Offset between evdev key codes (as sent on the wire) and xkb key codes.
const KEYCODE_OFFSET: u32 = 8;

struct Xkb {
    context: xkb::Context,
    keymap: Option<xkb::Keymap>,
    state: Option<xkb::State>,
}

impl std::fmt::Debug for Xkb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Xkb")
            .field("context", &self.context.get_raw_ptr())
            .field("keymap", &self.keymap.as_ref().map(|keymap| keymap.get_raw_ptr()))
            .field("state", &self.state.as_ref().map(|state| state.get_raw_ptr()))
            .finish()
    }
}

// This is OK because all parts of `xkb` will remain on the
// same thread
unsafe impl Send for Xkb {}

pub(crate) struct KeyboardInner {
    seat: u32,
    providers: Arc<Providers>,
    seats: SeatState,
    observer: Arc<dyn InputObserver>,
    keyboard: Option<wl_keyboard::WlKeyboard>,
    xkb: Xkb,
    mods: Modifiers,
    repeat: Option<(i32, i32)>,
    focus: Option<(WindowId, WeakWindow)>,
    listener: Option<ListenerId>,
}

impl std::fmt::Debug for KeyboardInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyboardInner")
            .field("seat", &self.seat)
            .field("keyboard", &self.keyboard)
            .field("xkb", &self.xkb)
            .field("mods", &self.mods)
            .field("repeat", &self.repeat)
            .field("focus", &self.focus.as_ref().map(|(id, _)| *id))
            .finish_non_exhaustive()
    }
}

impl KeyboardInner {
    fn release_device(&mut self) {
        if let Some(keyboard) = self.keyboard.take() {
            if keyboard.version() >= 3 {
                keyboard.release();
            }
            debug!(seat = self.seat, "released keyboard device");
        }
        self.focus = None;
    }
}

impl Drop for KeyboardInner {
    fn drop(&mut self) {
        self.release_device();
        if let Some(listener) = self.listener.take() {
            self.seats.remove_listener(&listener);
        }
    }
}

/// Keyboard consumer for one seat index.
///
/// Clones share the same consumer; the device is released when the last
/// handle is dropped.
#[derive(Debug, Clone)]
pub struct Keyboard {
    inner: Arc<Mutex<KeyboardInner>>,
}

struct KeyboardSeatHook {
    inner: Weak<Mutex<KeyboardInner>>,
}

impl SeatListener for KeyboardSeatHook {
    fn capabilities_changed(&self, _seat: u32, caps: SeatCapabilities) {
        if let Some(inner) = self.inner.upgrade() {
            Keyboard { inner }.sync_devices(caps);
        }
    }

    fn seat_released(&self, _seat: u32) {
        if let Some(inner) = self.inner.upgrade() {
            Keyboard { inner }.sync_devices(SeatCapabilities::default());
        }
    }
}

/// Builds a keyboard consumer for `seat` and starts following its
/// capabilities.
pub(crate) fn create_keyboard(
    state: &mut PlatformState,
    seat: u32,
    observer: Arc<dyn InputObserver>,
) -> Keyboard {
    let keyboard = Keyboard {
        inner: Arc::new(Mutex::new(KeyboardInner {
            seat,
            providers: state.providers.clone(),
            seats: state.seats.clone(),
            observer,
            keyboard: None,
            xkb: Xkb {
                context: xkb::Context::new(xkb::CONTEXT_NO_FLAGS),
                keymap: None,
                state: None,
            },
            mods: Modifiers::default(),
            repeat: None,
            focus: None,
            listener: None,
        })),
    };

    let hook = Arc::new(KeyboardSeatHook {
        inner: Arc::downgrade(&keyboard.inner),
    });
    let listener = state.seats.add_listener(seat, hook);
    keyboard.inner.lock().unwrap().listener = Some(listener);

    state.devices.insert_keyboard(seat, &keyboard);

    if let Some(caps) = state.seats.capabilities(seat) {
        keyboard.sync_devices(caps);
    }
    keyboard
}

/// Copies the keymap text out of the compositor supplied fd.
fn read_keymap_text(fd: &OwnedFd, size: usize) -> Option<String> {
    // SAFETY: the fd is a read-only map of exactly `size` bytes handed to
    // us by the compositor; the mapping only lives for the copy below.
    unsafe {
        let ptr = match rustix::mm::mmap(
            std::ptr::null_mut(),
            size,
            rustix::mm::ProtFlags::READ,
            rustix::mm::MapFlags::PRIVATE,
            fd,
            0,
        ) {
            Ok(ptr) => ptr,
            Err(err) => {
                warn!("unable to map the keymap fd: {err}");
                return None;
            }
        };

        let bytes = std::slice::from_raw_parts(ptr as *const u8, size);
        let text = match std::str::from_utf8(bytes) {
            // The map ends with a terminating NUL the compiler must not
            // see.
            Ok(text) => Some(text.trim_end_matches('\0').to_owned()),
            Err(_) => {
                warn!("discarding keymap that is not valid utf8");
                None
            }
        };

        let _ = rustix::mm::munmap(ptr, size);
        text
    }
}

/// Decodes the pressed-keys array of a keyboard enter event.
fn pressed_codes(raw: &[u8]) -> impl Iterator<Item = u32> + '_ {
    raw.chunks_exact(4)
        .map(|chunk| u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
}

impl Keyboard {
    pub(crate) fn from_inner(inner: Arc<Mutex<KeyboardInner>>) -> Self {
        Keyboard { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<Mutex<KeyboardInner>> {
        Arc::downgrade(&self.inner)
    }

    /// The seat index this consumer follows.
    pub fn seat(&self) -> u32 {
        self.inner.lock().unwrap().seat
    }

    /// Whether a keyboard device is currently held.
    pub fn has_device(&self) -> bool {
        self.inner.lock().unwrap().keyboard.is_some()
    }

    /// The current modifier summary.
    pub fn modifiers(&self) -> Modifiers {
        self.inner.lock().unwrap().mods
    }

    /// The repeat parameters the compositor communicated, if any.
    pub fn repeat_info(&self) -> Option<(i32, i32)> {
        self.inner.lock().unwrap().repeat
    }

    pub(crate) fn sync_devices(&self, caps: SeatCapabilities) {
        if caps.keyboard {
            self.acquire_device();
        } else {
            self.inner.lock().unwrap().release_device();
        }
    }

    fn acquire_device(&self) {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        if inner.keyboard.is_some() {
            return;
        }

        let Some(devices) = inner.providers.seat_devices() else {
            return;
        };
        let Some(keyboard) = devices.keyboard_device(inner.seat) else {
            return;
        };
        debug!(seat = inner.seat, "acquired keyboard device");
        inner.keyboard = Some(keyboard);
    }

    pub(crate) fn handle_keymap(
        &self,
        format: WEnum<wl_keyboard::KeymapFormat>,
        fd: OwnedFd,
        size: u32,
    ) {
        if !matches!(format, WEnum::Value(wl_keyboard::KeymapFormat::XkbV1)) {
            warn!(?format, "ignoring keymap in unsupported format");
            return;
        }
        let Some(text) = read_keymap_text(&fd, size as usize) else {
            return;
        };

        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        let Some(keymap) = xkb::Keymap::new_from_string(
            &inner.xkb.context,
            text,
            xkb::KEYMAP_FORMAT_TEXT_V1,
            xkb::KEYMAP_COMPILE_NO_FLAGS,
        ) else {
            warn!(seat = inner.seat, "discarding keymap that failed to compile");
            return;
        };

        info!(seat = inner.seat, "installed keymap");
        // The compositor follows a keymap with a modifiers event, which
        // seeds the fresh state.
        inner.xkb.state = Some(xkb::State::new(&keymap));
        inner.xkb.keymap = Some(keymap);
    }

    pub(crate) fn handle_enter(&self, window: Option<Window>, keys: &[u8]) {
        let (seat, observer, focus) = {
            let mut guard = self.inner.lock().unwrap();
            let inner = &mut *guard;
            inner.focus = window.as_ref().map(|window| (window.id(), window.downgrade()));
            (
                inner.seat,
                inner.observer.clone(),
                inner.focus.as_ref().map(|(id, _)| *id),
            )
        };
        observer.keyboard_focus(seat, focus);

        // Keys held while focus arrives behave as if pressed now.
        for code in pressed_codes(keys) {
            self.deliver_key(code, true);
        }
    }

    pub(crate) fn handle_leave(&self) {
        let (seat, observer) = {
            let mut guard = self.inner.lock().unwrap();
            let inner = &mut *guard;
            inner.focus = None;
            (inner.seat, inner.observer.clone())
        };
        observer.keyboard_focus(seat, None);
    }

    pub(crate) fn handle_key(&self, code: u32, state: WEnum<wl_keyboard::KeyState>) {
        let pressed = matches!(state, WEnum::Value(wl_keyboard::KeyState::Pressed));
        self.deliver_key(code, pressed);
    }

    fn deliver_key(&self, code: u32, pressed: bool) {
        let (seat, observer, event) = {
            let inner = self.inner.lock().unwrap();
            let Some(state) = &inner.xkb.state else {
                // No keymap yet; the raw code alone is meaningless.
                return;
            };
            let keycode = (code + KEYCODE_OFFSET).into();
            let keysym = state.key_get_one_sym(keycode);
            let text = pressed
                .then(|| state.key_get_utf8(keycode))
                .filter(|text| !text.is_empty());
            (
                inner.seat,
                inner.observer.clone(),
                KeyEvent {
                    code,
                    keysym,
                    text,
                    pressed,
                },
            )
        };
        observer.key(seat, &event);
    }

    pub(crate) fn handle_modifiers(&self, depressed: u32, latched: u32, locked: u32, group: u32) {
        let (seat, observer, mods) = {
            let mut guard = self.inner.lock().unwrap();
            let inner = &mut *guard;
            let Some(state) = &mut inner.xkb.state else {
                return;
            };
            state.update_mask(depressed, latched, locked, 0, 0, group);
            inner.mods.update_with(state);
            (inner.seat, inner.observer.clone(), inner.mods)
        };
        observer.modifiers(seat, &mods);
    }

    pub(crate) fn handle_repeat_info(&self, rate: i32, delay: i32) {
        let (seat, observer) = {
            let mut guard = self.inner.lock().unwrap();
            let inner = &mut *guard;
            inner.repeat = Some((rate, delay));
            debug!(seat = inner.seat, rate, delay, "keyboard repeat info");
            (inner.seat, inner.observer.clone())
        };
        observer.repeat_info(seat, rate, delay);
    }
}

impl Dispatch<wl_keyboard::WlKeyboard, DeviceData> for PlatformState {
    fn event(
        state: &mut Self,
        _keyboard: &wl_keyboard::WlKeyboard,
        event: wl_keyboard::Event,
        data: &DeviceData,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        let Some(keyboard) = state.devices.keyboard(data.seat) else {
            return;
        };
        match event {
            wl_keyboard::Event::Keymap { format, fd, size } => {
                keyboard.handle_keymap(format, fd, size);
            }
            wl_keyboard::Event::Enter { surface, keys, .. } => {
                let window = surface
                    .data::<WindowId>()
                    .copied()
                    .and_then(|id| state.windows.get(id));
                keyboard.handle_enter(window, &keys);
            }
            wl_keyboard::Event::Leave { .. } => keyboard.handle_leave(),
            wl_keyboard::Event::Key {
                key,
                state: key_state,
                ..
            } => keyboard.handle_key(key, key_state),
            wl_keyboard::Event::Modifiers {
                mods_depressed,
                mods_latched,
                mods_locked,
                group,
                ..
            } => keyboard.handle_modifiers(mods_depressed, mods_latched, mods_locked, group),
            wl_keyboard::Event::RepeatInfo { rate, delay } => {
                keyboard.handle_repeat_info(rate, delay);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pressed_keys_decode_as_native_endian_words() {
        let mut raw = Vec::new();
        raw.extend(30u32.to_ne_bytes());
        raw.extend(56u32.to_ne_bytes());

        let codes: Vec<u32> = pressed_codes(&raw).collect();
        assert_eq!(codes, vec![30, 56]);
    }

    #[test]
    fn trailing_partial_words_are_dropped() {
        let mut raw = Vec::new();
        raw.extend(17u32.to_ne_bytes());
        raw.push(0xab);

        let codes: Vec<u32> = pressed_codes(&raw).collect();
        assert_eq!(codes, vec![17]);
    }

    #[test]
    fn empty_enter_replays_nothing() {
        assert_eq!(pressed_codes(&[]).count(), 0);
    }
}

//! Toplevel window lifecycle and configure negotiation.
//!
//! A [`Window`] is a cheap clonable handle over shared state. Creating one
//! builds the protocol object chain (surface, xdg surface, toplevel,
//! decoration) as far as the currently bound globals allow: without a shell
//! the window stays a bare surface, without a decoration manager it is
//! simply undecorated.
//!
//! `xdg_toplevel.configure` events of one negotiation burst accumulate in a
//! reducer; the terminal `xdg_surface.configure` acknowledges the serial
//! and applies the single resulting state change. Observers are notified
//! after the window lock is released.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use smallvec::SmallVec;
use tracing::{debug, info};
use wayland_client::protocol::{wl_output, wl_surface};
use wayland_client::{Connection, Dispatch, QueueHandle};
use wayland_protocols::xdg::decoration::zv1::client::zxdg_toplevel_decoration_v1;
use wayland_protocols::xdg::shell::client::{xdg_surface, xdg_toplevel};

use crate::platform::PlatformState;
use crate::registry::Providers;
use crate::utils::{ListenerId, Listeners};

mod configure;

use self::configure::{ConfigureAction, PendingConfigure};

crate::utils::ids::id_gen!(window_ids);

/// Identifier of a window, unique while the window is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowId(usize);

/// Initial properties of a window.
#[derive(Debug, Clone)]
pub struct WindowAttributes {
    /// Title shown by the compositor's decorations.
    pub title: String,
    /// Application id used for desktop integration, if any.
    pub app_id: Option<String>,
    /// Initial logical size in pixels.
    pub size: (u32, u32),
    /// Whether the compositor may resize the window interactively.
    pub resizable: bool,
}

impl Default for WindowAttributes {
    fn default() -> Self {
        WindowAttributes {
            title: String::new(),
            app_id: None,
            size: (800, 600),
            resizable: true,
        }
    }
}

/// Observes the lifecycle of one window.
///
/// All methods default to doing nothing; implement the ones of interest.
/// Notifications are delivered synchronously from the event pump, in
/// observer registration order, with the window lock released.
pub trait WindowObserver: Send + Sync {
    /// The window has been closed, either by the compositor or through
    /// [`Window::close`].
    fn closed(&self, _window: WindowId) {}

    /// The window size changed as the result of a configure.
    fn resized(&self, _window: WindowId, _width: u32, _height: u32) {}

    /// The refresh rate of the output the window is shown on changed.
    fn refresh_rate_changed(&self, _window: WindowId, _hz: u32) {}

    /// The scale factor of the output the window is shown on changed.
    fn scale_factor_changed(&self, _window: WindowId, _scale: f64) {}

    /// The window entered or left fullscreen.
    fn fullscreen_changed(&self, _window: WindowId, _fullscreen: bool) {}
}

/// Failure to create a window.
#[derive(Debug, thiserror::Error)]
pub enum CreateWindowError {
    /// No `wl_compositor` global has been bound, so no surface can be
    /// created.
    #[error("no wl_compositor global has been bound")]
    NoCompositor,
}

#[derive(Debug)]
struct WindowInner {
    id: WindowId,
    surface: Option<wl_surface::WlSurface>,
    xdg_surface: Option<xdg_surface::XdgSurface>,
    toplevel: Option<xdg_toplevel::XdgToplevel>,
    decoration: Option<zxdg_toplevel_decoration_v1::ZxdgToplevelDecorationV1>,
    size: (u32, u32),
    scale: f64,
    refresh_hz: u32,
    fullscreen: bool,
    entered: Option<wl_output::WlOutput>,
    resizable: bool,
    closed: bool,
    pending: PendingConfigure,
    observers: Listeners<(), dyn WindowObserver>,
}

impl WindowInner {
    fn destroy_objects(&mut self) {
        // Destruction order is mandated by the shell protocol: role objects
        // before the surfaces they extend.
        if let Some(decoration) = self.decoration.take() {
            decoration.destroy();
        }
        if let Some(toplevel) = self.toplevel.take() {
            toplevel.destroy();
        }
        if let Some(xdg_surface) = self.xdg_surface.take() {
            xdg_surface.destroy();
        }
        if let Some(surface) = self.surface.take() {
            surface.destroy();
        }
        self.entered = None;
    }

    /// Folds committed output properties into the window, returning the
    /// values that actually changed.
    fn apply_output_metrics(&mut self, refresh_mhz: i32, scale: i32) -> (Option<u32>, Option<f64>) {
        let hz = ((refresh_mhz + 999) / 1000) as u32;
        let scale = scale as f64;

        let hz_changed = (self.refresh_hz != hz).then(|| {
            self.refresh_hz = hz;
            hz
        });
        let scale_changed = (self.scale != scale).then(|| {
            self.scale = scale;
            scale
        });
        (hz_changed, scale_changed)
    }
}

impl Drop for WindowInner {
    fn drop(&mut self) {
        if !self.closed {
            self.closed = true;
            for observer in self.observers.snapshot_all() {
                observer.closed(self.id);
            }
            self.destroy_objects();
        }
        window_ids::release(self.id.0);
    }
}

/// Handle to a toplevel window.
///
/// Clones share the same window; the window closes when the last handle is
/// dropped, or earlier through [`Window::close`].
#[derive(Debug, Clone)]
pub struct Window {
    inner: Arc<Mutex<WindowInner>>,
}

/// Weak counterpart of [`Window`] that does not keep the window alive.
#[derive(Debug, Clone)]
pub struct WeakWindow {
    inner: Weak<Mutex<WindowInner>>,
}

impl WeakWindow {
    /// Attempts to upgrade back to a full handle.
    pub fn upgrade(&self) -> Option<Window> {
        self.inner.upgrade().map(|inner| Window { inner })
    }
}

/// Builds the protocol object chain for a new window.
///
/// Requires a bound compositor; shell and decoration manager are used when
/// present and skipped otherwise.
pub(crate) fn create_window(
    state: &mut PlatformState,
    attributes: WindowAttributes,
) -> Result<Window, CreateWindowError> {
    let compositor = state
        .providers
        .compositor()
        .ok_or(CreateWindowError::NoCompositor)?;

    let id = WindowId(window_ids::next());
    let (width, height) = attributes.size;

    let surface = match compositor.create_surface(id) {
        Some(surface) => surface,
        None => {
            window_ids::release(id.0);
            return Err(CreateWindowError::NoCompositor);
        }
    };

    let mut xdg_surface = None;
    let mut toplevel = None;
    if let Some(shell) = state.providers.shell() {
        if let Some((xdg, top)) = shell.shell_surface(&surface, id) {
            xdg.set_window_geometry(0, 0, width as i32, height as i32);
            top.set_title(attributes.title.clone());
            if let Some(app_id) = &attributes.app_id {
                top.set_app_id(app_id.clone());
            }
            if attributes.resizable {
                top.set_min_size(0, 0);
                top.set_max_size(i32::MAX, i32::MAX);
            } else {
                // Pinning min and max to the requested size tells the
                // compositor the window cannot be resized.
                top.set_min_size(width as i32, height as i32);
                top.set_max_size(width as i32, height as i32);
            }
            xdg_surface = Some(xdg);
            toplevel = Some(top);
        }
    }

    let mut decoration = None;
    if let Some(top) = &toplevel {
        if let Some(decorations) = state.providers.decorations() {
            if let Some(deco) = decorations.decorate(top, id) {
                deco.set_mode(zxdg_toplevel_decoration_v1::Mode::ServerSide);
                decoration = Some(deco);
            }
        }
    }

    surface.commit();

    let window = Window {
        inner: Arc::new(Mutex::new(WindowInner {
            id,
            surface: Some(surface),
            xdg_surface,
            toplevel,
            decoration,
            size: attributes.size,
            scale: 1.0,
            refresh_hz: 0,
            fullscreen: false,
            entered: None,
            resizable: attributes.resizable,
            closed: false,
            pending: PendingConfigure::default(),
            observers: Listeners::new(),
        })),
    };
    state.windows.insert(&window);

    info!(
        window = id.0,
        title = %attributes.title,
        width,
        height,
        "created toplevel window"
    );
    Ok(window)
}

impl Window {
    /// The id of this window.
    pub fn id(&self) -> WindowId {
        self.inner.lock().unwrap().id
    }

    /// Current logical size in pixels.
    pub fn size(&self) -> (u32, u32) {
        self.inner.lock().unwrap().size
    }

    /// Scale factor of the output the window is shown on.
    pub fn scale_factor(&self) -> f64 {
        self.inner.lock().unwrap().scale
    }

    /// Refresh rate of the output the window is shown on, in hertz.
    ///
    /// Zero until the window has entered a fully described output.
    pub fn refresh_rate(&self) -> u32 {
        self.inner.lock().unwrap().refresh_hz
    }

    /// Whether the window is currently fullscreen.
    pub fn fullscreen(&self) -> bool {
        self.inner.lock().unwrap().fullscreen
    }

    /// Whether the window may be resized interactively.
    pub fn resizable(&self) -> bool {
        self.inner.lock().unwrap().resizable
    }

    /// The underlying surface, for embedders that attach buffers to it.
    ///
    /// `None` once the window is closed.
    pub fn surface(&self) -> Option<wl_surface::WlSurface> {
        self.inner.lock().unwrap().surface.clone()
    }

    /// Updates the title shown by the compositor's decorations.
    pub fn set_title(&self, title: &str) {
        let inner = self.inner.lock().unwrap();
        if let Some(toplevel) = &inner.toplevel {
            toplevel.set_title(title.to_owned());
        }
    }

    /// Requests entering or leaving fullscreen.
    ///
    /// The actual state change arrives with the next configure; a window
    /// without a toplevel role ignores the request.
    pub fn set_fullscreen(&self, fullscreen: bool) {
        let inner = self.inner.lock().unwrap();
        let Some(toplevel) = &inner.toplevel else {
            return;
        };
        if fullscreen {
            toplevel.set_fullscreen(inner.entered.as_ref());
        } else {
            toplevel.unset_fullscreen();
        }
    }

    /// Registers an observer for this window.
    pub fn add_observer(&self, observer: Arc<dyn WindowObserver>) -> ListenerId {
        self.inner.lock().unwrap().observers.add((), observer)
    }

    /// Removes a previously registered observer.
    pub fn remove_observer(&self, id: &ListenerId) -> bool {
        self.inner.lock().unwrap().observers.remove(id)
    }

    /// Downgrades to a handle that does not keep the window alive.
    pub fn downgrade(&self) -> WeakWindow {
        WeakWindow {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Closes the window.
    ///
    /// Observers are notified first, then the protocol objects are
    /// destroyed. Closing an already closed window does nothing.
    pub fn close(&self) {
        let (id, observers) = {
            let mut inner = self.inner.lock().unwrap();
            if inner.closed {
                return;
            }
            inner.closed = true;
            (inner.id, inner.observers.snapshot_all())
        };

        info!(window = id.0, "closing window");
        for observer in observers {
            observer.closed(id);
        }

        self.inner.lock().unwrap().destroy_objects();
    }

    pub(crate) fn handle_toplevel_configure(&self, width: i32, height: i32, states: &[u8]) {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return;
        }
        inner.pending.record(width, height, states);
    }

    pub(crate) fn handle_surface_configure(&self, serial: u32) {
        let (id, fullscreen_change, size_change, observers) = {
            let mut inner = self.inner.lock().unwrap();
            if inner.closed {
                return;
            }
            // Acknowledge before anything observable happens; the
            // compositor treats the ack as "this configure is in effect".
            if let Some(xdg_surface) = &inner.xdg_surface {
                xdg_surface.ack_configure(serial);
            }

            let action = inner.pending.resolve();
            debug!(window = inner.id.0, serial, ?action, "applying configure");

            let mut fullscreen_change = None;
            let mut size_change = None;
            match action {
                ConfigureAction::Fullscreen { size } => {
                    if !inner.fullscreen {
                        inner.fullscreen = true;
                        fullscreen_change = Some(true);
                    }
                    if let Some(size) = size {
                        if inner.size != size {
                            inner.size = size;
                            size_change = Some(size);
                        }
                    }
                }
                ConfigureAction::Resize { size, interactive: _ } => {
                    if inner.fullscreen {
                        inner.fullscreen = false;
                        fullscreen_change = Some(false);
                    }
                    if inner.size != size {
                        inner.size = size;
                        size_change = Some(size);
                    }
                }
                ConfigureAction::NoChange => {}
            }

            let observers = if fullscreen_change.is_some() || size_change.is_some() {
                inner.observers.snapshot_all()
            } else {
                SmallVec::new()
            };
            (inner.id, fullscreen_change, size_change, observers)
        };

        for observer in observers {
            if let Some(fullscreen) = fullscreen_change {
                observer.fullscreen_changed(id, fullscreen);
            }
            if let Some((width, height)) = size_change {
                observer.resized(id, width, height);
            }
        }
    }

    pub(crate) fn handle_surface_enter(&self, output: &wl_output::WlOutput, providers: &Providers) {
        let Some(outputs) = providers.outputs() else {
            return;
        };
        let refresh_mhz = outputs.refresh_rate_mhz(output);
        if refresh_mhz == 0 {
            // The output has not committed its first description burst;
            // without a refresh rate none of its properties are usable.
            return;
        }
        let name = outputs.name(output);
        let description = outputs.description(output);
        let scale = outputs.scale_factor(output);

        let (id, hz_change, scale_change, observers) = {
            let mut inner = self.inner.lock().unwrap();
            if inner.closed {
                return;
            }
            inner.entered = Some(output.clone());
            let (hz_change, scale_change) = inner.apply_output_metrics(refresh_mhz, scale);
            let observers = if hz_change.is_some() || scale_change.is_some() {
                inner.observers.snapshot_all()
            } else {
                SmallVec::new()
            };
            (inner.id, hz_change, scale_change, observers)
        };

        info!(
            window = id.0,
            output = %name,
            description = %description,
            "window entered output"
        );
        for observer in observers {
            if let Some(hz) = hz_change {
                observer.refresh_rate_changed(id, hz);
            }
            if let Some(scale) = scale_change {
                observer.scale_factor_changed(id, scale);
            }
        }
    }

    pub(crate) fn handle_surface_leave(&self, output: &wl_output::WlOutput) {
        let mut inner = self.inner.lock().unwrap();
        if inner.entered.as_ref() == Some(output) {
            debug!(window = inner.id.0, "window left its output");
            inner.entered = None;
        }
    }

    /// Re-reads output properties after the entered output committed a new
    /// description burst.
    pub(crate) fn handle_output_committed(
        &self,
        output: &wl_output::WlOutput,
        providers: &Providers,
    ) {
        let Some(outputs) = providers.outputs() else {
            return;
        };
        let refresh_mhz = outputs.refresh_rate_mhz(output);
        if refresh_mhz == 0 {
            return;
        }
        let scale = outputs.scale_factor(output);

        let (id, hz_change, scale_change, observers) = {
            let mut inner = self.inner.lock().unwrap();
            if inner.closed || inner.entered.as_ref() != Some(output) {
                return;
            }
            let (hz_change, scale_change) = inner.apply_output_metrics(refresh_mhz, scale);
            if hz_change.is_none() && scale_change.is_none() {
                return;
            }
            (inner.id, hz_change, scale_change, inner.observers.snapshot_all())
        };

        for observer in observers {
            if let Some(hz) = hz_change {
                observer.refresh_rate_changed(id, hz);
            }
            if let Some(scale) = scale_change {
                observer.scale_factor_changed(id, scale);
            }
        }
    }
}

/// Weak index of live windows, keyed by window id.
///
/// Entries do not keep windows alive; stale ones are pruned as they are
/// encountered.
#[derive(Debug, Default)]
pub(crate) struct WindowMap {
    entries: HashMap<usize, Weak<Mutex<WindowInner>>>,
}

impl WindowMap {
    pub fn insert(&mut self, window: &Window) {
        let id = window.id();
        self.entries.insert(id.0, Arc::downgrade(&window.inner));
    }

    pub fn get(&mut self, id: WindowId) -> Option<Window> {
        match self.entries.get(&id.0) {
            Some(weak) => match weak.upgrade() {
                Some(inner) => Some(Window { inner }),
                None => {
                    self.entries.remove(&id.0);
                    None
                }
            },
            None => None,
        }
    }

    pub fn output_committed(&mut self, output: &wl_output::WlOutput, providers: &Providers) {
        self.entries.retain(|_, weak| match weak.upgrade() {
            Some(inner) => {
                Window { inner }.handle_output_committed(output, providers);
                true
            }
            None => false,
        });
    }
}

impl Dispatch<wl_surface::WlSurface, WindowId> for PlatformState {
    fn event(
        state: &mut Self,
        _surface: &wl_surface::WlSurface,
        event: wl_surface::Event,
        data: &WindowId,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        let Some(window) = state.windows.get(*data) else {
            return;
        };
        match event {
            wl_surface::Event::Enter { output } => {
                window.handle_surface_enter(&output, &state.providers);
            }
            wl_surface::Event::Leave { output } => {
                window.handle_surface_leave(&output);
            }
            _ => {}
        }
    }
}

impl Dispatch<xdg_surface::XdgSurface, WindowId> for PlatformState {
    fn event(
        state: &mut Self,
        _xdg_surface: &xdg_surface::XdgSurface,
        event: xdg_surface::Event,
        data: &WindowId,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let xdg_surface::Event::Configure { serial } = event {
            if let Some(window) = state.windows.get(*data) {
                window.handle_surface_configure(serial);
            }
        }
    }
}

impl Dispatch<xdg_toplevel::XdgToplevel, WindowId> for PlatformState {
    fn event(
        state: &mut Self,
        _toplevel: &xdg_toplevel::XdgToplevel,
        event: xdg_toplevel::Event,
        data: &WindowId,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        let Some(window) = state.windows.get(*data) else {
            return;
        };
        match event {
            xdg_toplevel::Event::Configure {
                width,
                height,
                states,
            } => {
                window.handle_toplevel_configure(width, height, &states);
            }
            xdg_toplevel::Event::Close => {
                window.close();
            }
            // configure_bounds and wm_capabilities are advisory.
            _ => {}
        }
    }
}

impl Dispatch<zxdg_toplevel_decoration_v1::ZxdgToplevelDecorationV1, WindowId> for PlatformState {
    fn event(
        _state: &mut Self,
        _decoration: &zxdg_toplevel_decoration_v1::ZxdgToplevelDecorationV1,
        event: zxdg_toplevel_decoration_v1::Event,
        data: &WindowId,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let zxdg_toplevel_decoration_v1::Event::Configure { mode } = event {
            debug!(window = data.0, ?mode, "decoration mode configured");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare_window() -> Window {
        Window {
            inner: Arc::new(Mutex::new(WindowInner {
                id: WindowId(window_ids::next()),
                surface: None,
                xdg_surface: None,
                toplevel: None,
                decoration: None,
                size: (800, 600),
                scale: 1.0,
                refresh_hz: 0,
                fullscreen: false,
                entered: None,
                resizable: true,
                closed: false,
                pending: PendingConfigure::default(),
                observers: Listeners::new(),
            })),
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn take(&self) -> Vec<String> {
            std::mem::take(&mut self.events.lock().unwrap())
        }
    }

    impl WindowObserver for Recorder {
        fn closed(&self, _window: WindowId) {
            self.events.lock().unwrap().push("closed".into());
        }

        fn resized(&self, _window: WindowId, width: u32, height: u32) {
            self.events.lock().unwrap().push(format!("resized {width}x{height}"));
        }

        fn refresh_rate_changed(&self, _window: WindowId, hz: u32) {
            self.events.lock().unwrap().push(format!("refresh {hz}"));
        }

        fn fullscreen_changed(&self, _window: WindowId, fullscreen: bool) {
            self.events.lock().unwrap().push(format!("fullscreen {fullscreen}"));
        }
    }

    #[test]
    fn close_notifies_exactly_once() {
        let window = bare_window();
        let recorder = Arc::new(Recorder::default());
        window.add_observer(recorder.clone());

        window.close();
        window.close();

        assert_eq!(recorder.take(), vec!["closed"]);
    }

    #[test]
    fn dropping_the_last_handle_closes() {
        let window = bare_window();
        let recorder = Arc::new(Recorder::default());
        window.add_observer(recorder.clone());

        let clone = window.clone();
        drop(window);
        assert!(recorder.take().is_empty());

        drop(clone);
        assert_eq!(recorder.take(), vec!["closed"]);
    }

    #[test]
    fn configure_applies_the_reduced_burst() {
        let window = bare_window();
        let recorder = Arc::new(Recorder::default());
        window.add_observer(recorder.clone());

        let states: Vec<u8> = (xdg_toplevel::State::Activated as u32).to_ne_bytes().into();
        window.handle_toplevel_configure(1024, 768, &states);
        window.handle_surface_configure(1);

        assert_eq!(recorder.take(), vec!["resized 1024x768"]);
        assert_eq!(window.size(), (1024, 768));

        // Same size again: nothing to notify.
        window.handle_toplevel_configure(1024, 768, &[]);
        window.handle_surface_configure(2);
        assert!(recorder.take().is_empty());
    }

    #[test]
    fn fullscreen_configure_flips_the_flag_once() {
        let window = bare_window();
        let recorder = Arc::new(Recorder::default());
        window.add_observer(recorder.clone());

        let states: Vec<u8> = (xdg_toplevel::State::Fullscreen as u32).to_ne_bytes().into();
        window.handle_toplevel_configure(1920, 1080, &states);
        window.handle_surface_configure(1);
        assert!(window.fullscreen());
        assert_eq!(recorder.take(), vec!["fullscreen true", "resized 1920x1080"]);

        // Leaving fullscreen restores the previous size via a plain resize.
        window.handle_toplevel_configure(800, 600, &[]);
        window.handle_surface_configure(2);
        assert!(!window.fullscreen());
        assert_eq!(recorder.take(), vec!["fullscreen false", "resized 800x600"]);
    }

    #[test]
    fn output_metrics_round_millihertz_up() {
        let window = bare_window();
        let mut inner = window.inner.lock().unwrap();

        let (hz, scale) = inner.apply_output_metrics(59_940, 1);
        assert_eq!(hz, Some(60));
        assert_eq!(scale, None); // 1.0 was already the default

        // Unchanged values produce no notification.
        assert_eq!(inner.apply_output_metrics(59_940, 1), (None, None));

        let (hz, scale) = inner.apply_output_metrics(144_000, 2);
        assert_eq!(hz, Some(144));
        assert_eq!(scale, Some(2.0));
    }

    #[test]
    fn window_map_prunes_dropped_windows() {
        let mut map = WindowMap::default();
        let window = bare_window();
        let id = window.id();
        map.insert(&window);

        assert!(map.get(id).is_some());
        drop(window);
        assert!(map.get(id).is_none());
        assert!(map.entries.is_empty());
    }

    #[test]
    fn closed_windows_ignore_further_configures() {
        let window = bare_window();
        let recorder = Arc::new(Recorder::default());
        window.add_observer(recorder.clone());

        window.close();
        recorder.take();

        window.handle_toplevel_configure(640, 480, &[]);
        window.handle_surface_configure(3);
        assert!(recorder.take().is_empty());
        assert_eq!(window.size(), (800, 600));
    }
}

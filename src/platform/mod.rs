//! Connection bootstrap and the cooperative event pump.
//!
//! [`Smelter`] owns the Wayland [`Connection`], its event queue and the
//! [`PlatformState`] every [`Dispatch`](wayland_client::Dispatch) impl of
//! this crate runs against. Events are drained by explicit, non-blocking
//! pump calls; the only blocking point in the crate is the initial
//! roundtrip inside [`Smelter::connect`].

use std::sync::Arc;

use tracing::{debug, error, info};
use wayland_backend::protocol::ProtocolError;
use wayland_client::backend::WaylandError;
use wayland_client::{Connection, DispatchError, EventQueue, QueueHandle};

use crate::compositor::CompositorState;
use crate::config::Config;
use crate::input::{create_keyboard, create_mouse, DeviceMap, InputObserver, Keyboard, Mouse};
use crate::output::OutputState;
use crate::pointers::{CursorShapeState, PointerConstraintsState, RelativePointerState};
use crate::registry::{
    report_unclaimed, ErrorRoutes, GlobalBinder, GlobalsObserver, Providers, RegistryState,
};
use crate::seat::SeatState;
use crate::shell::ShellState;
use crate::utils::ListenerId;
use crate::window::{create_window, CreateWindowError, Window, WindowAttributes, WindowMap};

#[cfg(feature = "calloop")]
mod source;
#[cfg(feature = "calloop")]
pub use self::source::SmelterSource;

/// Failures of [`Smelter::connect`].
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// No usable compositor socket was found in the environment.
    #[error("unable to connect to the wayland compositor")]
    Connect(#[from] wayland_client::ConnectError),
    /// The compositor rejected us during the initial roundtrip.
    #[error("the initial roundtrip failed")]
    InitialSync(#[from] DispatchError),
}

/// Dispatch target for every protocol object this crate creates.
///
/// The `Dispatch` impls spread across the component modules pick the
/// matching component out of this struct and forward to it.
pub struct PlatformState {
    pub(crate) config: Config,
    pub(crate) registry: RegistryState,
    pub(crate) providers: Arc<Providers>,
    pub(crate) errors: ErrorRoutes,
    pub(crate) compositor: CompositorState,
    pub(crate) seats: SeatState,
    pub(crate) outputs: OutputState,
    pub(crate) shell: ShellState,
    pub(crate) cursor_shapes: CursorShapeState,
    pub(crate) constraints: PointerConstraintsState,
    pub(crate) relative_pointers: RelativePointerState,
    pub(crate) windows: WindowMap,
    pub(crate) devices: DeviceMap,
}

impl std::fmt::Debug for PlatformState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformState")
            .field("config", &self.config)
            .field("seats", &self.seats)
            .field("outputs", &self.outputs)
            .field("devices", &self.devices)
            .finish_non_exhaustive()
    }
}

/// The platform connection.
///
/// Create one with [`Smelter::connect`], then drain events with
/// [`pump_once`](Smelter::pump_once) or
/// [`pump_until_empty`](Smelter::pump_until_empty) from the thread that
/// owns it, or hand it to a [`SmelterSource`] on the `calloop` feature.
#[derive(Debug)]
pub struct Smelter {
    conn: Connection,
    queue: EventQueue<PlatformState>,
    state: PlatformState,
}

impl Smelter {
    /// Connects to the compositor named by the environment and binds the
    /// advertised globals.
    ///
    /// Performs one blocking roundtrip so that the registry, seats and
    /// outputs are populated on return.
    pub fn connect(config: Config) -> Result<Smelter, ConnectError> {
        let conn = Connection::connect_to_env()?;
        let queue = conn.new_event_queue();
        let qh: QueueHandle<PlatformState> = queue.handle();

        let providers = Arc::new(Providers::default());
        let errors = ErrorRoutes::new();

        let compositor = CompositorState::new(qh.clone());
        let seats = SeatState::new(qh.clone());
        let outputs = OutputState::new(qh.clone());
        let shell = ShellState::new(qh.clone());
        let relative_pointers = RelativePointerState::new(qh.clone());
        let constraints = PointerConstraintsState::new(qh.clone());
        let cursor_shapes = CursorShapeState::new(qh.clone());

        // Binders feeding providers that other binders' consumers read
        // must come first in the offer order.
        let binders: Vec<Arc<dyn GlobalBinder>> = vec![
            Arc::new(compositor.clone()),
            Arc::new(seats.clone()),
            Arc::new(outputs.clone()),
            Arc::new(shell.clone()),
            Arc::new(relative_pointers.clone()),
            Arc::new(constraints.clone()),
            Arc::new(cursor_shapes.clone()),
        ];

        let registry = conn.display().get_registry(&qh, ());
        let state = PlatformState {
            registry: RegistryState::new(
                registry,
                config.blocklist.clone(),
                binders,
                providers.clone(),
                errors.clone(),
            ),
            config,
            providers,
            errors,
            compositor,
            seats,
            outputs,
            shell,
            cursor_shapes,
            constraints,
            relative_pointers,
            windows: WindowMap::default(),
            devices: DeviceMap::default(),
        };

        let mut smelter = Smelter { conn, queue, state };
        smelter.queue.roundtrip(&mut smelter.state)?;
        smelter.pump_once();

        info!(
            seats = smelter.state.seats.indices().len(),
            outputs = smelter.state.outputs.len(),
            "connected to the wayland compositor"
        );
        Ok(smelter)
    }

    /// The underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Handle for creating protocol objects dispatched to this state.
    pub fn queue_handle(&self) -> QueueHandle<PlatformState> {
        self.queue.handle()
    }

    /// The capability provider registry.
    pub fn providers(&self) -> &Arc<Providers> {
        &self.state.providers
    }

    /// Indices of the currently announced seats.
    pub fn seats(&self) -> Vec<u32> {
        self.state.seats.indices()
    }

    /// Creates a window, failing when no compositor global is bound.
    pub fn create_window(
        &mut self,
        attributes: WindowAttributes,
    ) -> Result<Window, CreateWindowError> {
        create_window(&mut self.state, attributes)
    }

    /// Creates a mouse consumer following the seat at `seat`.
    pub fn create_mouse(&mut self, seat: u32, observer: Arc<dyn InputObserver>) -> Mouse {
        create_mouse(&mut self.state, seat, observer)
    }

    /// Creates a keyboard consumer following the seat at `seat`.
    pub fn create_keyboard(&mut self, seat: u32, observer: Arc<dyn InputObserver>) -> Keyboard {
        create_keyboard(&mut self.state, seat, observer)
    }

    /// Adds an observer for globals no binder claims.
    pub fn add_globals_observer(&mut self, observer: Arc<dyn GlobalsObserver>) -> ListenerId {
        self.state.registry.add_observer(observer)
    }

    /// Removes a previously added globals observer.
    pub fn remove_globals_observer(&mut self, id: &ListenerId) -> bool {
        self.state.registry.remove_observer(id)
    }

    /// Drains one batch of events without blocking.
    ///
    /// Dispatches events already read from the socket; when there are
    /// none, flushes outgoing requests and attempts a non-blocking read.
    /// Returns the number of events dispatched.
    #[profiling::function]
    pub fn pump_once(&mut self) -> usize {
        let dispatched = match self.queue.dispatch_pending(&mut self.state) {
            Ok(n) => n,
            Err(err) => self.fatal_dispatch(err),
        };
        if dispatched > 0 {
            return dispatched;
        }

        self.flush();

        // prepare_read fails when events arrived in the meantime; pick
        // them up on this same pass.
        let Some(guard) = self.queue.prepare_read() else {
            return match self.queue.dispatch_pending(&mut self.state) {
                Ok(n) => n,
                Err(err) => self.fatal_dispatch(err),
            };
        };

        if !connection_readable(&guard) {
            // Dropping the guard cancels the read.
            return 0;
        }

        if let Err(err) = guard.read() {
            self.fatal_transport(err);
        }
        match self.queue.dispatch_pending(&mut self.state) {
            Ok(n) => n,
            Err(err) => self.fatal_dispatch(err),
        }
    }

    /// Drains events until a pass finds nothing to dispatch and nothing
    /// to read. Returns the total number of events dispatched.
    #[profiling::function]
    pub fn pump_until_empty(&mut self) -> usize {
        let mut total = 0;
        loop {
            let dispatched = self.pump_once();
            if dispatched == 0 {
                return total;
            }
            total += dispatched;
        }
    }

    /// Flushes outgoing requests, tolerating a full socket buffer.
    pub fn flush(&mut self) {
        match self.conn.flush() {
            Ok(()) => {}
            Err(WaylandError::Io(err)) if err.kind() == std::io::ErrorKind::WouldBlock => {
                debug!("wayland socket buffer is full, deferring flush");
            }
            Err(err) => self.fatal_transport(err),
        }
    }

    /// Blocks until the compositor has processed all outstanding requests.
    pub fn roundtrip(&mut self) -> usize {
        match self.queue.roundtrip(&mut self.state) {
            Ok(n) => n,
            Err(err) => self.fatal_dispatch(err),
        }
    }

    fn fatal_dispatch(&mut self, err: DispatchError) -> ! {
        match err {
            DispatchError::Backend(err) => self.fatal_transport(err),
            DispatchError::BadMessage { .. } => fail(&Fatal::Dispatch(err.to_string()), None),
        }
    }

    fn fatal_transport(&mut self, err: WaylandError) -> ! {
        let fatal = Fatal::from_wayland(err);
        let claimed = match &fatal {
            Fatal::Protocol(protocol) => {
                let claimed = self.state.errors.deliver(protocol);
                if claimed.is_none() {
                    report_unclaimed(protocol);
                }
                claimed
            }
            _ => None,
        };
        fail(&fatal, claimed)
    }
}

fn connection_readable(guard: &wayland_client::backend::ReadEventsGuard) -> bool {
    use rustix::event::{poll, PollFd, PollFlags};

    let fd = guard.connection_fd();
    let mut fds = [PollFd::new(&fd, PollFlags::IN)];
    match poll(&mut fds, 0) {
        Ok(n) => n > 0 && fds[0].revents().contains(PollFlags::IN),
        Err(_) => false,
    }
}

/// Classified connection failure, rendered once before terminating.
#[derive(Debug)]
enum Fatal {
    /// The compositor posted a protocol error; it is routed to the
    /// owning sink before the final diagnostic.
    Protocol(ProtocolError),
    /// The transport itself failed.
    Io(String),
    /// The event stream could not be decoded.
    Dispatch(String),
}

impl Fatal {
    fn from_wayland(err: WaylandError) -> Self {
        match err {
            WaylandError::Protocol(protocol) => Fatal::Protocol(protocol),
            WaylandError::Io(err) => Fatal::Io(err.to_string()),
        }
    }

    fn diagnostic(&self) -> String {
        match self {
            Fatal::Protocol(protocol) => format!(
                "fatal protocol error {} on {}#{}: {}",
                protocol.code, protocol.object_interface, protocol.object_id, protocol.message
            ),
            Fatal::Io(message) => format!("wayland connection lost: {message}"),
            Fatal::Dispatch(message) => format!("wayland event stream corrupt: {message}"),
        }
    }
}

/// The connection is documented unusable after any fatal error; report
/// once and terminate.
fn fail(fatal: &Fatal, claimed: Option<u32>) -> ! {
    error!(claimed_by = claimed, "{}", fatal.diagnostic());
    std::process::abort()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn protocol_error() -> ProtocolError {
        ProtocolError {
            code: 4,
            object_id: 12,
            object_interface: "xdg_wm_base".into(),
            message: "wrong surface state".into(),
        }
    }

    #[test]
    fn protocol_failures_keep_their_identity() {
        let fatal = Fatal::from_wayland(WaylandError::Protocol(protocol_error()));
        let rendered = fatal.diagnostic();
        assert!(rendered.contains("xdg_wm_base#12"));
        assert!(rendered.contains("wrong surface state"));
        assert!(rendered.starts_with("fatal protocol error 4"));
    }

    #[test]
    fn io_failures_render_the_source_error() {
        let err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "broken pipe");
        let fatal = Fatal::from_wayland(WaylandError::Io(err));
        assert_eq!(fatal.diagnostic(), "wayland connection lost: broken pipe");
    }
}

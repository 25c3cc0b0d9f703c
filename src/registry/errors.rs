use std::sync::{Arc, Mutex};

use indexmap::IndexMap;
use smallvec::SmallVec;
use tracing::error;
use wayland_backend::protocol::ProtocolError;

/// Receives protocol errors for the objects of one bound global.
///
/// Sinks are registered under the registry id of the global whose protocol
/// defines the error codes and are asked in registration order. A sink
/// claims an error by recognizing the erroring object as one of its own
/// (usually by interface) and reporting it; the connection is already dead
/// at that point, so claiming is purely diagnostic.
pub trait ProtocolErrorSink: Send + Sync {
    /// Reports `error` if it belongs to this sink, returning whether it was
    /// claimed.
    fn on_error(&self, error: &ProtocolError) -> bool;
}

/// Routing table from registry id to the [`ProtocolErrorSink`] of the
/// binder owning that global.
#[derive(Clone, Default)]
pub struct ErrorRoutes {
    routes: Arc<Mutex<IndexMap<u32, Arc<dyn ProtocolErrorSink>>>>,
}

impl std::fmt::Debug for ErrorRoutes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorRoutes")
            .field("len", &self.routes.lock().unwrap().len())
            .finish_non_exhaustive()
    }
}

impl ErrorRoutes {
    /// Creates an empty table.
    pub fn new() -> Self {
        Default::default()
    }

    /// Registers `sink` for the global bound under `registry_id`.
    pub fn insert(&self, registry_id: u32, sink: Arc<dyn ProtocolErrorSink>) {
        self.routes.lock().unwrap().insert(registry_id, sink);
    }

    /// Removes the sink registered under `registry_id`, if any.
    pub fn remove(&self, registry_id: u32) -> bool {
        self.routes.lock().unwrap().shift_remove(&registry_id).is_some()
    }

    /// Offers `error` to every sink in registration order.
    ///
    /// Returns the registry id of the claiming sink. Unclaimed errors get a
    /// generic diagnostic from the caller.
    pub fn deliver(&self, error: &ProtocolError) -> Option<u32> {
        let sinks: SmallVec<[(u32, Arc<dyn ProtocolErrorSink>); 4]> = {
            let routes = self.routes.lock().unwrap();
            routes.iter().map(|(id, sink)| (*id, sink.clone())).collect()
        };

        for (registry_id, sink) in sinks {
            if sink.on_error(error) {
                return Some(registry_id);
            }
        }
        None
    }
}

/// Logs the generic diagnostic for a protocol error no sink claimed.
pub(crate) fn report_unclaimed(error: &ProtocolError) {
    error!(
        object = error.object_id,
        interface = %error.object_interface,
        code = error.code,
        "protocol error on an object without a registered handler: {}",
        error.message
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Claiming {
        interface: &'static str,
        hits: AtomicUsize,
    }

    impl Claiming {
        fn new(interface: &'static str) -> Arc<Self> {
            Arc::new(Claiming {
                interface,
                hits: AtomicUsize::new(0),
            })
        }
    }

    impl ProtocolErrorSink for Claiming {
        fn on_error(&self, error: &ProtocolError) -> bool {
            if error.object_interface == self.interface {
                self.hits.fetch_add(1, Ordering::SeqCst);
                true
            } else {
                false
            }
        }
    }

    fn sample_error(interface: &str) -> ProtocolError {
        ProtocolError {
            code: 4,
            object_id: 12,
            object_interface: interface.to_string(),
            message: "invalid surface state".to_string(),
        }
    }

    #[test]
    fn delivery_stops_at_the_claiming_sink() {
        let routes = ErrorRoutes::new();
        let shell = Claiming::new("xdg_surface");
        let decoration = Claiming::new("zxdg_toplevel_decoration_v1");
        routes.insert(10, shell.clone());
        routes.insert(11, decoration.clone());

        assert_eq!(routes.deliver(&sample_error("xdg_surface")), Some(10));
        assert_eq!(shell.hits.load(Ordering::SeqCst), 1);
        assert_eq!(decoration.hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unclaimed_errors_return_none() {
        let routes = ErrorRoutes::new();
        routes.insert(10, Claiming::new("xdg_surface"));

        assert_eq!(routes.deliver(&sample_error("wl_compositor")), None);
    }

    #[test]
    fn sinks_are_asked_in_registration_order() {
        let routes = ErrorRoutes::new();
        let first = Claiming::new("xdg_surface");
        let second = Claiming::new("xdg_surface");
        routes.insert(20, first.clone());
        routes.insert(21, second.clone());

        assert_eq!(routes.deliver(&sample_error("xdg_surface")), Some(20));
        assert_eq!(second.hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn removal_detaches_the_route() {
        let routes = ErrorRoutes::new();
        routes.insert(30, Claiming::new("xdg_surface"));

        assert!(routes.remove(30));
        assert!(!routes.remove(30));
        assert_eq!(routes.deliver(&sample_error("xdg_surface")), None);
    }
}

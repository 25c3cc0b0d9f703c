//! Startup configuration.
//!
//! The configuration is consumed once by [`Smelter::connect`](crate::Smelter::connect)
//! and cannot be changed afterwards. In particular the protocol blocklist is
//! only consulted when a global is first announced, as blocking an already
//! bound protocol would strand its live binding with no revoke event.

/// Configuration handed to [`Smelter::connect`](crate::Smelter::connect).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    /// Globals that must never be recorded or bound, by interface name.
    pub blocklist: Blocklist,
    /// Which motion deltas relative pointer events feed downstream.
    pub relative_motion: RelativeMotion,
}

/// Set of interface names that are ignored when the compositor announces
/// them.
///
/// Blocked globals are dropped at the registry edge: they are not recorded,
/// not offered to any binder and not reported to unhandled-global observers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Blocklist {
    entries: Vec<String>,
}

impl Blocklist {
    /// Parses a comma separated list of interface names.
    ///
    /// Entries are trimmed and empty entries are dropped, so `"wl_seat, ,"`
    /// blocks exactly `wl_seat`.
    pub fn parse(raw: &str) -> Self {
        Blocklist {
            entries: raw
                .split(',')
                .map(str::trim)
                .filter(|entry| !entry.is_empty())
                .map(String::from)
                .collect(),
        }
    }

    /// Whether `interface` is blocked.
    pub fn contains(&self, interface: &str) -> bool {
        self.entries.iter().any(|entry| entry == interface)
    }

    /// Whether the list blocks anything at all.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Selects which of the two delta pairs carried by relative pointer events
/// is delivered to input observers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RelativeMotion {
    /// Deltas with pointer acceleration applied.
    #[default]
    Accelerated,
    /// Raw unaccelerated deltas.
    Raw,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_splits_on_commas_and_trims() {
        let list = Blocklist::parse("wl_seat, zxdg_decoration_manager_v1 ,wl_output");
        assert!(list.contains("wl_seat"));
        assert!(list.contains("zxdg_decoration_manager_v1"));
        assert!(list.contains("wl_output"));
        assert!(!list.contains("wl_compositor"));
    }

    #[test]
    fn parse_drops_empty_entries() {
        assert!(Blocklist::parse("").is_empty());
        assert!(Blocklist::parse(" , ,,").is_empty());

        let list = Blocklist::parse(",wl_seat,");
        assert!(!list.is_empty());
        assert!(list.contains("wl_seat"));
    }

    #[test]
    fn matching_is_exact() {
        let list = Blocklist::parse("wl_seat");
        assert!(!list.contains("wl_seat_extra"));
        assert!(!list.contains("wl_sea"));
    }

    #[test]
    fn relative_motion_defaults_to_accelerated() {
        assert_eq!(Config::default().relative_motion, RelativeMotion::Accelerated);
    }
}

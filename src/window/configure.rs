use smallvec::SmallVec;
use wayland_protocols::xdg::shell::client::xdg_toplevel;

/// Accumulates the toplevel configure events of one negotiation burst.
///
/// `xdg_toplevel.configure` may arrive several times before the terminal
/// `xdg_surface.configure`; the latest state set and size win. The
/// terminal event acknowledges the serial first and then reduces the
/// accumulated burst to exactly one [`ConfigureAction`], clearing the
/// accumulator for the next burst.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct PendingConfigure {
    fullscreen: bool,
    resizing: bool,
    size: Option<(u32, u32)>,
}

/// The single state change a completed configure burst resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConfigureAction {
    /// The window is fullscreen, optionally at a compositor chosen size.
    Fullscreen { size: Option<(u32, u32)> },
    /// The window is not fullscreen and should take the given size.
    ///
    /// `interactive` distinguishes a drag resize in progress from a bare
    /// corrective size the compositor imposed.
    Resize { size: (u32, u32), interactive: bool },
    /// Nothing to apply.
    NoChange,
}

impl PendingConfigure {
    /// Records one `xdg_toplevel.configure` event.
    ///
    /// The state flags are recomputed from scratch on every event; a zero
    /// width or height means the compositor has no size preference.
    pub fn record(&mut self, width: i32, height: i32, states: &[u8]) {
        self.fullscreen = false;
        self.resizing = false;
        for state in toplevel_states(states) {
            match state {
                xdg_toplevel::State::Fullscreen => self.fullscreen = true,
                xdg_toplevel::State::Resizing => self.resizing = true,
                _ => {}
            }
        }
        self.size = (width > 0 && height > 0).then(|| (width as u32, height as u32));
    }

    /// Reduces the burst to its action and clears the accumulator.
    ///
    /// Priority: fullscreen beats an interactive resize beats a bare
    /// corrective size.
    pub fn resolve(&mut self) -> ConfigureAction {
        let action = if self.fullscreen {
            ConfigureAction::Fullscreen { size: self.size }
        } else if self.resizing {
            match self.size {
                Some(size) => ConfigureAction::Resize {
                    size,
                    interactive: true,
                },
                None => ConfigureAction::NoChange,
            }
        } else if let Some(size) = self.size {
            ConfigureAction::Resize {
                size,
                interactive: false,
            }
        } else {
            ConfigureAction::NoChange
        };

        *self = PendingConfigure::default();
        action
    }
}

/// Decodes the state array of an `xdg_toplevel.configure` event.
///
/// The wire format is a native endian `u32` per state; unknown states are
/// skipped.
pub(crate) fn toplevel_states(raw: &[u8]) -> SmallVec<[xdg_toplevel::State; 4]> {
    raw.chunks_exact(4)
        .map(|chunk| u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .filter_map(|value| xdg_toplevel::State::try_from(value).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn states(states: &[xdg_toplevel::State]) -> Vec<u8> {
        states
            .iter()
            .flat_map(|state| (*state as u32).to_ne_bytes())
            .collect()
    }

    #[test]
    fn fullscreen_with_size_resolves_to_one_action() {
        let mut pending = PendingConfigure::default();
        pending.record(800, 600, &states(&[xdg_toplevel::State::Fullscreen]));

        assert_eq!(
            pending.resolve(),
            ConfigureAction::Fullscreen {
                size: Some((800, 600))
            }
        );
    }

    #[test]
    fn bare_size_is_a_corrective_resize() {
        let mut pending = PendingConfigure::default();
        pending.record(640, 480, &[]);

        assert_eq!(
            pending.resolve(),
            ConfigureAction::Resize {
                size: (640, 480),
                interactive: false
            }
        );
    }

    #[test]
    fn fullscreen_beats_resizing() {
        let mut pending = PendingConfigure::default();
        pending.record(
            1920,
            1080,
            &states(&[xdg_toplevel::State::Resizing, xdg_toplevel::State::Fullscreen]),
        );

        assert_eq!(
            pending.resolve(),
            ConfigureAction::Fullscreen {
                size: Some((1920, 1080))
            }
        );
    }

    #[test]
    fn resizing_marks_the_resize_interactive() {
        let mut pending = PendingConfigure::default();
        pending.record(500, 400, &states(&[xdg_toplevel::State::Resizing]));

        assert_eq!(
            pending.resolve(),
            ConfigureAction::Resize {
                size: (500, 400),
                interactive: true
            }
        );
    }

    #[test]
    fn the_latest_event_of_a_burst_wins() {
        let mut pending = PendingConfigure::default();
        pending.record(800, 600, &states(&[xdg_toplevel::State::Fullscreen]));
        // The compositor changed its mind within the same burst.
        pending.record(640, 480, &[]);

        assert_eq!(
            pending.resolve(),
            ConfigureAction::Resize {
                size: (640, 480),
                interactive: false
            }
        );
    }

    #[test]
    fn zero_size_means_no_suggestion() {
        let mut pending = PendingConfigure::default();
        pending.record(0, 0, &states(&[xdg_toplevel::State::Fullscreen]));

        assert_eq!(pending.resolve(), ConfigureAction::Fullscreen { size: None });
    }

    #[test]
    fn resolve_clears_the_accumulator() {
        let mut pending = PendingConfigure::default();
        pending.record(800, 600, &states(&[xdg_toplevel::State::Fullscreen]));
        pending.resolve();

        // A following empty burst must not inherit anything.
        assert_eq!(pending, PendingConfigure::default());
        assert_eq!(pending.resolve(), ConfigureAction::NoChange);
    }

    #[test]
    fn unknown_states_are_skipped() {
        let mut raw = states(&[xdg_toplevel::State::Fullscreen]);
        raw.extend(9999u32.to_ne_bytes());
        // A trailing partial word is ignored too.
        raw.push(0xff);

        let decoded = toplevel_states(&raw);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0], xdg_toplevel::State::Fullscreen);
    }
}

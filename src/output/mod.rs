//! `wl_output` tracking with done-gated property queries.
//!
//! Output properties arrive as a burst of events terminated by `done`. The
//! burst is accumulated in a pending record and only published atomically
//! when `done` commits it, so queries never observe a half-described
//! output. Before the first `done` every query reports absence (zero or
//! empty values).

use std::sync::{Arc, Mutex};

use indexmap::IndexMap;
use tracing::{debug, info, warn};
use wayland_client::protocol::wl_output;
use wayland_client::{Connection, Dispatch, Proxy, QueueHandle, WEnum};

use crate::platform::PlatformState;
use crate::registry::{BindContext, GlobalBinder, ProviderId, UnbindContext};

/// Highest `wl_output` version this crate binds.
pub const OUTPUT_VERSION: u32 = 4;

/// Committed description of one output.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputInfo {
    /// Position in the global compositor space.
    pub x: i32,
    /// Position in the global compositor space.
    pub y: i32,
    /// Width of the current mode in hardware pixels.
    pub width: i32,
    /// Height of the current mode in hardware pixels.
    pub height: i32,
    /// Vertical refresh rate of the current mode in millihertz.
    pub refresh_mhz: i32,
    /// Physical width in millimeters.
    pub physical_width: i32,
    /// Physical height in millimeters.
    pub physical_height: i32,
    /// Subpixel geometry.
    pub subpixel: wl_output::Subpixel,
    /// Manufacturer reported by the compositor.
    pub make: String,
    /// Model reported by the compositor.
    pub model: String,
    /// Transform applied to buffers shown on this output.
    pub transform: wl_output::Transform,
    /// Human readable name, e.g. `DP-1`.
    pub name: String,
    /// Human readable description.
    pub description: String,
    /// Integer scale factor.
    pub scale: i32,
}

impl Default for OutputInfo {
    fn default() -> Self {
        OutputInfo {
            x: 0,
            y: 0,
            width: 0,
            height: 0,
            refresh_mhz: 0,
            physical_width: 0,
            physical_height: 0,
            subpixel: wl_output::Subpixel::Unknown,
            make: String::new(),
            model: String::new(),
            transform: wl_output::Transform::Normal,
            name: String::new(),
            description: String::new(),
            scale: 1,
        }
    }
}

/// Double-buffered per-output state.
///
/// Events mutate `pending`; `done` installs a copy as the committed state
/// queries read from.
#[derive(Debug, Default)]
pub(crate) struct OutputRecord {
    pending: OutputInfo,
    committed: Option<OutputInfo>,
}

impl OutputRecord {
    #[allow(clippy::too_many_arguments)]
    fn apply_geometry(
        &mut self,
        x: i32,
        y: i32,
        physical_width: i32,
        physical_height: i32,
        subpixel: WEnum<wl_output::Subpixel>,
        make: String,
        model: String,
        transform: WEnum<wl_output::Transform>,
    ) {
        let pending = &mut self.pending;
        pending.x = x;
        pending.y = y;
        pending.physical_width = physical_width;
        pending.physical_height = physical_height;
        pending.make = make;
        pending.model = model;
        if let WEnum::Value(subpixel) = subpixel {
            pending.subpixel = subpixel;
        }
        if let WEnum::Value(transform) = transform {
            pending.transform = transform;
        }
    }

    fn apply_mode(&mut self, flags: WEnum<wl_output::Mode>, width: i32, height: i32, refresh: i32) {
        // Only the mode the output is actually driving matters; advertised
        // alternate modes are skipped.
        let current = matches!(flags, WEnum::Value(flags) if flags.contains(wl_output::Mode::Current));
        if !current {
            return;
        }
        self.pending.width = width;
        self.pending.height = height;
        self.pending.refresh_mhz = refresh;
    }

    fn apply_scale(&mut self, factor: i32) {
        self.pending.scale = factor;
    }

    fn apply_name(&mut self, name: String) {
        self.pending.name = name;
    }

    fn apply_description(&mut self, description: String) {
        self.pending.description = description;
    }

    fn commit(&mut self) {
        self.committed = Some(self.pending.clone());
    }

    fn committed(&self) -> Option<&OutputInfo> {
        self.committed.as_ref()
    }
}

/// Property queries over the committed state of known outputs.
///
/// All queries report absence (`0`, empty string, a scale of `1`) for
/// outputs that have not committed their first description burst yet, and
/// for outputs this crate does not track.
pub trait OutputQueries: Send + Sync {
    /// Refresh rate of the current mode in millihertz.
    fn refresh_rate_mhz(&self, output: &wl_output::WlOutput) -> i32;

    /// Output name.
    fn name(&self, output: &wl_output::WlOutput) -> String;

    /// Output description.
    fn description(&self, output: &wl_output::WlOutput) -> String;

    /// Integer scale factor.
    fn scale_factor(&self, output: &wl_output::WlOutput) -> i32;

    /// Full committed info, if the output has completed a burst.
    fn info(&self, output: &wl_output::WlOutput) -> Option<OutputInfo>;
}

struct Entry {
    output: wl_output::WlOutput,
    record: OutputRecord,
}

#[derive(Debug)]
struct Inner {
    qh: QueueHandle<PlatformState>,
    provider_id: ProviderId,
    entries: IndexMap<u32, Entry>,
}

impl std::fmt::Debug for Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entry")
            .field("output", &self.output)
            .field("record", &self.record)
            .finish()
    }
}

/// Binder and tracker for `wl_output` globals.
#[derive(Debug, Clone)]
pub struct OutputState {
    inner: Arc<Mutex<Inner>>,
}

/// User data attached to bound `wl_output` proxies.
#[derive(Debug, Clone, Copy)]
pub(crate) struct OutputData {
    registry_id: u32,
}

impl OutputState {
    /// Creates the output state with no known outputs.
    pub fn new(qh: QueueHandle<PlatformState>) -> Self {
        OutputState {
            inner: Arc::new(Mutex::new(Inner {
                qh,
                provider_id: ProviderId::next(),
                entries: IndexMap::new(),
            })),
        }
    }

    /// Number of outputs currently announced.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    /// Whether no output is currently announced.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().entries.is_empty()
    }

    fn with_committed<R>(
        &self,
        output: &wl_output::WlOutput,
        read: impl FnOnce(&OutputInfo) -> R,
    ) -> Option<R> {
        let inner = self.inner.lock().unwrap();
        let entry = inner.entries.values().find(|entry| &entry.output == output)?;
        entry.record.committed().map(read)
    }

    pub(crate) fn handle_event(&self, data: &OutputData, event: wl_output::Event) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(entry) = inner.entries.get_mut(&data.registry_id) else {
            return false;
        };

        match event {
            wl_output::Event::Geometry {
                x,
                y,
                physical_width,
                physical_height,
                subpixel,
                make,
                model,
                transform,
            } => {
                entry
                    .record
                    .apply_geometry(x, y, physical_width, physical_height, subpixel, make, model, transform);
                false
            }
            wl_output::Event::Mode {
                flags,
                width,
                height,
                refresh,
            } => {
                entry.record.apply_mode(flags, width, height, refresh);
                false
            }
            wl_output::Event::Scale { factor } => {
                entry.record.apply_scale(factor);
                false
            }
            wl_output::Event::Name { name } => {
                entry.record.apply_name(name);
                false
            }
            wl_output::Event::Description { description } => {
                entry.record.apply_description(description);
                false
            }
            wl_output::Event::Done => {
                entry.record.commit();
                debug!(
                    id = data.registry_id,
                    name = %entry.record.pending.name,
                    "output description committed"
                );
                true
            }
            _ => false,
        }
    }
}

impl GlobalBinder for OutputState {
    fn try_bind(&self, id: u32, interface: &str, version: u32, ctx: &BindContext<'_>) -> bool {
        if interface != "wl_output" {
            return false;
        }

        let (provider_id, first) = {
            let mut inner = self.inner.lock().unwrap();
            let version = version.min(OUTPUT_VERSION);
            let output = ctx.registry.bind::<wl_output::WlOutput, _, _>(
                id,
                version,
                ctx.qh,
                OutputData { registry_id: id },
            );
            let first = inner.entries.is_empty();
            inner.entries.insert(
                id,
                Entry {
                    output,
                    record: OutputRecord::default(),
                },
            );
            info!(id, version, "bound wl_output");
            (inner.provider_id, first)
        };

        if first
            && !ctx
                .providers
                .outputs_slot()
                .register(provider_id, Arc::new(self.clone()))
        {
            warn!("an output query provider is already registered");
        }
        true
    }

    fn try_unbind(&self, id: u32, ctx: &UnbindContext<'_>) -> bool {
        let (provider_id, last) = {
            let mut inner = self.inner.lock().unwrap();
            let Some(entry) = inner.entries.shift_remove(&id) else {
                return false;
            };
            if entry.output.version() >= 3 {
                entry.output.release();
            }
            (inner.provider_id, inner.entries.is_empty())
        };

        if last {
            ctx.providers.outputs_slot().unregister(provider_id);
        }
        info!(id, "wl_output global revoked");
        true
    }
}

impl OutputQueries for OutputState {
    fn refresh_rate_mhz(&self, output: &wl_output::WlOutput) -> i32 {
        self.with_committed(output, |info| info.refresh_mhz).unwrap_or(0)
    }

    fn name(&self, output: &wl_output::WlOutput) -> String {
        self.with_committed(output, |info| info.name.clone()).unwrap_or_default()
    }

    fn description(&self, output: &wl_output::WlOutput) -> String {
        self.with_committed(output, |info| info.description.clone())
            .unwrap_or_default()
    }

    fn scale_factor(&self, output: &wl_output::WlOutput) -> i32 {
        self.with_committed(output, |info| info.scale).unwrap_or(1)
    }

    fn info(&self, output: &wl_output::WlOutput) -> Option<OutputInfo> {
        self.with_committed(output, Clone::clone)
    }
}

impl Dispatch<wl_output::WlOutput, OutputData> for PlatformState {
    fn event(
        state: &mut Self,
        output: &wl_output::WlOutput,
        event: wl_output::Event,
        data: &OutputData,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        let committed = state.outputs.handle_event(data, event);
        if committed {
            // Windows shown on this output may need to refresh the values
            // they mirror (refresh rate, scale factor).
            state.windows.output_committed(output, &state.providers);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry(record: &mut OutputRecord) {
        record.apply_geometry(
            0,
            0,
            600,
            340,
            WEnum::Value(wl_output::Subpixel::HorizontalRgb),
            "smelter".into(),
            "test-panel".into(),
            WEnum::Value(wl_output::Transform::Normal),
        );
    }

    #[test]
    fn queries_report_absence_before_the_first_done() {
        let mut record = OutputRecord::default();
        geometry(&mut record);
        record.apply_mode(WEnum::Value(wl_output::Mode::Current), 2560, 1440, 143_856);
        record.apply_name("DP-1".into());
        record.apply_scale(2);

        // No done yet: nothing is visible.
        assert!(record.committed().is_none());

        record.commit();
        let info = record.committed().expect("committed after done");
        assert_eq!(info.refresh_mhz, 143_856);
        assert_eq!(info.name, "DP-1");
        assert_eq!(info.scale, 2);
    }

    #[test]
    fn commit_gating_is_independent_of_event_order() {
        let mut record = OutputRecord::default();
        record.apply_name("HDMI-A-1".into());
        record.apply_mode(WEnum::Value(wl_output::Mode::Current), 1920, 1080, 60_000);
        geometry(&mut record);
        assert!(record.committed().is_none());

        record.commit();
        let info = record.committed().unwrap();
        assert_eq!((info.width, info.height), (1920, 1080));
        assert_eq!(info.make, "smelter");
    }

    #[test]
    fn non_current_modes_are_ignored() {
        let mut record = OutputRecord::default();
        record.apply_mode(WEnum::Value(wl_output::Mode::Preferred), 3840, 2160, 144_000);
        record.apply_mode(WEnum::Value(wl_output::Mode::Current), 1920, 1080, 60_000);
        record.commit();

        let info = record.committed().unwrap();
        assert_eq!(info.refresh_mhz, 60_000);
        assert_eq!((info.width, info.height), (1920, 1080));
    }

    #[test]
    fn later_bursts_replace_the_committed_state() {
        let mut record = OutputRecord::default();
        record.apply_mode(WEnum::Value(wl_output::Mode::Current), 1920, 1080, 60_000);
        record.commit();
        assert_eq!(record.committed().unwrap().refresh_mhz, 60_000);

        record.apply_mode(WEnum::Value(wl_output::Mode::Current), 1920, 1080, 120_000);
        // Still the old value until the burst completes.
        assert_eq!(record.committed().unwrap().refresh_mhz, 60_000);
        record.commit();
        assert_eq!(record.committed().unwrap().refresh_mhz, 120_000);
    }
}

//! Session output container.
//!
//! A [`SessionContainer`] gathers everything one session produces: the
//! aligned streams, the trial table, state and event records, the merged
//! metadata, the alignment result and the diagnostics.  A [`ContainerWriter`]
//! persists it.
//!
//! [`SafetensorsContainer`] writes the layout of [`crate::io`]:
//!
//! ```text
//! <stream>/timestamps   F64 [T]
//! <stream>/data         F64 [T, C]     (omitted when C = 0)
//! trials/start_time     F64 [N]
//! trials/stop_time      F64 [N]
//! states/start_time     F64 [S]   states/stop_time F64 [S]
//! states/trial          I32 [S]   states/state_type I32 [S]
//! events/timestamp      F64 [E]   events/trial I32 [E]   events/event_type I32 [E]
//! __metadata__          merged metadata + "Streams", "Behavior", "Alignment", "Diagnostics"
//! ```
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::{json, Value};
use tracing::info;

use crate::align::Finalized;
use crate::behavior::{EventRecord, StateInterval};
use crate::diagnostics::Diagnostics;
use crate::error::AlignError;
use crate::io::StWriter;
use crate::session::Session;
use crate::stream::Stream;

/// Everything written for one session.
#[derive(Debug, Clone)]
pub struct SessionContainer {
    pub session: Session,
    pub metadata: Value,
    pub alignment: Finalized,
    pub streams: Vec<Stream>,
    pub trial_start: Vec<f64>,
    pub trial_stop: Vec<f64>,
    pub states: Vec<StateInterval>,
    pub events: Vec<EventRecord>,
    pub diagnostics: Diagnostics,
}

impl SessionContainer {
    pub fn new(session: Session, metadata: Value, alignment: Finalized) -> Self {
        Self {
            session,
            metadata,
            alignment,
            streams: Vec::new(),
            trial_start: Vec::new(),
            trial_stop: Vec::new(),
            states: Vec::new(),
            events: Vec::new(),
            diagnostics: Diagnostics::default(),
        }
    }

    pub fn with_stream(mut self, stream: Stream) -> Self {
        self.streams.push(stream);
        self
    }

    pub fn with_trials(mut self, start: &[f64], stop: &[f64]) -> Self {
        self.trial_start = start.to_vec();
        self.trial_stop = stop.to_vec();
        self
    }

    /// Every time must lie at or after the session start.
    pub fn check_non_negative(&self) -> Result<()> {
        let check = |stream: &str, first: Option<f64>| match first {
            Some(t) if t < 0.0 => Err(AlignError::NegativeTimestamps { stream: stream.to_string(), first: t }),
            _ => Ok(()),
        };
        for s in &self.streams {
            // monotonic, so the first timestamp is the minimum
            check(&s.name, s.first_timestamp())?;
        }
        check("trials", self.trial_start.iter().copied().reduce(f64::min))?;
        check("states", self.states.iter().map(|s| s.start_time).reduce(f64::min))?;
        check("events", self.events.iter().map(|e| e.timestamp).reduce(f64::min))?;
        Ok(())
    }
}

/// Persists a finished session.
pub trait ContainerWriter: Sync {
    fn write(&self, container: &SessionContainer, path: &Path) -> Result<()>;
}

/// Writes containers in the safetensors layout.
#[derive(Debug, Clone, Copy, Default)]
pub struct SafetensorsContainer;

impl ContainerWriter for SafetensorsContainer {
    fn write(&self, c: &SessionContainer, path: &Path) -> Result<()> {
        c.check_non_negative()?;

        let mut w = StWriter::new();
        let mut streams = serde_json::Map::new();
        for s in &c.streams {
            let ts = s.timestamps().to_vec();
            w.add_f64(&format!("{}/timestamps", s.name), &ts, &[ts.len()]);
            if !s.channels().is_empty() {
                w.add_f64_arr2(&format!("{}/data", s.name), s.samples());
            }
            streams.insert(
                s.name.clone(),
                json!({ "channels": s.channels(), "starting_time": s.first_timestamp(), "shifted_by": s.shifted_by() }),
            );
        }

        w.add_f64("trials/start_time", &c.trial_start, &[c.trial_start.len()]);
        w.add_f64("trials/stop_time", &c.trial_stop, &[c.trial_stop.len()]);

        let state_types = labels(c.states.iter().map(|s| s.state.as_str()));
        let n = c.states.len();
        w.add_f64("states/start_time", &c.states.iter().map(|s| s.start_time).collect::<Vec<_>>(), &[n]);
        w.add_f64("states/stop_time", &c.states.iter().map(|s| s.stop_time).collect::<Vec<_>>(), &[n]);
        w.add_i32("states/trial", &c.states.iter().map(|s| s.trial as i32).collect::<Vec<_>>(), &[n]);
        w.add_i32("states/state_type", &index_of(&state_types, c.states.iter().map(|s| s.state.as_str())), &[n]);

        let event_types = labels(c.events.iter().map(|e| e.event.as_str()));
        let n = c.events.len();
        w.add_f64("events/timestamp", &c.events.iter().map(|e| e.timestamp).collect::<Vec<_>>(), &[n]);
        w.add_i32("events/trial", &c.events.iter().map(|e| e.trial as i32).collect::<Vec<_>>(), &[n]);
        w.add_i32("events/event_type", &index_of(&event_types, c.events.iter().map(|e| e.event.as_str())), &[n]);
        let event_values: Vec<&str> = c.events.iter().map(|e| e.value.as_str()).collect();

        let mut metadata = c.metadata.clone();
        crate::metadata::deep_merge(
            &mut metadata,
            json!({
                "Streams": streams,
                "Behavior": { "StateTypes": state_types, "EventTypes": event_types, "EventValues": event_values },
                "Alignment": c.alignment,
                "Diagnostics": c.diagnostics,
            }),
        );
        w.set_metadata(metadata);

        // write next to the target, then rename, so a failure leaves no partial file
        let partial = path.with_extension("nwb.partial");
        w.write(&partial)?;
        std::fs::rename(&partial, path).with_context(|| format!("moving output into {}", path.display()))?;
        info!(path = %path.display(), streams = c.streams.len(), trials = c.trial_start.len(), "container written");
        Ok(())
    }
}

/// Distinct labels in first-seen order.
fn labels<'a>(names: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for n in names {
        if !out.iter().any(|o| o == n) {
            out.push(n.to_string());
        }
    }
    out
}

fn index_of<'a>(labels: &[String], names: impl Iterator<Item = &'a str>) -> Vec<i32> {
    names
        .map(|n| labels.iter().position(|l| l == n).map_or(-1, |i| i as i32))
        .collect()
}

//! Behavioral state-machine log — the session's reference clock.
//!
//! The log is a JSON document keyed by one top-level struct name
//! (`"SessionData"` by default):
//!
//! ```text
//! SessionData
//!   ├─ Info { SessionDate, SessionStartTime_UTC, StateMachineVersion }
//!   ├─ TrialStartTimestamp [N]      seconds, controller clock
//!   ├─ TrialEndTimestamp   [N]
//!   ├─ RawEvents.Trial [N]
//!   │    ├─ States { name: [start, stop] }   relative to trial start, null = not visited
//!   │    └─ Events { name: t | [t, ...] }    relative to trial start
//!   └─ TrialSettings [N] { GUI: { argument: value } }
//! ```
//!
//! Trial start times are the landmarks every other stream is aligned onto.
//! No alignment happens here; [`BehaviorLog::set_aligned_trial_times`] is
//! called by the orchestrator when the reference clock itself must move.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::align::ReferenceProvider;
use crate::error::{AlignError, ConfigError};
use crate::timeline::rewrite_slice;

#[derive(Debug, Clone, Deserialize)]
pub struct SessionInfo {
    #[serde(rename = "SessionDate")]
    pub session_date: String,
    #[serde(rename = "SessionStartTime_UTC")]
    pub session_start_time_utc: String,
    #[serde(rename = "StateMachineVersion", default)]
    pub state_machine_version: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum EventTimes {
    One(f64),
    Many(Vec<f64>),
}

impl EventTimes {
    fn to_vec(&self) -> Vec<f64> {
        match self {
            EventTimes::One(t) => vec![*t],
            EventTimes::Many(v) => v.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RawTrial {
    #[serde(rename = "States", default)]
    states: BTreeMap<String, [Option<f64>; 2]>,
    #[serde(rename = "Events", default)]
    events: BTreeMap<String, EventTimes>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawEvents {
    #[serde(rename = "Trial", default)]
    trial: Vec<RawTrial>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawSession {
    #[serde(rename = "Info", default)]
    info: Option<SessionInfo>,
    #[serde(rename = "TrialStartTimestamp")]
    trial_start: Vec<f64>,
    #[serde(rename = "TrialEndTimestamp")]
    trial_end: Vec<f64>,
    #[serde(rename = "RawEvents", default)]
    raw_events: RawEvents,
    #[serde(rename = "TrialSettings", default)]
    trial_settings: Vec<serde_json::Map<String, serde_json::Value>>,
}

/// One visited state, absolute times.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateInterval {
    pub trial: usize,
    pub state: String,
    pub start_time: f64,
    pub stop_time: f64,
}

/// One input event, absolute time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventRecord {
    pub trial: usize,
    pub event: String,
    pub timestamp: f64,
    pub value: String,
}

/// Behavior-controller device description.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Device {
    pub name: String,
    pub manufacturer: String,
    pub description: Option<String>,
}

/// A loaded behavior log.
#[derive(Debug, Clone)]
pub struct BehaviorLog {
    pub path: PathBuf,
    raw: RawSession,
    trial_start: Vec<f64>,
    trial_end: Vec<f64>,
    shifted_by: Option<f64>,
}

impl BehaviorLog {
    /// Read `path` and pick out `struct_name`.
    pub fn load(path: &Path, struct_name: &str) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("reading behavior log {}", path.display()))?;
        let doc: serde_json::Value = serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing behavior log {}", path.display()))?;
        Self::from_value(path, doc, struct_name)
    }

    pub fn from_value(path: &Path, mut doc: serde_json::Value, struct_name: &str) -> Result<Self> {
        let inner = doc
            .get_mut(struct_name)
            .map(serde_json::Value::take)
            .ok_or_else(|| ConfigError::MissingStruct {
                name: struct_name.to_string(),
                path: path.to_path_buf(),
            })?;
        let raw: RawSession = serde_json::from_value(inner)
            .with_context(|| format!("decoding '{struct_name}' in {}", path.display()))?;

        if raw.trial_start.len() != raw.trial_end.len() {
            return Err(AlignError::LengthMismatch {
                what: "trial start vs stop times".into(),
                left: raw.trial_start.len(),
                right: raw.trial_end.len(),
            }
            .into());
        }
        crate::stream::check_monotonic(
            "TrialStartTimestamp",
            ndarray::ArrayView1::from(&raw.trial_start),
        )?;

        Ok(Self {
            path: path.to_path_buf(),
            trial_start: raw.trial_start.clone(),
            trial_end: raw.trial_end.clone(),
            raw,
            shifted_by: None,
        })
    }

    pub fn n_trials(&self) -> usize {
        self.trial_start.len()
    }

    /// Trial start and stop times in the current (possibly aligned) clock.
    pub fn trial_times(&self) -> (&[f64], &[f64]) {
        (&self.trial_start, &self.trial_end)
    }

    /// Trial times as recorded, ignoring any alignment.
    pub fn original_trial_times(&self) -> (&[f64], &[f64]) {
        (&self.raw.trial_start, &self.raw.trial_end)
    }

    pub fn shifted_by(&self) -> Option<f64> {
        self.shifted_by
    }

    /// Replace trial start / stop times with aligned ones.
    pub fn set_aligned_trial_times(&mut self, starts: Vec<f64>, stops: Vec<f64>) -> Result<()> {
        for (what, got) in [("aligned trial starts", starts.len()), ("aligned trial stops", stops.len())] {
            if got != self.n_trials() {
                return Err(AlignError::LengthMismatch {
                    what: what.into(),
                    left: got,
                    right: self.n_trials(),
                }
                .into());
            }
        }
        self.trial_start = starts;
        self.trial_end = stops;
        Ok(())
    }

    /// Session start as written by the controller (`Info` block).
    pub fn session_start_time(&self) -> Result<NaiveDateTime> {
        let info = self
            .raw
            .info
            .as_ref()
            .ok_or_else(|| ConfigError::MissingField("Info".into()))?;
        let stamp = format!("{}{}", info.session_date, info.session_start_time_utc);
        NaiveDateTime::parse_from_str(&stamp, "%d-%b-%Y%H:%M:%S")
            .with_context(|| format!("parsing session start '{stamp}'"))
    }

    pub fn device(&self) -> Device {
        let description = self
            .raw
            .info
            .as_ref()
            .and_then(|i| i.state_machine_version.as_deref())
            .filter(|v| !v.is_empty())
            .map(|v| format!("State Machine Version: {v}"));
        Device { name: "bpod".into(), manufacturer: "Sanworks".into(), description }
    }

    /// Visited states in absolute time, trial by trial.
    pub fn states(&self) -> Vec<StateInterval> {
        let mut out = Vec::new();
        for (trial, (raw, &t0)) in self.raw.raw_events.trial.iter().zip(&self.trial_start).enumerate() {
            for (name, [start, stop]) in &raw.states {
                let (Some(start), Some(stop)) = (start.filter(|v| !v.is_nan()), stop.filter(|v| !v.is_nan()))
                else {
                    continue;
                };
                out.push(StateInterval {
                    trial,
                    state: name.clone(),
                    start_time: t0 + start,
                    stop_time: t0 + stop,
                });
            }
        }
        out
    }

    /// Input events in absolute time, with their `In`/`Out`/... value.
    pub fn events(&self) -> Vec<EventRecord> {
        self.collect_events(|name| !is_sound_event(name))
    }

    /// Sound output actions (`AudioPlayer*` / `WavePlayer*` events) in absolute time.
    pub fn sound_actions(&self) -> Vec<EventRecord> {
        self.collect_events(is_sound_event)
            .into_iter()
            .map(|e| EventRecord { value: "On".into(), ..e })
            .collect()
    }

    fn collect_events(&self, keep: impl Fn(&str) -> bool) -> Vec<EventRecord> {
        let mut out = Vec::new();
        for (trial, (raw, &t0)) in self.raw.raw_events.trial.iter().zip(&self.trial_start).enumerate() {
            for (name, times) in raw.events.iter().filter(|(n, _)| keep(n)) {
                for t in times.to_vec() {
                    out.push(EventRecord {
                        trial,
                        event: name.clone(),
                        timestamp: t0 + t,
                        value: event_value(name).to_string(),
                    });
                }
            }
        }
        out.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        out
    }

    /// Per-trial task arguments, minus the ones listed in `exclude`.
    ///
    /// Arguments live under each trial's `GUI` map; logs without one are
    /// read flat.  Flag arguments become booleans and `Block` its name.
    pub fn task_arguments(&self, exclude: &[String]) -> Vec<serde_json::Map<String, serde_json::Value>> {
        self.raw
            .trial_settings
            .iter()
            .map(|m| {
                let gui = match m.get("GUI") {
                    Some(serde_json::Value::Object(gui)) => gui,
                    _ => m,
                };
                gui.iter()
                    .filter(|(k, _)| !exclude.contains(k))
                    .map(|(k, v)| (k.clone(), task_argument_value(k, v)))
                    .collect()
            })
            .collect()
    }
}

impl ReferenceProvider for BehaviorLog {
    fn name(&self) -> &str {
        "Behavior"
    }

    fn landmark_times(&self) -> Result<Vec<f64>> {
        Ok(self.trial_start.clone())
    }

    fn nominal_start(&self) -> Result<NaiveDateTime> {
        self.session_start_time()
    }

    fn shift_reference(&mut self, offset: f64) -> Result<()> {
        if self.shifted_by.is_some() {
            return Err(AlignError::AlreadyShifted("Behavior".into()).into());
        }
        let starts = rewrite_slice(&self.trial_start, offset);
        let stops = rewrite_slice(&self.trial_end, offset);
        self.set_aligned_trial_times(starts, stops)?;
        self.shifted_by = Some(offset);
        Ok(())
    }
}

const BOOLEAN_TASK_ARGUMENTS: [&str; 9] = [
    "PunishSound",
    "IsCatch",
    "WarmUp",
    "OverrideNIC",
    "AutoProbCatch",
    "PrevWasViol",
    "changed",
    "CPCue",
    "CycleBlocks",
];

fn task_argument_value(name: &str, v: &serde_json::Value) -> serde_json::Value {
    use serde_json::Value;
    match (name, v.as_f64()) {
        (n, Some(x)) if BOOLEAN_TASK_ARGUMENTS.contains(&n) => Value::Bool(x != 0.0),
        ("Block", Some(x)) => match x as i64 {
            1 => "Test".into(),
            2 => "High".into(),
            3 => "Low".into(),
            _ => v.clone(),
        },
        _ => v.clone(),
    }
}

fn is_sound_event(name: &str) -> bool {
    name.contains("AudioPlayer") || name.contains("WavePlayer")
}

fn event_value(name: &str) -> &str {
    match name {
        "Tup" => "Expired",
        "GlobalTimer1_Start" => "On",
        "GlobalTimer1_End" => "Off",
        n if n.starts_with("Port") && n.ends_with("In") => "In",
        n if n.starts_with("Port") && n.ends_with("Out") => "Out",
        n => n,
    }
}

//! Processed behavior: the lab's per-trial summary of a session.
//!
//! A JSON document keyed by one struct name (`"S"` by default) holding
//! equal-length per-trial columns:
//!
//! ```text
//! S
//!   ├─ Cled          [N][2]   center-port LED on / off, processing clock
//!   ├─ hits, vios, optout     0 / 1 outcomes
//!   ├─ RewardedSide           "L" | "R"
//!   ├─ Block                  1 | 2 | 3
//!   └─ ...                    other numeric or text columns
//! ```
//!
//! Center-port onsets observe the same landmark as the raw log's trial
//! starts.  Matching the two moves the table onto the raw-behavior clock,
//! after which it follows the reference through session alignment.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ndarray::{Array1, Array2};
use serde_json::Value;
use tracing::debug;

use super::EventLandmarks;
use crate::align::{DependentStream, Lock, ReferenceProvider, TriggerProvider};
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::error::{AlignError, ConfigError};
use crate::offset::resolve_with_report;
use crate::stream::Stream;
use crate::timeline::rewrite_slice;

pub const CENTER_PORT_COLUMN: &str = "Cled";
pub const PROCESSED_TRIALS: &str = "processed_trials";
pub const CENTER_POKE_OFFSET: &str = "center_poke_offset_time";
const BOOLEAN_COLUMNS: [&str; 3] = ["hits", "vios", "optout"];

/// A loaded processed-behavior file, still in its own clock.
#[derive(Debug, Clone)]
pub struct ProcessedBehavior {
    pub path: PathBuf,
    /// Center-port LED onsets, one per trial.
    pub center_port: EventLandmarks,
    pub center_port_off: Vec<f64>,
    /// Numeric per-trial columns; flags read as 0 / 1.
    pub numeric: BTreeMap<String, Vec<f64>>,
    /// Text per-trial columns, with side and block codes spelled out.
    pub labels: BTreeMap<String, Vec<String>>,
}

/// The processed trial table on the raw-behavior clock, locked to the
/// reference.
#[derive(Debug, Clone)]
pub struct ProcessedTrials {
    /// Timestamps are center-poke onsets; the first channel is the offset time.
    pub stream: Stream,
    pub labels: BTreeMap<String, Vec<String>>,
    /// Processing clock → raw-behavior clock.
    pub offset: f64,
}

impl ProcessedBehavior {
    pub fn n_trials(&self) -> usize {
        self.center_port_off.len()
    }

    /// Match center-port onsets to the reference landmarks and re-express
    /// every time column in the reference clock.
    ///
    /// Must run before the reference itself is aligned.  A trial count that
    /// differs from the reference is an error; landmark residuals above
    /// `drift_tolerance_s` are reported as [`Diagnostic::ClockDrift`].
    pub fn to_reference_clock(
        &self,
        reference: &dyn ReferenceProvider,
        drift_tolerance_s: f64,
        diagnostics: &mut Diagnostics,
    ) -> Result<ProcessedTrials> {
        let reference_times = reference.landmark_times()?;
        if reference_times.len() != self.n_trials() {
            return Err(AlignError::LengthMismatch {
                what: format!("processed trials of {} vs {} trials", self.path.display(), reference.name()),
                left: self.n_trials(),
                right: reference_times.len(),
            }
            .into());
        }
        let onsets = self.center_port.landmark_times()?;
        let report = resolve_with_report(&reference_times, &onsets)?;
        if report.max_residual > drift_tolerance_s {
            diagnostics.push(Diagnostic::ClockDrift {
                max_residual: report.max_residual,
                pairs: report.pairs_compared,
            });
        }
        let offset = report.offset.seconds();
        debug!(offset, trials = self.n_trials(), "processed behavior matched to raw behavior");

        let mut channels = vec![CENTER_POKE_OFFSET.to_string()];
        let mut columns = vec![rewrite_slice(&self.center_port_off, offset)];
        for (name, values) in &self.numeric {
            channels.push(name.clone());
            columns.push(values.clone());
        }
        let samples = Array2::from_shape_fn((self.n_trials(), columns.len()), |(i, j)| columns[j][i]);
        let stream = Stream::new(PROCESSED_TRIALS, Array1::from(rewrite_slice(&onsets, offset)), samples, channels)?;

        Ok(ProcessedTrials {
            stream,
            labels: self.labels.clone(),
            offset,
        })
    }
}

impl DependentStream for ProcessedTrials {
    fn name(&self) -> &str {
        &self.stream.name
    }

    fn lock(&self) -> Lock {
        Lock::Reference
    }

    fn realign(&mut self, offset: f64) -> Result<()> {
        self.stream.shift(offset)?;
        self.stream.shift_time_channel(CENTER_POKE_OFFSET, offset)
    }
}

pub fn load_processed_behavior(path: &Path, struct_name: &str) -> Result<ProcessedBehavior> {
    if !path.exists() {
        return Err(ConfigError::MissingFile(path.to_path_buf()).into());
    }
    let bytes = std::fs::read(path).with_context(|| format!("reading processed behavior {}", path.display()))?;
    let doc: Value = serde_json::from_slice(&bytes)
        .with_context(|| format!("parsing processed behavior {}", path.display()))?;
    processed_from_value(path, &doc, struct_name)
}

pub fn processed_from_value(path: &Path, doc: &Value, struct_name: &str) -> Result<ProcessedBehavior> {
    let data = doc
        .get(struct_name)
        .and_then(Value::as_object)
        .ok_or_else(|| ConfigError::MissingStruct { name: struct_name.to_string(), path: path.to_path_buf() })?;

    let cled = data
        .get(CENTER_PORT_COLUMN)
        .and_then(Value::as_array)
        .ok_or_else(|| ConfigError::MissingField(format!("{CENTER_PORT_COLUMN} in {}", path.display())))?;
    let pair = |v: &Value, i: usize| v.get(i).and_then(Value::as_f64).unwrap_or(f64::NAN);
    let on: Vec<f64> = cled.iter().map(|v| pair(v, 0)).collect();
    let off: Vec<f64> = cled.iter().map(|v| pair(v, 1)).collect();
    let n = on.len();

    let mut numeric = BTreeMap::new();
    let mut labels = BTreeMap::new();
    for (name, column) in data.iter().filter(|(k, _)| k.as_str() != CENTER_PORT_COLUMN) {
        let Some(values) = column.as_array().filter(|v| v.len() == n) else {
            debug!(column = %name, "not a per-trial column, skipped");
            continue;
        };
        match name.as_str() {
            "RewardedSide" => {
                labels.insert(name.clone(), values.iter().map(side_name).collect());
            }
            "Block" => {
                labels.insert(name.clone(), values.iter().map(block_name).collect());
            }
            _ if values.iter().all(|v| v.is_number() || v.is_boolean() || v.is_null()) => {
                let flag = BOOLEAN_COLUMNS.contains(&name.as_str());
                let col = values
                    .iter()
                    .map(|v| match (v.as_f64(), v.as_bool()) {
                        (Some(x), _) if flag => f64::from(u8::from(x != 0.0)),
                        (Some(x), _) => x,
                        (None, Some(b)) => f64::from(u8::from(b)),
                        (None, None) => f64::NAN,
                    })
                    .collect();
                numeric.insert(name.clone(), col);
            }
            _ if values.iter().all(Value::is_string) => {
                labels.insert(name.clone(), values.iter().map(|v| v.as_str().unwrap_or_default().to_string()).collect());
            }
            _ => debug!(column = %name, "nested per-trial column, skipped"),
        }
    }

    Ok(ProcessedBehavior {
        path: path.to_path_buf(),
        center_port: EventLandmarks::new(CENTER_PORT_COLUMN, on)?,
        center_port_off: off,
        numeric,
        labels,
    })
}

fn side_name(v: &Value) -> String {
    match v.as_str() {
        Some("L") => "Left".into(),
        Some("R") => "Right".into(),
        Some(other) => other.into(),
        None => v.to_string(),
    }
}

fn block_name(v: &Value) -> String {
    match v.as_i64() {
        Some(1) => "Mixed".into(),
        Some(2) => "High".into(),
        Some(3) => "Low".into(),
        _ => v.to_string(),
    }
}

//! Conversion configuration.
//!
//! [`AlignConfig`] holds every tunable parameter of the per-session
//! alignment; [`BatchConfig`] the dataset-wide driver settings.  All fields
//! have defaults matching the lab's acquisition setup, and both structs
//! deserialize from JSON with missing fields falling back to the defaults.
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

use crate::edges::Threshold;

/// Configuration for aligning one session.
///
/// All fields are `pub` so you can construct one with struct-update syntax:
///
/// ```
/// use nwbsync::AlignConfig;
///
/// let cfg = AlignConfig {
///     utc_offset_minutes: 60,     // CET instead of EST
///     ..AlignConfig::default()
/// };
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignConfig {
    /// Top-level struct name in the behavior log.
    ///
    /// Default: `"SessionData"`.
    pub behavior_struct_name: String,

    /// Top-level struct name in the processed behavior file.
    ///
    /// Default: `"S"`.
    pub processed_struct_name: String,

    /// Digital channel carrying the center-port landmark (Doric CSV export).
    ///
    /// Its first rising edge is matched to the first trial start.
    ///
    /// Default: `"DI/O-2"`.
    pub csv_landmark_channel: String,

    /// Digital channel carrying one pulse per camera frame (Doric CSV export).
    ///
    /// Default: `"DI/O-1"`.
    pub csv_camera_channel: String,

    /// Landmark channel in safetensors trace bundles.
    ///
    /// Default: `"DigitalIO/DIO02"`.
    pub trace_landmark_channel: String,

    /// Camera channel in safetensors trace bundles.
    ///
    /// Default: `"DigitalIO/DIO01"`.
    pub trace_camera_channel: String,

    /// Binarization rule for trigger channels.
    ///
    /// Default: [`Threshold::Midpoint`].
    pub threshold: Threshold,

    /// Residual (seconds) above which landmark pairs are reported as drift.
    ///
    /// Drift is reported, never corrected.
    ///
    /// Default: `0.05` s.
    pub drift_tolerance_s: f64,

    /// Offset of the lab's local time from UTC, in minutes.
    ///
    /// The controller writes a naive wall-clock start time; this is the zone
    /// it is interpreted in.
    ///
    /// Default: `-300` (US Eastern, standard time).
    pub utc_offset_minutes: i32,

    /// Task arguments left out of the trial table because they are constant
    /// within a session.
    pub task_arguments_to_exclude: Vec<String>,

    /// Truncate every stream to its first 100 samples.
    ///
    /// Default: `false`.
    pub stub_test: bool,
}

impl Default for AlignConfig {
    fn default() -> Self {
        Self {
            behavior_struct_name: "SessionData".into(),
            processed_struct_name: "S".into(),
            csv_landmark_channel: "DI/O-2".into(),
            csv_camera_channel: "DI/O-1".into(),
            trace_landmark_channel: "DigitalIO/DIO02".into(),
            trace_camera_channel: "DigitalIO/DIO01".into(),
            threshold: Threshold::Midpoint,
            drift_tolerance_s: 0.05,
            utc_offset_minutes: -300,
            task_arguments_to_exclude: [
                "BlockLengthTest",
                "BlockLengthAd",
                "TrialsStage2",
                "TrialsStage3",
                "TrialsStage4",
                "TrialsStage5",
                "TrialsStage6",
                "TrialsStage8",
                "CTrial",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            stub_test: false,
        }
    }
}

impl AlignConfig {
    /// Number of samples kept per stream when [`AlignConfig::stub_test`] is set.
    pub const STUB_SAMPLES: usize = 100;

    /// Lab time zone as a fixed UTC offset.
    pub fn timezone(&self) -> Result<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_minutes * 60)
            .with_context(|| format!("utc offset of {} minutes is out of range", self.utc_offset_minutes))
    }

    pub fn load(path: &Path) -> Result<Self> {
        load_json(path)
    }
}

/// Settings for converting a whole dataset table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Directory receiving one container per session.
    pub output_dir: PathBuf,

    /// Worker threads converting sessions in parallel.
    ///
    /// Default: `1`.
    pub max_workers: usize,

    /// Replace existing outputs instead of skipping those sessions.
    ///
    /// Default: `false`.
    pub overwrite: bool,

    /// Metadata templates, applied in order (later wins).
    ///
    /// Typically the format defaults then the lab-wide editable template.
    pub metadata_templates: Vec<PathBuf>,

    /// Fiber-photometry template used to build per-session fiber metadata.
    pub fiber_template: Option<PathBuf>,

    /// Per-session alignment settings.
    pub align: AlignConfig,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("nwbfiles"),
            max_workers: 1,
            overwrite: false,
            metadata_templates: vec![],
            fiber_template: None,
            align: AlignConfig::default(),
        }
    }
}

impl BatchConfig {
    pub fn load(path: &Path) -> Result<Self> {
        load_json(path)
    }
}

fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = std::fs::read(path).with_context(|| format!("reading config {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parsing config {}", path.display()))
}

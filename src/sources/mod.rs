//! Stream sources.
//!
//! Readers are deliberately thin: each turns one on-disk format into a
//! [`Stream`].  The alignment-facing wrappers here adapt streams to the
//! orchestrator's strategy traits.
//!
//! - [`photometry`]: Doric CSV exports.
//! - [`traces`]: safetensors trace bundles (photometry consoles, ephys sync channels).
//! - [`video`]: movie frame times and pose estimates.
//! - [`processed`]: the processed per-trial behavior table.
//! - [`csv`]: the numeric table reader they share.
pub mod csv;
pub mod photometry;
pub mod processed;
pub mod traces;
pub mod video;

use std::path::Path;

use anyhow::Result;

use crate::align::TriggerProvider;
use crate::config::AlignConfig;
use crate::edges::{edge_times, Threshold};
use crate::error::{AlignError, ConfigError};
use crate::stream::Stream;

pub use photometry::load_doric_csv;
pub use processed::{load_processed_behavior, ProcessedBehavior, ProcessedTrials};
pub use traces::load_trace_bundle;
pub use video::{load_pose, load_video, VideoSource};

/// A recording whose digital channels observe the reference landmarks.
///
/// The landmark channel's first rising edge is matched to the reference's
/// first landmark; the optional camera channel locates video frames.
#[derive(Debug, Clone)]
pub struct TriggeredRecording {
    pub stream: Stream,
    pub landmark_channel: String,
    pub camera_channel: Option<String>,
    pub threshold: Threshold,
}

impl TriggeredRecording {
    pub fn new(stream: Stream, landmark_channel: impl Into<String>, threshold: Threshold) -> Self {
        Self { stream, landmark_channel: landmark_channel.into(), camera_channel: None, threshold }
    }

    pub fn with_camera_channel(mut self, name: impl Into<String>) -> Self {
        self.camera_channel = Some(name.into());
        self
    }
}

impl TriggerProvider for TriggeredRecording {
    fn name(&self) -> &str {
        &self.stream.name
    }

    fn first_timestamp(&self) -> Result<f64> {
        self.stream.first_timestamp().ok_or_else(|| AlignError::EmptySignal.into())
    }

    fn landmark_times(&self) -> Result<Vec<f64>> {
        let ch = self.stream.channel(&self.landmark_channel)?;
        let times = edge_times(&ch, self.threshold)?;
        if times.is_empty() {
            return Err(AlignError::NoEdges(self.landmark_channel.clone()).into());
        }
        Ok(times)
    }

    fn camera_trigger_times(&self) -> Result<Option<Vec<f64>>> {
        let Some(name) = &self.camera_channel else {
            return Ok(None);
        };
        let ch = self.stream.channel(name)?;
        Ok(Some(edge_times(&ch, self.threshold)?))
    }

    fn shift_secondary(&mut self, offset: f64) -> Result<()> {
        self.stream.shift(offset)
    }
}

/// Landmarks already extracted as times (center-port onsets stored in a
/// processed behavior file), with no sample stream behind them.
#[derive(Debug, Clone)]
pub struct EventLandmarks {
    pub name: String,
    pub times: Stream,
}

impl EventLandmarks {
    pub fn new(name: impl Into<String>, times: Vec<f64>) -> Result<Self> {
        let name = name.into();
        let times = Stream::timestamps_only(name.clone(), ndarray::Array1::from(times))?;
        Ok(Self { name, times })
    }
}

impl TriggerProvider for EventLandmarks {
    fn name(&self) -> &str {
        &self.name
    }

    fn first_timestamp(&self) -> Result<f64> {
        self.times.first_timestamp().ok_or_else(|| AlignError::EmptyLandmarks("secondary").into())
    }

    fn landmark_times(&self) -> Result<Vec<f64>> {
        Ok(self.times.timestamps().to_vec())
    }

    fn camera_trigger_times(&self) -> Result<Option<Vec<f64>>> {
        Ok(None)
    }

    fn shift_secondary(&mut self, offset: f64) -> Result<()> {
        self.times.shift(offset)
    }
}

/// Open a secondary recording by extension and wire its trigger channels.
///
/// `.csv` is read as a Doric CSV export, `.safetensors` as a trace bundle.
pub fn open_secondary(path: &Path, cfg: &AlignConfig) -> Result<TriggeredRecording> {
    if !path.exists() {
        return Err(ConfigError::MissingFile(path.to_path_buf()).into());
    }
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let (mut stream, landmark, camera) = match ext {
        "csv" => (
            load_doric_csv(path, photometry::TIME_COLUMN)?,
            &cfg.csv_landmark_channel,
            &cfg.csv_camera_channel,
        ),
        "safetensors" => (
            load_trace_bundle(path, traces::TIME_KEY)?,
            &cfg.trace_landmark_channel,
            &cfg.trace_camera_channel,
        ),
        other => {
            return Err(ConfigError::UnsupportedSource {
                path: path.to_path_buf(),
                reason: format!("extension should be .csv or .safetensors, not '{other}'"),
            }
            .into())
        }
    };
    if cfg.stub_test {
        stream.truncate(AlignConfig::STUB_SAMPLES);
    }
    // fail before alignment if the landmark channel is absent
    stream.channel(landmark)?;
    Ok(TriggeredRecording::new(stream, landmark.clone(), cfg.threshold).with_camera_channel(camera.clone()))
}

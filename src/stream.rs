//! Timestamped sample streams.
//!
//! A [`Stream`] is one modality's `(timestamp, sample)` sequence:
//!
//! ```text
//! timestamps : [T]      f64 seconds, non-decreasing
//! samples    : [T, C]   f64, one row per timestamp
//! channels   : [C]      names
//! ```
//!
//! Timestamps are rewritten only through [`Stream::shift`], which the
//! alignment orchestrator calls at most once per stream per session.
use anyhow::Result;
use ndarray::{Array1, Array2, ArrayView1};

use crate::error::AlignError;
use crate::timeline;

#[derive(Debug, Clone)]
pub struct Stream {
    pub name: String,
    timestamps: Array1<f64>,
    samples: Array2<f64>,
    channels: Vec<String>,
    shifted_by: Option<f64>,
}

impl Stream {
    /// Build a stream, checking shape and monotonicity.
    pub fn new(
        name: impl Into<String>,
        timestamps: Array1<f64>,
        samples: Array2<f64>,
        channels: Vec<String>,
    ) -> Result<Self> {
        let name = name.into();
        if samples.nrows() != timestamps.len() {
            return Err(AlignError::LengthMismatch {
                what: format!("samples vs timestamps of '{name}'"),
                left: samples.nrows(),
                right: timestamps.len(),
            }
            .into());
        }
        if samples.ncols() != channels.len() {
            return Err(AlignError::LengthMismatch {
                what: format!("channels of '{name}'"),
                left: samples.ncols(),
                right: channels.len(),
            }
            .into());
        }
        check_monotonic(&name, timestamps.view())?;
        Ok(Self { name, timestamps, samples, channels, shifted_by: None })
    }

    /// A stream with timestamps only (e.g. video frame times).
    pub fn timestamps_only(name: impl Into<String>, timestamps: Array1<f64>) -> Result<Self> {
        let n = timestamps.len();
        Self::new(name, timestamps, Array2::zeros((n, 0)), vec![])
    }

    pub fn timestamps(&self) -> ArrayView1<'_, f64> {
        self.timestamps.view()
    }

    pub fn samples(&self) -> &Array2<f64> {
        &self.samples
    }

    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn first_timestamp(&self) -> Option<f64> {
        self.timestamps.first().copied()
    }

    /// Offset applied so far, `None` if the stream is still in its native clock.
    pub fn shifted_by(&self) -> Option<f64> {
        self.shifted_by
    }

    /// Look up a channel by exact name.
    pub fn channel(&self, name: &str) -> Result<DigitalChannel<'_>> {
        let idx = self
            .channels
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| AlignError::MissingTriggerChannel(name.to_string()))?;
        Ok(DigitalChannel {
            name: &self.channels[idx],
            timestamps: self.timestamps.view(),
            signal: self.samples.column(idx),
        })
    }

    /// Rewrite the timestamps by `offset` seconds, in place.
    ///
    /// Refuses a second shift: every stream moves onto the session timeline
    /// exactly once.
    pub fn shift(&mut self, offset: f64) -> Result<()> {
        if self.shifted_by.is_some() {
            return Err(AlignError::AlreadyShifted(self.name.clone()).into());
        }
        timeline::rewrite_inplace(&mut self.timestamps, offset);
        self.shifted_by = Some(offset);
        Ok(())
    }

    /// Add `offset` to a channel whose samples are times (e.g. interval ends).
    ///
    /// Only valid alongside [`Stream::shift`]; the channel has no guard of its own.
    pub fn shift_time_channel(&mut self, name: &str, offset: f64) -> Result<()> {
        let idx = self
            .channels
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| AlignError::MissingTriggerChannel(name.to_string()))?;
        self.samples.column_mut(idx).mapv_inplace(|t| t + offset);
        Ok(())
    }

    /// Keep only the first `n` samples (stub conversions).
    pub fn truncate(&mut self, n: usize) {
        let n = n.min(self.len());
        self.timestamps = self.timestamps.slice(ndarray::s![..n]).to_owned();
        self.samples = self.samples.slice(ndarray::s![..n, ..]).to_owned();
    }
}

/// One column of a stream, read as a TTL-like signal.
#[derive(Debug, Clone, Copy)]
pub struct DigitalChannel<'a> {
    pub name: &'a str,
    pub timestamps: ArrayView1<'a, f64>,
    pub signal: ArrayView1<'a, f64>,
}

pub(crate) fn check_monotonic(name: &str, ts: ArrayView1<'_, f64>) -> Result<()> {
    for i in 1..ts.len() {
        if ts[i] < ts[i - 1] {
            return Err(AlignError::NonMonotonic { stream: name.to_string(), index: i }.into());
        }
    }
    Ok(())
}

//! Rising-edge detection on TTL-like trigger channels.
//!
//! Algorithm (consecutive-sample rule, no smoothing or debouncing):
//!   1. Pick a threshold: fixed, or halfway between the signal's min and max.
//!   2. Binarize: `high[i] = signal[i] >= threshold`.
//!   3. Edge at `i` (i ≥ 1) when `!high[i-1] && high[i]`.
//!
//! A signal that is high at index 0 does not produce an edge there, and a
//! constant signal produces none.  The raw signal must already be clean.
use anyhow::Result;
use ndarray::ArrayView1;

use crate::error::AlignError;
use crate::stream::DigitalChannel;

/// Threshold rule for binarizing a trigger signal.
#[derive(Debug, Clone, Copy, PartialEq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Threshold {
    /// Fixed level, in signal units.
    Fixed(f64),
    /// `(min + max) / 2` of the signal.
    #[default]
    Midpoint,
}

impl Threshold {
    fn level(self, signal: ArrayView1<'_, f64>) -> Option<f64> {
        match self {
            Threshold::Fixed(v) => Some(v),
            Threshold::Midpoint => {
                let (lo, hi) = signal
                    .iter()
                    .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
                // constant signal: nothing can cross
                if hi > lo { Some(0.5 * (lo + hi)) } else { None }
            }
        }
    }
}

/// Indices where `signal` goes from low to high.
///
/// Errors on an empty signal.  No transitions is `Ok(vec![])`.
pub fn rising_edges(signal: ArrayView1<'_, f64>, threshold: Threshold) -> Result<Vec<usize>> {
    if signal.is_empty() {
        return Err(AlignError::EmptySignal.into());
    }
    let Some(level) = threshold.level(signal) else {
        return Ok(vec![]);
    };
    let mut edges = Vec::new();
    let mut prev_high = signal[0] >= level;
    for (i, &v) in signal.iter().enumerate().skip(1) {
        let high = v >= level;
        if high && !prev_high {
            edges.push(i);
        }
        prev_high = high;
    }
    Ok(edges)
}

/// Timestamps of every rising edge of `channel`.
pub fn edge_times(channel: &DigitalChannel<'_>, threshold: Threshold) -> Result<Vec<f64>> {
    if channel.timestamps.len() != channel.signal.len() {
        return Err(AlignError::LengthMismatch {
            what: format!("timestamps vs signal of '{}'", channel.name),
            left: channel.timestamps.len(),
            right: channel.signal.len(),
        }
        .into());
    }
    let idx = rising_edges(channel.signal, threshold)?;
    Ok(idx.into_iter().map(|i| channel.timestamps[i]).collect())
}

/// Timestamp of the first rising edge; no edge at all is an error.
pub fn first_edge_time(channel: &DigitalChannel<'_>, threshold: Threshold) -> Result<f64> {
    edge_times(channel, threshold)?
        .first()
        .copied()
        .ok_or_else(|| AlignError::NoEdges(channel.name.to_string()).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array1};

    #[test]
    fn classic_pattern() {
        let s = array![0.0, 0.0, 1.0, 1.0, 0.0, 1.0];
        assert_eq!(rising_edges(s.view(), Threshold::Midpoint).unwrap(), vec![2, 5]);
    }

    #[test]
    fn high_at_start_is_not_an_edge() {
        let s = array![1.0, 1.0, 0.0, 1.0];
        assert_eq!(rising_edges(s.view(), Threshold::Midpoint).unwrap(), vec![3]);
    }

    #[test]
    fn constant_signal_has_no_edges() {
        let s = Array1::from_elem(64, 5.0);
        assert!(rising_edges(s.view(), Threshold::Midpoint).unwrap().is_empty());
    }

    #[test]
    fn empty_signal_is_an_error() {
        let s: Array1<f64> = Array1::zeros(0);
        assert!(rising_edges(s.view(), Threshold::Midpoint).is_err());
    }

    #[test]
    fn fixed_threshold_on_analog_levels() {
        // 0 V / 5 V TTL with a little noise on the floor.
        let s = array![0.1, 0.2, 4.9, 5.0, 0.05, 0.3, 4.8];
        assert_eq!(rising_edges(s.view(), Threshold::Fixed(2.5)).unwrap(), vec![2, 6]);
    }

    #[test]
    fn first_edge_time_errors_without_edges() {
        let ts = array![0.0, 1.0, 2.0];
        let sig = array![0.0, 0.0, 0.0];
        let ch = DigitalChannel { name: "DI/O-2", timestamps: ts.view(), signal: sig.view() };
        let err = first_edge_time(&ch, Threshold::Midpoint).unwrap_err();
        assert!(matches!(err.downcast_ref::<AlignError>(), Some(AlignError::NoEdges(_))));
    }

    #[test]
    fn edge_times_index_into_timestamps() {
        let ts = array![10.0, 10.5, 11.0, 11.5, 12.0, 12.5];
        let sig = array![0.0, 0.0, 1.0, 1.0, 0.0, 1.0];
        let ch = DigitalChannel { name: "cam", timestamps: ts.view(), signal: sig.view() };
        assert_eq!(edge_times(&ch, Threshold::Midpoint).unwrap(), vec![11.0, 12.5]);
    }
}

//! Clock offset resolution.
//!
//! ```text
//! offset = reference[0] - secondary[0]
//! ```
//!
//! Both lists must describe the *same* real-world landmark (e.g. the first
//! center-port entry) seen through two clocks.  Only the first pair defines
//! the offset; the remaining pairs are compared against it to report drift,
//! which is never corrected.
use anyhow::Result;
use serde::Serialize;

use crate::error::AlignError;

/// Seconds to add to the secondary clock to land on the reference clock.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
pub struct ClockOffset(pub f64);

impl ClockOffset {
    pub fn seconds(self) -> f64 {
        self.0
    }
}

/// Resolve the offset from the first landmark of each list.
pub fn resolve_offset(reference: &[f64], secondary: &[f64]) -> Result<ClockOffset> {
    let r = reference.first().ok_or(AlignError::EmptyLandmarks("reference"))?;
    let s = secondary.first().ok_or(AlignError::EmptyLandmarks("secondary"))?;
    Ok(ClockOffset(r - s))
}

/// Offset plus how well the remaining landmark pairs agree with it.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct OffsetReport {
    pub offset: ClockOffset,
    /// Number of `(reference[i], secondary[i])` pairs compared.
    pub pairs_compared: usize,
    /// `max |reference[i] - (secondary[i] + offset)|` over those pairs.
    pub max_residual: f64,
    pub reference_count: usize,
    pub secondary_count: usize,
}

impl OffsetReport {
    pub fn counts_match(&self) -> bool {
        self.reference_count == self.secondary_count
    }
}

/// [`resolve_offset`] and a residual summary over the first `min(len)` pairs.
pub fn resolve_with_report(reference: &[f64], secondary: &[f64]) -> Result<OffsetReport> {
    let offset = resolve_offset(reference, secondary)?;
    let pairs = reference.len().min(secondary.len());
    let max_residual = reference
        .iter()
        .zip(secondary)
        .map(|(r, s)| (r - (s + offset.0)).abs())
        .fold(0.0_f64, f64::max);
    Ok(OffsetReport {
        offset,
        pairs_compared: pairs,
        max_residual,
        reference_count: reference.len(),
        secondary_count: secondary.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovers_planted_offset() {
        for &k in &[-1234.5, -10.0, 0.0, 0.001, 97.0, 86_400.25] {
            let secondary = [3.0, 8.0, 13.0];
            let reference: Vec<f64> = secondary.iter().map(|s| s + k).collect();
            assert_eq!(resolve_offset(&reference, &secondary).unwrap(), ClockOffset(k));
        }
    }

    #[test]
    fn only_the_first_pair_counts() {
        let off = resolve_offset(&[100.0, 999.0], &[3.0, 0.0]).unwrap();
        assert_eq!(off.seconds(), 97.0);
    }

    #[test]
    fn empty_inputs_are_errors() {
        assert!(resolve_offset(&[], &[1.0]).is_err());
        assert!(resolve_offset(&[1.0], &[]).is_err());
    }

    #[test]
    fn report_measures_residual() {
        let r = resolve_with_report(&[100.0, 105.0, 110.2], &[3.0, 8.0, 13.0]).unwrap();
        assert_eq!(r.offset, ClockOffset(97.0));
        assert_eq!(r.pairs_compared, 3);
        approx::assert_abs_diff_eq!(r.max_residual, 0.2, epsilon = 1e-9);
        assert!(r.counts_match());
    }
}

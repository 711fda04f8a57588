//! Timestamp rewriting.
//!
//! `new[i] = old[i] + offset` — same length, same spacing.
//!
//! [`rewrite`] is pure; applying it twice shifts twice.  The one-shift-per-
//! stream rule lives in [`crate::stream::Stream::shift`] and the orchestrator.
use ndarray::{Array1, ArrayView1};

/// Return `timestamps + offset` as a new array.
pub fn rewrite(timestamps: ArrayView1<'_, f64>, offset: f64) -> Array1<f64> {
    timestamps.mapv(|t| t + offset)
}

/// Add `offset` to every element of `timestamps`.
pub fn rewrite_inplace(timestamps: &mut Array1<f64>, offset: f64) {
    timestamps.mapv_inplace(|t| t + offset);
}

/// `rewrite` for plain slices (trial tables, landmark lists).
pub fn rewrite_slice(times: &[f64], offset: f64) -> Vec<f64> {
    times.iter().map(|&t| t + offset).collect()
}

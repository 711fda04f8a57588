//! Per-session diagnostics.
//!
//! Non-fatal conditions (an optional stream that is absent, a clock that
//! drifts more than expected under the constant-offset model) are recorded
//! as typed [`Diagnostic`] values on the session's [`Diagnostics`] list
//! instead of going through a process-wide warning filter.  Every push is
//! also logged with `tracing::warn!`.
use serde::Serialize;
use std::fmt;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// An optional stream was not provided or could not be used.
    OptionalStreamSkipped { stream: String, reason: String },
    /// Landmark pairs disagree with the resolved offset by more than the
    /// configured tolerance.
    ClockDrift { max_residual: f64, pairs: usize },
    /// Reference and secondary landmark lists have different lengths.
    LandmarkCountMismatch { reference: usize, secondary: usize },
    /// A subject registry field was missing.
    MissingSubjectField { field: String },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::OptionalStreamSkipped { stream, reason } => {
                write!(f, "optional stream '{stream}' skipped: {reason}")
            }
            Diagnostic::ClockDrift { max_residual, pairs } => write!(
                f,
                "landmark residual up to {max_residual:.6} s over {pairs} pairs (constant offset kept)"
            ),
            Diagnostic::LandmarkCountMismatch { reference, secondary } => write!(
                f,
                "reference has {reference} landmarks, secondary has {secondary}"
            ),
            Diagnostic::MissingSubjectField { field } => {
                write!(f, "subject field '{field}' is missing")
            }
        }
    }
}

/// Ordered list of diagnostics collected while converting one session.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, d: Diagnostic) {
        warn!("{d}");
        self.items.push(d);
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter()
    }

    /// Human-readable block for the error / report file.
    pub fn render(&self) -> String {
        self.items
            .iter()
            .map(|d| format!("  - {d}\n"))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_lists_every_item() {
        let mut d = Diagnostics::new();
        d.push(Diagnostic::OptionalStreamSkipped {
            stream: "Video".into(),
            reason: "not provided".into(),
        });
        d.push(Diagnostic::ClockDrift { max_residual: 0.25, pairs: 12 });
        let text = d.render();
        assert_eq!(d.len(), 2);
        assert!(text.contains("'Video' skipped"));
        assert!(text.contains("12 pairs"));
    }

    #[test]
    fn serializes_with_kind_tag() {
        let v = serde_json::to_value(Diagnostic::MissingSubjectField { field: "sex".into() }).unwrap();
        assert_eq!(v["kind"], "missing_subject_field");
        assert_eq!(v["field"], "sex");
    }
}

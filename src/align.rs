//! Session alignment orchestrator.
//!
//! Puts every stream of one session onto a single non-negative timeline.
//!
//! # Stages
//!
//! ```text
//! SessionAligner      (Unaligned)
//!   │ resolve()       landmarks → ClockOffset
//!   ▼
//! OffsetResolved
//!   │ rewrite()       AlignmentPlan::choose → shift reference *or* secondary,
//!   ▼                 re-anchor camera-locked streams
//! Rewritten
//!   │ finalize()      session start = reference start (+ offset if reference moved)
//!   ▼
//! Finalized
//! ```
//!
//! Each stage consumes the previous one, so a stream cannot be rewritten
//! before the offset exists, nor twice.
//!
//! # Plan
//!
//! The output container requires non-negative times from the session start.
//! If the secondary stream's first timestamp would become negative after the
//! shift (`secondary_first + offset < 0`), the reference is moved by
//! `+offset` instead ([`AlignmentPlan::AnchorReference`]); otherwise the
//! secondary moves ([`AlignmentPlan::AnchorSecondary`]).
use anyhow::Result;
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeDelta};
use serde::Serialize;
use tracing::{debug, info};

use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::error::AlignError;
use crate::offset::{resolve_with_report, ClockOffset, OffsetReport};
use crate::stream::Stream;

// ── Strategy traits ───────────────────────────────────────────────────────

/// The most-trusted clock of a session (usually the behavior controller).
pub trait ReferenceProvider {
    fn name(&self) -> &str;
    /// Landmark times in the reference clock; the first one is matched.
    fn landmark_times(&self) -> Result<Vec<f64>>;
    /// Wall-clock start of the reference recording.
    fn nominal_start(&self) -> Result<NaiveDateTime>;
    /// Move every reference-clock time by `offset` seconds.
    fn shift_reference(&mut self, offset: f64) -> Result<()>;
}

/// A secondary clock that observes the same landmarks (photometry, ephys, ...).
pub trait TriggerProvider {
    fn name(&self) -> &str;
    /// First timestamp of the secondary stream in its native clock.
    fn first_timestamp(&self) -> Result<f64>;
    /// Landmark times in the secondary clock.
    fn landmark_times(&self) -> Result<Vec<f64>>;
    /// Camera-frame trigger times in the secondary clock, if a camera
    /// channel is recorded.
    fn camera_trigger_times(&self) -> Result<Option<Vec<f64>>>;
    /// Move every secondary-clock time by `offset` seconds.
    fn shift_secondary(&mut self, offset: f64) -> Result<()>;
}

/// Which clock a dependent stream's timestamps are expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Lock {
    /// Already in the reference clock (e.g. processed trial tables).
    Reference,
    /// In the secondary clock (e.g. a second acquisition stream on the same console).
    Secondary,
    /// Relative to the first camera trigger (video frames, pose estimates).
    Camera,
}

/// A stream rewritten as a consequence of alignment.
pub trait DependentStream {
    fn name(&self) -> &str;
    fn lock(&self) -> Lock;
    /// Add `offset` seconds to every timestamp.  Called at most once.
    fn realign(&mut self, offset: f64) -> Result<()>;
}

/// A [`Stream`] tagged with the clock it is locked to.
///
/// Camera-locked streams hold frame times relative to the first frame
/// (starting near 0); realigning adds the camera anchor.
#[derive(Debug, Clone)]
pub struct LockedStream {
    pub stream: Stream,
    pub lock: Lock,
}

impl LockedStream {
    pub fn new(stream: Stream, lock: Lock) -> Self {
        Self { stream, lock }
    }
}

impl DependentStream for LockedStream {
    fn name(&self) -> &str {
        &self.stream.name
    }

    fn lock(&self) -> Lock {
        self.lock
    }

    fn realign(&mut self, offset: f64) -> Result<()> {
        self.stream.shift(offset)
    }
}

// ── Plan ──────────────────────────────────────────────────────────────────

/// Which side of the session moves.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum AlignmentPlan {
    /// Shift the reference (and reference-locked streams) by `+offset`;
    /// the secondary keeps its native timestamps.
    AnchorReference(ClockOffset),
    /// Shift the secondary (and secondary-locked streams) by `+offset`;
    /// the reference keeps its native timestamps.
    AnchorSecondary(ClockOffset),
}

impl AlignmentPlan {
    /// Pick the plan that keeps every timestamp non-negative.
    pub fn choose(secondary_first: f64, offset: ClockOffset) -> Self {
        if secondary_first + offset.seconds() < 0.0 {
            AlignmentPlan::AnchorReference(offset)
        } else {
            AlignmentPlan::AnchorSecondary(offset)
        }
    }

    pub fn offset(self) -> ClockOffset {
        match self {
            AlignmentPlan::AnchorReference(o) | AlignmentPlan::AnchorSecondary(o) => o,
        }
    }

    /// Offset applied to streams locked to `lock`, or `None` if they stay put.
    /// Camera-locked streams are handled separately.
    fn shift_for(self, lock: Lock) -> Option<f64> {
        match (self, lock) {
            (AlignmentPlan::AnchorReference(o), Lock::Reference) => Some(o.seconds()),
            (AlignmentPlan::AnchorSecondary(o), Lock::Secondary) => Some(o.seconds()),
            _ => None,
        }
    }
}

/// Observable stage of an alignment run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AlignmentStage {
    Unaligned,
    OffsetResolved,
    Rewritten,
    Finalized,
}

// ── Stages ────────────────────────────────────────────────────────────────

/// Alignment inputs for one session, in the `Unaligned` stage.
pub struct SessionAligner<'a> {
    reference: &'a mut dyn ReferenceProvider,
    secondary: &'a mut dyn TriggerProvider,
    dependents: Vec<&'a mut dyn DependentStream>,
    drift_tolerance_s: f64,
    diagnostics: &'a mut Diagnostics,
}

impl<'a> SessionAligner<'a> {
    pub fn new(
        reference: &'a mut dyn ReferenceProvider,
        secondary: &'a mut dyn TriggerProvider,
        diagnostics: &'a mut Diagnostics,
    ) -> Self {
        Self {
            reference,
            secondary,
            dependents: Vec::new(),
            drift_tolerance_s: f64::INFINITY,
            diagnostics,
        }
    }

    /// Register a stream that follows one of the two clocks.
    pub fn with_dependent(mut self, stream: &'a mut dyn DependentStream) -> Self {
        self.dependents.push(stream);
        self
    }

    /// Report landmark residuals above `seconds` as [`Diagnostic::ClockDrift`].
    pub fn with_drift_tolerance(mut self, seconds: f64) -> Self {
        self.drift_tolerance_s = seconds;
        self
    }

    pub fn stage(&self) -> AlignmentStage {
        AlignmentStage::Unaligned
    }

    /// `Unaligned → OffsetResolved`.
    pub fn resolve(self) -> Result<OffsetResolved<'a>> {
        let reference_times = self.reference.landmark_times()?;
        let secondary_times = self.secondary.landmark_times()?;
        let report = resolve_with_report(&reference_times, &secondary_times)?;
        let secondary_first = self.secondary.first_timestamp()?;

        debug!(
            reference = self.reference.name(),
            secondary = self.secondary.name(),
            offset = report.offset.seconds(),
            max_residual = report.max_residual,
            "clock offset resolved"
        );
        if !report.counts_match() {
            self.diagnostics.push(Diagnostic::LandmarkCountMismatch {
                reference: report.reference_count,
                secondary: report.secondary_count,
            });
        }
        if report.max_residual > self.drift_tolerance_s {
            self.diagnostics.push(Diagnostic::ClockDrift {
                max_residual: report.max_residual,
                pairs: report.pairs_compared,
            });
        }

        Ok(OffsetResolved { inner: self, report, secondary_first })
    }
}

/// `OffsetResolved` stage: the offset exists, nothing has moved yet.
pub struct OffsetResolved<'a> {
    inner: SessionAligner<'a>,
    report: OffsetReport,
    secondary_first: f64,
}

impl<'a> OffsetResolved<'a> {
    pub fn stage(&self) -> AlignmentStage {
        AlignmentStage::OffsetResolved
    }

    pub fn report(&self) -> &OffsetReport {
        &self.report
    }

    pub fn plan(&self) -> AlignmentPlan {
        AlignmentPlan::choose(self.secondary_first, self.report.offset)
    }

    /// `OffsetResolved → Rewritten`: apply the plan to every stream once.
    pub fn rewrite(self) -> Result<Rewritten<'a>> {
        let plan = self.plan();
        let offset = plan.offset().seconds();
        let SessionAligner { reference, secondary, mut dependents, diagnostics, .. } = self.inner;

        // camera triggers are read before the secondary moves, and only when
        // a camera-locked stream needs them
        let camera_native = if dependents.iter().any(|d| d.lock() == Lock::Camera) {
            secondary.camera_trigger_times()?
        } else {
            None
        };

        match plan {
            AlignmentPlan::AnchorReference(_) => reference.shift_reference(offset)?,
            AlignmentPlan::AnchorSecondary(_) => secondary.shift_secondary(offset)?,
        }
        info!(plan = ?plan, secondary = secondary.name(), "timestamps rewritten");

        let camera_anchor = match camera_native.as_deref() {
            Some([first, ..]) => Some(match plan {
                AlignmentPlan::AnchorReference(_) => *first,
                AlignmentPlan::AnchorSecondary(_) => first + offset,
            }),
            _ => None,
        };

        let mut rewritten = Vec::new();
        for dep in dependents.iter_mut() {
            let shift = match dep.lock() {
                Lock::Camera => match (camera_native.as_deref(), camera_anchor) {
                    (_, Some(anchor)) => Some(anchor),
                    (Some(_), None) => {
                        return Err(AlignError::NoEdges(format!("camera trigger for '{}'", dep.name())).into())
                    }
                    (None, None) => {
                        return Err(AlignError::MissingTriggerChannel(format!(
                            "camera trigger for '{}'",
                            dep.name()
                        ))
                        .into())
                    }
                },
                lock => plan.shift_for(lock),
            };
            if let Some(shift) = shift {
                dep.realign(shift)?;
                debug!(stream = dep.name(), shift, "dependent stream realigned");
                rewritten.push(dep.name().to_string());
            }
        }

        Ok(Rewritten {
            reference,
            report: self.report,
            plan,
            camera_anchor,
            rewritten,
            diagnostics,
        })
    }
}

/// `Rewritten` stage: every stream is on the shared timeline.
pub struct Rewritten<'a> {
    reference: &'a mut dyn ReferenceProvider,
    report: OffsetReport,
    plan: AlignmentPlan,
    camera_anchor: Option<f64>,
    rewritten: Vec<String>,
    diagnostics: &'a mut Diagnostics,
}

impl<'a> Rewritten<'a> {
    pub fn stage(&self) -> AlignmentStage {
        AlignmentStage::Rewritten
    }

    pub fn plan(&self) -> AlignmentPlan {
        self.plan
    }

    /// `Rewritten → Finalized`: fix the session start time.
    pub fn finalize(self, timezone: FixedOffset) -> Result<Finalized> {
        let nominal = self.reference.nominal_start()?;
        let start = session_start(nominal, self.plan)?;
        let session_start_time = start
            .and_local_timezone(timezone)
            .single()
            .ok_or_else(|| anyhow::anyhow!("session start {start} is ambiguous in {timezone}"))?;
        info!(%session_start_time, diagnostics = self.diagnostics.len(), "alignment finalized");
        Ok(Finalized {
            plan: self.plan,
            report: self.report,
            camera_anchor: self.camera_anchor,
            rewritten: self.rewritten,
            session_start_time,
        })
    }
}

/// Result of a completed alignment.
#[derive(Debug, Clone, Serialize)]
pub struct Finalized {
    pub plan: AlignmentPlan,
    pub report: OffsetReport,
    /// Time of the first camera trigger on the shared timeline.
    pub camera_anchor: Option<f64>,
    /// Dependent streams that were rewritten, in registration order.
    pub rewritten: Vec<String>,
    pub session_start_time: DateTime<FixedOffset>,
}

impl Finalized {
    pub fn stage(&self) -> AlignmentStage {
        AlignmentStage::Finalized
    }
}

/// Reference start, moved by the offset only when the reference was shifted.
pub fn session_start(nominal: NaiveDateTime, plan: AlignmentPlan) -> Result<NaiveDateTime> {
    match plan {
        AlignmentPlan::AnchorSecondary(_) => Ok(nominal),
        AlignmentPlan::AnchorReference(o) => {
            let micros = (o.seconds() * 1e6).round() as i64;
            nominal
                .checked_add_signed(TimeDelta::microseconds(micros))
                .ok_or_else(|| anyhow::anyhow!("session start {nominal} + {} s overflows", o.seconds()))
        }
    }
}

/// Run all stages in one call.
pub fn align_session<'a>(
    reference: &'a mut dyn ReferenceProvider,
    secondary: &'a mut dyn TriggerProvider,
    dependents: Vec<&'a mut dyn DependentStream>,
    drift_tolerance_s: f64,
    timezone: FixedOffset,
    diagnostics: &'a mut Diagnostics,
) -> Result<Finalized> {
    let mut aligner =
        SessionAligner::new(reference, secondary, diagnostics).with_drift_tolerance(drift_tolerance_s);
    for d in dependents {
        aligner = aligner.with_dependent(d);
    }
    aligner.resolve()?.rewrite()?.finalize(timezone)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn negative_shift_past_zero_anchors_reference() {
        let plan = AlignmentPlan::choose(-5.0, ClockOffset(-10.0));
        assert_eq!(plan, AlignmentPlan::AnchorReference(ClockOffset(-10.0)));
    }

    #[test]
    fn positive_offset_anchors_secondary() {
        let plan = AlignmentPlan::choose(-5.0, ClockOffset(2.0));
        assert_eq!(plan, AlignmentPlan::AnchorSecondary(ClockOffset(2.0)));
    }

    #[test]
    fn zero_offset_and_small_negative_anchor_secondary() {
        assert!(matches!(AlignmentPlan::choose(0.0, ClockOffset(0.0)), AlignmentPlan::AnchorSecondary(_)));
        assert!(matches!(AlignmentPlan::choose(20.0, ClockOffset(-3.0)), AlignmentPlan::AnchorSecondary(_)));
        assert!(matches!(AlignmentPlan::choose(3.0, ClockOffset(-3.0)), AlignmentPlan::AnchorSecondary(_)));
    }

    #[test]
    fn shift_for_only_moves_the_anchored_side() {
        let r = AlignmentPlan::AnchorReference(ClockOffset(-4.0));
        assert_eq!(r.shift_for(Lock::Reference), Some(-4.0));
        assert_eq!(r.shift_for(Lock::Secondary), None);
        let s = AlignmentPlan::AnchorSecondary(ClockOffset(4.0));
        assert_eq!(s.shift_for(Lock::Reference), None);
        assert_eq!(s.shift_for(Lock::Secondary), Some(4.0));
    }

    #[test]
    fn session_start_moves_only_with_reference() {
        let t0 = NaiveDate::from_ymd_opt(2023, 8, 9).unwrap().and_hms_opt(13, 12, 16).unwrap();
        let s = session_start(t0, AlignmentPlan::AnchorSecondary(ClockOffset(-2.5))).unwrap();
        assert_eq!(s, t0);
        let r = session_start(t0, AlignmentPlan::AnchorReference(ClockOffset(-2.5))).unwrap();
        assert_eq!(r.to_string(), "2023-08-09 13:12:13.500");
    }
}

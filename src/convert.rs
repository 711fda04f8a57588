//! One-session conversion.
//!
//! ```text
//! ConversionRequest
//!   │  BehaviorLog::load          reference clock (trial starts)
//!   │  open_secondary             photometry / ephys trigger recording
//!   │  load_video / load_pose     optional, camera-locked
//!   │  load_processed_behavior    optional, matched to the raw log, reference-locked
//!   ▼
//! SessionAligner ─ resolve ─ rewrite ─ finalize
//!   ▼
//! metadata layers ⊕ session fields ⊕ fiber synthesis
//!   ▼
//! SessionContainer ─ ContainerWriter::write → sub-<subject>_ses-<session>.nwb
//! ```
//!
//! Nothing is written unless every step succeeds.
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};

use crate::align::SessionAligner;
use crate::behavior::BehaviorLog;
use crate::config::AlignConfig;
use crate::container::{ContainerWriter, SessionContainer};
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::metadata::{fiber_photometry_metadata, load_template, merge_layers};
use crate::session::{parse_session_date, Session};
use crate::sources::{load_pose, load_processed_behavior, load_video, open_secondary};
use crate::table::{FiberRow, SessionEntry};

/// Subject fields expected after template merging.
const SUBJECT_FIELDS: [&str; 2] = ["species", "sex"];

/// Input files and identity of one session.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionRequest {
    pub behavior_path: PathBuf,
    pub secondary_path: PathBuf,
    pub video_path: Option<PathBuf>,
    pub pose_path: Option<PathBuf>,
    pub processed_behavior_path: Option<PathBuf>,
    /// Overrides the identity parsed from the behavior-log file name.
    pub subject_id: Option<String>,
    pub session_id: Option<String>,
    pub fibers: Vec<FiberRow>,
}

impl ConversionRequest {
    pub fn new(behavior_path: impl Into<PathBuf>, secondary_path: impl Into<PathBuf>) -> Self {
        Self {
            behavior_path: behavior_path.into(),
            secondary_path: secondary_path.into(),
            video_path: None,
            pose_path: None,
            processed_behavior_path: None,
            subject_id: None,
            session_id: None,
            fibers: Vec::new(),
        }
    }

    pub fn with_video(mut self, video: impl Into<PathBuf>) -> Self {
        self.video_path = Some(video.into());
        self
    }

    pub fn with_pose(mut self, pose: impl Into<PathBuf>) -> Self {
        self.pose_path = Some(pose.into());
        self
    }

    pub fn with_processed_behavior(mut self, path: impl Into<PathBuf>) -> Self {
        self.processed_behavior_path = Some(path.into());
        self
    }

    pub fn from_entry(entry: &SessionEntry) -> Self {
        Self {
            behavior_path: entry.bpod_file_path.clone(),
            secondary_path: entry.raw_fiber_photometry_file_path.clone(),
            video_path: entry.video_file_path.clone(),
            pose_path: entry.dlc_file_path.clone(),
            processed_behavior_path: entry.processed_behavior_file_path.clone(),
            subject_id: Some(entry.subject_id.clone()),
            session_id: Some(entry.session_id.clone()),
            fibers: entry.fibers.clone(),
        }
    }

    /// Session identity: explicit ids when both are set, else the behavior-log stem.
    pub fn session(&self) -> Result<Session> {
        match (&self.subject_id, &self.session_id) {
            (Some(subject), Some(session)) => {
                let date = parse_session_date(session)?;
                let protocol = Session::from_behavior_path(&self.behavior_path)
                    .map(|s| s.protocol)
                    .unwrap_or_default();
                Ok(Session::new(subject.clone(), session.clone(), protocol, date))
            }
            _ => Session::from_behavior_path(&self.behavior_path),
        }
    }
}

/// Template files merged under the session-computed metadata.
#[derive(Debug, Clone, Default)]
pub struct Templates {
    pub layers: Vec<PathBuf>,
    pub fiber: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Written,
    /// Output existed and overwriting was off.
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversionReport {
    pub output_path: PathBuf,
    pub outcome: Outcome,
    pub alignment: Option<crate::align::Finalized>,
}

/// Convert one session into `output_dir`.
///
/// Diagnostics are pushed onto `diagnostics` as they arise, so the caller
/// still has them when the conversion fails.
pub fn convert_session(
    request: &ConversionRequest,
    output_dir: &Path,
    overwrite: bool,
    cfg: &AlignConfig,
    templates: &Templates,
    writer: &dyn ContainerWriter,
    diagnostics: &mut Diagnostics,
) -> Result<ConversionReport> {
    let session = request.session()?;
    let output_path = session.output_path(output_dir);
    if output_path.exists() && !overwrite {
        info!(path = %output_path.display(), "output exists, skipping");
        return Ok(ConversionReport { output_path, outcome: Outcome::Skipped, alignment: None });
    }
    info!(subject = %session.subject_id, session = %session.session_id, "converting session");

    let mut behavior = BehaviorLog::load(&request.behavior_path, &cfg.behavior_struct_name)?;
    let mut secondary = open_secondary(&request.secondary_path, cfg)
        .with_context(|| format!("opening {}", request.secondary_path.display()))?;

    let mut video = request.video_path.as_deref().map(load_video).transpose()?;
    let mut pose = match (request.pose_path.as_deref(), video.as_ref()) {
        (Some(p), Some(v)) => Some(load_pose(p, v)?),
        (Some(p), None) => {
            diagnostics.push(Diagnostic::OptionalStreamSkipped {
                stream: "PoseEstimation".into(),
                reason: format!("{} has no video to take frame times from", p.display()),
            });
            None
        }
        (None, _) => None,
    };
    if video.is_none() {
        debug!("no video for this session");
    }
    // matched against the raw log before the reference can move
    let mut processed = match request.processed_behavior_path.as_deref() {
        Some(p) => Some(
            load_processed_behavior(p, &cfg.processed_struct_name)?
                .to_reference_clock(&behavior, cfg.drift_tolerance_s, diagnostics)?,
        ),
        None => None,
    };

    let alignment = {
        let mut aligner = SessionAligner::new(&mut behavior, &mut secondary, diagnostics)
            .with_drift_tolerance(cfg.drift_tolerance_s);
        if let Some(v) = video.as_mut() {
            aligner = aligner.with_dependent(&mut v.frames);
        }
        if let Some(p) = pose.as_mut() {
            aligner = aligner.with_dependent(p);
        }
        if let Some(p) = processed.as_mut() {
            aligner = aligner.with_dependent(p);
        }
        aligner.resolve()?.rewrite()?.finalize(cfg.timezone()?)?
    };

    let device = behavior.device();
    let session_layer = json!({
        "NWBFile": {
            "session_id": session.session_id,
            "session_start_time": alignment.session_start_time.to_rfc3339(),
            "protocol": session.protocol,
        },
        "Subject": { "subject_id": session.subject_id },
        "Behavior": {
            "Device": device,
            "TaskArguments": behavior.task_arguments(&cfg.task_arguments_to_exclude),
        },
    });
    let mut metadata = merge_layers(&templates.layers, session_layer)?;
    if let (Some(path), false) = (&templates.fiber, request.fibers.is_empty()) {
        let fiber = fiber_photometry_metadata(&load_template(path)?, &request.fibers, &path.display().to_string())?;
        crate::metadata::deep_merge(&mut metadata, fiber);
    }
    for field in SUBJECT_FIELDS {
        if metadata.pointer(&format!("/Subject/{field}")).is_none() {
            diagnostics.push(Diagnostic::MissingSubjectField { field: field.into() });
        }
    }

    let (starts, stops) = behavior.trial_times();
    let mut container = SessionContainer::new(session, metadata, alignment.clone())
        .with_trials(starts, stops)
        .with_stream(secondary.stream);
    if let Some(v) = video {
        container.metadata["Behavior"]["Video"] = json!({ "file_paths": v.file_paths });
        container = container.with_stream(v.frames.stream);
    }
    if let Some(p) = pose {
        container = container.with_stream(p.stream);
    }
    if let Some(p) = processed {
        container.metadata["Behavior"]["ProcessedTrials"] = json!({
            "name": "processed_trials",
            "description": "Contains the processed Bpod trials.",
            "labels": p.labels,
        });
        container = container.with_stream(p.stream);
    }
    container.states = behavior.states();
    let mut events = behavior.events();
    events.extend(behavior.sound_actions());
    events.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
    container.events = events;
    container.diagnostics = diagnostics.clone();

    std::fs::create_dir_all(output_dir).with_context(|| format!("creating {}", output_dir.display()))?;
    writer.write(&container, &output_path)?;
    Ok(ConversionReport { output_path, outcome: Outcome::Written, alignment: Some(alignment) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_ids_override_stem() {
        let mut r = ConversionRequest::new("/d/J069_RWTautowait2_20230809_131216.json", "/d/fp.csv");
        let s = r.session().unwrap();
        assert_eq!(s.session_id, "RWTautowait2-20230809-131216");

        r.subject_id = Some("J069".into());
        r.session_id = Some("20230809".into());
        let s = r.session().unwrap();
        assert_eq!(s.session_id, "20230809");
        assert_eq!(s.protocol, "RWTautowait2");
    }

    #[test]
    fn bad_explicit_session_id_fails() {
        let mut r = ConversionRequest::new("/d/x.json", "/d/fp.csv");
        r.subject_id = Some("J069".into());
        r.session_id = Some("2023-08-09".into());
        assert!(r.session().is_err());
    }
}

mod common;
use common::{write_behavior, write_doric_csv, write_pose, write_processed, write_template, write_video};
use nwbsync::{
    convert, convert_session, AlignConfig, ConversionRequest, Diagnostic, Diagnostics, Outcome, SafetensorsContainer,
    StFile, Templates,
};

fn request(dir: &std::path::Path) -> ConversionRequest {
    let behavior = write_behavior(dir, &[100.0, 105.0]);
    let fp = write_doric_csv(dir, "fp", 0.0, 10, &[3, 4, 8], &[1, 3, 5, 7, 9]);
    ConversionRequest::new(behavior, fp)
}

#[test]
fn session_without_video_converts() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("nwbfiles");
    let (report, diags) = convert(&request(dir.path()), &out, &AlignConfig::default()).unwrap();

    assert_eq!(report.outcome, Outcome::Written);
    assert_eq!(
        report.output_path,
        out.join("sub-J069_ses-RWTautowait2-20230809-131216.nwb")
    );
    // no templates: subject fields are reported, not fatal
    assert!(diags.iter().any(|d| matches!(d, Diagnostic::MissingSubjectField { .. })));
    assert!(!diags.iter().any(|d| matches!(d, Diagnostic::OptionalStreamSkipped { .. })));

    let f = StFile::open(&report.output_path).unwrap();
    assert_eq!(f.read_f64("fp/timestamps").unwrap()[0], 97.0);
    assert_eq!(f.read_f64("trials/start_time").unwrap(), vec![100.0, 105.0]);
    assert!(!f.contains("Video/timestamps"));
    let meta = f.metadata().unwrap();
    assert_eq!(meta["NWBFile"]["session_id"], "RWTautowait2-20230809-131216");
    assert_eq!(meta["NWBFile"]["session_start_time"], "2023-08-09T13:12:16-05:00");
    assert_eq!(meta["Subject"]["subject_id"], "J069");
    assert_eq!(meta["Behavior"]["Device"]["manufacturer"], "Sanworks");
    // CTrial is excluded by default
    assert!(meta["Behavior"]["TaskArguments"][0].get("CTrial").is_none());
    assert_eq!(meta["Behavior"]["TaskArguments"][1]["RewardAmount"], 12);
}

#[test]
fn video_and_pose_are_written_on_the_session_timeline() {
    let dir = tempfile::tempdir().unwrap();
    let video = write_video(dir.path(), &[0.0, 0.5, 1.0]);
    let pose = write_pose(dir.path(), 3);
    let req = request(dir.path()).with_video(video).with_pose(pose);
    let templates = Templates { layers: vec![write_template(dir.path())], fiber: None };
    let mut diags = Diagnostics::new();

    let report = convert_session(
        &req,
        dir.path(),
        false,
        &AlignConfig::default(),
        &templates,
        &SafetensorsContainer,
        &mut diags,
    )
    .unwrap();
    assert!(diags.is_empty(), "{}", diags.render());

    let f = StFile::open(&report.output_path).unwrap();
    assert_eq!(f.read_f64("Video/timestamps").unwrap(), vec![98.0, 98.5, 99.0]);
    assert_eq!(f.read_f64("PoseEstimation/timestamps").unwrap(), vec![98.0, 98.5, 99.0]);
    assert_eq!(f.shape("PoseEstimation/data").unwrap(), vec![3, 3]);
    let meta = f.metadata().unwrap();
    assert_eq!(meta["NWBFile"]["lab"], "Constantinople");
    assert_eq!(meta["Alignment"]["camera_anchor"], 98.0);
    assert_eq!(meta["Streams"]["PoseEstimation"]["channels"][0], "nose_x");
}

#[test]
fn pose_without_video_is_skipped_with_diagnostic() {
    let dir = tempfile::tempdir().unwrap();
    let req = request(dir.path()).with_pose(write_pose(dir.path(), 3));
    let (report, diags) = convert(&req, dir.path(), &AlignConfig::default()).unwrap();

    assert!(diags
        .iter()
        .any(|d| matches!(d, Diagnostic::OptionalStreamSkipped { stream, .. } if stream == "PoseEstimation")));
    let f = StFile::open(&report.output_path).unwrap();
    assert!(!f.contains("PoseEstimation/timestamps"));
}

#[test]
fn existing_output_is_skipped_unless_overwrite() {
    let dir = tempfile::tempdir().unwrap();
    let req = request(dir.path());
    let cfg = AlignConfig::default();
    let run = |overwrite| {
        let mut diags = Diagnostics::new();
        convert_session(&req, dir.path(), overwrite, &cfg, &Templates::default(), &SafetensorsContainer, &mut diags)
            .unwrap()
    };

    assert_eq!(run(false).outcome, Outcome::Written);
    let skipped = run(false);
    assert_eq!(skipped.outcome, Outcome::Skipped);
    assert!(skipped.alignment.is_none());
    assert_eq!(run(true).outcome, Outcome::Written);
}

#[test]
fn failed_alignment_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let behavior = write_behavior(dir.path(), &[100.0]);
    let fp = write_doric_csv(dir.path(), "fp", 0.0, 10, &[], &[1]);
    let req = ConversionRequest::new(behavior, fp);
    let out = dir.path().join("out");

    assert!(convert(&req, &out, &AlignConfig::default()).is_err());
    assert!(!out.join("sub-J069_ses-RWTautowait2-20230809-131216.nwb").exists());
}

#[test]
fn stub_test_truncates_secondary() {
    let dir = tempfile::tempdir().unwrap();
    let behavior = write_behavior(dir.path(), &[100.0, 105.0]);
    let fp = write_doric_csv(dir.path(), "fp", 0.0, 150, &[3, 8], &[1]);
    let cfg = AlignConfig { stub_test: true, ..AlignConfig::default() };
    let (report, _) = convert(&ConversionRequest::new(behavior, fp), dir.path(), &cfg).unwrap();

    let f = StFile::open(&report.output_path).unwrap();
    assert_eq!(f.read_f64("fp/timestamps").unwrap().len(), AlignConfig::STUB_SAMPLES);
}

#[test]
fn processed_trials_follow_the_raw_log() {
    let dir = tempfile::tempdir().unwrap();
    let req = request(dir.path()).with_processed_behavior(write_processed(dir.path(), &[10.0, 15.0]));
    let (report, diags) = convert(&req, dir.path(), &AlignConfig::default()).unwrap();
    assert!(!diags.iter().any(|d| matches!(d, Diagnostic::ClockDrift { .. })));

    let f = StFile::open(&report.output_path).unwrap();
    assert_eq!(f.read_f64("processed_trials/timestamps").unwrap(), vec![100.0, 105.0]);
    // center_poke_offset_time, hits
    assert_eq!(f.read_f64("processed_trials/data").unwrap(), vec![100.5, 1.0, 105.5, 0.0]);
    let meta = f.metadata().unwrap();
    assert_eq!(meta["Behavior"]["ProcessedTrials"]["labels"]["RewardedSide"], serde_json::json!(["Left", "Right"]));
    assert_eq!(meta["Behavior"]["ProcessedTrials"]["labels"]["Block"], serde_json::json!(["Mixed", "High"]));
}

#[test]
fn processed_trial_count_must_match() {
    let dir = tempfile::tempdir().unwrap();
    let req = request(dir.path()).with_processed_behavior(write_processed(dir.path(), &[10.0]));
    let out = dir.path().join("out");
    let err = convert(&req, &out, &AlignConfig::default()).unwrap_err();
    assert!(matches!(err.downcast_ref::<nwbsync::AlignError>(), Some(nwbsync::AlignError::LengthMismatch { .. })));
    assert!(!out.join("sub-J069_ses-RWTautowait2-20230809-131216.nwb").exists());
}

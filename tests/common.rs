/// Shared fixture builders: small synthetic sessions written to a temp dir.
use serde_json::json;
use std::path::{Path, PathBuf};

pub const BEHAVIOR_STEM: &str = "J069_RWTautowait2_20230809_131216";

#[allow(unused)]
/// Behavior log with trial starts `starts` (stops 4 s later).
pub fn write_behavior(dir: &Path, starts: &[f64]) -> PathBuf {
    let stops: Vec<f64> = starts.iter().map(|t| t + 4.0).collect();
    let trials: Vec<_> = starts
        .iter()
        .map(|_| {
            json!({
                "States": { "NoseInCenter": [0.0, 1.0], "Punish": [null, null] },
                "Events": { "Port2In": 0.1, "Port2Out": [0.9], "Tup": [1.0] }
            })
        })
        .collect();
    let settings: Vec<_> = starts.iter().enumerate().map(|(i, _)| json!({ "GUI": { "RewardAmount": 6 * (i + 1), "CTrial": i + 1 } })).collect();
    let doc = json!({
        "SessionData": {
            "Info": {
                "SessionDate": "09-Aug-2023",
                "SessionStartTime_UTC": "13:12:16",
                "StateMachineVersion": "Bpod r2"
            },
            "TrialStartTimestamp": starts,
            "TrialEndTimestamp": stops,
            "RawEvents": { "Trial": trials },
            "TrialSettings": settings
        }
    });
    let path = dir.join(format!("{BEHAVIOR_STEM}.json"));
    std::fs::write(&path, serde_json::to_vec_pretty(&doc).unwrap()).unwrap();
    path
}

/// Doric CSV sampled once per second from `t0`, `n` rows.
///
/// `landmark_high` / `camera_high` list the sample indices where the digital
/// line is high.
#[allow(unused)]
pub fn write_doric_csv(dir: &Path, name: &str, t0: f64, n: usize, landmark_high: &[usize], camera_high: &[usize]) -> PathBuf {
    let mut text = String::from("---,AIn-1 - Demodulated(Lock-In),---,---\n");
    text.push_str("Time(s),AIn-1 - Dem (AOut-1),DI/O-1,DI/O-2\n");
    for i in 0..n {
        let cam = u8::from(camera_high.contains(&i));
        let port = u8::from(landmark_high.contains(&i));
        text.push_str(&format!("{},{},{cam},{port}\n", t0 + i as f64, 0.01 * i as f64));
    }
    let path = dir.join(format!("{name}.csv"));
    std::fs::write(&path, text).unwrap();
    path
}

/// Empty movie plus a frame-times sidecar.
#[allow(unused)]
pub fn write_video(dir: &Path, frame_times: &[f64]) -> PathBuf {
    let video = dir.join("J069_cam01.mp4");
    std::fs::write(&video, b"").unwrap();
    let mut text = String::from("timestamp\n");
    for t in frame_times {
        text.push_str(&format!("{t}\n"));
    }
    std::fs::write(nwbsync::sources::video::timestamps_sidecar(&video), text).unwrap();
    video
}

/// Pose CSV with `rows` frames of one body part.
#[allow(unused)]
pub fn write_pose(dir: &Path, rows: usize) -> PathBuf {
    let mut text = String::from("nose_x,nose_y,nose_likelihood\n");
    for i in 0..rows {
        text.push_str(&format!("{},{},0.99\n", 10 + i, 20 + i));
    }
    let path = dir.join("pose.csv");
    std::fs::write(&path, text).unwrap();
    path
}

/// Lab-wide template providing the subject fields.
#[allow(unused)]
pub fn write_template(dir: &Path) -> PathBuf {
    let path = dir.join("metadata.json");
    let doc = json!({
        "NWBFile": { "lab": "Constantinople", "institution": "NYU" },
        "Subject": { "species": "Rattus norvegicus", "sex": "U" }
    });
    std::fs::write(&path, serde_json::to_vec(&doc).unwrap()).unwrap();
    path
}

/// Processed behavior with center-port LED onsets at `onsets` (processing
/// clock), each lasting half a second.
#[allow(unused)]
pub fn write_processed(dir: &Path, onsets: &[f64]) -> PathBuf {
    let cled: Vec<_> = onsets.iter().map(|&t| json!([t, t + 0.5])).collect();
    let hits: Vec<_> = (0..onsets.len()).map(|i| (i + 1) % 2).collect();
    let sides: Vec<_> = (0..onsets.len()).map(|i| if i % 2 == 0 { "L" } else { "R" }).collect();
    let blocks: Vec<_> = (0..onsets.len()).map(|i| 1 + i % 3).collect();
    let doc = json!({ "S": { "Cled": cled, "hits": hits, "RewardedSide": sides, "Block": blocks } });
    let path = dir.join("J069_processed.json");
    std::fs::write(&path, serde_json::to_vec(&doc).unwrap()).unwrap();
    path
}

//! Behavior video and pose-estimation outputs.
//!
//! Both are camera-locked: their frame times are relative to the first
//! recorded frame and are moved onto the session timeline by adding the
//! time of the first camera trigger.
//!
//! * Video frame times come from a sidecar `<video stem>.timestamps.csv`
//!   next to the movie (seconds in the first column, optional header).
//! * Pose estimates are a CSV export with one row per frame and a header of
//!   `<bodypart>_<x|y|likelihood>` columns.
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ndarray::Array1;

use super::csv::read_numeric;
use crate::align::{Lock, LockedStream};
use crate::error::{AlignError, ConfigError};
use crate::stream::Stream;

/// A movie file and its per-frame timestamps.
#[derive(Debug, Clone)]
pub struct VideoSource {
    pub file_paths: Vec<PathBuf>,
    pub frames: LockedStream,
}

impl VideoSource {
    /// Movie frame times relative to the first frame (before alignment).
    pub fn movie_timestamps(&self) -> Result<Array1<f64>> {
        let ts = self.frames.stream.timestamps().to_owned();
        Ok(match self.frames.stream.shifted_by() {
            Some(offset) => ts.mapv(|t| t - offset),
            None => ts,
        })
    }

    /// First frame time on the session timeline, once aligned.
    pub fn starting_time(&self) -> Option<f64> {
        self.frames.stream.shifted_by()
    }
}

pub fn timestamps_sidecar(video_path: &Path) -> PathBuf {
    let stem = video_path.file_stem().and_then(|s| s.to_str()).unwrap_or("video");
    video_path.with_file_name(format!("{stem}.timestamps.csv"))
}

/// Read one timestamp per record (first column); a non-numeric first
/// record is a header.
pub fn read_frame_times(path: &Path) -> Result<Array1<f64>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let mut out = Vec::new();
    for (i, record) in rdr.records().enumerate() {
        let record = record.with_context(|| format!("{}: record {}", path.display(), i + 1))?;
        let cell = record.get(0).unwrap_or_default();
        match cell.parse::<f64>() {
            Ok(t) => out.push(t),
            Err(_) if i == 0 => continue,
            Err(e) => return Err(e).with_context(|| format!("{}: record {}", path.display(), i + 1)),
        }
    }
    Ok(Array1::from(out))
}

pub fn load_video(video_path: &Path) -> Result<VideoSource> {
    if !video_path.exists() {
        return Err(ConfigError::MissingFile(video_path.to_path_buf()).into());
    }
    let sidecar = timestamps_sidecar(video_path);
    if !sidecar.exists() {
        return Err(ConfigError::MissingFile(sidecar).into());
    }
    let ts = read_frame_times(&sidecar)?;
    let frames = Stream::timestamps_only("Video", ts)?;
    Ok(VideoSource {
        file_paths: vec![video_path.to_path_buf()],
        frames: LockedStream::new(frames, Lock::Camera),
    })
}

/// Pose estimates sampled on the movie's frames.
pub fn load_pose(pose_path: &Path, video: &VideoSource) -> Result<LockedStream> {
    let table = read_numeric(pose_path, 0)?;
    let movie = video.movie_timestamps()?;
    if table.values.nrows() != movie.len() {
        return Err(AlignError::LengthMismatch {
            what: format!("pose rows of {} vs movie frames", pose_path.display()),
            left: table.values.nrows(),
            right: movie.len(),
        }
        .into());
    }
    let stream = Stream::new("PoseEstimation", movie, table.values, table.columns)?;
    Ok(LockedStream::new(stream, Lock::Camera))
}

//! Dataset table: one row per fiber per session.
//!
//! The table is a CSV sheet (quoted cells allowed).  Rows sharing `(subject_id, session_id)`
//! form one session; the first row of a session supplies the file paths.
//!
//! Missing required columns reject the whole table.  Per-session problems
//! (a referenced file that does not exist, a session id that is not a
//! date) are reported by [`SessionEntry::validate`] so that only that session
//! fails.
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::error::ConfigError;
use crate::session::parse_session_date;

pub const REQUIRED_COLUMNS: [&str; 4] =
    ["subject_id", "session_id", "bpod_file_path", "raw_fiber_photometry_file_path"];

/// Per-fiber description from one table row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FiberRow {
    pub fiber_photometry_series_name: Option<String>,
    pub emission_wavelength_nm: Option<f64>,
    pub excitation_wavelength_nm: Option<f64>,
    pub indicator_label: Option<String>,
    pub fiber_location: Option<String>,
    /// AP, ML, DV in millimeters from bregma.
    pub coordinates: [Option<f64>; 3],
    pub doric_csv_column_name: Option<String>,
    pub doric_stream_name: Option<String>,
}

/// Everything the table says about one session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionEntry {
    pub subject_id: String,
    pub session_id: String,
    pub bpod_file_path: PathBuf,
    pub raw_fiber_photometry_file_path: PathBuf,
    pub dlc_file_path: Option<PathBuf>,
    pub video_file_path: Option<PathBuf>,
    pub processed_behavior_file_path: Option<PathBuf>,
    pub fibers: Vec<FiberRow>,
}

impl SessionEntry {
    /// Check the referenced files and the session id before any conversion work.
    pub fn validate(&self) -> Result<()> {
        parse_session_date(&self.session_id)?;
        for p in [&self.bpod_file_path, &self.raw_fiber_photometry_file_path]
            .into_iter()
            .chain(self.dlc_file_path.iter())
            .chain(self.video_file_path.iter())
            .chain(self.processed_behavior_file_path.iter())
        {
            if !p.exists() {
                return Err(ConfigError::MissingFile(p.clone()).into());
            }
        }
        Ok(())
    }

    pub fn output_file_name(&self) -> String {
        crate::session::output_file_name(&self.subject_id, &self.session_id)
    }
}

#[derive(Debug, Clone)]
pub struct SessionTable {
    pub path: PathBuf,
    pub sessions: Vec<SessionEntry>,
}

impl SessionTable {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Self::parse(path, &text)
    }

    pub fn parse(path: &Path, text: &str) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(text.as_bytes());
        let header = rdr.headers().with_context(|| format!("{}: no header row", path.display()))?.clone();
        if header.is_empty() {
            anyhow::bail!("session table {} is empty", path.display());
        }
        for col in REQUIRED_COLUMNS {
            if !header.iter().any(|h| h == col) {
                return Err(ConfigError::MissingColumn { column: col.into(), path: path.to_path_buf() }.into());
            }
        }

        let mut grouped: BTreeMap<(String, String), SessionEntry> = BTreeMap::new();
        for (i, record) in rdr.records().enumerate() {
            let record = record.with_context(|| format!("{}: row {}", path.display(), i + 2))?;
            let row: HashMap<&str, &str> = header.iter().zip(record.iter()).collect();
            let text = |k: &str| row.get(k).copied().filter(|v| !is_missing(v)).map(String::from);
            let num = |k: &str| text(k).and_then(|v| v.parse::<f64>().ok());
            let required = |k: &str| text(k).ok_or_else(|| ConfigError::MissingField(format!("{k} (row {})", i + 2)));

            let key = (required("subject_id")?, required("session_id")?);
            let fiber = FiberRow {
                fiber_photometry_series_name: text("fiber_photometry_series_name"),
                emission_wavelength_nm: num("emission_wavelength_nm"),
                excitation_wavelength_nm: num("excitation_wavelength_nm"),
                indicator_label: text("indicator_label"),
                fiber_location: text("fiber_location"),
                coordinates: [num("fiber_position_AP"), num("fiber_position_ML"), num("fiber_position_DV")],
                doric_csv_column_name: text("doric_csv_column_name"),
                doric_stream_name: text("doric_stream_name"),
            };
            match grouped.get_mut(&key) {
                Some(entry) => entry.fibers.push(fiber),
                None => {
                    let entry = SessionEntry {
                        subject_id: key.0.clone(),
                        session_id: key.1.clone(),
                        bpod_file_path: required("bpod_file_path")?.into(),
                        raw_fiber_photometry_file_path: required("raw_fiber_photometry_file_path")?.into(),
                        dlc_file_path: text("dlc_file_path").map(PathBuf::from),
                        video_file_path: text("video_file_path").map(PathBuf::from),
                        processed_behavior_file_path: text("processed_behavior_file_path").map(PathBuf::from),
                        fibers: vec![fiber],
                    };
                    grouped.insert(key, entry);
                }
            }
        }
        Ok(Self { path: path.to_path_buf(), sessions: grouped.into_values().collect() })
    }
}

fn is_missing(v: &str) -> bool {
    v.is_empty() || v.eq_ignore_ascii_case("nan") || v.eq_ignore_ascii_case("none")
}

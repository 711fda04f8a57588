//! Session identity.
//!
//! A behavior-log file stem encodes the session:
//!
//! ```text
//! J069_RWTautowait2_20230809_131216
//! └──┘ └───────────────────────────┘
//! subject          rest → session id "RWTautowait2-20230809-131216"
//!      └─────────┘ protocol
//!                   └──────┘ date
//! ```
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::NaiveDate;
use serde::Serialize;

use crate::error::ConfigError;

/// One subject, one recording occasion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub subject_id: String,
    pub session_id: String,
    pub protocol: String,
    pub date: NaiveDate,
}

impl Session {
    pub fn new(subject_id: impl Into<String>, session_id: impl Into<String>, protocol: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            subject_id: subject_id.into(),
            session_id: session_id.into(),
            protocol: protocol.into(),
            date,
        }
    }

    /// Parse the identity encoded in a behavior-log path.
    pub fn from_behavior_path(path: &Path) -> Result<Self> {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| ConfigError::InvalidStem(path.display().to_string()))?;
        Self::from_stem(stem)
    }

    pub fn from_stem(stem: &str) -> Result<Self> {
        let bad = || ConfigError::InvalidStem(stem.to_string());
        let (subject, rest) = stem.split_once('_').ok_or_else(bad)?;
        let parts: Vec<&str> = rest.split('_').collect();
        if subject.is_empty() || parts.len() < 2 || parts[0].is_empty() {
            return Err(bad().into());
        }
        let date = parse_session_date(parts[1])?;
        Ok(Self::new(subject, rest.replace('_', "-"), parts[0], date))
    }

    /// `sub-<subject>_ses-<session>.nwb`
    pub fn output_file_name(&self) -> String {
        output_file_name(&self.subject_id, &self.session_id)
    }

    pub fn output_path(&self, dir: &Path) -> PathBuf {
        dir.join(self.output_file_name())
    }
}

pub fn output_file_name(subject_id: &str, session_id: &str) -> String {
    format!("sub-{subject_id}_ses-{session_id}.nwb")
}

/// `YYYYMMDD` → date.
pub fn parse_session_date(s: &str) -> Result<NaiveDate> {
    if s.len() != 8 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ConfigError::InvalidSessionDate(s.to_string()).into());
    }
    NaiveDate::parse_from_str(s, "%Y%m%d").map_err(|_| ConfigError::InvalidSessionDate(s.to_string()).into())
}

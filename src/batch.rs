//! Dataset-wide conversion.
//!
//! Sessions of a [`SessionTable`] fan out over a fixed-size rayon pool.
//! Workers share nothing mutable: each owns its request, its diagnostics
//! and its output path.  A failing session, panics included, writes
//! `ERROR_<output stem>.txt` next to the table and never affects the others.
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{error, info};

use crate::config::BatchConfig;
use crate::container::ContainerWriter;
use crate::convert::{convert_session, ConversionRequest, Outcome, Templates};
use crate::diagnostics::Diagnostics;
use crate::table::{SessionEntry, SessionTable};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionStatus {
    Written,
    Skipped,
    Failed { error_file: PathBuf, message: String },
}

/// Result of one session in a batch run.
#[derive(Debug, Clone, Serialize)]
pub struct SessionResult {
    pub output_path: PathBuf,
    pub status: SessionStatus,
    pub diagnostics: Diagnostics,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    /// Sorted by output path.
    pub sessions: Vec<SessionResult>,
}

impl BatchReport {
    pub fn count(&self, pred: impl Fn(&SessionStatus) -> bool) -> usize {
        self.sessions.iter().filter(|s| pred(&s.status)).count()
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, SessionStatus::Failed { .. }))
    }
}

/// `ERROR_<output stem>.txt` in `dir`.
pub fn error_file_path(dir: &Path, output_file_name: &str) -> PathBuf {
    let stem = Path::new(output_file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(output_file_name);
    dir.join(format!("ERROR_{stem}.txt"))
}

/// Convert every session in the table at `table_path`.
///
/// Only a malformed table (or an unusable pool size) is an error here;
/// per-session failures are reported in the returned [`BatchReport`].
pub fn dataset_to_nwb(table_path: &Path, cfg: &BatchConfig, writer: &dyn ContainerWriter) -> Result<BatchReport> {
    let table = SessionTable::load(table_path)?;
    std::fs::create_dir_all(&cfg.output_dir)
        .with_context(|| format!("creating {}", cfg.output_dir.display()))?;
    let error_dir = table_path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
    let templates = Templates { layers: cfg.metadata_templates.clone(), fiber: cfg.fiber_template.clone() };

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(cfg.max_workers.max(1))
        .build()
        .context("building worker pool")?;
    let bar = progress_bar(table.sessions.len() as u64);
    info!(sessions = table.sessions.len(), workers = cfg.max_workers, "converting dataset");

    let mut sessions: Vec<SessionResult> = pool.install(|| {
        table
            .sessions
            .par_iter()
            .map(|entry| {
                let r = run_one(entry, cfg, &templates, writer, &error_dir);
                bar.inc(1);
                r
            })
            .collect()
    });
    sessions.sort_by(|a, b| a.output_path.cmp(&b.output_path));
    let report = BatchReport { sessions };
    bar.finish_with_message(format!("{} failed", report.failed()));
    Ok(report)
}

fn run_one(
    entry: &SessionEntry,
    cfg: &BatchConfig,
    templates: &Templates,
    writer: &dyn ContainerWriter,
    error_dir: &Path,
) -> SessionResult {
    let output_path = cfg.output_dir.join(entry.output_file_name());
    let request = ConversionRequest::from_entry(entry);
    let mut diagnostics = Diagnostics::new();

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        entry.validate().and_then(|()| {
            convert_session(&request, &cfg.output_dir, cfg.overwrite, &cfg.align, templates, writer, &mut diagnostics)
        })
    }))
    .unwrap_or_else(|payload| Err(anyhow!("conversion panicked: {}", panic_message(payload.as_ref()))));
    let status = match result {
        Ok(r) => match r.outcome {
            Outcome::Written => SessionStatus::Written,
            Outcome::Skipped => SessionStatus::Skipped,
        },
        Err(e) => {
            let error_file = error_file_path(error_dir, &entry.output_file_name());
            error!(session = %entry.session_id, subject = %entry.subject_id, "conversion failed: {e:#}");
            if let Err(io) = write_error_file(&error_file, &request, &e, &diagnostics) {
                error!(path = %error_file.display(), "could not write error file: {io:#}");
            }
            SessionStatus::Failed { error_file, message: format!("{e:#}") }
        }
    };
    SessionResult { output_path, status, diagnostics }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

fn write_error_file(path: &Path, request: &ConversionRequest, err: &anyhow::Error, diagnostics: &Diagnostics) -> Result<()> {
    let mut text = format!("request:\n{}\n\n", serde_json::to_string_pretty(request)?);
    text.push_str(&format!("error:\n{err:?}\n"));
    if !diagnostics.is_empty() {
        text.push_str(&format!("\ndiagnostics:\n{}", diagnostics.render()));
    }
    std::fs::write(path, text).with_context(|| format!("writing {}", path.display()))
}

fn progress_bar(total: u64) -> ProgressBar {
    let bar = ProgressBar::new(total);
    if let Ok(style) = ProgressStyle::default_bar().template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}") {
        bar.set_style(style.progress_chars("=>-"));
    }
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_file_uses_output_stem() {
        let p = error_file_path(Path::new("/data"), "sub-J069_ses-20230809.nwb");
        assert_eq!(p, PathBuf::from("/data/ERROR_sub-J069_ses-20230809.txt"));
    }

    #[test]
    fn failed_count() {
        let report = BatchReport {
            sessions: vec![
                SessionResult { output_path: "a".into(), status: SessionStatus::Written, diagnostics: Diagnostics::new() },
                SessionResult {
                    output_path: "b".into(),
                    status: SessionStatus::Failed { error_file: "e".into(), message: "x".into() },
                    diagnostics: Diagnostics::new(),
                },
            ],
        };
        assert_eq!(report.failed(), 1);
        assert_eq!(report.count(|s| *s == SessionStatus::Written), 1);
    }
}

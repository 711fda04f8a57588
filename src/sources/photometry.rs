//! Doric fiber-photometry CSV export.
//!
//! ```text
//! line 0   console group labels        (ignored)
//! line 1   Time(s),AIn-1 - Dem (AOut-1),...,DI/O-1,DI/O-2
//! line 2+  samples
//! ```
//!
//! Every non-time column becomes a channel of the returned [`Stream`],
//! digital inputs included.
use std::path::Path;

use anyhow::Result;
use ndarray::{s, Array1};

use super::csv::read_numeric;
use crate::error::ConfigError;
use crate::stream::Stream;

pub const TIME_COLUMN: &str = "Time(s)";

/// Load a Doric CSV export.
pub fn load_doric_csv(path: &Path, time_column: &str) -> Result<Stream> {
    if path.extension().and_then(|e| e.to_str()) != Some("csv") {
        return Err(ConfigError::UnsupportedSource {
            path: path.to_path_buf(),
            reason: "expected a .csv file".into(),
        }
        .into());
    }
    let table = read_numeric(path, 1)?;
    let t_idx = table
        .column_index(time_column)
        .ok_or_else(|| ConfigError::MissingColumn { column: time_column.into(), path: path.to_path_buf() })?;

    // trailing rows written after acquisition stopped have no time
    let n_valid = table
        .values
        .column(t_idx)
        .iter()
        .take_while(|t| !t.is_nan())
        .count();
    let timestamps: Array1<f64> = table.values.slice(s![..n_valid, t_idx]).to_owned();

    let keep: Vec<usize> = (0..table.columns.len()).filter(|&i| i != t_idx).collect();
    let samples = table.values.slice(s![..n_valid, ..]).select(ndarray::Axis(1), &keep);
    let channels = keep.iter().map(|&i| table.columns[i].clone()).collect();

    let name = path.file_stem().and_then(|s| s.to_str()).unwrap_or("FiberPhotometry");
    Stream::new(name, timestamps, samples, channels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn reads_time_and_digital_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("J069_ACh.csv");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "Console,,,").unwrap();
        writeln!(f, "Time(s),AIn-1,DI/O-1,DI/O-2").unwrap();
        writeln!(f, "0.00,0.5,0,0").unwrap();
        writeln!(f, "0.01,0.6,1,0").unwrap();
        writeln!(f, "0.02,0.7,1,1").unwrap();
        writeln!(f, ",,,").unwrap();
        drop(f);

        let s = load_doric_csv(&path, TIME_COLUMN).unwrap();
        assert_eq!(s.len(), 3);
        assert_eq!(s.channels(), &["AIn-1", "DI/O-1", "DI/O-2"]);
        assert_eq!(s.channel("DI/O-2").unwrap().signal.to_vec(), vec![0.0, 0.0, 1.0]);
    }

    #[test]
    fn wrong_extension_is_rejected() {
        let err = load_doric_csv(Path::new("trace.doric"), TIME_COLUMN).unwrap_err();
        assert!(err.downcast_ref::<ConfigError>().is_some());
    }
}

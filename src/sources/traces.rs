//! Trace bundles: one time vector plus named 1-D channels.
//!
//! Used for photometry console exports and electrophysiology sync channels
//! converted to the safetensors layout ([`crate::io`]):
//!
//! ```text
//! time                [T]  F64
//! DigitalIO/DIO01     [T]  any numeric dtype
//! AnalogIn/AIN01      [T]
//! ...
//! ```
use std::path::Path;

use anyhow::Result;
use ndarray::{Array1, Array2};

use crate::error::{AlignError, ConfigError};
use crate::io::StFile;
use crate::stream::Stream;

pub const TIME_KEY: &str = "time";

/// Load every channel of the bundle at `path` into one stream.
pub fn load_trace_bundle(path: &Path, time_key: &str) -> Result<Stream> {
    let file = StFile::open(path)?;
    if !file.contains(time_key) {
        return Err(ConfigError::MissingColumn { column: time_key.into(), path: path.to_path_buf() }.into());
    }
    let timestamps = Array1::from(file.read_f64(time_key)?);
    let n = timestamps.len();

    let channels: Vec<String> = file
        .names()
        .into_iter()
        .filter(|k| *k != time_key)
        .map(String::from)
        .collect();
    let mut samples = Array2::<f64>::zeros((n, channels.len()));
    for (c, name) in channels.iter().enumerate() {
        let v = file.read_f64(name)?;
        if v.len() != n {
            return Err(AlignError::LengthMismatch { what: format!("channel '{name}' vs time"), left: v.len(), right: n }
                .into());
        }
        samples.column_mut(c).assign(&ndarray::ArrayView1::from(&v));
    }

    let name = path.file_stem().and_then(|s| s.to_str()).unwrap_or("Traces");
    Stream::new(name, timestamps, samples, channels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::StWriter;

    #[test]
    fn bundle_round_trip_through_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rec.safetensors");
        let mut w = StWriter::new();
        w.add_f64("time", &[1.0, 1.1, 1.2, 1.3], &[4]);
        w.add_f32("DigitalIO/DIO02", &[0.0, 1.0, 1.0, 0.0], &[4]);
        w.add_f32("AnalogIn/AIN01", &[0.3, 0.2, 0.1, 0.0], &[4]);
        w.write(&path).unwrap();

        let s = load_trace_bundle(&path, TIME_KEY).unwrap();
        assert_eq!(s.channels(), &["AnalogIn/AIN01", "DigitalIO/DIO02"]);
        assert_eq!(s.first_timestamp(), Some(1.0));
        assert_eq!(s.channel("DigitalIO/DIO02").unwrap().signal.to_vec(), vec![0.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn short_channel_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.safetensors");
        let mut w = StWriter::new();
        w.add_f64("time", &[0.0, 1.0, 2.0], &[3]);
        w.add_f32("DigitalIO/DIO01", &[0.0, 1.0], &[2]);
        w.write(&path).unwrap();
        assert!(load_trace_bundle(&path, TIME_KEY).is_err());
    }
}

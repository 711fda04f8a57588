//! Safetensors-layout I/O.
//!
//! Trace bundles (photometry consoles, ephys exports) are read from this
//! layout and session containers are written in it:
//!
//! ```text
//! u64 LE   header length N
//! N bytes  JSON header { name: { dtype, shape, data_offsets }, "__metadata__": {...} }
//! ...      raw little-endian tensor bytes
//! ```
use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::path::Path;

// ── Reader ────────────────────────────────────────────────────────────────────

/// A parsed safetensors file held in memory.
pub struct StFile {
    bytes: Vec<u8>,
    header: HashMap<String, serde_json::Value>,
    data_start: usize,
}

impl StFile {
    pub fn open(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        Self::from_bytes(bytes).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() < 8 {
            bail!("safetensors file too small");
        }
        let mut len = [0u8; 8];
        len.copy_from_slice(&bytes[..8]);
        let n = u64::from_le_bytes(len);
        let data_start = usize::try_from(n)
            .ok()
            .and_then(|n| n.checked_add(8))
            .filter(|&end| end <= bytes.len())
            .with_context(|| format!("safetensors header length {n} exceeds file size {}", bytes.len()))?;
        let header: HashMap<String, serde_json::Value> =
            serde_json::from_slice(&bytes[8..data_start]).context("failed to parse safetensors header")?;
        Ok(Self { bytes, header, data_start })
    }

    /// Tensor names, sorted, without `__metadata__`.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .header
            .keys()
            .map(String::as_str)
            .filter(|k| *k != "__metadata__")
            .collect();
        names.sort_unstable();
        names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.header.contains_key(name)
    }

    pub fn metadata(&self) -> Option<&serde_json::Value> {
        self.header.get("__metadata__")
    }

    pub fn shape(&self, name: &str) -> Result<Vec<usize>> {
        let entry = self.entry(name)?;
        entry["shape"]
            .as_array()
            .context("tensor shape is not an array")?
            .iter()
            .map(|v| v.as_u64().map(|d| d as usize).context("bad shape element"))
            .collect()
    }

    /// Read any numeric tensor, converted to f64, flattened.
    pub fn read_f64(&self, name: &str) -> Result<Vec<f64>> {
        let entry = self.entry(name)?;
        let dtype = entry["dtype"].as_str().context("tensor dtype missing")?;
        let offsets = entry["data_offsets"].as_array().context("data_offsets missing")?;
        let absolute = |i: usize| {
            offsets
                .get(i)
                .and_then(|v| v.as_u64())
                .and_then(|o| usize::try_from(o).ok())
                .and_then(|o| self.data_start.checked_add(o))
        };
        let (s, e) = match (absolute(0), absolute(1)) {
            (Some(s), Some(e)) if s <= e => (s, e),
            _ => bail!("tensor '{name}' has bad data_offsets"),
        };
        let raw = self
            .bytes
            .get(s..e)
            .with_context(|| format!("tensor '{name}' runs past end of file"))?;

        let vals = match dtype {
            "F32" => raw.chunks_exact(4).map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64).collect(),
            "F64" => raw
                .chunks_exact(8)
                .map(|b| f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
                .collect(),
            "I32" => raw.chunks_exact(4).map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64).collect(),
            "I64" => raw
                .chunks_exact(8)
                .map(|b| i64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]) as f64)
                .collect(),
            "U8" => raw.iter().map(|&b| b as f64).collect(),
            other => bail!("tensor '{name}' has unsupported dtype {other}"),
        };
        Ok(vals)
    }

    fn entry(&self, name: &str) -> Result<&serde_json::Value> {
        self.header.get(name).with_context(|| format!("missing '{name}' key"))
    }
}

// ── Writer ────────────────────────────────────────────────────────────────────

/// Safetensors writer for F32, F64 and I32 tensors plus a JSON metadata block.
///
/// ```rust,no_run
/// use nwbsync::io::StWriter;
/// use std::path::Path;
/// let mut w = StWriter::new();
/// w.add_f64("timestamps", &[0.0, 0.1, 0.2], &[3]);
/// w.set_metadata(serde_json::json!({ "session_id": "20230809" }));
/// w.write(Path::new("/tmp/out.nwb")).unwrap();
/// ```
#[derive(Default)]
pub struct StWriter {
    entries: Vec<(String, Vec<u8>, &'static str, Vec<usize>)>,
    metadata: Option<serde_json::Value>,
}

impl StWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_f32(&mut self, name: &str, data: &[f32], shape: &[usize]) {
        let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.entries.push((name.to_string(), bytes, "F32", shape.to_vec()));
    }

    pub fn add_f64(&mut self, name: &str, data: &[f64], shape: &[usize]) {
        let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.entries.push((name.to_string(), bytes, "F64", shape.to_vec()));
    }

    pub fn add_f64_arr2(&mut self, name: &str, arr: &ndarray::Array2<f64>) {
        let data: Vec<f64> = arr.iter().copied().collect();
        self.add_f64(name, &data, &[arr.nrows(), arr.ncols()]);
    }

    pub fn add_i32(&mut self, name: &str, data: &[i32], shape: &[usize]) {
        let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.entries.push((name.to_string(), bytes, "I32", shape.to_vec()));
    }

    /// JSON stored under `__metadata__`.
    pub fn set_metadata(&mut self, metadata: serde_json::Value) {
        self.metadata = Some(metadata);
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut header_map = serde_json::Map::new();
        if let Some(m) = &self.metadata {
            header_map.insert("__metadata__".into(), m.clone());
        }
        let mut offset: usize = 0;
        for (name, data, dtype, shape) in &self.entries {
            header_map.insert(name.clone(), serde_json::json!({
                "dtype": dtype,
                "shape": shape,
                "data_offsets": [offset, offset + data.len()],
            }));
            offset += data.len();
        }
        let hdr_bytes = serde_json::to_vec(&header_map)?;
        let pad = (8 - hdr_bytes.len() % 8) % 8;
        let mut out = Vec::with_capacity(8 + hdr_bytes.len() + pad + offset);
        out.extend_from_slice(&((hdr_bytes.len() + pad) as u64).to_le_bytes());
        out.extend_from_slice(&hdr_bytes);
        out.extend(std::iter::repeat(b' ').take(pad));
        for (_, data, _, _) in &self.entries {
            out.extend_from_slice(data);
        }
        Ok(out)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let bytes = self.to_bytes()?;
        std::fs::write(path, bytes).with_context(|| format!("writing {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_output_parses_back() {
        let mut w = StWriter::new();
        w.add_f64("time", &[0.0, 0.5, 1.0], &[3]);
        w.add_f32("sig", &[1.0, 0.0, 1.0], &[3]);
        w.add_i32("n", &[3], &[1]);
        w.set_metadata(serde_json::json!({ "subject": "J069" }));
        let f = StFile::from_bytes(w.to_bytes().unwrap()).unwrap();
        assert_eq!(f.names(), vec!["n", "sig", "time"]);
        assert_eq!(f.read_f64("time").unwrap(), vec![0.0, 0.5, 1.0]);
        assert_eq!(f.read_f64("sig").unwrap(), vec![1.0, 0.0, 1.0]);
        assert_eq!(f.shape("n").unwrap(), vec![1]);
        assert_eq!(f.metadata().unwrap()["subject"], "J069");
    }

    #[test]
    fn truncated_file_is_an_error() {
        assert!(StFile::from_bytes(vec![0, 1, 2]).is_err());
        let mut bytes = 1000u64.to_le_bytes().to_vec();
        bytes.extend_from_slice(b"{}");
        assert!(StFile::from_bytes(bytes).is_err());
    }

    #[test]
    fn oversized_lengths_are_errors() {
        let mut bytes = u64::MAX.to_le_bytes().to_vec();
        bytes.extend_from_slice(b"{}");
        assert!(StFile::from_bytes(bytes).is_err());

        let header = format!(r#"{{"t":{{"dtype":"F64","shape":[1],"data_offsets":[{},{}]}}}}"#, u64::MAX - 1, u64::MAX);
        let mut bytes = (header.len() as u64).to_le_bytes().to_vec();
        bytes.extend_from_slice(header.as_bytes());
        let f = StFile::from_bytes(bytes).unwrap();
        assert!(f.read_f64("t").is_err());
    }
}

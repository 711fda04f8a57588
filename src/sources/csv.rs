//! Numeric CSV reader for acquisition-console exports.
//!
//! Consoles write a few label lines, one header line and numeric cells.
//! Empty or non-numeric cells read as NaN.
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use csv::{ReaderBuilder, Trim};
use ndarray::Array2;

/// A numeric table: column names and `[rows, cols]` values.
#[derive(Debug, Clone)]
pub struct NumericTable {
    pub columns: Vec<String>,
    pub values: Array2<f64>,
}

impl NumericTable {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

/// Parse CSV from `reader`, skipping `skip_records` records before the header.
pub fn parse_numeric<R: Read>(reader: R, skip_records: usize) -> Result<NumericTable> {
    // label lines above the header may be shorter than the data rows
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(reader);
    let mut records = rdr.records().skip(skip_records);
    let header = records.next().context("table has no header line")??;
    let columns: Vec<String> = header.iter().map(String::from).collect();

    let mut flat = Vec::new();
    let mut n_rows = 0;
    for (i, record) in records.enumerate() {
        let record = record?;
        if record.len() != columns.len() {
            anyhow::bail!("row {} has {} cells, header has {}", i + 1, record.len(), columns.len());
        }
        flat.extend(record.iter().map(|c| c.parse::<f64>().unwrap_or(f64::NAN)));
        n_rows += 1;
    }
    let values = Array2::from_shape_vec((n_rows, columns.len()), flat)?;
    Ok(NumericTable { columns, values })
}

pub fn read_numeric(path: &Path, skip_records: usize) -> Result<NumericTable> {
    let file = std::fs::File::open(path).with_context(|| format!("reading {}", path.display()))?;
    parse_numeric(file, skip_records).with_context(|| format!("parsing {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_leading_lines_and_reads_nan() {
        let t = parse_numeric("group,,\nTime(s),a,b\n0.0,1,\n0.1,2,3\n".as_bytes(), 1).unwrap();
        assert_eq!(t.columns, vec!["Time(s)", "a", "b"]);
        assert_eq!(t.values.dim(), (2, 3));
        assert!(t.values[[0, 2]].is_nan());
        assert_eq!(t.values[[1, 2]], 3.0);
        assert_eq!(t.column_index("b"), Some(2));
    }

    #[test]
    fn short_label_line_and_quoted_header() {
        let t = parse_numeric("Console\n\"Time(s)\",\"AIn-1 - Dem (AOut-1)\"\n0.0,0.5\n".as_bytes(), 1).unwrap();
        assert_eq!(t.columns, vec!["Time(s)", "AIn-1 - Dem (AOut-1)"]);
        assert_eq!(t.values[[0, 1]], 0.5);
    }

    #[test]
    fn ragged_row_is_an_error() {
        assert!(parse_numeric("a,b\n1,2,3\n".as_bytes(), 0).is_err());
    }
}

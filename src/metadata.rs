//! Metadata templates.
//!
//! Container metadata is a nested JSON document built in three layers:
//!
//! ```text
//! format defaults      (templates[0])
//!   ⊕ lab-wide editable (templates[1..])
//!   ⊕ session-computed   (NWBFile / Subject / Behavior / Ophys from the session)
//! ```
//!
//! Later layers win on key collisions.  Objects merge key by key; any other
//! value (arrays included) replaces the earlier one wholesale.
use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::{json, Map, Value};

use crate::error::ConfigError;
use crate::table::FiberRow;

/// Merge `overlay` into `base`.
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(b), Value::Object(o)) => {
            for (k, v) in o {
                match b.get_mut(&k) {
                    Some(slot) => deep_merge(slot, v),
                    None => {
                        b.insert(k, v);
                    }
                }
            }
        }
        (slot, v) => *slot = v,
    }
}

pub fn load_template(path: &Path) -> Result<Value> {
    let bytes = std::fs::read(path).with_context(|| format!("reading template {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parsing template {}", path.display()))
}

/// Merge the template files in order, then `session` on top.
pub fn merge_layers(templates: &[impl AsRef<Path>], session: Value) -> Result<Value> {
    let mut out = Value::Object(Map::new());
    for t in templates {
        deep_merge(&mut out, load_template(t.as_ref())?);
    }
    deep_merge(&mut out, session);
    Ok(out)
}

// ── Fiber photometry ──────────────────────────────────────────────────────

/// Dense index of each row's `(emission, excitation)` pair in sorted order.
///
/// Rows sharing a wavelength pair share a table region.
pub fn table_regions(fibers: &[FiberRow]) -> Result<Vec<usize>> {
    let keys = fibers
        .iter()
        .map(|f| {
            let em = f.emission_wavelength_nm.ok_or_else(|| ConfigError::MissingField("emission_wavelength_nm".into()))?;
            let ex = f.excitation_wavelength_nm.ok_or_else(|| ConfigError::MissingField("excitation_wavelength_nm".into()))?;
            Ok((WavelengthKey(em), WavelengthKey(ex)))
        })
        .collect::<Result<Vec<_>>>()?;
    let mut sorted = keys.clone();
    sorted.sort();
    sorted.dedup();
    Ok(keys
        .iter()
        .map(|k| sorted.binary_search(k).unwrap_or_default())
        .collect())
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct WavelengthKey(f64);

impl Eq for WavelengthKey {}

impl PartialOrd for WavelengthKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for WavelengthKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Fill the fiber-photometry section of `template` from one session's table rows.
///
/// `template` must contain `Ophys.FiberPhotometry` with `FiberPhotometryTable.rows`,
/// `Indicators`, `ExcitationSources` and `FiberPhotometryResponseSeries`.
/// Only the rows, indicators, sources and series this session uses are kept.
pub fn fiber_photometry_metadata(template: &Value, fibers: &[FiberRow], source_name: &str) -> Result<Value> {
    let missing = |what: String| ConfigError::MissingMetadata { what, source_name: source_name.to_string() };
    let fp = template
        .pointer("/Ophys/FiberPhotometry")
        .ok_or_else(|| missing("Ophys.FiberPhotometry".into()))?;
    let template_rows = fp
        .pointer("/FiberPhotometryTable/rows")
        .and_then(Value::as_array)
        .ok_or_else(|| missing("FiberPhotometryTable.rows".into()))?;
    let indicators = section(fp, "Indicators", source_name)?;
    let sources = section(fp, "ExcitationSources", source_name)?;
    let series_templates = section(fp, "FiberPhotometryResponseSeries", source_name)?;

    let regions = table_regions(fibers)?;
    // region → first row using it
    let mut by_region: BTreeMap<usize, &FiberRow> = BTreeMap::new();
    for (fiber, &r) in fibers.iter().zip(&regions) {
        by_region.entry(r).or_insert(fiber);
    }

    let mut rows = Vec::new();
    let mut used_indicators = Vec::new();
    let mut used_sources = Vec::new();
    for (&region, fiber) in &by_region {
        let mut row = template_rows
            .iter()
            .find(|r| name_matches_index(r, region))
            .cloned()
            .ok_or_else(|| missing(format!("FiberPhotometryTable row '{region}'")))?;

        let label = fiber
            .indicator_label
            .as_deref()
            .ok_or_else(|| ConfigError::MissingField("indicator_label".into()))?
            .replace('_', "-");
        let indicator = indicators
            .iter()
            .find(|i| i.get("label").and_then(Value::as_str) == Some(label.as_str()))
            .ok_or_else(|| missing(format!("indicator '{label}'")))?;
        let indicator_name = indicator
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| missing(format!("name of indicator '{label}'")))?
            .to_lowercase();

        let excitation = fiber
            .excitation_wavelength_nm
            .ok_or_else(|| ConfigError::MissingField(format!("excitation_wavelength_nm for indicator '{label}'")))?;
        let source = sources
            .iter()
            .find(|s| {
                s.get("name").and_then(Value::as_str).is_some_and(|n| n.contains(&indicator_name))
                    && s.get("excitation_wavelength_in_nm").and_then(Value::as_f64) == Some(excitation)
            })
            .ok_or_else(|| missing(format!("excitation source for {excitation} nm and indicator {indicator_name}")))?;

        if let Value::Object(m) = &mut row {
            m.insert("location".into(), json!(fiber.fiber_location));
            m.insert("coordinates".into(), json!(fiber.coordinates));
            m.insert("indicator".into(), json!(indicator_name));
            m.insert("excitation_source".into(), source.get("name").cloned().unwrap_or(Value::Null));
        }
        rows.push(row);
        push_unique(&mut used_indicators, indicator);
        push_unique(&mut used_sources, source);
    }

    // series name → (regions, column names, stream names), first-seen order
    let mut series: Vec<(String, Vec<usize>, Vec<Value>, Vec<Value>)> = Vec::new();
    for (fiber, &r) in fibers.iter().zip(&regions) {
        let Some(name) = fiber.fiber_photometry_series_name.clone() else {
            continue;
        };
        let idx = match series.iter().position(|s| s.0 == name) {
            Some(i) => i,
            None => {
                series.push((name, Vec::new(), Vec::new(), Vec::new()));
                series.len() - 1
            }
        };
        let s = &mut series[idx];
        s.1.push(r);
        s.2.push(json!(fiber.doric_csv_column_name));
        s.3.push(json!(fiber.doric_stream_name));
    }
    series.sort_by(|a, b| a.0.cmp(&b.0));

    let mut out_series = Vec::new();
    for (name, regions, columns, streams) in series {
        let mut s = series_templates
            .iter()
            .find(|s| s.get("name").and_then(Value::as_str) == Some(name.as_str()))
            .cloned()
            .ok_or_else(|| missing(format!("series '{name}'")))?;
        let Value::Object(m) = &mut s else {
            return Err(missing(format!("series '{name}' as an object")).into());
        };
        m.insert("fiber_photometry_table_region".into(), json!(regions));
        if m.contains_key("channel_column_names") {
            m.insert("channel_column_names".into(), Value::Array(columns));
        } else if m.contains_key("stream_names") {
            m.insert("stream_names".into(), Value::Array(streams));
        } else {
            return Err(missing(format!("channel_column_names or stream_names in series '{name}'")).into());
        }
        out_series.push(s);
    }

    let mut out = template.clone();
    deep_merge(
        &mut out,
        json!({
            "Ophys": {
                "FiberPhotometry": {
                    "FiberPhotometryTable": { "rows": rows },
                    "Indicators": used_indicators,
                    "ExcitationSources": used_sources,
                    "FiberPhotometryResponseSeries": out_series,
                }
            }
        }),
    );
    Ok(out)
}

fn section<'v>(fp: &'v Value, key: &str, source_name: &str) -> Result<&'v Vec<Value>> {
    fp.get(key).and_then(Value::as_array).ok_or_else(|| {
        ConfigError::MissingMetadata {
            what: format!("Ophys.FiberPhotometry.{key}"),
            source_name: source_name.to_string(),
        }
        .into()
    })
}

fn name_matches_index(row: &Value, index: usize) -> bool {
    match row.get("name") {
        Some(Value::Number(n)) => n.as_u64() == Some(index as u64),
        Some(Value::String(s)) => s.parse::<usize>().ok() == Some(index),
        _ => false,
    }
}

fn push_unique(list: &mut Vec<Value>, v: &Value) {
    if !list.contains(v) {
        list.push(v.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fiber(em: f64, ex: f64, series: &str, column: &str) -> FiberRow {
        FiberRow {
            fiber_photometry_series_name: Some(series.into()),
            emission_wavelength_nm: Some(em),
            excitation_wavelength_nm: Some(ex),
            indicator_label: Some("dLight_1.3b".into()),
            fiber_location: Some("NAcc".into()),
            coordinates: [Some(1.3), Some(-1.2), Some(-6.5)],
            doric_csv_column_name: Some(column.into()),
            doric_stream_name: None,
        }
    }

    fn template() -> Value {
        json!({
            "Ophys": { "FiberPhotometry": {
                "FiberPhotometryTable": { "name": "FiberPhotometryTable", "rows": [
                    { "name": 0, "location": "?" },
                    { "name": 1, "location": "?" },
                    { "name": 2, "location": "?" }
                ]},
                "Indicators": [
                    { "name": "dlight", "label": "dLight-1.3b" },
                    { "name": "gcamp", "label": "GCaMP6f" }
                ],
                "ExcitationSources": [
                    { "name": "excitation_source_dlight_signal", "excitation_wavelength_in_nm": 465.0 },
                    { "name": "excitation_source_dlight_isosbestic", "excitation_wavelength_in_nm": 405.0 },
                    { "name": "excitation_source_gcamp_signal", "excitation_wavelength_in_nm": 470.0 }
                ],
                "FiberPhotometryResponseSeries": [
                    { "name": "fiber_photometry_response_series", "channel_column_names": [] }
                ]
            }}
        })
    }

    #[test]
    fn later_layers_win_objects_merge() {
        let mut base = json!({ "NWBFile": { "lab": "L", "institution": "I" }, "keywords": ["a"] });
        deep_merge(&mut base, json!({ "NWBFile": { "lab": "Constantinople" }, "keywords": ["b", "c"] }));
        assert_eq!(base, json!({ "NWBFile": { "lab": "Constantinople", "institution": "I" }, "keywords": ["b", "c"] }));
    }

    #[test]
    fn merge_layers_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.json");
        let b = dir.path().join("b.json");
        std::fs::write(&a, r#"{"Subject": {"species": "Rattus norvegicus", "sex": "U"}}"#).unwrap();
        std::fs::write(&b, r#"{"Subject": {"sex": "M"}}"#).unwrap();
        let out = merge_layers(&[a, b], json!({ "Subject": { "subject_id": "J069" } })).unwrap();
        assert_eq!(out["Subject"], json!({ "species": "Rattus norvegicus", "sex": "M", "subject_id": "J069" }));
    }

    #[test]
    fn regions_are_dense_sorted_group_indices() {
        let fibers = vec![
            fiber(525.0, 465.0, "s", "a"),
            fiber(525.0, 405.0, "s", "b"),
            fiber(525.0, 465.0, "s", "c"),
        ];
        assert_eq!(table_regions(&fibers).unwrap(), vec![1, 0, 1]);
    }

    #[test]
    fn synthesizes_rows_sources_and_series() {
        let fibers = vec![
            fiber(525.0, 465.0, "fiber_photometry_response_series", "AIn-1 - Dem (AOut-1)"),
            fiber(525.0, 405.0, "fiber_photometry_response_series", "AIn-1 - Dem (AOut-2)"),
        ];
        let out = fiber_photometry_metadata(&template(), &fibers, "fp.json").unwrap();
        let fp = &out["Ophys"]["FiberPhotometry"];
        let rows = fp["FiberPhotometryTable"]["rows"].as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["excitation_source"], "excitation_source_dlight_isosbestic");
        assert_eq!(rows[1]["indicator"], "dlight");
        assert_eq!(fp["Indicators"].as_array().unwrap().len(), 1);
        assert_eq!(fp["ExcitationSources"].as_array().unwrap().len(), 2);
        let series = &fp["FiberPhotometryResponseSeries"][0];
        assert_eq!(series["fiber_photometry_table_region"], json!([1, 0]));
        assert_eq!(series["channel_column_names"], json!(["AIn-1 - Dem (AOut-1)", "AIn-1 - Dem (AOut-2)"]));
    }

    #[test]
    fn unknown_indicator_names_the_key() {
        let mut f = fiber(525.0, 465.0, "fiber_photometry_response_series", "a");
        f.indicator_label = Some("jRGECO".into());
        let err = fiber_photometry_metadata(&template(), &[f], "fp.json").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("jRGECO"), "{msg}");
        assert!(matches!(err.downcast_ref::<ConfigError>(), Some(ConfigError::MissingMetadata { .. })));
    }

    #[test]
    fn unknown_series_is_config_error() {
        let fibers = [fiber(525.0, 465.0, "other_series", "a")];
        assert!(fiber_photometry_metadata(&template(), &fibers, "fp.json").is_err());
    }
}

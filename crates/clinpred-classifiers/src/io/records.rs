//! Raw record readers for CSV/TSV tables and JSON payloads.
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use csv::StringRecord;

use crate::data_handling::Dataset;
use crate::features::{FeaturePipeline, RawRecord, RawValue};

/// Field delimiter inferred from the file extension (`.tsv`/`.tab`/`.txt` are tab separated).
pub fn delimiter_for<P: AsRef<Path>>(path: P) -> u8 {
    match path
        .as_ref()
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("tsv") | Some("tab") | Some("txt") => b'\t',
        _ => b',',
    }
}

/// Read every row of a delimited table as a raw record.
///
/// Numeric-looking cells become numbers, other cells text. Blank cells are
/// left out of the record so the feature pipeline reports them as missing.
pub fn read_records_csv<P: AsRef<Path>>(path: P) -> Result<Vec<RawRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter_for(&path))
        .has_headers(true)
        .flexible(false)
        .from_path(&path)
        .with_context(|| format!("Failed to open data file: {}", path.as_ref().display()))?;

    let headers = reader
        .headers()
        .context("Failed to read header row")?
        .clone();
    if headers.is_empty() {
        return Err(anyhow!(
            "No columns found in {}",
            path.as_ref().display()
        ));
    }

    let mut records = Vec::new();
    for (row_idx, result) in reader.records().enumerate() {
        let row = result.with_context(|| format!("Failed to read row {}", row_idx + 1))?;
        records.push(to_record(&headers, &row));
    }
    log::debug!(
        "read {} records with {} columns from {}",
        records.len(),
        headers.len(),
        path.as_ref().display()
    );
    Ok(records)
}

fn to_record(headers: &StringRecord, row: &StringRecord) -> RawRecord {
    headers
        .iter()
        .zip(row.iter())
        .filter_map(|(name, cell)| parse_cell(cell).map(|v| (name.trim().to_string(), v)))
        .collect()
}

fn parse_cell(cell: &str) -> Option<RawValue> {
    let cell = cell.trim();
    if cell.is_empty() {
        return None;
    }
    match cell.parse::<f64>() {
        Ok(v) if v.is_finite() => Some(RawValue::Number(v)),
        _ => Some(RawValue::Text(cell.to_string())),
    }
}

/// Parse a single JSON object into a raw record.
pub fn parse_record_json(text: &str) -> Result<RawRecord> {
    serde_json::from_str(text).context("Record must be a JSON object of field values")
}

/// Read a single raw record from a JSON file.
pub fn read_record_json<P: AsRef<Path>>(path: P) -> Result<RawRecord> {
    let file = File::open(&path)
        .with_context(|| format!("Failed to open record file: {}", path.as_ref().display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Invalid record JSON in {}", path.as_ref().display()))
}

/// Convenience helper to build a labelled dataset straight from a table.
pub fn read_dataset<P: AsRef<Path>>(path: P, pipeline: &FeaturePipeline) -> Result<Dataset> {
    let records = read_records_csv(&path)?;
    Dataset::from_records(pipeline, &records)
        .with_context(|| format!("Failed to encode {}", path.as_ref().display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn cells_are_typed_and_blanks_dropped() {
        let mut file = tempfile::Builder::new().suffix(".tsv").tempfile().unwrap();
        writeln!(file, "Age\tSex\tStage").unwrap();
        writeln!(file, "21464\tF\t").unwrap();
        file.flush().unwrap();

        let records = read_records_csv(file.path()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("Age"), Some(&RawValue::Number(21464.0)));
        assert_eq!(records[0].get("Sex"), Some(&RawValue::Text("F".into())));
        assert!(records[0].get("Stage").is_none());
    }

    #[test]
    fn json_record_accepts_mixed_values() {
        let record = parse_record_json(r#"{"age_at_diagnosis": 45, "smoking": "No", "metastasis": false}"#).unwrap();
        assert_eq!(record["age_at_diagnosis"], RawValue::Number(45.0));
        assert_eq!(record["metastasis"], RawValue::Bool(false));
    }

    #[test]
    fn delimiter_follows_extension() {
        assert_eq!(delimiter_for("a.csv"), b',');
        assert_eq!(delimiter_for("a.TSV"), b'\t');
    }
}

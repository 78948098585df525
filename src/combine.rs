//! Derived columns built by joining existing ones, and the workbook they can be saved to.

use crate::coerce::CellValue;
use crate::error::ExtractError;
use crate::extract::RowRecord;
use crate::spreadsheet::writer;
use indexmap::IndexMap;
use serde::Deserialize;
use serde::Serialize;
use std::io::Cursor;
use std::path::Path;
use std::path::PathBuf;

pub const OUTPUT_SHEET_NAME: &str = "Transformed Data";

/// Joins the values of `sources` into `target`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransformationSpec {
    pub target: String,
    pub sources: Vec<String>,
    /// Placed between two present values; `None` joins without a separator
    #[serde(default)]
    pub separator: Option<String>,
}

impl TransformationSpec {
    pub fn new(target: &str, sources: &[&str]) -> TransformationSpec {
        TransformationSpec {
            target: target.to_owned(),
            sources: sources.iter().map(|source| (*source).to_owned()).collect(),
            separator: None,
        }
    }

    pub fn with_separator(mut self, separator: &str) -> TransformationSpec {
        self.separator = Some(separator.to_owned());
        self
    }

    /// The joined value for one row. Missing and null sources are skipped.
    fn apply(&self, fields: &IndexMap<String, CellValue>) -> CellValue {
        let separator = self.separator.as_deref().unwrap_or_default();
        let mut combined = String::new();
        let mut first = true;
        for source in &self.sources {
            match fields.get(source) {
                None | Some(CellValue::Null) => continue,
                Some(value) => {
                    if !first {
                        combined.push_str(separator);
                    }
                    combined.push_str(value.to_string().trim());
                    first = false;
                }
            }
        }
        CellValue::String(combined)
    }
}

/// Copies `records`, setting `spec.target` on every copy.
pub fn combine(records: &[RowRecord], spec: &TransformationSpec) -> Vec<RowRecord> {
    log::info!("Combining columns {:?} into '{}'", spec.sources, spec.target);
    let combined: Vec<RowRecord> = records
        .iter()
        .map(|record| {
            let mut record = record.clone();
            let value = spec.apply(&record.fields);
            record.fields.insert(spec.target.clone(), value);
            record
        })
        .collect();
    log::info!("Column '{}' added to {} records", spec.target, combined.len());
    combined
}

/// Output of [`combine_all`]: a header plus one row per input record.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CombinedTable {
    pub columns: Vec<String>,
    pub rows: Vec<IndexMap<String, CellValue>>,
}

/// Applies every transformation to every record. Without `include_original` the rows hold only
/// the target columns.
pub fn combine_all(records: &[RowRecord], specs: &[TransformationSpec], include_original: bool) -> CombinedTable {
    log::info!("Applying {} column transformations to {} records", specs.len(), records.len());
    let rows: Vec<IndexMap<String, CellValue>> = records
        .iter()
        .map(|record| {
            let mut row = if include_original {
                record.fields.clone()
            } else {
                IndexMap::with_capacity(specs.len())
            };
            for spec in specs {
                row.insert(spec.target.clone(), spec.apply(&record.fields));
            }
            row
        })
        .collect();
    let columns = rows
        .first()
        .map(|row| row.keys().cloned().collect())
        .unwrap_or_default();
    CombinedTable { columns, rows }
}

impl CombinedTable {
    /// Serializes the table as a one-sheet .xlsx workbook.
    pub fn to_xlsx(&self) -> Result<Vec<u8>, ExtractError> {
        let cursor = writer::write_workbook(Cursor::new(Vec::new()), OUTPUT_SHEET_NAME, &self.columns, &self.rows)?;
        Ok(cursor.into_inner())
    }

    /// Writes the workbook into `directory` and returns the path of the new file.
    pub fn save(&self, directory: &Path, output_name: &str) -> Result<PathBuf, ExtractError> {
        std::fs::create_dir_all(directory)?;
        let path = directory.join(normalize_output_name(output_name));
        std::fs::write(&path, self.to_xlsx()?)?;
        log::info!("Saved {} rows to '{}'", self.rows.len(), path.display());
        Ok(path)
    }
}

/// Appends `.xlsx` unless the name already ends with `.xlsx` or `.xls`.
pub fn normalize_output_name(name: &str) -> String {
    let lowercase = name.to_lowercase();
    if lowercase.ends_with(".xlsx") || lowercase.ends_with(".xls") {
        name.to_owned()
    } else {
        format!("{name}.xlsx")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(fields: &[(&str, CellValue)]) -> RowRecord {
        let fields = fields.iter().map(|(name, value)| ((*name).to_owned(), value.clone())).collect();
        RowRecord::new("f.xlsx", "Sheet1", 2, fields)
    }

    #[test]
    fn joins_present_values() {
        let records = vec![
            record(&[("First", " Ada ".into()), ("Last", "Lovelace".into())]),
            record(&[("First", "Alan".into()), ("Last", CellValue::Null)]),
            record(&[("Last", "Hopper".into()), ("Age", CellValue::Float(85.0))]),
        ];
        let spec = TransformationSpec::new("Full", &["First", "Last", "Age"]).with_separator(" ");
        let combined = combine(&records, &spec);

        let values: Vec<_> = combined.iter().map(|record| record.get("Full").unwrap().to_string()).collect();
        assert_eq!(values, vec!["Ada Lovelace", "Alan", "Hopper 85"]);
        assert_eq!(combined[0].get("First"), Some(&CellValue::String(" Ada ".into())));
        assert_eq!(combined.len(), records.len());
    }

    #[test]
    fn blank_strings_count_as_present() {
        let records = vec![record(&[("A", "x".into()), ("B", "  ".into()), ("C", "z".into())])];
        let spec = TransformationSpec::new("T", &["A", "B", "C"]).with_separator("-");
        assert_eq!(combine(&records, &spec)[0].get("T"), Some(&CellValue::String("x--z".into())));
    }

    #[test]
    fn missing_sources_give_an_empty_target() {
        let records = vec![record(&[("A", CellValue::Int(1))])];
        let spec = TransformationSpec::new("T", &["X", "Y"]);
        assert_eq!(combine(&records, &spec)[0].get("T"), Some(&CellValue::String(String::new())));
    }

    #[test]
    fn targets_only() {
        let records = vec![
            record(&[("A", "a".into()), ("B", "b".into())]),
            record(&[("B", "b2".into())]),
        ];
        let specs = vec![
            TransformationSpec::new("AB", &["A", "B"]).with_separator("/"),
            TransformationSpec::new("Z", &["missing"]),
        ];
        let table = combine_all(&records, &specs, false);
        assert_eq!(table.columns, vec!["AB", "Z"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0]["AB"], CellValue::String("a/b".into()));
        assert_eq!(table.rows[1]["AB"], CellValue::String("b2".into()));
        assert!(table.rows.iter().all(|row| row.len() == 2 && row["Z"] == CellValue::String(String::new())));
    }

    #[test]
    fn with_original_columns() {
        let records = vec![record(&[("A", "a".into()), ("N", CellValue::Int(3))])];
        let table = combine_all(&records, &[TransformationSpec::new("T", &["A", "N"])], true);
        assert_eq!(table.columns, vec!["A", "N", "T"]);
        assert_eq!(table.rows[0]["T"], CellValue::String("a3".into()));
    }

    #[test]
    fn output_names() {
        assert_eq!(normalize_output_name("report"), "report.xlsx");
        assert_eq!(normalize_output_name("report.XLSX"), "report.XLSX");
        assert_eq!(normalize_output_name("legacy.xls"), "legacy.xls");
        assert_eq!(normalize_output_name("data.csv"), "data.csv.xlsx");
    }

    #[test]
    fn saves_into_the_given_directory() {
        let directory = tempfile::tempdir().unwrap();
        let table = combine_all(&[record(&[("A", "a".into())])], &[TransformationSpec::new("T", &["A"])], true);
        let path = table.save(&directory.path().join("out"), "combined").unwrap();
        assert_eq!(path, directory.path().join("out").join("combined.xlsx"));
        assert!(std::fs::read(&path).unwrap().starts_with(b"PK"));
    }
}

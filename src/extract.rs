//! Batched conversion of worksheet rows into [`RowRecord`]s.

use crate::coerce::coerce;
use crate::coerce::CellValue;
use crate::config::ExtractorConfig;
use crate::spreadsheet::sheet::Row;
use crate::spreadsheet::sheet::Sheet;
use crate::structure::ColumnMapping;
use chrono::Local;
use chrono::NaiveDateTime;
use indexmap::IndexMap;
use serde::Serialize;
use serde::Serializer;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One non-blank data row of one worksheet.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RowRecord {
    pub file_name: String,
    pub sheet_name: String,
    /// 1-based row number as shown by spreadsheet applications
    pub row_number: usize,
    /// Column name → value, in column order
    pub fields: IndexMap<String, CellValue>,
    #[serde(serialize_with = "serialize_timestamp")]
    pub extracted_at: NaiveDateTime,
}

impl RowRecord {
    pub fn new(file_name: &str, sheet_name: &str, row_number: usize, fields: IndexMap<String, CellValue>) -> RowRecord {
        RowRecord {
            file_name: file_name.to_owned(),
            sheet_name: sheet_name.to_owned(),
            row_number,
            fields,
            extracted_at: Local::now().naive_local(),
        }
    }

    pub fn get(&self, column: &str) -> Option<&CellValue> {
        self.fields.get(column)
    }
}

fn serialize_timestamp<S: Serializer>(timestamp: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&timestamp.format(TIMESTAMP_FORMAT))
}

/// Walks the data rows of a worksheet in fixed-size windows of row numbers.
#[derive(Copy, Clone, Debug)]
pub struct RowBatchExtractor {
    batch_size: usize,
}

impl Default for RowBatchExtractor {
    fn default() -> Self {
        RowBatchExtractor::new(&ExtractorConfig::default())
    }
}

impl RowBatchExtractor {
    pub fn new(config: &ExtractorConfig) -> RowBatchExtractor {
        RowBatchExtractor {
            batch_size: config.batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Lazily yields the records of `sheet`, one batch per window of `batch_size` rows.
    ///
    /// Windows without any non-blank row produce no batch.
    pub fn batches<'a>(&self, sheet: &'a Sheet, mapping: &'a ColumnMapping, file_name: &'a str) -> Batches<'a> {
        Batches {
            sheet,
            mapping,
            file_name,
            batch_size: self.batch_size,
            next_row: mapping.data_start(),
            last_row: sheet.last_row(),
        }
    }

    /// All records of `sheet` in ascending row order
    pub fn extract(&self, sheet: &Sheet, mapping: &ColumnMapping, file_name: &str) -> Vec<RowRecord> {
        self.batches(sheet, mapping, file_name).flatten().collect()
    }
}

/// Iterator returned by [`RowBatchExtractor::batches`].
pub struct Batches<'a> {
    sheet: &'a Sheet,
    mapping: &'a ColumnMapping,
    file_name: &'a str,
    batch_size: usize,
    next_row: usize,
    last_row: Option<usize>,
}

impl Iterator for Batches<'_> {
    type Item = Vec<RowRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        let last_row = self.last_row?;
        if self.mapping.is_empty() {
            return None;
        }
        while self.next_row <= last_row {
            let lower = self.next_row;
            let upper = lower.saturating_add(self.batch_size - 1).min(last_row);
            self.next_row = upper + 1;

            let batch: Vec<RowRecord> = self
                .sheet
                .rows_between(lower, upper)
                .filter_map(|row| to_record(row, self.mapping, self.file_name, self.sheet.name()))
                .collect();
            log::trace!(
                "Rows {}..={} of '{}' gave {} records",
                lower + 1,
                upper + 1,
                self.sheet.name(),
                batch.len()
            );
            if !batch.is_empty() {
                return Some(batch);
            }
        }
        None
    }
}

/// Builds the record for `row`, or `None` when every mapped value is blank.
fn to_record(row: Row<'_>, mapping: &ColumnMapping, file_name: &str, sheet_name: &str) -> Option<RowRecord> {
    let fields: IndexMap<String, CellValue> = mapping
        .columns()
        .iter()
        .map(|(index, name)| (name.clone(), coerce(row.get(*index))))
        .collect();
    if fields.values().all(CellValue::is_blank) {
        return None;
    }
    Some(RowRecord::new(file_name, sheet_name, row.index() + 1, fields))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spreadsheet::cell::Cell;
    use crate::spreadsheet::cell::CellType;
    use crate::structure::StructureAnalyzer;

    fn sheet() -> Sheet {
        let mut sheet = Sheet::new("People");
        let rows: [(usize, &str, &str); 6] = [
            (0, "Name", "Age"),
            (1, "Ann", "31"),
            (2, "  ", ""),
            (4, "Bob", "40.5"),
            (5, "Cy", ""),
            (9, "Dee", "7"),
        ];
        for (row, name, age) in rows {
            if !name.is_empty() {
                sheet.push(Cell::new(row, 0, CellType::Text, name));
            }
            if !age.is_empty() {
                let kind = if row == 0 { CellType::Text } else { CellType::Number };
                sheet.push(Cell::new(row, 1, kind, age));
            }
        }
        sheet.finish();
        sheet
    }

    #[test]
    fn extracts_non_blank_rows() {
        let sheet = sheet();
        let mapping = StructureAnalyzer::default().analyze(&sheet);
        let records = RowBatchExtractor::default().extract(&sheet, &mapping, "people.xlsx");

        let numbers: Vec<_> = records.iter().map(|record| record.row_number).collect();
        assert_eq!(numbers, vec![2, 5, 6, 10]);
        assert_eq!(records[0].get("Name"), Some(&CellValue::String("Ann".into())));
        assert_eq!(records[0].get("Age"), Some(&CellValue::Int(31)));
        assert_eq!(records[1].get("Age"), Some(&CellValue::Float(40.5)));
        assert_eq!(records[2].get("Age"), Some(&CellValue::Null));
        assert_eq!(records[3].sheet_name, "People");
        assert_eq!(records[3].file_name, "people.xlsx");
    }

    #[test]
    fn batch_size_does_not_change_the_output() {
        let sheet = sheet();
        let mapping = StructureAnalyzer::default().analyze(&sheet);
        let all = RowBatchExtractor::default().extract(&sheet, &mapping, "f");

        for size in [1, 2, 3, 100] {
            let extractor = RowBatchExtractor::new(&ExtractorConfig::default().with_batch_size(size));
            let batches: Vec<_> = extractor.batches(&sheet, &mapping, "f").collect();
            assert!(batches.iter().all(|batch| !batch.is_empty() && batch.len() <= size));

            let numbers: Vec<_> = batches.into_iter().flatten().map(|record| record.row_number).collect();
            let expected: Vec<_> = all.iter().map(|record| record.row_number).collect();
            assert_eq!(numbers, expected);
        }
    }

    #[test]
    fn empty_sheets_yield_nothing() {
        let mut sheet = Sheet::new("Empty");
        sheet.finish();
        let mapping = StructureAnalyzer::default().analyze(&sheet);
        assert_eq!(RowBatchExtractor::default().batches(&sheet, &mapping, "f").count(), 0);
    }

    #[test]
    fn header_only_sheets_yield_nothing() {
        let mut sheet = Sheet::new("Header");
        sheet.push(Cell::new(0, 0, CellType::Text, "Name"));
        sheet.finish();
        let mapping = StructureAnalyzer::default().analyze(&sheet);
        assert_eq!(mapping.len(), 1);
        assert!(RowBatchExtractor::default().extract(&sheet, &mapping, "f").is_empty());
    }

    #[test]
    fn timestamps_serialize_to_seconds() {
        let mut record = RowRecord::new("f.xlsx", "S", 2, IndexMap::from([("A".to_owned(), CellValue::Int(1))]));
        record.extracted_at = NaiveDateTime::parse_from_str("2024-05-01 08:09:10.123", "%Y-%m-%d %H:%M:%S%.f").unwrap();
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["extracted_at"], "2024-05-01 08:09:10");
        assert_eq!(json["fields"]["A"], 1);
        assert_eq!(json["row_number"], 2);
    }
}

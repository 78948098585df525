//! Column schema inference for one worksheet.

use crate::coerce::coerce;
use crate::coerce::string_form;
use crate::config::ExtractorConfig;
use crate::spreadsheet::sheet::Sheet;
use serde::Serialize;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashSet;

/// Columns of one worksheet, ordered by index, with unique non-blank names.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ColumnMapping {
    columns: Vec<(usize, String)>,
    /// Zero-based index of the header row, if the sheet has one
    header_row: Option<usize>,
    /// First row holding data
    data_start: usize,
}

impl ColumnMapping {
    /// `(column index, name)` pairs in column order
    pub fn columns(&self) -> &[(usize, String)] {
        &self.columns
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.columns.iter().map(|(_, name)| name.as_str())
    }

    pub fn header_row(&self) -> Option<usize> {
        self.header_row
    }

    pub fn data_start(&self) -> usize {
        self.data_start
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Derives a [`ColumnMapping`] from evenly spaced sample rows.
///
/// Columns whose only data lies between sampled rows are not part of the mapping.
#[derive(Copy, Clone, Debug)]
pub struct StructureAnalyzer {
    sample_rows: usize,
    header_row: bool,
}

impl Default for StructureAnalyzer {
    fn default() -> Self {
        StructureAnalyzer::new(&ExtractorConfig::default())
    }
}

impl StructureAnalyzer {
    pub fn new(config: &ExtractorConfig) -> StructureAnalyzer {
        StructureAnalyzer {
            sample_rows: config.sample_rows.max(1),
            header_row: config.header_row,
        }
    }

    pub fn analyze(&self, sheet: &Sheet) -> ColumnMapping {
        let (Some(first_row), Some(last_row)) = (sheet.first_row(), sheet.last_row()) else {
            return ColumnMapping::default();
        };

        let row_count = last_row - first_row + 1;
        let sample = row_count.min(self.sample_rows);
        let step = (row_count / sample).max(1);

        let mut max_columns = 0usize;
        let mut used = BTreeSet::<usize>::new();
        for index in (first_row..=last_row).step_by(step) {
            let Some(row) = sheet.row(index) else {
                continue;
            };
            max_columns = max_columns.max(row.last_cell_num());
            for cell in row.cells() {
                if !coerce(Some(cell)).is_blank() {
                    used.insert(cell.col());
                }
            }
        }
        log::debug!(
            "Sheet '{}' has up to {} columns with data in {} positions",
            sheet.name(),
            max_columns,
            used.len()
        );

        let mut columns = BTreeMap::<usize, String>::new();
        let header_row = if self.header_row { sheet.row(first_row) } else { None };
        match header_row {
            Some(header) => {
                let mut taken = HashSet::<String>::new();
                for index in 0..max_columns {
                    let cell = header.get(index);
                    if !used.contains(&index) && cell.is_none() {
                        continue;
                    }
                    let mut name = string_form(cell).trim().to_owned();
                    if name.is_empty() {
                        name = synthetic_name(index);
                    }
                    let original = name.clone();
                    let mut suffix = 1usize;
                    while taken.contains(&name.to_lowercase()) {
                        name = format!("{original}_{suffix}");
                        suffix += 1;
                    }
                    taken.insert(name.to_lowercase());
                    columns.insert(index, name);
                }
            }
            None => {
                for index in &used {
                    columns.insert(*index, synthetic_name(*index));
                }
            }
        }

        let header_row = header_row.map(|row| row.index());
        ColumnMapping {
            columns: columns.into_iter().collect(),
            header_row,
            data_start: header_row.map(|row| row + 1).unwrap_or(first_row),
        }
    }
}

fn synthetic_name(index: usize) -> String {
    format!("Column_{}", index + 1)
}

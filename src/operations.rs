//! Aggregate reports over extracted records.

use crate::extract::RowRecord;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
#[error("Unknown operation: {0} (available: count, summary, groupBySheet, groupByFile, numeric_analysis)")]
pub struct UnknownOperation(pub String);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum DataOperation {
    Count,
    Summary,
    GroupBySheet,
    GroupByFile,
    NumericAnalysis,
}

impl FromStr for DataOperation {
    type Err = UnknownOperation;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name.to_lowercase().as_str() {
            "count" => Ok(DataOperation::Count),
            "summary" => Ok(DataOperation::Summary),
            "groupbysheet" => Ok(DataOperation::GroupBySheet),
            "groupbyfile" => Ok(DataOperation::GroupByFile),
            "numeric_analysis" => Ok(DataOperation::NumericAnalysis),
            _ => Err(UnknownOperation(name.to_owned())),
        }
    }
}

impl Display for DataOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DataOperation::Count => "count",
            DataOperation::Summary => "summary",
            DataOperation::GroupBySheet => "groupBySheet",
            DataOperation::GroupByFile => "groupByFile",
            DataOperation::NumericAnalysis => "numeric_analysis",
        };
        f.write_str(name)
    }
}

/// Statistics of one numeric column
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ColumnStatistics {
    pub count: usize,
    pub sum: f64,
    pub average: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum OperationReport {
    Count {
        count: usize,
    },
    Summary(DataSummary),
    GroupBySheet {
        groups: BTreeMap<String, usize>,
    },
    GroupByFile {
        groups: BTreeMap<String, usize>,
    },
    NumericAnalysis {
        columns: BTreeMap<String, ColumnStatistics>,
    },
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DataSummary {
    pub total_records: usize,
    pub unique_files: usize,
    pub unique_sheets: usize,
    pub file_distribution: BTreeMap<String, usize>,
    pub sheet_distribution: BTreeMap<String, usize>,
}

pub fn perform(operation: DataOperation, records: &[RowRecord]) -> OperationReport {
    match operation {
        DataOperation::Count => OperationReport::Count { count: records.len() },
        DataOperation::Summary => OperationReport::Summary(data_summary(records)),
        DataOperation::GroupBySheet => OperationReport::GroupBySheet {
            groups: count_by(records, |record| &record.sheet_name),
        },
        DataOperation::GroupByFile => OperationReport::GroupByFile {
            groups: count_by(records, |record| &record.file_name),
        },
        DataOperation::NumericAnalysis => OperationReport::NumericAnalysis {
            columns: numeric_analysis(records),
        },
    }
}

pub fn data_summary(records: &[RowRecord]) -> DataSummary {
    let file_distribution = count_by(records, |record| &record.file_name);
    let sheet_distribution = count_by(records, |record| &record.sheet_name);
    DataSummary {
        total_records: records.len(),
        unique_files: file_distribution.len(),
        unique_sheets: sheet_distribution.len(),
        file_distribution,
        sheet_distribution,
    }
}

fn count_by(records: &[RowRecord], key: impl Fn(&RowRecord) -> &String) -> BTreeMap<String, usize> {
    let mut groups = BTreeMap::new();
    for record in records {
        *groups.entry(key(record).clone()).or_insert(0) += 1;
    }
    groups
}

fn numeric_analysis(records: &[RowRecord]) -> BTreeMap<String, ColumnStatistics> {
    let mut columns = BTreeMap::<String, ColumnStatistics>::new();
    for record in records {
        for (name, value) in &record.fields {
            let Some(value) = value.as_f64() else {
                continue;
            };
            columns
                .entry(name.clone())
                .and_modify(|statistics| {
                    statistics.count += 1;
                    statistics.sum += value;
                    statistics.min = statistics.min.min(value);
                    statistics.max = statistics.max.max(value);
                })
                .or_insert(ColumnStatistics {
                    count: 1,
                    sum: value,
                    average: 0.0,
                    min: value,
                    max: value,
                });
        }
    }
    for statistics in columns.values_mut() {
        statistics.average = statistics.sum / statistics.count as f64;
    }
    columns
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coerce::CellValue;
    use indexmap::IndexMap;

    fn records() -> Vec<RowRecord> {
        let row = |file: &str, sheet: &str, amount: CellValue| {
            let fields = IndexMap::from([("Amount".to_owned(), amount), ("Name".to_owned(), CellValue::from("x"))]);
            RowRecord::new(file, sheet, 2, fields)
        };
        vec![
            row("a.xlsx", "Q1", CellValue::Int(10)),
            row("a.xlsx", "Q2", CellValue::Float(2.5)),
            row("b.xls", "Q1", CellValue::Null),
            row("b.xls", "Q1", CellValue::Int(-4)),
        ]
    }

    #[test]
    fn parses_operation_names() {
        assert_eq!("COUNT".parse::<DataOperation>(), Ok(DataOperation::Count));
        assert_eq!("groupBySheet".parse::<DataOperation>(), Ok(DataOperation::GroupBySheet));
        assert_eq!("Numeric_Analysis".parse::<DataOperation>(), Ok(DataOperation::NumericAnalysis));
        assert_eq!("median".parse::<DataOperation>(), Err(UnknownOperation("median".to_owned())));
    }

    #[test]
    fn counts_and_groups() {
        let records = records();
        assert_eq!(perform(DataOperation::Count, &records), OperationReport::Count { count: 4 });
        assert_eq!(
            perform(DataOperation::GroupBySheet, &records),
            OperationReport::GroupBySheet {
                groups: BTreeMap::from([("Q1".to_owned(), 3), ("Q2".to_owned(), 1)])
            }
        );
        assert_eq!(
            perform(DataOperation::Summary, &records),
            OperationReport::Summary(DataSummary {
                total_records: 4,
                unique_files: 2,
                unique_sheets: 2,
                file_distribution: BTreeMap::from([("a.xlsx".to_owned(), 2), ("b.xls".to_owned(), 2)]),
                sheet_distribution: BTreeMap::from([("Q1".to_owned(), 3), ("Q2".to_owned(), 1)]),
            })
        );
    }

    #[test]
    fn numeric_columns() {
        let OperationReport::NumericAnalysis { columns } = perform(DataOperation::NumericAnalysis, &records()) else {
            panic!("wrong report");
        };
        assert_eq!(columns.len(), 1);
        let amount = &columns["Amount"];
        assert_eq!(amount.count, 3);
        assert_eq!(amount.sum, 8.5);
        assert_eq!(amount.min, -4.0);
        assert_eq!(amount.max, 10.0);
        assert!((amount.average - 8.5 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn summary() {
        let summary = data_summary(&records());
        assert_eq!(summary.total_records, 4);
        assert_eq!(summary.unique_files, 2);
        assert_eq!(summary.file_distribution["b.xls"], 2);
        assert_eq!(summary.sheet_distribution["Q2"], 1);

        let json = serde_json::to_value(perform(DataOperation::Count, &records())).unwrap();
        assert_eq!(json, serde_json::json!({"operation": "count", "count": 4}));

        let json = serde_json::to_value(perform(DataOperation::Summary, &records())).unwrap();
        assert_eq!(json["operation"], "summary");
        assert_eq!(json["file_distribution"]["b.xls"], 2);
    }
}

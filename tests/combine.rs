mod common;

use common::XlsxFixture;
use pretty_assertions::assert_eq;
use sheet_extract::combine_all;
use sheet_extract::CellValue;
use sheet_extract::ExtractorConfig;
use sheet_extract::FileExtractionOrchestrator;
use sheet_extract::NoopMetrics;
use sheet_extract::SourceFile;
use sheet_extract::TransformationSpec;
use sheet_extract::WorkbookLoader;
use sheet_extract::OUTPUT_SHEET_NAME;
use std::sync::Arc;

fn people() -> XlsxFixture {
    XlsxFixture::new().sheet(
        "People",
        &[
            &["First", "Last", "City", "Born"],
            &["Ada", "Lovelace", "London", "@6920"],
            &["Alan", "", "Wilmslow", ""],
            &["", "Hopper", "", "1906"],
        ],
    )
}

fn extract(file: &SourceFile) -> Vec<sheet_extract::RowRecord> {
    let orchestrator = FileExtractionOrchestrator::new(ExtractorConfig::default(), Arc::new(NoopMetrics));
    let mut results = orchestrator.extract_all(std::slice::from_ref(file));
    results.remove(0).records
}

#[test]
fn targets_only_table_has_exactly_the_target_columns() {
    let directory = tempfile::tempdir().unwrap();
    let records = extract(&people().write(directory.path(), "people.xlsx"));
    assert_eq!(records.len(), 3);

    let specs = vec![
        TransformationSpec::new("Name", &["First", "Last"]).with_separator(" "),
        TransformationSpec::new("Origin", &["City", "Country"]).with_separator(", "),
    ];
    let table = combine_all(&records, &specs, false);
    assert_eq!(table.columns, vec!["Name", "Origin"]);

    let values: Vec<Vec<String>> = table
        .rows
        .iter()
        .map(|row| row.values().map(ToString::to_string).collect())
        .collect();
    assert_eq!(
        values,
        vec![
            vec!["Ada Lovelace".to_owned(), "London".to_owned()],
            vec!["Alan".to_owned(), "Wilmslow".to_owned()],
            vec!["Hopper".to_owned(), String::new()],
        ]
    );
}

#[test]
fn saved_workbook_reads_back() {
    let directory = tempfile::tempdir().unwrap();
    let records = extract(&people().write(directory.path(), "people.xlsx"));

    let specs = vec![TransformationSpec::new("Name", &["First", "Last"]).with_separator(" ")];
    let table = combine_all(&records, &specs, true);
    assert_eq!(table.columns, vec!["First", "Last", "City", "Born", "Name"]);

    let path = table.save(&directory.path().join("out"), "people_combined").unwrap();
    assert!(path.ends_with("people_combined.xlsx"));

    let file = SourceFile::from_path(&path).unwrap();
    let handle = WorkbookLoader::default().load(&file).unwrap();
    assert_eq!(handle.sheet_names(), vec![OUTPUT_SHEET_NAME]);
    handle.close();

    let reread = extract(&file);
    assert_eq!(reread.len(), 3);
    assert_eq!(reread[0].fields["Name"], CellValue::String("Ada Lovelace".to_owned()));
    assert_eq!(reread[0].fields["Born"], CellValue::Date("1918-12-11".to_owned()));
    assert_eq!(reread[2].fields["Born"], CellValue::Int(1906));
    assert_eq!(reread[1].fields["Last"], CellValue::Null);
    assert_eq!(reread[2].fields["First"], CellValue::Null);
}

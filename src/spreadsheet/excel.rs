//! Helpers shared by the OOXML readers (.xlsx, .xlsb)
use crate::config::ArchiveLimits;
use crate::error::ExtractError;
use crate::error::ResultMessage;
use crate::helpers::reader::SourceReader;
use crate::helpers::xml::XmlNodeHelper;
use crate::helpers::zip::ZipHelper;
use crate::match_xml_events;
use crate::spreadsheet::cell::CellType;
use crate::spreadsheet::SpreadsheetError;
use quick_xml::events::Event;
use std::borrow::Cow;
use std::collections::HashMap;
use zip::ZipArchive;

const TAG_RELATIONSHIP: &[u8] = b"Relationship";

/// Parts that carry no cell data but are still parsed in strict mode
const AUXILIARY_PREFIXES: [&str; 3] = ["xl/pivotCache/", "xl/pivotTables/", "xl/externalLinks/"];

/// Loads the worksheet relationships of a workbook part as id → zip path
pub(crate) fn load_relationships(
    zip: &mut ZipArchive<SourceReader>,
    path: &str,
    limits: &ArchiveLimits,
) -> Result<HashMap<String, String>, ExtractError> {
    let mut reader = zip.xml_reader(path, limits)?
        .ok_or_else(|| SpreadsheetError::MissingPart(path.to_owned()))?;
    let mut relationships: HashMap<String, String> = HashMap::new();
    match_xml_events!(reader => {
        Event::Start(event) if event.local_name().as_ref() == TAG_RELATIONSHIP => {
            let id = event.get_attribute_value("Id")?;
            let kind = event.get_attribute_value("Type")?;
            let target = event.get_attribute_value("Target")?;
            if kind.map(|it| it.ends_with("/worksheet")).unwrap_or(true) {
                if let Some((id, target)) = id.zip(target) {
                    relationships.insert(id.to_string(), to_zip_path(target));
                }
            }
        }
    });
    Ok(relationships)
}

/// Maps every XF entry to a cell type using custom then built-in formats
pub(crate) fn load_number_formats(format_indexes: Vec<String>, custom_formats: HashMap<String, CellType>, is_1904: bool) -> Vec<CellType> {
    format_indexes
        .iter()
        .map(|id| {
            custom_formats
                .get(id)
                .copied()
                .or_else(|| CellType::parse_builtin_number_format_id(id, is_1904))
                .unwrap_or(CellType::Number)
        })
        .collect()
}

/// Resolves a relationship target against the `xl/` folder
pub(crate) fn to_zip_path(path: Cow<'_, str>) -> String {
    if let Some(path) = path.strip_prefix('/') {
        path.to_string()
    } else if path.starts_with("xl/") {
        path.to_string()
    } else {
        format!("xl/{path}")
    }
}

/// Parses every XML part under the auxiliary folders, failing on the first part that is
/// not well-formed UTF-8.
pub(crate) fn validate_auxiliary_parts(zip: &mut ZipArchive<SourceReader>, limits: &ArchiveLimits) -> Result<(), ExtractError> {
    let names: Vec<String> = AUXILIARY_PREFIXES
        .iter()
        .flat_map(|prefix| zip.names_with_prefix(prefix))
        .filter(|name| name.to_ascii_lowercase().ends_with(".xml"))
        .collect();
    for name in names {
        if let Some(mut reader) = zip.xml_reader(&name, limits)? {
            reader.validate().with_prefix(&format!("Invalid part '{name}'"))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zip_paths() {
        assert_eq!(to_zip_path(Cow::Borrowed("worksheets/sheet1.xml")), "xl/worksheets/sheet1.xml");
        assert_eq!(to_zip_path(Cow::Borrowed("/xl/worksheets/sheet1.xml")), "xl/worksheets/sheet1.xml");
        assert_eq!(to_zip_path(Cow::Borrowed("xl/worksheets/sheet2.xml")), "xl/worksheets/sheet2.xml");
    }

    #[test]
    fn number_formats_prefer_custom() {
        let custom = HashMap::from([("164".to_owned(), CellType::NumberDateTime1900)]);
        let formats = load_number_formats(vec!["0".into(), "164".into(), "14".into(), "999".into()], custom, false);
        assert_eq!(
            formats,
            vec![CellType::Number, CellType::NumberDateTime1900, CellType::NumberDate1900, CellType::Number]
        );
    }
}

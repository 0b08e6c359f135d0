//! Marker check over a downloaded workbook's first sheet
//!
//! Cells are read in document order (row by row) with shared strings
//! resolved, which is the order a flattened sheet-to-rows export yields.
//! Formatting and formulas are not interpreted.

use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;
use zip::ZipArchive;

use crate::error::{E2eError, E2eResult};

const SHARED_STRINGS: &str = "xl/sharedStrings.xml";
const WORKBOOK: &str = "xl/workbook.xml";
const WORKBOOK_RELS: &str = "xl/_rels/workbook.xml.rels";
const DEFAULT_SHEET: &str = "xl/worksheets/sheet1.xml";

static SHARED_ITEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<si(?:\s[^>]*)?(?:/>|>(.*?)</si>)").expect("shared item pattern"));
static PHONETIC_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<rPh\b.*?</rPh>").expect("phonetic run pattern"));
static TEXT_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<t(?:\s[^>]*)?>(.*?)</t>").expect("text run pattern"));
static CELL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<c\b([^>]*?)(?:/>|>(.*?)</c>)").expect("cell pattern"));
static CELL_TYPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\bt="([^"]*)""#).expect("cell type pattern"));
static CELL_VALUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<v>(.*?)</v>").expect("cell value pattern"));
static FIRST_SHEET_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<sheet\b[^>]*\br:id="([^"]+)""#).expect("sheet pattern"));
static RELATIONSHIP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<Relationship\b[^>]*>").expect("relationship pattern"));
static ATTR_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r#"\bId="([^"]+)""#).expect("id pattern"));
static ATTR_TARGET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\bTarget="([^"]+)""#).expect("target pattern"));

fn read_entry<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> E2eResult<Option<String>> {
    match archive.by_name(name) {
        Ok(mut entry) => {
            let mut xml = String::new();
            entry.read_to_string(&mut xml)?;
            Ok(Some(xml))
        }
        Err(zip::result::ZipError::FileNotFound) => Ok(None),
        Err(e) => Err(E2eError::Content(format!("reading {}: {}", name, e))),
    }
}

fn unescape_xml(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Concatenated text runs of one rich or plain string
fn joined_text(fragment: &str) -> String {
    let plain = PHONETIC_RUN.replace_all(fragment, "");
    TEXT_RUN
        .captures_iter(&plain)
        .map(|c| unescape_xml(&c[1]))
        .collect()
}

/// Shared string table; rich-text items are joined into one string
pub fn parse_shared_strings(xml: &str) -> Vec<String> {
    SHARED_ITEM
        .captures_iter(xml)
        .map(|c| c.get(1).map(|m| joined_text(m.as_str())).unwrap_or_default())
        .collect()
}

/// Non-empty cell texts of a worksheet in document order
pub fn parse_sheet_cells(xml: &str, shared: &[String]) -> E2eResult<Vec<String>> {
    let mut cells = Vec::new();
    for cell in CELL.captures_iter(xml) {
        let attrs = &cell[1];
        let body = cell.get(2).map(|m| m.as_str()).unwrap_or_default();
        let kind = CELL_TYPE
            .captures(attrs)
            .map(|c| c[1].to_string())
            .unwrap_or_default();
        let value = CELL_VALUE.captures(body).map(|c| c[1].to_string());

        let text = match kind.as_str() {
            "s" => {
                let Some(raw) = value else { continue };
                let index: usize = raw.trim().parse().map_err(|_| {
                    E2eError::Content(format!("bad shared string index \"{}\"", raw))
                })?;
                shared.get(index).cloned().ok_or_else(|| {
                    E2eError::Content(format!(
                        "shared string {} out of range ({} entries)",
                        index,
                        shared.len()
                    ))
                })?
            }
            "inlineStr" => joined_text(body),
            _ => value.map(|v| unescape_xml(&v)).unwrap_or_default(),
        };
        if !text.is_empty() {
            cells.push(text);
        }
    }
    Ok(cells)
}

/// Worksheet part of the first sheet listed in the workbook
fn first_sheet_path<R: Read + Seek>(archive: &mut ZipArchive<R>) -> E2eResult<String> {
    let workbook = read_entry(archive, WORKBOOK)?;
    let rels = read_entry(archive, WORKBOOK_RELS)?;
    let (Some(workbook), Some(rels)) = (workbook, rels) else {
        return Ok(DEFAULT_SHEET.to_string());
    };
    let Some(id) = FIRST_SHEET_ID.captures(&workbook).map(|c| c[1].to_string()) else {
        return Ok(DEFAULT_SHEET.to_string());
    };

    let target = RELATIONSHIP
        .find_iter(&rels)
        .map(|m| m.as_str())
        .find(|rel| ATTR_ID.captures(rel).is_some_and(|c| c[1] == id))
        .and_then(|rel| ATTR_TARGET.captures(rel).map(|c| c[1].to_string()));

    Ok(match target {
        Some(t) if t.starts_with('/') => t.trim_start_matches('/').to_string(),
        Some(t) => format!("xl/{}", t),
        None => DEFAULT_SHEET.to_string(),
    })
}

/// Cell texts of the workbook's first sheet, in document order
pub fn workbook_strings(path: &Path) -> E2eResult<Vec<String>> {
    let file = File::open(path)?;
    let mut archive = ZipArchive::new(file)
        .map_err(|e| E2eError::Content(format!("not a workbook ({}): {}", path.display(), e)))?;

    let shared = read_entry(&mut archive, SHARED_STRINGS)?
        .map(|xml| parse_shared_strings(&xml))
        .unwrap_or_default();
    let sheet_path = first_sheet_path(&mut archive)?;
    let sheet = read_entry(&mut archive, &sheet_path)?.ok_or_else(|| {
        E2eError::Content(format!("{} has no worksheet {}", path.display(), sheet_path))
    })?;

    let cells = parse_sheet_cells(&sheet, &shared)?;
    debug!(
        "Read {} cell(s) from {} ({})",
        cells.len(),
        path.display(),
        sheet_path
    );
    Ok(cells)
}

/// Every marker must appear, and in the given order
pub fn check_markers(strings: &[String], markers: &[String]) -> E2eResult<()> {
    let mut last_found: Option<usize> = None;
    for marker in markers {
        let found = strings
            .iter()
            .position(|s| s == marker)
            .ok_or_else(|| E2eError::Content(format!("required marker \"{}\" is missing", marker)))?;
        if last_found.is_some_and(|last| found < last) {
            return Err(E2eError::Content(format!(
                "marker \"{}\" appears before the previous marker",
                marker
            )));
        }
        last_found = Some(found);
    }
    Ok(())
}

/// Open the saved workbook and check its markers
pub fn verify_workbook(path: &Path, markers: &[String]) -> E2eResult<()> {
    if markers.is_empty() {
        return Ok(());
    }
    let strings = workbook_strings(path)?;
    check_markers(&strings, markers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    fn markers(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    /// Minimal xlsx with the given shared-string items and sheet cell xml
    fn write_workbook(path: &Path, shared_items: &[&str], cells: &str) {
        let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
        let opts = SimpleFileOptions::default();

        zip.start_file(SHARED_STRINGS, opts).unwrap();
        let mut sst = String::from(r#"<?xml version="1.0"?><sst>"#);
        for item in shared_items {
            sst.push_str(&format!("<si>{}</si>", item));
        }
        sst.push_str("</sst>");
        zip.write_all(sst.as_bytes()).unwrap();

        zip.start_file(DEFAULT_SHEET, opts).unwrap();
        let sheet = format!(
            r#"<?xml version="1.0"?><worksheet><sheetData>{}</sheetData></worksheet>"#,
            cells
        );
        zip.write_all(sheet.as_bytes()).unwrap();
        zip.finish().unwrap();
    }

    fn shared_cell(r: &str, index: usize) -> String {
        format!(r#"<c r="{}" t="s"><v>{}</v></c>"#, r, index)
    }

    #[test]
    fn test_cells_follow_sheet_order_not_table_order() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("book.xlsx");
        let cells = format!(
            r#"<row r="1">{}{}<c r="C1"/></row><row r="2">{}<c r="B2"><v>42</v></c></row>"#,
            shared_cell("A1", 1),
            shared_cell("B1", 0),
            shared_cell("A2", 2),
        );
        write_workbook(
            &path,
            &["<t>F_Ca</t>", "<t>F_AL</t>", "<t>F_Cr</t>"],
            &cells,
        );

        let strings = workbook_strings(&path).unwrap();
        assert_eq!(strings, markers(&["F_AL", "F_Ca", "F_Cr", "42"]));
        verify_workbook(&path, &markers(&["F_AL", "F_Ca", "F_Cr"])).unwrap();
    }

    #[test]
    fn test_rich_text_runs_are_joined() {
        let shared = parse_shared_strings(
            r#"<sst><si><r><rPr><b/></rPr><t>F_</t></r><r><t>AL</t></r><rPh><t>x</t></rPh></si><si/><si><t xml:space="preserve">a &amp; b</t></si></sst>"#,
        );
        assert_eq!(shared, markers(&["F_AL", "", "a & b"]));
    }

    #[test]
    fn test_inline_strings_are_read() {
        let cells = parse_sheet_cells(
            r#"<row><c r="A1" t="inlineStr"><is><t>F_AL</t></is></c><c r="B1" t="str"><f>X()</f><v>F_Ca</v></c></row>"#,
            &[],
        )
        .unwrap();
        assert_eq!(cells, markers(&["F_AL", "F_Ca"]));
    }

    #[test]
    fn test_shared_index_out_of_range() {
        let err = parse_sheet_cells(r#"<c r="A1" t="s"><v>3</v></c>"#, &markers(&["a"])).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn test_first_sheet_resolved_through_relationships() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("book.xlsx");
        let mut zip = zip::ZipWriter::new(File::create(&path).unwrap());
        let opts = SimpleFileOptions::default();
        zip.start_file(WORKBOOK, opts).unwrap();
        zip.write_all(br#"<workbook><sheets><sheet name="COA" sheetId="1" r:id="rId7"/></sheets></workbook>"#)
            .unwrap();
        zip.start_file(WORKBOOK_RELS, opts).unwrap();
        zip.write_all(br#"<Relationships><Relationship Id="rId1" Target="worksheets/sheet1.xml"/><Relationship Id="rId7" Target="worksheets/sheet2.xml"/></Relationships>"#)
            .unwrap();
        zip.start_file("xl/worksheets/sheet1.xml", opts).unwrap();
        zip.write_all(br#"<worksheet><sheetData><row><c t="inlineStr"><is><t>other</t></is></c></row></sheetData></worksheet>"#)
            .unwrap();
        zip.start_file("xl/worksheets/sheet2.xml", opts).unwrap();
        zip.write_all(br#"<worksheet><sheetData><row><c t="inlineStr"><is><t>F_AL</t></is></c></row></sheetData></worksheet>"#)
            .unwrap();
        zip.finish().unwrap();

        assert_eq!(workbook_strings(&path).unwrap(), markers(&["F_AL"]));
    }

    #[test]
    fn test_missing_marker() {
        let strings = markers(&["F_AL", "F_Cr"]);
        let err = check_markers(&strings, &markers(&["F_AL", "F_Ca", "F_Cr"])).unwrap_err();
        assert!(err.to_string().contains("\"F_Ca\" is missing"));
    }

    #[test]
    fn test_out_of_order_marker() {
        let strings = markers(&["F_Ca", "F_AL", "F_Cr"]);
        let err = check_markers(&strings, &markers(&["F_AL", "F_Ca"])).unwrap_err();
        assert!(err.to_string().contains("before the previous marker"));
    }

    #[test]
    fn test_no_markers_skips_reading() {
        verify_workbook(Path::new("/nonexistent.xlsx"), &[]).unwrap();
    }

    #[test]
    fn test_non_zip_is_content_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("fake.xlsx");
        std::fs::write(&path, b"plain text").unwrap();
        assert!(matches!(
            workbook_strings(&path),
            Err(E2eError::Content(_))
        ));
    }
}

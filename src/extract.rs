//! Content extraction for uploaded documents.
//!
//! | Category | Result | Backend |
//! |----------|--------|---------|
//! | `excel` | [`Extracted::Grid`], all sheets stacked | zip + quick-xml |
//! | `csv` | [`Extracted::Grid`] | [`parse_csv`] |
//! | `pdf` | [`Extracted::Text`] | pdf-extract |
//! | `other` | [`Extracted::Text`] | UTF-8 decode |
//!
//! Extraction is pure and CPU-bound: bytes in, content out. Callers run it
//! on the blocking pool. Failures here are terminal for the indexing run;
//! retrying would produce the same error. Cell references outside the
//! worksheet bounds of the format are rejected rather than allocated.

use std::collections::BTreeMap;
use std::io::Read;

use quick_xml::events::{BytesStart, Event};

use finreport_core::analysis::grid::{parse_csv, Grid};
use finreport_core::models::DocumentCategory;

const XLSX_MAX_SHEETS: usize = 100;
const XLSX_MAX_CELLS_PER_SHEET: usize = 200_000;
/// Worksheet bounds of the format (column `XFD`, row 1,048,576).
const XLSX_MAX_COLUMNS: usize = 16_384;
const XLSX_MAX_ROWS: usize = 1_048_576;
/// Zip-bomb guard for a single decompressed entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("spreadsheet extraction failed: {0}")]
    Xlsx(String),
    #[error("legacy .xls workbooks are not supported; save the file as .xlsx or .csv")]
    LegacyWorkbook,
    #[error("file is not valid UTF-8 text")]
    InvalidUtf8,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Extracted {
    Grid(Grid),
    Text(String),
}

impl Extracted {
    /// Flattened text, used for the content preview and text chunking.
    pub fn to_text(&self) -> String {
        match self {
            Extracted::Grid(grid) => grid.to_text(),
            Extracted::Text(text) => text.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Extracted::Grid(grid) => grid.is_empty(),
            Extracted::Text(text) => text.trim().is_empty(),
        }
    }
}

pub fn extract(category: DocumentCategory, bytes: &[u8]) -> Result<Extracted, ExtractError> {
    match category {
        DocumentCategory::Excel => extract_xlsx(bytes).map(Extracted::Grid),
        DocumentCategory::Csv => {
            let text = std::str::from_utf8(bytes).map_err(|_| ExtractError::InvalidUtf8)?;
            Ok(Extracted::Grid(parse_csv(text)))
        }
        DocumentCategory::Pdf => pdf_extract::extract_text_from_mem(bytes)
            .map(Extracted::Text)
            .map_err(|e| ExtractError::Pdf(e.to_string())),
        DocumentCategory::Other => std::str::from_utf8(bytes)
            .map(|s| Extracted::Text(s.to_string()))
            .map_err(|_| ExtractError::InvalidUtf8),
    }
}

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn xlsx_err(e: impl std::fmt::Display) -> ExtractError {
    ExtractError::Xlsx(e.to_string())
}

fn read_zip_entry_bounded(archive: &mut Archive<'_>, name: &str) -> Result<Vec<u8>, ExtractError> {
    let entry = archive.by_name(name).map_err(xlsx_err)?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(xlsx_err)?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Xlsx(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, MAX_XML_ENTRY_BYTES
        )));
    }
    Ok(out)
}

fn extract_xlsx(bytes: &[u8]) -> Result<Grid, ExtractError> {
    // OLE2 compound files (.xls) are not zip archives.
    if !bytes.starts_with(b"PK") {
        return Err(ExtractError::LegacyWorkbook);
    }
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(xlsx_err)?;
    let shared_strings = if archive.file_names().any(|n| n == "xl/sharedStrings.xml") {
        let xml = read_zip_entry_bounded(&mut archive, "xl/sharedStrings.xml")?;
        read_shared_strings(&xml)?
    } else {
        Vec::new()
    };

    let mut grid = Grid::new(Vec::new());
    for name in list_worksheet_names(&archive).into_iter().take(XLSX_MAX_SHEETS) {
        let xml = read_zip_entry_bounded(&mut archive, &name)?;
        let sheet = read_sheet(&xml, &shared_strings)?;
        if !sheet.is_empty() {
            grid.append(sheet);
        }
    }
    Ok(grid)
}

/// One string per `<si>`; rich-text runs are concatenated.
fn read_shared_strings(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_t = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_t => {
                if let Some(s) = current.as_mut() {
                    s.push_str(&te.unescape().map_err(xlsx_err)?);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"si" => strings.push(current.take().unwrap_or_default()),
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Ok(Event::Eof) => break,
            Err(e) => return Err(xlsx_err(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

fn list_worksheet_names(archive: &Archive<'_>) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches("xl/worksheets/sheet")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

/// Zero-based column index from a cell reference such as `"AB12"`.
/// `None` when the reference has no column letters.
fn column_index(reference: &str) -> Result<Option<usize>, ExtractError> {
    let out_of_range = || ExtractError::Xlsx(format!("cell reference {reference:?} out of range"));
    let mut col = 0usize;
    let mut letters = 0;
    for b in reference.bytes().take_while(|b| b.is_ascii_alphabetic()) {
        letters += 1;
        col = col
            .checked_mul(26)
            .and_then(|c| c.checked_add((b.to_ascii_uppercase() - b'A' + 1) as usize))
            .filter(|c| *c <= XLSX_MAX_COLUMNS)
            .ok_or_else(out_of_range)?;
    }
    Ok((letters > 0).then(|| col - 1))
}

/// Zero-based row index from a row's `r` attribute.
fn row_index(raw: &str) -> Result<usize, ExtractError> {
    match raw.trim().parse::<usize>() {
        Ok(r) if (1..=XLSX_MAX_ROWS).contains(&r) => Ok(r - 1),
        _ => Err(ExtractError::Xlsx(format!("row reference {raw:?} out of range"))),
    }
}

fn attr(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

#[derive(Default)]
struct CellState {
    col: usize,
    kind: Option<String>,
    text: String,
}

fn cell_value(cell: &CellState, shared_strings: &[String]) -> String {
    let raw = cell.text.trim();
    match cell.kind.as_deref() {
        Some("s") => raw
            .parse::<usize>()
            .ok()
            .and_then(|i| shared_strings.get(i))
            .cloned()
            .unwrap_or_default(),
        Some("b") => if raw == "1" { "TRUE" } else { "FALSE" }.to_string(),
        Some("inlineStr") | Some("str") => cell.text.clone(),
        _ => raw.to_string(),
    }
}

/// Read one worksheet into rows, placing each cell at the column its `r`
/// reference names so sparse rows keep their alignment.
fn read_sheet(xml: &[u8], shared_strings: &[String]) -> Result<Grid, ExtractError> {
    let mut rows: BTreeMap<usize, Vec<String>> = BTreeMap::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();

    let mut row_idx = 0usize;
    let mut next_col = 0usize;
    let mut cell: Option<CellState> = None;
    let mut capture = false;
    let mut cell_count = 0usize;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => {
                    row_idx = match attr(&e, b"r") {
                        Some(r) => row_index(&r)?,
                        None => rows.keys().next_back().map_or(0, |k| k + 1),
                    };
                    next_col = 0;
                }
                b"c" => {
                    let col = match attr(&e, b"r") {
                        Some(r) => column_index(&r)?.unwrap_or(next_col),
                        None => next_col,
                    };
                    if col >= XLSX_MAX_COLUMNS {
                        return Err(xlsx_err(format!("row {} has too many cells", row_idx + 1)));
                    }
                    cell = Some(CellState {
                        col,
                        kind: attr(&e, b"t"),
                        text: String::new(),
                    });
                }
                b"v" | b"t" => capture = cell.is_some(),
                _ => {}
            },
            Ok(Event::Text(te)) if capture => {
                if let Some(c) = cell.as_mut() {
                    c.text.push_str(&te.unescape().map_err(xlsx_err)?);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => capture = false,
                b"c" => {
                    if let Some(c) = cell.take() {
                        let value = cell_value(&c, shared_strings);
                        next_col = c.col + 1;
                        if !value.is_empty() {
                            let row = rows.entry(row_idx).or_default();
                            if row.len() <= c.col {
                                row.resize(c.col + 1, String::new());
                            }
                            row[c.col] = value;
                            cell_count += 1;
                            if cell_count >= XLSX_MAX_CELLS_PER_SHEET {
                                tracing::warn!(
                                    cells = cell_count,
                                    "worksheet truncated at cell limit"
                                );
                                break;
                            }
                        }
                    }
                }
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"c" => {
                let col = match attr(&e, b"r") {
                    Some(r) => column_index(&r)?,
                    None => None,
                };
                next_col = col.map_or(next_col + 1, |c| c + 1);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xlsx_err(e)),
            _ => {}
        }
        buf.clear();
    }

    // Keep blank rows between populated ones so row positions survive.
    let height = rows.keys().next_back().map_or(0, |k| k + 1);
    let mut out = vec![Vec::new(); height];
    for (idx, row) in rows {
        out[idx] = row;
    }
    Ok(Grid::new(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn build_xlsx(shared: &str, sheets: &[&str]) -> Vec<u8> {
        let mut buf = std::io::Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buf);
            let opts = zip::write::SimpleFileOptions::default();
            zip.start_file("xl/sharedStrings.xml", opts).unwrap();
            zip.write_all(shared.as_bytes()).unwrap();
            for (i, sheet) in sheets.iter().enumerate() {
                let name = format!("xl/worksheets/sheet{}.xml", i + 1);
                zip.start_file(name, opts).unwrap();
                zip.write_all(sheet.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        buf.into_inner()
    }

    const SHARED: &str = concat!(
        "<sst><si><t>Indicator</t></si>",
        "<si><r><t>Total </t></r><r><t>Assets</t></r></si>",
        "<si><t>Code</t></si></sst>"
    );

    fn sheet(rows: &str) -> String {
        format!("<worksheet><sheetData>{rows}</sheetData></worksheet>")
    }

    #[test]
    fn test_xlsx_cells_land_in_their_columns() {
        let sheet = sheet(concat!(
            r#"<row r="1"><c r="A1" t="s"><v>2</v></c><c r="B1" t="s"><v>0</v></c>"#,
            r#"<c r="D1"><v>2024</v></c></row>"#,
            r#"<row r="3"><c r="B3" t="s"><v>1</v></c>"#,
            r#"<c r="C3" t="inlineStr"><is><t>n/a</t></is></c><c r="D3"><v>1500.5</v></c></row>"#,
        ));
        let Extracted::Grid(grid) =
            extract(DocumentCategory::Excel, &build_xlsx(SHARED, &[&sheet])).unwrap()
        else {
            panic!("expected grid");
        };
        assert_eq!(grid.len(), 3);
        assert_eq!(grid.cell(0, 0), "Code");
        assert_eq!(grid.cell(0, 2), "");
        assert_eq!(grid.cell(0, 3), "2024");
        assert_eq!(grid.cell(1, 0), "");
        assert_eq!(grid.cell(2, 1), "Total Assets");
        assert_eq!(grid.cell(2, 2), "n/a");
        assert_eq!(grid.cell(2, 3), "1500.5");
    }

    #[test]
    fn test_xlsx_all_sheets_stacked() {
        let a = sheet(r#"<row r="1"><c r="A1"><v>1</v></c></row>"#);
        let b = sheet(r#"<row r="1"><c r="A1"><v>2</v></c></row>"#);
        let bytes = build_xlsx(SHARED, &[&a, &b]);
        let Extracted::Grid(grid) = extract(DocumentCategory::Excel, &bytes).unwrap() else {
            panic!("expected grid");
        };
        let text = grid.to_text();
        assert!(text.contains('1') && text.contains('2'));
    }

    #[test]
    fn test_column_index() {
        assert_eq!(column_index("A1").unwrap(), Some(0));
        assert_eq!(column_index("Z9").unwrap(), Some(25));
        assert_eq!(column_index("AB12").unwrap(), Some(27));
        assert_eq!(column_index("XFD1").unwrap(), Some(16_383));
        assert_eq!(column_index("12").unwrap(), None);
        assert!(column_index("XFE1").is_err());
        assert!(column_index("ZZZZZZZZZZZZZZZ1").is_err());
    }

    #[test]
    fn test_out_of_range_references_rejected() {
        for rows in [
            r#"<row r="1"><c r="ZZZZZZZZZZZZZZZ1"><v>1</v></c></row>"#,
            r#"<row r="1"><c r="ZZZZZZZZZZZZZZZ1"/></row>"#,
            r#"<row r="1048577"><c r="A1048577"><v>1</v></c></row>"#,
            r#"<row r="99999999999999999999999"><c><v>1</v></c></row>"#,
        ] {
            let bytes = build_xlsx(SHARED, &[&sheet(rows)]);
            let err = extract(DocumentCategory::Excel, &bytes).unwrap_err();
            assert!(matches!(err, ExtractError::Xlsx(_)), "{rows}");
        }
    }

    #[test]
    fn test_last_valid_row_accepted() {
        let rows = r#"<row r="1048576"><c r="XFD1048576"><v>7</v></c></row>"#;
        let bytes = build_xlsx(SHARED, &[&sheet(rows)]);
        let Extracted::Grid(grid) = extract(DocumentCategory::Excel, &bytes).unwrap() else {
            panic!("expected grid");
        };
        assert_eq!(grid.len(), 1_048_576);
        assert_eq!(grid.cell(1_048_575, 16_383), "7");
    }

    #[test]
    fn test_legacy_xls_rejected() {
        let err = extract(DocumentCategory::Excel, &[0xD0, 0xCF, 0x11, 0xE0]).unwrap_err();
        assert!(matches!(err, ExtractError::LegacyWorkbook));
    }

    #[test]
    fn test_csv_is_grid() {
        let out = extract(DocumentCategory::Csv, b"a,\"b,c\"\n1,2\n").unwrap();
        let Extracted::Grid(grid) = out else {
            panic!("expected grid");
        };
        assert_eq!(grid.cell(0, 1), "b,c");
    }

    #[test]
    fn test_invalid_utf8_fails() {
        let err = extract(DocumentCategory::Other, &[0xff, 0xfe, 0x00]).unwrap_err();
        assert!(matches!(err, ExtractError::InvalidUtf8));
    }

    #[test]
    fn test_invalid_pdf_fails() {
        let err = extract(DocumentCategory::Pdf, b"not a pdf").unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }
}

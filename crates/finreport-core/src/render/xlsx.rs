//! Minimal SpreadsheetML (`.xlsx`) writer.
//!
//! One worksheet per statement, plus `Summary` and `Key Ratios` sheets for
//! templates with a narrative. Text cells are inline strings (no shared
//! string table). Figures that parse as numbers are written as numbers with
//! a thousands format; anything else is kept verbatim as text.

use std::io::{Cursor, Write};

use anyhow::Result;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::analysis::ratios::FinancialRatios;
use crate::analysis::values::{absolute_change, parse_figure, percentage_change};
use crate::models::{AnalysisResult, CellValue, StatementKind, Template};

use super::{template_ratios, template_rows, ReportMeta};

const MAIN_NS: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
const REL_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const PKG_REL_NS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";
const WORKSHEET_TYPE: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet";
const STYLES_TYPE: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles";

/// Style ids into `cellXfs` of [`STYLES_XML`].
const STYLE_BOLD: &str = "1";
const STYLE_AMOUNT: &str = "2";

const STYLES_XML: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
    r#"<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">"#,
    r#"<fonts count="2"><font><sz val="11"/><name val="Calibri"/></font>"#,
    r#"<font><b/><sz val="11"/><name val="Calibri"/></font></fonts>"#,
    r#"<fills count="2"><fill><patternFill patternType="none"/></fill>"#,
    r#"<fill><patternFill patternType="gray125"/></fill></fills>"#,
    r#"<borders count="1"><border><left/><right/><top/><bottom/><diagonal/></border>"#,
    r#"</borders><cellStyleXfs count="1">"#,
    r#"<xf numFmtId="0" fontId="0" fillId="0" borderId="0"/></cellStyleXfs>"#,
    r#"<cellXfs count="3"><xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"/>"#,
    r#"<xf numFmtId="0" fontId="1" fillId="0" borderId="0" xfId="0" applyFont="1"/>"#,
    r#"<xf numFmtId="4" fontId="0" fillId="0" borderId="0" xfId="0" applyNumberFormat="1"/>"#,
    r#"</cellXfs></styleSheet>"#
);

enum Cell {
    Text(String),
    Number(f64),
    Empty,
}

impl Cell {
    fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    fn figure(value: &CellValue) -> Self {
        match value {
            CellValue::Number(n) => Self::number(*n),
            CellValue::Text(s) if s.trim().is_empty() => Self::Empty,
            CellValue::Text(s) => {
                parse_figure(s).map_or_else(|| Self::text(s.clone()), Self::Number)
            }
        }
    }

    fn number(n: f64) -> Self {
        if n.is_finite() {
            Self::Number(n)
        } else {
            Self::Empty
        }
    }
}

struct Row {
    bold: bool,
    cells: Vec<Cell>,
}

impl Row {
    fn header(labels: &[&str]) -> Self {
        Self {
            bold: true,
            cells: labels.iter().map(|l| Cell::text(*l)).collect(),
        }
    }

    fn plain(cells: Vec<Cell>) -> Self {
        Self { bold: false, cells }
    }
}

struct Sheet {
    name: &'static str,
    rows: Vec<Row>,
}

pub(super) fn render_xlsx(
    analysis: &AnalysisResult,
    template: Template,
    meta: &ReportMeta,
) -> Result<Vec<u8>> {
    let mut sheets = Vec::with_capacity(5);
    if template != Template::Tables {
        sheets.push(summary_sheet(analysis, template, meta));
    }
    for kind in StatementKind::ALL {
        sheets.push(statement_sheet(analysis, kind, template));
    }
    if let Some(ratios) = template_ratios(analysis, template) {
        sheets.push(ratio_sheet(&ratios));
    }
    write_workbook(&sheets)
}

fn summary_sheet(analysis: &AnalysisResult, template: Template, meta: &ReportMeta) -> Sheet {
    let pair = |k: &str, v: String| Row::plain(vec![Cell::text(k), Cell::Text(v)]);
    let mut rows = vec![
        Row::header(&["Financial Analysis Report"]),
        pair("Report", meta.report_id.clone()),
        pair("Template", template.as_str().to_string()),
        pair(
            "Generated",
            meta.generated_at.format("%Y-%m-%d %H:%M UTC").to_string(),
        ),
        pair("Sources", meta.source_files.join(", ")),
    ];
    let summary = analysis.summary.trim();
    if !summary.is_empty() {
        rows.push(Row::plain(Vec::new()));
        rows.push(Row::header(&["Analysis"]));
        rows.extend(
            summary
                .lines()
                .map(|line| Row::plain(vec![Cell::text(line.trim_end())])),
        );
    }
    Sheet {
        name: "Summary",
        rows,
    }
}

fn statement_sheet(analysis: &AnalysisResult, kind: StatementKind, template: Template) -> Sheet {
    let header: &[&str] = match template {
        Template::Comprehensive => &[
            "Indicator",
            "Current Year",
            "Previous Year",
            "Change",
            "Change %",
        ],
        Template::Executive => &["Indicator", "Current Year", "Previous Year", "Change %"],
        Template::Tables => &["Indicator", "Current Year", "Previous Year"],
    };
    let mut rows = vec![Row::header(header)];
    for row in template_rows(analysis, kind, template) {
        let mut cells = vec![
            Cell::text(row.indicator.clone()),
            Cell::figure(&row.current_year),
            Cell::figure(&row.previous_year),
        ];
        let pct = || {
            percentage_change(&row.current_year, &row.previous_year)
                .map_or(Cell::text("n/a"), |p| Cell::number((p * 10.0).round() / 10.0))
        };
        match template {
            Template::Comprehensive => {
                cells.push(Cell::number(absolute_change(
                    &row.current_year,
                    &row.previous_year,
                )));
                cells.push(pct());
            }
            Template::Executive => cells.push(pct()),
            Template::Tables => {}
        }
        rows.push(Row::plain(cells));
    }
    Sheet {
        name: kind.title(),
        rows,
    }
}

fn ratio_sheet(ratios: &FinancialRatios) -> Sheet {
    let mut rows = vec![Row::header(&["Group", "Ratio", "Value"])];
    for entry in ratios.entries() {
        rows.push(Row::plain(vec![
            Cell::text(entry.group),
            Cell::text(entry.label),
            Cell::text(entry.display()),
        ]));
    }
    if let Some(a) = ratios.assessment {
        rows.push(Row::plain(Vec::new()));
        rows.push(Row::plain(vec![
            Cell::text("Overall"),
            Cell::text(a.health.as_str()),
            Cell::number(a.overall_score.round()),
        ]));
    }
    Sheet {
        name: "Key Ratios",
        rows,
    }
}

/// `0` -> `A`, `25` -> `Z`, `26` -> `AA`.
fn column_name(mut index: usize) -> String {
    let mut name = Vec::new();
    loop {
        name.push(b'A' + (index % 26) as u8);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    name.reverse();
    String::from_utf8_lossy(&name).into_owned()
}

fn xml_writer() -> Result<Writer<Vec<u8>>> {
    let mut w = Writer::new(Vec::new());
    w.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))?;
    Ok(w)
}

fn sheet_xml(sheet: &Sheet) -> Result<Vec<u8>> {
    let mut w = xml_writer()?;
    w.write_event(Event::Start(
        BytesStart::new("worksheet").with_attributes([("xmlns", MAIN_NS)]),
    ))?;
    w.write_event(Event::Start(BytesStart::new("sheetData")))?;
    for (r, row) in sheet.rows.iter().enumerate() {
        let row_ref = (r + 1).to_string();
        w.write_event(Event::Start(
            BytesStart::new("row").with_attributes([("r", row_ref.as_str())]),
        ))?;
        for (c, cell) in row.cells.iter().enumerate() {
            let cell_ref = format!("{}{}", column_name(c), row_ref);
            match cell {
                Cell::Empty => {}
                Cell::Text(text) => {
                    let mut start = BytesStart::new("c")
                        .with_attributes([("r", cell_ref.as_str()), ("t", "inlineStr")]);
                    if row.bold {
                        start.push_attribute(("s", STYLE_BOLD));
                    }
                    w.write_event(Event::Start(start))?;
                    w.write_event(Event::Start(BytesStart::new("is")))?;
                    w.write_event(Event::Start(
                        BytesStart::new("t").with_attributes([("xml:space", "preserve")]),
                    ))?;
                    w.write_event(Event::Text(BytesText::new(text)))?;
                    w.write_event(Event::End(BytesEnd::new("t")))?;
                    w.write_event(Event::End(BytesEnd::new("is")))?;
                    w.write_event(Event::End(BytesEnd::new("c")))?;
                }
                Cell::Number(n) => {
                    let style = if row.bold { STYLE_BOLD } else { STYLE_AMOUNT };
                    w.write_event(Event::Start(
                        BytesStart::new("c")
                            .with_attributes([("r", cell_ref.as_str()), ("s", style)]),
                    ))?;
                    w.write_event(Event::Start(BytesStart::new("v")))?;
                    w.write_event(Event::Text(BytesText::new(&n.to_string())))?;
                    w.write_event(Event::End(BytesEnd::new("v")))?;
                    w.write_event(Event::End(BytesEnd::new("c")))?;
                }
            }
        }
        w.write_event(Event::End(BytesEnd::new("row")))?;
    }
    w.write_event(Event::End(BytesEnd::new("sheetData")))?;
    w.write_event(Event::End(BytesEnd::new("worksheet")))?;
    Ok(w.into_inner())
}

fn workbook_xml(sheets: &[Sheet]) -> Result<Vec<u8>> {
    let mut w = xml_writer()?;
    w.write_event(Event::Start(
        BytesStart::new("workbook").with_attributes([("xmlns", MAIN_NS), ("xmlns:r", REL_NS)]),
    ))?;
    w.write_event(Event::Start(BytesStart::new("sheets")))?;
    for (i, sheet) in sheets.iter().enumerate() {
        let id = (i + 1).to_string();
        let rel = format!("rId{id}");
        w.write_event(Event::Empty(BytesStart::new("sheet").with_attributes([
            ("name", sheet.name),
            ("sheetId", id.as_str()),
            ("r:id", rel.as_str()),
        ])))?;
    }
    w.write_event(Event::End(BytesEnd::new("sheets")))?;
    w.write_event(Event::End(BytesEnd::new("workbook")))?;
    Ok(w.into_inner())
}

/// Relationships file listing `(id, type, target)` triples.
fn relationships_xml(rels: &[(String, &str, String)]) -> Result<Vec<u8>> {
    let mut w = xml_writer()?;
    w.write_event(Event::Start(
        BytesStart::new("Relationships").with_attributes([("xmlns", PKG_REL_NS)]),
    ))?;
    for (id, kind, target) in rels {
        w.write_event(Event::Empty(BytesStart::new("Relationship").with_attributes([
            ("Id", id.as_str()),
            ("Type", *kind),
            ("Target", target.as_str()),
        ])))?;
    }
    w.write_event(Event::End(BytesEnd::new("Relationships")))?;
    Ok(w.into_inner())
}

fn content_types_xml(sheet_count: usize) -> Result<Vec<u8>> {
    let mut w = xml_writer()?;
    w.write_event(Event::Start(BytesStart::new("Types").with_attributes([(
        "xmlns",
        "http://schemas.openxmlformats.org/package/2006/content-types",
    )])))?;
    for (ext, ct) in [
        ("rels", "application/vnd.openxmlformats-package.relationships+xml"),
        ("xml", "application/xml"),
    ] {
        w.write_event(Event::Empty(
            BytesStart::new("Default").with_attributes([("Extension", ext), ("ContentType", ct)]),
        ))?;
    }
    let mut overrides = vec![
        (
            "/xl/workbook.xml".to_string(),
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml",
        ),
        (
            "/xl/styles.xml".to_string(),
            "application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml",
        ),
    ];
    for i in 1..=sheet_count {
        overrides.push((
            format!("/xl/worksheets/sheet{i}.xml"),
            "application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml",
        ));
    }
    for (part, ct) in &overrides {
        w.write_event(Event::Empty(
            BytesStart::new("Override")
                .with_attributes([("PartName", part.as_str()), ("ContentType", *ct)]),
        ))?;
    }
    w.write_event(Event::End(BytesEnd::new("Types")))?;
    Ok(w.into_inner())
}

fn write_workbook(sheets: &[Sheet]) -> Result<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let mut put = |name: &str, bytes: &[u8]| -> Result<()> {
        zip.start_file(name, SimpleFileOptions::default())?;
        zip.write_all(bytes)?;
        Ok(())
    };

    put("[Content_Types].xml", &content_types_xml(sheets.len())?)?;
    put(
        "_rels/.rels",
        &relationships_xml(&[(
            "rId1".to_string(),
            "http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument",
            "xl/workbook.xml".to_string(),
        )])?,
    )?;
    put("xl/workbook.xml", &workbook_xml(sheets)?)?;

    let mut rels: Vec<(String, &str, String)> = (1..=sheets.len())
        .map(|i| {
            (
                format!("rId{i}"),
                WORKSHEET_TYPE,
                format!("worksheets/sheet{i}.xml"),
            )
        })
        .collect();
    rels.push((
        format!("rId{}", sheets.len() + 1),
        STYLES_TYPE,
        "styles.xml".to_string(),
    ));
    put("xl/_rels/workbook.xml.rels", &relationships_xml(&rels)?)?;
    put("xl/styles.xml", STYLES_XML.as_bytes())?;
    for (i, sheet) in sheets.iter().enumerate() {
        put(&format!("xl/worksheets/sheet{}.xml", i + 1), &sheet_xml(sheet)?)?;
    }

    Ok(zip.finish()?.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FinancialRow;
    use chrono::Utc;
    use std::io::Read;

    fn analysis() -> AnalysisResult {
        let row = |name: &str, cur: &str, prev: &str| FinancialRow {
            indicator: name.into(),
            current_year: CellValue::Text(cur.into()),
            previous_year: CellValue::Text(prev.into()),
        };
        AnalysisResult {
            balance_sheet: vec![
                row("Total Assets", "1,200", "1,000"),
                row("Total Liabilities", "400", "n/a"),
            ],
            income_statement: vec![row("Revenue", "5,000", "4,000"), row("Net Income", "500", "")],
            cash_flow_statement: vec![],
            summary: "Revenue grew & margins held.".into(),
        }
    }

    fn meta() -> ReportMeta {
        ReportMeta {
            report_id: "r1".into(),
            source_files: vec!["fy.xlsx".into()],
            generated_at: Utc::now(),
        }
    }

    fn entry(bytes: &[u8], name: &str) -> String {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut out = String::new();
        archive
            .by_name(name)
            .unwrap()
            .read_to_string(&mut out)
            .unwrap();
        out
    }

    #[test]
    fn column_names() {
        assert_eq!(column_name(0), "A");
        assert_eq!(column_name(25), "Z");
        assert_eq!(column_name(26), "AA");
        assert_eq!(column_name(27), "AB");
        assert_eq!(column_name(16_383), "XFD");
    }

    #[test]
    fn workbook_has_all_parts() {
        let bytes = render_xlsx(&analysis(), Template::Comprehensive, &meta()).unwrap();
        assert!(bytes.starts_with(b"PK"));
        let workbook = entry(&bytes, "xl/workbook.xml");
        for name in [
            "Summary",
            "Balance Sheet",
            "Income Statement",
            "Cash Flow Statement",
            "Key Ratios",
        ] {
            assert!(workbook.contains(&format!("name=\"{name}\"")), "{name}");
        }
        let types = entry(&bytes, "[Content_Types].xml");
        assert!(types.contains("/xl/worksheets/sheet5.xml"));
        let rels = entry(&bytes, "xl/_rels/workbook.xml.rels");
        assert!(rels.contains("rId6") && rels.contains("styles.xml"));
        assert!(entry(&bytes, "_rels/.rels").contains("xl/workbook.xml"));
    }

    #[test]
    fn figures_become_numbers_and_text_is_escaped() {
        let bytes = render_xlsx(&analysis(), Template::Comprehensive, &meta()).unwrap();
        let summary = entry(&bytes, "xl/worksheets/sheet1.xml");
        assert!(summary.contains("Revenue grew &amp; margins held."));

        let balance = entry(&bytes, "xl/worksheets/sheet2.xml");
        assert!(balance.contains(r#"<c r="B2" s="2"><v>1200</v></c>"#));
        assert!(balance.contains(r#"<c r="D2" s="2"><v>200</v></c>"#));
        assert!(balance.contains(r#"<c r="E2" s="2"><v>20</v></c>"#));
        assert!(balance.contains("<t xml:space=\"preserve\">n/a</t>"));
    }

    #[test]
    fn tables_template_has_statements_only() {
        let bytes = render_xlsx(&analysis(), Template::Tables, &meta()).unwrap();
        let workbook = entry(&bytes, "xl/workbook.xml");
        assert!(!workbook.contains("Summary"));
        assert!(!workbook.contains("Key Ratios"));
        let balance = entry(&bytes, "xl/worksheets/sheet1.xml");
        assert!(!balance.contains("Change"));
    }
}

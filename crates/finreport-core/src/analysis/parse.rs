//! Lenient parser for model output.
//!
//! The response is read line by line through a small state machine:
//!
//! ```text
//! Preamble ──(recognized heading)──▶ Table(kind) ──(unknown heading)──▶ Ignored
//!                                        ▲                                │
//!                                        └────────(recognized heading)────┘
//! ```
//!
//! Parsing never fails. A response with no recognized heading yields only a
//! narrative equal to the input.

use crate::models::{AnalysisResult, CellValue, FinancialRow, StatementKind};

#[derive(Debug, Clone, PartialEq)]
pub enum ParsedSection {
    Narrative(String),
    BalanceSheetRow(FinancialRow),
    IncomeRow(FinancialRow),
    CashFlowRow(FinancialRow),
}

impl ParsedSection {
    fn row(kind: StatementKind, row: FinancialRow) -> Self {
        match kind {
            StatementKind::BalanceSheet => Self::BalanceSheetRow(row),
            StatementKind::IncomeStatement => Self::IncomeRow(row),
            StatementKind::CashFlowStatement => Self::CashFlowRow(row),
        }
    }
}

enum State {
    Preamble,
    Table {
        kind: StatementKind,
        rows_seen: usize,
    },
    Ignored,
}

/// Emit sections in document order. The narrative, if any, comes first.
pub fn parse_sections(text: &str) -> Vec<ParsedSection> {
    let mut state = State::Preamble;
    let mut preamble: Vec<&str> = Vec::new();
    let mut rows: Vec<ParsedSection> = Vec::new();

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('#') {
            if let Some(kind) = recognize_heading(trimmed) {
                state = State::Table { kind, rows_seen: 0 };
                continue;
            }
            if !matches!(state, State::Preamble) {
                state = State::Ignored;
                continue;
            }
        }
        match state {
            State::Preamble => preamble.push(line),
            State::Ignored => {}
            State::Table {
                kind,
                ref mut rows_seen,
            } => {
                let Some(cells) = split_row(trimmed) else {
                    continue;
                };
                let first = *rows_seen == 0;
                *rows_seen += 1;
                if first && !has_digit(&cells[1]) && !has_digit(&cells[2]) {
                    continue;
                }
                rows.push(ParsedSection::row(
                    kind,
                    FinancialRow {
                        indicator: cells[0].clone(),
                        current_year: CellValue::Text(cells[1].clone()),
                        previous_year: CellValue::Text(cells[2].clone()),
                    },
                ));
            }
        }
    }

    let mut out = Vec::with_capacity(rows.len() + 1);
    if matches!(state, State::Preamble) {
        out.push(ParsedSection::Narrative(text.to_string()));
        return out;
    }
    let narrative = preamble.join("\n").trim().to_string();
    if !narrative.is_empty() {
        out.push(ParsedSection::Narrative(narrative));
    }
    out.extend(rows);
    out
}

/// Fold parsed sections into an [`AnalysisResult`].
pub fn parse_response(text: &str) -> AnalysisResult {
    let mut result = AnalysisResult::default();
    for section in parse_sections(text) {
        match section {
            ParsedSection::Narrative(s) => result.summary = s,
            ParsedSection::BalanceSheetRow(r) => result.balance_sheet.push(r),
            ParsedSection::IncomeRow(r) => result.income_statement.push(r),
            ParsedSection::CashFlowRow(r) => result.cash_flow_statement.push(r),
        }
    }
    result
}

fn recognize_heading(line: &str) -> Option<StatementKind> {
    let title = line
        .trim_start_matches('#')
        .trim()
        .trim_matches(|c| c == '*' || c == ':')
        .trim()
        .to_lowercase();
    if title.contains("balance sheet") {
        Some(StatementKind::BalanceSheet)
    } else if title.contains("income statement")
        || title.contains("profit and loss")
        || title.contains("profit & loss")
    {
        Some(StatementKind::IncomeStatement)
    } else if title.contains("cash flow") {
        Some(StatementKind::CashFlowStatement)
    } else {
        None
    }
}

/// Split a table line into at least three non-empty cells.
fn split_row(line: &str) -> Option<Vec<String>> {
    if !line.contains('|') || is_separator(line) {
        return None;
    }
    let cells: Vec<String> = line
        .split('|')
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect();
    (cells.len() >= 3).then_some(cells)
}

fn is_separator(line: &str) -> bool {
    line.chars().all(|c| matches!(c, '|' | '-' | ':' | ' ' | '+' | '='))
}

fn has_digit(s: &str) -> bool {
    s.chars().any(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_headings_returns_verbatim_narrative() {
        let text = "  The company did fine.\nNothing else to add.  ";
        let result = parse_response(text);
        assert_eq!(result.summary, text);
        assert!(!result.has_rows());
    }

    #[test]
    fn balance_sheet_first_row() {
        let text = "Solid year.\n\n#### Balance Sheet Table\nTotal Assets | 1,000,000 | 900,000\n";
        let result = parse_response(text);
        assert_eq!(result.summary, "Solid year.");
        assert_eq!(
            result.balance_sheet[0],
            FinancialRow {
                indicator: "Total Assets".into(),
                current_year: CellValue::Text("1,000,000".into()),
                previous_year: CellValue::Text("900,000".into()),
            }
        );
    }

    #[test]
    fn markdown_tables_with_header_and_separator() {
        let text = "\
Narrative here.
#### Income Statement Table
| Indicator | Current Year | Previous Year |
|---|---|---|
| Revenue | 5,000 | 4,000 |
| Net Income | (200) | 150 |
#### Cash Flow Statement Table
| Net Change in Cash | 10 | 20 |
";
        let result = parse_response(text);
        assert_eq!(result.income_statement.len(), 2);
        assert_eq!(result.income_statement[1].indicator, "Net Income");
        assert_eq!(result.cash_flow_statement.len(), 1);
        assert!(result.balance_sheet.is_empty());
    }

    #[test]
    fn unknown_heading_is_ignored_section() {
        let text = "\
#### Balance Sheet Table
Cash | 1 | 2
#### Key Ratios
Current Ratio | 1.5 | 1.2
#### Cash Flow Statement Table
Dividends Paid | 3 | 4
";
        let result = parse_response(text);
        assert_eq!(result.balance_sheet.len(), 1);
        assert_eq!(result.cash_flow_statement.len(), 1);
        assert!(result.summary.is_empty());
    }

    #[test]
    fn short_rows_dropped_and_order_kept() {
        let text = "\
#### Balance Sheet Table
Inventory | 7
Zeta | 1 | 2
Alpha | 3 | 4
";
        let rows = parse_response(text).balance_sheet;
        let names: Vec<&str> = rows.iter().map(|r| r.indicator.as_str()).collect();
        assert_eq!(names, vec!["Zeta", "Alpha"]);
    }

    #[test]
    fn first_row_with_digits_is_data() {
        let text = "#### Balance Sheet Table\nCash | 100 | n/a\n";
        assert_eq!(parse_response(text).balance_sheet.len(), 1);
    }

    #[test]
    fn sections_start_with_narrative() {
        let sections = parse_sections("Intro\n#### Balance Sheet Table\nCash | 1 | 2");
        assert_eq!(sections[0], ParsedSection::Narrative("Intro".into()));
        assert!(matches!(sections[1], ParsedSection::BalanceSheetRow(_)));
    }
}

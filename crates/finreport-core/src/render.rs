//! Report artifact rendering.
//!
//! | Template | Narrative | Tables | Change columns | Key ratios |
//! |----------|-----------|--------|----------------|------------|
//! | `comprehensive` | yes | all rows | absolute and % | all |
//! | `executive` | yes | first [`EXECUTIVE_ROWS`] rows | % only | computed only |
//! | `tables` | no | all rows | no | no |
//!
//! Markdown and JSON are text; `xlsx` is a workbook with one sheet per
//! statement (see [`xlsx`]).

mod xlsx;

use std::fmt::Write as _;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::analysis::ratios::{compute_ratios, FinancialRatios};
use crate::analysis::values::{absolute_change, format_amount, percentage_change};
use crate::models::{AnalysisResult, FinancialRow, ReportFormat, StatementKind, Template};

pub const EXECUTIVE_ROWS: usize = 5;

/// Report header information.
#[derive(Debug, Clone, Serialize)]
pub struct ReportMeta {
    pub report_id: String,
    pub source_files: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

/// Render `analysis` as an artifact in the requested format.
pub fn render(
    analysis: &AnalysisResult,
    template: Template,
    format: ReportFormat,
    meta: &ReportMeta,
) -> Result<Vec<u8>> {
    match format {
        ReportFormat::Markdown => Ok(render_markdown(analysis, template, meta).into_bytes()),
        ReportFormat::Json => render_json(analysis, template, meta),
        ReportFormat::Xlsx => xlsx::render_xlsx(analysis, template, meta),
    }
}

/// Rows of `kind` that `template` shows.
pub fn template_rows(
    analysis: &AnalysisResult,
    kind: StatementKind,
    template: Template,
) -> &[FinancialRow] {
    let all = analysis.table(kind);
    match template {
        Template::Executive => &all[..all.len().min(EXECUTIVE_ROWS)],
        _ => all,
    }
}

/// Ratios shown by `template`, `None` when there are none to show.
pub fn template_ratios(analysis: &AnalysisResult, template: Template) -> Option<FinancialRatios> {
    if template == Template::Tables {
        return None;
    }
    Some(compute_ratios(analysis)).filter(|r| !r.is_empty())
}

pub fn render_markdown(
    analysis: &AnalysisResult,
    template: Template,
    meta: &ReportMeta,
) -> String {
    let mut out = String::new();
    out.push_str("# Financial Analysis Report\n\n");
    let _ = writeln!(out, "- Report: `{}`", meta.report_id);
    let _ = writeln!(out, "- Template: {}", template.as_str());
    let _ = writeln!(
        out,
        "- Generated: {}",
        meta.generated_at.format("%Y-%m-%d %H:%M UTC")
    );
    if !meta.source_files.is_empty() {
        let _ = writeln!(out, "- Sources: {}", meta.source_files.join(", "));
    }
    out.push('\n');

    if template != Template::Tables && !analysis.summary.trim().is_empty() {
        out.push_str("## Analysis\n\n");
        out.push_str(analysis.summary.trim());
        out.push_str("\n\n");
    }

    for kind in StatementKind::ALL {
        let rows = analysis.table(kind);
        let _ = writeln!(out, "## {}\n", kind.title());
        if rows.is_empty() {
            out.push_str("_No data extracted._\n\n");
            continue;
        }
        match template {
            Template::Comprehensive => {
                out.push_str("| Indicator | Current Year | Previous Year | Change | Change % |\n");
                out.push_str("|---|---:|---:|---:|---:|\n");
                for row in rows {
                    let _ = writeln!(
                        out,
                        "| {} | {} | {} | {} | {} |",
                        row.indicator,
                        row.current_year,
                        row.previous_year,
                        format_amount(absolute_change(&row.current_year, &row.previous_year)),
                        format_pct(row)
                    );
                }
            }
            Template::Executive => {
                out.push_str("| Indicator | Current Year | Previous Year | Change % |\n");
                out.push_str("|---|---:|---:|---:|\n");
                for row in rows.iter().take(EXECUTIVE_ROWS) {
                    let _ = writeln!(
                        out,
                        "| {} | {} | {} | {} |",
                        row.indicator,
                        row.current_year,
                        row.previous_year,
                        format_pct(row)
                    );
                }
                if rows.len() > EXECUTIVE_ROWS {
                    let _ = writeln!(
                        out,
                        "\n_{} more rows in the comprehensive report._",
                        rows.len() - EXECUTIVE_ROWS
                    );
                }
            }
            Template::Tables => {
                out.push_str("| Indicator | Current Year | Previous Year |\n");
                out.push_str("|---|---:|---:|\n");
                for row in rows {
                    let _ = writeln!(
                        out,
                        "| {} | {} | {} |",
                        row.indicator, row.current_year, row.previous_year
                    );
                }
            }
        }
        out.push('\n');
    }

    if let Some(ratios) = template_ratios(analysis, template) {
        out.push_str("## Key Ratios\n\n");
        out.push_str("| Group | Ratio | Value |\n|---|---|---:|\n");
        for entry in ratios.entries() {
            if template == Template::Executive && entry.value.is_none() {
                continue;
            }
            let _ = writeln!(out, "| {} | {} | {} |", entry.group, entry.label, entry.display());
        }
        if let Some(a) = ratios.assessment {
            let _ = writeln!(
                out,
                "\nOverall financial health: **{}** (score {:.0} of 100)",
                a.health.as_str(),
                a.overall_score
            );
        }
        out.push('\n');
    }
    out
}

fn format_pct(row: &FinancialRow) -> String {
    match percentage_change(&row.current_year, &row.previous_year) {
        Some(p) => format!("{p:.1}%"),
        None => "n/a".to_string(),
    }
}

#[derive(Serialize)]
struct JsonRow<'a> {
    #[serde(flatten)]
    row: &'a FinancialRow,
    #[serde(skip_serializing_if = "Option::is_none")]
    change: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    change_pct: Option<f64>,
}

#[derive(Serialize)]
struct JsonReport<'a> {
    report_id: &'a str,
    template: Template,
    generated_at: DateTime<Utc>,
    source_files: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<&'a str>,
    balance_sheet: Vec<JsonRow<'a>>,
    income_statement: Vec<JsonRow<'a>>,
    cash_flow_statement: Vec<JsonRow<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ratios: Option<FinancialRatios>,
}

fn json_rows(
    analysis: &AnalysisResult,
    kind: StatementKind,
    template: Template,
) -> Vec<JsonRow<'_>> {
    template_rows(analysis, kind, template)
        .iter()
        .map(|row| JsonRow {
            row,
            change: (template == Template::Comprehensive)
                .then(|| absolute_change(&row.current_year, &row.previous_year)),
            change_pct: match template {
                Template::Tables => None,
                _ => percentage_change(&row.current_year, &row.previous_year),
            },
        })
        .collect()
}

fn render_json(
    analysis: &AnalysisResult,
    template: Template,
    meta: &ReportMeta,
) -> Result<Vec<u8>> {
    let report = JsonReport {
        report_id: &meta.report_id,
        template,
        generated_at: meta.generated_at,
        source_files: &meta.source_files,
        summary: (template != Template::Tables).then_some(analysis.summary.as_str()),
        balance_sheet: json_rows(analysis, StatementKind::BalanceSheet, template),
        income_statement: json_rows(analysis, StatementKind::IncomeStatement, template),
        cash_flow_statement: json_rows(analysis, StatementKind::CashFlowStatement, template),
        ratios: template_ratios(analysis, template),
    };
    Ok(serde_json::to_vec_pretty(&report)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CellValue;

    fn sample() -> AnalysisResult {
        let row = |name: &str, cur: &str, prev: &str| FinancialRow {
            indicator: name.into(),
            current_year: CellValue::Text(cur.into()),
            previous_year: CellValue::Text(prev.into()),
        };
        AnalysisResult {
            balance_sheet: vec![row("Total Assets", "1,100", "1,000")],
            income_statement: (0..8).map(|i| row(&format!("Line {i}"), "10", "0")).collect(),
            cash_flow_statement: vec![],
            summary: "Healthy growth.".into(),
        }
    }

    fn meta() -> ReportMeta {
        ReportMeta {
            report_id: "r1".into(),
            source_files: vec!["fy.xlsx".into()],
            generated_at: Utc::now(),
        }
    }

    #[test]
    fn comprehensive_has_changes() {
        let md = render_markdown(&sample(), Template::Comprehensive, &meta());
        assert!(md.contains("## Analysis\n\nHealthy growth."));
        assert!(md.contains("| Total Assets | 1,100 | 1,000 | 100 | 10.0% |"));
        assert!(md.contains("| Line 0 | 10 | 0 | 10 | n/a |"));
        assert!(md.contains("## Cash Flow Statement\n\n_No data extracted._"));
    }

    #[test]
    fn executive_truncates_rows() {
        let md = render_markdown(&sample(), Template::Executive, &meta());
        assert!(md.contains("| Line 4 |"));
        assert!(!md.contains("| Line 5 |"));
        assert!(md.contains("3 more rows"));
    }

    #[test]
    fn tables_has_no_narrative() {
        let md = render_markdown(&sample(), Template::Tables, &meta());
        assert!(!md.contains("Healthy growth."));
        assert!(md.contains("| Total Assets | 1,100 | 1,000 |\n"));
    }

    #[test]
    fn json_keeps_values_verbatim() {
        let bytes =
            render(&sample(), Template::Comprehensive, ReportFormat::Json, &meta()).unwrap();
        let v: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(v["balance_sheet"][0]["current_year"], "1,100");
        assert_eq!(v["balance_sheet"][0]["change"], 100.0);
        assert_eq!(v["summary"], "Healthy growth.");
    }

    fn with_ratio_inputs() -> AnalysisResult {
        let row = |name: &str, cur: &str| FinancialRow {
            indicator: name.into(),
            current_year: CellValue::Text(cur.into()),
            previous_year: CellValue::Text("0".into()),
        };
        AnalysisResult {
            balance_sheet: vec![
                row("Total Current Assets", "500"),
                row("Total Assets", "1,000"),
                row("Total Current Liabilities", "250"),
                row("Total Liabilities", "400"),
            ],
            income_statement: vec![row("Revenue", "2,000"), row("Net Income", "240")],
            cash_flow_statement: vec![],
            summary: "Solid.".into(),
        }
    }

    #[test]
    fn key_ratios_follow_template() {
        let analysis = with_ratio_inputs();
        let md = render_markdown(&analysis, Template::Comprehensive, &meta());
        assert!(md.contains("## Key Ratios"));
        assert!(md.contains("| Liquidity | Current Ratio | 2.00 |"));
        assert!(md.contains("| Profitability | Net Margin | 12.0% |"));
        assert!(md.contains("| Liquidity | Quick Ratio | n/a |"));
        assert!(md.contains("Overall financial health: **"));

        let md = render_markdown(&analysis, Template::Executive, &meta());
        assert!(md.contains("| Liquidity | Current Ratio | 2.00 |"));
        assert!(!md.contains("| Quick Ratio |"));

        let md = render_markdown(&analysis, Template::Tables, &meta());
        assert!(!md.contains("Key Ratios"));

        let v: serde_json::Value = serde_json::from_slice(
            &render(&analysis, Template::Executive, ReportFormat::Json, &meta()).unwrap(),
        )
        .unwrap();
        assert_eq!(v["ratios"]["liquidity"]["current_ratio"], 2.0);
        assert!(v["ratios"]["liquidity"]["quick_ratio"].is_null());
        let v: serde_json::Value = serde_json::from_slice(
            &render(&analysis, Template::Tables, ReportFormat::Json, &meta()).unwrap(),
        )
        .unwrap();
        assert!(v.get("ratios").is_none());
    }
}

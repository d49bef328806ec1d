//! Analysis prompt construction.

use crate::chunk::CHARS_PER_TOKEN;
use crate::models::StatementKind;

use super::columns::TableLayout;
use super::grid::{is_blank_row, render_row, Grid};

pub const BALANCE_SHEET_INDICATORS: &[&str] = &[
    "Cash and Cash Equivalents",
    "Accounts Receivable",
    "Inventory",
    "Total Current Assets",
    "Property, Plant and Equipment",
    "Total Assets",
    "Accounts Payable",
    "Short-term Debt",
    "Total Current Liabilities",
    "Long-term Debt",
    "Total Liabilities",
    "Share Capital",
    "Retained Earnings",
    "Total Equity",
];

pub const INCOME_STATEMENT_INDICATORS: &[&str] = &[
    "Revenue",
    "Cost of Goods Sold",
    "Gross Profit",
    "Operating Expenses",
    "Operating Income",
    "Interest Expense",
    "Income Before Tax",
    "Income Tax Expense",
    "Net Income",
];

pub const CASH_FLOW_INDICATORS: &[&str] = &[
    "Net Cash from Operating Activities",
    "Net Cash from Investing Activities",
    "Net Cash from Financing Activities",
    "Capital Expenditures",
    "Dividends Paid",
    "Net Change in Cash",
    "Cash at Beginning of Period",
    "Cash at End of Period",
];

pub fn indicators(kind: StatementKind) -> &'static [&'static str] {
    match kind {
        StatementKind::BalanceSheet => BALANCE_SHEET_INDICATORS,
        StatementKind::IncomeStatement => INCOME_STATEMENT_INDICATORS,
        StatementKind::CashFlowStatement => CASH_FLOW_INDICATORS,
    }
}

/// One input table for the prompt.
pub struct SourceTable<'a> {
    pub name: &'a str,
    pub grid: &'a Grid,
    pub layout: TableLayout,
}

#[derive(Debug, Clone)]
pub struct Prompt {
    pub text: String,
    /// Body rows dropped to respect the size limit.
    pub omitted_rows: usize,
}

const PERSONA: &str = "You are a certified public accountant (CPA) reviewing financial data \
extracted from spreadsheets. Analyse the figures below and produce a concise narrative \
assessment followed by three statement tables.";

/// Build the extraction prompt, truncating body rows from the end so the
/// prompt stays within `max_prompt_tokens`.
pub fn build_prompt(tables: &[SourceTable<'_>], max_prompt_tokens: usize) -> Prompt {
    let max_chars = max_prompt_tokens.saturating_mul(CHARS_PER_TOKEN);
    let instructions = instructions();

    let mut sections: Vec<(String, Vec<String>)> = Vec::new();
    for table in tables {
        let rows = table.grid.rows();
        let mut head = format!("### Source: {}\n", table.name);
        if let Some(ref cols) = table.layout.columns {
            head.push_str(&format!(
                "Current year column: {} (column {}). Previous year column: {} (column {}).\n",
                cols.current_label,
                cols.current + 1,
                cols.previous_label,
                cols.previous + 1
            ));
        }
        if let Some(header) = rows.get(table.layout.header_row) {
            head.push_str(&render_row(header));
            head.push('\n');
        }
        let body = rows
            .iter()
            .skip(table.layout.header_row + 1)
            .filter(|r| !is_blank_row(r))
            .map(|r| render_row(r))
            .collect();
        sections.push((head, body));
    }

    let fixed: usize = PERSONA.len()
        + instructions.len()
        + sections.iter().map(|(h, _)| h.len() + 1).sum::<usize>()
        + 128;
    let mut budget = max_chars.saturating_sub(fixed);

    let mut text = String::with_capacity(max_chars.min(1 << 20));
    text.push_str(PERSONA);
    text.push_str("\n\n## Financial data\n\n");
    let mut omitted_rows = 0usize;
    let mut exhausted = false;
    for (head, body) in &sections {
        text.push_str(head);
        for line in body {
            if exhausted || line.len() + 1 > budget {
                exhausted = true;
                omitted_rows += 1;
                continue;
            }
            budget -= line.len() + 1;
            text.push_str(line);
            text.push('\n');
        }
        text.push('\n');
    }
    if omitted_rows > 0 {
        text.push_str(&format!(
            "[{omitted_rows} rows omitted to fit the prompt size limit]\n\n"
        ));
    }
    text.push_str(&instructions);

    Prompt { text, omitted_rows }
}

fn instructions() -> String {
    let mut out = String::from("## Instructions\n\n");
    out.push_str(
        "1. Start with a narrative analysis of the company's financial position, \
performance and cash flows. Write it before any table heading.\n",
    );
    out.push_str(
        "2. Then output exactly three tables, each introduced by its heading on its own line:\n",
    );
    for kind in StatementKind::ALL {
        out.push_str(&format!("   {}\n", kind.heading()));
    }
    out.push_str(
        "3. Each table row must be formatted as `Indicator | Current Year | Previous Year`, \
one row per line. Use the figures from the data; write 0 when a value is missing.\n",
    );
    out.push_str("4. Use these indicators where the data supports them:\n");
    for kind in StatementKind::ALL {
        out.push_str(&format!(
            "   - {}: {}\n",
            kind.title(),
            indicators(kind).join(", ")
        ));
    }
    out
}

//! Key financial ratios derived from extracted statement rows.
//!
//! Ratios use current-year figures only. Inputs are found by indicator
//! name (case-insensitive keyword match, first matching row wins). A ratio
//! is `None` when an input is missing or its denominator is zero.
//!
//! | Group | Ratio | Formula |
//! |-------|-------|---------|
//! | liquidity | current | current assets / current liabilities |
//! | liquidity | quick | (cash + securities + receivables) / current liabilities |
//! | liquidity | cash | cash / current liabilities |
//! | profitability | margins, ROA, ROE | profit × 100 / revenue, assets, equity |
//! | leverage | debt to equity, debt to assets, equity multiplier | |
//! | efficiency | asset, inventory, receivables turnover | |
//!
//! Equity missing from the balance sheet is derived as total assets minus
//! total liabilities.

use serde::Serialize;

use crate::models::{AnalysisResult, CellValue, FinancialRow};

use super::values::parse_figure;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LiquidityRatios {
    pub current_ratio: Option<f64>,
    pub quick_ratio: Option<f64>,
    pub cash_ratio: Option<f64>,
}

/// Percentages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ProfitabilityRatios {
    pub gross_margin: Option<f64>,
    pub operating_margin: Option<f64>,
    pub net_margin: Option<f64>,
    pub return_on_assets: Option<f64>,
    pub return_on_equity: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LeverageRatios {
    pub debt_to_equity: Option<f64>,
    pub debt_to_assets: Option<f64>,
    pub equity_multiplier: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct EfficiencyRatios {
    pub asset_turnover: Option<f64>,
    pub inventory_turnover: Option<f64>,
    pub receivables_turnover: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl Health {
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            Self::Excellent
        } else if score >= 60.0 {
            Self::Good
        } else if score >= 40.0 {
            Self::Fair
        } else {
            Self::Poor
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Excellent => "Excellent",
            Self::Good => "Good",
            Self::Fair => "Fair",
            Self::Poor => "Poor",
        }
    }
}

/// Component scores on a 0-100 scale. A component is `None` when the
/// ratios it needs are missing; the overall score averages the rest.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Assessment {
    pub overall_score: f64,
    pub health: Health,
    pub liquidity_score: Option<f64>,
    pub profitability_score: Option<f64>,
    pub leverage_score: Option<f64>,
    pub efficiency_score: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FinancialRatios {
    pub liquidity: LiquidityRatios,
    pub profitability: ProfitabilityRatios,
    pub leverage: LeverageRatios,
    pub efficiency: EfficiencyRatios,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assessment: Option<Assessment>,
}

/// How a ratio value is displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatioUnit {
    Times,
    Percent,
}

/// One display line of [`FinancialRatios::entries`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatioEntry {
    pub group: &'static str,
    pub label: &'static str,
    pub value: Option<f64>,
    pub unit: RatioUnit,
}

impl RatioEntry {
    pub fn display(&self) -> String {
        match (self.value, self.unit) {
            (None, _) => "n/a".to_string(),
            (Some(v), RatioUnit::Times) => format!("{v:.2}"),
            (Some(v), RatioUnit::Percent) => format!("{v:.1}%"),
        }
    }
}

impl FinancialRatios {
    pub fn is_empty(&self) -> bool {
        self.entries().iter().all(|e| e.value.is_none())
    }

    /// Every ratio in display order.
    pub fn entries(&self) -> Vec<RatioEntry> {
        use RatioUnit::{Percent, Times};
        let e = |group, label, value, unit| RatioEntry {
            group,
            label,
            value,
            unit,
        };
        let (l, p, d, f) = (
            &self.liquidity,
            &self.profitability,
            &self.leverage,
            &self.efficiency,
        );
        vec![
            e("Liquidity", "Current Ratio", l.current_ratio, Times),
            e("Liquidity", "Quick Ratio", l.quick_ratio, Times),
            e("Liquidity", "Cash Ratio", l.cash_ratio, Times),
            e("Profitability", "Gross Margin", p.gross_margin, Percent),
            e("Profitability", "Operating Margin", p.operating_margin, Percent),
            e("Profitability", "Net Margin", p.net_margin, Percent),
            e("Profitability", "Return on Assets", p.return_on_assets, Percent),
            e("Profitability", "Return on Equity", p.return_on_equity, Percent),
            e("Leverage", "Debt to Equity", d.debt_to_equity, Times),
            e("Leverage", "Debt to Assets", d.debt_to_assets, Times),
            e("Leverage", "Equity Multiplier", d.equity_multiplier, Times),
            e("Efficiency", "Asset Turnover", f.asset_turnover, Times),
            e("Efficiency", "Inventory Turnover", f.inventory_turnover, Times),
            e("Efficiency", "Receivables Turnover", f.receivables_turnover, Times),
        ]
    }
}

/// Keyword rule for locating an indicator row.
struct Lookup {
    any: &'static [&'static str],
    none: &'static [&'static str],
}

const CURRENT_ASSETS: Lookup = Lookup {
    any: &["current assets"],
    none: &["non-current", "noncurrent"],
};
const CURRENT_LIABILITIES: Lookup = Lookup {
    any: &["current liabilities"],
    none: &["non-current", "noncurrent"],
};
const CASH: Lookup = Lookup {
    any: &["cash and cash equivalents", "cash at bank", "cash"],
    none: &["flow", "paid", "received"],
};
const SECURITIES: Lookup = Lookup {
    any: &["marketable", "trading securities", "short-term investments"],
    none: &[],
};
const RECEIVABLES: Lookup = Lookup {
    any: &["receivable"],
    none: &["non-current", "long-term"],
};
const INVENTORY: Lookup = Lookup {
    any: &["inventor"],
    none: &["turnover"],
};
const TOTAL_ASSETS: Lookup = Lookup {
    any: &["total assets"],
    none: &[],
};
const TOTAL_LIABILITIES: Lookup = Lookup {
    any: &["total liabilities"],
    none: &["equity", "current"],
};
const TOTAL_EQUITY: Lookup = Lookup {
    any: &["total equity", "shareholders' equity", "stockholders' equity", "owners' equity"],
    none: &["liabilities"],
};
const REVENUE: Lookup = Lookup {
    any: &["revenue", "sales", "turnover"],
    none: &["cost", "unearned", "deferred"],
};
const COST_OF_SALES: Lookup = Lookup {
    any: &["cost of goods sold", "cost of sales", "cost of revenue"],
    none: &[],
};
const GROSS_PROFIT: Lookup = Lookup {
    any: &["gross profit"],
    none: &["margin"],
};
const OPERATING_INCOME: Lookup = Lookup {
    any: &["operating income", "operating profit"],
    none: &["margin", "non-operating"],
};
const NET_INCOME: Lookup = Lookup {
    any: &["net income", "net profit", "net earnings"],
    none: &["margin", "per share"],
};

impl Lookup {
    fn matches(&self, indicator: &str) -> bool {
        self.any.iter().any(|k| indicator.contains(k))
            && !self.none.iter().any(|k| indicator.contains(k))
    }

    /// Current-year figure of the first matching row that parses.
    fn find(&self, rows: &[FinancialRow]) -> Option<f64> {
        rows.iter()
            .filter(|row| self.matches(&row.indicator.to_lowercase()))
            .find_map(|row| figure(&row.current_year))
    }
}

fn figure(value: &CellValue) -> Option<f64> {
    match value {
        CellValue::Number(n) if n.is_finite() => Some(*n),
        CellValue::Number(_) => None,
        CellValue::Text(s) => parse_figure(s),
    }
}

fn ratio(numerator: Option<f64>, denominator: Option<f64>) -> Option<f64> {
    let (n, d) = (numerator?, denominator?);
    if d == 0.0 {
        return None;
    }
    Some(n / d).filter(|r| r.is_finite())
}

fn percent(numerator: Option<f64>, denominator: Option<f64>) -> Option<f64> {
    ratio(numerator, denominator).map(|r| r * 100.0)
}

/// Turnover needs a positive base.
fn turnover(numerator: Option<f64>, base: Option<f64>) -> Option<f64> {
    ratio(numerator, base.filter(|b| *b > 0.0))
}

fn sum_present(values: &[Option<f64>]) -> Option<f64> {
    values
        .iter()
        .flatten()
        .copied()
        .reduce(|a, b| a + b)
}

pub fn compute_ratios(analysis: &AnalysisResult) -> FinancialRatios {
    let bs = &analysis.balance_sheet;
    let is = &analysis.income_statement;

    let current_assets = CURRENT_ASSETS.find(bs);
    let current_liabilities = CURRENT_LIABILITIES.find(bs);
    let cash = CASH.find(bs);
    let receivables = RECEIVABLES.find(bs);
    let inventory = INVENTORY.find(bs);
    let total_assets = TOTAL_ASSETS.find(bs);
    let total_liabilities = TOTAL_LIABILITIES.find(bs);
    let total_equity = TOTAL_EQUITY.find(bs).or_else(|| Some(total_assets? - total_liabilities?));

    let revenue = REVENUE.find(is);
    let net_income = NET_INCOME.find(is);

    let liquidity = LiquidityRatios {
        current_ratio: ratio(current_assets, current_liabilities),
        quick_ratio: ratio(
            sum_present(&[cash, SECURITIES.find(bs), receivables]),
            current_liabilities,
        ),
        cash_ratio: ratio(cash, current_liabilities),
    };
    let profitability = ProfitabilityRatios {
        gross_margin: percent(GROSS_PROFIT.find(is), revenue),
        operating_margin: percent(OPERATING_INCOME.find(is), revenue),
        net_margin: percent(net_income, revenue),
        return_on_assets: percent(net_income, total_assets),
        return_on_equity: percent(net_income, total_equity),
    };
    let leverage = LeverageRatios {
        debt_to_equity: ratio(total_liabilities, total_equity),
        debt_to_assets: ratio(total_liabilities, total_assets),
        equity_multiplier: ratio(total_assets, total_equity),
    };
    let efficiency = EfficiencyRatios {
        asset_turnover: ratio(revenue, total_assets),
        inventory_turnover: turnover(COST_OF_SALES.find(is), inventory),
        receivables_turnover: turnover(revenue, receivables),
    };

    let mut ratios = FinancialRatios {
        liquidity,
        profitability,
        leverage,
        efficiency,
        assessment: None,
    };
    ratios.assessment = assess(&ratios);
    ratios
}

/// Points for the first threshold `value` reaches, highest first.
fn tiered(value: f64, tiers: &[(f64, f64)]) -> f64 {
    tiers
        .iter()
        .find(|(threshold, _)| value >= *threshold)
        .map_or(0.0, |(_, points)| *points)
}

fn assess(r: &FinancialRatios) -> Option<Assessment> {
    let liquidity_score = match (r.liquidity.current_ratio, r.liquidity.quick_ratio) {
        (Some(current), Some(quick)) => Some(
            tiered(current, &[(2.0, 50.0), (1.0, 30.0), (0.5, 10.0)])
                + tiered(quick, &[(1.0, 50.0), (0.5, 30.0), (0.25, 10.0)]),
        ),
        _ => None,
    };
    let profitability_score = match (r.profitability.net_margin, r.profitability.return_on_equity) {
        (Some(margin), Some(roe)) => Some(
            tiered(margin, &[(10.0, 50.0), (5.0, 30.0), (2.0, 10.0)])
                + tiered(roe, &[(15.0, 50.0), (10.0, 30.0), (5.0, 10.0)]),
        ),
        _ => None,
    };
    // Lower is better; negative equity scores nothing.
    let leverage_score = r.leverage.debt_to_equity.map(|de| match de {
        de if de < 0.0 => 0.0,
        de if de <= 0.5 => 100.0,
        de if de <= 1.0 => 75.0,
        de if de <= 1.5 => 50.0,
        de if de <= 2.0 => 25.0,
        _ => 0.0,
    });
    let efficiency_score = r.efficiency.asset_turnover.map(|t| {
        tiered(t, &[(2.0, 100.0), (1.5, 75.0), (1.0, 50.0), (0.5, 25.0)])
    });

    let scores: Vec<f64> = [
        liquidity_score,
        profitability_score,
        leverage_score,
        efficiency_score,
    ]
    .into_iter()
    .flatten()
    .collect();
    if scores.is_empty() {
        return None;
    }
    let overall_score = scores.iter().sum::<f64>() / scores.len() as f64;
    Some(Assessment {
        overall_score,
        health: Health::from_score(overall_score),
        liquidity_score,
        profitability_score,
        leverage_score,
        efficiency_score,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(name: &str, current: &str) -> FinancialRow {
        FinancialRow {
            indicator: name.into(),
            current_year: CellValue::Text(current.into()),
            previous_year: CellValue::Text(String::new()),
        }
    }

    fn sample() -> AnalysisResult {
        AnalysisResult {
            balance_sheet: vec![
                row("Cash and Cash Equivalents", "200"),
                row("Accounts Receivable", "100"),
                row("Inventory", "150"),
                row("Total Current Assets", "500"),
                row("Total Assets", "1,000"),
                row("Total Current Liabilities", "250"),
                row("Total Liabilities", "400"),
                row("Total Equity", "600"),
            ],
            income_statement: vec![
                row("Revenue", "2,000"),
                row("Cost of Goods Sold", "1,200"),
                row("Gross Profit", "800"),
                row("Operating Income", "300"),
                row("Net Income", "240"),
            ],
            cash_flow_statement: vec![],
            summary: String::new(),
        }
    }

    fn close(a: Option<f64>, b: f64) -> bool {
        a.is_some_and(|a| (a - b).abs() < 1e-9)
    }

    #[test]
    fn computes_all_groups() {
        let r = compute_ratios(&sample());
        assert!(close(r.liquidity.current_ratio, 2.0));
        assert!(close(r.liquidity.quick_ratio, 1.2));
        assert!(close(r.liquidity.cash_ratio, 0.8));
        assert!(close(r.profitability.gross_margin, 40.0));
        assert!(close(r.profitability.operating_margin, 15.0));
        assert!(close(r.profitability.net_margin, 12.0));
        assert!(close(r.profitability.return_on_assets, 24.0));
        assert!(close(r.profitability.return_on_equity, 40.0));
        assert!(close(r.leverage.debt_to_equity, 400.0 / 600.0));
        assert!(close(r.leverage.debt_to_assets, 0.4));
        assert!(close(r.efficiency.asset_turnover, 2.0));
        assert!(close(r.efficiency.inventory_turnover, 8.0));
        assert!(close(r.efficiency.receivables_turnover, 20.0));
    }

    #[test]
    fn strong_company_scores_excellent() {
        let a = compute_ratios(&sample()).assessment.unwrap();
        assert_eq!(a.liquidity_score, Some(100.0));
        assert_eq!(a.profitability_score, Some(100.0));
        assert_eq!(a.leverage_score, Some(75.0));
        assert_eq!(a.efficiency_score, Some(100.0));
        assert_eq!(a.health, Health::Excellent);
    }

    #[test]
    fn missing_inputs_and_zero_denominators_are_none() {
        let mut analysis = sample();
        analysis.balance_sheet.retain(|r| !r.indicator.contains("Current Liabilities"));
        analysis.income_statement[0] = row("Revenue", "0");
        let r = compute_ratios(&analysis);
        assert_eq!(r.liquidity.current_ratio, None);
        assert_eq!(r.liquidity.quick_ratio, None);
        assert_eq!(r.profitability.net_margin, None);
        assert!(close(r.efficiency.asset_turnover, 0.0));
        let a = r.assessment.unwrap();
        assert_eq!(a.liquidity_score, None);
        assert_eq!(a.profitability_score, None);
    }

    #[test]
    fn equity_derived_when_absent() {
        let mut analysis = sample();
        analysis.balance_sheet.retain(|r| r.indicator != "Total Equity");
        let r = compute_ratios(&analysis);
        assert!(close(r.leverage.equity_multiplier, 1000.0 / 600.0));
    }

    #[test]
    fn keyword_rules_skip_lookalikes() {
        let analysis = AnalysisResult {
            balance_sheet: vec![
                row("Total Liabilities and Equity", "1,000"),
                row("Total Liabilities", "300"),
                row("Total Assets", "1,000"),
            ],
            ..AnalysisResult::default()
        };
        let r = compute_ratios(&analysis);
        assert!(close(r.leverage.debt_to_assets, 0.3));
    }

    #[test]
    fn empty_analysis_has_no_ratios() {
        let r = compute_ratios(&AnalysisResult::default());
        assert!(r.is_empty());
        assert!(r.assessment.is_none());
        assert_eq!(r.entries()[0].display(), "n/a");
    }

    #[test]
    fn health_thresholds() {
        assert_eq!(Health::from_score(80.0), Health::Excellent);
        assert_eq!(Health::from_score(60.0), Health::Good);
        assert_eq!(Health::from_score(40.0), Health::Fair);
        assert_eq!(Health::from_score(39.9), Health::Poor);
    }
}

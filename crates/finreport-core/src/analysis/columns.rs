//! Table layout detection: header row and current/previous year columns.
//!
//! Column detection is a chain of [`ColumnClassifier`] strategies tried in
//! order; the first one that answers wins.
//!
//! | Classifier | Looks at | Rule |
//! |------------|----------|------|
//! | [`YearHeaderClassifier`] | header cells | larger year = current |
//! | [`PeriodLabelClassifier`] | header cells | "current"/"previous" style labels |
//! | [`NumericFallbackClassifier`] | body cells | first two numeric columns, left = previous |

use serde::Serialize;

use super::grid::{is_blank_row, Grid};

/// Which columns hold the current and previous period values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct YearColumns {
    pub current: usize,
    pub previous: usize,
    pub current_label: String,
    pub previous_label: String,
}

/// Detected shape of a financial table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableLayout {
    pub header_row: usize,
    pub columns: Option<YearColumns>,
    /// Name of the classifier that produced `columns`.
    pub classifier: Option<&'static str>,
}

pub trait ColumnClassifier: Send + Sync {
    fn name(&self) -> &'static str;
    fn classify(&self, grid: &Grid, header_row: usize) -> Option<YearColumns>;
}

pub fn default_classifiers() -> Vec<Box<dyn ColumnClassifier>> {
    vec![
        Box::new(YearHeaderClassifier),
        Box::new(PeriodLabelClassifier),
        Box::new(NumericFallbackClassifier),
    ]
}

/// Detect header row and year columns with the given classifier chain.
pub fn detect_layout(grid: &Grid, classifiers: &[Box<dyn ColumnClassifier>]) -> TableLayout {
    let header_row = detect_header_row(grid);
    for classifier in classifiers {
        if let Some(columns) = classifier.classify(grid, header_row) {
            return TableLayout {
                header_row,
                columns: Some(columns),
                classifier: Some(classifier.name()),
            };
        }
    }
    TableLayout {
        header_row,
        columns: None,
        classifier: None,
    }
}

/// First row with a `code` cell; else the first row with a year or period
/// label; else row 0.
pub fn detect_header_row(grid: &Grid) -> usize {
    let rows = grid.rows();
    if let Some(i) = rows
        .iter()
        .position(|row| row.iter().any(|c| c.to_lowercase().contains("code")))
    {
        return i;
    }
    rows.iter()
        .position(|row| {
            row.iter()
                .any(|c| year_of(c).is_some() || period_label(c).is_some())
        })
        .unwrap_or(0)
}

/// Four-digit year in 1900–2199, alone or with a short non-numeric
/// decoration (`FY2024`, `2024A`, `2024.0`).
pub fn year_of(cell: &str) -> Option<u16> {
    let cell = cell.trim();
    if let Ok(n) = cell.parse::<f64>() {
        if n.fract() == 0.0 && (1900.0..=2199.0).contains(&n) {
            return Some(n as u16);
        }
        return None;
    }
    let runs: Vec<&str> = cell
        .split(|c: char| !c.is_ascii_digit())
        .filter(|s| !s.is_empty())
        .collect();
    match runs.as_slice() {
        [run] if run.len() == 4 => run.parse::<u16>().ok().filter(|y| (1900..=2199).contains(y)),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Current,
    Previous,
}

const CURRENT_LABELS: &[&str] = &[
    "current",
    "this year",
    "current year",
    "current period",
    "cy",
];
const PREVIOUS_LABELS: &[&str] = &[
    "previous",
    "prior",
    "last year",
    "previous year",
    "prior year",
    "prior period",
    "py",
];

pub fn period_label(cell: &str) -> Option<Period> {
    let norm = cell
        .trim()
        .trim_end_matches(':')
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    if CURRENT_LABELS.contains(&norm.as_str()) {
        Some(Period::Current)
    } else if PREVIOUS_LABELS.contains(&norm.as_str()) {
        Some(Period::Previous)
    } else {
        None
    }
}

pub struct YearHeaderClassifier;

impl ColumnClassifier for YearHeaderClassifier {
    fn name(&self) -> &'static str {
        "year_header"
    }

    fn classify(&self, grid: &Grid, header_row: usize) -> Option<YearColumns> {
        let row = grid.rows().get(header_row)?;
        let mut years: Vec<(u16, usize)> = Vec::new();
        for (col, cell) in row.iter().enumerate() {
            if let Some(year) = year_of(cell) {
                if !years.iter().any(|(y, _)| *y == year) {
                    years.push((year, col));
                }
            }
        }
        if years.len() < 2 {
            return None;
        }
        years.sort_by(|a, b| b.0.cmp(&a.0));
        let (current_year, current) = years[0];
        let (previous_year, previous) = years[1];
        Some(YearColumns {
            current,
            previous,
            current_label: current_year.to_string(),
            previous_label: previous_year.to_string(),
        })
    }
}

pub struct PeriodLabelClassifier;

impl ColumnClassifier for PeriodLabelClassifier {
    fn name(&self) -> &'static str {
        "period_label"
    }

    fn classify(&self, grid: &Grid, header_row: usize) -> Option<YearColumns> {
        let row = grid.rows().get(header_row)?;
        let find = |period: Period| {
            row.iter()
                .position(|c| period_label(c) == Some(period))
                .map(|col| (col, row[col].trim().to_string()))
        };
        let (current, current_label) = find(Period::Current)?;
        let (previous, previous_label) = find(Period::Previous)?;
        Some(YearColumns {
            current,
            previous,
            current_label,
            previous_label,
        })
    }
}

pub struct NumericFallbackClassifier;

impl NumericFallbackClassifier {
    fn is_numeric(cell: &str) -> bool {
        let cleaned: String = cell
            .trim()
            .chars()
            .filter(|c| !matches!(c, ',' | '$' | '€' | '£' | '¥' | '%' | ' '))
            .collect();
        let cleaned = cleaned
            .strip_prefix('(')
            .and_then(|s| s.strip_suffix(')'))
            .unwrap_or(&cleaned);
        !cleaned.is_empty() && cleaned.parse::<f64>().is_ok()
    }
}

impl ColumnClassifier for NumericFallbackClassifier {
    fn name(&self) -> &'static str {
        "numeric_fallback"
    }

    fn classify(&self, grid: &Grid, header_row: usize) -> Option<YearColumns> {
        let body: Vec<&Vec<String>> = grid
            .rows()
            .iter()
            .skip(header_row + 1)
            .filter(|r| !is_blank_row(r))
            .collect();
        if body.is_empty() {
            return None;
        }
        let width = grid.width();
        let mut numeric_cols = Vec::new();
        let mut seen_text = false;
        for col in 0..width {
            let (mut numeric, mut filled) = (0usize, 0usize);
            for row in &body {
                let cell = row.get(col).map(|s| s.trim()).unwrap_or("");
                if cell.is_empty() {
                    continue;
                }
                filled += 1;
                if Self::is_numeric(cell) {
                    numeric += 1;
                }
            }
            if filled == 0 {
                continue;
            }
            if numeric * 2 > filled {
                if seen_text {
                    numeric_cols.push(col);
                }
            } else {
                seen_text = true;
            }
            if numeric_cols.len() == 2 {
                break;
            }
        }
        let [previous, current] = numeric_cols.as_slice() else {
            return None;
        };
        let label = |col: usize, fallback: &str| {
            let header = grid.cell(header_row, col).trim();
            if header.is_empty() {
                fallback.to_string()
            } else {
                header.to_string()
            }
        };
        Some(YearColumns {
            current: *current,
            previous: *previous,
            current_label: label(*current, "Current Year"),
            previous_label: label(*previous, "Previous Year"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(rows: &[&[&str]]) -> Grid {
        Grid::new(
            rows.iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
        )
    }

    #[test]
    fn code_header_with_years() {
        let g = grid(&[
            &["Acme Holdings"],
            &["Balance sheet"],
            &["Unit: USD"],
            &[],
            &["Prepared 2025-03-01"],
            &["Item", "Code", "2023", "2024"],
            &["Cash", "1001", "900", "1000"],
        ]);
        let layout = detect_layout(&g, &default_classifiers());
        assert_eq!(layout.header_row, 5);
        let cols = layout.columns.unwrap();
        assert_eq!(cols.previous, 2);
        assert_eq!(cols.current, 3);
        assert_eq!(layout.classifier, Some("year_header"));
    }

    #[test]
    fn larger_year_is_current_regardless_of_order() {
        let g = grid(&[&["Item", "2024", "2023"], &["Cash", "1", "2"]]);
        let cols = YearHeaderClassifier.classify(&g, 0).unwrap();
        assert_eq!(cols.current, 1);
        assert_eq!(cols.previous, 2);
        assert_eq!(cols.current_label, "2024");
    }

    #[test]
    fn header_row_falls_back_to_year_row() {
        let g = grid(&[&["Report"], &["Item", "FY2022", "FY2023"], &["Cash", "1", "2"]]);
        assert_eq!(detect_header_row(&g), 1);
    }

    #[test]
    fn header_row_defaults_to_zero() {
        let g = grid(&[&["Item", "A", "B"], &["Cash", "1", "2"]]);
        assert_eq!(detect_header_row(&g), 0);
    }

    #[test]
    fn period_labels() {
        let g = grid(&[&["Indicator", "Prior Year", "Current Year"], &["Cash", "1", "2"]]);
        let layout = detect_layout(&g, &default_classifiers());
        let cols = layout.columns.unwrap();
        assert_eq!(cols.current, 2);
        assert_eq!(cols.previous, 1);
        assert_eq!(layout.classifier, Some("period_label"));
    }

    #[test]
    fn numeric_fallback_left_is_previous() {
        let g = grid(&[
            &["Indicator", "A", "B", "C"],
            &["Cash", "1,000", "(200)", "x"],
            &["Debt", "500", "300", "y"],
        ]);
        let layout = detect_layout(&g, &default_classifiers());
        let cols = layout.columns.unwrap();
        assert_eq!(cols.previous, 1);
        assert_eq!(cols.current, 2);
        assert_eq!(layout.classifier, Some("numeric_fallback"));
    }

    #[test]
    fn year_parsing() {
        assert_eq!(year_of("2024"), Some(2024));
        assert_eq!(year_of("2024.0"), Some(2024));
        assert_eq!(year_of("FY2023"), Some(2023));
        assert_eq!(year_of("1,000"), None);
        assert_eq!(year_of("1850"), None);
        assert_eq!(year_of("2023-12-31"), None);
    }
}

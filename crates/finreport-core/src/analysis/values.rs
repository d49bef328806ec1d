//! Numeric interpretation of extracted cell values.
//!
//! Values are stored verbatim; these helpers are used only when rendering
//! change columns.

use crate::models::CellValue;

/// Parse a financial figure.
///
/// Strips thousands separators, currency symbols, `%` and whitespace, and
/// reads `(x)` or a trailing `-` as negative. Anything unparseable is `0.0`.
pub fn numeric_value(value: &CellValue) -> f64 {
    match value {
        CellValue::Number(n) if n.is_finite() => *n,
        CellValue::Number(_) => 0.0,
        CellValue::Text(s) => parse_figure(s).unwrap_or(0.0),
    }
}

pub fn parse_figure(raw: &str) -> Option<f64> {
    let mut s: String = raw
        .trim()
        .chars()
        .filter(|c| {
            !matches!(c, ',' | '$' | '€' | '£' | '¥' | '%' | '\u{a0}') && !c.is_whitespace()
        })
        .collect();
    let mut negative = false;
    if s.starts_with('(') && s.ends_with(')') && s.len() >= 2 {
        negative = true;
        s = s[1..s.len() - 1].to_string();
    } else if s.len() > 1 && s.ends_with('-') {
        negative = true;
        s.pop();
    }
    let n: f64 = s.parse().ok().filter(|n: &f64| n.is_finite())?;
    Some(if negative { -n } else { n })
}

pub fn absolute_change(current: &CellValue, previous: &CellValue) -> f64 {
    numeric_value(current) - numeric_value(previous)
}

/// Percentage change, `None` when the previous value is zero.
pub fn percentage_change(current: &CellValue, previous: &CellValue) -> Option<f64> {
    let prev = numeric_value(previous);
    if prev == 0.0 {
        return None;
    }
    Some((numeric_value(current) - prev) / prev.abs() * 100.0)
}

/// Format with thousands separators and up to two decimals.
pub fn format_amount(n: f64) -> String {
    let rounded = (n * 100.0).round() / 100.0;
    let negative = rounded < 0.0;
    let abs = rounded.abs();
    let whole = abs.trunc() as u64;
    let cents = ((abs - abs.trunc()) * 100.0).round() as u64;

    let digits = whole.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if cents > 0 {
        grouped.push_str(&format!(".{cents:02}"));
    }
    if negative {
        format!("-{grouped}")
    } else {
        grouped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> CellValue {
        CellValue::Text(s.to_string())
    }

    #[test]
    fn parses_common_forms() {
        assert_eq!(numeric_value(&text("1,000,000")), 1_000_000.0);
        assert_eq!(numeric_value(&text("$ 1,250.50")), 1250.5);
        assert_eq!(numeric_value(&text("(300)")), -300.0);
        assert_eq!(numeric_value(&text("12.5%")), 12.5);
        assert_eq!(numeric_value(&text("n/a")), 0.0);
        assert_eq!(numeric_value(&CellValue::Number(42.0)), 42.0);
    }

    #[test]
    fn percentage_change_guards_zero() {
        assert_eq!(percentage_change(&text("100"), &text("0")), None);
        assert_eq!(percentage_change(&text("110"), &text("100")), Some(10.0));
        assert_eq!(percentage_change(&text("-50"), &text("(100)")), Some(50.0));
    }

    #[test]
    fn amount_formatting() {
        assert_eq!(format_amount(1_000_000.0), "1,000,000");
        assert_eq!(format_amount(-1234.5), "-1,234.50");
        assert_eq!(format_amount(0.0), "0");
    }
}

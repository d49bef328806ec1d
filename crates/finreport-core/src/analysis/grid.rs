//! Rectangular cell grid extracted from spreadsheets.

use serde::{Deserialize, Serialize};

/// Rows of string cells, in sheet order. Rows may have different widths.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Grid {
    rows: Vec<Vec<String>>,
}

impl Grid {
    pub fn new(rows: Vec<Vec<String>>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// `true` when no row has a non-blank cell.
    pub fn is_empty(&self) -> bool {
        self.rows.iter().all(|row| is_blank_row(row))
    }

    /// Cell text, or `""` for out-of-range coordinates.
    pub fn cell(&self, row: usize, col: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .map(|s| s.as_str())
            .unwrap_or("")
    }

    pub fn width(&self) -> usize {
        self.rows.iter().map(|r| r.len()).max().unwrap_or(0)
    }

    /// Append another grid's rows below this one (used for multi-sheet
    /// workbooks), separated by an empty row.
    pub fn append(&mut self, other: Grid) {
        if other.is_empty() {
            return;
        }
        if !self.rows.is_empty() {
            self.rows.push(Vec::new());
        }
        self.rows.extend(other.rows);
    }

    /// Plain-text rendering, one pipe-delimited line per non-blank row.
    pub fn to_text(&self) -> String {
        self.rows
            .iter()
            .filter(|r| !is_blank_row(r))
            .map(|r| render_row(r))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub fn is_blank_row(row: &[String]) -> bool {
    row.iter().all(|c| c.trim().is_empty())
}

/// Render cells as `a | b | c`, dropping trailing blanks.
pub fn render_row(row: &[String]) -> String {
    let end = row
        .iter()
        .rposition(|c| !c.trim().is_empty())
        .map(|i| i + 1)
        .unwrap_or(0);
    row[..end]
        .iter()
        .map(|c| c.trim())
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Parse CSV text into a [`Grid`].
///
/// Handles double-quoted fields with embedded commas, newlines and `""`
/// escapes. Accepts `\n` and `\r\n` line endings.
pub fn parse_csv(text: &str) -> Grid {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut rows = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' if field.is_empty() => in_quotes = true,
            ',' => row.push(std::mem::take(&mut field)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                row.push(std::mem::take(&mut field));
                rows.push(std::mem::take(&mut row));
            }
            _ => field.push(c),
        }
    }
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }
    Grid::new(rows)
}

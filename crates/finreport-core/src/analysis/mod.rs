//! Structured financial analysis extractor.
//!
//! Turns spreadsheet grids into a prompt for a [`CompletionModel`], and the
//! model's free-form answer back into typed statement rows.
//!
//! | Step | Module |
//! |------|--------|
//! | Header row and year columns | [`columns`] |
//! | Prompt text | [`prompt`] |
//! | Response parsing | [`parse`] |
//! | Numeric interpretation of values | [`values`] |
//! | Key ratios and health assessment | [`ratios`] |

pub mod columns;
pub mod grid;
pub mod parse;
pub mod prompt;
pub mod ratios;
pub mod values;

use anyhow::Result;

use crate::completion::CompletionModel;
use crate::models::AnalysisResult;

pub use columns::{
    default_classifiers, detect_layout, ColumnClassifier, TableLayout, YearColumns,
};
pub use grid::{parse_csv, Grid};
pub use parse::{parse_response, parse_sections, ParsedSection};
pub use prompt::{build_prompt, Prompt, SourceTable};
pub use ratios::{compute_ratios, FinancialRatios};

/// A named grid to analyse.
pub struct NamedGrid {
    pub name: String,
    pub grid: Grid,
}

/// Builds prompts with a configurable classifier chain and size limit.
pub struct Extractor {
    classifiers: Vec<Box<dyn ColumnClassifier>>,
    max_prompt_tokens: usize,
}

impl Extractor {
    pub fn new(max_prompt_tokens: usize) -> Self {
        Self {
            classifiers: default_classifiers(),
            max_prompt_tokens,
        }
    }

    pub fn with_classifiers(mut self, classifiers: Vec<Box<dyn ColumnClassifier>>) -> Self {
        self.classifiers = classifiers;
        self
    }

    pub fn layout(&self, grid: &Grid) -> TableLayout {
        detect_layout(grid, &self.classifiers)
    }

    pub fn prompt(&self, inputs: &[NamedGrid]) -> Prompt {
        let tables: Vec<SourceTable<'_>> = inputs
            .iter()
            .map(|input| SourceTable {
                name: &input.name,
                grid: &input.grid,
                layout: self.layout(&input.grid),
            })
            .collect();
        let prompt = build_prompt(&tables, self.max_prompt_tokens);
        if prompt.omitted_rows > 0 {
            tracing::info!(omitted = prompt.omitted_rows, "analysis prompt truncated");
        }
        prompt
    }

    /// Prompt the model once and parse its answer.
    pub async fn analyze(
        &self,
        model: &dyn CompletionModel,
        inputs: &[NamedGrid],
    ) -> Result<AnalysisResult> {
        let prompt = self.prompt(inputs);
        let response = model.complete(&prompt.text).await?;
        Ok(parse_response(&response))
    }
}

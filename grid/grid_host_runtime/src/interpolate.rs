//! `{column}` token substitution.
//!
//! Substitution runs a fixed number of passes over the whole schema, so a
//! value that itself contains tokens is resolved by the next pass. Tokens
//! still present after the last pass are left verbatim. The fixed count is
//! what guarantees termination when values reference each other in a cycle;
//! it does not guarantee that deeper reference chains resolve.

use crate::rows::Record;
use crate::schema::{Column, Schema};

pub const DEFAULT_PASSES: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interpolator {
    passes: usize,
}

impl Default for Interpolator {
    fn default() -> Self {
        Self::new(DEFAULT_PASSES)
    }
}

impl Interpolator {
    pub fn new(passes: usize) -> Self {
        Self { passes }
    }

    pub fn passes(&self) -> usize {
        self.passes
    }

    pub fn interpolate(&self, text: &str, schema: &Schema, record: &Record) -> String {
        let mut text = text.to_string();

        for _ in 0..self.passes {
            for column in schema.columns() {
                if !text.contains('{') {
                    return text;
                }

                let token = column.token();
                if text.contains(&token) {
                    text = text.replace(&token, record.value(&column.name));
                }
            }
        }

        text
    }

    pub fn render_text(&self, column: &Column, schema: &Schema, record: &Record) -> String {
        self.interpolate(&column.template, schema, record)
    }

    /// Style for the column at `index`: the row's highlight override when set,
    /// otherwise the column's own style.
    pub fn render_style(
        &self,
        index: usize,
        column: &Column,
        schema: &Schema,
        record: &Record,
    ) -> String {
        let source = record
            .styles
            .get(index)
            .filter(|style| !style.is_empty())
            .unwrap_or(&column.style);

        self.interpolate(source, schema, record)
    }
}

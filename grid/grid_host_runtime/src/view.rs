//! The grid widget seam.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use crate::rows::{RenderedTemplate, RowId};
use crate::schema::Column;

/// The on-screen table the runtime keeps in sync.
///
/// Rows are addressed by a view handle obtained from [`TableView::find_row`].
/// Blank rows are identified densely from 0 in insertion order. The view
/// mirrors the runtime's state but never owns it: the runtime tells it when
/// to grow and reads back what it actually rendered.
pub trait TableView {
    fn column_count(&self) -> usize;

    fn row_count(&self) -> usize;

    fn find_row(&self, row_id: RowId) -> Option<usize>;

    fn insert_blank_rows(&mut self, count: usize);

    fn add_column(&mut self, column: &Column);

    fn write_row(&mut self, handle: usize, row: &RenderedTemplate, suppress_repaint: bool);

    fn repaint_row(&mut self, handle: usize);

    fn read_row(&self, handle: usize) -> Option<RenderedTemplate>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ViewStats {
    pub columns_added: usize,
    pub row_insertions: usize,
    pub rows_written: usize,
    pub repaints: usize,
}

/// Headless [`TableView`] holding columns and rendered rows in memory.
///
/// An optional cell limit truncates every written field, standing in for a
/// widget that silently alters what it is given.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MemoryView {
    columns: Vec<Column>,
    rows: Vec<RenderedTemplate>,
    #[serde(skip)]
    cell_limit: Option<usize>,
    #[serde(skip)]
    stats: ViewStats,
}

impl MemoryView {
    pub fn with_cell_limit(limit: usize) -> Self {
        Self {
            cell_limit: Some(limit),
            ..Self::default()
        }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn rows(&self) -> &[RenderedTemplate] {
        &self.rows
    }

    pub fn stats(&self) -> ViewStats {
        self.stats
    }

    pub fn cell(&self, row_id: RowId, column: &str) -> Option<&str> {
        let handle = self.find_row(row_id)?;
        self.rows[handle].fields.get(column).map(String::as_str)
    }

    /// Overwrites one rendered field without going through the runtime.
    pub fn tamper(&mut self, row_id: RowId, column: &str, value: &str) {
        if let Some(handle) = self.find_row(row_id) {
            self.rows[handle]
                .fields
                .insert(column.to_string(), value.to_string());
        }
    }

    fn clip(&self, value: &str) -> String {
        match self.cell_limit {
            Some(limit) => value.chars().take(limit).collect(),
            None => value.to_string(),
        }
    }
}

impl TableView for MemoryView {
    fn column_count(&self) -> usize {
        self.columns.len()
    }

    fn row_count(&self) -> usize {
        self.rows.len()
    }

    fn find_row(&self, row_id: RowId) -> Option<usize> {
        (row_id < self.rows.len()).then_some(row_id)
    }

    fn insert_blank_rows(&mut self, count: usize) {
        let start = self.rows.len();
        self.rows.extend((start..start + count).map(RenderedTemplate::empty));
        self.stats.row_insertions += 1;
    }

    fn add_column(&mut self, column: &Column) {
        self.columns.push(column.clone());
        self.stats.columns_added += 1;
    }

    fn write_row(&mut self, handle: usize, row: &RenderedTemplate, suppress_repaint: bool) {
        if handle >= self.rows.len() {
            debug!(handle, "write to unknown view row ignored");
            return;
        }

        let fields: BTreeMap<String, String> = row
            .fields
            .iter()
            .map(|(name, value)| (name.clone(), self.clip(value)))
            .collect();
        let target = &mut self.rows[handle];
        target.fields = fields;
        target.styles = row.styles.clone();
        self.stats.rows_written += 1;

        if !suppress_repaint {
            self.repaint_row(handle);
        }
    }

    fn repaint_row(&mut self, handle: usize) {
        if handle < self.rows.len() {
            self.stats.repaints += 1;
        }
    }

    fn read_row(&self, handle: usize) -> Option<RenderedTemplate> {
        self.rows.get(handle).cloned()
    }
}

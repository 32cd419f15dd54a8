use std::collections::BTreeSet;

use tracing::{debug, warn};

use crate::error::{GridError, Result};
use crate::interpolate::Interpolator;
use crate::protocol::{OutboundFrame, PendingChange, RefreshReason};
use crate::reconcile::{Reconciliation, reconcile_row};
use crate::rows::{RowId, RowStore};
use crate::schema::{Column, Schema};
use crate::view::TableView;

pub const DEFAULT_MAX_ROWS: usize = 100_000;

/// Schema and row state bound to one table address.
#[derive(Debug, Clone)]
pub struct TableState {
    schema: Schema,
    rows: RowStore,
    max_rows: usize,
}

impl Default for TableState {
    fn default() -> Self {
        Self::with_max_rows(DEFAULT_MAX_ROWS)
    }
}

impl TableState {
    /// A table that rejects any batch naming a row index at or past
    /// `max_rows`.
    pub fn with_max_rows(max_rows: usize) -> Self {
        Self {
            schema: Schema::default(),
            rows: RowStore::default(),
            max_rows,
        }
    }

    pub fn max_rows(&self) -> usize {
        self.max_rows
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn rows(&self) -> &RowStore {
        &self.rows
    }

    /// Applies a schema frame. When the view is narrower than the frame, the
    /// view is widened and a schema refresh is requested so the server
    /// resends rows the view could not show yet.
    pub fn apply_schema<V: TableView>(
        &mut self,
        view: &mut V,
        columns: Vec<Column>,
        outbox: &mut Vec<OutboundFrame>,
    ) {
        let width = view.column_count();
        let minimum = self.schema.apply_columns(columns);
        self.rows.extend_columns(&self.schema);

        if width < minimum {
            let added = self.schema.ensure_width(view);
            debug!(added, width = self.schema.len(), "view widened");
            outbox.push(OutboundFrame::Refresh(RefreshReason::SchemaUpdate));
        }
    }

    /// Writes a batch of row deltas, repaints and reconciles the touched rows.
    /// Returns the number of cells written.
    ///
    /// The batch is validated before any write: a row past the row limit or a
    /// cell naming a column the schema does not declare fails the whole batch.
    pub fn apply_table<V: TableView>(
        &mut self,
        view: &mut V,
        changes: &[PendingChange],
        interpolator: &Interpolator,
        outbox: &mut Vec<OutboundFrame>,
    ) -> Result<usize> {
        if self.schema.is_empty() {
            debug!("delta before schema ignored");
            return Ok(0);
        }

        self.validate(changes)?;
        self.grow_for(view, changes);

        let mut total = 0;
        let mut touched = BTreeSet::new();

        for change in changes {
            let Some(record) = self.rows.record_mut(change.index) else {
                continue;
            };
            for cell in &change.cells {
                if let Some(column) = self.schema.column(cell.column) {
                    record.values.insert(column.name.clone(), cell.value.clone());
                }
            }

            self.rows.render_row(change.index, &self.schema, interpolator);
            self.write(view, change.index);
            total += change.cells.len();
            touched.insert(change.index);
        }

        for &id in &touched {
            view.repaint_row(RowStore::locate_view_row(view, id));
        }

        for &id in &touched {
            self.reconcile(view, id, outbox);
        }

        Ok(total)
    }

    /// Writes a batch of style overrides. Only the style side of each row is
    /// re-rendered; text is left as it was.
    pub fn apply_highlight<V: TableView>(
        &mut self,
        view: &mut V,
        changes: &[PendingChange],
        interpolator: &Interpolator,
    ) -> Result<usize> {
        if self.schema.is_empty() {
            debug!("highlight before schema ignored");
            return Ok(0);
        }

        self.validate(changes)?;
        self.grow_for(view, changes);

        let mut total = 0;

        for change in changes {
            let Some(record) = self.rows.record_mut(change.index) else {
                continue;
            };
            for cell in &change.cells {
                if let Some(style) = record.styles.get_mut(cell.column) {
                    style.clone_from(&cell.value);
                }
            }

            self.rows.render_styles(change.index, &self.schema, interpolator);
            self.write(view, change.index);
            view.repaint_row(RowStore::locate_view_row(view, change.index));
            total += change.cells.len();
        }

        Ok(total)
    }

    fn validate(&self, changes: &[PendingChange]) -> Result<()> {
        let width = self.schema.len();

        for change in changes {
            if change.index >= self.max_rows {
                return Err(GridError::RowLimitExceeded {
                    row: change.index,
                    limit: self.max_rows,
                });
            }
            if let Some(cell) = change.cells.iter().find(|cell| cell.column >= width) {
                return Err(GridError::UndeclaredColumn {
                    row: change.index,
                    column: cell.column,
                    width,
                });
            }
        }

        Ok(())
    }

    fn grow_for<V: TableView>(&mut self, view: &mut V, changes: &[PendingChange]) {
        if let Some(required) = changes.iter().map(|change| change.index).max() {
            self.rows.ensure_height(&self.schema, view, required);
        }
    }

    fn write<V: TableView>(&self, view: &mut V, id: RowId) {
        if let Some(template) = self.rows.template(id) {
            let handle = RowStore::locate_view_row(view, id);
            view.write_row(handle, template, true);
        }
    }

    fn reconcile<V: TableView>(&self, view: &V, id: RowId, outbox: &mut Vec<OutboundFrame>) {
        let Some(expected) = self.rows.template(id) else {
            return;
        };

        if let Reconciliation::Diverged {
            column,
            expected,
            actual,
        } = reconcile_row(view, &self.schema, expected)
        {
            warn!(
                row = id,
                %column,
                %expected,
                actual = actual.as_deref().unwrap_or("<missing>"),
                "view diverged from model; requesting full refresh"
            );
            outbox.push(OutboundFrame::Refresh(RefreshReason::ReconcileFailure));
        }
    }
}

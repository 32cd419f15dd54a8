//! Read-back check that the view shows what was written to it.

use crate::rows::{RenderedTemplate, RowStore};
use crate::schema::Schema;
use crate::view::TableView;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    Consistent,
    Diverged {
        column: String,
        expected: String,
        actual: Option<String>,
    },
}

/// Compares the view's rendered text of one row against `expected`, column
/// by column in schema order, stopping at the first mismatch. A row the
/// view cannot return diverges on its first column.
pub fn reconcile_row<V: TableView>(
    view: &V,
    schema: &Schema,
    expected: &RenderedTemplate,
) -> Reconciliation {
    let handle = RowStore::locate_view_row(view, expected.id);
    let actual = view.read_row(handle);

    for column in schema.columns() {
        let want = expected.field(&column.name).unwrap_or_default();
        let got = actual.as_ref().and_then(|row| row.field(&column.name));

        if got != Some(want) {
            return Reconciliation::Diverged {
                column: column.name.clone(),
                expected: want.to_string(),
                actual: got.map(str::to_string),
            };
        }
    }

    Reconciliation::Consistent
}

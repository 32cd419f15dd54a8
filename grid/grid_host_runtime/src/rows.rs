use std::collections::BTreeMap;

use serde::Serialize;

use crate::interpolate::Interpolator;
use crate::schema::Schema;
use crate::view::TableView;

/// Logical row index assigned by the server, dense from 0.
pub type RowId = usize;

/// Raw decoded values of one row, plus per-column highlight styles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    pub id: RowId,
    pub values: BTreeMap<String, String>,
    pub styles: Vec<String>,
}

impl Record {
    pub fn blank(id: RowId, schema: &Schema) -> Self {
        let mut record = Self {
            id,
            ..Self::default()
        };
        record.extend_columns(schema);
        record
    }

    pub fn value(&self, name: &str) -> &str {
        self.values.get(name).map_or("", String::as_str)
    }

    fn extend_columns(&mut self, schema: &Schema) {
        for column in schema.columns() {
            self.values.entry(column.name.clone()).or_default();
        }
        if self.styles.len() < schema.len() {
            self.styles.resize(schema.len(), String::new());
        }
    }
}

/// Paint-ready text and style of one row, derived from its [`Record`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RenderedTemplate {
    pub id: RowId,
    pub fields: BTreeMap<String, String>,
    pub styles: Vec<String>,
}

impl RenderedTemplate {
    pub fn empty(id: RowId) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    pub fn blank(id: RowId, schema: &Schema) -> Self {
        let mut template = Self::empty(id);
        template.extend_columns(schema);
        template
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    fn extend_columns(&mut self, schema: &Schema) {
        for column in schema.columns() {
            self.fields.entry(column.name.clone()).or_default();
        }
        if self.styles.len() < schema.len() {
            self.styles.resize(schema.len(), String::new());
        }
    }
}

/// Canonical per-row state of one table: records and their rendered
/// templates, indexed by [`RowId`].
#[derive(Debug, Clone, Default)]
pub struct RowStore {
    records: Vec<Record>,
    templates: Vec<RenderedTemplate>,
}

impl RowStore {
    pub fn height(&self) -> usize {
        self.records.len()
    }

    /// Allocates every row up to and including `required`, inserting the same
    /// number of blank rows into the view. Returns how many rows were added.
    pub fn ensure_height<V: TableView>(
        &mut self,
        schema: &Schema,
        view: &mut V,
        required: RowId,
    ) -> usize {
        let height = self.height();

        if required < height {
            return 0;
        }

        for id in height..=required {
            self.records.push(Record::blank(id, schema));
            self.templates.push(RenderedTemplate::blank(id, schema));
        }

        let added = required + 1 - height;
        view.insert_blank_rows(added);
        added
    }

    /// View handle for `row_id`. A row the view does not know is assumed to
    /// be the next one appended, at `row_count + 1`.
    pub fn locate_view_row<V: TableView>(view: &V, row_id: RowId) -> usize {
        view.find_row(row_id).unwrap_or_else(|| view.row_count() + 1)
    }

    /// Gives every existing row an empty value for columns added since it
    /// was allocated.
    pub fn extend_columns(&mut self, schema: &Schema) {
        for record in &mut self.records {
            record.extend_columns(schema);
        }
        for template in &mut self.templates {
            template.extend_columns(schema);
        }
    }

    pub fn record(&self, id: RowId) -> Option<&Record> {
        self.records.get(id)
    }

    pub fn record_mut(&mut self, id: RowId) -> Option<&mut Record> {
        self.records.get_mut(id)
    }

    pub fn template(&self, id: RowId) -> Option<&RenderedTemplate> {
        self.templates.get(id)
    }

    /// Recomputes text and style of row `id` from its record.
    pub fn render_row(&mut self, id: RowId, schema: &Schema, interpolator: &Interpolator) {
        let (Some(record), Some(template)) = (self.records.get(id), self.templates.get_mut(id))
        else {
            return;
        };
        template.extend_columns(schema);

        for (index, column) in schema.columns().iter().enumerate() {
            template.styles[index] = interpolator.render_style(index, column, schema, record);
            template.fields.insert(
                column.name.clone(),
                interpolator.render_text(column, schema, record),
            );
        }
    }

    /// Recomputes only the styles of row `id`.
    pub fn render_styles(&mut self, id: RowId, schema: &Schema, interpolator: &Interpolator) {
        let (Some(record), Some(template)) = (self.records.get(id), self.templates.get_mut(id))
        else {
            return;
        };
        template.extend_columns(schema);

        for (index, column) in schema.columns().iter().enumerate() {
            template.styles[index] = interpolator.render_style(index, column, schema, record);
        }
    }
}

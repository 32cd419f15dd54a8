use serde::Serialize;

use crate::codec;
use crate::error::{GridError, Result};
use crate::view::TableView;

const REQUIRED_FIELDS: usize = 7;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Column {
    pub name: String,
    pub caption: String,
    pub template: String,
    pub style: String,
    pub resizable: bool,
    pub sortable: bool,
    pub hidden: bool,
    pub width: Option<u32>,
}

impl Column {
    /// Parses `name,caption,template,style,resizable,sortable,hidden[,width]`.
    ///
    /// Caption, template and style are codec tokens. Flags are true only for
    /// the literal text `true`; a width that is not a number is dropped.
    pub fn parse(spec: &str) -> Result<Self> {
        let fields: Vec<&str> = spec.split(',').collect();

        if fields.len() < REQUIRED_FIELDS {
            return Err(GridError::malformed(format!(
                "column definition needs {REQUIRED_FIELDS} fields, got {}: {spec:?}",
                fields.len()
            )));
        }

        let name = fields[0];
        if name.is_empty() {
            return Err(GridError::malformed(format!(
                "column definition without a name: {spec:?}"
            )));
        }

        Ok(Self {
            name: name.to_string(),
            caption: codec::decode(fields[1]),
            template: codec::decode(fields[2]),
            style: codec::decode(fields[3]),
            resizable: fields[4] == "true",
            sortable: fields[5] == "true",
            hidden: fields[6] == "true",
            width: fields.get(7).and_then(|raw| raw.trim().parse::<u32>().ok()),
        })
    }

    pub fn token(&self) -> String {
        format!("{{{}}}", self.name)
    }
}

/// Ordered column definitions, indexed by arrival position.
///
/// The column count never shrinks. A later definition for an existing index
/// replaces it in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, index: usize) -> Option<&Column> {
        self.columns.get(index)
    }

    /// Writes `columns` at indices `0..columns.len()` and returns that count.
    pub fn apply_columns(&mut self, columns: Vec<Column>) -> usize {
        let minimum = columns.len();

        for (index, column) in columns.into_iter().enumerate() {
            if let Some(existing) = self.columns.get_mut(index) {
                *existing = column;
            } else {
                self.columns.push(column);
            }
        }

        minimum
    }

    /// Adds every column the view does not have yet. Returns how many were added.
    pub fn ensure_width<V: TableView>(&self, view: &mut V) -> usize {
        let width = view.column_count();

        for column in self.columns.iter().skip(width) {
            view.add_column(column);
        }

        self.columns.len().saturating_sub(width)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{encode_hex, encode_literal};
    use crate::view::MemoryView;
    use proptest::prelude::*;

    fn column_spec(name: &str) -> String {
        format!(
            "{name},{},{},{},true,false,false",
            encode_literal(name),
            encode_hex(&format!("{{{name}}}")),
            encode_literal("")
        )
    }

    fn column(name: &str) -> Column {
        Column::parse(&column_spec(name)).expect("parse column")
    }

    #[test]
    fn parses_all_fields() {
        let spec = format!(
            "price,{},{},{},true,false,true,60",
            encode_literal("Price"),
            encode_hex("{price} USD"),
            encode_hex("color: {tint};")
        );
        let column = Column::parse(&spec).expect("parse column");

        assert_eq!(column.name, "price");
        assert_eq!(column.caption, "Price");
        assert_eq!(column.template, "{price} USD");
        assert_eq!(column.style, "color: {tint};");
        assert!(column.resizable);
        assert!(!column.sortable);
        assert!(column.hidden);
        assert_eq!(column.width, Some(60));
        assert_eq!(column.token(), "{price}");
    }

    #[test]
    fn width_is_optional_and_lenient() {
        let spec = column_spec("a");
        assert_eq!(Column::parse(&spec).expect("parse").width, None);

        let spec = format!("{spec},wide");
        assert_eq!(Column::parse(&spec).expect("parse").width, None);
    }

    #[test]
    fn short_definition_is_rejected() {
        let err = Column::parse("name,>Name,>{name}").expect_err("expected malformed");
        assert!(matches!(err, GridError::MalformedFrame { .. }));
    }

    #[test]
    fn later_definition_overwrites_in_place() {
        let mut schema = Schema::default();
        schema.apply_columns(vec![column("a"), column("b")]);
        schema.apply_columns(vec![column("z")]);

        let names: Vec<&str> = schema.columns().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["z", "b"]);
    }

    #[test]
    fn ensure_width_is_idempotent() {
        let mut schema = Schema::default();
        let mut view = MemoryView::default();
        schema.apply_columns(vec![column("a"), column("b")]);

        assert_eq!(schema.ensure_width(&mut view), 2);
        assert_eq!(schema.ensure_width(&mut view), 0);
        assert_eq!(view.stats().columns_added, 2);
        assert_eq!(view.column_count(), 2);
    }

    proptest! {
        #[test]
        fn width_never_decreases(frames in prop::collection::vec(1usize..6, 1..10)) {
            let mut schema = Schema::default();
            let mut widest = 0;

            for count in frames {
                let columns = (0..count).map(|i| column(&format!("c{i}"))).collect();
                schema.apply_columns(columns);
                prop_assert!(schema.len() >= widest);
                widest = schema.len();
            }
        }
    }
}

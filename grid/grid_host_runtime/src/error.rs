use thiserror::Error;

pub type Result<T> = std::result::Result<T, GridError>;

#[derive(Debug, Error)]
pub enum GridError {
    #[error("malformed frame: {details}")]
    MalformedFrame { details: String },

    #[error("unknown frame tag {tag:?}")]
    UnknownFrameTag { tag: char },

    #[error("row {row} references column {column} but schema has {width} column(s)")]
    UndeclaredColumn {
        row: usize,
        column: usize,
        width: usize,
    },

    #[error("invalid row index {raw:?}")]
    InvalidRowIndex { raw: String },

    #[error("row {row} is beyond the {limit} row limit")]
    RowLimitExceeded { row: usize, limit: usize },

    #[error("invalid configuration for {key}: {details}")]
    Config { key: &'static str, details: String },
}

impl GridError {
    pub(crate) fn malformed(details: impl Into<String>) -> Self {
        Self::MalformedFrame {
            details: details.into(),
        }
    }
}

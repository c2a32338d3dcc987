//! Fatal errors: the input no longer looks like the schema this crate reads.

use thiserror::Error;

/// Schema drift in one of the input tables. Always aborts the run.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("{source_name}: required column `{column}` is missing")]
    MissingColumn {
        source_name: String,
        column: &'static str,
    },

    #[error("{source_name}: column header `{header}` is not a date")]
    BadDateHeader { source_name: String, header: String },

    #[error("{source_name}: no date columns found")]
    NoDateColumns { source_name: String },

    #[error("{source_name}: line {line}: {message}")]
    BadReferenceRow {
        source_name: String,
        line: u64,
        message: String,
    },

    #[error("{source_name}: malformed CSV")]
    Csv {
        source_name: String,
        #[source]
        source: csv::Error,
    },
}

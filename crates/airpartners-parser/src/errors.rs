use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParserError {
    #[error("{parser} is missing required column '{column}'")]
    MissingColumn {
        parser: &'static str,
        column: String,
    },

    #[error("{parser} CSV error: {source}")]
    Csv {
        parser: &'static str,
        #[source]
        source: csv::Error,
    },

    #[error("{parser} data row {line_index} invalid: {message}")]
    DataRow {
        parser: &'static str,
        line_index: usize,
        message: String,
    },

    #[error("{parser} validation error: {message}")]
    Validation {
        parser: &'static str,
        message: String,
    },

    #[error("{parser} input did not contain a header row")]
    EmptyData { parser: &'static str },
}

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CompileError {
    #[error("proxy '{proxy}' is missing required field '{field}'")]
    MissingField { proxy: String, field: &'static str },

    #[error("proxy '{proxy}' would reuse outbound tag '{tag}'")]
    DuplicateTag { proxy: String, tag: String },

    #[error("base template is invalid: {0}")]
    Template(String),
}

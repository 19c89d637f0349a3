use thiserror::Error;

/// Errors returned by the `validate` methods of configuration types.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A required string field was empty.
    #[error("`{0}` must not be empty")]
    EmptyField(&'static str),
    /// A field holds a value outside of its accepted range.
    #[error("invalid value for `{field}`: {constraint}")]
    InvalidFieldValue {
        field: &'static str,
        constraint: String,
    },
}

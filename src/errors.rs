/// Domain-specific error types for lexfuse
///
/// Infrastructure failures (missing index, empty corpus, unreadable inputs,
/// bad configuration) are fatal and surface through `LexfuseError`. Oracle
/// failures never reach this type: the pipeline stages that call the oracles
/// retry and then degrade.

use crate::dataset::DatasetError;
use crate::index::IndexError;

#[derive(Debug, thiserror::Error)]
pub enum LexfuseError {
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Dataset(#[from] DatasetError),
}

impl LexfuseError {
    /// Helper to create validation errors with field names
    ///
    /// Example:
    /// ```
    /// use lexfuse::errors::LexfuseError;
    /// let err = LexfuseError::validation("min_cos_sim", "must not exceed max_cos_sim");
    /// ```
    pub fn validation(field: &str, message: &str) -> Self {
        LexfuseError::Validation {
            message: message.to_string(),
            field: Some(field.to_string()),
        }
    }
}

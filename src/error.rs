use thiserror::Error;

use crate::fill::FillField;

/// Errors surfaced by passfill operations.
///
/// `Display` output is what end users see, so every variant renders as a
/// short single-line message.
#[derive(Debug, Error)]
pub enum Error {
    /// The native host answered with a non-"ok" status.
    #[error("{0}")]
    Host(String),

    /// Input was rejected locally before anything was saved or sent.
    #[error("{0}")]
    Validation(String),

    /// No frame accepted the fill after every escalation step.
    #[error("No fillable forms available for fields: {}", join_fields(.fields))]
    FillExhausted { fields: Vec<FillField> },

    /// The caller asked to fill a field the decrypted record does not have.
    #[error("Requested field is not present in the login: {field}")]
    RequiredFieldMissing { field: FillField },

    #[error("browser error: {0}")]
    Browser(String),

    #[error("settings error: {0}")]
    Settings(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

fn join_fields(fields: &[FillField]) -> String {
    fields
        .iter()
        .map(|field| field.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

use garde::Validate;

use crate::error::{AppError, Result};

/// Longest accepted service description.
pub const SERVICE_MAX_LEN: usize = 200;
/// Longest accepted free-text note.
pub const NOTES_MAX_LEN: usize = 2000;

/// Rejects strings that are empty once trimmed.
pub fn not_blank(value: &str, _ctx: &()) -> garde::Result {
    if value.trim().is_empty() {
        return Err(garde::Error::new("must not be blank"));
    }
    Ok(())
}

/// Validates a request payload, reporting the first failing field.
///
/// # Arguments
///
/// * `payload` - The deserialized request body.
///
/// # Returns
///
/// A `Result<()>` carrying an `AppError::Validation` on failure.
pub fn validate<T>(payload: &T) -> Result<()>
where
    T: Validate,
    T::Context: Default,
{
    payload.validate().map_err(|report| match report.iter().next() {
        Some((path, error)) => AppError::validation(path.to_string(), error.message().to_string()),
        None => AppError::validation("body", "invalid request"),
    })
}

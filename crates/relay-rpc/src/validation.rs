//! Input validation helpers for action payloads.

use serde_json::Value;

use crate::errors::ActionError;

/// Maximum general string parameter length (8 KB).
pub const MAX_PARAM_LENGTH: usize = 8_192;

/// Extract a required field from a payload object.
pub fn require_param<'a>(payload: &'a Value, key: &str) -> Result<&'a Value, ActionError> {
    payload.get(key).ok_or_else(|| ActionError::InvalidParams {
        message: format!("Missing required parameter: {key}"),
    })
}

/// Extract a required string field.
pub fn require_string_param(payload: &Value, key: &str) -> Result<String, ActionError> {
    require_param(payload, key)?
        .as_str()
        .map(ToOwned::to_owned)
        .ok_or_else(|| ActionError::InvalidParams {
            message: format!("Parameter '{key}' must be a string"),
        })
}

/// Validate that a string parameter does not exceed `max_len` bytes.
pub fn validate_string_param(value: &str, name: &str, max_len: usize) -> Result<(), ActionError> {
    if value.len() > max_len {
        return Err(ActionError::InvalidParams {
            message: format!(
                "Parameter '{name}' exceeds maximum length ({} > {max_len})",
                value.len()
            ),
        });
    }
    Ok(())
}

/// Sanitize an error message for client consumption.
///
/// Preserves user-facing messages but strips internal details (paths,
/// backtraces) from internal errors.
pub fn sanitize_error_message(err: &ActionError) -> String {
    match err {
        ActionError::InvalidParams { message }
        | ActionError::Execution { message }
        | ActionError::Custom { message, .. } => message.clone(),
        ActionError::Internal { .. } => "Internal error".to_string(),
    }
}

//! Router error codes and the typed handler error.

use relay_core::envelope::ErrorBody;

// ── Error code constants ────────────────────────────────────────────

/// Frame was not valid JSON or not a well-formed envelope.
pub const INVALID_JSON: &str = "invalid_json";
/// Request envelope lacked a `resource` routing key.
pub const MISSING_RESOURCE: &str = "missing_resource";
/// Request payload lacked an `action` string.
pub const MISSING_ACTION: &str = "missing_action";
/// No handler table exists for the resource.
pub const UNKNOWN_RESOURCE: &str = "unknown_resource";
/// The resource exists but the action is not in its table.
pub const UNKNOWN_ACTION: &str = "unknown_action";
/// A parameter was missing or had the wrong type.
pub const INVALID_PARAMS: &str = "invalid_params";
/// The matched operation failed.
pub const ACTION_EXECUTION_ERROR: &str = "action_execution_error";
/// Anything else escaping the router.
pub const INTERNAL_ERROR: &str = "internal_error";

/// Typed failure returned by action handlers.
///
/// Keeps a clean boundary at the router: business failures and programming
/// errors are distinguished by variant, never by string-matching messages.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    /// Required parameter missing or wrong type.
    #[error("{message}")]
    InvalidParams {
        /// Description of what is wrong.
        message: String,
    },

    /// The operation itself failed (business error).
    #[error("{message}")]
    Execution {
        /// Human-readable message.
        message: String,
    },

    /// Unexpected internal error.
    #[error("{message}")]
    Internal {
        /// Description.
        message: String,
    },

    /// Domain-specific error with an arbitrary code.
    #[error("{message}")]
    Custom {
        /// Machine-readable code.
        code: String,
        /// Human-readable message.
        message: String,
        /// Optional structured details.
        details: Option<serde_json::Value>,
    },
}

impl ActionError {
    /// Machine-readable error code for this variant.
    pub fn code(&self) -> &str {
        match self {
            Self::InvalidParams { .. } => INVALID_PARAMS,
            Self::Execution { .. } => ACTION_EXECUTION_ERROR,
            Self::Internal { .. } => INTERNAL_ERROR,
            Self::Custom { code, .. } => code,
        }
    }

    /// Convert to the wire-format error body.
    pub fn to_error_body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code().to_owned(),
            message: self.to_string(),
            details: match self {
                Self::Custom { details, .. } => details.clone(),
                _ => None,
            },
        }
    }
}

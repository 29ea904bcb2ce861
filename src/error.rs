//! Error types for the object/attribute service
//!
//! Errors are classified by how the caller should react:
//! - Validation: required identifiers or fields missing, nothing was sent
//! - Network: the remote call failed, local state is unchanged
//! - Fatal: registry/server mismatch (unknown attribute type), not user-recoverable

use thiserror::Error;

/// Failures talking to the remote API.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("API error {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Invalid API URL: {0}")]
    InvalidUrl(String),
}

impl ApiError {
    /// Returns true if repeating the same request could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Network(_) | ApiError::Timeout => true,
            ApiError::Status { status, .. } => *status == 429 || *status >= 500,
            ApiError::Decode(_) | ApiError::InvalidUrl(_) => false,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout
        } else if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            ApiError::Status {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            ApiError::Network(err.to_string())
        }
    }
}

impl From<url::ParseError> for ApiError {
    fn from(err: url::ParseError) -> Self {
        ApiError::InvalidUrl(err.to_string())
    }
}

/// Error types for store and form operations
#[derive(Debug, Error)]
pub enum StoreError {
    // Validation short-circuits
    #[error("A workspace is required")]
    MissingScope,

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Object has not been saved yet")]
    EntityNotPersisted,

    #[error("Object not found: {0}")]
    EntityNotFound(String),

    #[error("Attribute not found: {0}")]
    AttributeNotFound(String),

    #[error("Attribute value not found: {0}")]
    AttributeValueNotFound(String),

    #[error("Field cannot be changed after creation: {0}")]
    ImmutableField(&'static str),

    #[error("Attribute type cannot change from {from} to {to}")]
    AttributeTypeImmutable { from: String, to: String },

    #[error("Invalid attribute: {0}")]
    InvalidAttribute(String),

    #[error("Invalid attribute value for {attribute_id}: {reason}")]
    InvalidValue {
        attribute_id: String,
        reason: String,
    },

    // Remote failures
    #[error(transparent)]
    Api(#[from] ApiError),

    // Fatal integration errors
    #[error("Unknown attribute type: {0}")]
    UnknownAttributeType(String),
}

impl StoreError {
    /// Classify the error for the caller
    pub fn error_type(&self) -> ErrorType {
        match self {
            StoreError::Api(_) => ErrorType::Network,
            StoreError::UnknownAttributeType(_) => ErrorType::Fatal,
            _ => ErrorType::Validation,
        }
    }

    /// Returns true if the user can retry the same operation
    pub fn can_retry(&self) -> bool {
        match self {
            StoreError::Api(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Get a user-friendly recovery suggestion
    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            StoreError::MissingScope => "Select a workspace first.",
            StoreError::MissingField(_) => "Fill in the required fields and try again.",
            StoreError::EntityNotPersisted => "Create the object before adding attributes.",
            StoreError::EntityNotFound(_)
            | StoreError::AttributeNotFound(_)
            | StoreError::AttributeValueNotFound(_) => {
                "Reload the object and try again."
            }
            StoreError::ImmutableField(_) => "Create a new object instead.",
            StoreError::AttributeTypeImmutable { .. } => {
                "Delete the attribute and add a new one with the desired type."
            }
            StoreError::InvalidAttribute(_) | StoreError::InvalidValue { .. } => {
                "Correct the highlighted settings."
            }
            StoreError::Api(ApiError::Timeout) => "The server took too long. Try again.",
            StoreError::Api(ApiError::InvalidUrl(_)) => {
                "Check apiBaseUrl in ~/.objectdesk/config.json"
            }
            StoreError::Api(_) => "Check your connection and try again.",
            StoreError::UnknownAttributeType(_) => {
                "This attribute type is not supported by this version. Update the app."
            }
        }
    }
}

/// Serializable error representation for UI layers
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    pub message: String,
    pub error_type: ErrorType,
    pub can_retry: bool,
    pub recovery_suggestion: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorType {
    Validation,
    Network,
    Fatal,
}

impl From<&StoreError> for ErrorReport {
    fn from(err: &StoreError) -> Self {
        ErrorReport {
            message: err.to_string(),
            error_type: err.error_type(),
            can_retry: err.can_retry(),
            recovery_suggestion: err.recovery_suggestion().to_string(),
        }
    }
}

//! Error types for admission
//!
//! Structural errors stop a request before any rule runs. Collaborator errors
//! come from lookups of other resources and always fail closed.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structural admission errors
#[derive(Debug, Error, Clone, Serialize, Deserialize)]
pub enum AdmissionError {
    /// The request envelope is malformed
    #[error("malformed admission request: {reason}")]
    MalformedRequest { reason: String },

    /// The request names a kind other than the one the admitter handles
    #[error("expect resource to be '{expected}'")]
    UnexpectedKind { expected: String },

    /// The object could not be decoded
    #[error("{reason}")]
    Decode { reason: String },

    /// An update arrived without the previous object
    #[error("update of {kind} is missing the previous object")]
    MissingOldObject { kind: String },

    /// No admitter is registered for the kind and operation
    #[error("no admitter registered for {kind} {operation}")]
    NoAdmitter { kind: String, operation: String },

    /// A referenced resource violates a precondition
    #[error("{reason}")]
    Precondition { reason: String },
}

impl From<virt_types::DecodeError> for AdmissionError {
    fn from(err: virt_types::DecodeError) -> Self {
        Self::Decode {
            reason: err.to_string(),
        }
    }
}

/// Errors from looking up or patching other resources
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LookupError {
    /// The resource does not exist
    #[error("{kind} {name} not found")]
    NotFound { kind: String, name: String },

    /// The backing store could not be reached
    #[error("resource lookup unavailable: {reason}")]
    Unavailable { reason: String },

    /// The write conflicted with a concurrent change
    #[error("conflict updating {name}: {reason}")]
    Conflict { name: String, reason: String },
}

impl LookupError {
    /// Whether the error means the resource is absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Errors building rule tables
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleError {
    /// Two rules share an id
    #[error("duplicate rule id '{id}' in table {table}")]
    DuplicateRule { table: String, id: String },

    /// A configured pattern is not a valid regular expression
    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// Result type for admission operations
pub type Result<T> = std::result::Result<T, AdmissionError>;

/// Result type for resource lookups
pub type LookupResult<T> = std::result::Result<T, LookupError>;

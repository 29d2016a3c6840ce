//! Error types for the workload data model

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while parsing a resource quantity
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuantityError {
    /// The text does not have the shape of a quantity
    #[error("quantities must match the regular expression '^([+-]?[0-9.]+)([eEinumkKMGTP]*[-+]?[0-9]*)$'")]
    FormatWrong,

    /// The numeric part could not be parsed
    #[error("unable to parse numeric part of quantity")]
    Numeric,

    /// The suffix is not a known unit
    #[error("unable to parse quantity's suffix")]
    Suffix,

    /// The value does not fit the fixed-point representation
    #[error("quantity is out of the representable range")]
    OutOfRange,
}

/// Errors raised while decoding workload objects
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The payload was not valid JSON for the target type
    #[error("could not decode {kind}: {source}")]
    Json {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// The payload was empty
    #[error("empty {kind} payload")]
    Empty { kind: &'static str },
}

/// Result type for decoding operations
pub type DecodeResult<T> = std::result::Result<T, DecodeError>;

//! Validation findings
//!
//! A [`Finding`] is one problem found in an object. Findings accumulate; any
//! finding rejects the request.

use crate::field::FieldPath;
use serde::Serialize;
use std::fmt;

/// Category of a finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FindingKind {
    /// The value is not acceptable
    Invalid,
    /// A value is missing
    Required,
    /// The value is not one of the supported values
    NotSupported,
    /// The value repeats one that must be unique
    Duplicate,
    /// The value may not be set by this actor or in this state
    Forbidden,
    /// A collaborator failed while judging the object
    ServerError,
}

impl FindingKind {
    /// Reason string used in response causes
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Invalid => "FieldValueInvalid",
            Self::Required => "FieldValueRequired",
            Self::NotSupported => "FieldValueNotSupported",
            Self::Duplicate => "FieldValueDuplicate",
            Self::Forbidden => "FieldValueForbidden",
            Self::ServerError => "UnexpectedServerResponse",
        }
    }
}

impl fmt::Display for FindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason())
    }
}

/// A single validation problem
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub kind: FindingKind,
    pub message: String,
    pub field: FieldPath,
}

impl Finding {
    pub fn new(kind: FindingKind, message: impl Into<String>, field: FieldPath) -> Self {
        Self {
            kind,
            message: message.into(),
            field,
        }
    }

    pub fn invalid(field: &FieldPath, message: impl Into<String>) -> Self {
        Self::new(FindingKind::Invalid, message, field.clone())
    }

    pub fn required(field: &FieldPath, message: impl Into<String>) -> Self {
        Self::new(FindingKind::Required, message, field.clone())
    }

    pub fn not_supported(field: &FieldPath, message: impl Into<String>) -> Self {
        Self::new(FindingKind::NotSupported, message, field.clone())
    }

    pub fn duplicate(field: &FieldPath, message: impl Into<String>) -> Self {
        Self::new(FindingKind::Duplicate, message, field.clone())
    }

    pub fn forbidden(field: &FieldPath, message: impl Into<String>) -> Self {
        Self::new(FindingKind::Forbidden, message, field.clone())
    }

    pub fn server_error(field: &FieldPath, message: impl Into<String>) -> Self {
        Self::new(FindingKind::ServerError, message, field.clone())
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.field.is_root() {
            write!(f, "{}: {}", self.kind, self.message)
        } else {
            write!(f, "{} ({}): {}", self.kind, self.field, self.message)
        }
    }
}

/// Result of validating one object
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationOutcome {
    /// Findings in rule order
    pub findings: Vec<Finding>,

    /// Informational messages that never affect the decision
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl ValidationOutcome {
    /// Outcome with the given findings and no warnings
    pub fn from_findings(findings: Vec<Finding>) -> Self {
        Self {
            findings,
            warnings: Vec::new(),
        }
    }

    /// Whether the object is admitted
    pub fn is_allowed(&self) -> bool {
        self.findings.is_empty()
    }

    /// Append the findings and warnings of another outcome
    pub fn merge(&mut self, other: ValidationOutcome) {
        self.findings.extend(other.findings);
        self.warnings.extend(other.warnings);
    }

    pub fn push(&mut self, finding: Finding) {
        self.findings.push(finding);
    }

    pub fn extend(&mut self, findings: impl IntoIterator<Item = Finding>) {
        self.findings.extend(findings);
    }

    pub fn warn(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }
}

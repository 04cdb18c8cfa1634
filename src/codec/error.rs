//! Codec error types

use std::fmt;

use super::validation::ValidationIssue;

// ============================================================================
// Error Types
// ============================================================================

/// Failure surfaced by the codec layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Scheme, host, port or credential missing or unparsable.
    MalformedUri {
        /// What was wrong with the link.
        reason: String,
    },

    /// No codec handles this protocol identifier or scheme.
    UnsupportedProtocol {
        /// The identifier that failed to resolve.
        identifier: String,
    },

    /// The record is incomplete; holds only the hard failures.
    ValidationFailure {
        /// Everything that blocks config generation.
        issues: Vec<ValidationIssue>,
    },

    /// A record was handed to a codec for a different protocol.
    ProtocolMismatch {
        /// Protocol the codec handles.
        expected: String,
        /// Protocol the record carries.
        found: String,
    },
}

impl CodecError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedUri {
            reason: reason.into(),
        }
    }

    pub fn unsupported(identifier: impl Into<String>) -> Self {
        Self::UnsupportedProtocol {
            identifier: identifier.into(),
        }
    }
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedUri { reason } => write!(f, "cannot import link: {reason}"),
            Self::UnsupportedProtocol { identifier } => {
                write!(f, "unsupported protocol '{identifier}'")
            }
            Self::ValidationFailure { issues } => {
                let reasons: Vec<String> = issues.iter().map(|i| i.to_string()).collect();
                write!(f, "incomplete server record: {}", reasons.join("; "))
            }
            Self::ProtocolMismatch { expected, found } => {
                write!(f, "expected a {expected} record, got {found}")
            }
        }
    }
}

impl std::error::Error for CodecError {}

//! Record validation
//!
//! Codecs collect problems into a [`ValidationReport`]. Missing structural
//! fields (address, credential) are hard failures; missing fields that are
//! only recommended (e.g. SNI) are warnings. Hard-failing records never reach
//! config generation through the registry.

use std::fmt;
use std::net::IpAddr;

use tracing::warn;
use uuid::Uuid;

use crate::record::{FINGERPRINT_ALLOW_LIST, Protocol, ServerRecord};

use super::CodecError;

/// Shortest accepted REALITY public key (32 bytes, unpadded base64)
pub const MIN_PUBLIC_KEY_LEN: usize = 43;

/// Longest REALITY short id (8 bytes in hex)
pub const MAX_SHORT_ID_LEN: usize = 16;

// ============================================================================
// Validation Issues
// ============================================================================

/// A single problem found in a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    /// A structural field is absent.
    MissingField {
        /// The field name.
        field: &'static str,
    },

    /// A field is present but unusable.
    InvalidField {
        /// The field name.
        field: &'static str,
        /// Why it is unusable.
        reason: String,
    },

    /// The record belongs to another protocol.
    ProtocolMismatch {
        /// Protocol of the validating codec.
        expected: Protocol,
        /// Protocol the record carries.
        found: Protocol,
    },

    /// A field the connection works better with is absent.
    RecommendedFieldMissing {
        /// The field name.
        field: &'static str,
    },
}

impl ValidationIssue {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }

    /// Warnings never block config generation
    pub fn is_warning(&self) -> bool {
        matches!(self, Self::RecommendedFieldMissing { .. })
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingField { field } => write!(f, "missing required field '{field}'"),
            Self::InvalidField { field, reason } => write!(f, "invalid '{field}': {reason}"),
            Self::ProtocolMismatch { expected, found } => {
                write!(f, "record is {found}, expected {expected}")
            }
            Self::RecommendedFieldMissing { field } => {
                write!(f, "recommended field '{field}' is not set")
            }
        }
    }
}

// ============================================================================
// Validation Report
// ============================================================================

/// Outcome of validating one record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// Hard failures and warnings, in discovery order.
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True when nothing blocks config generation.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.issues.iter().any(|i| !i.is_warning())
    }

    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| !i.is_warning())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.is_warning())
    }

    pub fn push(&mut self, issue: ValidationIssue) {
        self.issues.push(issue);
    }

    /// Hard failure when `value` is blank.
    pub fn require(&mut self, field: &'static str, value: &str) -> bool {
        if value.trim().is_empty() {
            self.push(ValidationIssue::MissingField { field });
            false
        } else {
            true
        }
    }

    /// Warning when `value` is absent or blank.
    pub fn recommend(&mut self, field: &'static str, value: Option<&str>) {
        if value.is_none_or(|v| v.trim().is_empty()) {
            self.push(ValidationIssue::RecommendedFieldMissing { field });
        }
    }

    /// Checks the address fields every protocol shares.
    pub fn check_endpoint(&mut self, record: &ServerRecord) {
        self.require("host", &record.host);
        if record.port == 0 {
            self.push(ValidationIssue::invalid("port", "must be in 1..=65535"));
        }
    }

    /// Checks that `value` is a syntactically valid UUID credential.
    pub fn check_uuid(&mut self, field: &'static str, value: &str) {
        if self.require(field, value) && !is_valid_uuid(value) {
            self.push(ValidationIssue::invalid(field, "not a valid UUID"));
        }
    }

    /// Converts to the hard-failure error, keeping warnings on success.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::ValidationFailure`] listing only the hard failures.
    pub fn into_result(self) -> Result<Vec<ValidationIssue>, CodecError> {
        if self.is_valid() {
            Ok(self.issues)
        } else {
            Err(CodecError::ValidationFailure {
                issues: self.issues.into_iter().filter(|i| !i.is_warning()).collect(),
            })
        }
    }

    pub fn log_issues(&self, record: &ServerRecord) {
        for issue in &self.issues {
            warn!(server = %record.name, issue = %issue, "server record validation issue");
        }
    }
}

// ============================================================================
// Field Checks
// ============================================================================

pub fn is_valid_uuid(value: &str) -> bool {
    Uuid::parse_str(value.trim()).is_ok()
}

/// Hostname or IP literal acceptable as a TLS server name or dial address.
pub fn is_valid_hostname(value: &str) -> bool {
    let value = value.trim().trim_end_matches('.');
    if value.is_empty() || value.len() > 253 {
        return false;
    }
    if value.parse::<IpAddr>().is_ok() {
        return true;
    }

    value.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    })
}

/// x25519 public keys are 32 bytes, written as 43+ base64 characters.
pub fn check_public_key(value: &str) -> Result<(), String> {
    let value = value.trim();
    if value.len() < MIN_PUBLIC_KEY_LEN {
        return Err(format!(
            "{} characters, need at least {}",
            value.len(),
            MIN_PUBLIC_KEY_LEN
        ));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '+' | '/' | '='))
    {
        return Err("contains characters outside the base64 alphabet".to_string());
    }
    Ok(())
}

/// Short ids are even-length hex, at most 8 bytes. Empty is allowed.
pub fn check_short_id(value: &str) -> Result<(), String> {
    if value.len() > MAX_SHORT_ID_LEN {
        return Err(format!(
            "{} characters, at most {} allowed",
            value.len(),
            MAX_SHORT_ID_LEN
        ));
    }
    if !value.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err("must be hexadecimal".to_string());
    }
    if !value.len().is_multiple_of(2) {
        return Err("must have an even number of hex digits".to_string());
    }
    Ok(())
}

pub fn is_known_fingerprint(value: &str) -> bool {
    FINGERPRINT_ALLOW_LIST.contains(&value.trim().to_ascii_lowercase().as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{ProtocolSettings, TrojanParams};

    #[test]
    fn test_report_warnings_do_not_fail() {
        let mut report = ValidationReport::new();
        report.recommend("sni", None);
        assert!(report.is_valid());
        assert_eq!(report.warnings().count(), 1);
        assert!(report.into_result().is_ok());
    }

    #[test]
    fn test_report_into_result_keeps_only_errors() {
        let mut report = ValidationReport::new();
        report.recommend("sni", Some(""));
        report.require("password", "  ");
        let err = report.into_result().unwrap_err();
        match err {
            CodecError::ValidationFailure { issues } => {
                assert_eq!(issues, vec![ValidationIssue::MissingField { field: "password" }]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_check_endpoint_rejects_port_zero() {
        let mut record = ServerRecord::new(
            "x",
            "example.com",
            443,
            ProtocolSettings::Trojan(TrojanParams::new("pw")),
        );
        record.port = 0;
        let mut report = ValidationReport::new();
        report.check_endpoint(&record);
        assert!(!report.is_valid());
    }

    #[test]
    fn test_check_uuid() {
        let mut report = ValidationReport::new();
        report.check_uuid("uuid", "b831381d-6324-4d53-ad4f-8cda48b30811");
        assert!(report.is_valid());

        report.check_uuid("uuid", "not-a-uuid");
        assert!(!report.is_valid());
    }

    #[test]
    fn test_is_valid_hostname() {
        assert!(is_valid_hostname("www.example.com"));
        assert!(is_valid_hostname("1.1.1.1"));
        assert!(is_valid_hostname("2001:db8::1"));
        assert!(!is_valid_hostname(""));
        assert!(!is_valid_hostname("bad host"));
        assert!(!is_valid_hostname("-lead.example.com"));
    }

    #[test]
    fn test_check_public_key() {
        assert!(check_public_key("abcdefghij").is_err());
        assert!(check_public_key("jNXHt1yRo0vDuchQlIP6Z0ZvjT3KtzVI-T4E7RoLJS0").is_ok());
        assert!(check_public_key("jNXHt1yRo0vDuchQlIP6Z0ZvjT3KtzVI T4E7RoLJS0!").is_err());
    }

    #[test]
    fn test_check_short_id() {
        assert!(check_short_id("").is_ok());
        assert!(check_short_id("6ba85179e30d4fc2").is_ok());
        assert!(check_short_id("6ba85179e30d4fc2aa").is_err());
        assert!(check_short_id("zz").is_err());
        assert!(check_short_id("abc").is_err());
    }

    #[test]
    fn test_is_known_fingerprint() {
        assert!(is_known_fingerprint("chrome"));
        assert!(is_known_fingerprint("Firefox"));
        assert!(!is_known_fingerprint("netscape"));
    }
}

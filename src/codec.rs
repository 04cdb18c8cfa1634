//! Protocol codecs
//!
//! This module provides functionality for:
//! - Parsing share links (vmess://, vless://, trojan://, ss://, hysteria://,
//!   reality://, xhttp://) into normalized [`ServerRecord`]s
//! - Validating records before they are used
//! - Generating the outbound document for the tunneling engine
//! - Serializing records back into canonical share links
//!
//! Codecs are stateless unit structs; the [`CodecRegistry`] maps the closed
//! [`Protocol`] set onto them with an exhaustive match.

pub mod base64;
pub mod detection;
pub mod error;
pub mod protocols;
pub mod registry;
pub mod validation;

pub use error::CodecError;
pub use protocols::{
    HysteriaCodec, RealityCodec, ShadowsocksCodec, TrojanCodec, VLessCodec, VMessCodec,
    XHttpCodec,
};
pub use registry::CodecRegistry;
pub use validation::{ValidationIssue, ValidationReport};

use tracing::warn;

use crate::config::OutboundDocument;
use crate::config::outbound::OutboundConfig;
use crate::record::{Protocol, ServerRecord};

// ============================================================================
// Protocol Codec Trait
// ============================================================================

/// Uniform contract every protocol implements
pub trait ProtocolCodec: Send + Sync {
    /// The protocol this codec handles
    fn protocol(&self) -> Protocol;

    /// URI scheme of the share link
    fn scheme(&self) -> &'static str {
        self.protocol().scheme()
    }

    /// Checks if this codec can handle the given link
    fn can_parse(&self, uri: &str) -> bool {
        has_scheme(uri, self.scheme())
    }

    /// Parses a share link into a record
    fn parse(&self, uri: &str) -> Result<ServerRecord, CodecError>;

    /// Structural checks; warnings for recommended fields
    fn validate(&self, record: &ServerRecord) -> ValidationReport;

    /// Builds the proxy entry of the outbound document
    fn build_outbound(&self, record: &ServerRecord) -> Result<OutboundConfig, CodecError>;

    /// Serializes a record back into a share link, omitting defaults
    fn generate_url(&self, record: &ServerRecord) -> Result<String, CodecError>;

    /// Generates the outbound document. Never fails: an internal error
    /// degrades to a skeleton proxy entry carrying only the protocol.
    fn generate_config(&self, record: &ServerRecord) -> OutboundDocument {
        let proxy = match self.build_outbound(record) {
            Ok(proxy) => proxy,
            Err(e) => {
                warn!(
                    server = %record.name,
                    protocol = %self.protocol(),
                    error = %e,
                    "Outbound generation failed, emitting skeleton"
                );
                OutboundConfig::skeleton(self.protocol())
            }
        };
        OutboundDocument::with_proxy(proxy)
    }
}

/// Case-insensitive `scheme://` prefix check
pub fn has_scheme(uri: &str, scheme: &str) -> bool {
    let uri = uri.trim_start();
    uri.len() > scheme.len() + 3
        && uri.is_char_boundary(scheme.len())
        && uri[..scheme.len()].eq_ignore_ascii_case(scheme)
        && uri[scheme.len()..].starts_with("://")
}

/// Extracts the scheme from a link
pub fn extract_scheme(uri: &str) -> Result<&str, CodecError> {
    let uri = uri.trim();
    let (scheme, _) = uri
        .split_once("://")
        .ok_or_else(|| CodecError::malformed("missing scheme separator ://"))?;
    if scheme.is_empty() {
        return Err(CodecError::malformed("missing scheme"));
    }
    Ok(scheme)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_scheme() {
        assert!(has_scheme("vless://abc", "vless"));
        assert!(has_scheme("VLESS://abc", "vless"));
        assert!(!has_scheme("vmess://abc", "vless"));
        assert!(!has_scheme("vless:/abc", "vless"));
        assert!(!has_scheme("ss", "ss"));
    }

    #[test]
    fn test_extract_scheme_valid() {
        assert_eq!(extract_scheme("ss://abc").unwrap(), "ss");
        assert_eq!(extract_scheme("  reality://xyz").unwrap(), "reality");
    }

    #[test]
    fn test_extract_scheme_invalid() {
        assert!(extract_scheme("not-a-uri").is_err());
        assert!(extract_scheme("://missing").is_err());
        assert!(extract_scheme("").is_err());
    }
}

//! Codec registry
//!
//! Maps the closed [`Protocol`] set onto the stateless codecs with an
//! exhaustive match, so there is no unhandled-protocol path at runtime.

use std::collections::BTreeSet;

use tracing::{debug, warn};

use crate::config::OutboundDocument;
use crate::record::{Protocol, ServerRecord};

use super::protocols::{
    HysteriaCodec, RealityCodec, ShadowsocksCodec, TrojanCodec, VLessCodec, VMessCodec,
    XHttpCodec,
};
use super::{CodecError, ProtocolCodec, ValidationReport, extract_scheme};

// ============================================================================
// Codec Registry
// ============================================================================

#[derive(Debug, Default, Clone, Copy)]
pub struct CodecRegistry;

impl CodecRegistry {
    pub fn new() -> Self {
        Self
    }

    /// The codec for a protocol
    pub fn codec(&self, protocol: Protocol) -> &'static dyn ProtocolCodec {
        match protocol {
            Protocol::VMess => &VMessCodec,
            Protocol::VLess => &VLessCodec,
            Protocol::Trojan => &TrojanCodec,
            Protocol::Shadowsocks => &ShadowsocksCodec,
            Protocol::Hysteria => &HysteriaCodec,
            Protocol::Reality => &RealityCodec,
            Protocol::XHttp => &XHttpCodec,
        }
    }

    /// Case-insensitive lookup by protocol identifier or URI scheme
    pub fn lookup(&self, identifier: &str) -> Result<&'static dyn ProtocolCodec, CodecError> {
        identifier
            .parse::<Protocol>()
            .map(|protocol| self.codec(protocol))
    }

    pub fn supported_protocols(&self) -> BTreeSet<Protocol> {
        Protocol::all()
    }

    /// Selects the codec for a share link by its scheme. A `vless://` link
    /// with `security=reality` goes to the REALITY codec.
    pub fn codec_for_link(&self, link: &str) -> Result<&'static dyn ProtocolCodec, CodecError> {
        let scheme = extract_scheme(link)?;
        let codec = self.lookup(scheme)?;
        if codec.protocol() == Protocol::VLess && RealityCodec.can_parse(link) {
            return Ok(&RealityCodec);
        }
        Ok(codec)
    }

    /// Parses one share link
    pub fn parse_link(&self, link: &str) -> Result<ServerRecord, CodecError> {
        let link = link.trim();
        let codec = self.codec_for_link(link)?;
        debug!("Parsing link with {} codec", codec.protocol());

        let result = codec.parse(link);
        match &result {
            Ok(record) => debug!(
                "Successfully parsed {} link -> server '{}'",
                codec.protocol(),
                record.name
            ),
            Err(e) => debug!("Failed to parse {} link: {}", codec.protocol(), e),
        }
        result
    }

    /// Parses links one per line, skipping blank and `#` lines
    pub fn parse_links(&self, content: &str) -> Vec<Result<ServerRecord, CodecError>> {
        let lines: Vec<&str> = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .collect();

        debug!("Parsing {} link lines from content", lines.len());
        lines.into_iter().map(|line| self.parse_link(line)).collect()
    }

    pub fn validate(&self, record: &ServerRecord) -> ValidationReport {
        self.codec(record.protocol()).validate(record)
    }

    /// Validates, then generates the outbound document. Hard-failing records
    /// are refused.
    pub fn generate_config(&self, record: &ServerRecord) -> Result<OutboundDocument, CodecError> {
        let codec = self.codec(record.protocol());
        let report = codec.validate(record);
        if !report.is_valid() {
            report.log_issues(record);
        }
        let warnings = report.into_result()?;
        for warning in &warnings {
            warn!(server = %record.name, "{}", warning);
        }
        Ok(codec.generate_config(record))
    }

    pub fn generate_url(&self, record: &ServerRecord) -> Result<String, CodecError> {
        self.codec(record.protocol()).generate_url(record)
    }
}

//! Outbound document
//!
//! The document handed to the external tunneling engine: the proxy entry
//! generated from a server record, always accompanied by a `direct`
//! passthrough entry and a `block` entry so routing rules can reference all
//! three tags.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::outbound::OutboundConfig;

pub mod outbound;
pub mod util;

pub const PROXY_TAG: &str = "proxy";
pub const DIRECT_TAG: &str = "direct";
pub const BLOCK_TAG: &str = "block";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OutboundDocument {
    pub outbounds: Vec<OutboundConfig>,
}

impl OutboundDocument {
    /// Wraps a proxy entry with its `direct` and `block` siblings
    pub fn with_proxy(mut proxy: OutboundConfig) -> Self {
        proxy.tag = PROXY_TAG.to_string();
        Self {
            outbounds: vec![proxy, OutboundConfig::direct(), OutboundConfig::block()],
        }
    }

    pub fn find(&self, tag: &str) -> Option<&OutboundConfig> {
        self.outbounds.iter().find(|o| o.tag == tag)
    }

    pub fn proxy(&self) -> Option<&OutboundConfig> {
        self.find(PROXY_TAG)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize outbound document")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Protocol;

    #[test]
    fn test_with_proxy_has_three_tags() {
        let doc = OutboundDocument::with_proxy(OutboundConfig::skeleton(Protocol::Trojan));
        let tags: Vec<&str> = doc.outbounds.iter().map(|o| o.tag.as_str()).collect();
        assert_eq!(tags, vec!["proxy", "direct", "block"]);
        assert_eq!(doc.proxy().unwrap().protocol, "trojan");
    }

    #[test]
    fn test_with_proxy_forces_tag() {
        let mut entry = OutboundConfig::skeleton(Protocol::VMess);
        entry.tag = "other".to_string();
        let doc = OutboundDocument::with_proxy(entry);
        assert!(doc.find("other").is_none());
        assert!(doc.proxy().is_some());
    }

    #[test]
    fn test_to_json_pretty() {
        let doc = OutboundDocument::with_proxy(OutboundConfig::skeleton(Protocol::XHttp));
        let json = doc.to_json_pretty().unwrap();
        assert!(json.contains("\"outbounds\""));
        assert!(json.contains("\"xhttp\""));
    }
}

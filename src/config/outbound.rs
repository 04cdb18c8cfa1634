use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::util::{is_false, string_or_vec};
use crate::config::{BLOCK_TAG, DIRECT_TAG, PROXY_TAG};
use crate::record::Protocol;

// ============================================================================
// Outbound Entry
// ============================================================================

/// One entry of the outbound document handed to the tunneling engine
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OutboundConfig {
    /// Routing tag (`proxy`, `direct` or `block`)
    pub tag: String,

    /// Protocol name; for the proxy entry this is the codec identifier
    pub protocol: String,

    /// Connection settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<OutboundSettings>,

    /// Transport and security layer
    #[serde(
        default,
        rename = "streamSettings",
        skip_serializing_if = "Option::is_none"
    )]
    pub stream_settings: Option<StreamSettings>,

    /// Multiplex settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mux: Option<MuxSettings>,
}

impl OutboundConfig {
    /// Proxy entry with no settings at all, used when generation fails
    pub fn skeleton(protocol: Protocol) -> Self {
        Self::proxy(protocol, None)
    }

    pub fn proxy(protocol: Protocol, settings: Option<OutboundSettings>) -> Self {
        Self {
            tag: PROXY_TAG.to_string(),
            protocol: protocol.as_str().to_string(),
            settings,
            stream_settings: None,
            mux: None,
        }
    }

    /// Passthrough sibling
    pub fn direct() -> Self {
        Self {
            tag: DIRECT_TAG.to_string(),
            protocol: "freedom".to_string(),
            settings: None,
            stream_settings: None,
            mux: None,
        }
    }

    /// Deny sibling
    pub fn block() -> Self {
        Self {
            tag: BLOCK_TAG.to_string(),
            protocol: "blackhole".to_string(),
            settings: Some(OutboundSettings::Blackhole(BlackholeSettings {
                response: BlackholeResponse {
                    response_type: "none".to_string(),
                },
            })),
            stream_settings: None,
            mux: None,
        }
    }

    pub fn with_stream(mut self, stream: StreamSettings) -> Self {
        self.stream_settings = Some(stream);
        self
    }

    pub fn with_mux(mut self, mux: Option<MuxSettings>) -> Self {
        self.mux = mux;
        self
    }
}

// ============================================================================
// Connection Settings
// ============================================================================

/// Connection settings, shaped by protocol family
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum OutboundSettings {
    /// VMess, VLESS, REALITY and XHTTP
    VNext(VNextSettings),
    /// Trojan and Shadowsocks
    Servers(ServersSettings),
    Hysteria(HysteriaSettings),
    Blackhole(BlackholeSettings),
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct VNextSettings {
    pub vnext: Vec<VNextServer>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct VNextServer {
    pub address: String,
    pub port: u16,
    pub users: Vec<VNextUser>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct VNextUser {
    pub id: String,

    /// VMess only
    #[serde(default, rename = "alterId", skip_serializing_if = "Option::is_none")]
    pub alter_id: Option<u16>,

    /// VMess body cipher
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<String>,

    /// VLESS encryption label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ServersSettings {
    pub servers: Vec<ServerEntry>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct ServerEntry {
    pub address: String,
    pub port: u16,
    pub password: String,

    /// Shadowsocks cipher
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    /// SIP003 plugin
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<String>,

    #[serde(
        default,
        rename = "pluginOpts",
        skip_serializing_if = "Option::is_none"
    )]
    pub plugin_opts: Option<String>,
}

/// Hysteria keeps its TLS-adjacent fields here instead of in a security layer
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct HysteriaSettings {
    pub address: String,
    pub port: u16,
    pub auth: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obfs: Option<String>,

    pub protocol: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub insecure: bool,

    #[serde(
        default,
        deserialize_with = "string_or_vec",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub alpn: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct BlackholeSettings {
    pub response: BlackholeResponse,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct BlackholeResponse {
    #[serde(rename = "type")]
    pub response_type: String,
}

// ============================================================================
// Stream Settings
// ============================================================================

/// Transport plus security layer
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct StreamSettings {
    pub network: String,
    pub security: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_settings: Option<TlsSettings>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reality_settings: Option<RealitySettings>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_settings: Option<TcpSettings>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ws_settings: Option<WsSettings>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grpc_settings: Option<GrpcSettings>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_settings: Option<HttpSettings>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quic_settings: Option<QuicSettings>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub httpupgrade_settings: Option<HttpUpgradeSettings>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xhttp_settings: Option<XHttpSettings>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hysteria_settings: Option<HysteriaStreamSettings>,
}

impl StreamSettings {
    pub fn new(network: impl Into<String>, security: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            security: security.into(),
            ..Default::default()
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TlsSettings {
    pub server_name: String,

    #[serde(default, skip_serializing_if = "is_false")]
    pub allow_insecure: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alpn: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RealitySettings {
    pub server_name: String,
    pub fingerprint: String,
    pub public_key: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub short_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spider_x: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TcpSettings {
    pub header: TcpHeader,
}

/// TCP camouflage header
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TcpHeader {
    #[serde(rename = "type")]
    pub header_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<TcpHeaderRequest>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct TcpHeaderRequest {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, Vec<String>>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct WsSettings {
    pub path: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct GrpcSettings {
    pub service_name: String,

    #[serde(default, skip_serializing_if = "is_false")]
    pub multi_mode: bool,
}

/// HTTP/2 transport
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct HttpSettings {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub host: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct QuicSettings {
    pub header: QuicHeader,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct QuicHeader {
    #[serde(rename = "type")]
    pub header_type: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct HttpUpgradeSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct XHttpSettings {
    pub path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    pub mode: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

/// Hysteria bandwidth caps in Mbps
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct HysteriaStreamSettings {
    pub up_mbps: u32,
    pub down_mbps: u32,
}

// ============================================================================
// Multiplex
// ============================================================================

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct MuxSettings {
    pub enabled: bool,
    pub concurrency: u16,
}

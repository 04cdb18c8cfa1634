//! Normalized server records
//!
//! A [`ServerRecord`] is what every share link, subscription entry or manual
//! form is normalized into: shared identity and connectivity fields plus a
//! protocol-tagged payload ([`ProtocolSettings`]) holding only the fields that
//! protocol actually uses.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::codec::CodecError;
use crate::config::util::{is_false, string_or_vec};
use crate::probe::Latency;

// ============================================================================
// Protocol Defaults
// ============================================================================

/// Flow label a VLESS or REALITY link gets when it does not name one
pub const DEFAULT_VLESS_FLOW: &str = "xtls-rprx-vision";

/// The only encryption label VLESS accepts
pub const DEFAULT_VLESS_ENCRYPTION: &str = "none";

/// VMess body cipher when the link does not name one
pub const DEFAULT_VMESS_CIPHER: &str = "auto";

/// TLS fingerprint impersonated when none (or no valid one) is given
pub const DEFAULT_FINGERPRINT: &str = "chrome";

/// TLS fingerprint labels the tunneling engine knows how to impersonate
pub const FINGERPRINT_ALLOW_LIST: &[&str] = &[
    "chrome",
    "firefox",
    "safari",
    "ios",
    "android",
    "edge",
    "360",
    "qq",
    "random",
    "randomized",
];

pub const DEFAULT_MUX_CONCURRENCY: u16 = 8;

pub const DEFAULT_HYSTERIA_UP_MBPS: u32 = 10;
pub const DEFAULT_HYSTERIA_DOWN_MBPS: u32 = 50;
pub const DEFAULT_HYSTERIA_PROTOCOL: &str = "udp";
pub const DEFAULT_HYSTERIA_ALPN: &str = "hysteria";

pub const DEFAULT_XHTTP_PATH: &str = "/";
pub const DEFAULT_XHTTP_MODE: &str = "auto";

// ============================================================================
// Protocol
// ============================================================================

/// The closed set of supported proxy protocols
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    VMess,
    VLess,
    Trojan,
    Shadowsocks,
    Hysteria,
    Reality,
    XHttp,
}

impl Protocol {
    /// Every protocol, in registry order
    pub const ALL: [Protocol; 7] = [
        Protocol::VMess,
        Protocol::VLess,
        Protocol::Trojan,
        Protocol::Shadowsocks,
        Protocol::Hysteria,
        Protocol::Reality,
        Protocol::XHttp,
    ];

    /// Identifier used in records and as the outbound protocol name
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::VMess => "vmess",
            Protocol::VLess => "vless",
            Protocol::Trojan => "trojan",
            Protocol::Shadowsocks => "shadowsocks",
            Protocol::Hysteria => "hysteria",
            Protocol::Reality => "reality",
            Protocol::XHttp => "xhttp",
        }
    }

    /// URI scheme of the share link
    pub fn scheme(self) -> &'static str {
        match self {
            Protocol::Shadowsocks => "ss",
            other => other.as_str(),
        }
    }

    pub fn all() -> BTreeSet<Protocol> {
        Self::ALL.into_iter().collect()
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = CodecError;

    /// Accepts the identifier or the URI scheme, case-insensitively
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        Protocol::ALL
            .into_iter()
            .find(|p| p.as_str() == lowered || p.scheme() == lowered)
            .ok_or_else(|| CodecError::UnsupportedProtocol {
                identifier: s.to_string(),
            })
    }
}

// ============================================================================
// Transport / Security Enums
// ============================================================================

/// Transport carrying the proxied stream
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Tcp,
    Ws,
    Grpc,
    /// HTTP/2
    Http,
    Quic,
    HttpUpgrade,
}

impl Network {
    pub fn as_str(self) -> &'static str {
        match self {
            Network::Tcp => "tcp",
            Network::Ws => "ws",
            Network::Grpc => "grpc",
            Network::Http => "http",
            Network::Quic => "quic",
            Network::HttpUpgrade => "httpupgrade",
        }
    }

    /// Maps the `type` query value (and its common aliases) to a network
    pub fn from_param(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "tcp" | "raw" => Some(Network::Tcp),
            "ws" | "websocket" => Some(Network::Ws),
            "grpc" | "gun" => Some(Network::Grpc),
            "http" | "h2" | "http2" => Some(Network::Http),
            "quic" => Some(Network::Quic),
            "httpupgrade" => Some(Network::HttpUpgrade),
            _ => None,
        }
    }
}

/// Security layer wrapped around the transport
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Security {
    #[default]
    None,
    Tls,
    Reality,
}

impl Security {
    pub fn as_str(self) -> &'static str {
        match self {
            Security::None => "none",
            Security::Tls => "tls",
            Security::Reality => "reality",
        }
    }

    pub fn from_param(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Some(Security::None),
            "tls" | "xtls" => Some(Security::Tls),
            "reality" => Some(Security::Reality),
            _ => None,
        }
    }
}

// ============================================================================
// Shared Parameter Groups
// ============================================================================

/// Transport parameters shared by the V2Ray-family protocols
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct TransportParams {
    #[serde(default)]
    pub network: Network,

    /// TCP camouflage (`http`) or QUIC packet header type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Host header
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,

    /// gRPC mode (`gun` or `multi`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grpc_mode: Option<String>,

    /// Extra request headers
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

/// TLS parameters
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct TlsParams {
    #[serde(default)]
    pub security: Security,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sni: Option<String>,

    #[serde(
        default,
        deserialize_with = "string_or_vec",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub alpn: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub allow_insecure: bool,
}

impl TlsParams {
    pub fn with_security(security: Security) -> Self {
        Self {
            security,
            ..Default::default()
        }
    }
}

/// Connection multiplexing
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct MuxParams {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_mux_concurrency")]
    pub concurrency: u16,
}

impl Default for MuxParams {
    fn default() -> Self {
        Self {
            enabled: false,
            concurrency: DEFAULT_MUX_CONCURRENCY,
        }
    }
}

fn default_mux_concurrency() -> u16 {
    DEFAULT_MUX_CONCURRENCY
}

// ============================================================================
// Per-Protocol Payloads
// ============================================================================

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct VMessParams {
    pub uuid: String,
    #[serde(default)]
    pub alter_id: u16,
    #[serde(default = "default_vmess_cipher")]
    pub cipher: String,
    #[serde(default)]
    pub transport: TransportParams,
    #[serde(default)]
    pub tls: TlsParams,
    #[serde(default)]
    pub mux: MuxParams,
}

impl VMessParams {
    pub fn new(uuid: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            alter_id: 0,
            cipher: DEFAULT_VMESS_CIPHER.to_string(),
            transport: TransportParams::default(),
            tls: TlsParams::default(),
            mux: MuxParams::default(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct VLessParams {
    pub uuid: String,
    /// Empty means "no flow"
    #[serde(default = "default_vless_flow")]
    pub flow: String,
    #[serde(default = "default_vless_encryption")]
    pub encryption: String,
    #[serde(default)]
    pub transport: TransportParams,
    #[serde(default)]
    pub tls: TlsParams,
    #[serde(default)]
    pub mux: MuxParams,
}

impl VLessParams {
    pub fn new(uuid: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            flow: DEFAULT_VLESS_FLOW.to_string(),
            encryption: DEFAULT_VLESS_ENCRYPTION.to_string(),
            transport: TransportParams::default(),
            tls: TlsParams::default(),
            mux: MuxParams::default(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TrojanParams {
    pub password: String,
    #[serde(default)]
    pub transport: TransportParams,
    #[serde(default)]
    pub tls: TlsParams,
    #[serde(default)]
    pub mux: MuxParams,
}

impl TrojanParams {
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: password.into(),
            transport: TransportParams::default(),
            tls: TlsParams::with_security(Security::Tls),
            mux: MuxParams::default(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ShadowsocksParams {
    pub method: String,
    pub password: String,
    /// SIP003 plugin name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_opts: Option<String>,
    #[serde(default)]
    pub mux: MuxParams,
}

impl ShadowsocksParams {
    pub fn new(method: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            password: password.into(),
            plugin: None,
            plugin_opts: None,
            mux: MuxParams::default(),
        }
    }
}

/// Hysteria (v1) keeps its TLS-adjacent fields inline rather than in a
/// separate security layer
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct HysteriaParams {
    #[serde(default)]
    pub auth: String,
    #[serde(default = "default_hysteria_up")]
    pub up_mbps: u32,
    #[serde(default = "default_hysteria_down")]
    pub down_mbps: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obfs: Option<String>,
    /// `udp`, `wechat-video` or `faketcp`
    #[serde(default = "default_hysteria_protocol")]
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sni: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub allow_insecure: bool,
    #[serde(default = "default_hysteria_alpn", deserialize_with = "string_or_vec")]
    pub alpn: Vec<String>,
}

impl HysteriaParams {
    pub fn new(auth: impl Into<String>) -> Self {
        Self {
            auth: auth.into(),
            up_mbps: DEFAULT_HYSTERIA_UP_MBPS,
            down_mbps: DEFAULT_HYSTERIA_DOWN_MBPS,
            obfs: None,
            protocol: DEFAULT_HYSTERIA_PROTOCOL.to_string(),
            sni: None,
            allow_insecure: false,
            alpn: default_hysteria_alpn(),
        }
    }
}

/// VLESS over a REALITY security layer
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RealityParams {
    pub uuid: String,
    #[serde(default = "default_vless_flow")]
    pub flow: String,
    /// Server x25519 public key (base64url)
    #[serde(default)]
    pub public_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_id: Option<String>,
    /// Server name presented in the impersonated handshake
    #[serde(default)]
    pub sni: String,
    #[serde(default = "default_fingerprint")]
    pub fingerprint: String,
    /// Initial path the spider visits when verification fails
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spider_x: Option<String>,
    #[serde(default)]
    pub transport: TransportParams,
    #[serde(default)]
    pub mux: MuxParams,
}

impl RealityParams {
    pub fn new(
        uuid: impl Into<String>,
        public_key: impl Into<String>,
        sni: impl Into<String>,
    ) -> Self {
        Self {
            uuid: uuid.into(),
            flow: DEFAULT_VLESS_FLOW.to_string(),
            public_key: public_key.into(),
            short_id: None,
            sni: sni.into(),
            fingerprint: DEFAULT_FINGERPRINT.to_string(),
            spider_x: None,
            transport: TransportParams::default(),
            mux: MuxParams::default(),
        }
    }
}

/// VLESS over XHTTP, disguised as ordinary HTTP traffic
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct XHttpParams {
    pub uuid: String,
    #[serde(default = "default_xhttp_path")]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default = "default_xhttp_mode")]
    pub mode: String,
    #[serde(default = "default_xhttp_tls")]
    pub tls: TlsParams,
    #[serde(default)]
    pub mux: MuxParams,
}

impl XHttpParams {
    pub fn new(uuid: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            path: DEFAULT_XHTTP_PATH.to_string(),
            host: None,
            headers: BTreeMap::new(),
            mode: DEFAULT_XHTTP_MODE.to_string(),
            tls: default_xhttp_tls(),
            mux: MuxParams::default(),
        }
    }
}

fn default_vmess_cipher() -> String {
    DEFAULT_VMESS_CIPHER.to_string()
}

fn default_vless_flow() -> String {
    DEFAULT_VLESS_FLOW.to_string()
}

fn default_vless_encryption() -> String {
    DEFAULT_VLESS_ENCRYPTION.to_string()
}

fn default_fingerprint() -> String {
    DEFAULT_FINGERPRINT.to_string()
}

fn default_hysteria_up() -> u32 {
    DEFAULT_HYSTERIA_UP_MBPS
}

fn default_hysteria_down() -> u32 {
    DEFAULT_HYSTERIA_DOWN_MBPS
}

fn default_hysteria_protocol() -> String {
    DEFAULT_HYSTERIA_PROTOCOL.to_string()
}

fn default_hysteria_alpn() -> Vec<String> {
    vec![DEFAULT_HYSTERIA_ALPN.to_string()]
}

fn default_xhttp_path() -> String {
    DEFAULT_XHTTP_PATH.to_string()
}

fn default_xhttp_mode() -> String {
    DEFAULT_XHTTP_MODE.to_string()
}

fn default_xhttp_tls() -> TlsParams {
    TlsParams::with_security(Security::Tls)
}

// ============================================================================
// Protocol Settings
// ============================================================================

/// Protocol-tagged payload of a record
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolSettings {
    VMess(VMessParams),
    VLess(VLessParams),
    Trojan(TrojanParams),
    Shadowsocks(ShadowsocksParams),
    Hysteria(HysteriaParams),
    Reality(RealityParams),
    XHttp(XHttpParams),
}

impl ProtocolSettings {
    pub fn protocol(&self) -> Protocol {
        match self {
            ProtocolSettings::VMess(_) => Protocol::VMess,
            ProtocolSettings::VLess(_) => Protocol::VLess,
            ProtocolSettings::Trojan(_) => Protocol::Trojan,
            ProtocolSettings::Shadowsocks(_) => Protocol::Shadowsocks,
            ProtocolSettings::Hysteria(_) => Protocol::Hysteria,
            ProtocolSettings::Reality(_) => Protocol::Reality,
            ProtocolSettings::XHttp(_) => Protocol::XHttp,
        }
    }

    /// The secret identifying the user to the server (UUID, password or auth string)
    pub fn credential(&self) -> &str {
        match self {
            ProtocolSettings::VMess(p) => &p.uuid,
            ProtocolSettings::VLess(p) => &p.uuid,
            ProtocolSettings::Trojan(p) => &p.password,
            ProtocolSettings::Shadowsocks(p) => &p.password,
            ProtocolSettings::Hysteria(p) => &p.auth,
            ProtocolSettings::Reality(p) => &p.uuid,
            ProtocolSettings::XHttp(p) => &p.uuid,
        }
    }

    pub fn mux(&self) -> Option<&MuxParams> {
        match self {
            ProtocolSettings::VMess(p) => Some(&p.mux),
            ProtocolSettings::VLess(p) => Some(&p.mux),
            ProtocolSettings::Trojan(p) => Some(&p.mux),
            ProtocolSettings::Shadowsocks(p) => Some(&p.mux),
            ProtocolSettings::Reality(p) => Some(&p.mux),
            ProtocolSettings::XHttp(p) => Some(&p.mux),
            ProtocolSettings::Hysteria(_) => None,
        }
    }
}

// ============================================================================
// Server Record
// ============================================================================

/// One proxy endpoint
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ServerRecord {
    /// Durable id, derived from protocol, credential and endpoint
    pub id: String,

    /// Display name
    pub name: String,

    pub host: String,

    pub port: u16,

    /// Pinned by the user; always outranks non-pinned servers
    #[serde(default, skip_serializing_if = "is_false")]
    pub favorite: bool,

    /// Last measured latency
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency: Option<Latency>,

    /// Name of the subscription this record was imported from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription: Option<String>,

    pub settings: ProtocolSettings,
}

impl ServerRecord {
    /// Creates a record, deriving its id; an empty name becomes `host:port`
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        settings: ProtocolSettings,
    ) -> Self {
        let host = host.into();
        let id = Self::derive_id(&host, port, &settings);
        let mut name = name.into();
        if name.is_empty() {
            name = format!("{}:{}", bracket_host(&host), port);
        }

        Self {
            id,
            name,
            host,
            port,
            favorite: false,
            latency: None,
            subscription: None,
            settings,
        }
    }

    /// Deterministic UUIDv5 over the endpoint and every protocol setting.
    /// Links that differ only in transport, path or TLS fields get distinct
    /// ids; the display name does not take part.
    pub fn derive_id(host: &str, port: u16, settings: &ProtocolSettings) -> String {
        let mut key = format!("{}:{}#", host.to_ascii_lowercase(), port).into_bytes();
        // Settings hold only ordered maps and sets, so the JSON is canonical
        if let Err(e) = serde_json::to_writer(&mut key, settings) {
            tracing::warn!("Cannot serialize settings for id: {}", e);
            key.extend_from_slice(settings.credential().as_bytes());
        }
        Uuid::new_v5(&Uuid::NAMESPACE_URL, &key).to_string()
    }

    pub fn protocol(&self) -> Protocol {
        self.settings.protocol()
    }

    pub fn credential(&self) -> &str {
        self.settings.credential()
    }

    /// `host:port`, with IPv6 hosts bracketed
    pub fn endpoint(&self) -> String {
        format!("{}:{}", bracket_host(&self.host), self.port)
    }

    pub fn with_favorite(mut self, favorite: bool) -> Self {
        self.favorite = favorite;
        self
    }

    pub fn with_subscription(mut self, subscription: impl Into<String>) -> Self {
        self.subscription = Some(subscription.into());
        self
    }
}

/// Wraps IPv6 literals in brackets for use in `host:port` strings
pub fn bracket_host(host: &str) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]", host)
    } else {
        host.to_string()
    }
}

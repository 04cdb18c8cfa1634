//! Protocol codecs
//!
//! This module contains the seven codecs plus the link and stream-settings
//! helpers they share. V2Ray-family protocols (VMess, VLESS, Trojan, REALITY)
//! carry the same transport and TLS query keys, so those are read and written
//! in one place.

mod hysteria;
mod reality;
mod shadowsocks;
mod trojan;
mod vless;
mod vmess;
mod xhttp;

pub use hysteria::HysteriaCodec;
pub use reality::RealityCodec;
pub use shadowsocks::ShadowsocksCodec;
pub use trojan::TrojanCodec;
pub use vless::VLessCodec;
pub use vmess::VMessCodec;
pub use xhttp::XHttpCodec;

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;

use tracing::debug;
use url::{Host, Url};

use crate::config::outbound::{
    GrpcSettings, HttpSettings, HttpUpgradeSettings, MuxSettings, OutboundSettings, QuicHeader,
    QuicSettings, StreamSettings, TcpHeader, TcpHeaderRequest, TcpSettings, TlsSettings,
    VNextServer, VNextSettings, VNextUser, WsSettings,
};
use crate::record::{
    DEFAULT_MUX_CONCURRENCY, MuxParams, Network, Protocol, Security, ServerRecord, TlsParams,
    TransportParams, bracket_host,
};

use super::base64::{decode_opportunistic, encode_if_ambiguous};
use super::validation::ValidationIssue;
use super::{CodecError, has_scheme};

// ============================================================================
// Query Parameters
// ============================================================================

/// Percent-decoded query parameters; the first occurrence of a key wins
#[derive(Debug, Clone, Default)]
pub struct QueryParams {
    pairs: HashMap<String, String>,
}

impl QueryParams {
    /// Parses a raw query string. `+` is kept literally since base64 values
    /// travel unescaped in many share links.
    pub fn parse(query: &str) -> Self {
        let mut pairs = HashMap::new();
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            pairs
                .entry(percent_decode(key))
                .or_insert_with(|| percent_decode(value));
        }
        Self { pairs }
    }

    /// Value of `key`, even when empty
    pub fn raw(&self, key: &str) -> Option<&str> {
        self.pairs.get(key).map(String::as_str)
    }

    /// First non-empty value among `keys`
    pub fn first(&self, keys: &[&str]) -> Option<&str> {
        keys.iter()
            .filter_map(|k| self.raw(k))
            .find(|v| !v.trim().is_empty())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.first(&[key])
    }

    pub fn string(&self, key: &str) -> Option<String> {
        self.get(key).map(str::to_string)
    }

    pub fn flag(&self, keys: &[&str]) -> bool {
        self.first(keys).is_some_and(|v| {
            matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
    }

    /// Comma-separated list
    pub fn list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

pub(crate) fn percent_decode(s: &str) -> String {
    urlencoding::decode(s)
        .map(|c| c.into_owned())
        .unwrap_or_else(|_| s.to_string())
}

// ============================================================================
// Link Splitting
// ============================================================================

/// The positional parts of a `scheme://credential@host:port?query#name` link
#[derive(Debug)]
pub struct ParsedUri {
    /// Percent-decoded userinfo (`user` or `user:password`), possibly empty
    pub credential: String,
    /// Host without IPv6 brackets
    pub host: String,
    pub port: u16,
    pub params: QueryParams,
    /// Percent-decoded fragment, empty when absent
    pub name: String,
}

/// Splits a link, requiring the exact scheme plus a host and a port
pub fn split_uri(uri: &str, scheme: &str) -> Result<ParsedUri, CodecError> {
    let uri = uri.trim();
    if !has_scheme(uri, scheme) {
        return Err(CodecError::malformed(format!("expected a {scheme}:// link")));
    }

    let url = Url::parse(uri).map_err(|e| CodecError::malformed(e.to_string()))?;

    let host = match url.host() {
        Some(Host::Ipv6(addr)) => addr.to_string(),
        Some(Host::Ipv4(addr)) => addr.to_string(),
        // Hosts of non-special schemes stay percent-encoded
        Some(Host::Domain(domain)) => percent_decode(domain),
        None => String::new(),
    };
    if host.is_empty() {
        return Err(CodecError::malformed("missing host"));
    }
    if host
        .chars()
        .any(|c| c.is_whitespace() || c.is_control() || "@/?#:[]\\".contains(c))
    {
        return Err(CodecError::malformed(format!("invalid host: {host}")));
    }

    let port = url
        .port()
        .ok_or_else(|| CodecError::malformed("missing port"))?;
    if port == 0 {
        return Err(CodecError::malformed("port must be in 1..=65535"));
    }

    let mut credential = percent_decode(url.username());
    if let Some(password) = url.password() {
        credential.push(':');
        credential.push_str(&percent_decode(password));
    }

    Ok(ParsedUri {
        credential,
        host,
        port,
        params: url.query().map(QueryParams::parse).unwrap_or_default(),
        name: url.fragment().map(percent_decode).unwrap_or_default(),
    })
}

/// Parses `host:port`, handling IPv6 addresses in brackets
pub fn parse_host_port(hostport: &str) -> Result<(String, u16), CodecError> {
    let (host, port_str) = if let Some(rest) = hostport.strip_prefix('[') {
        let bracket_end = rest
            .find(']')
            .ok_or_else(|| CodecError::malformed("invalid IPv6 address: missing closing bracket"))?;
        let port_str = rest[bracket_end + 1..]
            .strip_prefix(':')
            .ok_or_else(|| CodecError::malformed("missing port after IPv6 address"))?;
        (&rest[..bracket_end], port_str)
    } else {
        hostport
            .rsplit_once(':')
            .ok_or_else(|| CodecError::malformed("missing port"))?
    };

    if host.is_empty() {
        return Err(CodecError::malformed("missing host"));
    }
    let port: u16 = port_str
        .parse()
        .map_err(|_| CodecError::malformed(format!("invalid port number: {port_str}")))?;
    if port == 0 {
        return Err(CodecError::malformed("port must be in 1..=65535"));
    }

    Ok((host.to_string(), port))
}

// ============================================================================
// Link Building
// ============================================================================

/// Assembles a share link, percent-encoding every component
#[derive(Debug)]
pub struct UriBuilder {
    scheme: String,
    userinfo: Option<String>,
    host: String,
    port: u16,
    slash_before_query: bool,
    params: Vec<(String, String)>,
    name: String,
}

impl UriBuilder {
    pub fn new(scheme: &str, record: &ServerRecord) -> Self {
        Self {
            scheme: scheme.to_string(),
            userinfo: None,
            host: record.host.clone(),
            port: record.port,
            slash_before_query: false,
            params: Vec::new(),
            name: record.name.clone(),
        }
    }

    pub fn credential(mut self, value: &str) -> Self {
        self.userinfo = Some(urlencoding::encode(value).into_owned());
        self
    }

    /// Userinfo that is already URL-safe
    pub fn raw_userinfo(mut self, value: String) -> Self {
        self.userinfo = Some(value);
        self
    }

    /// SIP002 style `host:port/?query`
    pub fn slash_before_query(mut self) -> Self {
        self.slash_before_query = true;
        self
    }

    pub fn param(&mut self, key: &str, value: impl Into<String>) {
        self.params.push((key.to_string(), value.into()));
    }

    pub fn param_opt(&mut self, key: &str, value: Option<&str>) {
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            self.param(key, value);
        }
    }

    pub fn param_unless(&mut self, key: &str, value: &str, default: &str) {
        if value != default {
            self.param(key, value);
        }
    }

    pub fn build(&self) -> String {
        let mut out = format!("{}://", self.scheme);
        if let Some(userinfo) = &self.userinfo {
            out.push_str(userinfo);
            out.push('@');
        }
        let _ = write!(out, "{}:{}", bracket_host(&self.host), self.port);

        if !self.params.is_empty() {
            if self.slash_before_query {
                out.push('/');
            }
            out.push('?');
            let query: Vec<String> = self
                .params
                .iter()
                .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
                .collect();
            out.push_str(&query.join("&"));
        }

        if !self.name.is_empty() {
            out.push('#');
            out.push_str(&urlencoding::encode(&self.name));
        }
        out
    }
}

// ============================================================================
// Shared Query Mappings
// ============================================================================

pub fn read_transport(params: &QueryParams) -> TransportParams {
    let network = match params.first(&["type", "net"]) {
        Some(value) => Network::from_param(value).unwrap_or_else(|| {
            debug!("Unknown network type '{}', falling back to tcp", value);
            Network::Tcp
        }),
        None => Network::Tcp,
    };

    TransportParams {
        network,
        header_type: params
            .get("headerType")
            .filter(|v| !v.eq_ignore_ascii_case("none"))
            .map(str::to_string),
        path: params.string("path"),
        host: params.string("host"),
        service_name: params.string("serviceName"),
        grpc_mode: params.string("mode"),
        headers: read_headers(params.get("headers")),
    }
}

pub fn write_transport(uri: &mut UriBuilder, transport: &TransportParams) {
    uri.param_unless("type", transport.network.as_str(), Network::Tcp.as_str());
    uri.param_opt("headerType", transport.header_type.as_deref());
    uri.param_opt("path", transport.path.as_deref());
    uri.param_opt("host", transport.host.as_deref());
    uri.param_opt("serviceName", transport.service_name.as_deref());
    uri.param_opt("mode", transport.grpc_mode.as_deref());
    write_headers(uri, &transport.headers);
}

/// Custom headers travel as a JSON object, optionally base64 encoded
pub fn read_headers(value: Option<&str>) -> BTreeMap<String, String> {
    let Some(value) = value else {
        return BTreeMap::new();
    };
    let decoded = decode_opportunistic(value);
    serde_json::from_str(&decoded).unwrap_or_else(|e| {
        debug!("Ignoring unparsable headers parameter: {}", e);
        BTreeMap::new()
    })
}

pub fn write_headers(uri: &mut UriBuilder, headers: &BTreeMap<String, String>) {
    if headers.is_empty() {
        return;
    }
    if let Ok(json) = serde_json::to_string(headers) {
        uri.param("headers", encode_if_ambiguous(&json));
    }
}

pub fn read_tls(params: &QueryParams, default_security: Security) -> TlsParams {
    let security = match params.raw("security") {
        Some(value) => Security::from_param(value).unwrap_or_else(|| {
            debug!("Unknown security '{}', using {}", value, default_security.as_str());
            default_security
        }),
        None => default_security,
    };

    TlsParams {
        security,
        sni: params.first(&["sni", "peer"]).map(str::to_string),
        alpn: params.list("alpn"),
        fingerprint: params.string("fp"),
        allow_insecure: params.flag(&["allowInsecure", "insecure"]),
    }
}

pub fn write_tls(uri: &mut UriBuilder, tls: &TlsParams, default_security: Security) {
    uri.param_unless("security", tls.security.as_str(), default_security.as_str());
    uri.param_opt("sni", tls.sni.as_deref());
    if !tls.alpn.is_empty() {
        uri.param("alpn", tls.alpn.join(","));
    }
    uri.param_opt("fp", tls.fingerprint.as_deref());
    if tls.allow_insecure {
        uri.param("allowInsecure", "1");
    }
}

pub fn read_mux(params: &QueryParams) -> MuxParams {
    MuxParams {
        enabled: params.flag(&["mux"]),
        concurrency: params
            .get("muxConcurrency")
            .and_then(|v| v.trim().parse().ok())
            .filter(|c: &u16| *c > 0)
            .unwrap_or(DEFAULT_MUX_CONCURRENCY),
    }
}

pub fn write_mux(uri: &mut UriBuilder, mux: &MuxParams) {
    if mux.enabled {
        uri.param("mux", "1");
    }
    if mux.concurrency != DEFAULT_MUX_CONCURRENCY {
        uri.param("muxConcurrency", mux.concurrency.to_string());
    }
}

/// `flow` as given: an explicit empty value means "no flow"
pub fn read_flow(params: &QueryParams, default: &str) -> String {
    params
        .raw("flow")
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| default.to_string())
}

pub fn write_flow(uri: &mut UriBuilder, flow: &str, default: &str) {
    if flow != default {
        uri.param("flow", flow);
    }
}

// ============================================================================
// Stream Settings Builders
// ============================================================================

/// Network-specific part of the stream settings
pub fn network_stream(transport: &TransportParams, security: Security) -> StreamSettings {
    let mut stream = StreamSettings::new(transport.network.as_str(), security.as_str());
    let path = transport.path.clone();

    match transport.network {
        Network::Tcp => {
            if transport.header_type.as_deref() == Some("http") {
                let mut headers: BTreeMap<String, Vec<String>> = BTreeMap::new();
                if let Some(host) = &transport.host {
                    headers.insert("Host".to_string(), split_list(host));
                }
                for (key, value) in &transport.headers {
                    headers
                        .entry(key.clone())
                        .or_insert_with(|| vec![value.clone()]);
                }
                stream.tcp_settings = Some(TcpSettings {
                    header: TcpHeader {
                        header_type: "http".to_string(),
                        request: Some(TcpHeaderRequest {
                            path: vec![path.unwrap_or_else(|| "/".to_string())],
                            headers,
                        }),
                    },
                });
            }
        }
        Network::Ws => {
            let mut headers = transport.headers.clone();
            if let Some(host) = &transport.host {
                headers.insert("Host".to_string(), host.clone());
            }
            stream.ws_settings = Some(WsSettings {
                path: path.unwrap_or_else(|| "/".to_string()),
                headers,
            });
        }
        Network::Grpc => {
            stream.grpc_settings = Some(GrpcSettings {
                service_name: transport
                    .service_name
                    .clone()
                    .or(path)
                    .unwrap_or_default(),
                multi_mode: transport.grpc_mode.as_deref() == Some("multi"),
            });
        }
        Network::Http => {
            stream.http_settings = Some(HttpSettings {
                host: transport.host.as_deref().map(split_list).unwrap_or_default(),
                path,
                headers: transport.headers.clone(),
            });
        }
        Network::Quic => {
            stream.quic_settings = Some(QuicSettings {
                header: QuicHeader {
                    header_type: transport
                        .header_type
                        .clone()
                        .unwrap_or_else(|| "none".to_string()),
                },
            });
        }
        Network::HttpUpgrade => {
            stream.httpupgrade_settings = Some(HttpUpgradeSettings {
                path,
                host: transport.host.clone(),
                headers: transport.headers.clone(),
            });
        }
    }

    stream
}

/// TLS server name: SNI, then the host header, then the dial address
pub fn server_name(sni: Option<&str>, host_header: Option<&str>, address: &str) -> String {
    sni.filter(|s| !s.is_empty())
        .map(str::to_string)
        .or_else(|| host_header.and_then(|h| split_list(h).into_iter().next()))
        .unwrap_or_else(|| address.to_string())
}

pub fn tls_settings(tls: &TlsParams, host_header: Option<&str>, address: &str) -> TlsSettings {
    TlsSettings {
        server_name: server_name(tls.sni.as_deref(), host_header, address),
        allow_insecure: tls.allow_insecure,
        alpn: tls.alpn.clone(),
        fingerprint: tls.fingerprint.clone(),
    }
}

/// Flow only applies to raw TCP under TLS or REALITY
pub fn effective_flow(flow: &str, network: Network, security: Security) -> Option<String> {
    (!flow.is_empty() && network == Network::Tcp && security != Security::None)
        .then(|| flow.to_string())
}

/// Mux is dropped when a flow is active
pub fn mux_settings(mux: &MuxParams, flow: Option<&str>) -> Option<MuxSettings> {
    (mux.enabled && flow.is_none()).then(|| MuxSettings {
        enabled: true,
        concurrency: mux.concurrency,
    })
}

pub fn vnext(record: &ServerRecord, user: VNextUser) -> OutboundSettings {
    OutboundSettings::VNext(VNextSettings {
        vnext: vec![VNextServer {
            address: record.host.clone(),
            port: record.port,
            users: vec![user],
        }],
    })
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

// ============================================================================
// Record Helpers
// ============================================================================

pub fn mismatch(expected: Protocol, record: &ServerRecord) -> CodecError {
    CodecError::ProtocolMismatch {
        expected: expected.to_string(),
        found: record.protocol().to_string(),
    }
}

pub fn mismatch_issue(expected: Protocol, record: &ServerRecord) -> ValidationIssue {
    ValidationIssue::ProtocolMismatch {
        expected,
        found: record.protocol(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{ProtocolSettings, TrojanParams};

    #[test]
    fn test_split_uri_basic() {
        let parsed = split_uri("trojan://p%40ss@example.com:443?sni=a.com#my%20node", "trojan")
            .unwrap();
        assert_eq!(parsed.credential, "p@ss");
        assert_eq!(parsed.host, "example.com");
        assert_eq!(parsed.port, 443);
        assert_eq!(parsed.params.get("sni"), Some("a.com"));
        assert_eq!(parsed.name, "my node");
    }

    #[test]
    fn test_split_uri_ipv6() {
        let parsed = split_uri("vless://id@[2001:db8::1]:8443", "vless").unwrap();
        assert_eq!(parsed.host, "2001:db8::1");
        assert_eq!(parsed.port, 8443);
        assert!(parsed.name.is_empty());
    }

    #[test]
    fn test_split_uri_decodes_unicode_host() {
        let parsed = split_uri("trojan://pw@bücher.example:443", "trojan").unwrap();
        assert_eq!(parsed.host, "bücher.example");

        let encoded = split_uri("trojan://pw@b%C3%BCcher.example:443", "trojan").unwrap();
        assert_eq!(encoded.host, "bücher.example");

        assert!(split_uri("trojan://pw@evil%2Fpath.example:443", "trojan").is_err());
    }

    #[test]
    fn test_split_uri_errors() {
        assert!(split_uri("vmess://id@example.com:443", "vless").is_err());
        assert!(split_uri("vless://id@example.com", "vless").is_err());
        assert!(split_uri("vless://id@example.com:0", "vless").is_err());
        assert!(split_uri("vless://id@example.com:70000", "vless").is_err());
        assert!(split_uri("vless://id@:443", "vless").is_err());
    }

    #[test]
    fn test_query_params_keeps_plus_and_first_value() {
        let params = QueryParams::parse("auth=ab+c%3D&auth=second&empty=&x=1");
        assert_eq!(params.get("auth"), Some("ab+c="));
        assert_eq!(params.raw("empty"), Some(""));
        assert_eq!(params.get("empty"), None);
        assert!(params.flag(&["x"]));
    }

    #[test]
    fn test_query_params_list() {
        let params = QueryParams::parse("alpn=h2,%20http%2F1.1,");
        assert_eq!(params.list("alpn"), vec!["h2", "http/1.1"]);
    }

    #[test]
    fn test_parse_host_port() {
        assert_eq!(
            parse_host_port("example.com:8080").unwrap(),
            ("example.com".to_string(), 8080)
        );
        assert_eq!(
            parse_host_port("[::1]:8080").unwrap(),
            ("::1".to_string(), 8080)
        );
        assert!(parse_host_port("example.com").is_err());
        assert!(parse_host_port("example.com:invalid").is_err());
        assert!(parse_host_port("[::1:8080").is_err());
    }

    #[test]
    fn test_uri_builder() {
        let record = ServerRecord::new(
            "a b",
            "::1",
            443,
            ProtocolSettings::Trojan(TrojanParams::new("p@ss")),
        );
        let mut uri = UriBuilder::new("trojan", &record).credential("p@ss");
        uri.param("path", "/a b");
        uri.param_unless("security", "tls", "tls");
        assert_eq!(uri.build(), "trojan://p%40ss@[::1]:443?path=%2Fa%20b#a%20b");
    }

    #[test]
    fn test_read_transport_defaults_and_aliases() {
        let transport = read_transport(&QueryParams::parse("net=websocket&headerType=none"));
        assert_eq!(transport.network, Network::Ws);
        assert!(transport.header_type.is_none());

        let transport = read_transport(&QueryParams::parse("type=kcp"));
        assert_eq!(transport.network, Network::Tcp);
    }

    #[test]
    fn test_read_headers_json_and_base64() {
        let plain = read_headers(Some(r#"{"X-Test":"1"}"#));
        assert_eq!(plain.get("X-Test").map(String::as_str), Some("1"));

        // base64 of {"X-Test":"1"}
        let encoded = read_headers(Some("eyJYLVRlc3QiOiIxIn0="));
        assert_eq!(encoded, plain);

        assert!(read_headers(Some("not json")).is_empty());
    }

    #[test]
    fn test_server_name_fallback() {
        assert_eq!(server_name(Some("sni.com"), Some("h.com"), "addr"), "sni.com");
        assert_eq!(server_name(None, Some("h1.com,h2.com"), "addr"), "h1.com");
        assert_eq!(server_name(Some(""), None, "addr"), "addr");
    }

    #[test]
    fn test_effective_flow_and_mux() {
        let mux = MuxParams {
            enabled: true,
            concurrency: 4,
        };
        let flow = effective_flow("xtls-rprx-vision", Network::Tcp, Security::Tls);
        assert!(flow.is_some());
        assert!(mux_settings(&mux, flow.as_deref()).is_none());

        assert!(effective_flow("xtls-rprx-vision", Network::Ws, Security::Tls).is_none());
        assert!(effective_flow("xtls-rprx-vision", Network::Tcp, Security::None).is_none());
        assert_eq!(mux_settings(&mux, None).unwrap().concurrency, 4);
    }

    #[test]
    fn test_network_stream_ws_host_header() {
        let transport = TransportParams {
            network: Network::Ws,
            host: Some("cdn.example.com".to_string()),
            ..Default::default()
        };
        let stream = network_stream(&transport, Security::Tls);
        let ws = stream.ws_settings.unwrap();
        assert_eq!(ws.path, "/");
        assert_eq!(ws.headers.get("Host").map(String::as_str), Some("cdn.example.com"));
    }

    #[test]
    fn test_network_stream_tcp_http_camouflage() {
        let transport = TransportParams {
            header_type: Some("http".to_string()),
            host: Some("a.com,b.com".to_string()),
            path: Some("/p".to_string()),
            ..Default::default()
        };
        let stream = network_stream(&transport, Security::None);
        let header = stream.tcp_settings.unwrap().header;
        assert_eq!(header.header_type, "http");
        let request = header.request.unwrap();
        assert_eq!(request.path, vec!["/p"]);
        assert_eq!(request.headers["Host"], vec!["a.com", "b.com"]);
    }
}

//! Shadowsocks codec
//!
//! Supports both SIP002 format and legacy format, as well as SIP003 plugins:
//! - SIP002: `ss://BASE64URL(method:password)@host:port#name`
//! - SIP002 with plain userinfo: `ss://method:password@host:port#name`
//! - SIP002 with SIP003 plugin: `ss://userinfo@host:port/?plugin=name;opts#name`
//! - Legacy: `ss://BASE64(method:password@host:port)#name`
//!
//! Links are always emitted in SIP002 form with unpadded URL-safe userinfo.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use tracing::{trace, warn};

use crate::codec::base64::decode_base64_text;
use crate::codec::validation::{ValidationIssue, ValidationReport};
use crate::codec::{CodecError, ProtocolCodec};
use crate::config::outbound::{OutboundConfig, OutboundSettings, ServerEntry, ServersSettings};
use crate::record::{Protocol, ProtocolSettings, ServerRecord, ShadowsocksParams};

use super::{
    QueryParams, UriBuilder, mismatch, mismatch_issue, mux_settings, parse_host_port,
    percent_decode, read_mux, write_mux,
};

/// Ciphers the tunneling engine accepts
const SUPPORTED_METHODS: &[&str] = &[
    "aes-128-gcm",
    "aes-192-gcm",
    "aes-256-gcm",
    "chacha20-poly1305",
    "chacha20-ietf-poly1305",
    "xchacha20-poly1305",
    "xchacha20-ietf-poly1305",
    "2022-blake3-aes-128-gcm",
    "2022-blake3-aes-256-gcm",
    "2022-blake3-chacha20-poly1305",
    "aes-128-ctr",
    "aes-192-ctr",
    "aes-256-ctr",
    "aes-128-cfb",
    "aes-192-cfb",
    "aes-256-cfb",
    "rc4-md5",
    "chacha20-ietf",
    "none",
    "plain",
];

// ============================================================================
// Shadowsocks Codec
// ============================================================================

pub struct ShadowsocksCodec;

impl ProtocolCodec for ShadowsocksCodec {
    fn protocol(&self) -> Protocol {
        Protocol::Shadowsocks
    }

    fn parse(&self, uri: &str) -> Result<ServerRecord, CodecError> {
        let uri = uri.trim();
        trace!("Parsing Shadowsocks URI");

        if !self.can_parse(uri) {
            return Err(CodecError::malformed("expected an ss:// link"));
        }
        let without_scheme = &uri["ss://".len()..];

        let (main_part, name) = match without_scheme.rfind('#') {
            Some(pos) => (
                &without_scheme[..pos],
                percent_decode(&without_scheme[pos + 1..]),
            ),
            None => (without_scheme, String::new()),
        };

        let (body, query) = main_part.split_once('?').unwrap_or((main_part, ""));
        let body = body.trim_end_matches('/');
        let query = QueryParams::parse(query);

        let (method, password, host, port) = match body.rfind('@') {
            Some(at_pos) => {
                trace!("Parsing as SIP002 format (found @ separator)");
                let (method, password) = self.parse_userinfo(&body[..at_pos])?;
                let (host, port) = parse_host_port(&body[at_pos + 1..])?;
                (method, password, host, port)
            }
            None => {
                trace!("Parsing as legacy Base64 format");
                self.parse_legacy(body)?
            }
        };

        let (plugin, plugin_opts) = self.parse_plugin(query.get("plugin"));
        let ss = ShadowsocksParams {
            method,
            password,
            plugin,
            plugin_opts,
            mux: read_mux(&query),
        };

        Ok(ServerRecord::new(
            name,
            host,
            port,
            ProtocolSettings::Shadowsocks(ss),
        ))
    }

    fn validate(&self, record: &ServerRecord) -> ValidationReport {
        let mut report = ValidationReport::new();
        let ProtocolSettings::Shadowsocks(params) = &record.settings else {
            report.push(mismatch_issue(Protocol::Shadowsocks, record));
            return report;
        };

        report.check_endpoint(record);
        if report.require("method", &params.method)
            && !SUPPORTED_METHODS.contains(&params.method.to_ascii_lowercase().as_str())
        {
            report.push(ValidationIssue::invalid(
                "method",
                format!("unsupported cipher \"{}\"", params.method),
            ));
        }
        report.require("password", &params.password);
        report
    }

    fn build_outbound(&self, record: &ServerRecord) -> Result<OutboundConfig, CodecError> {
        let ProtocolSettings::Shadowsocks(params) = &record.settings else {
            return Err(mismatch(Protocol::Shadowsocks, record));
        };

        let settings = OutboundSettings::Servers(ServersSettings {
            servers: vec![ServerEntry {
                address: record.host.clone(),
                port: record.port,
                password: params.password.clone(),
                method: Some(params.method.to_ascii_lowercase()),
                plugin: params.plugin.clone(),
                plugin_opts: params.plugin_opts.clone(),
            }],
        });

        Ok(OutboundConfig::proxy(Protocol::Shadowsocks, Some(settings))
            .with_mux(mux_settings(&params.mux, None)))
    }

    fn generate_url(&self, record: &ServerRecord) -> Result<String, CodecError> {
        let ProtocolSettings::Shadowsocks(params) = &record.settings else {
            return Err(mismatch(Protocol::Shadowsocks, record));
        };

        let userinfo = URL_SAFE_NO_PAD.encode(format!("{}:{}", params.method, params.password));
        let mut uri = UriBuilder::new(self.scheme(), record)
            .raw_userinfo(userinfo)
            .slash_before_query();

        if let Some(plugin) = &params.plugin {
            let value = match &params.plugin_opts {
                Some(opts) => format!("{plugin};{opts}"),
                None => plugin.clone(),
            };
            uri.param("plugin", value);
        }
        write_mux(&mut uri, &params.mux);
        Ok(uri.build())
    }
}

impl ShadowsocksCodec {
    /// `method:password`, plain (possibly percent-encoded) or base64
    fn parse_userinfo(&self, userinfo: &str) -> Result<(String, String), CodecError> {
        let decoded = percent_decode(userinfo);
        let plain = if decoded.contains(':') {
            decoded
        } else {
            decode_base64_text(&decoded).map_err(|e| {
                CodecError::malformed(format!("invalid Shadowsocks userinfo: {e}"))
            })?
        };

        let (method, password) = plain.split_once(':').ok_or_else(|| {
            CodecError::malformed("invalid Shadowsocks userinfo: missing method:password separator")
        })?;
        if method.is_empty() || password.is_empty() {
            return Err(CodecError::malformed(
                "Shadowsocks link missing method or password",
            ));
        }
        Ok((method.to_string(), password.to_string()))
    }

    /// Legacy format: `BASE64(method:password@host:port)`
    fn parse_legacy(&self, body: &str) -> Result<(String, String, String, u16), CodecError> {
        let decoded = decode_base64_text(body).map_err(|e| {
            CodecError::malformed(format!("failed to decode legacy Shadowsocks link: {e}"))
        })?;

        let (userinfo, hostport) = decoded
            .rsplit_once('@')
            .ok_or_else(|| CodecError::malformed("invalid legacy Shadowsocks format: missing @"))?;
        let (host, port) = parse_host_port(hostport)?;
        let (method, password) = self.parse_userinfo(userinfo)?;
        Ok((method, password, host, port))
    }

    /// SIP003 `plugin` value: the first `;` separates the name from its options
    fn parse_plugin(&self, value: Option<&str>) -> (Option<String>, Option<String>) {
        let Some(value) = value else {
            return (None, None);
        };

        match value.split_once(';') {
            Some((plugin, opts)) => (
                Some(self.normalize_plugin(plugin)),
                (!opts.is_empty()).then(|| opts.to_string()),
            ),
            None => (Some(self.normalize_plugin(value)), None),
        }
    }

    /// Maps deprecated SIP003 plugin names to their maintained equivalents.
    fn normalize_plugin(&self, plugin: &str) -> String {
        match plugin {
            "simple-obfs" => {
                warn!(
                    deprecated = "simple-obfs",
                    replacement = "obfs-local",
                    "Deprecated SIP003 plugin substituted with supported alternative"
                );
                "obfs-local".to_string()
            }
            "obfs-local" | "v2ray-plugin" => plugin.to_string(),
            other => {
                warn!(plugin = other, "Unknown SIP003 plugin kept as-is");
                other.to_string()
            }
        }
    }
}

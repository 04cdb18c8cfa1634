//! Hysteria codec
//!
//! Format: `hysteria://[auth@]host:port?auth&peer&insecure&upmbps&downmbps&obfs&protocol&alpn#name`
//!
//! Hysteria is UDP based and has no separate transport layer: TLS-adjacent
//! fields live directly in its settings and bandwidth caps go into the
//! `hysteriaSettings` stream block.

use tracing::trace;

use crate::codec::base64::{decode_opportunistic, encode_if_ambiguous};
use crate::codec::validation::{ValidationIssue, ValidationReport};
use crate::codec::{CodecError, ProtocolCodec};
use crate::config::outbound::{
    HysteriaSettings, HysteriaStreamSettings, OutboundConfig, OutboundSettings, StreamSettings,
};
use crate::record::{
    DEFAULT_HYSTERIA_ALPN, DEFAULT_HYSTERIA_DOWN_MBPS, DEFAULT_HYSTERIA_PROTOCOL,
    DEFAULT_HYSTERIA_UP_MBPS, HysteriaParams, Protocol, ProtocolSettings, ServerRecord,
};

use super::{UriBuilder, mismatch, mismatch_issue, split_uri};

const SUPPORTED_PROTOCOLS: &[&str] = &["udp", "wechat-video", "faketcp"];

pub struct HysteriaCodec;

impl ProtocolCodec for HysteriaCodec {
    fn protocol(&self) -> Protocol {
        Protocol::Hysteria
    }

    fn parse(&self, uri: &str) -> Result<ServerRecord, CodecError> {
        trace!("Parsing Hysteria URI");
        let parsed = split_uri(uri, self.scheme())?;
        let params = &parsed.params;

        let auth = params
            .first(&["auth", "auth_str"])
            .map(|v| decode_opportunistic(v).into_owned())
            .unwrap_or_else(|| parsed.credential.clone());

        let alpn = params.list("alpn");
        let hysteria = HysteriaParams {
            auth,
            up_mbps: parse_mbps(params.first(&["upmbps", "up"]), DEFAULT_HYSTERIA_UP_MBPS),
            down_mbps: parse_mbps(
                params.first(&["downmbps", "down"]),
                DEFAULT_HYSTERIA_DOWN_MBPS,
            ),
            obfs: params
                .first(&["obfsParam", "obfs"])
                .map(|v| decode_opportunistic(v).into_owned()),
            protocol: params
                .get("protocol")
                .unwrap_or(DEFAULT_HYSTERIA_PROTOCOL)
                .to_ascii_lowercase(),
            sni: params.first(&["peer", "sni"]).map(str::to_string),
            allow_insecure: params.flag(&["insecure", "allowInsecure"]),
            alpn: if alpn.is_empty() {
                vec![DEFAULT_HYSTERIA_ALPN.to_string()]
            } else {
                alpn
            },
        };

        Ok(ServerRecord::new(
            parsed.name,
            parsed.host,
            parsed.port,
            ProtocolSettings::Hysteria(hysteria),
        ))
    }

    fn validate(&self, record: &ServerRecord) -> ValidationReport {
        let mut report = ValidationReport::new();
        let ProtocolSettings::Hysteria(params) = &record.settings else {
            report.push(mismatch_issue(Protocol::Hysteria, record));
            return report;
        };

        report.check_endpoint(record);
        report.require("auth", &params.auth);
        if params.up_mbps == 0 {
            report.push(ValidationIssue::invalid("up_mbps", "must be positive"));
        }
        if params.down_mbps == 0 {
            report.push(ValidationIssue::invalid("down_mbps", "must be positive"));
        }
        if !SUPPORTED_PROTOCOLS.contains(&params.protocol.as_str()) {
            report.push(ValidationIssue::invalid(
                "protocol",
                format!("expected one of {}", SUPPORTED_PROTOCOLS.join(", ")),
            ));
        }
        report.recommend("sni", params.sni.as_deref());
        report
    }

    fn build_outbound(&self, record: &ServerRecord) -> Result<OutboundConfig, CodecError> {
        let ProtocolSettings::Hysteria(params) = &record.settings else {
            return Err(mismatch(Protocol::Hysteria, record));
        };

        let settings = OutboundSettings::Hysteria(HysteriaSettings {
            address: record.host.clone(),
            port: record.port,
            auth: params.auth.clone(),
            obfs: params.obfs.clone(),
            protocol: params.protocol.clone(),
            server_name: Some(
                params
                    .sni
                    .clone()
                    .unwrap_or_else(|| record.host.clone()),
            ),
            insecure: params.allow_insecure,
            alpn: params.alpn.clone(),
        });

        let mut stream = StreamSettings::new("hysteria", "tls");
        stream.hysteria_settings = Some(HysteriaStreamSettings {
            up_mbps: params.up_mbps,
            down_mbps: params.down_mbps,
        });

        Ok(OutboundConfig::proxy(Protocol::Hysteria, Some(settings)).with_stream(stream))
    }

    fn generate_url(&self, record: &ServerRecord) -> Result<String, CodecError> {
        let ProtocolSettings::Hysteria(params) = &record.settings else {
            return Err(mismatch(Protocol::Hysteria, record));
        };

        let mut uri = UriBuilder::new(self.scheme(), record);
        uri.param("auth", encode_if_ambiguous(&params.auth));
        uri.param_opt("peer", params.sni.as_deref());
        if params.allow_insecure {
            uri.param("insecure", "1");
        }
        if params.up_mbps != DEFAULT_HYSTERIA_UP_MBPS {
            uri.param("upmbps", params.up_mbps.to_string());
        }
        if params.down_mbps != DEFAULT_HYSTERIA_DOWN_MBPS {
            uri.param("downmbps", params.down_mbps.to_string());
        }
        if let Some(obfs) = &params.obfs {
            uri.param("obfs", encode_if_ambiguous(obfs));
        }
        uri.param_unless("protocol", &params.protocol, DEFAULT_HYSTERIA_PROTOCOL);
        if params.alpn != [DEFAULT_HYSTERIA_ALPN] {
            uri.param("alpn", params.alpn.join(","));
        }
        Ok(uri.build())
    }
}

/// Bandwidth in Mbps; a trailing unit such as `"20 mbps"` is tolerated
fn parse_mbps(value: Option<&str>, default: u32) -> u32 {
    value
        .map(|v| {
            v.trim()
                .chars()
                .take_while(char::is_ascii_digit)
                .collect::<String>()
        })
        .and_then(|digits| digits.parse().ok())
        .filter(|mbps| *mbps > 0)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = "hysteria://example.com:443?auth=cGFzcw==&upmbps=20&downmbps=100&obfs=xplus";

    fn params(record: &ServerRecord) -> &HysteriaParams {
        match &record.settings {
            ProtocolSettings::Hysteria(p) => p,
            other => panic!("Expected Hysteria settings, got {other:?}"),
        }
    }

    #[test]
    fn test_hysteria_end_to_end() {
        let record = HysteriaCodec.parse(FIXTURE).unwrap();
        assert_eq!(record.host, "example.com");
        assert_eq!(record.port, 443);

        let hysteria = params(&record);
        assert_eq!(hysteria.auth, "pass");
        assert_eq!(hysteria.up_mbps, 20);
        assert_eq!(hysteria.down_mbps, 100);
        assert_eq!(hysteria.obfs.as_deref(), Some("xplus"));

        let value = serde_json::to_value(HysteriaCodec.generate_config(&record)).unwrap();
        let proxy = &value["outbounds"][0];
        assert_eq!(proxy["protocol"], "hysteria");
        assert_eq!(proxy["streamSettings"]["hysteriaSettings"]["up_mbps"], 20);
        assert_eq!(proxy["streamSettings"]["hysteriaSettings"]["down_mbps"], 100);
        assert_eq!(proxy["settings"]["auth"], "pass");
        assert_eq!(proxy["settings"]["obfs"], "xplus");
    }

    #[test]
    fn test_hysteria_defaults() {
        let record = HysteriaCodec
            .parse("hysteria://secret@example.com:443")
            .unwrap();
        let hysteria = params(&record);
        assert_eq!(hysteria.auth, "secret");
        assert_eq!(hysteria.up_mbps, DEFAULT_HYSTERIA_UP_MBPS);
        assert_eq!(hysteria.down_mbps, DEFAULT_HYSTERIA_DOWN_MBPS);
        assert_eq!(hysteria.protocol, "udp");
        assert_eq!(hysteria.alpn, vec!["hysteria"]);
    }

    #[test]
    fn test_hysteria_tls_fields_folded_into_settings() {
        let record = HysteriaCodec
            .parse("hysteria://example.com:443?auth=pw&peer=sni.example.com&insecure=1&alpn=h3")
            .unwrap();
        let value = serde_json::to_value(HysteriaCodec.generate_config(&record)).unwrap();
        let settings = &value["outbounds"][0]["settings"];
        assert_eq!(settings["server_name"], "sni.example.com");
        assert_eq!(settings["insecure"], true);
        assert_eq!(settings["alpn"][0], "h3");
        assert!(value["outbounds"][0]["streamSettings"].get("tlsSettings").is_none());
    }

    #[test]
    fn test_hysteria_bandwidth_with_unit() {
        assert_eq!(parse_mbps(Some("20 mbps"), 10), 20);
        assert_eq!(parse_mbps(Some("0"), 10), 10);
        assert_eq!(parse_mbps(Some("fast"), 50), 50);
        assert_eq!(parse_mbps(None, 50), 50);
    }

    #[test]
    fn test_hysteria_round_trip_keeps_decoded_auth() {
        let record = HysteriaCodec.parse(FIXTURE).unwrap();
        let url = HysteriaCodec.generate_url(&record).unwrap();
        assert!(url.contains("auth=pass"));
        assert_eq!(HysteriaCodec.parse(&url).unwrap(), record);
    }

    #[test]
    fn test_hysteria_validate_requires_auth() {
        let record = HysteriaCodec.parse("hysteria://example.com:443").unwrap();
        let report = HysteriaCodec.validate(&record);
        assert!(!report.is_valid());
        assert!(report.errors().any(|i| matches!(
            i,
            ValidationIssue::MissingField { field: "auth" }
        )));
    }

    #[test]
    fn test_hysteria_missing_port() {
        assert!(HysteriaCodec.parse("hysteria://example.com?auth=pw").is_err());
    }
}

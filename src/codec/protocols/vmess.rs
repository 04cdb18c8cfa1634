//! VMess codec
//!
//! Two link forms are accepted:
//! - `vmess://uuid@host:port?params#name` (emitted form)
//! - legacy `vmess://BASE64(JSON)` with the `v, ps, add, port, id, ...` keys

use serde::Deserialize;
use tracing::trace;

use crate::codec::base64::decode_base64_text;
use crate::codec::validation::{ValidationIssue, ValidationReport};
use crate::codec::{CodecError, ProtocolCodec};
use crate::config::outbound::{OutboundConfig, VNextUser};
use crate::config::util::{lenient_option_u16, lenient_port};
use crate::record::{
    DEFAULT_VMESS_CIPHER, MuxParams, Network, Protocol, ProtocolSettings, Security, ServerRecord,
    TlsParams, TransportParams, VMessParams,
};

use super::{
    UriBuilder, mismatch, mismatch_issue, mux_settings, network_stream, read_mux,
    read_tls, read_transport, split_uri, tls_settings, vnext, write_mux, write_tls,
    write_transport,
};

// ============================================================================
// VMess Codec
// ============================================================================

pub struct VMessCodec;

/// Legacy share-link JSON
#[derive(Deserialize, Debug)]
struct VMessJson {
    /// Remark
    #[serde(default)]
    ps: String,
    add: String,
    #[serde(deserialize_with = "lenient_port")]
    port: u16,
    id: String,
    #[serde(default, deserialize_with = "lenient_option_u16")]
    aid: Option<u16>,
    #[serde(default)]
    scy: Option<String>,
    #[serde(default)]
    net: Option<String>,
    /// Header type
    #[serde(default, rename = "type")]
    header_type: Option<String>,
    #[serde(default)]
    host: Option<String>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    tls: Option<String>,
    #[serde(default)]
    sni: Option<String>,
    #[serde(default)]
    alpn: Option<String>,
    #[serde(default)]
    fp: Option<String>,
}

impl ProtocolCodec for VMessCodec {
    fn protocol(&self) -> Protocol {
        Protocol::VMess
    }

    fn parse(&self, uri: &str) -> Result<ServerRecord, CodecError> {
        let uri = uri.trim();
        trace!("Parsing VMess URI");

        let rest = uri
            .get("vmess://".len()..)
            .filter(|_| self.can_parse(uri))
            .ok_or_else(|| CodecError::malformed("expected a vmess:// link"))?;
        let body = rest.split('#').next().unwrap_or_default();

        if body.contains('@') {
            self.parse_standard(uri)
        } else {
            self.parse_legacy(body)
        }
    }

    fn validate(&self, record: &ServerRecord) -> ValidationReport {
        let mut report = ValidationReport::new();
        let ProtocolSettings::VMess(params) = &record.settings else {
            report.push(mismatch_issue(Protocol::VMess, record));
            return report;
        };

        report.check_endpoint(record);
        report.check_uuid("uuid", &params.uuid);
        if params.cipher.trim().is_empty() {
            report.push(ValidationIssue::MissingField { field: "cipher" });
        }
        match params.tls.security {
            Security::Tls => report.recommend("sni", params.tls.sni.as_deref()),
            Security::Reality => report.push(ValidationIssue::invalid(
                "security",
                "REALITY is only available for VLESS",
            )),
            Security::None => {}
        }
        report
    }

    fn build_outbound(&self, record: &ServerRecord) -> Result<OutboundConfig, CodecError> {
        let ProtocolSettings::VMess(params) = &record.settings else {
            return Err(mismatch(Protocol::VMess, record));
        };

        let user = VNextUser {
            id: params.uuid.clone(),
            alter_id: Some(params.alter_id),
            security: Some(params.cipher.clone()),
            ..Default::default()
        };

        let mut stream = network_stream(&params.transport, params.tls.security);
        if params.tls.security == Security::Tls {
            stream.tls_settings = Some(tls_settings(
                &params.tls,
                params.transport.host.as_deref(),
                &record.host,
            ));
        }

        Ok(OutboundConfig::proxy(Protocol::VMess, Some(vnext(record, user)))
            .with_stream(stream)
            .with_mux(mux_settings(&params.mux, None)))
    }

    fn generate_url(&self, record: &ServerRecord) -> Result<String, CodecError> {
        let ProtocolSettings::VMess(params) = &record.settings else {
            return Err(mismatch(Protocol::VMess, record));
        };

        let mut uri = UriBuilder::new(self.scheme(), record).credential(&params.uuid);
        uri.param_unless("encryption", &params.cipher, DEFAULT_VMESS_CIPHER);
        if params.alter_id != 0 {
            uri.param("alterId", params.alter_id.to_string());
        }
        write_transport(&mut uri, &params.transport);
        write_tls(&mut uri, &params.tls, Security::None);
        write_mux(&mut uri, &params.mux);
        Ok(uri.build())
    }
}

impl VMessCodec {
    fn parse_standard(&self, uri: &str) -> Result<ServerRecord, CodecError> {
        let parsed = split_uri(uri, self.scheme())?;
        if parsed.credential.is_empty() {
            return Err(CodecError::malformed("VMess link missing UUID"));
        }

        let params = &parsed.params;
        let vmess = VMessParams {
            uuid: parsed.credential.clone(),
            alter_id: params
                .first(&["alterId", "aid"])
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(0),
            cipher: cipher_or_default(params.first(&["encryption", "scy"])),
            transport: read_transport(params),
            tls: read_tls(params, Security::None),
            mux: read_mux(params),
        };

        Ok(ServerRecord::new(
            parsed.name,
            parsed.host,
            parsed.port,
            ProtocolSettings::VMess(vmess),
        ))
    }

    fn parse_legacy(&self, encoded: &str) -> Result<ServerRecord, CodecError> {
        trace!("Parsing legacy Base64 JSON VMess link");
        let decoded = decode_base64_text(encoded)
            .map_err(|e| CodecError::malformed(format!("VMess link is not base64 JSON: {e}")))?;
        let json: VMessJson = serde_json::from_str(&decoded)
            .map_err(|e| CodecError::malformed(format!("invalid VMess JSON: {e}")))?;

        trace!(
            "VMess config: server={}:{}, net={:?}, tls={:?}",
            json.add, json.port, json.net, json.tls
        );

        let host = json
            .add
            .trim()
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        if host.is_empty() {
            return Err(CodecError::malformed("VMess JSON missing address"));
        }
        if json.port == 0 {
            return Err(CodecError::malformed("port must be in 1..=65535"));
        }
        if json.id.trim().is_empty() {
            return Err(CodecError::malformed("VMess JSON missing UUID"));
        }

        let network = json
            .net
            .as_deref()
            .and_then(Network::from_param)
            .unwrap_or_default();
        let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        let path = non_empty(json.path);
        let (path, service_name) = if network == Network::Grpc {
            (None, path)
        } else {
            (path, None)
        };

        let transport = TransportParams {
            network,
            header_type: non_empty(json.header_type).filter(|t| !t.eq_ignore_ascii_case("none")),
            path,
            host: non_empty(json.host),
            service_name,
            ..Default::default()
        };

        let tls = TlsParams {
            security: if json.tls.as_deref() == Some("tls") {
                Security::Tls
            } else {
                Security::None
            },
            sni: non_empty(json.sni),
            alpn: json
                .alpn
                .map(|s| {
                    s.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            fingerprint: non_empty(json.fp),
            allow_insecure: false,
        };

        let vmess = VMessParams {
            uuid: json.id.trim().to_string(),
            alter_id: json.aid.unwrap_or(0),
            cipher: cipher_or_default(json.scy.as_deref()),
            transport,
            tls,
            mux: MuxParams::default(),
        };

        Ok(ServerRecord::new(
            json.ps,
            host,
            json.port,
            ProtocolSettings::VMess(vmess),
        ))
    }
}

fn cipher_or_default(value: Option<&str>) -> String {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_VMESS_CIPHER)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;

    const UUID: &str = "b831381d-6324-4d53-ad4f-8cda48b30811";

    fn encode_vmess_json(json: &str) -> String {
        format!("vmess://{}", STANDARD.encode(json))
    }

    fn params(record: &ServerRecord) -> &VMessParams {
        match &record.settings {
            ProtocolSettings::VMess(p) => p,
            other => panic!("Expected VMess settings, got {other:?}"),
        }
    }

    #[test]
    fn test_vmess_standard_form() {
        let uri = format!(
            "vmess://{UUID}@example.com:443?type=ws&path=%2Fws&host=cdn.example.com&security=tls&sni=example.com#test-node"
        );
        let record = VMessCodec.parse(&uri).unwrap();
        assert_eq!(record.name, "test-node");
        assert_eq!(record.host, "example.com");
        assert_eq!(record.port, 443);

        let vmess = params(&record);
        assert_eq!(vmess.uuid, UUID);
        assert_eq!(vmess.cipher, "auto");
        assert_eq!(vmess.alter_id, 0);
        assert_eq!(vmess.transport.network, Network::Ws);
        assert_eq!(vmess.transport.path.as_deref(), Some("/ws"));
        assert_eq!(vmess.tls.security, Security::Tls);
    }

    #[test]
    fn test_vmess_legacy_basic() {
        let json = format!(
            r#"{{"v":"2","ps":"legacy","add":"example.com","port":"8443","id":"{UUID}","aid":"0","net":"grpc","path":"svc","tls":"tls","alpn":"h2,http/1.1"}}"#
        );
        let record = VMessCodec.parse(&encode_vmess_json(&json)).unwrap();
        assert_eq!(record.name, "legacy");
        assert_eq!(record.port, 8443);

        let vmess = params(&record);
        assert_eq!(vmess.transport.network, Network::Grpc);
        assert_eq!(vmess.transport.service_name.as_deref(), Some("svc"));
        assert!(vmess.transport.path.is_none());
        assert_eq!(vmess.tls.alpn, vec!["h2", "http/1.1"]);
    }

    #[test]
    fn test_vmess_legacy_no_name() {
        let json = format!(r#"{{"v":"2","ps":"","add":"example.com","port":443,"id":"{UUID}"}}"#);
        let record = VMessCodec.parse(&encode_vmess_json(&json)).unwrap();
        assert_eq!(record.name, "example.com:443");
    }

    #[test]
    fn test_vmess_legacy_round_trips_through_standard_form() {
        let json = format!(
            r#"{{"v":"2","ps":"ws node","add":"example.com","port":443,"id":"{UUID}","aid":4,"scy":"aes-128-gcm","net":"ws","path":"/ws","host":"ws.example.com","tls":"tls","sni":"example.com","fp":"firefox"}}"#
        );
        let record = VMessCodec.parse(&encode_vmess_json(&json)).unwrap();
        let url = VMessCodec.generate_url(&record).unwrap();
        assert!(url.starts_with(&format!("vmess://{UUID}@example.com:443?")));
        assert_eq!(VMessCodec.parse(&url).unwrap(), record);
    }

    #[test]
    fn test_vmess_invalid_uri() {
        assert!(VMessCodec.parse("vmess://").is_err());
        assert!(VMessCodec.parse("vmess://not-base64!@#$").is_err());
        assert!(VMessCodec.parse("ss://wrong-scheme").is_err());
        let uri = format!("vmess://{}", STANDARD.encode("not json"));
        assert!(matches!(
            VMessCodec.parse(&uri),
            Err(CodecError::MalformedUri { .. })
        ));
    }

    #[test]
    fn test_vmess_missing_port() {
        let uri = format!("vmess://{UUID}@example.com?security=tls");
        assert!(VMessCodec.parse(&uri).is_err());
    }

    #[test]
    fn test_vmess_validate() {
        let uri = format!("vmess://{UUID}@example.com:443?security=tls");
        let record = VMessCodec.parse(&uri).unwrap();
        let report = VMessCodec.validate(&record);
        assert!(report.is_valid());
        assert_eq!(report.warnings().count(), 1);

        let bad = VMessCodec
            .parse("vmess://not-a-uuid@example.com:443")
            .unwrap();
        assert!(!VMessCodec.validate(&bad).is_valid());
    }

    #[test]
    fn test_vmess_generate_config() {
        let uri = format!(
            "vmess://{UUID}@example.com:443?encryption=aes-128-gcm&type=grpc&serviceName=svc&security=tls&mux=1"
        );
        let record = VMessCodec.parse(&uri).unwrap();
        let doc = VMessCodec.generate_config(&record);
        let value = serde_json::to_value(&doc).unwrap();
        let proxy = &value["outbounds"][0];

        assert_eq!(proxy["protocol"], "vmess");
        assert_eq!(proxy["settings"]["vnext"][0]["users"][0]["security"], "aes-128-gcm");
        assert_eq!(proxy["streamSettings"]["network"], "grpc");
        assert_eq!(proxy["streamSettings"]["grpcSettings"]["serviceName"], "svc");
        assert_eq!(proxy["streamSettings"]["tlsSettings"]["serverName"], "example.com");
        assert_eq!(proxy["mux"]["concurrency"], 8);
    }

    #[test]
    fn test_can_parse() {
        assert!(VMessCodec.can_parse("vmess://abc"));
        assert!(!VMessCodec.can_parse("ss://abc"));
        assert!(!VMessCodec.can_parse("not-a-uri"));
    }
}

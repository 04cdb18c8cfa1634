//! Trojan codec
//!
//! Format: `trojan://password@host:port?params#name`. TLS is on unless the
//! link says `security=none`.

use tracing::trace;

use crate::codec::validation::{ValidationIssue, ValidationReport};
use crate::codec::{CodecError, ProtocolCodec};
use crate::config::outbound::{OutboundConfig, OutboundSettings, ServerEntry, ServersSettings};
use crate::record::{Protocol, ProtocolSettings, Security, ServerRecord, TrojanParams};

use super::{
    UriBuilder, mismatch, mismatch_issue, mux_settings, network_stream, read_mux, read_tls,
    read_transport, split_uri, tls_settings, write_mux, write_tls, write_transport,
};

pub struct TrojanCodec;

impl ProtocolCodec for TrojanCodec {
    fn protocol(&self) -> Protocol {
        Protocol::Trojan
    }

    fn parse(&self, uri: &str) -> Result<ServerRecord, CodecError> {
        trace!("Parsing Trojan URI");
        let parsed = split_uri(uri, self.scheme())?;
        if parsed.credential.is_empty() {
            return Err(CodecError::malformed("Trojan link missing password"));
        }

        let params = &parsed.params;
        let trojan = TrojanParams {
            password: parsed.credential.clone(),
            transport: read_transport(params),
            tls: read_tls(params, Security::Tls),
            mux: read_mux(params),
        };

        Ok(ServerRecord::new(
            parsed.name,
            parsed.host,
            parsed.port,
            ProtocolSettings::Trojan(trojan),
        ))
    }

    fn validate(&self, record: &ServerRecord) -> ValidationReport {
        let mut report = ValidationReport::new();
        let ProtocolSettings::Trojan(params) = &record.settings else {
            report.push(mismatch_issue(Protocol::Trojan, record));
            return report;
        };

        report.check_endpoint(record);
        report.require("password", &params.password);
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
        let ProtocolSettings::Trojan(params) = &record.settings else {
            return Err(mismatch(Protocol::Trojan, record));
        };

        let settings = OutboundSettings::Servers(ServersSettings {
            servers: vec![ServerEntry {
                address: record.host.clone(),
                port: record.port,
                password: params.password.clone(),
                ..Default::default()
            }],
        });

        let mut stream = network_stream(&params.transport, params.tls.security);
        if params.tls.security == Security::Tls {
            stream.tls_settings = Some(tls_settings(
                &params.tls,
                params.transport.host.as_deref(),
                &record.host,
            ));
        }

        Ok(OutboundConfig::proxy(Protocol::Trojan, Some(settings))
            .with_stream(stream)
            .with_mux(mux_settings(&params.mux, None)))
    }

    fn generate_url(&self, record: &ServerRecord) -> Result<String, CodecError> {
        let ProtocolSettings::Trojan(params) = &record.settings else {
            return Err(mismatch(Protocol::Trojan, record));
        };

        let mut uri = UriBuilder::new(self.scheme(), record).credential(&params.password);
        write_transport(&mut uri, &params.transport);
        write_tls(&mut uri, &params.tls, Security::Tls);
        write_mux(&mut uri, &params.mux);
        Ok(uri.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Network;

    fn params(record: &ServerRecord) -> &TrojanParams {
        match &record.settings {
            ProtocolSettings::Trojan(p) => p,
            other => panic!("Expected Trojan settings, got {other:?}"),
        }
    }

    #[test]
    fn test_trojan_basic() {
        let record = TrojanCodec
            .parse("trojan://password123@example.com:443?sni=example.com#trojan-node")
            .unwrap();
        assert_eq!(record.name, "trojan-node");
        assert_eq!(record.host, "example.com");
        assert_eq!(record.port, 443);

        let trojan = params(&record);
        assert_eq!(trojan.password, "password123");
        assert_eq!(trojan.tls.security, Security::Tls);
        assert_eq!(trojan.tls.sni.as_deref(), Some("example.com"));
    }

    #[test]
    fn test_trojan_percent_encoded_password() {
        let record = TrojanCodec
            .parse("trojan://p%40ss%3Aword@example.com:443")
            .unwrap();
        assert_eq!(params(&record).password, "p@ss:word");
        assert_eq!(record.name, "example.com:443");
    }

    #[test]
    fn test_trojan_security_none_round_trip() {
        let record = TrojanCodec
            .parse("trojan://pw@example.com:80?security=none&type=grpc&serviceName=g")
            .unwrap();
        assert_eq!(params(&record).tls.security, Security::None);
        assert_eq!(params(&record).transport.network, Network::Grpc);

        let url = TrojanCodec.generate_url(&record).unwrap();
        assert!(url.contains("security=none"));
        assert_eq!(TrojanCodec.parse(&url).unwrap(), record);
    }

    #[test]
    fn test_trojan_missing_parts() {
        assert!(TrojanCodec.parse("trojan://@example.com:443").is_err());
        assert!(TrojanCodec.parse("trojan://pw@example.com").is_err());
        assert!(TrojanCodec.parse("vless://pw@example.com:443").is_err());
    }

    #[test]
    fn test_trojan_config_uses_host_header_for_server_name() {
        let record = TrojanCodec
            .parse("trojan://pw@1.2.3.4:443?type=ws&host=cdn.example.com&allowInsecure=1")
            .unwrap();
        let value = serde_json::to_value(TrojanCodec.generate_config(&record)).unwrap();
        let proxy = &value["outbounds"][0];
        assert_eq!(proxy["protocol"], "trojan");
        assert_eq!(proxy["settings"]["servers"][0]["password"], "pw");
        let tls = &proxy["streamSettings"]["tlsSettings"];
        assert_eq!(tls["serverName"], "cdn.example.com");
        assert_eq!(tls["allowInsecure"], true);
    }

    #[test]
    fn test_trojan_validate_recommends_sni() {
        let record = TrojanCodec.parse("trojan://pw@example.com:443").unwrap();
        let report = TrojanCodec.validate(&record);
        assert!(report.is_valid());
        assert!(report.warnings().any(|w| matches!(
            w,
            ValidationIssue::RecommendedFieldMissing { field: "sni" }
        )));
    }
}

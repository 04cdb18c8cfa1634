//! VLESS codec
//!
//! Format: `vless://uuid@host:port?params#name`. Links carrying
//! `security=reality` belong to the REALITY codec and are handed over to it.

use tracing::trace;

use crate::codec::validation::{ValidationIssue, ValidationReport};
use crate::codec::{CodecError, ProtocolCodec};
use crate::config::outbound::{OutboundConfig, VNextUser};
use crate::record::{
    DEFAULT_VLESS_ENCRYPTION, DEFAULT_VLESS_FLOW, Protocol, ProtocolSettings, Security,
    ServerRecord, VLessParams,
};

use super::{
    RealityCodec, UriBuilder, effective_flow, mismatch, mismatch_issue, mux_settings,
    network_stream, read_flow, read_mux, read_tls, read_transport, split_uri, tls_settings, vnext,
    write_flow, write_mux, write_tls, write_transport,
};

// ============================================================================
// VLESS Codec
// ============================================================================

pub struct VLessCodec;

impl ProtocolCodec for VLessCodec {
    fn protocol(&self) -> Protocol {
        Protocol::VLess
    }

    fn parse(&self, uri: &str) -> Result<ServerRecord, CodecError> {
        trace!("Parsing VLESS URI");
        let parsed = split_uri(uri, self.scheme())?;

        if parsed
            .params
            .get("security")
            .is_some_and(|s| s.eq_ignore_ascii_case("reality"))
        {
            trace!("VLESS link uses REALITY, delegating");
            return RealityCodec.parse(uri);
        }

        if parsed.credential.is_empty() {
            return Err(CodecError::malformed("VLESS link missing UUID"));
        }

        let params = &parsed.params;
        let vless = VLessParams {
            uuid: parsed.credential.clone(),
            flow: read_flow(params, DEFAULT_VLESS_FLOW),
            encryption: params
                .get("encryption")
                .unwrap_or(DEFAULT_VLESS_ENCRYPTION)
                .to_string(),
            transport: read_transport(params),
            tls: read_tls(params, Security::None),
            mux: read_mux(params),
        };

        Ok(ServerRecord::new(
            parsed.name,
            parsed.host,
            parsed.port,
            ProtocolSettings::VLess(vless),
        ))
    }

    fn validate(&self, record: &ServerRecord) -> ValidationReport {
        let mut report = ValidationReport::new();
        let ProtocolSettings::VLess(params) = &record.settings else {
            report.push(mismatch_issue(Protocol::VLess, record));
            return report;
        };

        report.check_endpoint(record);
        report.check_uuid("uuid", &params.uuid);
        if params.encryption != DEFAULT_VLESS_ENCRYPTION {
            report.push(ValidationIssue::invalid(
                "encryption",
                format!("must be \"none\", got \"{}\"", params.encryption),
            ));
        }
        match params.tls.security {
            Security::Tls => report.recommend("sni", params.tls.sni.as_deref()),
            Security::Reality => report.push(ValidationIssue::invalid(
                "security",
                "REALITY servers need a reality record with a public key",
            )),
            Security::None => {}
        }
        report
    }

    fn build_outbound(&self, record: &ServerRecord) -> Result<OutboundConfig, CodecError> {
        let ProtocolSettings::VLess(params) = &record.settings else {
            return Err(mismatch(Protocol::VLess, record));
        };

        let flow = effective_flow(
            &params.flow,
            params.transport.network,
            params.tls.security,
        );
        let user = VNextUser {
            id: params.uuid.clone(),
            encryption: Some(params.encryption.clone()),
            flow: flow.clone(),
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

        Ok(OutboundConfig::proxy(Protocol::VLess, Some(vnext(record, user)))
            .with_stream(stream)
            .with_mux(mux_settings(&params.mux, flow.as_deref())))
    }

    fn generate_url(&self, record: &ServerRecord) -> Result<String, CodecError> {
        let ProtocolSettings::VLess(params) = &record.settings else {
            return Err(mismatch(Protocol::VLess, record));
        };

        let mut uri = UriBuilder::new(self.scheme(), record).credential(&params.uuid);
        write_flow(&mut uri, &params.flow, DEFAULT_VLESS_FLOW);
        uri.param_unless("encryption", &params.encryption, DEFAULT_VLESS_ENCRYPTION);
        write_transport(&mut uri, &params.transport);
        write_tls(&mut uri, &params.tls, Security::None);
        write_mux(&mut uri, &params.mux);
        Ok(uri.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Network;

    const UUID: &str = "b831381d-6324-4d53-ad4f-8cda48b30811";

    fn params(record: &ServerRecord) -> &VLessParams {
        match &record.settings {
            ProtocolSettings::VLess(p) => p,
            other => panic!("Expected VLess settings, got {other:?}"),
        }
    }

    #[test]
    fn test_vless_basic() {
        let uri = format!("vless://{UUID}@example.com:443?security=tls&sni=example.com#test-node");
        let record = VLessCodec.parse(&uri).unwrap();
        assert_eq!(record.name, "test-node");
        assert_eq!(record.host, "example.com");
        assert_eq!(record.port, 443);

        let vless = params(&record);
        assert_eq!(vless.uuid, UUID);
        assert_eq!(vless.flow, DEFAULT_VLESS_FLOW);
        assert_eq!(vless.encryption, "none");
        assert_eq!(vless.tls.security, Security::Tls);
        assert_eq!(vless.tls.sni.as_deref(), Some("example.com"));
    }

    #[test]
    fn test_vless_explicit_empty_flow_is_kept() {
        let uri = format!("vless://{UUID}@example.com:443?flow=&security=tls");
        let record = VLessCodec.parse(&uri).unwrap();
        assert_eq!(params(&record).flow, "");

        let url = VLessCodec.generate_url(&record).unwrap();
        assert!(url.contains("?flow=&security=tls"));
        assert_eq!(VLessCodec.parse(&url).unwrap(), record);
    }

    #[test]
    fn test_vless_with_websocket() {
        let uri = format!(
            "vless://{UUID}@example.com:443?type=ws&path=/ws&host=ws.example.com&security=tls#ws-node"
        );
        let record = VLessCodec.parse(&uri).unwrap();
        let vless = params(&record);
        assert_eq!(vless.transport.network, Network::Ws);
        assert_eq!(vless.transport.path.as_deref(), Some("/ws"));
        assert_eq!(vless.transport.host.as_deref(), Some("ws.example.com"));
    }

    #[test]
    fn test_vless_reality_link_is_delegated() {
        let uri = format!(
            "vless://{UUID}@example.com:443?security=reality&pbk=jNXHt1yRo0vDuchQlIP6Z0ZvjT3KtzVI-T4E7RoLJS0&sni=www.microsoft.com"
        );
        let record = VLessCodec.parse(&uri).unwrap();
        assert_eq!(record.protocol(), Protocol::Reality);
    }

    #[test]
    fn test_vless_missing_uuid() {
        assert!(matches!(
            VLessCodec.parse("vless://example.com:443"),
            Err(CodecError::MalformedUri { .. })
        ));
    }

    #[test]
    fn test_vless_validate_encryption() {
        let uri = format!("vless://{UUID}@example.com:443?encryption=aes-128-gcm");
        let record = VLessCodec.parse(&uri).unwrap();
        let report = VLessCodec.validate(&record);
        assert!(!report.is_valid());
        assert!(report.errors().any(|i| matches!(
            i,
            ValidationIssue::InvalidField {
                field: "encryption",
                ..
            }
        )));
    }

    #[test]
    fn test_vless_flow_only_over_tcp_tls() {
        let tcp = format!("vless://{UUID}@example.com:443?security=tls&mux=1");
        let record = VLessCodec.parse(&tcp).unwrap();
        let value = serde_json::to_value(VLessCodec.generate_config(&record)).unwrap();
        let proxy = &value["outbounds"][0];
        assert_eq!(
            proxy["settings"]["vnext"][0]["users"][0]["flow"],
            DEFAULT_VLESS_FLOW
        );
        assert!(proxy.get("mux").is_none());

        let ws = format!("vless://{UUID}@example.com:443?security=tls&type=ws&mux=1");
        let record = VLessCodec.parse(&ws).unwrap();
        let value = serde_json::to_value(VLessCodec.generate_config(&record)).unwrap();
        let proxy = &value["outbounds"][0];
        assert!(proxy["settings"]["vnext"][0]["users"][0].get("flow").is_none());
        assert_eq!(proxy["mux"]["enabled"], true);
    }

    #[test]
    fn test_vless_generate_url_omits_defaults() {
        let uri = format!("vless://{UUID}@example.com:443?flow=xtls-rprx-vision&encryption=none#n");
        let record = VLessCodec.parse(&uri).unwrap();
        assert_eq!(
            VLessCodec.generate_url(&record).unwrap(),
            format!("vless://{UUID}@example.com:443#n")
        );
    }
}

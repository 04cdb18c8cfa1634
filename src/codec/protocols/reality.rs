//! REALITY codec
//!
//! REALITY is VLESS with a TLS-handshake-impersonation security layer.
//! Accepted forms:
//! - `reality://uuid@host:port?pbk&sni&sid&spx&fp#name`
//! - `vless://uuid@host:port?security=reality&pbk&sni&sid&spx&fp#name`
//!
//! `sni`, `sid` and `fp` may carry comma-separated lists; the first usable
//! entry wins.

use tracing::{debug, trace};

use crate::codec::validation::{
    ValidationIssue, ValidationReport, check_public_key, check_short_id, is_known_fingerprint,
    is_valid_hostname,
};
use crate::codec::{CodecError, ProtocolCodec, has_scheme};
use crate::config::outbound::{OutboundConfig, RealitySettings, VNextUser};
use crate::record::{
    DEFAULT_FINGERPRINT, DEFAULT_VLESS_ENCRYPTION, DEFAULT_VLESS_FLOW, Network, Protocol,
    ProtocolSettings, RealityParams, Security, ServerRecord,
};

use super::{
    ParsedUri, QueryParams, UriBuilder, effective_flow, mismatch, mismatch_issue, mux_settings,
    network_stream, read_flow, read_mux, read_transport, split_uri, vnext, write_flow,
    write_mux, write_transport,
};

const VLESS_SCHEME: &str = "vless";

/// Flows REALITY servers accept
const SUPPORTED_FLOWS: &[&str] = &["", "xtls-rprx-vision", "xtls-rprx-vision-udp443"];

pub struct RealityCodec;

impl ProtocolCodec for RealityCodec {
    fn protocol(&self) -> Protocol {
        Protocol::Reality
    }

    fn can_parse(&self, uri: &str) -> bool {
        has_scheme(uri, self.scheme())
            || (has_scheme(uri, VLESS_SCHEME)
                && split_uri(uri, VLESS_SCHEME).is_ok_and(|p| is_reality_query(&p.params)))
    }

    fn parse(&self, uri: &str) -> Result<ServerRecord, CodecError> {
        trace!("Parsing REALITY URI");
        let parsed = self.split(uri)?;
        if parsed.credential.is_empty() {
            return Err(CodecError::malformed("REALITY link missing UUID"));
        }

        let params = &parsed.params;
        let reality = RealityParams {
            uuid: parsed.credential.clone(),
            flow: read_flow(params, DEFAULT_VLESS_FLOW),
            public_key: params.string("pbk").unwrap_or_default(),
            short_id: params.list("sid").into_iter().next(),
            sni: pick_server_name(params.list("sni")),
            fingerprint: pick_fingerprint(params.list("fp")),
            spider_x: params.string("spx"),
            transport: read_transport(params),
            mux: read_mux(params),
        };

        Ok(ServerRecord::new(
            parsed.name,
            parsed.host,
            parsed.port,
            ProtocolSettings::Reality(reality),
        ))
    }

    fn validate(&self, record: &ServerRecord) -> ValidationReport {
        let mut report = ValidationReport::new();
        let ProtocolSettings::Reality(params) = &record.settings else {
            report.push(mismatch_issue(Protocol::Reality, record));
            return report;
        };

        report.check_endpoint(record);
        report.check_uuid("uuid", &params.uuid);

        if report.require("public_key", &params.public_key)
            && let Err(reason) = check_public_key(&params.public_key)
        {
            report.push(ValidationIssue::invalid("public_key", reason));
        }

        if report.require("sni", &params.sni) && !is_valid_hostname(&params.sni) {
            report.push(ValidationIssue::invalid("sni", "not a valid hostname"));
        }

        if let Some(short_id) = &params.short_id
            && let Err(reason) = check_short_id(short_id)
        {
            report.push(ValidationIssue::invalid("short_id", reason));
        }

        if !is_known_fingerprint(&params.fingerprint) {
            report.push(ValidationIssue::invalid(
                "fingerprint",
                format!("unknown fingerprint \"{}\"", params.fingerprint),
            ));
        }

        if !SUPPORTED_FLOWS.contains(&params.flow.as_str()) {
            report.push(ValidationIssue::invalid(
                "flow",
                format!("unsupported flow \"{}\"", params.flow),
            ));
        }

        if !matches!(
            params.transport.network,
            Network::Tcp | Network::Grpc | Network::Http
        ) {
            report.push(ValidationIssue::invalid(
                "network",
                "REALITY runs over tcp, grpc or http",
            ));
        }
        report
    }

    fn build_outbound(&self, record: &ServerRecord) -> Result<OutboundConfig, CodecError> {
        let ProtocolSettings::Reality(params) = &record.settings else {
            return Err(mismatch(Protocol::Reality, record));
        };

        let flow = effective_flow(&params.flow, params.transport.network, Security::Reality);
        let user = VNextUser {
            id: params.uuid.clone(),
            encryption: Some(DEFAULT_VLESS_ENCRYPTION.to_string()),
            flow: flow.clone(),
            ..Default::default()
        };

        let mut stream = network_stream(&params.transport, Security::Reality);
        stream.reality_settings = Some(RealitySettings {
            server_name: params.sni.clone(),
            fingerprint: params.fingerprint.clone(),
            public_key: params.public_key.clone(),
            short_id: params.short_id.clone().unwrap_or_default(),
            spider_x: params.spider_x.clone(),
        });

        Ok(OutboundConfig::proxy(Protocol::Reality, Some(vnext(record, user)))
            .with_stream(stream)
            .with_mux(mux_settings(&params.mux, flow.as_deref())))
    }

    fn generate_url(&self, record: &ServerRecord) -> Result<String, CodecError> {
        self.write_link(record, self.scheme())
    }
}

impl RealityCodec {
    /// Emits the interoperable `vless://...&security=reality` form
    pub fn to_vless_url(&self, record: &ServerRecord) -> Result<String, CodecError> {
        self.write_link(record, VLESS_SCHEME)
    }

    fn split(&self, uri: &str) -> Result<ParsedUri, CodecError> {
        if has_scheme(uri, VLESS_SCHEME) {
            let parsed = split_uri(uri, VLESS_SCHEME)?;
            if !is_reality_query(&parsed.params) {
                return Err(CodecError::malformed(
                    "vless link without security=reality is not a REALITY link",
                ));
            }
            return Ok(parsed);
        }
        split_uri(uri, self.scheme())
    }

    fn write_link(&self, record: &ServerRecord, scheme: &str) -> Result<String, CodecError> {
        let ProtocolSettings::Reality(params) = &record.settings else {
            return Err(mismatch(Protocol::Reality, record));
        };

        let mut uri = UriBuilder::new(scheme, record).credential(&params.uuid);
        if scheme == VLESS_SCHEME {
            uri.param("security", Security::Reality.as_str());
        }
        uri.param("pbk", params.public_key.as_str());
        uri.param("sni", params.sni.as_str());
        uri.param_opt("sid", params.short_id.as_deref());
        uri.param_opt("spx", params.spider_x.as_deref());
        uri.param_unless("fp", &params.fingerprint, DEFAULT_FINGERPRINT);
        write_flow(&mut uri, &params.flow, DEFAULT_VLESS_FLOW);
        write_transport(&mut uri, &params.transport);
        write_mux(&mut uri, &params.mux);
        Ok(uri.build())
    }
}

fn is_reality_query(params: &QueryParams) -> bool {
    params
        .get("security")
        .is_some_and(|s| s.eq_ignore_ascii_case("reality"))
}

/// First syntactically valid hostname, else the first entry as given
fn pick_server_name(candidates: Vec<String>) -> String {
    match candidates.iter().find(|c| is_valid_hostname(c)) {
        Some(valid) => valid.clone(),
        None => candidates.into_iter().next().unwrap_or_default(),
    }
}

/// First entry on the fingerprint allow-list, else the default
fn pick_fingerprint(candidates: Vec<String>) -> String {
    candidates
        .into_iter()
        .map(|c| c.to_ascii_lowercase())
        .find(|c| is_known_fingerprint(c))
        .unwrap_or_else(|| {
            debug!("No usable fingerprint in link, using {}", DEFAULT_FINGERPRINT);
            DEFAULT_FINGERPRINT.to_string()
        })
}

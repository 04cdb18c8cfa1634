//! XHTTP codec
//!
//! Format: `xhttp://uuid@host:port?path&security&sni&host&headers&mode#name`.
//! Traffic is disguised as ordinary HTTP requests; security defaults to TLS
//! and the path to `/`.

use tracing::trace;

use crate::codec::validation::{ValidationIssue, ValidationReport};
use crate::codec::{CodecError, ProtocolCodec};
use crate::config::outbound::{OutboundConfig, StreamSettings, VNextUser, XHttpSettings};
use crate::record::{
    DEFAULT_VLESS_ENCRYPTION, DEFAULT_XHTTP_MODE, DEFAULT_XHTTP_PATH, Protocol, ProtocolSettings,
    Security, ServerRecord, XHttpParams,
};

use super::{
    UriBuilder, mismatch, mismatch_issue, mux_settings, read_headers, read_mux, read_tls,
    split_uri, tls_settings, vnext, write_headers, write_mux, write_tls,
};

const SUPPORTED_MODES: &[&str] = &["auto", "packet-up", "stream-up", "stream-one"];

pub struct XHttpCodec;

impl ProtocolCodec for XHttpCodec {
    fn protocol(&self) -> Protocol {
        Protocol::XHttp
    }

    fn parse(&self, uri: &str) -> Result<ServerRecord, CodecError> {
        trace!("Parsing XHTTP URI");
        let parsed = split_uri(uri, self.scheme())?;
        if parsed.credential.is_empty() {
            return Err(CodecError::malformed("XHTTP link missing UUID"));
        }

        let params = &parsed.params;
        let xhttp = XHttpParams {
            uuid: parsed.credential.clone(),
            path: params.get("path").unwrap_or(DEFAULT_XHTTP_PATH).to_string(),
            host: params.string("host"),
            headers: read_headers(params.get("headers")),
            mode: params.get("mode").unwrap_or(DEFAULT_XHTTP_MODE).to_string(),
            tls: read_tls(params, Security::Tls),
            mux: read_mux(params),
        };

        Ok(ServerRecord::new(
            parsed.name,
            parsed.host,
            parsed.port,
            ProtocolSettings::XHttp(xhttp),
        ))
    }

    fn validate(&self, record: &ServerRecord) -> ValidationReport {
        let mut report = ValidationReport::new();
        let ProtocolSettings::XHttp(params) = &record.settings else {
            report.push(mismatch_issue(Protocol::XHttp, record));
            return report;
        };

        report.check_endpoint(record);
        report.check_uuid("uuid", &params.uuid);
        if !params.path.starts_with('/') {
            report.push(ValidationIssue::invalid("path", "must start with '/'"));
        }
        if !SUPPORTED_MODES.contains(&params.mode.as_str()) {
            report.push(ValidationIssue::invalid(
                "mode",
                format!("expected one of {}", SUPPORTED_MODES.join(", ")),
            ));
        }
        match params.tls.security {
            Security::Tls => report.recommend("sni", params.tls.sni.as_deref()),
            Security::Reality => report.push(ValidationIssue::invalid(
                "security",
                "use a reality record for REALITY servers",
            )),
            Security::None => {}
        }
        report
    }

    fn build_outbound(&self, record: &ServerRecord) -> Result<OutboundConfig, CodecError> {
        let ProtocolSettings::XHttp(params) = &record.settings else {
            return Err(mismatch(Protocol::XHttp, record));
        };

        let user = VNextUser {
            id: params.uuid.clone(),
            encryption: Some(DEFAULT_VLESS_ENCRYPTION.to_string()),
            ..Default::default()
        };

        let mut stream = StreamSettings::new("xhttp", params.tls.security.as_str());
        stream.xhttp_settings = Some(XHttpSettings {
            path: params.path.clone(),
            host: params.host.clone(),
            mode: params.mode.clone(),
            headers: params.headers.clone(),
        });
        if params.tls.security == Security::Tls {
            stream.tls_settings = Some(tls_settings(
                &params.tls,
                params.host.as_deref(),
                &record.host,
            ));
        }

        Ok(OutboundConfig::proxy(Protocol::XHttp, Some(vnext(record, user)))
            .with_stream(stream)
            .with_mux(mux_settings(&params.mux, None)))
    }

    fn generate_url(&self, record: &ServerRecord) -> Result<String, CodecError> {
        let ProtocolSettings::XHttp(params) = &record.settings else {
            return Err(mismatch(Protocol::XHttp, record));
        };

        let mut uri = UriBuilder::new(self.scheme(), record).credential(&params.uuid);
        uri.param_unless("path", &params.path, DEFAULT_XHTTP_PATH);
        uri.param_opt("host", params.host.as_deref());
        uri.param_unless("mode", &params.mode, DEFAULT_XHTTP_MODE);
        write_headers(&mut uri, &params.headers);
        write_tls(&mut uri, &params.tls, Security::Tls);
        write_mux(&mut uri, &params.mux);
        Ok(uri.build())
    }
}

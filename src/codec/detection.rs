//! Subscription format detection
//!
//! A subscription body is either a plain list of share links (one per line)
//! or the same list base64 encoded as a whole.

use tracing::debug;

use super::base64::decode_base64;
use crate::record::Protocol;

// ============================================================================
// Subscription Type Detection
// ============================================================================

/// Detected subscription content type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionType {
    /// Base64 encoded link list
    Base64UriList,
    /// Plain text link list (one link per line)
    PlainUriList,
    /// Unknown format
    Unknown,
}

impl std::fmt::Display for SubscriptionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            SubscriptionType::Base64UriList => "base64 link list",
            SubscriptionType::PlainUriList => "plain link list",
            SubscriptionType::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

/// Classifies a subscription body
pub fn detect_subscription_type(content: &str) -> SubscriptionType {
    let body = content.trim();
    let kind = if is_plain_uri_list(body) {
        SubscriptionType::PlainUriList
    } else if is_base64_content(body) {
        SubscriptionType::Base64UriList
    } else {
        SubscriptionType::Unknown
    };

    debug!("Subscription body of {} bytes detected as {}", content.len(), kind);
    kind
}

/// True when the first non-blank, non-comment line is a share link
pub fn is_plain_uri_list(content: &str) -> bool {
    first_link_line(content).is_some_and(is_proxy_uri)
}

fn first_link_line(content: &str) -> Option<&str> {
    content
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with('#'))
}

/// True when `s` starts with the scheme of a supported protocol, in any case
pub fn is_proxy_uri(s: &str) -> bool {
    s.split_once("://").is_some_and(|(scheme, _)| {
        Protocol::ALL
            .iter()
            .any(|p| p.scheme().eq_ignore_ascii_case(scheme))
    })
}

/// True when the whole body is base64 and decodes to at least one share link
pub fn is_base64_content(content: &str) -> bool {
    let compact: String = content.split_whitespace().collect();
    let alphabet_only = compact
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b"+/=-_".contains(&b));
    if compact.len() < 4 || !alphabet_only {
        return false;
    }

    decode_base64(&compact)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .is_some_and(|text| text.lines().any(|line| is_proxy_uri(line.trim())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;

    #[test]
    fn test_detect_plain_uri_list() {
        let content = "ss://YWVzLTI1Ni1nY206cGFzc3dvcmQ@example.com:8388#tag\nvmess://...";
        assert_eq!(
            detect_subscription_type(content),
            SubscriptionType::PlainUriList
        );
    }

    #[test]
    fn test_detect_plain_uri_list_after_comment() {
        let content = "# provider list\n\nhysteria://example.com:443?auth=x";
        assert_eq!(
            detect_subscription_type(content),
            SubscriptionType::PlainUriList
        );
    }

    #[test]
    fn test_detect_base64_list() {
        let encoded = STANDARD.encode("reality://id@host:443?pbk=k&sni=a.com\n");
        assert_eq!(
            detect_subscription_type(&encoded),
            SubscriptionType::Base64UriList
        );
    }

    #[test]
    fn test_detect_unknown() {
        assert_eq!(
            detect_subscription_type("proxies:\n  - name: test"),
            SubscriptionType::Unknown
        );
        assert_eq!(detect_subscription_type(""), SubscriptionType::Unknown);
    }

    #[test]
    fn test_is_proxy_uri() {
        assert!(is_proxy_uri("vless://uuid@host:443"));
        assert!(is_proxy_uri("XHTTP://uuid@host:443"));
        assert!(is_proxy_uri("hysteria://host:443"));
        assert!(is_proxy_uri("SS://abc@host:8388"));
        assert!(!is_proxy_uri("hysteria2://host:443"));
        assert!(!is_proxy_uri("ftp://example.com"));
        assert!(!is_proxy_uri("not a uri"));
    }

    #[test]
    fn test_subscription_type_display() {
        assert_eq!(
            SubscriptionType::Base64UriList.to_string(),
            "base64 link list"
        );
        assert_eq!(SubscriptionType::Unknown.to_string(), "unknown");
    }
}

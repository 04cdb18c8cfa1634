//! Serde helpers shared by the outbound document and stored records.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer};

/// `skip_serializing_if` predicate for flags that default to off.
#[inline]
pub fn is_false(b: &bool) -> bool {
    !*b
}

/// Accepts `"h2"` as well as `["h2", "http/1.1"]`. An empty string is an
/// empty list.
pub fn string_or_vec<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) if s.is_empty() => Vec::new(),
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}

/// A number that share-link JSON may quote, e.g. `"port": "443"`.
#[derive(Deserialize)]
#[serde(untagged)]
enum QuotedU16 {
    Bare(u16),
    Quoted(String),
}

impl QuotedU16 {
    fn into_option<E: serde::de::Error>(self) -> Result<Option<u16>, E> {
        match self {
            QuotedU16::Bare(n) => Ok(Some(n)),
            QuotedU16::Quoted(s) if s.trim().is_empty() => Ok(None),
            QuotedU16::Quoted(s) => s.trim().parse().map(Some).map_err(E::custom),
        }
    }
}

/// Port given as a number or a numeric string.
pub fn lenient_port<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    QuotedU16::deserialize(deserializer)?
        .into_option()?
        .ok_or_else(|| D::Error::custom("empty port"))
}

/// Optional u16; null and `""` both mean absent.
pub fn lenient_option_u16<'de, D>(deserializer: D) -> Result<Option<u16>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<QuotedU16>::deserialize(deserializer)? {
        Some(value) => value.into_option(),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Alpn {
        #[serde(default, deserialize_with = "super::string_or_vec")]
        alpn: Vec<String>,
    }

    #[derive(Deserialize)]
    struct Port {
        #[serde(deserialize_with = "super::lenient_port")]
        port: u16,
    }

    #[derive(Deserialize)]
    struct AlterId {
        #[serde(default, deserialize_with = "super::lenient_option_u16")]
        aid: Option<u16>,
    }

    fn alpn(json: &str) -> Vec<String> {
        serde_json::from_str::<Alpn>(json).unwrap().alpn
    }

    fn aid(json: &str) -> Option<u16> {
        serde_json::from_str::<AlterId>(json).unwrap().aid
    }

    #[test]
    fn test_is_false() {
        assert!(is_false(&false));
        assert!(!is_false(&true));
    }

    #[test]
    fn test_string_or_vec() {
        assert_eq!(alpn(r#"{"alpn": "h2"}"#), vec!["h2"]);
        assert_eq!(alpn(r#"{"alpn": ["h2", "http/1.1"]}"#), vec!["h2", "http/1.1"]);
        assert!(alpn(r#"{"alpn": ""}"#).is_empty());
        assert!(alpn("{}").is_empty());
    }

    #[test]
    fn test_lenient_port() {
        let bare: Port = serde_json::from_str(r#"{"port": 443}"#).unwrap();
        let quoted: Port = serde_json::from_str(r#"{"port": " 8443 "}"#).unwrap();
        assert_eq!(bare.port, 443);
        assert_eq!(quoted.port, 8443);
        assert!(serde_json::from_str::<Port>(r#"{"port": "abc"}"#).is_err());
        assert!(serde_json::from_str::<Port>(r#"{"port": ""}"#).is_err());
        assert!(serde_json::from_str::<Port>(r#"{"port": 70000}"#).is_err());
    }

    #[test]
    fn test_lenient_option_u16() {
        assert_eq!(aid(r#"{"aid": "4"}"#), Some(4));
        assert_eq!(aid(r#"{"aid": 0}"#), Some(0));
        assert_eq!(aid(r#"{"aid": ""}"#), None);
        assert_eq!(aid(r#"{"aid": null}"#), None);
        assert_eq!(aid("{}"), None);
    }
}

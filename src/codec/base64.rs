//! Base64 helpers
//!
//! Subscription bodies, legacy VMess links and Shadowsocks userinfo arrive in
//! any of the common base64 variants, wrapped across lines and with or
//! without padding. Free-text query values may also be base64 encoded by
//! some providers; those are decoded opportunistically and never fail a parse.

use std::borrow::Cow;

use anyhow::{Context, Result, bail};
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use tracing::trace;

/// Decodes base64 in any of the common alphabets, ignoring whitespace and
/// padding.
pub fn decode_base64(content: &str) -> Result<Vec<u8>> {
    let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
    let unpadded = compact.trim_end_matches('=');

    for (name, engine) in [("standard", &STANDARD_NO_PAD), ("url-safe", &URL_SAFE_NO_PAD)] {
        if let Ok(decoded) = engine.decode(unpadded) {
            trace!("Decoded {} bytes of {} base64", decoded.len(), name);
            return Ok(decoded);
        }
    }
    bail!("Content is not valid base64")
}

/// Decodes base64 content that must be UTF-8 text.
pub fn decode_base64_text(content: &str) -> Result<String> {
    let decoded = decode_base64(content)?;
    String::from_utf8(decoded).context("Decoded base64 content is not valid UTF-8")
}

/// Decodes subscription content when it is a base64 URI list; other content
/// is returned unchanged.
pub fn decode_subscription_content(content: &str) -> Result<String> {
    use super::detection::{SubscriptionType, detect_subscription_type};

    match detect_subscription_type(content) {
        SubscriptionType::Base64UriList => decode_base64_text(content.trim()),
        _ => Ok(content.to_string()),
    }
}

fn in_base64_alphabet(value: &str) -> bool {
    value.len() >= 4
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '=' | '-' | '_'))
}

fn decoded_text(value: &str) -> Option<String> {
    if !in_base64_alphabet(value) {
        return None;
    }
    let text = decode_base64_text(value).ok()?;
    if text.is_empty() || text.chars().any(char::is_control) {
        return None;
    }
    Some(text)
}

/// Returns the decoded text when `value` looks base64 encoded, else `value`.
pub fn decode_opportunistic(value: &str) -> Cow<'_, str> {
    match decoded_text(value) {
        Some(text) => {
            trace!("Opportunistically decoded base64 value");
            Cow::Owned(text)
        }
        None => Cow::Borrowed(value),
    }
}

/// Inverse of [`decode_opportunistic`]: encodes `value` only when its raw form
/// would be mistaken for base64 on the way back in.
pub fn encode_if_ambiguous(value: &str) -> Cow<'_, str> {
    if decoded_text(value).is_some() {
        Cow::Owned(STANDARD.encode(value))
    } else {
        Cow::Borrowed(value)
    }
}

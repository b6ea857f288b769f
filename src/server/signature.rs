//! Webhook signature validation (Twilio convention).
//!
//! The provider signs each request with HMAC-SHA1 over the full request URL
//! followed by every form parameter, sorted alphabetically, concatenated as
//! `key` then `value`. The digest is base64-encoded and shipped in the
//! `X-Twilio-Signature` header. Comparison is constant-time.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use subtle::ConstantTimeEq;

type HmacSha1 = Hmac<Sha1>;

/// Compute the expected signature for `url` and the sorted form parameters.
pub fn compute_signature(auth_token: &str, url: &str, params: &BTreeMap<String, String>) -> String {
    let mut data = String::from(url);
    for (key, value) in params {
        data.push_str(key);
        data.push_str(value);
    }
    // HMAC accepts keys of any length, so this cannot fail.
    let mut mac = match HmacSha1::new_from_slice(auth_token.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(data.as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}

/// Constant-time check of a provided signature.
pub fn validate_signature(
    auth_token: &str,
    url: &str,
    params: &BTreeMap<String, String>,
    provided: &str,
) -> bool {
    let expected = compute_signature(auth_token, url, params);
    expected.as_bytes().ct_eq(provided.as_bytes()).into()
}

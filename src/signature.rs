//! Request signing for both directions of the Graph API.
//!
//! Inbound deliveries carry an `X-Hub-Signature` header of the form
//! `sha1=<hex>`, an HMAC-SHA1 of the raw body keyed by the app secret.
//! Outbound calls carry an `appsecret_proof`, an HMAC-SHA256 of the access
//! token keyed by the same secret.

use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;

type HmacSha1 = Hmac<Sha1>;
type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_PREFIX: &str = "sha1=";

/// Parses a `sha1=<hex>` header into the raw digest bytes.
///
/// Returns `None` for headers shorter than the prefix plus one hex digit,
/// headers without the prefix, and suffixes that are not valid hex.
pub fn parse_signature_header(header: &str) -> Option<Vec<u8>> {
    if header.len() <= SIGNATURE_PREFIX.len() {
        return None;
    }
    let hex_sig = header.strip_prefix(SIGNATURE_PREFIX)?;
    hex::decode(hex_sig).ok()
}

/// Computes the HMAC-SHA1 of `payload` keyed by `secret`.
pub fn compute_signature(payload: &[u8], secret: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha1::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

/// Formats a digest as an `X-Hub-Signature` header value.
pub fn format_signature_header(signature: &[u8]) -> String {
    format!("{}{}", SIGNATURE_PREFIX, hex::encode(signature))
}

/// Checks that `payload` was signed by the platform.
///
/// A missing or malformed header is simply not authentic. The digest
/// comparison is constant-time.
pub fn verify_signature(payload: &[u8], signature_header: Option<&str>, secret: &[u8]) -> bool {
    let Some(expected) = signature_header.and_then(parse_signature_header) else {
        return false;
    };

    let Ok(mut mac) = HmacSha1::new_from_slice(secret) else {
        return false;
    };
    mac.update(payload);

    mac.verify_slice(&expected).is_ok()
}

/// Computes the `appsecret_proof` sent alongside the access token.
///
/// See <https://developers.facebook.com/docs/graph-api/securing-requests/#appsecret_proof>
pub fn app_secret_proof(secret: &str, token: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(token.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

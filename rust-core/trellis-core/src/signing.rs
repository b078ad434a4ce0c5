//! # Signed Values
//!
//! Tamper-evident encoding used by signed cookies:
//!
//! ```text
//! base64(HMAC-SHA512(secret, json)) "@|" base64(json)
//! ```
//!
//! The separator contains `@` and `|`, neither of which the standard base64
//! alphabet can produce, so splitting on its first occurrence is unambiguous.
//! Verification failures of any kind read as "absent", never as an error.

use crate::error::Result;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::Sha512;
use subtle::ConstantTimeEq;

type HmacSha512 = Hmac<Sha512>;

/// Separator between the signature and the payload
pub const SIGN_SEPARATOR: &str = "@|";

fn digest(payload: &[u8], secret: &str) -> Vec<u8> {
    // HMAC accepts keys of any length; `new_from_slice` cannot fail here.
    let mut mac = match HmacSha512::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return Vec::new(),
    };
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

/// Serialize `value` to JSON and sign it with `secret`
///
/// # Errors
///
/// Returns `Error::Json` if the value cannot be serialized.
pub fn wrap<T: Serialize + ?Sized>(value: &T, secret: &str) -> Result<String> {
    let payload = serde_json::to_vec(value)?;
    let signature = digest(&payload, secret);
    Ok(format!(
        "{}{SIGN_SEPARATOR}{}",
        BASE64.encode(signature),
        BASE64.encode(&payload)
    ))
}

/// Verify and decode a value produced by [`wrap`]
///
/// Returns `None` when the separator is missing, either half is not valid
/// base64, the signature does not match, or the payload does not decode
/// into `T`.
#[must_use]
pub fn unwrap<T: DeserializeOwned>(signed: &str, secret: &str) -> Option<T> {
    let (sig_b64, payload_b64) = signed.split_once(SIGN_SEPARATOR)?;
    let signature = BASE64.decode(sig_b64).ok()?;
    let payload = BASE64.decode(payload_b64).ok()?;

    let expected = digest(&payload, secret);
    if expected.is_empty() || !bool::from(signature.ct_eq(&expected)) {
        return None;
    }
    serde_json::from_slice(&payload).ok()
}

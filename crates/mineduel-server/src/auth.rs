use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::config::AdminConfig;

type HmacSha256 = Hmac<Sha256>;

/// Admin bearer tokens are valid for 24 hours.
pub const TOKEN_TTL_MS: i64 = 24 * 60 * 60 * 1000;

/// Check a login attempt against the configured credential. A missing
/// password disables the admin surface entirely.
pub fn check_credentials(config: &AdminConfig, username: &str, password: &str) -> bool {
    let Some(ref expected) = config.password else {
        return false;
    };
    username == config.username && constant_time_eq(password, expected)
}

/// Mint a signed bearer token: `{username}.{expires_ms}.{hex hmac}`.
pub fn issue_token(secret: &str, username: &str, now_ms: i64) -> String {
    let expires = now_ms + TOKEN_TTL_MS;
    let payload = format!("{username}.{expires}");
    format!("{payload}.{}", sign(secret, &payload))
}

/// Verify a bearer token's signature and expiry.
pub fn verify_token(secret: &str, token: &str, now_ms: i64) -> bool {
    let mut parts = token.rsplitn(3, '.');
    let (Some(sig_hex), Some(expires_str), Some(username)) =
        (parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    let Ok(expires) = expires_str.parse::<i64>() else {
        return false;
    };
    if now_ms >= expires {
        return false;
    }

    let Ok(expected) = hex::decode(sig_hex) else {
        return false;
    };
    let payload = format!("{username}.{expires}");
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload.as_bytes());
    mac.verify_slice(&expected).is_ok()
}

fn sign(secret: &str, payload: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

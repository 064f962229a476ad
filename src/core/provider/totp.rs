//! RFC-6238 time-based one-time passwords for the 2-step broker login.

use std::time::{SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::error::{Error, Result};

type HmacSha1 = Hmac<Sha1>;

const STEP_SECONDS: u64 = 30;
const DIGITS: u32 = 6;

/// Current 6-digit TOTP for a base32-encoded secret (SHA-1, 30 s step).
pub(crate) fn totp_now(secret: &str) -> Result<String> {
    let key = base32_decode(secret)
        .ok_or_else(|| Error::Auth("TOTP secret is not valid base32".to_string()))?;
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0);
    Ok(hotp(&key, now / STEP_SECONDS))
}

/// RFC-4226 HOTP with dynamic truncation.
fn hotp(key: &[u8], counter: u64) -> String {
    let mut mac = HmacSha1::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let code = u32::from_be_bytes([
        digest[offset] & 0x7f,
        digest[offset + 1],
        digest[offset + 2],
        digest[offset + 3],
    ]);
    format!("{:01$}", code % 10u32.pow(DIGITS), DIGITS as usize)
}

/// RFC-4648 base32 decode, case-insensitive, padding and whitespace ignored.
fn base32_decode(input: &str) -> Option<Vec<u8>> {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

    let mut bits: u32 = 0;
    let mut bit_count: u32 = 0;
    let mut output = Vec::with_capacity(input.len() * 5 / 8);

    for c in input.chars() {
        if c == '=' || c.is_whitespace() {
            continue;
        }
        let index = ALPHABET
            .iter()
            .position(|&a| a == c.to_ascii_uppercase() as u8)?;
        bits = (bits << 5) | index as u32;
        bit_count += 5;
        if bit_count >= 8 {
            bit_count -= 8;
            output.push((bits >> bit_count) as u8);
        }
    }

    if output.is_empty() {
        return None;
    }
    Some(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 4226 / 6238 reference secret: ASCII "12345678901234567890".
    const SECRET_B32: &str = "GEZDGNBVGEZDGNBVGEZDGNBV";

    #[test]
    fn base32_decodes_reference_secret() {
        assert_eq!(
            base32_decode(SECRET_B32).unwrap(),
            b"12345678901234567890".to_vec()
        );
    }

    #[test]
    fn base32_is_case_insensitive_and_ignores_padding() {
        assert_eq!(
            base32_decode("gezdgnbvgezdgnbvgezdgnbv======").unwrap(),
            b"12345678901234567890".to_vec()
        );
    }

    #[test]
    fn base32_rejects_invalid_characters() {
        assert!(base32_decode("not base32!").is_none());
        assert!(base32_decode("").is_none());
    }

    #[test]
    fn hotp_matches_rfc4226_vectors() {
        let key = b"12345678901234567890";
        assert_eq!(hotp(key, 0), "755224");
        assert_eq!(hotp(key, 1), "287082");
        assert_eq!(hotp(key, 9), "520489");
    }

    #[test]
    fn totp_now_rejects_garbage_secret() {
        assert!(totp_now("!!!").is_err());
    }

    #[test]
    fn totp_now_produces_six_digits() {
        let code = totp_now(SECRET_B32).unwrap();
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
    }
}

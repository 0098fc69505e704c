//! Signed visit tokens carried in the `/start` deep link.
//!
//! A token is `visit_<VISIT_ID>_<SIGNATURE>` where the signature is the
//! lowercase hex HMAC-SHA256 of the visit id. Nothing is stored for a token
//! until a guest actually presents it.
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const VISIT_PREFIX: &str = "visit_";

#[derive(Error, Debug)]
pub enum TokenError {
    #[error("secret key rejected by hmac")]
    InvalidKey,
}

pub fn sign(visit_id: &str, secret: &[u8]) -> Result<String, TokenError> {
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| TokenError::InvalidKey)?;
    mac.update(visit_id.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time check of a candidate signature. Upper-case hex is accepted.
pub fn verify(visit_id: &str, candidate: &str, secret: &[u8]) -> bool {
    let Ok(sig_bytes) = hex::decode(candidate.to_lowercase()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(visit_id.as_bytes());
    mac.verify_slice(&sig_bytes).is_ok()
}

/// Extracts a verified visit id from a `/start` payload.
///
/// Malformed and forged payloads both yield `None`.
pub fn parse_start_payload(payload: &str, secret: &[u8]) -> Option<String> {
    let payload = payload.trim();
    if !payload.starts_with(VISIT_PREFIX) {
        return None;
    }
    let (_, rest) = payload.split_once(VISIT_PREFIX)?;
    let mut parts = rest.split('_');
    let visit_id = parts.next().filter(|id| !id.is_empty())?;
    let signature = parts.next().unwrap_or("");

    if verify(visit_id, signature, secret) {
        Some(visit_id.to_string())
    } else {
        None
    }
}

pub fn start_payload(visit_id: &str, secret: &[u8]) -> Result<String, TokenError> {
    Ok(format!("{VISIT_PREFIX}{visit_id}_{}", sign(visit_id, secret)?))
}

pub fn deep_link(bot_username: &str, visit_id: &str, secret: &[u8]) -> Result<String, TokenError> {
    Ok(format!(
        "https://t.me/{}?start={}",
        bot_username.trim_start_matches('@'),
        start_payload(visit_id, secret)?
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"s3cret";

    #[test]
    fn test_signature_is_lowercase_hex_sha256() {
        let sig = sign("abc123", SECRET).unwrap();
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
        assert_eq!(sig, sign("abc123", SECRET).unwrap());
    }

    #[test]
    fn test_known_signature() {
        assert_eq!(
            sign("abc123", SECRET).unwrap(),
            "c769096b4d5745c128ffb221dc2e2d5cb38b4a1cae423cf413b12cbef730bc57"
        );
    }

    #[test]
    fn test_verify_accepts_own_signature_and_rejects_other_secret() {
        let sig = sign("abc123", SECRET).unwrap();
        assert!(verify("abc123", &sig, SECRET));
        assert!(verify("abc123", &sig.to_uppercase(), SECRET));
        assert!(!verify("abc123", &sig, b"other"));
        assert!(!verify("abc124", &sig, SECRET));
    }

    #[test]
    fn test_any_single_bit_flip_breaks_verification() {
        let sig = sign("table-7-2024", SECRET).unwrap();
        let bytes = hex::decode(&sig).unwrap();
        for byte in 0..bytes.len() {
            for bit in 0..8 {
                let mut mutated = bytes.clone();
                mutated[byte] ^= 1 << bit;
                assert!(!verify("table-7-2024", &hex::encode(&mutated), SECRET));
            }
        }
    }

    #[test]
    fn test_verify_rejects_garbage() {
        assert!(!verify("abc123", "", SECRET));
        assert!(!verify("abc123", "zz", SECRET));
        assert!(!verify("abc123", "abc", SECRET));
    }

    #[test]
    fn test_parses_valid_payload() {
        let payload = start_payload("A1B2", SECRET).unwrap();
        assert_eq!(parse_start_payload(&payload, SECRET).as_deref(), Some("A1B2"));
    }

    #[test]
    fn test_malformed_and_forged_payloads_are_rejected() {
        assert_eq!(parse_start_payload("", SECRET), None);
        assert_eq!(parse_start_payload("hello", SECRET), None);
        assert_eq!(parse_start_payload("visit_", SECRET), None);
        assert_eq!(parse_start_payload("visit_A1B2", SECRET), None);
        assert_eq!(parse_start_payload("visit_A1B2_deadbeef", SECRET), None);

        let forged = format!("visit_A1B2_{}", sign("A1B2", b"wrong").unwrap());
        assert_eq!(parse_start_payload(&forged, SECRET), None);
    }

    #[test]
    fn test_deep_link_strips_at_sign() {
        let link = deep_link("@ribambel_bot", "A1", SECRET).unwrap();
        assert!(link.starts_with("https://t.me/ribambel_bot?start=visit_A1_"));
    }
}

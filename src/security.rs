//! Credential generation: join codes and email deep-link tokens.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use sha2::{Digest, Sha256};

/// Alphanumerics minus the look-alikes (0/O, 1/I/l). 57 symbols at 12
/// characters is ~70 bits, comfortably past the 62-bit floor the
/// rate-limit window is sized against.
const CODE_CHARSET: &[u8] =
    b"ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz23456789";

pub const JOIN_CODE_LEN: usize = 12;

/// Generate a human-typeable join code.
///
/// `rand::rng()` is OS-seeded and cryptographically secure; a time-seeded
/// generator here would be a correctness bug, not a style choice.
pub fn generate_join_code() -> String {
    let mut rng = rand::rng();
    (0..JOIN_CODE_LEN)
        .map(|_| {
            let idx = rng.random_range(0..CODE_CHARSET.len());
            CODE_CHARSET[idx] as char
        })
        .collect()
}

/// Generate the email deep-link token: 32 random bytes, URL-safe base64.
/// Independent of the join code so leaking one says nothing about the
/// other.
pub fn generate_token() -> String {
    let mut rng = rand::rng();
    let mut bytes = [0u8; 32];
    rng.fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Fingerprint stored at rest in place of the raw token.
pub fn token_fingerprint(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn join_code_shape() {
        let code = generate_join_code();
        assert_eq!(code.len(), JOIN_CODE_LEN);
        for c in code.bytes() {
            assert!(CODE_CHARSET.contains(&c), "unexpected char {}", c as char);
        }
    }

    #[test]
    fn join_code_avoids_ambiguous_chars() {
        for c in [b'0', b'O', b'1', b'I', b'l'] {
            assert!(!CODE_CHARSET.contains(&c));
        }
    }

    #[test]
    fn join_codes_are_distinct() {
        let codes: HashSet<String> = (0..1000).map(|_| generate_join_code()).collect();
        assert_eq!(codes.len(), 1000);
    }

    #[test]
    fn token_is_long_and_url_safe() {
        let token = generate_token();
        // 32 bytes -> 43 base64url chars, no padding
        assert_eq!(token.len(), 43);
        assert!(!token.contains('+'));
        assert!(!token.contains('/'));
        assert!(!token.contains('='));
    }

    #[test]
    fn fingerprint_is_stable_and_distinct() {
        let token = generate_token();
        assert_eq!(token_fingerprint(&token), token_fingerprint(&token));
        assert_ne!(token_fingerprint(&token), token_fingerprint("other"));
        assert_eq!(token_fingerprint(&token).len(), 64);
    }
}

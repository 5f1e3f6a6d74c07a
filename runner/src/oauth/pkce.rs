//! PKCE (RFC 7636) S256 challenge verification.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};

/// `code_verifier`: 43-128 chars, `[A-Za-z0-9\-._~]`.
pub fn is_valid_code_verifier(verifier: &str) -> bool {
    (43..=128).contains(&verifier.len())
        && verifier.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~'))
}

/// `code_challenge`: 43-character base64url, `[A-Za-z0-9\-_]`.
pub fn is_valid_code_challenge(challenge: &str) -> bool {
    challenge.len() == 43 && challenge.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
}

fn compute_challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

/// `BASE64URL(SHA256(code_verifier)) == code_challenge`, compared in
/// constant time to avoid leaking challenge bytes through timing.
pub fn verify(code_verifier: &str, code_challenge: &str) -> bool {
    let computed = compute_challenge(code_verifier);
    constant_time_eq(computed.as_bytes(), code_challenge.as_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_matches_known_pair() {
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        let challenge = compute_challenge(verifier);
        assert!(verify(verifier, &challenge));
    }

    #[test]
    fn verify_rejects_mismatched_challenge() {
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        assert!(!verify(verifier, "not-the-right-challenge-at-all-xxxxxxxxxxx"));
    }

    #[test]
    fn code_verifier_length_bounds_enforced() {
        assert!(!is_valid_code_verifier(&"a".repeat(42)));
        assert!(is_valid_code_verifier(&"a".repeat(43)));
        assert!(is_valid_code_verifier(&"a".repeat(128)));
        assert!(!is_valid_code_verifier(&"a".repeat(129)));
    }

    #[test]
    fn code_verifier_rejects_disallowed_characters() {
        assert!(!is_valid_code_verifier(&format!("{}{}", "a".repeat(42), "!")));
    }

    #[test]
    fn code_challenge_must_be_exactly_43_chars() {
        assert!(is_valid_code_challenge(&"a".repeat(43)));
        assert!(!is_valid_code_challenge(&"a".repeat(44)));
    }
}

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::errors::{AuthError, Result};

/// Random bytes behind each state token (256 bits)
const STATE_BYTES: usize = 32;

/// Generate an unguessable, URL-safe state token from the OS CSPRNG.
///
/// 32 random bytes encode to a 43-character base64url string.
pub fn generate_state_token() -> Result<String> {
    let mut bytes = [0u8; STATE_BYTES];
    getrandom::fill(&mut bytes).map_err(|e| AuthError::Entropy(e.to_string()))?;
    let token = URL_SAFE_NO_PAD.encode(bytes);
    bytes.zeroize();
    Ok(token)
}

/// Compare a presented state against the expected one without short-circuiting
/// on the first differing byte.
pub fn state_matches(expected: &str, presented: &str) -> bool {
    bool::from(expected.as_bytes().ct_eq(presented.as_bytes()))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_state_token_length_and_alphabet() {
        let token = generate_state_token().unwrap();
        assert_eq!(token.len(), 43);
        assert!(
            token
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
            "state should be URL-safe: {}",
            token
        );
    }

    #[test]
    fn test_state_tokens_do_not_repeat() {
        let tokens: HashSet<String> = (0..256).map(|_| generate_state_token().unwrap()).collect();
        assert_eq!(tokens.len(), 256);
    }

    #[test]
    fn test_state_matches() {
        assert!(state_matches("abc", "abc"));
        assert!(!state_matches("abc", "abd"));
        assert!(!state_matches("abc", "abcd"));
        assert!(!state_matches("abc", ""));
        assert!(!state_matches("", "abc"));
    }

    #[test]
    fn test_generated_state_matches_only_itself() {
        let token = generate_state_token().unwrap();
        let other = generate_state_token().unwrap();
        assert!(state_matches(&token, &token.clone()));
        assert!(!state_matches(&token, &other));
        assert!(!state_matches(&token, &token[..42]));
    }
}

use base64::{Engine as _, engine::general_purpose};
use rand::RngCore;
use rand::rngs::OsRng;
use subtle::ConstantTimeEq;

/// The size of the CSRF token in bytes.
const CSRF_TOKEN_SIZE: usize = 32;

/// Name of the readable cookie the browser echoes back in `x-csrf-token`.
pub const CSRF_COOKIE: &str = "csrf_token";

/// Header carrying the echoed token.
pub const CSRF_HEADER: &str = "x-csrf-token";

/// Redis key under which a token is registered.
pub fn registry_key(token: &str) -> String {
    format!("csrf:{}", token)
}

/// Generates a new random CSRF token.
///
/// # Returns
///
/// A URL-safe base64-encoded CSRF token.
pub fn generate_csrf_token() -> String {
    let mut token = [0u8; CSRF_TOKEN_SIZE];
    OsRng.fill_bytes(&mut token);

    general_purpose::URL_SAFE_NO_PAD.encode(token)
}

/// Compares the cookie and header copies in constant time.
pub fn tokens_match(cookie: &str, header: &str) -> bool {
    cookie.len() == header.len() && bool::from(cookie.as_bytes().ct_eq(header.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_url_safe_and_unique() {
        let a = generate_csrf_token();
        let b = generate_csrf_token();

        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn comparison_requires_exact_match() {
        let token = generate_csrf_token();
        assert!(tokens_match(&token, &token.clone()));
        assert!(!tokens_match(&token, &token[..token.len() - 1]));
        assert!(!tokens_match(&token, &generate_csrf_token()));
    }
}

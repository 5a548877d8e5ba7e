//! Boundary validation for connection parameters.
//!
//! Every inbound connection must present ids that pass these checks before
//! any session state is created; failures close the socket with 1008.

/// Longest accepted vault id.
pub const MAX_VAULT_ID_LEN: usize = 128;

/// Longest accepted user id.
pub const MAX_USER_ID_LEN: usize = 64;

/// User id applied when the client sends none.
pub const DEFAULT_USER_ID: &str = "anonymous";

/// Validate a vault id: 1..=128 chars of `[A-Za-z0-9_-]`.
pub fn valid_vault_id(vault_id: &str) -> bool {
    !vault_id.is_empty()
        && vault_id.len() <= MAX_VAULT_ID_LEN
        && vault_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Validate a user id: 1..=64 chars of `[A-Za-z0-9_.@-]`.
pub fn valid_user_id(user_id: &str) -> bool {
    !user_id.is_empty()
        && user_id.len() <= MAX_USER_ID_LEN
        && user_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '@' | '-'))
}

/// Constant-time token comparison. Always examines every byte of both
/// inputs so timing reveals nothing about a prefix match.
pub fn token_matches(expected: &str, presented: &str) -> bool {
    let expected = expected.as_bytes();
    let presented = presented.as_bytes();

    let mut diff = expected.len() ^ presented.len();
    for i in 0..expected.len().max(presented.len()) {
        let a = expected.get(i).copied().unwrap_or(0);
        let b = presented.get(i).copied().unwrap_or(0);
        diff |= (a ^ b) as usize;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vault_id_format() {
        assert!(valid_vault_id("team-vault_01"));
        assert!(valid_vault_id(&"a".repeat(MAX_VAULT_ID_LEN)));

        assert!(!valid_vault_id(""));
        assert!(!valid_vault_id(&"a".repeat(MAX_VAULT_ID_LEN + 1)));
        assert!(!valid_vault_id("vault/../../etc"));
        assert!(!valid_vault_id("vault id"));
        assert!(!valid_vault_id("vault.id"));
    }

    #[test]
    fn test_user_id_format() {
        assert!(valid_user_id("anonymous"));
        assert!(valid_user_id("user@example.com"));
        assert!(valid_user_id("a.b-c_d"));
        assert!(valid_user_id(&"u".repeat(MAX_USER_ID_LEN)));

        assert!(!valid_user_id(""));
        assert!(!valid_user_id(&"u".repeat(MAX_USER_ID_LEN + 1)));
        assert!(!valid_user_id("user name"));
        assert!(!valid_user_id("user<script>"));
    }

    #[test]
    fn test_token_comparison() {
        assert!(token_matches("secret", "secret"));
        assert!(!token_matches("secret", "secreT"));
        assert!(!token_matches("secret", "secret2"));
        assert!(!token_matches("secret", ""));
        assert!(token_matches("", ""));
    }
}

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::config::AuthConfig;

/// Hex SHA-256 of `plaintext`, the form `auth.password_hash` is stored in.
pub fn hash_password(plaintext: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(plaintext.as_bytes());
    hex::encode(hasher.finalize())
}

/// Single-user username/password check in front of the chat.
#[derive(Debug, Clone)]
pub struct AuthGate {
    username: String,
    password_hash: String,
}

impl AuthGate {
    /// `None` unless both username and password hash are configured.
    pub fn from_config(config: &AuthConfig) -> Option<Self> {
        match (&config.username, &config.password_hash) {
            (Some(username), Some(password_hash)) => Some(Self {
                username: username.clone(),
                password_hash: password_hash.trim().to_ascii_lowercase(),
            }),
            _ => None,
        }
    }

    pub fn verify(&self, username: &str, password: &str) -> bool {
        let user_ok = username.as_bytes().ct_eq(self.username.as_bytes());
        let hash_ok = hash_password(password)
            .as_bytes()
            .ct_eq(self.password_hash.as_bytes());
        (user_ok & hash_ok).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> AuthGate {
        AuthGate::from_config(&AuthConfig {
            username: Some("analyst".to_string()),
            password_hash: Some(hash_password("s3cret").to_uppercase()),
        })
        .unwrap()
    }

    #[test]
    fn hash_is_hex_sha256() {
        assert_eq!(
            hash_password("password"),
            "5e884898da28047151d0e56f8dc6292773603d0d6aabbdd62a11ef721d1542d8"
        );
    }

    #[test]
    fn verify_accepts_only_matching_pair() {
        let gate = gate();
        assert!(gate.verify("analyst", "s3cret"));
        assert!(!gate.verify("analyst", "wrong"));
        assert!(!gate.verify("admin", "s3cret"));
        assert!(!gate.verify("", ""));
    }

    #[test]
    fn gate_needs_both_fields() {
        assert!(AuthGate::from_config(&AuthConfig {
            username: Some("analyst".to_string()),
            password_hash: None,
        })
        .is_none());
        assert!(AuthGate::from_config(&AuthConfig::default()).is_none());
    }
}

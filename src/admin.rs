//! Admin capability checks for privileged routes.

use ring::digest;
use secrecy::{ExposeSecret, SecretString};

/// Header carrying the admin credential.
pub const ADMIN_KEY_HEADER: &str = "x-admin-key";

/// Decides whether a presented credential grants admin rights.
pub trait AdminCapability: Send + Sync {
    fn is_admin(&self, presented: Option<&str>) -> bool;
}

/// Admin check against a single shared secret.
pub struct SharedSecretAdmin {
    secret: SecretString,
}

impl SharedSecretAdmin {
    pub fn new(secret: SecretString) -> Self {
        Self { secret }
    }
}

impl std::fmt::Debug for SharedSecretAdmin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedSecretAdmin([REDACTED])")
    }
}

impl AdminCapability for SharedSecretAdmin {
    fn is_admin(&self, presented: Option<&str>) -> bool {
        let expected = self.secret.expose_secret();
        match presented {
            Some(candidate) if !expected.is_empty() => constant_time_eq(candidate, expected),
            _ => false,
        }
    }
}

/// Compare two strings in time independent of where they differ.
///
/// Both sides are hashed first so the comparison length is fixed and the
/// secret's length is not observable.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = digest::digest(&digest::SHA256, a.as_bytes());
    let b = digest::digest(&digest::SHA256, b.as_bytes());
    let mut diff = 0u8;
    for (x, y) in a.as_ref().iter().zip(b.as_ref().iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admin(secret: &str) -> SharedSecretAdmin {
        SharedSecretAdmin::new(SecretString::from(secret.to_string()))
    }

    #[test]
    fn matching_secret_is_admin() {
        assert!(admin("s3cret").is_admin(Some("s3cret")));
    }

    #[test]
    fn wrong_or_missing_secret_is_not_admin() {
        let check = admin("s3cret");
        assert!(!check.is_admin(Some("s3cre")));
        assert!(!check.is_admin(Some("s3cret ")));
        assert!(!check.is_admin(Some("")));
        assert!(!check.is_admin(None));
    }

    #[test]
    fn empty_configured_secret_never_matches() {
        assert!(!admin("").is_admin(Some("")));
    }

    #[test]
    fn debug_is_redacted() {
        assert!(!format!("{:?}", admin("s3cret")).contains("s3cret"));
    }
}

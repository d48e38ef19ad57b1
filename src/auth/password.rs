//! Secret hashing using Argon2id.

use anyhow::{Result, anyhow, bail};
use argon2::password_hash::SaltString;
use argon2::password_hash::rand_core::OsRng;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};

/// Hash a plaintext secret into a PHC-format Argon2id string.
///
/// Default Argon2id parameters (19 MiB, 2 passes) cost more than bcrypt
/// at 10 rounds. An empty secret is refused rather than hashed.
pub fn hash_secret(plaintext: &str) -> Result<String> {
    if plaintext.is_empty() {
        bail!("refusing to hash an empty secret");
    }
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(plaintext.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| anyhow!("secret hashing failed: {e}"))
}

/// Check a plaintext secret against a stored hash.
///
/// Fails closed: empty input, a malformed hash or any verifier error
/// yields `false`.
pub fn verify_secret(plaintext: &str, hash: &str) -> bool {
    if plaintext.is_empty() || hash.is_empty() {
        return false;
    }
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(plaintext.as_bytes(), &parsed)
        .is_ok()
}

/// [`hash_secret`] on the blocking pool, off the request executor.
pub async fn hash_secret_blocking(plaintext: String) -> Result<String> {
    tokio::task::spawn_blocking(move || hash_secret(&plaintext)).await?
}

/// [`verify_secret`] on the blocking pool. A panicked task counts as a mismatch.
pub async fn verify_secret_blocking(plaintext: String, hash: String) -> bool {
    tokio::task::spawn_blocking(move || verify_secret(&plaintext, &hash))
        .await
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correct_secret_matches() {
        let hash = hash_secret("secret1").unwrap();
        assert!(verify_secret("secret1", &hash));
    }

    #[test]
    fn other_secrets_do_not_match() {
        let hash = hash_secret("secret1").unwrap();
        for other in ["secret2", "Secret1", "secret1 ", "s"] {
            assert!(!verify_secret(other, &hash), "{other} matched");
        }
    }

    #[test]
    fn hash_is_salted_and_never_plaintext() {
        let a = hash_secret("hunter2").unwrap();
        let b = hash_secret("hunter2").unwrap();
        assert_ne!(a, "hunter2");
        assert!(!a.contains("hunter2"));
        assert_ne!(a, b);
        assert!(a.starts_with("$argon2id$"));
    }

    #[test]
    fn empty_inputs_fail_closed() {
        let hash = hash_secret("secret1").unwrap();
        assert!(!verify_secret("", &hash));
        assert!(!verify_secret("secret1", ""));
        assert!(!verify_secret("secret1", "not-a-hash"));
        assert!(hash_secret("").is_err());
    }

    #[tokio::test]
    async fn blocking_wrappers_agree() {
        let hash = hash_secret_blocking("secret1".to_string()).await.unwrap();
        assert!(verify_secret_blocking("secret1".to_string(), hash.clone()).await);
        assert!(!verify_secret_blocking("nope".to_string(), hash).await);
    }
}

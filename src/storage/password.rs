use argon2::{Algorithm, Argon2, Params, Version};
use password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};

use super::StoreError;

/// Argon2id hashing shared by both stores.
#[derive(Clone)]
pub struct Passwords {
    argon2: Argon2<'static>,
}

impl Default for Passwords {
    fn default() -> Self {
        Passwords { argon2: Argon2::default() }
    }
}

impl Passwords {
    /// Use explicit cost parameters; `None` keeps the library defaults.
    pub fn with_params(params: Option<Params>) -> Self {
        match params {
            Some(p) => Passwords { argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, p) },
            None => Passwords::default(),
        }
    }

    /// Minimal-cost parameters for tests and in-memory stores.
    pub fn fast() -> Self {
        Self::with_params(Params::new(8, 1, 1, None).ok())
    }

    pub fn hash(&self, password: &str) -> Result<String, StoreError> {
        let salt = SaltString::generate(&mut rand::thread_rng());
        let hash = self
            .argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| StoreError::PasswordHash(e.to_string()))?;
        Ok(hash.to_string())
    }

    /// A corrupt stored hash is an error; a wrong password is just `false`.
    pub fn verify(&self, password: &str, stored: &str) -> Result<bool, StoreError> {
        let parsed = PasswordHash::new(stored)
            .map_err(|e| StoreError::PasswordHash(format!("corrupt password hash: {e}")))?;
        Ok(self.argon2.verify_password(password.as_bytes(), &parsed).is_ok())
    }
}

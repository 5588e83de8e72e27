//! Password hashing and verification (argon2id).
//!
//! Hashes are stored in PHC string format, so the cost parameters travel with
//! each hash and can be raised without invalidating existing accounts.

use std::sync::Arc;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::SaltString;
use argon2::{Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version};

use crate::config::PasswordConfig;
use crate::errors::{ServiceError, ServiceResult};

#[derive(Clone)]
pub struct CredentialService {
    params: Params,
    /// Hash with the configured cost, checked when a login names no account.
    decoy_hash: Arc<str>,
}

impl CredentialService {
    pub fn new(config: &PasswordConfig) -> ServiceResult<Self> {
        let params = Params::new(config.memory_kib, config.iterations, config.parallelism, None)
            .map_err(|e| ServiceError::Internal(format!("invalid argon2 parameters: {}", e)))?;
        let mut service = Self {
            params,
            decoy_hash: Arc::from(""),
        };
        service.decoy_hash = Arc::from(service.hash(&uuid::Uuid::new_v4().to_string())?);
        Ok(service)
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    /// Salted one-way hash of `password`.
    pub fn hash(&self, password: &str) -> ServiceResult<String> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| ServiceError::Internal(format!("password hashing failed: {}", e)))
    }

    /// `false` on mismatch or on an unparseable stored hash. Never errors.
    pub fn verify(&self, password: &str, password_hash: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(password_hash) else {
            tracing::warn!("stored password hash is not in PHC format");
            return false;
        };
        self.argon2()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    }

    /// [`hash`](Self::hash) on the blocking pool.
    pub async fn hash_blocking(&self, password: String) -> ServiceResult<String> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.hash(&password)).await?
    }

    /// [`verify`](Self::verify) on the blocking pool.
    pub async fn verify_blocking(&self, password: String, password_hash: String) -> ServiceResult<bool> {
        let this = self.clone();
        Ok(tokio::task::spawn_blocking(move || this.verify(&password, &password_hash)).await?)
    }

    /// Pays for one full verification against the decoy hash and reports a
    /// mismatch, so an unknown username costs the same as a wrong password.
    pub async fn verify_unknown_blocking(&self, password: String) -> ServiceResult<bool> {
        self.verify_blocking(password, self.decoy_hash.to_string())
            .await
            .map(|_| false)
    }
}

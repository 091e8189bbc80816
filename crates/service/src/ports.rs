//! Capabilities the core consumes: time, randomness and password hashing.

use std::sync::{Arc, Mutex};

use argon2::password_hash::{PasswordHash, PasswordHasher as _, PasswordVerifier as _, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::errors::AccessError;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Hand-driven clock for tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(start) }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        if let Ok(mut now) = self.now.lock() {
            *now = at;
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Source of unguessable opaque tokens.
pub trait TokenGenerator: Send + Sync {
    fn generate(&self) -> Result<String, AccessError>;
}

/// OS RNG, URL-safe base64 without padding.
#[derive(Debug, Clone, Copy)]
pub struct OsTokenGenerator {
    bytes: usize,
}

impl OsTokenGenerator {
    /// Anything under 128 bits is raised to 128.
    pub fn with_bytes(bytes: usize) -> Self {
        Self { bytes: bytes.max(16) }
    }
}

impl Default for OsTokenGenerator {
    fn default() -> Self {
        Self { bytes: 32 }
    }
}

impl TokenGenerator for OsTokenGenerator {
    fn generate(&self) -> Result<String, AccessError> {
        let mut buf = vec![0u8; self.bytes];
        OsRng
            .try_fill_bytes(&mut buf)
            .map_err(|e| AccessError::Internal(format!("rng: {e}")))?;
        Ok(URL_SAFE_NO_PAD.encode(buf))
    }
}

pub trait PasswordHasher: Send + Sync {
    fn hash(&self, password: &str) -> Result<String, AccessError>;
    fn verify(&self, password: &str, hash: &str) -> Result<bool, AccessError>;
}

/// Argon2id in PHC string format.
#[derive(Clone, Default)]
pub struct Argon2Hasher {
    params: Option<Params>,
}

impl Argon2Hasher {
    /// Custom cost parameters; tests use a cheap setting.
    pub fn with_params(params: Params) -> Self {
        Self { params: Some(params) }
    }

    fn argon2(&self) -> Argon2<'static> {
        match &self.params {
            Some(p) => Argon2::new(Algorithm::Argon2id, Version::V0x13, p.clone()),
            None => Argon2::default(),
        }
    }
}

impl PasswordHasher for Argon2Hasher {
    fn hash(&self, password: &str) -> Result<String, AccessError> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2()
            .hash_password(password.as_bytes(), &salt)
            .map(|h| h.to_string())
            .map_err(|e| AccessError::Internal(format!("hash: {e}")))
    }

    fn verify(&self, password: &str, hash: &str) -> Result<bool, AccessError> {
        let parsed = PasswordHash::new(hash).map_err(|e| AccessError::Internal(format!("hash: {e}")))?;
        // Parameters come from the PHC string, so any instance verifies any hash.
        Ok(Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok())
    }
}

/// Hex SHA-256 of a token; the only form in which tokens are stored.
pub fn digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

pub fn digest_matches(stored: &str, presented: &str) -> bool {
    stored.as_bytes().ct_eq(presented.as_bytes()).into()
}

/// Capability bundle handed to the gate.
#[derive(Clone)]
pub struct Ports {
    pub clock: Arc<dyn Clock>,
    pub tokens: Arc<dyn TokenGenerator>,
    pub hasher: Arc<dyn PasswordHasher>,
}

impl Ports {
    pub fn system() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            tokens: Arc::new(OsTokenGenerator::default()),
            hasher: Arc::new(Argon2Hasher::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_hasher() -> Argon2Hasher {
        Argon2Hasher::with_params(Params::new(8, 1, 1, None).unwrap())
    }

    #[test]
    fn tokens_are_256_bit_and_distinct() {
        let g = OsTokenGenerator::default();
        let a = g.generate().unwrap();
        let b = g.generate().unwrap();
        assert_ne!(a, b);
        assert_eq!(URL_SAFE_NO_PAD.decode(&a).unwrap().len(), 32);
        assert!(!a.contains('+') && !a.contains('/') && !a.contains('='));
    }

    #[test]
    fn short_token_requests_are_raised_to_128_bits() {
        let t = OsTokenGenerator::with_bytes(4).generate().unwrap();
        assert_eq!(URL_SAFE_NO_PAD.decode(t).unwrap().len(), 16);
    }

    #[test]
    fn hash_and_verify() {
        let h = fast_hasher();
        let hash = h.hash("Passw0rd!").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(h.verify("Passw0rd!", &hash).unwrap());
        assert!(!h.verify("wrong", &hash).unwrap());
    }

    #[test]
    fn verify_rejects_malformed_hash() {
        assert!(fast_hasher().verify("x", "not-a-phc-string").is_err());
    }

    #[test]
    fn digest_is_stable_hex() {
        let d = digest("abc");
        assert_eq!(d, "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad");
        assert!(digest_matches(&d, &digest("abc")));
        assert!(!digest_matches(&d, &digest("abd")));
    }

    #[test]
    fn manual_clock_moves() {
        let start = Utc::now();
        let c = ManualClock::new(start);
        c.advance(Duration::minutes(5));
        assert_eq!(c.now(), start + Duration::minutes(5));
        c.set(start);
        assert_eq!(c.now(), start);
    }
}

//! JWT issuance/validation: a small rotating key ring so an old token
//! keeps validating for a while after a key rotation. No DB-backed
//! revocation list (sessions are never revoked, only left to expire),
//! no free functions against a process-global instance — this one is
//! owned by `AppState` and constructed from `Config`.

use std::sync::{Arc, RwLock};

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const MAX_RETAINED_KEYS: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
}

pub struct JwtKeyManager {
    keys: RwLock<Vec<String>>,
    algorithm: Algorithm,
    token_ttl: Duration,
}

impl JwtKeyManager {
    pub fn new(secret: impl Into<String>, algorithm: Algorithm, token_ttl_minutes: i64) -> Self {
        Self {
            keys: RwLock::new(vec![secret.into()]),
            algorithm,
            token_ttl: Duration::minutes(token_ttl_minutes),
        }
    }

    pub fn current_key(&self) -> String {
        self.keys.read().unwrap()[0].clone()
    }

    pub fn all_keys(&self) -> Vec<String> {
        self.keys.read().unwrap().clone()
    }

    /// Previous keys are kept so tokens signed just before a rotation
    /// keep validating until they naturally expire.
    pub fn rotate_key(&self, new_key: String) {
        let mut keys = self.keys.write().unwrap();
        keys.insert(0, new_key);
        keys.truncate(MAX_RETAINED_KEYS);
    }

    pub fn issue_token(&self, user_id: Uuid) -> Result<String, jsonwebtoken::errors::Error> {
        let now = Utc::now();
        let exp = now + self.token_ttl;
        let claims = Claims {
            sub: user_id,
            exp: exp.timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };
        encode(
            &Header::new(self.algorithm),
            &claims,
            &EncodingKey::from_secret(self.current_key().as_bytes()),
        )
    }

    /// Tries every retained key in order (newest first) so a rotation
    /// doesn't immediately invalidate tokens in flight.
    pub fn validate_token(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        let validation = Validation::new(self.algorithm);
        let mut last_error = None;
        for secret in self.all_keys() {
            match decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation) {
                Ok(data) => return Ok(data.claims),
                Err(e) => last_error = Some(e),
            }
        }
        Err(last_error.unwrap_or_else(|| jsonwebtoken::errors::ErrorKind::InvalidToken.into()))
    }

    pub fn parse_algorithm(name: &str) -> Algorithm {
        match name.to_ascii_uppercase().as_str() {
            "HS384" => Algorithm::HS384,
            "HS512" => Algorithm::HS512,
            _ => Algorithm::HS256,
        }
    }
}

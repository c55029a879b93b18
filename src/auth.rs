use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::{Database, DbError};

/// bcrypt work factor. Deliberately low; raise it for real deployments.
pub const BCRYPT_COST: u32 = 8;

/// Session tokens expire this long after issuance.
pub const TOKEN_TTL_HOURS: i64 = 24;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("username is taken")]
    UsernameTaken,
    #[error("unknown user")]
    UnknownUser,
    #[error("wrong password")]
    WrongPassword,
    #[error("password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),
    #[error(transparent)]
    Storage(DbError),
}

#[derive(Debug, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("malformed token")]
    Malformed,
    #[error("bad signature")]
    BadSignature,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    username: String,
    exp: i64,
}

/// Hash a password and insert the user row. The storage-level UNIQUE
/// constraint is the source of truth for duplicates, so two concurrent
/// registrations cannot both succeed.
pub async fn register_user(
    db: &Database,
    username: &str,
    password: &str,
) -> Result<i64, CredentialError> {
    let password_hash = bcrypt::hash(password, BCRYPT_COST)?;

    match db.create_user(username, &password_hash).await {
        Ok(id) => Ok(id),
        Err(DbError::Duplicate) => Err(CredentialError::UsernameTaken),
        Err(err) => Err(CredentialError::Storage(err)),
    }
}

/// Check a username/password pair against the stored hash, returning the
/// user's id on success. Plaintext never touches storage.
pub async fn verify_credentials(
    db: &Database,
    username: &str,
    password: &str,
) -> Result<i64, CredentialError> {
    let user = db
        .user_by_username(username)
        .await
        .map_err(CredentialError::Storage)?
        .ok_or(CredentialError::UnknownUser)?;

    if bcrypt::verify(password, &user.password_hash)? {
        Ok(user.id)
    } else {
        Err(CredentialError::WrongPassword)
    }
}

/// Signing and verification keys for session tokens, built once from the
/// configured secret and passed by value wherever tokens are handled.
#[derive(Clone)]
pub struct SessionKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl SessionKeys {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Issue a signed token carrying the username, expiring
    /// [`TOKEN_TTL_HOURS`] from now.
    pub fn issue(&self, username: &str) -> anyhow::Result<String> {
        let claims = Claims {
            username: username.to_string(),
            exp: (Utc::now() + Duration::hours(TOKEN_TTL_HOURS)).timestamp(),
        };
        Ok(self.sign(&claims)?)
    }

    fn sign(&self, claims: &Claims) -> Result<String, jsonwebtoken::errors::Error> {
        encode(&Header::default(), claims, &self.encoding)
    }

    /// Validate signature, expiry, and structure, returning the username
    /// claim. Each failure mode is kept distinct; the HTTP layer decides
    /// how much to collapse.
    pub fn validate(&self, token: &str) -> Result<String, TokenError> {
        let data = decode::<Claims>(token, &self.decoding, &Validation::default()).map_err(
            |err| match err.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                ErrorKind::InvalidSignature => TokenError::BadSignature,
                _ => TokenError::Malformed,
            },
        )?;

        Ok(data.claims.username)
    }
}

#![forbid(unsafe_code)]

//! Credentials and sessions: password hashing, signed session tokens and the
//! process-level root check used by the server binary.

use anyhow::{Result, anyhow, bail};
use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString,
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use nix::unistd::Uid;
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::error::{ServiceError, ServiceResult};
use crate::ids::ObjectId;

const KEY_CONTEXT: &str = "socialtube 2024 session token signing key";

/// Fails fast when a binary is started as root. Running as a regular
/// unprivileged user keeps media and database files owned by the service
/// account.
pub fn ensure_not_root(process: &str) -> Result<()> {
    ensure_not_root_for(Uid::current(), process)
}

fn ensure_not_root_for(uid: Uid, process: &str) -> Result<()> {
    if uid.is_root() {
        bail!(
            "{process} must not be run as root; use a regular user or a dedicated service account"
        );
    }
    Ok(())
}

/// Hashes a password into an Argon2id PHC string.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| anyhow!("hashing password: {err}"))
}

/// A malformed stored hash counts as a mismatch.
pub fn verify_password(password: &str, phc: &str) -> bool {
    PasswordHash::new(phc)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: ObjectId,
    pub kind: TokenKind,
    /// Expiry, seconds since the Unix epoch.
    pub exp: i64,
    pub nonce: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTokens {
    pub access_token: String,
    pub refresh_token: String,
}

/// Signs and checks session tokens of the form `claims.mac`, both parts
/// base64url without padding. The MAC is keyed BLAKE3 over the encoded
/// claims.
#[derive(Clone)]
pub struct SessionKeys {
    key: [u8; 32],
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeys")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish_non_exhaustive()
    }
}

impl SessionKeys {
    pub fn new(secret: &str, access_ttl: Duration, refresh_ttl: Duration) -> Self {
        Self {
            key: blake3::derive_key(KEY_CONTEXT, secret.as_bytes()),
            access_ttl,
            refresh_ttl,
        }
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    pub fn issue_pair(&self, user: ObjectId, now: DateTime<Utc>) -> Result<SessionTokens> {
        Ok(SessionTokens {
            access_token: self.issue(user, TokenKind::Access, now)?,
            refresh_token: self.issue(user, TokenKind::Refresh, now)?,
        })
    }

    pub fn issue(&self, user: ObjectId, kind: TokenKind, now: DateTime<Utc>) -> Result<String> {
        let ttl = match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        };
        let mut nonce = [0u8; 16];
        OsRng.fill_bytes(&mut nonce);
        let claims = Claims {
            sub: user,
            kind,
            exp: (now + ttl).timestamp(),
            nonce: URL_SAFE_NO_PAD.encode(nonce),
        };
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims)?);
        let mac = blake3::keyed_hash(&self.key, payload.as_bytes());
        Ok(format!("{payload}.{}", URL_SAFE_NO_PAD.encode(mac.as_bytes())))
    }

    /// Checks signature, kind and expiry. Every failure is the same
    /// `Unauthenticated` error.
    pub fn verify(&self, token: &str, expected: TokenKind, now: DateTime<Utc>) -> ServiceResult<Claims> {
        self.decode(token)
            .filter(|claims| claims.kind == expected && claims.exp > now.timestamp())
            .ok_or_else(|| ServiceError::unauthenticated("invalid or expired token"))
    }

    fn decode(&self, token: &str) -> Option<Claims> {
        let (payload, mac) = token.trim().split_once('.')?;
        let mac: [u8; 32] = URL_SAFE_NO_PAD.decode(mac).ok()?.try_into().ok()?;
        // blake3::Hash equality is constant time.
        if blake3::keyed_hash(&self.key, payload.as_bytes()) != blake3::Hash::from(mac) {
            return None;
        }
        let json = URL_SAFE_NO_PAD.decode(payload).ok()?;
        serde_json::from_slice(&json).ok()
    }
}

/// Digest of a refresh token as kept on the user record.
pub fn token_digest(token: &str) -> String {
    blake3::hash(token.as_bytes()).to_hex().to_string()
}

pub fn digest_matches(token: &str, stored: &str) -> bool {
    blake3::Hash::from_hex(stored)
        .map(|digest| digest == blake3::hash(token.as_bytes()))
        .unwrap_or(false)
}

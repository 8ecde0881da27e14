//! Store-native identifiers.
//!
//! Every row uses a UUIDv7, which embeds the creation time in its leading
//! bits. Identifiers therefore sort roughly in creation order, which keeps the
//! feed's secondary sort stable across pages.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ServiceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(Uuid);

impl ObjectId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Parses a caller-supplied identifier. `what` names the entity in the
    /// validation message, e.g. `"video"` yields `invalid video id`.
    pub fn parse(raw: &str, what: &str) -> Result<Self, ServiceError> {
        raw.trim()
            .parse()
            .map_err(|_| ServiceError::validation(format!("invalid {what} id")))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.as_hyphenated().fmt(f)
    }
}

impl FromStr for ObjectId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

//! QR payload codec
//!
//! Badges and inventory labels carry short text payloads:
//!
//! ```text
//! CANTEIRO:EMP:<64 hex chars>   employee badge (HMAC hash, see `badge`)
//! CANTEIRO:PPE:<uuid>           PPE catalog item
//! CANTEIRO:AST:<uuid>           tool, machine or supply
//! ```
//!
//! Scanners hand the decoded text to the API; this module turns it into a typed
//! reference. Prefix and tag are case-insensitive, surrounding whitespace is ignored.

use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Payload prefix shared by every Canteiro label
pub const PREFIX: &str = "CANTEIRO";

/// Length of a badge hash in hex characters
pub const BADGE_HASH_LEN: usize = 64;

/// Error type for payload parsing
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QrError {
    /// Payload is empty after trimming
    #[error("QR payload is empty")]
    Empty,

    /// Payload does not start with the Canteiro prefix
    #[error("QR payload is not a Canteiro label")]
    UnknownPrefix,

    /// Payload is missing the tag or value part
    #[error("QR payload is incomplete")]
    Incomplete,

    /// Tag is not EMP, PPE or AST
    #[error("Unknown QR payload tag: {0}")]
    UnknownTag(String),

    /// Badge hash is not 64 hex characters
    #[error("Invalid badge hash")]
    InvalidBadgeHash,

    /// Item identifier is not a UUID
    #[error("Invalid item identifier: {0}")]
    InvalidItemId(String),
}

/// A decoded QR payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QrPayload {
    /// Employee badge carrying the badge hash (lowercase hex)
    Badge(String),

    /// PPE catalog item
    Ppe(Uuid),

    /// Tool, machine or supply
    Asset(Uuid),
}

impl QrPayload {
    /// Parses a scanned payload
    pub fn parse(input: &str) -> Result<Self, QrError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(QrError::Empty);
        }

        let mut parts = trimmed.splitn(3, ':');
        let prefix = parts.next().ok_or(QrError::Incomplete)?;
        if !prefix.eq_ignore_ascii_case(PREFIX) {
            return Err(QrError::UnknownPrefix);
        }

        let tag = parts.next().ok_or(QrError::Incomplete)?;
        let value = parts.next().ok_or(QrError::Incomplete)?.trim();
        if value.is_empty() {
            return Err(QrError::Incomplete);
        }

        match tag.to_ascii_uppercase().as_str() {
            "EMP" => parse_badge_hash(value).map(QrPayload::Badge),
            "PPE" => parse_item_id(value).map(QrPayload::Ppe),
            "AST" => parse_item_id(value).map(QrPayload::Asset),
            other => Err(QrError::UnknownTag(other.to_string())),
        }
    }

    /// Builds a badge payload from a hash
    pub fn badge(hash: impl Into<String>) -> Self {
        QrPayload::Badge(hash.into().to_ascii_lowercase())
    }

    /// Returns the payload tag
    pub fn tag(&self) -> &'static str {
        match self {
            QrPayload::Badge(_) => "EMP",
            QrPayload::Ppe(_) => "PPE",
            QrPayload::Asset(_) => "AST",
        }
    }
}

impl fmt::Display for QrPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QrPayload::Badge(hash) => write!(f, "{}:{}:{}", PREFIX, self.tag(), hash),
            QrPayload::Ppe(id) | QrPayload::Asset(id) => {
                write!(f, "{}:{}:{}", PREFIX, self.tag(), id)
            }
        }
    }
}

impl FromStr for QrPayload {
    type Err = QrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QrPayload::parse(s)
    }
}

/// Validates and lowercases a badge hash
pub fn parse_badge_hash(value: &str) -> Result<String, QrError> {
    let value = value.trim();
    if value.len() != BADGE_HASH_LEN || !value.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(QrError::InvalidBadgeHash);
    }
    Ok(value.to_ascii_lowercase())
}

fn parse_item_id(value: &str) -> Result<Uuid, QrError> {
    Uuid::parse_str(value).map_err(|_| QrError::InvalidItemId(value.to_string()))
}

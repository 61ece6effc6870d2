//! Biometric identification
//!
//! Capture devices send a sample (face image or fingerprint template) as base64. The
//! sample is reduced to a SHA-256 digest over `kind || 0x00 || sample`; enrolment stores
//! that digest and identification is an exact lookup among the company's active
//! employees. Matching sits behind [`BiometricMatcher`] so a fuzzy matcher can replace
//! [`DigestMatcher`] without touching the routes or the workflow engine.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use std::fmt;
use uuid::Uuid;

/// Largest accepted decoded sample
pub const MAX_SAMPLE_BYTES: usize = 2 * 1024 * 1024;

/// Biometric modality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "biometric_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BiometricKind {
    Face,
    Fingerprint,
}

impl BiometricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BiometricKind::Face => "face",
            BiometricKind::Fingerprint => "fingerprint",
        }
    }
}

impl fmt::Display for BiometricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BiometricError {
    #[error("Biometric sample is empty")]
    EmptySample,

    #[error("Biometric sample exceeds {MAX_SAMPLE_BYTES} bytes")]
    SampleTooLarge,

    #[error("Biometric sample is not valid base64")]
    InvalidEncoding,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// An identified employee
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct BiometricMatch {
    pub employee_id: Uuid,
    pub employee_name: String,
}

/// Decodes a base64 sample, accepting `data:<mime>;base64,` URLs from browser canvases
pub fn decode_sample(encoded: &str) -> Result<Vec<u8>, BiometricError> {
    let trimmed = encoded.trim();
    let body = match trimmed.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => trimmed,
    };

    if body.is_empty() {
        return Err(BiometricError::EmptySample);
    }
    // base64 expands 3 bytes into 4 chars
    if body.len() / 4 * 3 > MAX_SAMPLE_BYTES + 3 {
        return Err(BiometricError::SampleTooLarge);
    }

    let sample = STANDARD
        .decode(body)
        .map_err(|_| BiometricError::InvalidEncoding)?;
    check_sample(&sample)?;

    Ok(sample)
}

fn check_sample(sample: &[u8]) -> Result<(), BiometricError> {
    if sample.is_empty() {
        return Err(BiometricError::EmptySample);
    }
    if sample.len() > MAX_SAMPLE_BYTES {
        return Err(BiometricError::SampleTooLarge);
    }
    Ok(())
}

/// Template digest stored at enrolment and looked up at identification
pub fn template_digest(kind: BiometricKind, sample: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(sample);
    hasher.finalize().to_vec()
}

/// Resolves a biometric sample to an employee of a company
#[async_trait]
pub trait BiometricMatcher: Send + Sync {
    async fn identify(
        &self,
        company_id: Uuid,
        kind: BiometricKind,
        sample: &[u8],
    ) -> Result<Option<BiometricMatch>, BiometricError>;
}

/// Exact-digest matcher backed by `biometric_templates`
#[derive(Clone)]
pub struct DigestMatcher {
    pool: PgPool,
}

impl DigestMatcher {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BiometricMatcher for DigestMatcher {
    async fn identify(
        &self,
        company_id: Uuid,
        kind: BiometricKind,
        sample: &[u8],
    ) -> Result<Option<BiometricMatch>, BiometricError> {
        check_sample(sample)?;
        let digest = template_digest(kind, sample);

        let found = sqlx::query_as::<_, BiometricMatch>(
            r#"
            SELECT e.id AS employee_id, e.name AS employee_name
            FROM biometric_templates t
            JOIN employees e ON e.id = t.employee_id
            WHERE t.company_id = $1 AND t.kind = $2 AND t.digest = $3
              AND e.status = 'active'
            "#,
        )
        .bind(company_id)
        .bind(kind)
        .bind(digest)
        .fetch_optional(&self.pool)
        .await?;

        Ok(found)
    }
}

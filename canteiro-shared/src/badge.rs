//! Employee QR badges
//!
//! A badge hash is `hex(HMAC-SHA256(secret, company_id || employee_id || version))`.
//! The hash is stored on the employee row; the printed QR code carries
//! `CANTEIRO:EMP:<hash>`. Regenerating a badge bumps the version, which yields a new
//! hash and leaves the old one unresolvable.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

use crate::qr::QrPayload;

type HmacSha256 = Hmac<Sha256>;

/// Minimum secret length in bytes
pub const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BadgeError {
    #[error("Badge secret must be at least {MIN_SECRET_LEN} bytes")]
    WeakSecret,

    #[error("Badge payload is not an employee badge")]
    NotABadge,

    #[error(transparent)]
    Payload(#[from] crate::qr::QrError),
}

/// Computes the badge hash for an employee at a badge version
pub fn badge_hash(
    secret: &[u8],
    company_id: Uuid,
    employee_id: Uuid,
    version: i32,
) -> Result<String, BadgeError> {
    if secret.len() < MIN_SECRET_LEN {
        return Err(BadgeError::WeakSecret);
    }

    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| BadgeError::WeakSecret)?;
    mac.update(company_id.as_bytes());
    mac.update(employee_id.as_bytes());
    mac.update(&version.to_be_bytes());

    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Printable badge payload for a hash
pub fn badge_payload(hash: &str) -> String {
    QrPayload::badge(hash).to_string()
}

/// Extracts the badge hash from what a scanner or operator submitted
///
/// Accepts either a full `CANTEIRO:EMP:` payload or a bare 64-character hash.
pub fn extract_badge_hash(input: &str) -> Result<String, BadgeError> {
    let trimmed = input.trim();

    if trimmed.contains(':') {
        return match QrPayload::parse(trimmed)? {
            QrPayload::Badge(hash) => Ok(hash),
            _ => Err(BadgeError::NotABadge),
        };
    }

    Ok(crate::qr::parse_badge_hash(trimmed)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qr::QrError;

    const SECRET: &[u8] = b"badge-secret-for-tests-0123456789abcdef";

    #[test]
    fn test_hash_is_deterministic_hex() {
        let company = Uuid::new_v4();
        let employee = Uuid::new_v4();

        let a = badge_hash(SECRET, company, employee, 0).unwrap();
        let b = badge_hash(SECRET, company, employee, 0).unwrap();

        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_regeneration_changes_hash() {
        let company = Uuid::new_v4();
        let employee = Uuid::new_v4();

        let v0 = badge_hash(SECRET, company, employee, 0).unwrap();
        let v1 = badge_hash(SECRET, company, employee, 1).unwrap();
        assert_ne!(v0, v1);

        let other_company = badge_hash(SECRET, Uuid::new_v4(), employee, 0).unwrap();
        assert_ne!(v0, other_company);
    }

    #[test]
    fn test_weak_secret_rejected() {
        assert_eq!(
            badge_hash(b"short", Uuid::new_v4(), Uuid::new_v4(), 0),
            Err(BadgeError::WeakSecret)
        );
    }

    #[test]
    fn test_extract_badge_hash() {
        let hash = badge_hash(SECRET, Uuid::new_v4(), Uuid::new_v4(), 3).unwrap();

        assert_eq!(extract_badge_hash(&badge_payload(&hash)).unwrap(), hash);
        assert_eq!(extract_badge_hash(&format!(" {} ", hash)).unwrap(), hash);
        assert_eq!(
            extract_badge_hash(&hash.to_ascii_uppercase()).unwrap(),
            hash
        );

        let ppe = format!("CANTEIRO:PPE:{}", Uuid::new_v4());
        assert_eq!(extract_badge_hash(&ppe), Err(BadgeError::NotABadge));
        assert_eq!(
            extract_badge_hash("deadbeef"),
            Err(BadgeError::Payload(QrError::InvalidBadgeHash))
        );
    }
}

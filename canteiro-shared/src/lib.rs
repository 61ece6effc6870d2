//! # Canteiro Shared Library
//!
//! Types, persistence and domain logic shared by the Canteiro API server and the
//! background worker.
//!
//! ## Module Organization
//!
//! - `db`: Connection pool and migrations
//! - `models`: Database models (companies, employees, PPE, assets, HR records, ...)
//! - `auth`: Operator authentication and role checks
//! - `qr`: QR payload codec for badges and inventory labels
//! - `badge`: Employee badge hashing
//! - `biometric`: Biometric sample matching
//! - `workflow`: QR wizard state machine (delivery, return, exchange, application)
//! - `validation`: Brazilian document and regulation code checks

pub mod auth;
pub mod badge;
pub mod biometric;
pub mod db;
pub mod models;
pub mod qr;
pub mod validation;
pub mod workflow;

/// Current version of the Canteiro shared library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }
}

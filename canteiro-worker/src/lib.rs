//! # Canteiro Worker Library
//!
//! Periodic maintenance and alerting for the Canteiro backend.
//!
//! ## Modules
//!
//! - `config`: environment configuration
//! - `jobs`: the `Job` trait and the session, compliance, stock and vacation jobs
//! - `scheduler`: runs the jobs in rounds until shutdown

pub mod config;
pub mod jobs;
pub mod scheduler;

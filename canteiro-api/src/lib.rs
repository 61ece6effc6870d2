//! # Canteiro API Server Library
//!
//! HTTP surface of Canteiro: operator authentication, company-scoped CRUD for the
//! workforce and inventory tables, the identification functions and the QR workflow
//! wizard.
//!
//! ## Modules
//!
//! - `app`: application state and router builder
//! - `config`: configuration from the environment
//! - `error`: error type and HTTP response mapping
//! - `middleware`: security headers and rate limiting
//! - `routes`: route handlers

pub mod app;
pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;

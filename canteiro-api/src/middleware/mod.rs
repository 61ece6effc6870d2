/// Middleware for the API server
///
/// - `security`: response security headers
/// - `rate_limit`: per-company token buckets for the identification functions

pub mod rate_limit;
pub mod security;

//! Authentication and authorization primitives
//!
//! - [`password`]: Argon2id password hashing and strength rules
//! - [`jwt`]: HS256 access/refresh tokens carrying the operator and company
//! - [`middleware`]: axum middleware that turns a bearer token into an [`middleware::AuthContext`]
//! - [`authorization`]: role checks against company memberships
//!
//! ```
//! use canteiro_shared::auth::jwt::{create_token, validate_access_token, Claims, TokenType};
//! use uuid::Uuid;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let secret = "a-secret-that-is-at-least-32-bytes!";
//! let claims = Claims::new(Uuid::new_v4(), Uuid::new_v4(), TokenType::Access);
//! let token = create_token(&claims, secret)?;
//! assert_eq!(validate_access_token(&token, secret)?.sub, claims.sub);
//! # Ok(())
//! # }
//! ```

pub mod authorization;
pub mod jwt;
pub mod middleware;
pub mod password;

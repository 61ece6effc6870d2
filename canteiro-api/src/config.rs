/// Configuration for the API server
///
/// Loaded from environment variables; a `.env` file is read first when present.
///
/// # Environment Variables
///
/// - `DATABASE_URL`: PostgreSQL connection string (required)
/// - `DATABASE_MAX_CONNECTIONS`: pool size (default: 10)
/// - `API_HOST`: host to bind to (default: 0.0.0.0)
/// - `API_PORT`: port to bind to (default: 8080)
/// - `JWT_SECRET`: JWT signing key, at least 32 characters (required)
/// - `BADGE_SECRET`: badge HMAC key, at least 32 characters (required)
/// - `CORS_ORIGINS`: comma-separated origins, `*` for any (default: `*`)
/// - `PRODUCTION`: enables HSTS (default: false)
/// - `WORKFLOW_TTL_MINUTES`: idle lifetime of a workflow session (default: 30)
/// - `IDENTIFY_RATE_PER_MINUTE`: identification calls per company per minute (default: 30)
///
/// # Example
///
/// ```no_run
/// use canteiro_api::config::Config;
///
/// # fn example() -> anyhow::Result<()> {
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.bind_address());
/// # Ok(())
/// # }
/// ```

use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

/// Minimum length for signing secrets
const MIN_SECRET_LEN: usize = 32;

/// Complete application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub badge: BadgeConfig,
    pub workflow: WorkflowConfig,
    pub identify: IdentifyConfig,
}

/// API server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,

    /// Allowed CORS origins; `*` allows any
    pub cors_origins: Vec<String>,

    /// Production mode turns on HSTS
    pub production: bool,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// JWT configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    /// Generate with `openssl rand -hex 32`
    pub secret: String,
}

/// Badge hashing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BadgeConfig {
    /// Rotating it invalidates every printed badge
    pub secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    pub ttl_minutes: i64,
}

/// Rate limit for `verify-qr-code` and `process-biometric`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyConfig {
    pub rate_per_minute: u32,
}

fn var_or<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{} has an invalid value: {}", name, e)),
        Err(_) => Ok(default),
    }
}

fn required_secret(name: &str) -> anyhow::Result<String> {
    let secret = env::var(name).map_err(|_| anyhow::anyhow!("{} environment variable is required", name))?;
    if secret.len() < MIN_SECRET_LEN {
        anyhow::bail!("{} must be at least {} characters long", name, MIN_SECRET_LEN);
    }
    Ok(secret)
}

/// Splits a comma-separated origin list, dropping empty entries
pub fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(str::to_string)
        .collect()
}

impl Config {
    /// Loads configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing, a secret is too short or a
    /// value does not parse.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?;

        let ttl_minutes: i64 = var_or("WORKFLOW_TTL_MINUTES", 30)?;
        if ttl_minutes < 1 {
            anyhow::bail!("WORKFLOW_TTL_MINUTES must be at least 1");
        }

        let rate_per_minute: u32 = var_or("IDENTIFY_RATE_PER_MINUTE", 30)?;
        if rate_per_minute == 0 {
            anyhow::bail!("IDENTIFY_RATE_PER_MINUTE must be at least 1");
        }

        let cors_origins = parse_origins(&env::var("CORS_ORIGINS").unwrap_or_else(|_| "*".to_string()));

        Ok(Self {
            api: ApiConfig {
                host: env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: var_or("API_PORT", 8080)?,
                cors_origins,
                production: var_or("PRODUCTION", false)?,
            },
            database: DatabaseConfig {
                url: database_url,
                max_connections: var_or("DATABASE_MAX_CONNECTIONS", 10)?,
            },
            jwt: JwtConfig {
                secret: required_secret("JWT_SECRET")?,
            },
            badge: BadgeConfig {
                secret: required_secret("BADGE_SECRET")?,
            },
            workflow: WorkflowConfig { ttl_minutes },
            identify: IdentifyConfig { rate_per_minute },
        })
    }

    /// Returns the server bind address
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.api.host, self.api.port)
    }

    /// Idle lifetime of a workflow session
    pub fn workflow_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.workflow.ttl_minutes)
    }

    /// Configuration for tests; never reads the environment
    pub fn for_tests(database_url: &str) -> Self {
        Self {
            api: ApiConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
                cors_origins: vec!["*".to_string()],
                production: false,
            },
            database: DatabaseConfig {
                url: database_url.to_string(),
                max_connections: 5,
            },
            jwt: JwtConfig {
                secret: "test-jwt-secret-at-least-32-bytes-long".to_string(),
            },
            badge: BadgeConfig {
                secret: "test-badge-secret-at-least-32-bytes-long".to_string(),
            },
            workflow: WorkflowConfig { ttl_minutes: 30 },
            identify: IdentifyConfig { rate_per_minute: 30 },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_address() {
        let mut config = Config::for_tests("postgresql://localhost/test");
        config.api.port = 8080;

        assert_eq!(config.bind_address(), "127.0.0.1:8080");
    }

    #[test]
    fn test_workflow_ttl() {
        let config = Config::for_tests("postgresql://localhost/test");
        assert_eq!(config.workflow_ttl().num_minutes(), 30);
    }

    #[test]
    fn test_parse_origins() {
        assert_eq!(parse_origins("*"), vec!["*"]);
        assert_eq!(
            parse_origins("https://app.canteiro.app, https://admin.canteiro.app,"),
            vec!["https://app.canteiro.app", "https://admin.canteiro.app"]
        );
        assert!(parse_origins(" , ").is_empty());
    }

    #[test]
    fn test_test_secrets_meet_minimum() {
        let config = Config::for_tests("postgresql://localhost/test");
        assert!(config.jwt.secret.len() >= MIN_SECRET_LEN);
        assert!(config.badge.secret.len() >= MIN_SECRET_LEN);
    }
}

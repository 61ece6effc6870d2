/// Worker configuration
///
/// # Environment Variables
///
/// - `DATABASE_URL`: PostgreSQL connection string (required)
/// - `DATABASE_MAX_CONNECTIONS`: pool size (default: 5)
/// - `WORKER_POLL_INTERVAL_SECS`: seconds between job rounds (default: 60)
/// - `ALERT_WINDOW_DAYS`: how far ahead CA, ASO and training expiries alert (default: 30)
/// - `WORKFLOW_RETENTION_DAYS`: completed workflow sessions kept for this long (default: 30)

use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub poll_interval_secs: u64,
    pub alert_window_days: i64,
    pub workflow_retention_days: i64,
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

impl WorkerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?;

        let config = Self {
            database_url,
            max_connections: var_or("DATABASE_MAX_CONNECTIONS", 5)?,
            poll_interval_secs: var_or("WORKER_POLL_INTERVAL_SECS", 60)?,
            alert_window_days: var_or("ALERT_WINDOW_DAYS", 30)?,
            workflow_retention_days: var_or("WORKFLOW_RETENTION_DAYS", 30)?,
        };
        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.poll_interval_secs == 0 {
            anyhow::bail!("WORKER_POLL_INTERVAL_SECS must be at least 1");
        }
        if self.alert_window_days < 1 {
            anyhow::bail!("ALERT_WINDOW_DAYS must be at least 1");
        }
        if self.workflow_retention_days < 0 {
            anyhow::bail!("WORKFLOW_RETENTION_DAYS must not be negative");
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn for_tests(database_url: &str) -> Self {
        Self {
            database_url: database_url.to_string(),
            max_connections: 2,
            poll_interval_secs: 1,
            alert_window_days: 30,
            workflow_retention_days: 30,
        }
    }
}

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct Config {
    /// Secret used to sign session tokens. Required.
    pub jwt_secret: String,
    pub database_url: String,
    pub bind_addr: String,
    /// Poll interval in minutes
    pub poll_interval: u64,
}

fn default_database_url() -> String {
    "sqlite:feedkeeper.db?mode=rwc".to_string()
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_poll_interval() -> u64 {
    30
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from a key lookup (useful for testing)
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let jwt_secret = lookup("JWT_SECRET")
            .filter(|s| !s.is_empty())
            .context("JWT_SECRET must be set")?;

        let poll_interval = match lookup("POLL_INTERVAL_MINUTES") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("invalid POLL_INTERVAL_MINUTES: {raw}"))?,
            None => default_poll_interval(),
        };

        Ok(Self {
            jwt_secret,
            database_url: lookup("DATABASE_URL").unwrap_or_else(default_database_url),
            bind_addr: lookup("BIND_ADDR").unwrap_or_else(default_bind_addr),
            poll_interval,
        })
    }
}

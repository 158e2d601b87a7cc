//! Database connection configuration.

/// Connection settings for the engine's SQLite store.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// SQLite URL, e.g. `sqlite://foreman.db`.
    pub database_url: String,
}

impl DbConfig {
    /// Default database URL: a `foreman.db` file in the current directory.
    pub const DEFAULT_URL: &'static str = "sqlite://foreman.db";

    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
        }
    }

    /// Build a config from `FOREMAN_DATABASE_URL`, falling back to the
    /// default URL.
    pub fn from_env() -> Self {
        let url = std::env::var("FOREMAN_DATABASE_URL")
            .unwrap_or_else(|_| Self::DEFAULT_URL.to_string());
        Self::new(url)
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self::new(Self::DEFAULT_URL)
    }
}

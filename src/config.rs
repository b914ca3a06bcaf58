use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://forum-api.dicoding.dev/v1";

// 5 minutes, same as the stories cache of the desktop reader
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub cache_ttl: Duration,
    pub request_timeout: Duration,
    pub user_agent: String,
    /// Where the session database lives. `None` means `~/.forum_reader`.
    pub data_dir: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            user_agent: format!("forum-reader/{}", env!("CARGO_PKG_VERSION")),
            data_dir: None,
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by `FORUM_*` environment variables (a `.env` file is honored).
    pub fn from_env() -> Result<Self> {
        tolerate_missing_env_file(dotenvy::dotenv())?;

        let mut config = Self::default();

        if let Ok(url) = std::env::var("FORUM_API_BASE_URL") {
            config = config.with_base_url(&url);
        }
        if let Some(secs) = read_secs("FORUM_CACHE_TTL_SECS")? {
            config.cache_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = read_secs("FORUM_REQUEST_TIMEOUT_SECS")? {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Ok(dir) = std::env::var("FORUM_DATA_DIR") {
            config.data_dir = Some(PathBuf::from(dir));
        }

        Ok(config)
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Joins a path (with leading `/`) onto the base URL.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

// A missing .env file is fine; an unreadable or malformed one is not
fn tolerate_missing_env_file<T>(loaded: dotenvy::Result<T>) -> Result<()> {
    match loaded {
        Ok(_) => Ok(()),
        Err(e) if e.not_found() => Ok(()),
        Err(e) => Err(e).context("Failed to load .env file"),
    }
}

fn read_secs(var: &str) -> Result<Option<u64>> {
    match std::env::var(var) {
        Ok(raw) => {
            let secs = raw
                .trim()
                .parse::<u64>()
                .with_context(|| format!("{} must be a number of seconds, got {:?}", var, raw))?;
            Ok(Some(secs))
        }
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_public_api() {
        let config = ClientConfig::default();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.cache_ttl, Duration::from_secs(300));
        assert!(config.data_dir.is_none());
    }

    #[test]
    fn missing_env_file_is_ignored() {
        let missing = dotenvy::Error::Io(std::io::Error::from(std::io::ErrorKind::NotFound));
        assert!(tolerate_missing_env_file::<()>(Err(missing)).is_ok());
        assert!(tolerate_missing_env_file(Ok(PathBuf::from(".env"))).is_ok());
    }

    #[test]
    fn broken_env_file_is_reported() {
        let malformed = dotenvy::Error::LineParse("FOO BAR=1".to_string(), 4);
        let err = tolerate_missing_env_file::<()>(Err(malformed)).unwrap_err();
        assert!(err.to_string().contains(".env"));

        let unreadable = dotenvy::Error::Io(std::io::Error::from(std::io::ErrorKind::PermissionDenied));
        assert!(tolerate_missing_env_file::<()>(Err(unreadable)).is_err());
    }

    #[test]
    fn trailing_slash_is_stripped() {
        let config = ClientConfig::default().with_base_url("http://localhost:5000/v1/");
        assert_eq!(config.endpoint("/threads"), "http://localhost:5000/v1/threads");
    }
}

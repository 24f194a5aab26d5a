//! Process configuration loaded from the environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::AppError;

/// Default interval between poll cycles of a subscription.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 30_000;
/// Lowest poll interval a subscription may use.
pub const MIN_POLL_INTERVAL_MS: u64 = 10_000;
/// Number of recent items fetched per tracked user and cycle.
pub const DEFAULT_PAGE_SIZE: usize = 5;

#[derive(Clone, Debug)]
pub struct Config {
    pub provider_url: String,
    pub provider_api_key: Option<String>,
    pub allow_guest: bool,
    pub request_timeout: Duration,
    pub callback_secret: Option<String>,
    pub default_interval: Duration,
    pub min_interval: Duration,
    pub page_size: usize,
    pub logs_path: PathBuf,
    pub callback_url: Option<String>,
    pub watch_users: Vec<String>,
    pub deliver_backlog: bool,
}

impl Config {
    pub fn new() -> Self {
        Self {
            provider_url: "http://127.0.0.1:6060".to_string(),
            provider_api_key: None,
            allow_guest: true,
            request_timeout: Duration::from_millis(30_000),
            callback_secret: None,
            default_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            min_interval: Duration::from_millis(MIN_POLL_INTERVAL_MS),
            page_size: DEFAULT_PAGE_SIZE,
            logs_path: PathBuf::from("logs"),
            callback_url: None,
            watch_users: Vec::new(),
            deliver_backlog: false,
        }
    }

    /// Overrides defaults with values from environment variables.
    pub fn load(&mut self) -> Result<(), AppError> {
        if let Some(url) = Self::var("PROVIDER_URL") {
            self.provider_url = url.trim_end_matches('/').to_string();
        }
        self.provider_api_key = Self::var("PROVIDER_API_KEY");
        if let Some(v) = Self::var("ALLOW_GUEST") {
            self.allow_guest = v.eq_ignore_ascii_case("true");
        }
        if let Some(ms) = Self::parse_positive::<u64>("REQUEST_TIMEOUT_MS")? {
            self.request_timeout = Duration::from_millis(ms);
        }
        self.callback_secret = Self::var("CALLBACK_SECRET");
        if let Some(ms) = Self::parse_positive::<u64>("POLL_INTERVAL_MS")? {
            self.default_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = Self::parse_positive::<u64>("MIN_POLL_INTERVAL_MS")? {
            self.min_interval = Duration::from_millis(ms);
        }
        if let Some(n) = Self::parse_positive::<usize>("PAGE_SIZE")? {
            self.page_size = n;
        }
        if let Some(path) = Self::var("LOGS_PATH") {
            self.logs_path = PathBuf::from(path);
        }
        self.callback_url = Self::var("CALLBACK_URL");
        if let Some(users) = Self::var("WATCH_USERS") {
            self.watch_users = users
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = Self::var("DELIVER_BACKLOG") {
            self.deliver_backlog = v.eq_ignore_ascii_case("true");
        }
        Ok(())
    }

    /// Fails when the provider can only be reached with credentials that are missing.
    pub fn check_credentials(&self) -> Result<(), AppError> {
        if self.provider_api_key.is_none() && !self.allow_guest {
            return Err(AppError::MissingConfig {
                key: "PROVIDER_API_KEY".to_string(),
            });
        }
        Ok(())
    }

    fn var(key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.trim().is_empty())
    }

    fn parse_positive<T>(key: &str) -> Result<Option<T>, AppError>
    where
        T: FromStr + PartialOrd + Default,
    {
        let Some(raw) = Self::var(key) else {
            return Ok(None);
        };
        match raw.trim().parse::<T>() {
            Ok(v) if v > T::default() => Ok(Some(v)),
            _ => Err(AppError::invalid(key, raw, "must be a positive integer")),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEYS: [&str; 6] = [
        "REQUEST_TIMEOUT_MS",
        "POLL_INTERVAL_MS",
        "PAGE_SIZE",
        "WATCH_USERS",
        "ALLOW_GUEST",
        "PROVIDER_URL",
    ];

    fn clear_env() {
        for key in KEYS {
            // SAFETY: tests touching the environment run serially.
            unsafe { std::env::remove_var(key) };
        }
    }

    fn set_env(key: &str, value: &str) {
        // SAFETY: tests touching the environment run serially.
        unsafe { std::env::set_var(key, value) };
    }

    #[test]
    #[serial_test::serial]
    fn test_load_defaults() {
        clear_env();
        let mut config = Config::new();
        config.load().unwrap();

        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.default_interval, Duration::from_secs(30));
        assert_eq!(config.min_interval, Duration::from_secs(10));
        assert_eq!(config.page_size, 5);
        assert!(config.allow_guest);
        assert!(config.watch_users.is_empty());
    }

    #[test]
    #[serial_test::serial]
    fn test_load_overrides() {
        clear_env();
        set_env("POLL_INTERVAL_MS", "45000");
        set_env("WATCH_USERS", "12345, jack ,,");
        set_env("ALLOW_GUEST", "FALSE");
        set_env("PROVIDER_URL", "https://provider.test/");

        let mut config = Config::new();
        config.load().unwrap();
        clear_env();

        assert_eq!(config.default_interval, Duration::from_millis(45_000));
        assert_eq!(config.watch_users, vec!["12345", "jack"]);
        assert!(!config.allow_guest);
        assert_eq!(config.provider_url, "https://provider.test");
        assert!(matches!(
            config.check_credentials(),
            Err(AppError::MissingConfig { .. })
        ));
    }

    #[test]
    #[serial_test::serial]
    fn test_load_rejects_non_positive() {
        clear_env();
        set_env("REQUEST_TIMEOUT_MS", "0");
        let mut config = Config::new();
        let result = config.load();
        clear_env();
        assert!(matches!(result, Err(AppError::InvalidConfig { .. })));

        set_env("PAGE_SIZE", "five");
        let result = config.load();
        clear_env();
        assert!(matches!(result, Err(AppError::InvalidConfig { .. })));
    }
}

use crate::pipeline::RateLimitPolicy;
use crate::resource::DEFAULT_API_URL;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Runtime configuration for the API client.
/// Values are sourced from environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub user_agent: String,
    pub api_url: Url,
    pub api_version: String,
    pub timeout_secs: u64,
    pub max_concurrent: usize,
    pub policy: RateLimitPolicy,
}

impl Config {
    /// Configuration with defaults for everything but the user agent.
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            // constant is a valid absolute URL
            api_url: Url::parse(DEFAULT_API_URL).expect("default API URL parses"),
            api_version: "12".to_string(),
            timeout_secs: 30,
            max_concurrent: 5,
            policy: RateLimitPolicy::default(),
        }
    }

    /// Load configuration from environment.
    ///
    /// Env vars:
    /// - NS_USER_AGENT [required]
    /// - NS_API_URL (default: https://www.nationstates.net/cgi-bin/api.cgi)
    /// - NS_API_VERSION (default: 12)
    /// - NS_HTTP_TIMEOUT_SECS (default: 30)
    /// - NS_MAX_CONCURRENT (default: 5)
    /// - NS_RATELIMIT_ENABLED (default: true)
    /// - NS_RATELIMIT_SLEEP (default: false)
    /// - NS_RATELIMIT_MAX (default: 48)
    /// - NS_RATELIMIT_WITHIN_SECS (default: 30)
    /// - NS_RATELIMIT_SLEEP_SECS (default: 4)
    /// - NS_RATELIMIT_MAX_SLEEPS (default: 10)
    /// - NS_MAX_SAFE_REQUESTS (default: 48)
    /// - NS_SERVER_LIMIT (default: 50)
    /// - NS_REPORT_SKEW_MS (default: 2000)
    pub fn from_env() -> Result<Self, String> {
        let user_agent = env::var("NS_USER_AGENT")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| "Missing NS_USER_AGENT (the API rejects anonymous clients)".to_string())?;
        let mut cfg = Self::new(user_agent);

        if let Ok(raw) = env::var("NS_API_URL") {
            cfg.api_url =
                Url::parse(&raw).map_err(|e| format!("Invalid NS_API_URL {:?}: {}", raw, e))?;
        }
        if let Ok(v) = env::var("NS_API_VERSION") {
            cfg.api_version = v;
        }
        cfg.timeout_secs = parsed("NS_HTTP_TIMEOUT_SECS", cfg.timeout_secs)?;
        cfg.max_concurrent = parsed("NS_MAX_CONCURRENT", cfg.max_concurrent)?;

        let p = &mut cfg.policy;
        p.enforce = parsed("NS_RATELIMIT_ENABLED", p.enforce)?;
        p.sleep = parsed("NS_RATELIMIT_SLEEP", p.sleep)?;
        p.max_allowed = parsed("NS_RATELIMIT_MAX", p.max_allowed)?;
        p.within = Duration::from_secs(parsed("NS_RATELIMIT_WITHIN_SECS", p.within.as_secs())?);
        p.sleep_time =
            Duration::from_secs(parsed("NS_RATELIMIT_SLEEP_SECS", p.sleep_time.as_secs())?);
        p.max_sleeps = parsed("NS_RATELIMIT_MAX_SLEEPS", p.max_sleeps)?;
        p.max_safe_requests = parsed("NS_MAX_SAFE_REQUESTS", p.max_safe_requests)?;
        p.server_limit = parsed("NS_SERVER_LIMIT", p.server_limit)?;
        p.report_skew = Duration::from_millis(parsed(
            "NS_REPORT_SKEW_MS",
            p.report_skew.as_millis() as u64,
        )?);

        Ok(cfg)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// Unset means default; set but malformed is an error rather than a silent default.
fn parsed<T: FromStr>(key: &str, default: T) -> Result<T, String> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| format!("Invalid value for {}: {:?}", key, raw)),
        Err(_) => Ok(default),
    }
}

//! Process configuration read from the environment.

use std::env;

use crate::payments::DEFAULT_API_BASE;
use crate::rate_limit::RateLimitConfig;

pub const MIN_JWT_SECRET_LEN: usize = 32;

const REQUIRED: &[&str] = &["SUPABASE_URL", "SUPABASE_ANON_KEY", "SUPABASE_JWT_SECRET"];

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("missing required environment variables: {0:?}")]
    Missing(Vec<&'static str>),
    #[error("SUPABASE_JWT_SECRET must be at least {MIN_JWT_SECRET_LEN} characters long")]
    WeakJwtSecret,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_service_role_key: Option<String>,
    pub jwt_secret: String,
    pub stripe_secret_key: Option<String>,
    pub stripe_webhook_secret: Option<String>,
    pub stripe_api_base: String,
    pub frontend_url: Option<String>,
    pub bind_addr: String,
    pub rate_limit_enabled: bool,
    pub rate_limits: RateLimitConfig,
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let missing: Vec<&'static str> = REQUIRED.iter().copied().filter(|v| optional(v).is_none()).collect();
        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }
        let required = |name: &str| optional(name).unwrap_or_default();
        let jwt_secret = required("SUPABASE_JWT_SECRET");
        if jwt_secret.len() < MIN_JWT_SECRET_LEN {
            return Err(ConfigError::WeakJwtSecret);
        }
        Ok(Self {
            supabase_url: required("SUPABASE_URL").trim_end_matches('/').to_string(),
            supabase_anon_key: required("SUPABASE_ANON_KEY"),
            supabase_service_role_key: optional("SUPABASE_SERVICE_ROLE_KEY"),
            jwt_secret,
            stripe_secret_key: optional("STRIPE_SECRET_KEY"),
            stripe_webhook_secret: optional("STRIPE_WEBHOOK_SECRET"),
            stripe_api_base: optional("STRIPE_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            frontend_url: optional("FRONTEND_URL"),
            bind_addr: optional("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            rate_limit_enabled: optional("RATE_LIMIT_ENABLED").map(|v| v != "false" && v != "0").unwrap_or(true),
            rate_limits: RateLimitConfig::from_env(),
        })
    }

    /// Non-fatal gaps worth a line in the startup log.
    pub fn warnings(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.stripe_secret_key.is_none() {
            out.push("STRIPE_SECRET_KEY not set; payment intents are disabled");
        }
        if self.stripe_webhook_secret.is_none() {
            out.push("STRIPE_WEBHOOK_SECRET not set; webhook deliveries will be rejected");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear() {
        for v in REQUIRED.iter().chain(["STRIPE_SECRET_KEY", "STRIPE_WEBHOOK_SECRET", "BIND_ADDR", "STRIPE_API_BASE"].iter()) {
            env::remove_var(v);
        }
    }

    #[test]
    #[serial]
    fn missing_required_vars_are_listed() {
        clear();
        env::set_var("SUPABASE_URL", "https://db.example.org");
        assert_eq!(
            Settings::from_env().unwrap_err(),
            ConfigError::Missing(vec!["SUPABASE_ANON_KEY", "SUPABASE_JWT_SECRET"])
        );
    }

    #[test]
    #[serial]
    fn short_jwt_secret_is_rejected() {
        clear();
        env::set_var("SUPABASE_URL", "https://db.example.org");
        env::set_var("SUPABASE_ANON_KEY", "anon");
        env::set_var("SUPABASE_JWT_SECRET", "short");
        assert_eq!(Settings::from_env().unwrap_err(), ConfigError::WeakJwtSecret);
    }

    #[test]
    #[serial]
    fn defaults_fill_optional_values() {
        clear();
        env::set_var("SUPABASE_URL", "https://db.example.org/");
        env::set_var("SUPABASE_ANON_KEY", "anon");
        env::set_var("SUPABASE_JWT_SECRET", "x".repeat(40));
        let s = Settings::from_env().unwrap();
        assert_eq!(s.supabase_url, "https://db.example.org");
        assert_eq!(s.bind_addr, "0.0.0.0:8080");
        assert_eq!(s.stripe_api_base, DEFAULT_API_BASE);
        assert_eq!(s.warnings().len(), 2);
    }

    #[test]
    #[serial]
    fn feed_timings_come_from_milliseconds() {
        env::set_var("FEED_FETCH_TIMEOUT_MS", "2500");
        env::remove_var("FEED_SEARCH_DEBOUNCE_MS");
        let feed = crate::feed::FeedConfig::from_env();
        env::remove_var("FEED_FETCH_TIMEOUT_MS");
        assert_eq!(feed.fetch_timeout, std::time::Duration::from_millis(2500));
        assert_eq!(feed.search_debounce, std::time::Duration::from_millis(500));
        assert_eq!(feed.max_visible, 50);
    }
}

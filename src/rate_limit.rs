use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use dashmap::DashMap;

use crate::models::Id;

/// Checks between sweeps of idle keys.
const SWEEP_EVERY: usize = 1024;

#[derive(Default)]
struct Window {
    span: Duration,
    hits: VecDeque<Instant>,
}

impl Window {
    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.hits.front() {
            if now.duration_since(*front) >= self.span { self.hits.pop_front(); } else { break; }
        }
    }
}

/// Sliding window in-memory rate limiter (process local, best effort).
#[derive(Clone)]
pub struct InMemoryRateLimiter {
    store: Arc<DashMap<String, Window>>,
    checks: Arc<AtomicUsize>,
    pub enabled: bool,
}

impl InMemoryRateLimiter {
    pub fn new(enabled: bool) -> Self {
        Self { store: Arc::new(DashMap::new()), checks: Arc::new(AtomicUsize::new(0)), enabled }
    }

    /// Returns true if allowed, false if limited.
    pub fn check(&self, key: &str, limit: usize, window: Duration) -> bool {
        if !self.enabled { return true; }
        let now = Instant::now();
        let allowed = {
            let mut entry = self.store.entry(key.to_string()).or_default();
            entry.span = window;
            entry.prune(now);
            if entry.hits.len() < limit {
                entry.hits.push_back(now);
                true
            } else {
                false
            }
        };
        if (self.checks.fetch_add(1, Ordering::Relaxed) + 1) % SWEEP_EVERY == 0 {
            self.sweep();
        }
        allowed
    }

    /// Drop keys with no hits left inside their window.
    pub fn sweep(&self) {
        let now = Instant::now();
        self.store.retain(|_, w| {
            w.prune(now);
            !w.hits.is_empty()
        });
    }

    pub fn tracked_keys(&self) -> usize {
        self.store.len()
    }
}

/// Per-action limits derived from env.
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub thread_limit: usize,
    pub thread_window: Duration,
    pub comment_limit: usize,
    pub comment_window: Duration,
    pub prayer_limit: usize,
    pub prayer_window: Duration,
    pub interaction_limit: usize,
    pub interaction_window: Duration,
    pub form_limit: usize,
    pub form_window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            thread_limit: 5,
            thread_window: Duration::from_secs(300),
            comment_limit: 10,
            comment_window: Duration::from_secs(60),
            prayer_limit: 5,
            prayer_window: Duration::from_secs(300),
            interaction_limit: 60,
            interaction_window: Duration::from_secs(60),
            form_limit: 5,
            form_window: Duration::from_secs(600),
        }
    }
}

impl RateLimitConfig {
    pub fn from_env() -> Self {
        fn usize_env(name: &str, default: usize) -> usize { std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default) }
        fn dur_env(name: &str, default: Duration) -> Duration {
            std::env::var(name).ok().and_then(|v| v.parse().ok()).map(Duration::from_secs).unwrap_or(default)
        }
        let d = Self::default();
        Self {
            thread_limit: usize_env("RL_THREAD_LIMIT", d.thread_limit),
            thread_window: dur_env("RL_THREAD_WINDOW", d.thread_window),
            comment_limit: usize_env("RL_COMMENT_LIMIT", d.comment_limit),
            comment_window: dur_env("RL_COMMENT_WINDOW", d.comment_window),
            prayer_limit: usize_env("RL_PRAYER_LIMIT", d.prayer_limit),
            prayer_window: dur_env("RL_PRAYER_WINDOW", d.prayer_window),
            interaction_limit: usize_env("RL_INTERACTION_LIMIT", d.interaction_limit),
            interaction_window: dur_env("RL_INTERACTION_WINDOW", d.interaction_window),
            form_limit: usize_env("RL_FORM_LIMIT", d.form_limit),
            form_window: dur_env("RL_FORM_WINDOW", d.form_window),
        }
    }
}

/// High level guard used by the feed components and route handlers.
#[derive(Clone)]
pub struct RateLimiterFacade {
    pub limiter: InMemoryRateLimiter,
    pub cfg: RateLimitConfig,
}

impl RateLimiterFacade {
    pub fn new(limiter: InMemoryRateLimiter, cfg: RateLimitConfig) -> Self { Self { limiter, cfg } }
    pub fn allow_thread(&self, user: Id) -> bool { self.limiter.check(&format!("thread:{user}"), self.cfg.thread_limit, self.cfg.thread_window) }
    pub fn allow_comment(&self, user: Id) -> bool { self.limiter.check(&format!("comment:{user}"), self.cfg.comment_limit, self.cfg.comment_window) }
    pub fn allow_prayer(&self, user: Id) -> bool { self.limiter.check(&format!("prayer:{user}"), self.cfg.prayer_limit, self.cfg.prayer_window) }
    pub fn allow_interaction(&self, user: Id) -> bool { self.limiter.check(&format!("interaction:{user}"), self.cfg.interaction_limit, self.cfg.interaction_window) }
    /// Anonymous site forms (newsletter, contact) keyed by client address.
    pub fn allow_form(&self, ip: &str) -> bool { self.limiter.check(&format!("form:{ip}"), self.cfg.form_limit, self.cfg.form_window) }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn sliding_window_basic() {
        let rl = InMemoryRateLimiter::new(true);
        let window = Duration::from_millis(50);
        for _ in 0..3 { assert!(rl.check("k", 3, window)); }
        assert!(!rl.check("k", 3, window));
    }

    #[test]
    fn facade_keys_actions_separately() {
        let cfg = RateLimitConfig { comment_limit: 1, interaction_limit: 1, ..RateLimitConfig::default() };
        let rl = RateLimiterFacade::new(InMemoryRateLimiter::new(true), cfg);
        let user = uuid::Uuid::new_v4();
        assert!(rl.allow_comment(user));
        assert!(!rl.allow_comment(user));
        assert!(rl.allow_interaction(user));
        assert!(rl.allow_comment(uuid::Uuid::new_v4()));
    }

    #[test]
    fn idle_keys_are_swept() {
        let rl = InMemoryRateLimiter::new(true);
        assert!(rl.check("short", 1, Duration::from_millis(20)));
        assert!(rl.check("long", 1, Duration::from_secs(60)));
        std::thread::sleep(Duration::from_millis(40));
        rl.sweep();
        assert_eq!(rl.tracked_keys(), 1);
        assert!(!rl.check("long", 1, Duration::from_secs(60)));
        assert!(rl.check("short", 1, Duration::from_millis(20)));
    }

    #[test]
    fn checks_sweep_periodically() {
        let rl = InMemoryRateLimiter::new(true);
        for i in 0..SWEEP_EVERY - 1 {
            assert!(rl.check(&format!("ip:{i}"), 1, Duration::ZERO));
        }
        assert_eq!(rl.tracked_keys(), SWEEP_EVERY - 1);
        assert!(rl.check("last", 1, Duration::from_secs(60)));
        assert_eq!(rl.tracked_keys(), 1);
    }

    #[test]
    fn disabled_limiter_allows_everything() {
        let rl = InMemoryRateLimiter::new(false);
        for _ in 0..10 { assert!(rl.check("k", 1, Duration::from_secs(60))); }
    }
}

//! In-memory request limits for the idea endpoint.
//!
//! Two independent checks run per request: a fixed per-client window
//! (default 5 requests per 60 s) and daily caps on requests per client and on
//! distinct clients. Daily counters reset when the UTC date changes. State is
//! process-local and lost on restart.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use smol_str::SmolStr;
use web_time::Instant;

use crate::error::{DailyLimitReason, IdeaError};

/// Expired windows are swept every this many admissions.
const PRUNE_EVERY: u64 = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_requests_per_window: u32,
    pub window_secs: u64,
    pub max_requests_per_client_per_day: u32,
    pub max_unique_clients_per_day: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests_per_window: 5,
            window_secs: 60,
            max_requests_per_client_per_day: 20,
            max_unique_clients_per_day: 4,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Returned when a request is let through.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Allowance {
    /// Requests left in the current window.
    pub remaining: u32,
    /// Seconds until the current window resets.
    pub reset_in: u64,
    /// Requests left today for this client.
    pub daily_remaining: u32,
    pub unique_clients_today: usize,
}

#[derive(Debug)]
struct Window {
    count: u32,
    reset_at: Instant,
}

#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: HashMap<SmolStr, Window>,
    admissions: u64,
    day: NaiveDate,
    daily_counts: HashMap<SmolStr, u32>,
    clients_today: HashSet<SmolStr>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: HashMap::new(),
            admissions: 0,
            day: Utc::now().date_naive(),
            daily_counts: HashMap::new(),
            clients_today: HashSet::new(),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Check and count a request from `client` at the current time.
    pub fn admit(&mut self, client: &str) -> Result<Allowance, IdeaError> {
        self.admit_at(client, Instant::now(), Utc::now().date_naive())
    }

    /// Check and count a request at an explicit instant and UTC date.
    ///
    /// The window check runs first; a request it lets through counts against
    /// the window even if a daily cap then rejects it.
    pub fn admit_at(
        &mut self,
        client: &str,
        now: Instant,
        today: NaiveDate,
    ) -> Result<Allowance, IdeaError> {
        self.admissions += 1;
        if self.admissions % PRUNE_EVERY == 0 || today != self.day {
            self.prune(now);
        }

        let (remaining, reset_in) = self.check_window(client, now)?;
        let (daily_remaining, unique_clients_today) = self.check_daily(client, today)?;
        Ok(Allowance {
            remaining,
            reset_in,
            daily_remaining,
            unique_clients_today,
        })
    }

    fn check_window(&mut self, client: &str, now: Instant) -> Result<(u32, u64), IdeaError> {
        let max = self.config.max_requests_per_window;
        let window = self.config.window();

        let entry = self
            .windows
            .entry(SmolStr::new(client))
            .or_insert(Window {
                count: 0,
                reset_at: now,
            });
        if entry.count == 0 || now > entry.reset_at {
            *entry = Window {
                count: 1,
                reset_at: now + window,
            };
            return Ok((max.saturating_sub(1), ceil_secs(window)));
        }

        let reset_in = ceil_secs(entry.reset_at.duration_since(now));
        if entry.count < max {
            entry.count += 1;
            return Ok((max - entry.count, reset_in));
        }

        tracing::warn!(client, retry_after = reset_in, "idea request rate limited");
        Err(IdeaError::RateLimited {
            retry_after: reset_in,
        })
    }

    fn check_daily(&mut self, client: &str, today: NaiveDate) -> Result<(u32, usize), IdeaError> {
        if today != self.day {
            tracing::info!(%today, "daily idea limits reset");
            self.day = today;
            self.daily_counts.clear();
            self.clients_today.clear();
        }

        let known = self.clients_today.contains(client);
        if !known && self.clients_today.len() >= self.config.max_unique_clients_per_day {
            tracing::warn!(
                clients = self.clients_today.len(),
                "daily unique client limit reached"
            );
            return Err(IdeaError::DailyLimit {
                reason: DailyLimitReason::GlobalUserLimit,
            });
        }

        let count = self.daily_counts.get(client).copied().unwrap_or(0);
        if count >= self.config.max_requests_per_client_per_day {
            tracing::warn!(client, count, "client hit daily idea limit");
            return Err(IdeaError::DailyLimit {
                reason: DailyLimitReason::UserDailyLimit,
            });
        }

        let key = SmolStr::new(client);
        self.clients_today.insert(key.clone());
        self.daily_counts.insert(key, count + 1);
        Ok((
            self.config.max_requests_per_client_per_day - (count + 1),
            self.clients_today.len(),
        ))
    }

    /// Forget window entries whose window has passed.
    pub fn prune(&mut self, now: Instant) {
        self.windows.retain(|_, w| now <= w.reset_at);
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

fn ceil_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}

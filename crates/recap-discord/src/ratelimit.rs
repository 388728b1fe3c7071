//! Per-user sliding-window rate limiting.
//!
//! State is a bounded queue of invocation instants per (user, command).
//! Expired entries are evicted on each check; there is no background
//! sweeper.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Which limit bucket a command falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Summarize,
    Config,
    Schedule,
}

pub struct RateLimiter {
    window: Duration,
    summarize_limit: usize,
    config_limit: usize,
    state: Mutex<HashMap<(String, CommandKind), VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(window: Duration, summarize_limit: usize, config_limit: usize) -> Self {
        Self {
            window,
            summarize_limit,
            config_limit,
            state: Mutex::new(HashMap::new()),
        }
    }

    fn limit_for(&self, kind: CommandKind) -> usize {
        match kind {
            CommandKind::Summarize => self.summarize_limit,
            CommandKind::Config | CommandKind::Schedule => self.config_limit,
        }
    }

    /// Record an invocation attempt. `Ok` admits it; `Err` carries the
    /// seconds until the oldest windowed entry expires.
    pub fn check(&self, user_id: &str, kind: CommandKind) -> Result<(), u64> {
        self.check_at(user_id, kind, Instant::now())
    }

    fn check_at(&self, user_id: &str, kind: CommandKind, now: Instant) -> Result<(), u64> {
        let limit = self.limit_for(kind);
        let mut state = self.state.lock().unwrap();
        let queue = state
            .entry((user_id.to_string(), kind))
            .or_insert_with(VecDeque::new);

        while let Some(front) = queue.front() {
            if now.duration_since(*front) >= self.window {
                queue.pop_front();
            } else {
                break;
            }
        }

        if queue.len() >= limit {
            let oldest = *queue.front().expect("non-empty at limit");
            let retry_after = self.window.saturating_sub(now.duration_since(oldest));
            return Err(retry_after.as_secs().max(1));
        }

        queue.push_back(now);
        Ok(())
    }
}

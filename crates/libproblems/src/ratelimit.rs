use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Per-uid sliding-window limiter for problem creation.
///
/// Accepted attempts are recorded; denied attempts are not, so a client
/// hammering the broker does not extend its own penalty. Root is exempt.
pub struct RateLimiter {
    window: Duration,
    burst: usize,
    accepted: HashMap<u32, VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(window: Duration, burst: usize) -> Self {
        Self {
            window,
            burst,
            accepted: HashMap::new(),
        }
    }

    /// Returns true and records the attempt if `uid` is under its budget.
    pub fn check_and_record(&mut self, uid: u32) -> bool {
        self.check_and_record_at(uid, Instant::now())
    }

    fn check_and_record_at(&mut self, uid: u32, now: Instant) -> bool {
        if uid == 0 || self.burst == 0 {
            return true;
        }

        let stamps = self.accepted.entry(uid).or_default();
        while let Some(front) = stamps.front() {
            if now.duration_since(*front) >= self.window {
                stamps.pop_front();
            } else {
                break;
            }
        }

        if stamps.len() >= self.burst {
            return false;
        }
        stamps.push_back(now);
        true
    }
}

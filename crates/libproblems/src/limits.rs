use std::time::Duration;

/// Broker-wide ceilings. A value of 0 disables the corresponding limit.
#[derive(Debug, Clone)]
pub struct Limits {
    /// Open sessions allowed per uid.
    pub max_open_sessions: usize,
    /// Elements allowed in a single problem.
    pub max_elements: usize,
    /// Aggregate payload size of a single problem, in bytes.
    pub max_data_size: u64,
    /// Problems one uid may own in total.
    pub max_user_problems: usize,
    /// Unfinished ingestion tasks allowed per session.
    pub max_pending_tasks: usize,
    /// Sliding window consulted by the rate limiter.
    pub rate_window: Duration,
    /// Accepted problem creations per uid within the window.
    pub rate_burst: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_open_sessions: 5,
            max_elements: 100,
            max_data_size: 2 * 1024 * 1024 * 1023,
            max_user_problems: 1000,
            max_pending_tasks: 10,
            rate_window: Duration::from_secs(15),
            rate_burst: 10,
        }
    }
}

impl Limits {
    pub fn elements_exceeded(&self, count: usize) -> bool {
        self.max_elements > 0 && count > self.max_elements
    }

    pub fn data_size_exceeded(&self, size: u64) -> bool {
        self.max_data_size > 0 && size > self.max_data_size
    }
}

//! Rate limiting for repetitive log lines
//!
//! Sender pumps and capture loops can fail on every frame once a peer or a
//! device goes away. The throttler lets the first occurrence through and
//! counts the rest until the interval elapses.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
struct Entry {
    /// When a line for this key was last emitted
    last: Instant,
    /// Lines swallowed since `last`
    suppressed: u64,
}

/// Per-key log throttler
///
/// # Example
///
/// ```rust
/// use live_publisher::utils::LogThrottler;
/// use std::time::Duration;
///
/// let throttler = LogThrottler::new(Duration::from_secs(5));
/// assert!(throttler.should_log("write_sample"));
/// assert!(!throttler.should_log("write_sample"));
/// assert_eq!(throttler.suppressed("write_sample"), 1);
/// ```
#[derive(Debug)]
pub struct LogThrottler {
    entries: Mutex<HashMap<String, Entry>>,
    interval: Duration,
}

impl LogThrottler {
    /// # Arguments
    ///
    /// * `interval` - Minimum gap between two emitted lines for the same key
    pub fn new(interval: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            interval,
        }
    }

    pub fn with_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Returns true if a line for `key` should be emitted now
    pub fn should_log(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.get_mut(key) {
            Some(entry) if now.duration_since(entry.last) < self.interval => {
                entry.suppressed += 1;
                false
            }
            Some(entry) => {
                entry.last = now;
                entry.suppressed = 0;
                true
            }
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        last: now,
                        suppressed: 0,
                    },
                );
                true
            }
        }
    }

    /// Lines dropped for `key` since it was last emitted
    pub fn suppressed(&self, key: &str) -> u64 {
        self.entries
            .lock()
            .get(key)
            .map(|e| e.suppressed)
            .unwrap_or(0)
    }

    /// Forget `key`, e.g. once the failing condition recovered
    pub fn clear(&self, key: &str) {
        self.entries.lock().remove(key);
    }
}

impl Default for LogThrottler {
    fn default() -> Self {
        Self::with_secs(5)
    }
}

/// Throttled `tracing::warn!`
#[macro_export]
macro_rules! warn_throttled {
    ($throttler:expr, $key:expr, $($arg:tt)*) => {
        if $throttler.should_log($key) {
            tracing::warn!($($arg)*);
        }
    };
}

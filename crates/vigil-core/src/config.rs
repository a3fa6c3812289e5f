use std::time::Duration;

/// Scheduler tuning, installed per runtime with [`configure`](crate::configure).
///
/// ```rust
/// use std::time::Duration;
/// use vigil_core::Config;
///
/// let cfg = Config::default()
///     .release_debounce(Duration::from_millis(25))
///     .max_reruns_per_flush(50);
/// assert_eq!(cfg.max_reruns, 50);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    /// Delay between the last `release()` and the batched removal pass.
    pub release_debounce: Duration,
    /// How often a single observer may run within one flush before it is
    /// treated as runaway and skipped.
    pub max_reruns: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            release_debounce: Duration::from_millis(10),
            max_reruns: 100,
        }
    }
}

impl Config {
    pub fn release_debounce(mut self, d: Duration) -> Self {
        self.release_debounce = d;
        self
    }

    pub fn max_reruns_per_flush(mut self, n: usize) -> Self {
        self.max_reruns = n.max(1);
        self
    }
}

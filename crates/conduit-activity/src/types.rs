use std::time::Duration;

/// Tunable parameters for the adaptive window, one copy shared by every
/// per-user window.
#[derive(Debug, Clone, Copy)]
pub struct BatchingParams {
    pub window_initial: Duration,
    pub window_typing_ext: Duration,
    pub min_batch: usize,
    pub max_batch: usize,
    pub max_wait: Duration,
}

impl Default for BatchingParams {
    fn default() -> Self {
        Self {
            window_initial: Duration::from_millis(1500),
            window_typing_ext: Duration::from_millis(5000),
            min_batch: 2,
            max_batch: 5,
            max_wait: Duration::from_secs(30),
        }
    }
}

use rand::Rng;
use std::time::Duration;

/// Exponential backoff with jitter for transient transport errors:
/// base 1s, factor 2, cap 30s, jitter ±20%.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base_ms: u64,
    factor: u32,
    cap_ms: u64,
    jitter_fraction: f64,
    attempt: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff {
            base_ms: 1_000,
            factor: 2,
            cap_ms: 30_000,
            jitter_fraction: 0.20,
            attempt: 0,
        }
    }
}

impl Backoff {
    /// The delay for the next attempt, then advances internal state.
    pub fn next_delay(&mut self) -> Duration {
        let raw = self.base_ms.saturating_mul(self.factor.pow(self.attempt) as u64);
        let capped = raw.min(self.cap_ms);
        self.attempt += 1;

        let jitter_span = (capped as f64 * self.jitter_fraction) as i64;
        let offset = if jitter_span > 0 {
            rand::thread_rng().gen_range(-jitter_span..=jitter_span)
        } else {
            0
        };
        let with_jitter = (capped as i64 + offset).max(0) as u64;
        Duration::from_millis(with_jitter)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Retries `f` with exponential backoff until it succeeds, a permanent
/// error is detected via `is_permanent`, or `max_attempts` is exhausted.
pub async fn retry_with_backoff<T, E, F, Fut>(
    max_attempts: u32,
    is_permanent: impl Fn(&E) -> bool,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let mut backoff = Backoff::default();
    let mut attempt = 0;
    loop {
        attempt += 1;
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) if is_permanent(&e) || attempt >= max_attempts => return Err(e),
            Err(_) => {
                tokio::time::sleep(backoff.next_delay()).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_grow_and_cap() {
        let mut b = Backoff::default();
        let d0 = b.next_delay().as_millis();
        let d1 = b.next_delay().as_millis();
        let d2 = b.next_delay().as_millis();
        // with 20% jitter, 1000ms roughly in [800,1200], 2000 in [1600,2400]
        assert!(d0 <= 1200);
        assert!(d1 <= 2400);
        assert!(d2 <= 4800);
    }

    #[tokio::test]
    async fn retries_until_success() {
        let mut calls = 0;
        let result: Result<(), &str> = retry_with_backoff(5, |_: &&str| false, || {
            calls += 1;
            async move {
                if calls < 3 {
                    Err("transient")
                } else {
                    Ok(())
                }
            }
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn stops_immediately_on_permanent_error() {
        let mut calls = 0;
        let result: Result<(), &str> = retry_with_backoff(5, |e: &&str| *e == "permanent", || {
            calls += 1;
            async move { Err("permanent") }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}

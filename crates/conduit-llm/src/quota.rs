use chrono::Utc;
use dashmap::DashMap;

/// Tracks per-profile spend against a daily USD budget, resetting at UTC
/// midnight. The supervisor checks `would_exceed` before issuing a call so
/// a runaway loop can't blow through the day's budget before the response
/// even comes back.
pub struct QuotaTracker {
    spent_usd: DashMap<String, (chrono::NaiveDate, f64)>,
    daily_limit_usd: f64,
}

impl QuotaTracker {
    pub fn new(daily_limit_usd: f64) -> Self {
        Self {
            spent_usd: DashMap::new(),
            daily_limit_usd,
        }
    }

    /// `true` if `additional_cost_usd` would push `profile` past its limit today.
    pub fn would_exceed(&self, profile: &str, additional_cost_usd: f64) -> bool {
        let today = Utc::now().date_naive();
        let spent = self
            .spent_usd
            .get(profile)
            .filter(|e| e.0 == today)
            .map(|e| e.1)
            .unwrap_or(0.0);
        spent + additional_cost_usd > self.daily_limit_usd
    }

    /// Record actual spend after a completed call.
    pub fn record(&self, profile: &str, cost_usd: f64) {
        let today = Utc::now().date_naive();
        self.spent_usd
            .entry(profile.to_string())
            .and_modify(|(date, spent)| {
                if *date == today {
                    *spent += cost_usd;
                } else {
                    *date = today;
                    *spent = cost_usd;
                }
            })
            .or_insert((today, cost_usd));
    }

    pub fn spent_today(&self, profile: &str) -> f64 {
        let today = Utc::now().date_naive();
        self.spent_usd
            .get(profile)
            .filter(|e| e.0 == today)
            .map(|e| e.1)
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_and_triggers_limit() {
        let q = QuotaTracker::new(1.0);
        assert!(!q.would_exceed("stage1", 0.5));
        q.record("stage1", 0.5);
        assert!(!q.would_exceed("stage1", 0.4));
        q.record("stage1", 0.4);
        assert!(q.would_exceed("stage1", 0.2));
    }

    #[test]
    fn profiles_are_tracked_independently() {
        let q = QuotaTracker::new(1.0);
        q.record("stage1", 0.9);
        assert!(!q.would_exceed("stage2", 0.9));
    }
}

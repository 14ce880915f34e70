use chrono::Utc;
use chrono_tz::Tz;

use crate::error::{CoreError, Result};

/// Process-wide clock bound to the persona's configured IANA timezone
/// (e.g. `America/Monterrey`). The Supervisor uses this to render the
/// "current local time" line injected into stage-1's dynamic prompt.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    tz: Tz,
}

impl Clock {
    pub fn new(iana_name: &str) -> Result<Self> {
        let tz: Tz = iana_name
            .parse()
            .map_err(|_| CoreError::Config(format!("unknown IANA timezone: {iana_name}")))?;
        Ok(Clock { tz })
    }

    /// A short human-readable line suitable for direct prompt injection,
    /// e.g. `Tuesday, 2026-08-01 14:32 (America/Monterrey)`.
    pub fn current_local_line(&self) -> String {
        let now = Utc::now().with_timezone(&self.tz);
        format!("{}", now.format("%A, %Y-%m-%d %H:%M (%Z)"))
    }

    pub fn now_local(&self) -> chrono::DateTime<Tz> {
        Utc::now().with_timezone(&self.tz)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_timezone() {
        assert!(Clock::new("Not/AZone").is_err());
    }

    #[test]
    fn formats_current_local_line() {
        let clock = Clock::new("America/Monterrey").unwrap();
        let line = clock.current_local_line();
        assert!(line.contains("CST") || line.contains("CDT"));
    }
}

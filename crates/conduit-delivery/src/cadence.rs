//! Human-pacing sleeps: reading the inbound text before replying, "typing"
//! before each bubble, and a small pause between bubbles so a burst of
//! replies doesn't land in the chat all at once.

use std::time::Duration;

use rand::Rng;

fn clamp_secs(value: f64, min: f64, max: f64) -> Duration {
    Duration::from_secs_f64(value.clamp(min, max))
}

/// `clamp(len(text) * 0.06, 0.5s, 4.0s)` — time spent "reading" the inbound
/// message before a reply is drafted.
pub fn read_delay(text: &str) -> Duration {
    clamp_secs(text.chars().count() as f64 * 0.06, 0.5, 4.0)
}

/// `clamp(len(bubble) * 0.08, 0.8s, 6.0s)` — roughly 60 words per minute
/// with variance baked into the per-bubble length, not a random jitter.
pub fn typing_time(bubble: &str) -> Duration {
    clamp_secs(bubble.chars().count() as f64 * 0.08, 0.8, 6.0)
}

/// Uniform `[0.5s, 1.5s]` pause between consecutive bubbles.
pub fn inter_bubble_pause() -> Duration {
    Duration::from_secs_f64(rand::thread_rng().gen_range(0.5..=1.5))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_delay_clamps_at_the_floor_for_short_text() {
        assert_eq!(read_delay("hi"), Duration::from_secs_f64(0.5));
    }

    #[test]
    fn read_delay_clamps_at_the_ceiling_for_long_text() {
        let text = "x".repeat(500);
        assert_eq!(read_delay(&text), Duration::from_secs_f64(4.0));
    }

    #[test]
    fn typing_time_scales_with_bubble_length_inside_bounds() {
        let bubble = "a".repeat(50);
        let expected = Duration::from_secs_f64(4.0);
        assert_eq!(typing_time(&bubble), expected);
    }

    #[test]
    fn typing_time_floors_at_point_eight_seconds() {
        assert_eq!(typing_time("hi"), Duration::from_secs_f64(0.8));
    }

    #[test]
    fn inter_bubble_pause_stays_within_its_band() {
        for _ in 0..50 {
            let d = inter_bubble_pause();
            assert!(d >= Duration::from_secs_f64(0.5) && d <= Duration::from_secs_f64(1.5));
        }
    }
}

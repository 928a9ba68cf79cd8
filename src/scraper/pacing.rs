use rand::Rng;
use std::time::Duration;

use crate::config::FetchConfig;

/// Nothing shorter than this is ever slept between requests
pub const MIN_PAGE_DELAY: Duration = Duration::from_secs(1);

/// Decides how long the engine waits before a request and after a session
/// refresh. Implementations only compute durations; the engine sleeps.
pub trait PacingPolicy: Send + Sync {
    fn page_delay(&self, request_count: u32) -> Duration;
    fn refresh_cooldown(&self) -> Duration;
}

/// Scale a base delay by how deep into the session we are and apply the floor.
/// Past 20 requests the delay grows by 1.2x, past 50 by 1.5x.
pub fn paced_delay(base_seconds: f64, request_count: u32) -> Duration {
    let factor = if request_count > 50 {
        1.5
    } else if request_count > 20 {
        1.2
    } else {
        1.0
    };

    let seconds = base_seconds * factor;
    if !seconds.is_finite() {
        return MIN_PAGE_DELAY;
    }
    Duration::from_secs_f64(seconds).max(MIN_PAGE_DELAY)
}

/// Randomized human-like pacing drawn from the configured ranges
#[derive(Debug, Clone)]
pub struct HumanPacing {
    delay_min: f64,
    delay_max: f64,
    jitter: f64,
    cooldown_min: f64,
    cooldown_max: f64,
}

impl HumanPacing {
    pub fn from_config(config: &FetchConfig) -> Self {
        Self {
            delay_min: config.delay_min_seconds,
            delay_max: config.delay_max_seconds,
            jitter: config.jitter_seconds.abs(),
            cooldown_min: config.refresh_cooldown_min_seconds,
            cooldown_max: config.refresh_cooldown_max_seconds,
        }
    }

    /// Base delay override, e.g. from `--delay`
    pub fn with_fixed_delay(mut self, seconds: f64) -> Self {
        self.delay_min = seconds;
        self.delay_max = seconds;
        self
    }
}

impl PacingPolicy for HumanPacing {
    fn page_delay(&self, request_count: u32) -> Duration {
        let mut rng = rand::thread_rng();
        let base = uniform(&mut rng, self.delay_min, self.delay_max);
        let jitter = uniform(&mut rng, -self.jitter, self.jitter);
        paced_delay(base + jitter, request_count)
    }

    fn refresh_cooldown(&self) -> Duration {
        let mut rng = rand::thread_rng();
        let seconds = uniform(&mut rng, self.cooldown_min, self.cooldown_max).max(0.0);
        Duration::from_secs_f64(seconds)
    }
}

fn uniform<R: Rng>(rng: &mut R, low: f64, high: f64) -> f64 {
    if high > low {
        rng.gen_range(low..high)
    } else {
        low
    }
}

/// Never waits
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDelay;

impl PacingPolicy for NoDelay {
    fn page_delay(&self, _request_count: u32) -> Duration {
        Duration::ZERO
    }

    fn refresh_cooldown(&self) -> Duration {
        Duration::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paced_delay_escalates() {
        assert_eq!(paced_delay(2.0, 0), Duration::from_secs(2));
        assert_eq!(paced_delay(2.0, 20), Duration::from_secs(2));
        assert_eq!(paced_delay(2.0, 21), Duration::from_secs_f64(2.4));
        assert_eq!(paced_delay(2.0, 50), Duration::from_secs_f64(2.4));
        assert_eq!(paced_delay(2.0, 51), Duration::from_secs(3));
    }

    #[test]
    fn test_paced_delay_floor() {
        assert_eq!(paced_delay(0.2, 0), MIN_PAGE_DELAY);
        assert_eq!(paced_delay(-3.0, 60), MIN_PAGE_DELAY);
        assert_eq!(paced_delay(f64::NAN, 0), MIN_PAGE_DELAY);
    }

    #[test]
    fn test_human_pacing_within_bounds() {
        let pacing = HumanPacing::from_config(&FetchConfig::default());
        for count in [0, 10, 30, 80] {
            let delay = pacing.page_delay(count);
            // (5.0 + 0.5) * 1.5
            assert!(delay >= MIN_PAGE_DELAY);
            assert!(delay <= Duration::from_secs_f64(8.25));
        }

        let cooldown = pacing.refresh_cooldown();
        assert!(cooldown >= Duration::from_secs(10));
        assert!(cooldown <= Duration::from_secs(20));
    }

    #[test]
    fn test_fixed_delay_override() {
        let pacing = HumanPacing::from_config(&FetchConfig {
            jitter_seconds: 0.0,
            ..FetchConfig::default()
        })
        .with_fixed_delay(3.0);
        assert_eq!(pacing.page_delay(0), Duration::from_secs(3));
    }

    #[test]
    fn test_no_delay() {
        assert_eq!(NoDelay.page_delay(99), Duration::ZERO);
        assert_eq!(NoDelay.refresh_cooldown(), Duration::ZERO);
    }
}

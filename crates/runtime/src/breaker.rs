//! Per-model rate-limit breaker. When one model accumulates too many
//! `rate_limited` outcomes inside a rolling window, further calls to it
//! are short-circuited for a cool-off period instead of burning the
//! caller's deadline against a struggling provider.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::warn;

use agora_core::config::BreakerConfig;
use agora_core::domain::template::ModelId;
use agora_core::errors::DispatchError;

#[derive(Default)]
struct ModelState {
    events: VecDeque<Instant>,
    open_until: Option<Instant>,
}

pub struct RateLimitBreaker {
    threshold: u32,
    window: Duration,
    cooloff: Duration,
    states: Mutex<HashMap<String, ModelState>>,
}

impl RateLimitBreaker {
    pub fn new(config: &BreakerConfig) -> Self {
        Self {
            threshold: config.rate_limit_threshold,
            window: Duration::from_secs(config.window_secs),
            cooloff: Duration::from_secs(config.cooloff_secs),
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn check(&self, model: &ModelId) -> Result<(), DispatchError> {
        self.check_at(model, Instant::now())
    }

    pub fn record_rate_limited(&self, model: &ModelId) {
        self.record_rate_limited_at(model, Instant::now());
    }

    fn check_at(&self, model: &ModelId, now: Instant) -> Result<(), DispatchError> {
        let mut states = self.states.lock().unwrap_or_else(|poison| poison.into_inner());
        let Some(state) = states.get_mut(&model.0) else {
            return Ok(());
        };
        match state.open_until {
            Some(until) if now < until => Err(DispatchError::ModelUnavailable(model.0.clone())),
            Some(_) => {
                // Cool-off over; start from a clean window.
                state.open_until = None;
                state.events.clear();
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn record_rate_limited_at(&self, model: &ModelId, now: Instant) {
        let mut states = self.states.lock().unwrap_or_else(|poison| poison.into_inner());
        let state = states.entry(model.0.clone()).or_default();

        state.events.push_back(now);
        while let Some(front) = state.events.front() {
            if now.duration_since(*front) > self.window {
                state.events.pop_front();
            } else {
                break;
            }
        }

        if state.events.len() as u32 >= self.threshold && state.open_until.is_none() {
            state.open_until = Some(now + self.cooloff);
            warn!(
                event_name = "breaker_opened",
                model = %model.0,
                events_in_window = state.events.len(),
                "rate-limit breaker opened"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use agora_core::config::BreakerConfig;
    use agora_core::domain::template::ModelId;
    use agora_core::errors::DispatchError;

    use super::RateLimitBreaker;

    fn breaker() -> RateLimitBreaker {
        RateLimitBreaker::new(&BreakerConfig {
            rate_limit_threshold: 3,
            window_secs: 60,
            cooloff_secs: 120,
        })
    }

    #[test]
    fn stays_closed_below_threshold() {
        let breaker = breaker();
        let model = ModelId("gpt-4o-mini".to_string());
        let now = Instant::now();

        breaker.record_rate_limited_at(&model, now);
        breaker.record_rate_limited_at(&model, now + Duration::from_secs(1));
        assert!(breaker.check_at(&model, now + Duration::from_secs(2)).is_ok());
    }

    #[test]
    fn opens_at_threshold_and_closes_after_cooloff() {
        let breaker = breaker();
        let model = ModelId("gpt-4o-mini".to_string());
        let now = Instant::now();

        for i in 0..3 {
            breaker.record_rate_limited_at(&model, now + Duration::from_secs(i));
        }

        let denied = breaker.check_at(&model, now + Duration::from_secs(10));
        assert_eq!(
            denied.unwrap_err(),
            DispatchError::ModelUnavailable("gpt-4o-mini".to_string())
        );

        // Still open just before the cool-off ends, closed after.
        assert!(breaker.check_at(&model, now + Duration::from_secs(121)).is_err());
        assert!(breaker.check_at(&model, now + Duration::from_secs(123)).is_ok());
    }

    #[test]
    fn events_outside_the_window_do_not_count() {
        let breaker = breaker();
        let model = ModelId("gpt-4o-mini".to_string());
        let now = Instant::now();

        breaker.record_rate_limited_at(&model, now);
        breaker.record_rate_limited_at(&model, now + Duration::from_secs(1));
        // The first two events have aged out by the time the third lands.
        breaker.record_rate_limited_at(&model, now + Duration::from_secs(120));
        assert!(breaker.check_at(&model, now + Duration::from_secs(121)).is_ok());
    }

    #[test]
    fn models_trip_independently() {
        let breaker = breaker();
        let tripped = ModelId("gpt-4o-mini".to_string());
        let healthy = ModelId("claude-3-5-haiku".to_string());
        let now = Instant::now();

        for i in 0..3 {
            breaker.record_rate_limited_at(&tripped, now + Duration::from_secs(i));
        }
        assert!(breaker.check_at(&tripped, now + Duration::from_secs(5)).is_err());
        assert!(breaker.check_at(&healthy, now + Duration::from_secs(5)).is_ok());
    }
}

// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Exponential Backoff
//!
//! Paces dial attempts while a connection is being (re)established. Delays
//! grow multiplicatively up to a per-step cap and the generator reports
//! exhaustion once the total elapsed time passes a ceiling.

use rand::Rng;
use serde::Deserialize;
use std::time::Duration;
use tokio::time::Instant;

/// Configuration of an [`ExponentialBackoff`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BackoffSettings {
    /// First delay handed out.
    pub initial_interval: Duration,
    /// Growth factor applied after each delay.
    pub multiplier: f64,
    /// Jitter ratio, delays are drawn from `interval * [1 - f, 1 + f]`.
    pub randomization_factor: f64,
    /// Upper bound of a single delay, before jitter.
    pub max_interval: Duration,
    /// Total time after which the backoff gives up. Zero never gives up.
    pub max_elapsed_time: Duration,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            multiplier: 1.5,
            randomization_factor: 0.5,
            max_interval: Duration::from_secs(5),
            max_elapsed_time: Duration::from_secs(60),
        }
    }
}

impl BackoffSettings {
    /// Starts a new backoff window using these settings.
    pub fn build(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(self.clone())
    }
}

/// Stateful delay generator. See [`BackoffSettings`] for the knobs.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    settings: BackoffSettings,
    current_interval: Duration,
    started_at: Instant,
}

impl ExponentialBackoff {
    pub fn new(settings: BackoffSettings) -> Self {
        Self {
            current_interval: settings.initial_interval,
            settings,
            started_at: Instant::now(),
        }
    }

    /// Restarts the window: the interval goes back to its initial value and
    /// the elapsed time to zero.
    pub fn reset(&mut self) {
        self.current_interval = self.settings.initial_interval;
        self.started_at = Instant::now();
    }

    /// Time spent since the window started.
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Returns the delay to wait before the next attempt, or `None` once the
    /// maximum elapsed time has been exceeded.
    pub fn next_delay(&mut self) -> Option<Duration> {
        let max_elapsed = self.settings.max_elapsed_time;
        if !max_elapsed.is_zero() && self.elapsed() > max_elapsed {
            return None;
        }

        let delay = randomize(self.current_interval, self.settings.randomization_factor);
        self.increment_interval();

        Some(delay)
    }

    fn increment_interval(&mut self) {
        let max = self.settings.max_interval;
        let next = self.current_interval.mul_f64(self.settings.multiplier);
        self.current_interval = if next > max { max } else { next };
    }
}

fn randomize(interval: Duration, factor: f64) -> Duration {
    if factor <= 0.0 {
        return interval;
    }

    let delta = interval.mul_f64(factor.min(1.0));
    let low = interval.saturating_sub(delta);
    let high = interval + delta;

    rand::rng().random_range(low..=high)
}

//! Debounce for ambient light readings.

use std::time::Duration;

use tokio::time::Instant;

use crate::config::LuxFilterConfig;

make_log_macro!(debug, "lux_filter");
make_log_macro!(info, "lux_filter");

/// Decides whether an ambient light reading is a settled change worth acting on.
///
/// A jump is never acted on when it is first seen. The filter starts watching,
/// and only reports the change once the deviation from the last committed lux
/// value is still there after the stability window has passed. Readings that
/// fall back close to the committed value cancel the watch.
#[derive(Debug)]
pub struct LuxStabilityFilter {
    last_lux: f32,
    last_sample_time: Option<Instant>,
    is_changing: bool,
    rate_threshold: f32,
    stable_min: f32,
    stable_time: Duration,
}

impl Default for LuxStabilityFilter {
    fn default() -> Self {
        Self::new(&LuxFilterConfig::default())
    }
}

impl LuxStabilityFilter {
    pub fn new(config: &LuxFilterConfig) -> Self {
        Self {
            last_lux: 0.0,
            last_sample_time: None,
            is_changing: false,
            rate_threshold: config.rate_threshold,
            stable_min: config.stable_min,
            stable_time: Duration::from_millis(config.stable_time_ms),
        }
    }

    /// Last committed lux value.
    pub fn last_lux(&self) -> f32 {
        self.last_lux
    }

    pub fn is_changing(&self) -> bool {
        self.is_changing
    }

    /// Returns `true` exactly when auto brightness should be recomputed for `lux`.
    pub fn observe(&mut self, lux: f32, now: Instant) -> bool {
        debug!(
            "changing: {}, {} vs {}",
            self.is_changing, self.last_lux, lux
        );
        let Some(last_sample_time) = self.last_sample_time else {
            debug!("receive lux at first time");
            self.last_sample_time = Some(now);
            self.last_lux = lux;
            self.is_changing = true;
            return false;
        };

        let deviation = (lux - self.last_lux).abs();
        let lenient = self.last_lux / self.rate_threshold + 1.0;

        if !self.is_changing {
            if deviation < lenient {
                debug!("too little change");
            } else {
                info!("first time to change, wait for stable");
                self.is_changing = true;
            }
            return false;
        }

        let strict = lenient.max(self.stable_min);
        if deviation >= strict {
            if now.saturating_duration_since(last_sample_time) >= self.stable_time {
                info!("stable enough to change");
                self.last_sample_time = Some(now);
                self.last_lux = lux;
                self.is_changing = false;
                return true;
            }
            debug!("stable lux, waiting for the stability window");
        } else if deviation < lenient {
            debug!("lux went back, ignoring the change");
            self.is_changing = false;
        } else {
            debug!("unstable lux, wait for stable");
        }
        false
    }
}

//! Multiplier growth curve
//!
//! The multiplier is a pure function of elapsed flight time, so every reader
//! that recomputes it for the same instant gets the same value.

use std::time::Duration;

use super::types::Multiplier;
use crate::errors::{EngineError, EngineResult};

/// Compounding growth `f(t) = (1 + r)^t`, sampled in hundredths.
#[derive(Debug, Clone, Copy)]
pub struct MultiplierCurve {
    growth_rate: f64,
}

impl MultiplierCurve {
    pub fn new(growth_rate: f64) -> Self {
        Self { growth_rate }
    }

    pub fn growth_rate(&self) -> f64 {
        self.growth_rate
    }

    /// Multiplier after `elapsed` seconds of flight, rounded half-up to hundredths.
    pub fn multiplier_at(&self, elapsed: Duration) -> EngineResult<Multiplier> {
        let factor = (1.0 + self.growth_rate).powf(elapsed.as_secs_f64());
        if !factor.is_finite() || factor < 1.0 {
            return Err(EngineError::ClockFault(format!(
                "growth curve produced {} at {:?}",
                factor, elapsed
            )));
        }

        Multiplier::from_f64(factor).ok_or_else(|| {
            EngineError::ClockFault(format!("multiplier {} out of range at {:?}", factor, elapsed))
        })
    }

    /// Earliest elapsed flight time at which the sampled multiplier reaches `target`.
    pub fn time_to_reach(&self, target: Multiplier) -> Duration {
        // round_half_up(100 * f) >= h  <=>  f >= (h - 0.5) / 100
        let threshold = (target.hundredths() as f64 - 0.5) / 100.0;
        if threshold <= 1.0 {
            return Duration::ZERO;
        }
        let seconds = threshold.ln() / (1.0 + self.growth_rate).ln();
        Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
    }
}

impl Default for MultiplierCurve {
    fn default() -> Self {
        Self::new(0.06)
    }
}

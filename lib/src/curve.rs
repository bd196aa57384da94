//! Lux to brightness transfer curve.

use crate::config::BrightnessLimits;
use crate::consts::DEFAULT_CURVE;

/// Piece-wise linear mapping from ambient illuminance to a recommended
/// brightness. Immutable once built and safe to share between threads.
#[derive(Debug, Clone)]
pub struct AutoBrightnessCurve {
    points: Vec<(f32, u32)>,
    limits: BrightnessLimits,
}

impl Default for AutoBrightnessCurve {
    fn default() -> Self {
        Self::new(DEFAULT_CURVE.to_vec(), BrightnessLimits::default())
    }
}

impl AutoBrightnessCurve {
    /// Breakpoints are expected sorted by lux; the config loader validates this.
    pub fn new(points: Vec<(f32, u32)>, limits: BrightnessLimits) -> Self {
        Self { points, limits }
    }

    pub fn brightness(&self, lux: f32) -> u32 {
        let Some(&(last_lux, _)) = self.points.last() else {
            return self.limits.max;
        };
        if lux >= last_lux {
            return self.limits.max;
        }

        let brightness = match self.points.iter().position(|&(point_lux, _)| point_lux > lux) {
            // below the first breakpoint
            Some(0) | None => self.points[0].1,
            Some(i) => {
                let (lux0, b0) = self.points[i - 1];
                let (lux1, b1) = self.points[i];
                let b = b0 as f32 + (lux - lux0) * (b1 as f32 - b0 as f32) / (lux1 - lux0);
                b as u32
            }
        };
        self.limits.clamp(brightness)
    }
}

//! Tank calibration and level calculation.
//!
//! The sensor sits on top of the tank and measures the distance down to the water surface, so a
//! *smaller* distance means a *fuller* tank. Calibration records the distance seen when the tank
//! is full (`near`) and when it is empty (`far`) plus the total volume.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_NEAR_CM: i32 = 30;
pub const DEFAULT_FAR_CM: i32 = 120;
pub const DEFAULT_CAPACITY_LITERS: f32 = 942.5;

/// Rejected calibration input. The previously active calibration stays in force.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CalibrationError {
    #[error("full-tank distance {near} cm must be less than empty-tank distance {far} cm")]
    InvertedRange { near: i32, far: i32 },

    #[error("tank capacity must be a positive number of liters (got {0})")]
    InvalidCapacity(f32),
}

/// Validated calibration: `near_cm < far_cm` and `capacity_liters > 0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    near_cm: i32,
    far_cm: i32,
    capacity_liters: f32,
}

impl Calibration {
    pub fn new(near_cm: i32, far_cm: i32, capacity_liters: f32) -> Result<Self, CalibrationError> {
        if near_cm >= far_cm {
            return Err(CalibrationError::InvertedRange {
                near: near_cm,
                far: far_cm,
            });
        }
        if !capacity_liters.is_finite() || capacity_liters <= 0.0 {
            return Err(CalibrationError::InvalidCapacity(capacity_liters));
        }
        Ok(Self {
            near_cm,
            far_cm,
            capacity_liters,
        })
    }

    /// Sensor distance when the tank is full.
    pub fn near_cm(&self) -> i32 {
        self.near_cm
    }

    /// Sensor distance when the tank is empty.
    pub fn far_cm(&self) -> i32 {
        self.far_cm
    }

    pub fn capacity_liters(&self) -> f32 {
        self.capacity_liters
    }

    pub fn range_cm(&self) -> i32 {
        self.far_cm.saturating_sub(self.near_cm)
    }
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            near_cm: DEFAULT_NEAR_CM,
            far_cm: DEFAULT_FAR_CM,
            capacity_liters: DEFAULT_CAPACITY_LITERS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TankLevel {
    /// Height of water above the empty mark, in centimeters.
    pub level_cm: i32,
    pub percent: u8,
    pub liters: f32,
}

/// Convert a raw sensor distance to level, percent and volume.
///
/// Distances outside the calibrated span clamp to empty/full. Percent uses integer truncation.
pub fn compute_level(raw_distance_cm: i32, calibration: &Calibration) -> TankLevel {
    let range = calibration.range_cm();
    if range <= 0 {
        return TankLevel::default();
    }

    let level_cm = calibration
        .far_cm
        .saturating_sub(raw_distance_cm)
        .clamp(0, range);
    let percent = (i64::from(level_cm) * 100 / i64::from(range)).clamp(0, 100) as u8;
    let liters = level_cm as f32 * calibration.capacity_liters / range as f32;

    TankLevel {
        level_cm,
        percent,
        liters,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calib() -> Calibration {
        Calibration::new(30, 120, 942.5).unwrap()
    }

    #[test]
    fn full_and_empty_marks() {
        let c = calib();
        let full = compute_level(30, &c);
        assert_eq!(full.level_cm, 90);
        assert_eq!(full.percent, 100);
        assert!((full.liters - 942.5).abs() < 1e-3);

        let empty = compute_level(120, &c);
        assert_eq!(empty, TankLevel::default());
    }

    #[test]
    fn truncates_percent() {
        // (120 - 45) * 100 / 90 = 83.33
        let level = compute_level(45, &calib());
        assert_eq!(level.level_cm, 75);
        assert_eq!(level.percent, 83);
        assert!((level.liters - 785.4167).abs() < 0.01);
    }

    #[test]
    fn percent_non_increasing_with_distance() {
        let c = calib();
        let mut previous = u8::MAX;
        for raw in c.near_cm()..=c.far_cm() {
            let p = compute_level(raw, &c).percent;
            assert!(p <= previous, "percent rose at {raw} cm");
            previous = p;
        }
    }

    #[test]
    fn clamps_far_outside_range() {
        let c = calib();
        for raw in [i32::MIN, -500, 0, 5, 29, 121, 400, 10_000, i32::MAX] {
            let level = compute_level(raw, &c);
            assert!(level.percent <= 100);
            assert!(level.level_cm >= 0 && level.level_cm <= c.range_cm());
            assert!(level.liters >= 0.0);
        }
        assert_eq!(compute_level(i32::MIN, &c).percent, 100);
        assert_eq!(compute_level(i32::MAX, &c).percent, 0);
    }

    #[test]
    fn degenerate_range_reads_empty() {
        let c = Calibration {
            near_cm: 50,
            far_cm: 50,
            capacity_liters: 100.0,
        };
        assert_eq!(compute_level(20, &c), TankLevel::default());
    }

    #[test]
    fn rejects_invalid_calibration() {
        assert_eq!(
            Calibration::new(120, 30, 100.0),
            Err(CalibrationError::InvertedRange { near: 120, far: 30 })
        );
        assert!(matches!(
            Calibration::new(30, 30, 100.0),
            Err(CalibrationError::InvertedRange { .. })
        ));
        assert!(matches!(
            Calibration::new(30, 120, 0.0),
            Err(CalibrationError::InvalidCapacity(_))
        ));
        assert!(matches!(
            Calibration::new(30, 120, f32::NAN),
            Err(CalibrationError::InvalidCapacity(_))
        ));
    }
}

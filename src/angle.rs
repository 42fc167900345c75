// Angle Estimator
//
// Convention: degrees, 0 = directly ahead (broadside to the microphone
// axis), positive clockwise toward the right microphone. A two-element
// linear array only resolves [-90, 90]; a source behind the array at the
// mirrored angle produces the same delay, so every estimate is flagged
// front/back ambiguous at best.
//
//   delay    = lag / sample_rate
//   path     = delay * speed_of_sound
//   angle    = 90 - acos(clamp(-path / spacing, -1, 1))
//
// A positive lag (right channel late) means the source is nearer the left
// microphone, hence the negated ratio.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::audio_config::validate_spacing;
use crate::correlation::CorrelationResult;
use crate::error::{DirectionError, Result};
use crate::stereo::StereoPair;

pub const DIRECTLY_AHEAD_DEGREES: f32 = 0.0;

/// Half-width of the "front" sector used for display labels
pub const FRONT_SECTOR_HALF_WIDTH_DEGREES: f32 = 30.0;

/// Simulated pairs carry no spatial information
const SIMULATED_CONFIDENCE_SCALE: f32 = 0.5;
/// Delay longer than the array allows: geometry is inconsistent
const CLAMPED_CONFIDENCE_SCALE: f32 = 0.5;

/// How far an estimate can be trusted, best first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Validity {
    /// Geometrically consistent; the source may be in front or behind
    FrontBackAmbiguous,
    /// Delay exceeded what the spacing allows and was clamped to ±90°
    DomainClamped,
    /// Near-silent input, angle is meaningless
    Degenerate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sector {
    Left,
    Front,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DirectionEstimate {
    /// [-90, 90], 0 = ahead, positive = right
    pub angle_degrees: f32,
    pub validity: Validity,
    /// [0, 1]
    pub confidence: f32,
    /// Derived from a single microphone; the angle only mirrors the
    /// configured synthetic delay
    pub simulated: bool,
    pub lag_samples: i64,
    pub refined_lag_samples: f64,
    pub correlation_peak: f32,
}

impl DirectionEstimate {
    /// Compass reading: 0 = ahead, clockwise, [0, 360)
    pub fn bearing_degrees(&self) -> f32 {
        self.angle_degrees.rem_euclid(360.0)
    }

    pub fn sector(&self) -> Sector {
        if self.angle_degrees < -FRONT_SECTOR_HALF_WIDTH_DEGREES {
            Sector::Left
        } else if self.angle_degrees > FRONT_SECTOR_HALF_WIDTH_DEGREES {
            Sector::Right
        } else {
            Sector::Front
        }
    }

    pub fn is_degenerate(&self) -> bool {
        self.validity == Validity::Degenerate
    }
}

#[derive(Debug, Clone)]
pub struct AngleEstimator {
    speed_of_sound: f32,
}

impl AngleEstimator {
    pub fn new(speed_of_sound: f32) -> Result<Self> {
        if !speed_of_sound.is_finite() || speed_of_sound <= 0.0 {
            return Err(DirectionError::InvalidConfig(format!(
                "speed_of_sound must be positive, got {}",
                speed_of_sound
            )));
        }
        Ok(Self { speed_of_sound })
    }

    /// Estimate for a pair using its own geometry and provenance.
    pub fn estimate_pair(&self, correlation: &CorrelationResult, pair: &StereoPair) -> Result<DirectionEstimate> {
        self.estimate(
            correlation,
            pair.microphone_spacing_meters(),
            pair.sample_rate(),
            pair.simulated(),
        )
    }

    pub fn estimate(
        &self,
        correlation: &CorrelationResult,
        spacing_m: f32,
        sample_rate: u32,
        simulated: bool,
    ) -> Result<DirectionEstimate> {
        let spacing = validate_spacing(spacing_m)? as f64;
        if sample_rate == 0 {
            return Err(DirectionError::InvalidConfig("sample_rate must be > 0".into()));
        }

        if correlation.degenerate {
            return Ok(DirectionEstimate {
                angle_degrees: DIRECTLY_AHEAD_DEGREES,
                validity: Validity::Degenerate,
                confidence: 0.0,
                simulated,
                lag_samples: 0,
                refined_lag_samples: 0.0,
                correlation_peak: 0.0,
            });
        }

        let delay_s = correlation.refined_lag / sample_rate as f64;
        let path_m = delay_s * self.speed_of_sound as f64;
        let ratio = -path_m / spacing;

        let clamped = !(-1.0..=1.0).contains(&ratio);
        let angle = 90.0 - ratio.clamp(-1.0, 1.0).acos().to_degrees();

        let mut confidence = correlation.peak.abs().clamp(0.0, 1.0);
        if simulated {
            confidence *= SIMULATED_CONFIDENCE_SCALE;
        }
        let validity = if clamped {
            confidence *= CLAMPED_CONFIDENCE_SCALE;
            Validity::DomainClamped
        } else {
            Validity::FrontBackAmbiguous
        };

        debug!(
            lag = correlation.refined_lag,
            ratio,
            angle,
            ?validity,
            simulated,
            "angle estimated"
        );

        Ok(DirectionEstimate {
            angle_degrees: angle as f32,
            validity,
            confidence,
            simulated,
            lag_samples: correlation.lag,
            refined_lag_samples: correlation.refined_lag,
            correlation_peak: correlation.peak,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn correlation(lag: i64, peak: f32) -> CorrelationResult {
        CorrelationResult {
            lag,
            refined_lag: lag as f64,
            peak,
            max_lag: 16,
            degenerate: false,
        }
    }

    fn estimator() -> AngleEstimator {
        AngleEstimator::new(343.0).unwrap()
    }

    #[test]
    fn test_zero_lag_is_ahead() {
        let estimate = estimator().estimate(&correlation(0, 1.0), 0.2, 16_000, false).unwrap();
        assert!((estimate.angle_degrees - DIRECTLY_AHEAD_DEGREES).abs() < 1e-4);
        assert_eq!(estimate.validity, Validity::FrontBackAmbiguous);
        assert_eq!(estimate.sector(), Sector::Front);
        assert!((estimate.confidence - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_three_sample_lag_geometry() {
        let estimate = estimator().estimate(&correlation(3, 0.95), 0.2, 16_000, false).unwrap();
        // -3/16000 * 343 / 0.2 = -0.3216 -> 90 - 108.76 = -18.76
        let expected = 90.0 - (-(3.0f64 / 16_000.0) * 343.0 / 0.2).acos().to_degrees();
        assert!((estimate.angle_degrees as f64 - expected).abs() < 1e-3);
        assert!((estimate.angle_degrees + 18.76).abs() < 0.05);
        assert!((estimate.bearing_degrees() - 341.24).abs() < 0.05);
    }

    #[test]
    fn test_sign_follows_lag() {
        let left = estimator().estimate(&correlation(4, 0.9), 0.2, 16_000, false).unwrap();
        let right = estimator().estimate(&correlation(-4, 0.9), 0.2, 16_000, false).unwrap();
        assert!(left.angle_degrees < 0.0);
        assert!((left.angle_degrees + right.angle_degrees).abs() < 1e-4);
    }

    #[test]
    fn test_impossible_delay_is_clamped() {
        // 16 samples at 16kHz is 0.343m of path over a 0.1m baseline
        let estimate = estimator().estimate(&correlation(16, 0.8), 0.1, 16_000, false).unwrap();
        assert!(!estimate.angle_degrees.is_nan());
        assert!((estimate.angle_degrees + 90.0).abs() < 1e-4);
        assert_eq!(estimate.validity, Validity::DomainClamped);
        assert_eq!(estimate.sector(), Sector::Left);
        assert!((estimate.confidence - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_degenerate_input() {
        let silent = CorrelationResult {
            lag: 0,
            refined_lag: 0.0,
            peak: 0.0,
            max_lag: 10,
            degenerate: true,
        };
        let estimate = estimator().estimate(&silent, 0.2, 16_000, false).unwrap();
        assert!(estimate.is_degenerate());
        assert_eq!(estimate.confidence, 0.0);
        assert_eq!(estimate.angle_degrees, DIRECTLY_AHEAD_DEGREES);
    }

    #[test]
    fn test_simulated_lowers_confidence() {
        let estimate = estimator().estimate(&correlation(0, 1.0), 0.2, 16_000, true).unwrap();
        assert!(estimate.simulated);
        assert!((estimate.confidence - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_rejects_bad_inputs() {
        assert!(matches!(
            estimator().estimate(&correlation(0, 1.0), 0.0, 16_000, false),
            Err(DirectionError::InvalidSpacing(_))
        ));
        assert!(estimator().estimate(&correlation(0, 1.0), 0.2, 0, false).is_err());
        assert!(AngleEstimator::new(0.0).is_err());
    }

    #[test]
    fn test_validity_ordering() {
        assert!(Validity::FrontBackAmbiguous < Validity::DomainClamped);
        assert!(Validity::DomainClamped < Validity::Degenerate);
    }
}

// Audio Configuration
// Defaults tuned for sub-2-second direction updates at 16kHz

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::correlation::CorrelationMethod;
use crate::error::{DirectionError, Result};

/// Processing sample rate. Capture at other rates is resampled to this.
pub const SAMPLE_RATE: u32 = 16_000;

/// Window duration in seconds
/// 1.5s keeps end-to-end latency under 2s with 50% overlap
pub const WINDOW_SECONDS: f32 = 1.5;

/// Fraction of each window shared with the previous one
pub const OVERLAP: f32 = 0.5;

/// Distance between the two microphones in meters
pub const MICROPHONE_SPACING_M: f32 = 0.15;

/// Speed of sound in dry air at ~20°C, m/s
pub const SPEED_OF_SOUND: f32 = 343.0;

/// Synthetic inter-channel delay for single-microphone hardware
/// 0.3ms = 5 samples at 16kHz = 0.107m of path, inside the 0.15m spacing
pub const SIMULATED_DELAY_MS: f32 = 0.3;

/// Upper bound on the synthetic delay (1ms is already beyond any laptop array)
pub const MAX_SIMULATED_DELAY_MS: f32 = 1.0;

/// Mean per-sample energy below which a channel counts as silent
pub const SILENCE_ENERGY_FLOOR: f32 = 1e-8;

/// Slack beyond the window duration before a window or estimate is stale
pub const TIMEOUT_MARGIN_SECONDS: f32 = 0.5;

/// Shortest pause in capture treated as a stall
/// Device callbacks normally arrive every ~10ms
pub const STALL_FLOOR_MS: u64 = 100;

/// DSP thread poll interval in milliseconds
pub const DSP_POLL_MS: u64 = 1;

/// Ring buffer size in samples (interleaved)
/// 65536 f32 samples = ~680ms of stereo at 48kHz
pub const RING_BUFFER_SAMPLES: usize = 65_536;

/// Full configuration for the direction pipeline.
///
/// Loaded from JSON by hosts or built from `Default` and tweaked in code.
/// Call [`DirectionConfig::validate`] before use; the pipeline does it for you.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectionConfig {
    pub sample_rate: u32,
    pub window_seconds: f32,
    pub overlap: f32,
    pub microphone_spacing_meters: f32,
    pub speed_of_sound: f32,
    /// Derive a delayed second channel when only one microphone is available
    pub simulate_stereo: bool,
    pub simulated_delay_ms: f32,
    /// Explicit correlation search range. `None` derives it from the geometry.
    pub max_lag_samples: Option<usize>,
    pub correlation_method: CorrelationMethod,
    /// Refine the integer peak with a parabolic fit
    pub subsample_interpolation: bool,
    pub silence_energy_floor: f32,
    pub timeout_margin_seconds: f32,
    /// Input device name; `None` picks the system default
    pub device_id: Option<String>,
}

impl Default for DirectionConfig {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            window_seconds: WINDOW_SECONDS,
            overlap: OVERLAP,
            microphone_spacing_meters: MICROPHONE_SPACING_M,
            speed_of_sound: SPEED_OF_SOUND,
            simulate_stereo: true,
            simulated_delay_ms: SIMULATED_DELAY_MS,
            max_lag_samples: None,
            correlation_method: CorrelationMethod::Auto,
            subsample_interpolation: true,
            silence_energy_floor: SILENCE_ENERGY_FLOOR,
            timeout_margin_seconds: TIMEOUT_MARGIN_SECONDS,
            device_id: None,
        }
    }
}

impl DirectionConfig {
    /// Parse a JSON document. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| DirectionError::InvalidConfig(e.to_string()))
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        validate_spacing(self.microphone_spacing_meters)?;

        if self.sample_rate == 0 {
            return Err(DirectionError::InvalidConfig("sample_rate must be > 0".into()));
        }
        if !(0.1..=10.0).contains(&self.window_seconds) {
            return Err(DirectionError::InvalidConfig(format!(
                "window_seconds must be within [0.1, 10.0], got {}",
                self.window_seconds
            )));
        }
        if !(0.0..1.0).contains(&self.overlap) {
            return Err(DirectionError::InvalidConfig(format!(
                "overlap must be within [0, 1), got {}",
                self.overlap
            )));
        }
        if !self.speed_of_sound.is_finite() || self.speed_of_sound <= 0.0 {
            return Err(DirectionError::InvalidConfig(format!(
                "speed_of_sound must be positive, got {}",
                self.speed_of_sound
            )));
        }
        if !(0.0..=MAX_SIMULATED_DELAY_MS).contains(&self.simulated_delay_ms) {
            return Err(DirectionError::InvalidConfig(format!(
                "simulated_delay_ms must be within [0, {}], got {}",
                MAX_SIMULATED_DELAY_MS, self.simulated_delay_ms
            )));
        }
        if self.simulate_stereo && self.simulated_path_meters() > self.microphone_spacing_meters as f64 {
            return Err(DirectionError::InvalidConfig(format!(
                "simulated delay of {} samples spans {:.4} m, wider than the {} m spacing",
                self.simulated_delay_samples(),
                self.simulated_path_meters(),
                self.microphone_spacing_meters
            )));
        }
        if !self.silence_energy_floor.is_finite() || self.silence_energy_floor < 0.0 {
            return Err(DirectionError::InvalidConfig(
                "silence_energy_floor must be non-negative".into(),
            ));
        }
        if !self.timeout_margin_seconds.is_finite() || self.timeout_margin_seconds < 0.0 {
            return Err(DirectionError::InvalidConfig(
                "timeout_margin_seconds must be non-negative".into(),
            ));
        }
        if self.hop_samples() == 0 {
            return Err(DirectionError::InvalidConfig(
                "overlap leaves no room for a hop between windows".into(),
            ));
        }
        Ok(())
    }

    /// Samples per window (duration × rate, rounded)
    pub fn window_samples(&self) -> usize {
        (self.window_seconds as f64 * self.sample_rate as f64).round() as usize
    }

    /// Samples shared between consecutive windows
    pub fn overlap_samples(&self) -> usize {
        (self.window_samples() as f64 * self.overlap as f64).round() as usize
    }

    /// New samples needed to complete each window after the first
    pub fn hop_samples(&self) -> usize {
        self.window_samples().saturating_sub(self.overlap_samples())
    }

    /// Synthetic delay in whole samples
    pub fn simulated_delay_samples(&self) -> usize {
        (self.simulated_delay_ms as f64 / 1000.0 * self.sample_rate as f64).round() as usize
    }

    /// Path difference the synthetic delay stands for
    pub fn simulated_path_meters(&self) -> f64 {
        self.simulated_delay_samples() as f64 / self.sample_rate as f64 * self.speed_of_sound as f64
    }

    /// Largest delay the array geometry allows, in samples (rounded up)
    pub fn physical_max_lag(&self) -> usize {
        let seconds = self.microphone_spacing_meters as f64 / self.speed_of_sound as f64;
        (seconds * self.sample_rate as f64).ceil() as usize
    }

    pub fn window_duration(&self) -> Duration {
        Duration::from_secs_f32(self.window_seconds)
    }

    /// Age after which a window or an in-flight estimate is discarded
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs_f32(self.window_seconds + self.timeout_margin_seconds)
    }

    /// Capture pause after which the window in progress is discarded
    pub fn stall_after(&self) -> Duration {
        Duration::from_secs_f32(self.timeout_margin_seconds).max(Duration::from_millis(STALL_FLOOR_MS))
    }
}

/// Spacing must be a finite, positive distance.
pub fn validate_spacing(spacing_m: f32) -> Result<f32> {
    if spacing_m.is_finite() && spacing_m > 0.0 {
        Ok(spacing_m)
    } else {
        Err(DirectionError::InvalidSpacing(spacing_m))
    }
}

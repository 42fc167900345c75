// Window loudness for published records
// Dashboards plot amplitude alongside direction and classifier confidence

use serde::{Deserialize, Serialize};

/// dBFS reported for digital silence
pub const SILENCE_DBFS: f32 = -120.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowLevel {
    /// Largest absolute sample, [0, 1] for normalized input
    pub peak: f32,
    pub rms_dbfs: f32,
}

impl WindowLevel {
    pub fn measure(samples: &[f32]) -> Self {
        let peak = samples.iter().fold(0.0f32, |acc, &s| acc.max(s.abs()));
        Self {
            peak,
            rms_dbfs: to_dbfs(calculate_rms(samples)),
        }
    }
}

/// RMS of normalized f32 samples
pub fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_of_squares: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_of_squares / samples.len() as f64).sqrt() as f32
}

fn to_dbfs(rms: f32) -> f32 {
    if rms <= 0.0 {
        return SILENCE_DBFS;
    }
    (20.0 * rms.log10()).max(SILENCE_DBFS)
}

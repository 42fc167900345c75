// Cross-Correlation Engine
//
// Finds the inter-channel lag that maximizes normalized cross-correlation.
//
// Both channels are mean-removed and scaled by their energy, so the peak lies
// in [-1, 1] whatever the input level. The search covers ±max_lag only:
// physically plausible delays for a small array are a handful of samples.
//
// Lag convention: positive lag means the right channel is a delayed copy of
// the left, i.e. right[n + lag] ≈ left[n].

use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::audio_config::DirectionConfig;
use crate::stereo::{Provenance, StereoPair};

/// Above this search radius `Auto` switches to the FFT path
const DIRECT_MAX_LAG: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrelationMethod {
    /// Time-domain sum per lag, O(n · lags)
    Direct,
    /// IFFT(conj(FFT(left)) · FFT(right)), O(n log n)
    Fft,
    #[default]
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrelationResult {
    /// Integer lag at the correlation magnitude peak, in samples
    pub lag: i64,
    /// `lag` refined by a parabolic fit through the neighbors
    pub refined_lag: f64,
    /// Normalized correlation at `lag`, in [-1, 1]
    pub peak: f32,
    /// Search radius actually used
    pub max_lag: usize,
    /// One of the channels was (near) silent; lag and peak are zero
    pub degenerate: bool,
}

impl CorrelationResult {
    fn silent(max_lag: usize) -> Self {
        Self {
            lag: 0,
            refined_lag: 0.0,
            peak: 0.0,
            max_lag,
            degenerate: true,
        }
    }

    /// Peak sits on the edge of the search range
    pub fn at_search_limit(&self) -> bool {
        !self.degenerate && self.max_lag > 0 && self.lag.unsigned_abs() as usize >= self.max_lag
    }
}

#[derive(Debug, Clone)]
pub struct CorrelationEngine {
    max_lag: Option<usize>,
    speed_of_sound: f32,
    method: CorrelationMethod,
    subsample_interpolation: bool,
    energy_floor: f32,
}

impl CorrelationEngine {
    pub fn new(config: &DirectionConfig) -> Self {
        Self {
            max_lag: config.max_lag_samples,
            speed_of_sound: config.speed_of_sound,
            method: config.correlation_method,
            subsample_interpolation: config.subsample_interpolation,
            energy_floor: config.silence_energy_floor,
        }
    }

    /// Search radius for this pair: the configured value, or the array's
    /// acoustic limit widened to cover any synthetic delay. Never beyond
    /// `len - 1`.
    pub fn search_radius(&self, pair: &StereoPair) -> usize {
        let radius = self.max_lag.unwrap_or_else(|| {
            let seconds = pair.microphone_spacing_meters() as f64 / self.speed_of_sound as f64;
            let physical = (seconds * pair.sample_rate() as f64).ceil() as usize;
            match pair.provenance() {
                Provenance::Hardware => physical,
                Provenance::Simulated { delay_samples } => physical.max(delay_samples),
            }
        });
        radius.min(pair.len().saturating_sub(1))
    }

    pub fn correlate(&self, pair: &StereoPair) -> CorrelationResult {
        let max_lag = self.search_radius(pair);

        let Some((left, right)) = self.normalized_channels(pair) else {
            debug!(sequence = pair.left().sequence(), "near-silent channel, skipping correlation");
            return CorrelationResult::silent(max_lag);
        };

        let method = match self.method {
            CorrelationMethod::Auto if max_lag <= DIRECT_MAX_LAG => CorrelationMethod::Direct,
            CorrelationMethod::Auto => CorrelationMethod::Fft,
            other => other,
        };
        let curve = match method {
            CorrelationMethod::Fft => correlate_fft(&left, &right, max_lag),
            _ => correlate_direct(&left, &right, max_lag),
        };

        let (lag, peak) = pick_peak(&curve, max_lag);
        let refined_lag = if self.subsample_interpolation {
            lag as f64 + parabolic_offset(&curve, max_lag, lag)
        } else {
            lag as f64
        };

        trace!(?method, max_lag, lag, peak, refined_lag, "correlation peak");

        CorrelationResult {
            lag,
            refined_lag,
            peak: peak.clamp(-1.0, 1.0) as f32,
            max_lag,
            degenerate: false,
        }
    }

    /// Mean-removed channels scaled to unit energy, or `None` if either is
    /// below the silence floor.
    fn normalized_channels(&self, pair: &StereoPair) -> Option<(Vec<f64>, Vec<f64>)> {
        let left = normalize(pair.left().samples(), self.energy_floor)?;
        let right = normalize(pair.right().samples(), self.energy_floor)?;
        Some((left, right))
    }
}

fn normalize(samples: &[f32], energy_floor: f32) -> Option<Vec<f64>> {
    if samples.is_empty() {
        return None;
    }
    let n = samples.len() as f64;
    let mean = samples.iter().map(|&s| s as f64).sum::<f64>() / n;
    let centered: Vec<f64> = samples.iter().map(|&s| s as f64 - mean).collect();
    let energy: f64 = centered.iter().map(|x| x * x).sum();

    if !energy.is_finite() || energy / n <= energy_floor as f64 {
        return None;
    }
    let scale = 1.0 / energy.sqrt();
    Some(centered.into_iter().map(|x| x * scale).collect())
}

/// Correlation curve indexed by `lag + max_lag`
fn correlate_direct(left: &[f64], right: &[f64], max_lag: usize) -> Vec<f64> {
    let n = left.len();
    let max_lag = max_lag as i64;
    (-max_lag..=max_lag)
        .map(|lag| {
            let (l, r) = if lag >= 0 {
                let k = lag as usize;
                (&left[..n - k], &right[k..])
            } else {
                let k = (-lag) as usize;
                (&left[k..], &right[..n - k])
            };
            l.iter().zip(r).map(|(a, b)| a * b).sum()
        })
        .collect()
}

/// Same curve as `correlate_direct`, via zero-padded FFTs
fn correlate_fft(left: &[f64], right: &[f64], max_lag: usize) -> Vec<f64> {
    let n = left.len();
    let fft_size = (2 * n).next_power_of_two();

    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(fft_size);
    let ifft = planner.plan_fft_inverse(fft_size);

    let mut spectrum_l: Vec<Complex<f64>> = left.iter().map(|&x| Complex::new(x, 0.0)).collect();
    spectrum_l.resize(fft_size, Complex::new(0.0, 0.0));
    let mut spectrum_r: Vec<Complex<f64>> = right.iter().map(|&x| Complex::new(x, 0.0)).collect();
    spectrum_r.resize(fft_size, Complex::new(0.0, 0.0));

    fft.process(&mut spectrum_l);
    fft.process(&mut spectrum_r);

    let mut cross: Vec<Complex<f64>> = spectrum_l
        .iter()
        .zip(&spectrum_r)
        .map(|(l, r)| l.conj() * r)
        .collect();
    ifft.process(&mut cross);

    let scale = 1.0 / fft_size as f64;
    let max_lag = max_lag as i64;
    (-max_lag..=max_lag)
        .map(|lag| {
            // Negative lags wrap to the end of the circular result
            let idx = if lag >= 0 { lag as usize } else { fft_size - (-lag) as usize };
            cross[idx].re * scale
        })
        .collect()
}

/// Global maximum of |curve|. Scans 0, +1, -1, +2, -2, ... with a strict
/// comparison so ties resolve to the smallest magnitude lag.
fn pick_peak(curve: &[f64], max_lag: usize) -> (i64, f64) {
    let center = max_lag as i64;
    let at = |lag: i64| curve[(lag + center) as usize];

    let mut best_lag = 0i64;
    let mut best = at(0);
    for k in 1..=center {
        for lag in [k, -k] {
            let value = at(lag);
            if value.abs() > best.abs() {
                best_lag = lag;
                best = value;
            }
        }
    }
    (best_lag, best)
}

/// Vertex of the parabola through the peak and its two neighbors, in
/// [-0.5, 0.5]. Zero at the edge of the range or on a flat/convex peak.
fn parabolic_offset(curve: &[f64], max_lag: usize, lag: i64) -> f64 {
    let idx = (lag + max_lag as i64) as usize;
    if idx == 0 || idx + 1 >= curve.len() {
        return 0.0;
    }
    let sign = curve[idx].signum();
    let (y0, y1, y2) = (sign * curve[idx - 1], sign * curve[idx], sign * curve[idx + 1]);
    let denom = y0 - 2.0 * y1 + y2;
    if denom >= 0.0 {
        return 0.0;
    }
    (0.5 * (y0 - y2) / denom).clamp(-0.5, 0.5)
}

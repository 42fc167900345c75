// Audio windows handed from the frame buffer to the estimator
//
// Samples live behind an `Arc` so the classifier and the direction
// estimator can read the same window concurrently without copying.

use std::sync::Arc;
use std::time::{Duration, Instant};

/// A fixed-duration, immutable run of mono samples.
#[derive(Debug, Clone)]
pub struct AudioWindow {
    samples: Arc<[f32]>,
    sample_rate: u32,
    /// Emission order, starting at 0
    sequence: u64,
    /// Index of the first sample within the capture stream
    start_sample: u64,
    captured_at: Instant,
}

impl AudioWindow {
    pub fn new(samples: impl Into<Arc<[f32]>>, sample_rate: u32, sequence: u64, start_sample: u64) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
            sequence,
            start_sample,
            captured_at: Instant::now(),
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn start_sample(&self) -> u64 {
        self.start_sample
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }

    /// Same timing metadata, different samples. Used for derived channels.
    pub(crate) fn with_samples(&self, samples: Vec<f32>) -> Self {
        Self {
            samples: samples.into(),
            sample_rate: self.sample_rate,
            sequence: self.sequence,
            start_sample: self.start_sample,
            captured_at: self.captured_at,
        }
    }
}

/// One capture tick: a window per physical channel.
#[derive(Debug, Clone)]
pub enum CapturedFrame {
    Mono(AudioWindow),
    Stereo { left: AudioWindow, right: AudioWindow },
}

impl CapturedFrame {
    /// The reference channel (left, or the only one)
    pub fn primary(&self) -> &AudioWindow {
        match self {
            CapturedFrame::Mono(window) => window,
            CapturedFrame::Stereo { left, .. } => left,
        }
    }

    pub fn channel_count(&self) -> usize {
        match self {
            CapturedFrame::Mono(_) => 1,
            CapturedFrame::Stereo { .. } => 2,
        }
    }

    pub fn sequence(&self) -> u64 {
        self.primary().sequence()
    }

    pub fn captured_at(&self) -> Instant {
        self.primary().captured_at()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_from_rate() {
        let window = AudioWindow::new(vec![0.0; 24_000], 16_000, 0, 0);
        assert_eq!(window.duration(), Duration::from_millis(1500));
    }

    #[test]
    fn test_clone_shares_samples() {
        let window = AudioWindow::new(vec![0.25; 16], 16_000, 3, 48);
        let copy = window.clone();
        assert_eq!(copy.samples().as_ptr(), window.samples().as_ptr());
        assert_eq!(copy.sequence(), 3);
        assert_eq!(copy.start_sample(), 48);
    }

    #[test]
    fn test_derived_channel_keeps_timing() {
        let window = AudioWindow::new(vec![1.0; 4], 16_000, 7, 100);
        let derived = window.with_samples(vec![0.0; 4]);
        assert_eq!(derived.sequence(), 7);
        assert_eq!(derived.start_sample(), 100);
        assert_eq!(derived.captured_at(), window.captured_at());
        assert_eq!(derived.samples(), &[0.0; 4]);
    }
}

// Stereo Channel Provider
//
// Hardware stereo passes through untouched. A single microphone gets a
// synthetic second channel delayed by a fraction of a millisecond so the
// correlation path runs unchanged; such pairs are tagged `Simulated` and
// carry no real spatial information.

use tracing::debug;

use crate::audio_config::{validate_spacing, DirectionConfig};
use crate::error::{DirectionError, Result};
use crate::window::{AudioWindow, CapturedFrame};

/// Where the second channel came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    /// Two physical microphones
    Hardware,
    /// Right channel is the left channel delayed by `delay_samples`
    Simulated { delay_samples: usize },
}

/// Two equal-length, time-aligned channels plus the geometry to interpret them.
#[derive(Debug, Clone)]
pub struct StereoPair {
    left: AudioWindow,
    right: AudioWindow,
    provenance: Provenance,
    microphone_spacing_meters: f32,
}

impl StereoPair {
    /// Pair two hardware channels. Lengths and rates must match.
    pub fn new(left: AudioWindow, right: AudioWindow, microphone_spacing_meters: f32) -> Result<Self> {
        Self::build(left, right, Provenance::Hardware, microphone_spacing_meters)
    }

    fn build(
        left: AudioWindow,
        right: AudioWindow,
        provenance: Provenance,
        microphone_spacing_meters: f32,
    ) -> Result<Self> {
        let spacing = validate_spacing(microphone_spacing_meters)?;
        if left.len() != right.len() {
            return Err(DirectionError::ChannelMismatch {
                left: left.len(),
                right: right.len(),
            });
        }
        if left.sample_rate() != right.sample_rate() {
            return Err(DirectionError::InvalidConfig(format!(
                "channel sample rates differ: {} vs {}",
                left.sample_rate(),
                right.sample_rate()
            )));
        }
        Ok(Self {
            left,
            right,
            provenance,
            microphone_spacing_meters: spacing,
        })
    }

    pub fn left(&self) -> &AudioWindow {
        &self.left
    }

    pub fn right(&self) -> &AudioWindow {
        &self.right
    }

    pub fn provenance(&self) -> Provenance {
        self.provenance
    }

    pub fn simulated(&self) -> bool {
        matches!(self.provenance, Provenance::Simulated { .. })
    }

    pub fn microphone_spacing_meters(&self) -> f32 {
        self.microphone_spacing_meters
    }

    pub fn sample_rate(&self) -> u32 {
        self.left.sample_rate()
    }

    pub fn len(&self) -> usize {
        self.left.len()
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }
}

/// Turns captured frames into stereo pairs.
#[derive(Debug, Clone)]
pub struct StereoProvider {
    microphone_spacing_meters: f32,
    simulate_stereo: bool,
    delay_samples: usize,
}

impl StereoProvider {
    /// Fails with `InvalidSpacing` for non-positive spacing.
    pub fn new(microphone_spacing_meters: f32, simulate_stereo: bool, delay_samples: usize) -> Result<Self> {
        let spacing = validate_spacing(microphone_spacing_meters)?;
        Ok(Self {
            microphone_spacing_meters: spacing,
            simulate_stereo,
            delay_samples,
        })
    }

    pub fn from_config(config: &DirectionConfig) -> Result<Self> {
        Self::new(
            config.microphone_spacing_meters,
            config.simulate_stereo,
            config.simulated_delay_samples(),
        )
    }

    pub fn delay_samples(&self) -> usize {
        self.delay_samples
    }

    pub fn pair(&self, frame: &CapturedFrame) -> Result<StereoPair> {
        match frame {
            CapturedFrame::Stereo { left, right } => {
                StereoPair::new(left.clone(), right.clone(), self.microphone_spacing_meters)
            }
            CapturedFrame::Mono(window) => {
                if !self.simulate_stereo {
                    return Err(DirectionError::MonoInput);
                }
                let right = window.with_samples(delay_channel(window.samples(), self.delay_samples));
                debug!(sequence = window.sequence(), delay = self.delay_samples, "simulated stereo pair");
                StereoPair::build(
                    window.clone(),
                    right,
                    Provenance::Simulated {
                        delay_samples: self.delay_samples,
                    },
                    self.microphone_spacing_meters,
                )
            }
        }
    }
}

/// Shift `samples` later by `delay` samples, zero-filling the head and
/// keeping the length.
pub fn delay_channel(samples: &[f32], delay: usize) -> Vec<f32> {
    let delay = delay.min(samples.len());
    let mut delayed = vec![0.0f32; delay];
    delayed.extend_from_slice(&samples[..samples.len() - delay]);
    delayed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(samples: Vec<f32>) -> AudioWindow {
        AudioWindow::new(samples, 16_000, 0, 0)
    }

    #[test]
    fn test_delay_channel() {
        assert_eq!(delay_channel(&[1.0, 2.0, 3.0, 4.0], 2), vec![0.0, 0.0, 1.0, 2.0]);
        assert_eq!(delay_channel(&[1.0, 2.0], 0), vec![1.0, 2.0]);
        assert_eq!(delay_channel(&[1.0, 2.0], 5), vec![0.0, 0.0]);
    }

    #[test]
    fn test_hardware_passthrough() {
        let provider = StereoProvider::new(0.2, true, 8).unwrap();
        let frame = CapturedFrame::Stereo {
            left: window(vec![1.0, 2.0]),
            right: window(vec![3.0, 4.0]),
        };
        let pair = provider.pair(&frame).unwrap();
        assert!(!pair.simulated());
        assert_eq!(pair.provenance(), Provenance::Hardware);
        assert_eq!(pair.right().samples(), &[3.0, 4.0]);
    }

    #[test]
    fn test_mono_fallback_is_tagged() {
        let provider = StereoProvider::new(0.2, true, 1).unwrap();
        let pair = provider.pair(&CapturedFrame::Mono(window(vec![1.0, 2.0, 3.0]))).unwrap();
        assert!(pair.simulated());
        assert_eq!(pair.provenance(), Provenance::Simulated { delay_samples: 1 });
        assert_eq!(pair.left().samples(), &[1.0, 2.0, 3.0]);
        assert_eq!(pair.right().samples(), &[0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_mono_rejected_without_simulation() {
        let provider = StereoProvider::new(0.2, false, 8).unwrap();
        let err = provider.pair(&CapturedFrame::Mono(window(vec![0.0; 4]))).unwrap_err();
        assert!(matches!(err, DirectionError::MonoInput));
    }

    #[test]
    fn test_invalid_spacing() {
        assert!(matches!(
            StereoProvider::new(0.0, true, 8),
            Err(DirectionError::InvalidSpacing(_))
        ));
        assert!(matches!(
            StereoPair::new(window(vec![0.0]), window(vec![0.0]), -1.0),
            Err(DirectionError::InvalidSpacing(_))
        ));
    }

    #[test]
    fn test_length_mismatch() {
        let err = StereoPair::new(window(vec![0.0; 3]), window(vec![0.0; 4]), 0.2).unwrap_err();
        assert!(matches!(err, DirectionError::ChannelMismatch { left: 3, right: 4 }));
    }
}

// Frame Buffer - accumulates captured samples into overlapping windows
//
// Single writer: only the DSP thread pushes. A window is emitted only when
// fully populated and is never touched again after emission.

use tracing::{debug, warn};

use crate::audio_config::DirectionConfig;
use crate::error::{DirectionError, Result};
use crate::window::{AudioWindow, CapturedFrame};

pub struct FrameBuffer {
    channels: usize,
    sample_rate: u32,
    window_len: usize,
    hop_len: usize,
    /// Interleaved samples not yet released
    pending: Vec<f32>,
    /// Frames at the front of `pending` carried over from the last window
    retained: usize,
    next_sequence: u64,
    next_start: u64,
}

impl FrameBuffer {
    /// # Arguments
    /// * `window_len` - Samples per channel in each window
    /// * `hop_len` - New samples per channel between window starts (1..=window_len)
    /// * `channels` - Interleaved channel count, 1 or 2
    pub fn new(sample_rate: u32, window_len: usize, hop_len: usize, channels: usize) -> Result<Self> {
        if !(1..=2).contains(&channels) {
            return Err(DirectionError::InvalidConfig(format!(
                "frame buffer supports 1 or 2 channels, got {}",
                channels
            )));
        }
        if window_len == 0 || hop_len == 0 || hop_len > window_len {
            return Err(DirectionError::InvalidConfig(format!(
                "invalid window/hop: {}/{}",
                window_len, hop_len
            )));
        }

        debug!(sample_rate, window_len, hop_len, channels, "frame buffer created");

        Ok(Self {
            channels,
            sample_rate,
            window_len,
            hop_len,
            pending: Vec::with_capacity(window_len * channels * 2),
            retained: 0,
            next_sequence: 0,
            next_start: 0,
        })
    }

    pub fn from_config(config: &DirectionConfig, channels: usize) -> Result<Self> {
        Self::new(config.sample_rate, config.window_samples(), config.hop_samples(), channels)
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Frames currently buffered per channel (including the retained overlap)
    pub fn buffered_frames(&self) -> usize {
        self.pending.len() / self.channels
    }

    /// Append interleaved samples; returns every window completed by them.
    ///
    /// Input may end mid-frame; the dangling samples wait for the rest.
    pub fn push_interleaved(&mut self, data: &[f32]) -> Vec<CapturedFrame> {
        self.pending.extend_from_slice(data);

        let mut ready = Vec::new();
        while self.pending.len() >= self.window_len * self.channels {
            ready.push(self.emit());
        }
        ready
    }

    fn emit(&mut self) -> CapturedFrame {
        let frame_samples = self.window_len * self.channels;
        let sequence = self.next_sequence;
        let start = self.next_start;

        let frame = if self.channels == 1 {
            let samples = self.pending[..frame_samples].to_vec();
            CapturedFrame::Mono(AudioWindow::new(samples, self.sample_rate, sequence, start))
        } else {
            let mut left = Vec::with_capacity(self.window_len);
            let mut right = Vec::with_capacity(self.window_len);
            for pair in self.pending[..frame_samples].chunks_exact(2) {
                left.push(pair[0]);
                right.push(pair[1]);
            }
            CapturedFrame::Stereo {
                left: AudioWindow::new(left, self.sample_rate, sequence, start),
                right: AudioWindow::new(right, self.sample_rate, sequence, start),
            }
        };

        // Slide forward by one hop; the tail becomes the next window's head
        self.pending.drain(..self.hop_len * self.channels);
        self.retained = self.window_len - self.hop_len;
        self.next_sequence += 1;
        self.next_start += self.hop_len as u64;

        frame
    }

    /// Capture skipped ahead: drop everything buffered, overlap included,
    /// so no window spans the gap. `lost_frames` never reached the buffer;
    /// they still advance `start_sample`. Returns the frames discarded.
    pub fn discontinuity(&mut self, lost_frames: u64) -> usize {
        let discarded = self.buffered_frames();
        self.pending.clear();
        self.retained = 0;
        self.next_start += discarded as u64 + lost_frames;

        debug!(discarded, lost_frames, next_start = self.next_start, "frame buffer restarted after gap");
        discarded
    }

    /// Capture source terminated. Fails if a window was in progress; the
    /// partial window is discarded either way.
    pub fn finish(&mut self) -> Result<()> {
        let buffered = self.buffered_frames();
        let in_progress = buffered > self.retained || self.pending.len() % self.channels != 0;
        self.pending.clear();
        self.retained = 0;

        if in_progress {
            warn!(buffered, required = self.window_len, "capture ended mid-window, discarding");
            return Err(DirectionError::InsufficientSamples {
                buffered,
                required: self.window_len,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(n: usize) -> Vec<f32> {
        (0..n).map(|i| i as f32).collect()
    }

    #[test]
    fn test_no_overlap_windows() {
        let mut buffer = FrameBuffer::new(16_000, 4, 4, 1).unwrap();
        let frames = buffer.push_interleaved(&ramp(10));
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].primary().samples(), &[0.0, 1.0, 2.0, 3.0]);
        assert_eq!(frames[1].primary().samples(), &[4.0, 5.0, 6.0, 7.0]);
        assert_eq!(frames[1].primary().start_sample(), 4);
        assert_eq!(buffer.buffered_frames(), 2);
    }

    #[test]
    fn test_overlap_shares_samples() {
        let mut buffer = FrameBuffer::new(16_000, 4, 2, 1).unwrap();
        let frames = buffer.push_interleaved(&ramp(8));
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[1].primary().samples(), &[2.0, 3.0, 4.0, 5.0]);
        assert_eq!(frames[2].primary().samples(), &[4.0, 5.0, 6.0, 7.0]);
        assert_eq!(frames[2].sequence(), 2);
    }

    #[test]
    fn test_window_waits_until_full() {
        let mut buffer = FrameBuffer::new(16_000, 4, 4, 1).unwrap();
        assert!(buffer.push_interleaved(&[0.1, 0.2]).is_empty());
        assert!(buffer.push_interleaved(&[0.3]).is_empty());
        let frames = buffer.push_interleaved(&[0.4]);
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_stereo_deinterleave_across_pushes() {
        let mut buffer = FrameBuffer::new(16_000, 2, 2, 2).unwrap();
        // Split mid-frame: L0 R0 L1 | R1
        assert!(buffer.push_interleaved(&[1.0, -1.0, 2.0]).is_empty());
        let frames = buffer.push_interleaved(&[-2.0]);
        match &frames[0] {
            CapturedFrame::Stereo { left, right } => {
                assert_eq!(left.samples(), &[1.0, 2.0]);
                assert_eq!(right.samples(), &[-1.0, -2.0]);
            }
            CapturedFrame::Mono(_) => panic!("expected stereo frame"),
        }
    }

    #[test]
    fn test_finish_mid_window_fails() {
        let mut buffer = FrameBuffer::new(16_000, 4, 2, 1).unwrap();
        buffer.push_interleaved(&ramp(5));
        match buffer.finish() {
            Err(DirectionError::InsufficientSamples { buffered, required }) => {
                assert_eq!(buffered, 3);
                assert_eq!(required, 4);
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(buffer.buffered_frames(), 0);
    }

    #[test]
    fn test_finish_on_boundary_is_clean() {
        let mut buffer = FrameBuffer::new(16_000, 4, 2, 1).unwrap();
        buffer.push_interleaved(&ramp(6));
        // Only the overlap of the last window remains
        assert!(buffer.finish().is_ok());
    }

    #[test]
    fn test_discontinuity_starts_fresh_window() {
        let mut buffer = FrameBuffer::new(16_000, 4, 2, 1).unwrap();
        // Window [0..4] emitted; 2 overlap + 1 new frame pending
        assert_eq!(buffer.push_interleaved(&ramp(5)).len(), 1);

        assert_eq!(buffer.discontinuity(10), 3);
        assert_eq!(buffer.buffered_frames(), 0);
        assert!(buffer.finish().is_ok());

        // Capture resumes at sample 15
        let resumed: Vec<f32> = (15..19).map(|i| i as f32).collect();
        let frames = buffer.push_interleaved(&resumed);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].primary().samples(), &[15.0, 16.0, 17.0, 18.0]);
        assert_eq!(frames[0].primary().start_sample(), 15);
        assert_eq!(frames[0].sequence(), 1);
    }

    #[test]
    fn test_discontinuity_drops_torn_stereo_frame() {
        let mut buffer = FrameBuffer::new(16_000, 2, 2, 2).unwrap();
        // L0 R0 L1, then a gap before R1 arrives
        buffer.push_interleaved(&[1.0, -1.0, 2.0]);
        assert_eq!(buffer.discontinuity(0), 1);

        let frames = buffer.push_interleaved(&[3.0, -3.0, 4.0, -4.0]);
        match &frames[0] {
            CapturedFrame::Stereo { left, right } => {
                assert_eq!(left.samples(), &[3.0, 4.0]);
                assert_eq!(right.samples(), &[-3.0, -4.0]);
                assert_eq!(left.start_sample(), 1);
            }
            CapturedFrame::Mono(_) => panic!("expected stereo frame"),
        }
    }

    #[test]
    fn test_rejects_bad_shape() {
        assert!(FrameBuffer::new(16_000, 4, 5, 1).is_err());
        assert!(FrameBuffer::new(16_000, 4, 0, 1).is_err());
        assert!(FrameBuffer::new(16_000, 4, 2, 3).is_err());
    }
}

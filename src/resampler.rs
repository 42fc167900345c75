use anyhow::Result;
use rubato::{FftFixedIn, Resampler as RubatoResampler};
use tracing::debug;

/// Input chunk size fed to rubato per channel
const CHUNK_FRAMES: usize = 1024;

/// High-quality resampler using rubato (FFT-based, fixed input chunks)
/// Converts interleaved f32 audio from the device rate to the processing rate.
/// Channels are resampled together so their relative timing is preserved.
pub struct Resampler {
    resampler: FftFixedIn<f32>,
    channels: usize,
    input_buffer: Vec<Vec<f32>>,
    output_buffer: Vec<Vec<f32>>,
}

impl Resampler {
    pub fn new(input_sample_rate: u32, output_sample_rate: u32, channels: usize) -> Result<Self> {
        debug!(input_sample_rate, output_sample_rate, channels, "resampler created");

        let resampler = FftFixedIn::<f32>::new(
            input_sample_rate as usize,
            output_sample_rate as usize,
            CHUNK_FRAMES,
            2, // sub-chunks for better quality
            channels,
        )
        .map_err(|e| anyhow::anyhow!("Failed to create resampler: {}", e))?;

        Ok(Self {
            resampler,
            channels,
            input_buffer: vec![Vec::new(); channels],
            output_buffer: vec![Vec::new(); channels],
        })
    }

    /// Forget buffered input and filter state, e.g. after a capture gap
    pub fn reset(&mut self) {
        for channel in self.input_buffer.iter_mut() {
            channel.clear();
        }
        self.resampler.reset();
    }

    /// Resample interleaved input; returns interleaved output. Input that
    /// does not fill a whole chunk waits for the next call.
    ///
    /// A failed chunk discards all buffered input and returns the error:
    /// the output stream has a gap and the caller must treat it as one.
    pub fn resample(&mut self, interleaved: &[f32]) -> Result<Vec<f32>> {
        if interleaved.is_empty() {
            return Ok(Vec::new());
        }

        for frame in interleaved.chunks_exact(self.channels) {
            for (channel, &sample) in self.input_buffer.iter_mut().zip(frame) {
                channel.push(sample);
            }
        }

        let mut output = Vec::new();
        let frames_needed = self.resampler.input_frames_next();

        while self.input_buffer[0].len() >= frames_needed {
            let chunk: Vec<Vec<f32>> = self
                .input_buffer
                .iter_mut()
                .map(|channel| channel.drain(0..frames_needed).collect())
                .collect();

            let output_frames = self.resampler.output_frames_next();
            for channel in self.output_buffer.iter_mut() {
                channel.resize(output_frames, 0.0);
            }

            match self.resampler.process_into_buffer(&chunk, &mut self.output_buffer, None) {
                Ok((_, out_len)) => {
                    output.reserve(out_len * self.channels);
                    for i in 0..out_len {
                        for channel in &self.output_buffer {
                            output.push(channel[i]);
                        }
                    }
                }
                Err(e) => {
                    for channel in self.input_buffer.iter_mut() {
                        channel.clear();
                    }
                    return Err(anyhow::anyhow!("Resampler process error: {}", e));
                }
            }
        }

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downsample_3x_stereo() {
        let mut resampler = Resampler::new(48_000, 16_000, 2).unwrap();

        // 0.5s of interleaved stereo at 48kHz
        let input: Vec<f32> = (0..24_000)
            .flat_map(|i| {
                let s = (i as f32 * 0.01).sin() * 0.5;
                [s, -s]
            })
            .collect();
        let output = resampler.resample(&input).unwrap();

        assert_eq!(output.len() % 2, 0);
        // ~8000 frames minus whatever is still buffered in rubato
        let frames = output.len() / 2;
        assert!(frames > 6_000 && frames <= 8_000, "got {} frames", frames);
    }

    #[test]
    fn test_reset_drops_pending_input() {
        let mut resampler = Resampler::new(48_000, 16_000, 1).unwrap();
        assert!(resampler.resample(&[0.1; 1000]).unwrap().is_empty());
        resampler.reset();
        // 1000 + 100 would complete a chunk if the first batch were kept
        assert!(resampler.resample(&[0.1; 100]).unwrap().is_empty());
    }

    #[test]
    fn test_partial_chunk_waits() {
        let mut resampler = Resampler::new(48_000, 16_000, 1).unwrap();
        let output = resampler.resample(&[0.1; 100]).unwrap();
        assert!(output.is_empty());
    }
}

// Microphone Capture - Lock-Free Real-Time Compliant
//
// Architecture:
// 1. CPAL callback: ONLY pushes to lock-free ring buffer
// 2. No mutexes, allocations, or DSP in callback
// 3. DSP thread drains the consumer into the frame buffer
//
// The stream is a scoped resource: opened once, owned by the pipeline,
// released on drop.

use anyhow::Result;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream};
use ringbuf::{traits::{Observer, Producer, Split}, HeapRb, HeapProd, HeapCons};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{error, info, warn};

use crate::audio_config::RING_BUFFER_SAMPLES;

/// Channels used for direction finding, at most
const MAX_CAPTURE_CHANNELS: usize = 2;

/// List available input devices as (id, display name)
pub fn list_input_devices() -> Result<Vec<(String, String)>> {
    let host = cpal::default_host();
    let mut list = Vec::new();
    list.push(("default".to_string(), "Default Microphone".to_string()));

    if let Ok(devices) = host.input_devices() {
        for device in devices {
            if let Ok(name) = device.name() {
                list.push((name.clone(), name));
            }
        }
    }
    Ok(list)
}

fn find_input_device(host: &cpal::Host, device_id: Option<&str>) -> Result<cpal::Device> {
    if let Some(id) = device_id.filter(|id| *id != "default") {
        let found = host
            .input_devices()?
            .find(|device| device.name().map(|name| name == id).unwrap_or(false));
        match found {
            Some(device) => return Ok(device),
            None => warn!(device = id, "input device not found, using default"),
        }
    }
    host.default_input_device()
        .ok_or_else(|| anyhow::anyhow!("No input device found"))
}

/// Lock-free microphone stream
///
/// Callback pushes interleaved f32 samples (1 or 2 channels) to the ring buffer.
/// Consumer is polled by the DSP thread.
pub struct MicrophoneStream {
    stream: Option<Stream>,
    consumer: Option<HeapCons<f32>>,
    sample_rate: u32,
    channels: usize,
    is_running: Arc<AtomicBool>,
    dropped_frames: Arc<AtomicU64>,
}

impl MicrophoneStream {
    /// Open the device. Takes two channels when the hardware has them,
    /// otherwise one (the estimator then simulates stereo).
    pub fn open(device_id: Option<&str>) -> Result<Self> {
        let host = cpal::default_host();
        let device = find_input_device(&host, device_id)?;

        let config = device.default_input_config()
            .map_err(|e| anyhow::anyhow!("Failed to get config: {}", e))?;

        let sample_rate = config.sample_rate().0;
        let device_channels = config.channels() as usize;
        let channels = device_channels.min(MAX_CAPTURE_CHANNELS);

        info!(
            device = %device.name().unwrap_or_default(),
            sample_rate,
            device_channels,
            capture_channels = channels,
            format = ?config.sample_format(),
            "microphone opened"
        );
        if channels < MAX_CAPTURE_CHANNELS {
            warn!("stereo microphone not available, direction will be simulated");
        }

        // Create lock-free SPSC ring buffer
        let rb = HeapRb::<f32>::new(RING_BUFFER_SAMPLES);
        let (producer, consumer) = rb.split();

        let is_running = Arc::new(AtomicBool::new(false));
        let dropped_frames = Arc::new(AtomicU64::new(0));

        let stream = build_input_stream(
            &device,
            &config,
            producer,
            device_channels,
            channels,
            is_running.clone(),
            dropped_frames.clone(),
        )?;

        Ok(Self {
            stream: Some(stream),
            consumer: Some(consumer),
            sample_rate,
            channels,
            is_running,
            dropped_frames,
        })
    }

    /// Start capturing audio
    pub fn play(&self) -> Result<()> {
        if let Some(ref stream) = self.stream {
            stream.play().map_err(|e| anyhow::anyhow!("Failed to start stream: {}", e))?;
            self.is_running.store(true, Ordering::SeqCst);
            info!("microphone stream started");
        }
        Ok(())
    }

    /// Pause capturing
    pub fn pause(&self) -> Result<()> {
        if let Some(ref stream) = self.stream {
            stream.pause().map_err(|e| anyhow::anyhow!("Failed to pause stream: {}", e))?;
            self.is_running.store(false, Ordering::SeqCst);
            info!("microphone stream paused");
        }
        Ok(())
    }

    /// Device sample rate
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Interleaved channels pushed into the ring buffer (1 or 2)
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Take ownership of the consumer for the DSP thread
    pub fn take_consumer(&mut self) -> Option<HeapCons<f32>> {
        self.consumer.take()
    }

    /// Check if stream is running
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Device frames lost because the ring buffer was full
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// Shared handle on the dropped-frame count, for the DSP thread
    pub fn dropped_frame_counter(&self) -> Arc<AtomicU64> {
        self.dropped_frames.clone()
    }
}

/// Push the first `capture` channels of each device frame.
/// Whole frames only, so the consumer never sees a torn frame.
/// Frames that do not fit are counted in `dropped_frames`.
#[inline]
fn push_frames<T: Copy>(
    producer: &mut HeapProd<f32>,
    data: &[T],
    device_channels: usize,
    capture: usize,
    convert: impl Fn(T) -> f32,
    dropped_frames: &AtomicU64,
) {
    let total = data.len() / device_channels;
    let mut pushed = 0;
    for frame in data.chunks_exact(device_channels) {
        if producer.vacant_len() < capture {
            break;
        }
        for &sample in &frame[..capture] {
            let _ = producer.try_push(convert(sample));
        }
        pushed += 1;
    }
    if pushed < total {
        dropped_frames.fetch_add((total - pushed) as u64, Ordering::Relaxed);
    }
}

/// Build input stream with lock-free callback
///
/// The callback ONLY pushes to the ring buffer.
/// No mutexes, allocations, or DSP.
fn build_input_stream(
    device: &cpal::Device,
    config: &cpal::SupportedStreamConfig,
    mut producer: HeapProd<f32>,
    device_channels: usize,
    capture: usize,
    is_running: Arc<AtomicBool>,
    dropped_frames: Arc<AtomicU64>,
) -> Result<Stream> {
    let err_fn = |err: cpal::StreamError| error!(error = %err, "microphone stream error");

    let stream = match config.sample_format() {
        SampleFormat::F32 => {
            device.build_input_stream(
                &config.clone().into(),
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if !is_running.load(Ordering::Relaxed) {
                        return;
                    }
                    // REAL-TIME SAFE: Only lock-free push
                    push_frames(&mut producer, data, device_channels, capture, |s| s, &dropped_frames);
                },
                err_fn,
                None,
            )?
        }
        SampleFormat::I16 => {
            device.build_input_stream(
                &config.clone().into(),
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    if !is_running.load(Ordering::Relaxed) {
                        return;
                    }
                    push_frames(&mut producer, data, device_channels, capture, |s| s as f32 / 32768.0, &dropped_frames);
                },
                err_fn,
                None,
            )?
        }
        SampleFormat::I32 => {
            device.build_input_stream(
                &config.clone().into(),
                move |data: &[i32], _: &cpal::InputCallbackInfo| {
                    if !is_running.load(Ordering::Relaxed) {
                        return;
                    }
                    push_frames(
                        &mut producer,
                        data,
                        device_channels,
                        capture,
                        |s| s as f32 / 2147483648.0,
                        &dropped_frames,
                    );
                },
                err_fn,
                None,
            )?
        }
        format => {
            return Err(anyhow::anyhow!("Unsupported sample format: {:?}", format));
        }
    };

    Ok(stream)
}

impl Drop for MicrophoneStream {
    fn drop(&mut self) {
        self.is_running.store(false, Ordering::SeqCst);
        // Stream will be dropped and stopped automatically
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringbuf::traits::Consumer;

    #[test]
    fn test_push_frames_keeps_first_two_channels() {
        let rb = HeapRb::<f32>::new(64);
        let (mut producer, mut consumer) = rb.split();
        let dropped = AtomicU64::new(0);

        // Four-channel device, two frames
        let data = [1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
        push_frames(&mut producer, &data, 4, 2, |s| s, &dropped);

        let drained: Vec<f32> = std::iter::from_fn(|| consumer.try_pop()).collect();
        assert_eq!(drained, vec![1.0, 2.0, 5.0, 6.0]);
        assert_eq!(dropped.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_push_frames_never_tears_a_frame() {
        let rb = HeapRb::<f32>::new(3);
        let (mut producer, mut consumer) = rb.split();
        let dropped = AtomicU64::new(0);

        push_frames(&mut producer, &[1i16, 2, 3, 4], 2, 2, |s| s as f32, &dropped);

        let drained: Vec<f32> = std::iter::from_fn(|| consumer.try_pop()).collect();
        assert_eq!(drained, vec![1.0, 2.0]);
        assert_eq!(dropped.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_push_frames_counts_every_dropped_frame() {
        let rb = HeapRb::<f32>::new(4);
        let (mut producer, _consumer) = rb.split();
        let dropped = AtomicU64::new(0);

        // Mono, room for 4 of 10 frames
        push_frames(&mut producer, &[0.5f32; 10], 1, 1, |s| s, &dropped);
        assert_eq!(dropped.load(Ordering::Relaxed), 6);

        // Full ring: the whole callback is lost
        push_frames(&mut producer, &[0.5f32; 3], 1, 1, |s| s, &dropped);
        assert_eq!(dropped.load(Ordering::Relaxed), 9);
    }
}

// Direction pipeline
//
// Threads:
// 1. CPAL callback (microphone.rs): pushes interleaved samples to the ring buffer
// 2. DSP thread: drains the ring buffer, resamples, cuts windows, and drops
//    each finished window into a latest-wins slot
// 3. Estimator thread: takes the newest window, estimates, publishes
//
// If estimation falls behind, older windows are overwritten in the slot
// rather than queued, keeping latency bounded by one window.
// A break in capture (stall, ring overrun, resampler failure) throws away
// the window in progress; no window spans a gap.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use ringbuf::traits::{Consumer, Observer};
use ringbuf::HeapCons;
use tracing::{debug, error, info, warn};

use crate::angle::{AngleEstimator, DirectionEstimate};
use crate::audio_config::{DirectionConfig, DSP_POLL_MS};
use crate::correlation::CorrelationEngine;
use crate::error::{DirectionError, Result};
use crate::frame_buffer::FrameBuffer;
use crate::level::WindowLevel;
use crate::microphone::MicrophoneStream;
use crate::publisher::{DirectionPublisher, DirectionRecord};
use crate::resampler::Resampler;
use crate::stereo::StereoProvider;
use crate::window::CapturedFrame;

// ============================================================================
// ESTIMATOR (synchronous: stereo -> correlation -> angle)
// ============================================================================

/// The per-window computation, with no threads or devices attached.
#[derive(Debug, Clone)]
pub struct DirectionEstimator {
    config: DirectionConfig,
    stereo: StereoProvider,
    correlation: CorrelationEngine,
    angle: AngleEstimator,
}

impl DirectionEstimator {
    /// Validates the configuration; `InvalidSpacing` here is fatal.
    pub fn new(config: DirectionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            stereo: StereoProvider::from_config(&config)?,
            correlation: CorrelationEngine::new(&config),
            angle: AngleEstimator::new(config.speed_of_sound)?,
            config,
        })
    }

    pub fn config(&self) -> &DirectionConfig {
        &self.config
    }

    /// Direction for one captured window. Pure: the same frame always
    /// yields the same estimate.
    pub fn estimate(&self, frame: &CapturedFrame) -> Result<DirectionEstimate> {
        let pair = self.stereo.pair(frame)?;
        let correlation = self.correlation.correlate(&pair);
        self.angle.estimate_pair(&correlation, &pair)
    }

    /// Estimate and hand the result to the publisher's sinks.
    pub fn process(&self, frame: &CapturedFrame, publisher: &DirectionPublisher) -> Result<DirectionRecord> {
        let estimate = self.estimate(frame)?;
        let primary = frame.primary();
        Ok(publisher.publish(
            primary.sequence(),
            primary.start_sample(),
            estimate,
            WindowLevel::measure(primary.samples()),
        ))
    }

    /// Run a finished recording (interleaved, at the configured rate)
    /// through windowing and estimation. A trailing partial window is
    /// discarded; recoverable per-window errors skip that window.
    pub fn process_stream(
        &self,
        interleaved: &[f32],
        channels: usize,
        publisher: &DirectionPublisher,
    ) -> Result<Vec<DirectionRecord>> {
        let mut buffer = FrameBuffer::from_config(&self.config, channels)?;
        let mut records = Vec::new();

        for frame in buffer.push_interleaved(interleaved) {
            match self.process(&frame, publisher) {
                Ok(record) => records.push(record),
                Err(e) if e.is_recoverable() => {
                    warn!(sequence = frame.sequence(), error = %e, "window skipped");
                }
                Err(e) => return Err(e),
            }
        }

        if let Err(e) = buffer.finish() {
            debug!(error = %e, "trailing partial window discarded");
        }
        Ok(records)
    }
}

// ============================================================================
// LATEST-WINS HANDOFF
// ============================================================================

/// Single-slot handoff where a new value replaces any unconsumed one.
pub struct LatestSlot<T> {
    state: Mutex<SlotState<T>>,
    ready: Condvar,
}

struct SlotState<T> {
    value: Option<T>,
    closed: bool,
}

#[derive(Debug)]
pub enum SlotTake<T> {
    Value(T),
    Timeout,
    Closed,
}

impl<T> Default for LatestSlot<T> {
    fn default() -> Self {
        Self {
            state: Mutex::new(SlotState { value: None, closed: false }),
            ready: Condvar::new(),
        }
    }
}

impl<T> LatestSlot<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value`; returns the stale value it displaced, if any.
    pub fn put(&self, value: T) -> Option<T> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let stale = state.value.replace(value);
        self.ready.notify_one();
        stale
    }

    /// Wait up to `timeout` for a value. Pending values are still handed
    /// out after `close`.
    pub fn take_timeout(&self, timeout: Duration) -> SlotTake<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if let Some(value) = state.value.take() {
                return SlotTake::Value(value);
            }
            if state.closed {
                return SlotTake::Closed;
            }
            let now = Instant::now();
            if now >= deadline {
                return SlotTake::Timeout;
            }
            state = self
                .ready
                .wait_timeout(state, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
    }

    pub fn close(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.closed = true;
        self.ready.notify_all();
    }
}

// ============================================================================
// LIVE PIPELINE (microphone -> publisher)
// ============================================================================

#[derive(Debug, Default)]
pub struct PipelineStats {
    windows_emitted: AtomicU64,
    windows_replaced: AtomicU64,
    windows_stale: AtomicU64,
    estimates_late: AtomicU64,
    windows_failed: AtomicU64,
    published: AtomicU64,
    capture_gaps: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStatsSnapshot {
    pub windows_emitted: u64,
    /// Overwritten in the slot before the estimator got to them
    pub windows_replaced: u64,
    /// Picked up too late to be useful
    pub windows_stale: u64,
    /// Estimation took longer than the window budget
    pub estimates_late: u64,
    pub windows_failed: u64,
    pub published: u64,
    /// Breaks in the captured stream that discarded a window in progress
    pub capture_gaps: u64,
}

impl PipelineStats {
    pub fn snapshot(&self) -> PipelineStatsSnapshot {
        PipelineStatsSnapshot {
            windows_emitted: self.windows_emitted.load(Ordering::Relaxed),
            windows_replaced: self.windows_replaced.load(Ordering::Relaxed),
            windows_stale: self.windows_stale.load(Ordering::Relaxed),
            estimates_late: self.estimates_late.load(Ordering::Relaxed),
            windows_failed: self.windows_failed.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            capture_gaps: self.capture_gaps.load(Ordering::Relaxed),
        }
    }
}

pub struct DirectionPipeline {
    stop_signal: Arc<AtomicBool>,
    dsp_thread: Option<thread::JoinHandle<()>>,
    estimator_thread: Option<thread::JoinHandle<()>>,
    slot: Arc<LatestSlot<CapturedFrame>>,
    input: Option<MicrophoneStream>,
    channels: usize,
    stats: Arc<PipelineStats>,
}

impl DirectionPipeline {
    /// Validate, open the microphone, and start both worker threads.
    ///
    /// Blocks while the device opens. Misconfiguration fails here, before
    /// any audio is captured.
    pub fn start(config: DirectionConfig, publisher: DirectionPublisher) -> Result<Self> {
        let estimator = DirectionEstimator::new(config.clone())?;

        let mut input = MicrophoneStream::open(config.device_id.as_deref())?;
        let channels = input.channels();
        let device_rate = input.sample_rate();
        if channels < 2 && !config.simulate_stereo {
            // Every window would be rejected
            return Err(DirectionError::MonoInput);
        }

        let resampler = if device_rate != config.sample_rate {
            Some(Resampler::new(device_rate, config.sample_rate, channels)?)
        } else {
            None
        };
        let frame_buffer = FrameBuffer::from_config(&config, channels)?;

        let consumer = input
            .take_consumer()
            .ok_or_else(|| DirectionError::Device(anyhow::anyhow!("Failed to get consumer")))?;
        let dsp = DspLoop::new(
            consumer,
            channels,
            resampler,
            frame_buffer,
            input.dropped_frame_counter(),
            config.sample_rate as f64 / device_rate as f64,
            config.stall_after(),
        );
        input.play()?;

        let stop_signal = Arc::new(AtomicBool::new(false));
        let slot = Arc::new(LatestSlot::new());
        let stats = Arc::new(PipelineStats::default());
        let stale_after = config.stale_after();

        let dsp_thread = {
            let stop_signal = stop_signal.clone();
            let slot = slot.clone();
            let stats = stats.clone();
            thread::Builder::new()
                .name("direction-dsp".into())
                .spawn(move || run_dsp(dsp, &slot, &stats, &stop_signal))
                .map_err(|e| DirectionError::Device(e.into()))?
        };

        let estimator_thread = {
            let slot = slot.clone();
            let stats = stats.clone();
            thread::Builder::new()
                .name("direction-estimator".into())
                .spawn(move || run_estimator(estimator, publisher, &slot, &stats, stale_after))
                .map_err(|e| DirectionError::Device(e.into()))?
        };

        info!(
            sample_rate = config.sample_rate,
            device_rate,
            channels,
            window_seconds = config.window_seconds,
            overlap = config.overlap,
            "direction pipeline started"
        );

        Ok(Self {
            stop_signal,
            dsp_thread: Some(dsp_thread),
            estimator_thread: Some(estimator_thread),
            slot,
            input: Some(input),
            channels,
            stats,
        })
    }

    pub fn stats(&self) -> PipelineStatsSnapshot {
        self.stats.snapshot()
    }

    /// Whether the capture device delivers a single channel (simulated stereo)
    pub fn is_simulated(&self) -> bool {
        self.channels < 2
    }

    /// Stop both threads and release the device. Idempotent.
    pub fn stop(&mut self) {
        self.stop_signal.store(true, Ordering::SeqCst);
        if let Some(handle) = self.dsp_thread.take() {
            let _ = handle.join();
        }
        // DSP thread is gone: nothing else will be put, let the estimator drain and exit
        self.slot.close();
        if let Some(handle) = self.estimator_thread.take() {
            let _ = handle.join();
        }
        if let Some(input) = self.input.take() {
            let _ = input.pause();
            info!(
                dropped_frames = input.dropped_frames(),
                capture_gaps = self.stats.capture_gaps.load(Ordering::Relaxed),
                "direction pipeline stopped"
            );
        }
    }
}

impl Drop for DirectionPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

/// DSP thread state: everything between the ring buffer and the slot.
struct DspLoop {
    consumer: HeapCons<f32>,
    channels: usize,
    resampler: Option<Resampler>,
    frame_buffer: FrameBuffer,
    /// Incremented by the capture callback
    dropped_frames: Arc<AtomicU64>,
    dropped_seen: u64,
    /// Processing-rate frames per device frame
    rate_ratio: f64,
    raw_batch: Vec<f32>,
    stall_after: Duration,
    last_sample: Instant,
}

impl DspLoop {
    fn new(
        consumer: HeapCons<f32>,
        channels: usize,
        resampler: Option<Resampler>,
        frame_buffer: FrameBuffer,
        dropped_frames: Arc<AtomicU64>,
        rate_ratio: f64,
        stall_after: Duration,
    ) -> Self {
        let dropped_seen = dropped_frames.load(Ordering::Relaxed);
        Self {
            consumer,
            channels,
            resampler,
            frame_buffer,
            dropped_frames,
            dropped_seen,
            rate_ratio,
            raw_batch: Vec::with_capacity(4096),
            stall_after,
            last_sample: Instant::now(),
        }
    }

    /// One pass over the ring buffer. Returns the samples drained.
    fn poll(&mut self, slot: &LatestSlot<CapturedFrame>, stats: &PipelineStats) -> usize {
        // 1. Frames lost in the callback: queued samples may predate the gap
        let dropped = self.dropped_frames.load(Ordering::Relaxed);
        if dropped != self.dropped_seen {
            let queued = self.consumer.occupied_len() / self.channels * self.channels;
            let skipped = self.consumer.skip(queued) / self.channels;
            let lost = dropped.wrapping_sub(self.dropped_seen) + skipped as u64;
            self.dropped_seen = dropped;
            self.restart(self.processing_frames(lost), "ring buffer overrun", stats);
        }

        // 2. Drain ring buffer (lock-free), whole frames only
        let available = self.consumer.occupied_len() / self.channels * self.channels;
        if available > 0 {
            self.raw_batch.resize(available, 0.0);
            let popped = self.consumer.pop_slice(&mut self.raw_batch);
            self.raw_batch.truncate(popped);
        } else if self.frame_buffer.buffered_frames() > 0 && self.last_sample.elapsed() > self.stall_after {
            // Device went quiet mid-window: what follows would not be contiguous
            self.restart(0, "capture stalled", stats);
        }
        if available > 0 {
            self.last_sample = Instant::now();
        }

        // 3. Resample to the processing rate and cut windows
        let frames = match self.resampler.as_mut() {
            Some(resampler) => match resampler.resample(&self.raw_batch) {
                Ok(out) => self.frame_buffer.push_interleaved(&out),
                Err(e) => {
                    warn!(error = %e, "resample failed");
                    let lost = (self.raw_batch.len() / self.channels) as u64;
                    self.restart(self.processing_frames(lost), "resampler failure", stats);
                    Vec::new()
                }
            },
            None => self.frame_buffer.push_interleaved(&self.raw_batch),
        };
        self.raw_batch.clear();

        // 4. Hand off the newest
        for frame in frames {
            stats.windows_emitted.fetch_add(1, Ordering::Relaxed);
            if let Some(stale) = slot.put(frame) {
                stats.windows_replaced.fetch_add(1, Ordering::Relaxed);
                debug!(sequence = stale.sequence(), "estimator behind, window replaced");
            }
        }

        available
    }

    fn processing_frames(&self, device_frames: u64) -> u64 {
        (device_frames as f64 * self.rate_ratio).round() as u64
    }

    /// Discard the window in progress so none spans a gap in capture.
    fn restart(&mut self, lost_frames: u64, reason: &'static str, stats: &PipelineStats) {
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.reset();
        }
        let discarded = self.frame_buffer.discontinuity(lost_frames);
        stats.capture_gaps.fetch_add(1, Ordering::Relaxed);
        warn!(reason, discarded, lost_frames, "capture gap, window in progress discarded");
    }

    fn finish(mut self) {
        if let Err(e) = self.frame_buffer.finish() {
            debug!(error = %e, "partial window discarded at shutdown");
        }
    }
}

fn run_dsp(
    mut dsp: DspLoop,
    slot: &LatestSlot<CapturedFrame>,
    stats: &PipelineStats,
    stop_signal: &AtomicBool,
) {
    debug!("DSP thread started");

    while !stop_signal.load(Ordering::Relaxed) {
        // Short sleep when the ring buffer was empty
        if dsp.poll(slot, stats) == 0 {
            thread::sleep(Duration::from_millis(DSP_POLL_MS));
        }
    }

    dsp.finish();
    debug!("DSP thread stopped");
}

fn run_estimator(
    estimator: DirectionEstimator,
    publisher: DirectionPublisher,
    slot: &LatestSlot<CapturedFrame>,
    stats: &PipelineStats,
    stale_after: Duration,
) {
    debug!("estimator thread started");

    loop {
        let frame = match slot.take_timeout(stale_after) {
            SlotTake::Value(frame) => frame,
            SlotTake::Timeout => continue,
            SlotTake::Closed => break,
        };

        let age = frame.captured_at().elapsed();
        if age > stale_after {
            stats.windows_stale.fetch_add(1, Ordering::Relaxed);
            warn!(sequence = frame.sequence(), age_ms = age.as_millis() as u64, "stale window discarded");
            continue;
        }

        let started = Instant::now();
        let estimate = match estimator.estimate(&frame) {
            Ok(estimate) => estimate,
            Err(e) => {
                stats.windows_failed.fetch_add(1, Ordering::Relaxed);
                if e.is_recoverable() {
                    warn!(sequence = frame.sequence(), error = %e, "window skipped");
                } else {
                    error!(sequence = frame.sequence(), error = %e, "window failed");
                }
                continue;
            }
        };

        let elapsed = started.elapsed();
        if elapsed > stale_after {
            stats.estimates_late.fetch_add(1, Ordering::Relaxed);
            warn!(
                sequence = frame.sequence(),
                elapsed_ms = elapsed.as_millis() as u64,
                "estimate exceeded window budget, discarded"
            );
            continue;
        }

        let primary = frame.primary();
        publisher.publish(
            primary.sequence(),
            primary.start_sample(),
            estimate,
            WindowLevel::measure(primary.samples()),
        );
        stats.published.fetch_add(1, Ordering::Relaxed);
    }

    debug!("estimator thread stopped");
}

// Direction Result Publisher
//
// Boundary adapter between the estimator and its consumers (dashboard,
// history logger). Delivery never blocks the producing thread: sinks either
// run a quick callback or `try_send` into a bounded channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::angle::DirectionEstimate;
use crate::level::WindowLevel;

/// One published direction update
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DirectionRecord {
    /// Window sequence number, shared with the classifier's result
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub window_start_sample: u64,
    pub estimate: DirectionEstimate,
    pub level: WindowLevel,
}

pub trait DirectionSink: Send + Sync {
    /// Must return promptly; runs on the estimator thread.
    fn deliver(&self, record: &DirectionRecord);
}

impl<T: DirectionSink + ?Sized> DirectionSink for Arc<T> {
    fn deliver(&self, record: &DirectionRecord) {
        (**self).deliver(record)
    }
}

/// Fire-and-forget closure
pub struct CallbackSink<F>(F);

impl<F> CallbackSink<F>
where
    F: Fn(&DirectionRecord) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self(callback)
    }
}

impl<F> DirectionSink for CallbackSink<F>
where
    F: Fn(&DirectionRecord) + Send + Sync,
{
    fn deliver(&self, record: &DirectionRecord) {
        (self.0)(record)
    }
}

/// Bounded queue; records are dropped (and counted) when the consumer lags.
pub struct ChannelSink {
    sender: SyncSender<DirectionRecord>,
    dropped: AtomicU64,
}

impl ChannelSink {
    pub fn bounded(capacity: usize) -> (Self, Receiver<DirectionRecord>) {
        let (sender, receiver) = mpsc::sync_channel(capacity);
        (
            Self {
                sender,
                dropped: AtomicU64::new(0),
            },
            receiver,
        )
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl DirectionSink for ChannelSink {
    fn deliver(&self, record: &DirectionRecord) {
        match self.sender.try_send(record.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(sequence = record.sequence, dropped, "direction consumer lagging, record dropped");
            }
            Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

#[derive(Default)]
pub struct DirectionPublisher {
    sinks: Vec<Box<dyn DirectionSink>>,
    published: AtomicU64,
}

impl DirectionPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, sink: impl DirectionSink + 'static) {
        self.sinks.push(Box::new(sink));
    }

    /// Builder-style `register`
    pub fn with_sink(mut self, sink: impl DirectionSink + 'static) -> Self {
        self.register(sink);
        self
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Stamp the estimate with the current wall-clock time and hand it off.
    pub fn publish(
        &self,
        sequence: u64,
        window_start_sample: u64,
        estimate: DirectionEstimate,
        level: WindowLevel,
    ) -> DirectionRecord {
        let record = DirectionRecord {
            sequence,
            timestamp: Utc::now(),
            window_start_sample,
            estimate,
            level,
        };
        self.dispatch(&record);
        record
    }

    pub fn dispatch(&self, record: &DirectionRecord) {
        for sink in &self.sinks {
            sink.deliver(record);
        }
        self.published.fetch_add(1, Ordering::Relaxed);
        debug!(
            sequence = record.sequence,
            angle = record.estimate.angle_degrees,
            confidence = record.estimate.confidence,
            sinks = self.sinks.len(),
            "direction published"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::angle::Validity;
    use std::sync::Mutex;

    fn estimate() -> DirectionEstimate {
        DirectionEstimate {
            angle_degrees: -18.8,
            validity: Validity::FrontBackAmbiguous,
            confidence: 0.9,
            simulated: false,
            lag_samples: 3,
            refined_lag_samples: 3.0,
            correlation_peak: 0.9,
        }
    }

    fn level() -> WindowLevel {
        WindowLevel { peak: 0.5, rms_dbfs: -12.0 }
    }

    #[test]
    fn test_callback_receives_record() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let publisher = DirectionPublisher::new().with_sink(CallbackSink::new(move |record: &DirectionRecord| {
            seen_clone.lock().unwrap().push(record.sequence);
        }));

        publisher.publish(4, 48_000, estimate(), level());
        publisher.publish(5, 60_000, estimate(), level());
        assert_eq!(*seen.lock().unwrap(), vec![4, 5]);
        assert_eq!(publisher.published(), 2);
    }

    #[test]
    fn test_full_channel_drops_without_blocking() {
        let (sink, receiver) = ChannelSink::bounded(1);
        let sink = Arc::new(sink);

        let publisher = DirectionPublisher::new().with_sink(sink.clone());
        publisher.publish(0, 0, estimate(), level());
        publisher.publish(1, 0, estimate(), level());
        publisher.publish(2, 0, estimate(), level());

        assert_eq!(receiver.try_recv().unwrap().sequence, 0);
        assert!(receiver.try_recv().is_err());
        assert_eq!(sink.dropped(), 2);
    }

    #[test]
    fn test_record_serializes() {
        let publisher = DirectionPublisher::new();
        let record = publisher.publish(9, 0, estimate(), level());
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["sequence"], 9);
        assert_eq!(json["estimate"]["validity"], "front_back_ambiguous");
        assert_eq!(json["estimate"]["simulated"], false);
        assert!(json["timestamp"].is_string());
    }
}

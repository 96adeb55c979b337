//! Signal sampler subscription.
//!
//! The radio transport lives outside this crate. Whatever produces readings
//! (an HTTP ingest endpoint, a BLE bridge process, a test) pushes
//! [`SamplerEvent`]s into a [`SampleFeed`]; the monitor loop consumes them in
//! arrival order from the matching [`SignalSampler`] subscription.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::types::{SamplerEvent, SignalSample};

/// Why a sampler event was not queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FeedError {
    /// The subscription has been stopped.
    #[error("signal sampler is stopped")]
    Stopped,

    /// The buffer is full.
    #[error("signal sample buffer is full ({capacity} pending)")]
    Full {
        /// Buffer capacity.
        capacity: usize,
    },
}

/// A source of beacon signal events.
pub trait SignalSampler: Send {
    /// Take the event subscription. Returns `None` once it has been taken or
    /// the sampler was stopped.
    fn subscribe(&mut self) -> Option<mpsc::Receiver<SamplerEvent>>;

    /// End the subscription. Further events are rejected.
    fn stop(&mut self);
}

/// Channel-backed sampler paired with a [`SampleFeed`].
#[derive(Debug)]
pub struct ChannelSampler {
    receiver: Option<mpsc::Receiver<SamplerEvent>>,
    stopped: Arc<AtomicBool>,
}

/// Producer side of a [`ChannelSampler`]. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SampleFeed {
    sender: mpsc::Sender<SamplerEvent>,
    stopped: Arc<AtomicBool>,
    capacity: usize,
}

impl ChannelSampler {
    /// Create a sampler buffering up to `capacity` events.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, SampleFeed) {
        let (sender, receiver) = mpsc::channel(capacity);
        let stopped = Arc::new(AtomicBool::new(false));
        (
            Self {
                receiver: Some(receiver),
                stopped: Arc::clone(&stopped),
            },
            SampleFeed {
                sender,
                stopped,
                capacity,
            },
        )
    }
}

impl SignalSampler for ChannelSampler {
    fn subscribe(&mut self) -> Option<mpsc::Receiver<SamplerEvent>> {
        if self.stopped.load(Ordering::Acquire) {
            return None;
        }
        self.receiver.take()
    }

    fn stop(&mut self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            info!("signal sampler stopped");
        }
        if let Some(receiver) = self.receiver.as_mut() {
            receiver.close();
        }
    }
}

impl SampleFeed {
    /// Queue an event without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::Full`] when the buffer is full and
    /// [`FeedError::Stopped`] once the sampler has been stopped.
    pub fn try_push(&self, event: SamplerEvent) -> Result<(), FeedError> {
        if self.is_stopped() {
            return Err(FeedError::Stopped);
        }
        self.sender.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                debug!(capacity = self.capacity, "dropping sampler event, buffer full");
                FeedError::Full {
                    capacity: self.capacity,
                }
            }
            mpsc::error::TrySendError::Closed(_) => FeedError::Stopped,
        })
    }

    /// Queue an event, waiting for buffer space.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::Stopped`] once the sampler has been stopped.
    pub async fn push(&self, event: SamplerEvent) -> Result<(), FeedError> {
        if self.is_stopped() {
            return Err(FeedError::Stopped);
        }
        self.sender
            .send(event)
            .await
            .map_err(|_| FeedError::Stopped)
    }

    /// Queue a reading.
    ///
    /// # Errors
    ///
    /// See [`SampleFeed::push`].
    pub async fn sample(&self, sample: SignalSample) -> Result<(), FeedError> {
        self.push(SamplerEvent::Sample(sample)).await
    }

    /// Report that the beacon was lost.
    ///
    /// # Errors
    ///
    /// See [`SampleFeed::push`].
    pub async fn disconnected(&self, at: DateTime<Utc>) -> Result<(), FeedError> {
        self.push(SamplerEvent::Disconnected { at }).await
    }

    /// Whether the paired sampler has been stopped.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire) || self.sender.is_closed()
    }
}

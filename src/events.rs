//! Typed event channel for cache and session observers.
//!
//! Consumers subscribe through [`EventChannel::subscribe`]; emitters never
//! block and never fail — sending with zero receivers is fine.

use tokio::sync::broadcast;

/// Events published by the video cache and session layers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CacheEvent {
    /// The active video changed.
    VideoChanged {
        /// Identifier of the newly active video.
        id: String,
    },
    /// A video payload finished loading into the byte-level cache.
    VideoLoaded {
        /// Identifier of the loaded video.
        id: String,
    },
    /// A video payload failed to load.
    VideoLoadFailed {
        /// Identifier of the video that failed.
        id: String,
        /// Human-readable failure description.
        reason: String,
    },
}

/// Cheap cloneable broadcast channel for [`CacheEvent`]s.
#[derive(Clone, Debug)]
pub struct EventChannel {
    tx: broadcast::Sender<CacheEvent>,
}

impl EventChannel {
    /// Create a channel retaining up to `capacity` undelivered events per
    /// receiver.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.tx.subscribe()
    }

    /// Emit an event. Lagging or absent receivers are not an error.
    pub fn emit(&self, event: CacheEvent) {
        let _ = self.tx.send(event);
    }
}

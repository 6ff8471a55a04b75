//! Public types for outage buffering: configuration, lifecycle events,
//! stats, and listener handles.

use crate::error::{BufferError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Configuration for a buffer manager.
///
/// Immutable for the lifetime of the engine.
#[derive(Clone, Debug)]
pub struct BufferConfig {
    /// Soft outage threshold. Crossing it flags the outage as extended but
    /// buffering continues and replay still happens on reconnect.
    /// Default: 30s
    pub buffer_duration: Duration,

    /// Hard outage threshold. Crossing it force-clears the session with
    /// data loss. Must be >= `buffer_duration`.
    /// Default: 35s
    pub cleanup_timeout: Duration,

    /// Per-subscription cap; the oldest entry rotates out when full.
    /// Default: 100
    pub max_updates_per_subscription: usize,

    /// Global cap across all subscriptions; crossing it sheds the globally
    /// oldest entries.
    /// Default: 1000
    pub max_total_updates: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            buffer_duration: Duration::from_secs(30),
            cleanup_timeout: Duration::from_secs(35),
            max_updates_per_subscription: 100,
            max_total_updates: 1000,
        }
    }
}

impl BufferConfig {
    /// Check the configuration for internally inconsistent values.
    pub fn validate(&self) -> Result<()> {
        if self.cleanup_timeout < self.buffer_duration {
            return Err(BufferError::InvalidConfig(format!(
                "cleanup_timeout ({:?}) must be >= buffer_duration ({:?})",
                self.cleanup_timeout, self.buffer_duration
            )));
        }
        if self.max_updates_per_subscription == 0 {
            return Err(BufferError::InvalidConfig(
                "max_updates_per_subscription must be > 0".into(),
            ));
        }
        if self.max_total_updates == 0 {
            return Err(BufferError::InvalidConfig(
                "max_total_updates must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Why a session's buffers were discarded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClearReason {
    /// Explicit clear by the caller (administrative reset, teardown).
    Manual,
    /// The hard outage threshold elapsed before reconnect.
    Timeout,
}

impl fmt::Display for ClearReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClearReason::Manual => write!(f, "manual"),
            ClearReason::Timeout => write!(f, "timeout"),
        }
    }
}

/// Lifecycle notifications emitted by the buffer manager.
///
/// Fire-and-forget: delivered to every attached listener over a bounded
/// channel. Listeners that fall behind or disconnect are detached.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BufferEvent {
    /// A buffering session started.
    BufferingStarted {
        subscription_count: usize,
    },

    /// Global pressure forced eviction of the oldest buffered updates.
    BufferOverflow {
        dropped_count: usize,
    },

    /// The outage crossed a duration threshold. On the soft path replay
    /// still happens; on the hard path this precedes a timeout clear.
    ExtendedOutage {
        outage_ms: u64,
        subscription_count: usize,
    },

    /// Replay finished. The count reflects attempted delivery volume;
    /// failed subscriptions still contribute theirs.
    UpdatesReplayed {
        update_count: usize,
        subscription_count: usize,
    },

    /// The session was reset and its buffers discarded.
    BufferCleared {
        reason: ClearReason,
        update_count: usize,
    },
}

/// Unique identifier for an event listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Handle for receiving buffer lifecycle events.
pub struct EventListenerHandle {
    pub id: ListenerId,
    /// Channel to receive events.
    pub receiver: crossbeam_channel::Receiver<BufferEvent>,
}

impl EventListenerHandle {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> std::result::Result<BufferEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> std::result::Result<BufferEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> std::result::Result<BufferEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

/// Point-in-time view of the buffer, for monitoring.
#[derive(Clone, Debug, Default)]
pub struct BufferStats {
    /// Whether a buffering session is active.
    pub active: bool,
    /// Elapsed outage duration (0 if inactive).
    pub outage_ms: u64,
    /// Total buffered updates across all subscriptions.
    pub buffered_updates: usize,
    /// Number of tracked subscriptions (seeded keys count even when empty).
    pub subscription_count: usize,
    /// Age of the single oldest buffered update (0 if inactive or empty).
    pub oldest_update_age_ms: u64,
}

/// Outcome of a stop-and-replay call.
#[derive(Clone, Debug, Default)]
pub struct ReplaySummary {
    /// Updates handed to the delivery callback (successful or not).
    pub update_count: usize,
    /// Subscriptions that had buffered entries.
    pub subscription_count: usize,
    /// Subscriptions whose delivery callback reported failure. These
    /// streams need a full resync by the caller.
    pub failed_subscriptions: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = BufferConfig::default();
        assert_eq!(config.buffer_duration, Duration::from_secs(30));
        assert_eq!(config.cleanup_timeout, Duration::from_secs(35));
        assert_eq!(config.max_updates_per_subscription, 100);
        assert_eq!(config.max_total_updates, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_rejects_hard_below_soft() {
        let config = BufferConfig {
            buffer_duration: Duration::from_secs(10),
            cleanup_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(BufferError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_config_rejects_zero_caps() {
        let config = BufferConfig {
            max_updates_per_subscription: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = BufferConfig {
            max_total_updates: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_clear_reason_display() {
        assert_eq!(ClearReason::Manual.to_string(), "manual");
        assert_eq!(ClearReason::Timeout.to_string(), "timeout");
    }

    #[test]
    fn test_event_serialization_tag() {
        let event = BufferEvent::BufferCleared {
            reason: ClearReason::Timeout,
            update_count: 3,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"buffer_cleared\""));
        assert!(json.contains("\"reason\":\"timeout\""));
    }
}

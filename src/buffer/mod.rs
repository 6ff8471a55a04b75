//! Outage buffering for subscription updates.
//!
//! When the push transport disconnects, updates that would have been
//! delivered live are captured here instead:
//! - Bounded per-subscription and global capacity with two-tier eviction
//! - Soft and hard outage thresholds (advisory flag vs. forced clear)
//! - In-order replay on reconnect with per-subscription failure isolation
//! - Lifecycle notifications and point-in-time stats for monitoring
//!
//! # Example
//!
//! ```ignore
//! let manager = BufferManager::new();
//!
//! // Transport dropped: start buffering for the live subscriptions.
//! manager.start_buffering(vec!["orders".to_string(), "trades".to_string()]);
//!
//! // Producers keep feeding updates while the transport is down.
//! manager.ingest("orders", payload);
//!
//! // Transport recovered: replay everything in capture order.
//! manager.stop_and_replay(|subscription_id, updates| {
//!     transport.push(subscription_id, updates)
//! });
//! ```

mod manager;
mod types;

pub use manager::BufferManager;
pub use types::{
    BufferConfig, BufferEvent, BufferStats, ClearReason, EventListenerHandle, ListenerId,
    ReplaySummary,
};

//! Core types for the outage buffer.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Position of an update within one buffering session.
///
/// Assigned at capture time from a counter shared across all subscriptions,
/// so sorting by sequence restores true arrival order even after eviction
/// leaves gaps. Never reused across sessions.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Sequence(pub u64);

impl fmt::Debug for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Seq({})", self.0)
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Sequence {
    pub fn next(self) -> Self {
        Sequence(self.0 + 1)
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("Time went backwards");
        Timestamp(duration.as_micros() as i64)
    }

    /// Whole milliseconds between `earlier` and this timestamp.
    ///
    /// Saturates to zero if the clock stepped backwards in between.
    pub fn millis_since(self, earlier: Timestamp) -> u64 {
        (self.0.saturating_sub(earlier.0).max(0) as u64) / 1000
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// One captured update, held until it is evicted or replayed.
///
/// The payload is opaque application data; the engine never inspects it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BufferedUpdate {
    /// The logical stream this update belongs to.
    pub subscription_id: String,

    /// Application-defined payload.
    pub payload: Vec<u8>,

    /// Capture wall-clock time, used for age-based eviction.
    pub timestamp: Timestamp,

    /// Session-scoped capture order.
    pub sequence: Sequence,
}

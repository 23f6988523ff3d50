//! Version sequencer
//!
//! Issues process-wide unique, monotonically increasing identifiers. Every
//! versioned structure takes one at construction, so two generations of the
//! same logical index never share an id.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Identity of a transactional producer instance
///
/// Ids compare by allocation order. Clones of a producer share its id,
/// which is how a transaction finds the layer belonging to a producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProducerId(u64);

impl ProducerId {
    /// Allocate the next id from the global sequence
    pub fn next() -> Self {
        ProducerId(next_id())
    }

    /// Raw numeric value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ProducerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Allocate the next id from the global sequence
pub fn next_id() -> u64 {
    SEQUENCE.fetch_add(1, Ordering::Relaxed)
}

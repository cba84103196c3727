//! Identity handles for creatures
//!
//! Neural specs, connections and population members are compared by handle,
//! never by structure. Handles are process-unique and allocated from atomic
//! counters so that independently evolving lineages never collide.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident, $counter:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(from = "u64", into = "u64")]
        pub struct $name(u64);

        static $counter: AtomicU64 = AtomicU64::new(1);

        impl $name {
            /// Allocate a fresh handle
            pub fn new() -> Self {
                $name($counter.fetch_add(1, Ordering::Relaxed))
            }

            /// Get the raw u64 value (useful for debugging/serialization)
            pub fn raw(&self) -> u64 {
                self.0
            }

            /// Create a handle from a raw u64 (for deserialization)
            pub fn from_raw(id: u64) -> Self {
                // Keep the counter ahead of every handle seen so far
                $counter.fetch_max(id.saturating_add(1), Ordering::Relaxed);
                $name(id)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self::from_raw(id)
            }
        }

        impl From<$name> for u64 {
            fn from(id: $name) -> u64 {
                id.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($label, "({})"), self.0)
            }
        }
    };
}

handle!(
    /// Identity of a sensor, neuron or actor
    NeuralId,
    NEXT_NEURAL_ID,
    "Neural"
);

handle!(
    /// Identity of a weighted connection, kept across endpoint re-homing
    ConnectionId,
    NEXT_CONNECTION_ID,
    "Connection"
);

handle!(
    /// Identity of a population member, assigned monotonically
    MemberId,
    NEXT_MEMBER_ID,
    "Member"
);

/// Arena index of a body segment inside one morphology
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub usize);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Node({})", self.0)
    }
}

/// Addresses one network inside a morphology: the shared brain or the
/// network local to an edge (by position in the edge list)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NetworkRef {
    Brain,
    Edge(usize),
}

impl std::fmt::Display for NetworkRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkRef::Brain => write!(f, "brain"),
            NetworkRef::Edge(index) => write!(f, "edge{}", index),
        }
    }
}

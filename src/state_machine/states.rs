use serde::{Deserialize, Serialize};
use std::fmt;

/// Aggregation group lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupState {
    /// Accepting records
    Open,
    /// Emitted as a batch (by count, timeout or shutdown)
    Released,
    /// Timed out with nothing to emit, or discarded because partial releases are disabled
    Expired,
}

impl GroupState {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Released | Self::Expired)
    }

    /// Check if records may still be added
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// A group leaves `Open` exactly once and never comes back
    pub fn can_transition_to(&self, next: GroupState) -> bool {
        matches!(
            (self, next),
            (Self::Open, Self::Released) | (Self::Open, Self::Expired)
        )
    }
}

impl fmt::Display for GroupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Released => write!(f, "released"),
            Self::Expired => write!(f, "expired"),
        }
    }
}

/// Default state for new groups
impl Default for GroupState {
    fn default() -> Self {
        Self::Open
    }
}

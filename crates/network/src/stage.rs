//! Connection stages

use std::fmt;

/// Where a peer is in the session lifecycle
///
/// # Lifecycle
///
/// ```text
/// Authentication --handshake--> Loading --initial scope + commit--> Active
/// ```
///
/// Stages only move forward. Disconnection is handled by the session, not by
/// a stage value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConnectionStage {
    /// Connected, handshake not yet accepted
    Authentication,

    /// Handshake accepted, receiving the initial world state
    Loading,

    /// Fully in the session
    Active,
}

impl ConnectionStage {
    pub const ALL: [ConnectionStage; 3] = [
        ConnectionStage::Authentication,
        ConnectionStage::Loading,
        ConnectionStage::Active,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Authentication => "authentication",
            Self::Loading => "loading",
            Self::Active => "active",
        }
    }

    /// Whether moving to `next` is allowed
    pub fn can_advance_to(self, next: ConnectionStage) -> bool {
        next > self
    }
}

impl Default for ConnectionStage {
    fn default() -> Self {
        Self::Authentication
    }
}

impl fmt::Display for ConnectionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

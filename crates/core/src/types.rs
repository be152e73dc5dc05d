//! Core type definitions

use std::fmt;

/// Transport-level peer handle (32-bit unsigned)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u32);

impl PeerId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

impl From<u32> for PeerId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Network ID of a replicated entity (32-bit unsigned)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NetId(pub u32);

impl NetId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

impl From<u32> for NetId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Engine version exchanged during the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineVersion {
    pub major: u8,
    pub minor: u8,
    pub revision: u8,
    pub build: u32,
}

impl EngineVersion {
    /// Version of this build of the engine
    pub const CURRENT: EngineVersion = EngineVersion::new(0, 1, 0, 0);

    pub const fn new(major: u8, minor: u8, revision: u8, build: u32) -> Self {
        Self { major, minor, revision, build }
    }
}

impl Default for EngineVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

impl fmt::Display for EngineVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}.{}", self.major, self.minor, self.revision, self.build)
    }
}

/// Network protocol revision. Bumped whenever the wire format changes.
pub const PROTOCOL_VERSION: u32 = 1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_display() {
        assert_eq!(EngineVersion::new(1, 2, 3, 4).to_string(), "1.2.3.4");
    }

    #[test]
    fn test_id_conversions() {
        assert_eq!(PeerId::from(7).get(), 7);
        assert_eq!(NetId::from(9), NetId::new(9));
        assert_eq!(PeerId::new(3).to_string(), "#3");
    }
}

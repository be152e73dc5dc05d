//! Core error types for the replication protocol
//!
//! Every failure raised while packing or unpacking network data lands in
//! [`NetError`]. Anything that came off the wire is untrusted, so the session
//! layer checks [`NetError::is_protocol_violation`] and drops the peer instead
//! of trying to recover.

#[derive(thiserror::Error, Debug)]
pub enum NetError {
    #[error("Buffer overflow: {requested} bytes requested, {available} available")]
    BufferOverflow { requested: usize, available: usize },

    #[error("Buffer underflow: {requested} bytes requested, {available} available")]
    BufferUnderflow { requested: usize, available: usize },

    #[error("Position {position} out of range (limit {limit})")]
    OutOfRange { position: usize, limit: usize },

    #[error("Stream does not own its memory and cannot be resized")]
    NotResizable,

    #[error("Type mismatch on property '{property}': registered as {expected}, accessed as {found}")]
    TypeMismatch {
        property: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Invalid property type tag: {0}")]
    InvalidTypeTag(u8),

    #[error("Invalid boolean byte: {0}")]
    InvalidBool(u8),

    #[error("Invalid string data: {0}")]
    InvalidString(String),

    #[error("Property already registered: {0}")]
    DuplicateProperty(String),

    #[error("Unknown property: {0}")]
    UnknownProperty(String),

    #[error("Unknown entity: net id {0}")]
    UnknownEntity(u32),

    #[error("Unknown entity type: {0}")]
    UnknownEntityType(u32),

    #[error("Unknown message type: {0}")]
    UnknownMessageType(u32),

    #[error("Unexpected message type: expected {expected}, found {found}")]
    UnexpectedMessageType { expected: u32, found: u32 },

    #[error("Message type {message_type} is not accepted in stage {stage}")]
    OutOfStageMessage { message_type: u32, stage: &'static str },

    #[error("Payload too short for {message}: {required} bytes required, {available} available")]
    PayloadTooShort {
        message: &'static str,
        required: usize,
        available: usize,
    },

    #[error("Version mismatch: local {local}, remote {remote}")]
    VersionMismatch { local: String, remote: String },

    #[error("Unknown peer: {0}")]
    UnknownPeer(u32),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl NetError {
    /// Whether this error means the remote peer sent data that cannot be trusted.
    ///
    /// Local failures (configuration, I/O, bookkeeping) return `false`.
    pub fn is_protocol_violation(&self) -> bool {
        !matches!(
            self,
            Self::NotResizable
                | Self::DuplicateProperty(_)
                | Self::UnknownPeer(_)
                | Self::Config(_)
                | Self::Network(_)
                | Self::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, NetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_violation_classification() {
        assert!(NetError::UnknownMessageType(99).is_protocol_violation());
        assert!(NetError::BufferUnderflow { requested: 4, available: 0 }.is_protocol_violation());
        assert!(NetError::OutOfStageMessage { message_type: 3, stage: "authentication" }
            .is_protocol_violation());
        assert!(!NetError::Config("bad port".into()).is_protocol_violation());
        assert!(!NetError::DuplicateProperty("health".into()).is_protocol_violation());
    }

    #[test]
    fn test_error_display() {
        let err = NetError::PayloadTooShort { message: "handshake", required: 11, available: 3 };
        assert_eq!(
            err.to_string(),
            "Payload too short for handshake: 11 bytes required, 3 available"
        );
    }
}

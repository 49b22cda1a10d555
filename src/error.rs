//! Error types for the support hub

use thiserror::Error;

/// Result type alias for support hub operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the support hub
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A chat message did not carry a well-formed protocol envelope
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Room transport failure (unknown room, unreachable room, non-participant sender)
    #[error("Room error: {room}: {message}")]
    Room {
        /// Room the operation targeted
        room: String,
        /// What went wrong
        message: String,
    },

    /// A role name that is not one of the fixed specialist roles
    #[error("Unknown role: {0}")]
    UnknownRole(String),

    /// A specialist could not be set up (its backing data failed to load)
    #[error("Specialist error: {role}: {message}")]
    Specialist {
        /// Role of the failing specialist
        role: String,
        /// What went wrong
        message: String,
    },

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// IO error (reading a configuration file)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a room transport error
    pub fn room(room: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Room {
            room: room.into(),
            message: message.into(),
        }
    }

    /// Create a specialist error
    pub fn specialist(role: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Specialist {
            role: role.into(),
            message: message.into(),
        }
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create an other error
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_error_display() {
        let err = Error::room("room-excel", "room is unreachable");
        assert_eq!(err.to_string(), "Room error: room-excel: room is unreachable");
    }

    #[test]
    fn test_json_error_converts() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{not json");
        let err: Error = parse.unwrap_err().into();
        assert!(matches!(err, Error::Serialization(_)));
    }
}

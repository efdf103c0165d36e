//! Protocol message types.
//!
//! Messages travel over the single bidirectional QUIC stream a controller
//! opens to the host.

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// Current protocol version.
pub const PROTOCOL_VERSION: ProtocolVersion = ProtocolVersion { major: 0, minor: 1 };

/// Greeting sent to a newly installed controller.
pub const WELCOME_MESSAGE: &str = "Welcome to the server!";

/// Notification sent to the controller when the host stops.
pub const SHUTDOWN_MESSAGE: &str = "Server is shutting down";

/// Protocol version for compatibility negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct ProtocolVersion {
    pub major: u16,
    pub minor: u16,
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// A loosely typed event payload.
///
/// Controllers are often thin web or mobile clients, so a command payload is
/// not guaranteed to be a string. The server validates the shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub enum Payload {
    Text(String),
    Number(f64),
    Flag(bool),
    Empty,
}

impl Payload {
    /// Convenience constructor for text payloads.
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    /// Name of the payload's type, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Number(_) => "number",
            Self::Flag(_) => "flag",
            Self::Empty => "empty",
        }
    }
}

/// Messages from the controller to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub enum ClientMessage {
    /// First frame on a new stream.
    Hello {
        version: ProtocolVersion,
        /// Free-form controller name, for logs only.
        name: String,
    },

    /// A presentation command token such as `NEXT_SLIDE`.
    Command(Payload),

    /// Pointer position, each axis normalised to [0, 1].
    PointerMove { x: f64, y: f64 },

    /// Graceful disconnect.
    Bye,
}

/// Messages from the host to the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub enum ServerMessage {
    /// Sent once to a controller when it becomes the active session.
    Welcome { message: String },

    /// A command was rejected.
    Error { message: String },

    /// The host is stopping; the connection closes after a grace period.
    Shutdown { message: String },
}

impl ServerMessage {
    pub fn welcome() -> Self {
        Self::Welcome {
            message: WELCOME_MESSAGE.to_string(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn shutdown() -> Self {
        Self::Shutdown {
            message: SHUTDOWN_MESSAGE.to_string(),
        }
    }

    /// Event name as seen by controllers.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Welcome { .. } => "message",
            Self::Error { .. } => "error",
            Self::Shutdown { .. } => "server_shutdown",
        }
    }

    /// The human-readable text carried by every server message.
    pub fn message(&self) -> &str {
        match self {
            Self::Welcome { message } | Self::Error { message } | Self::Shutdown { message } => {
                message
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bincode_roundtrip<T: Encode + Decode<()> + std::fmt::Debug>(value: &T) -> T {
        let config = bincode::config::standard();
        let bytes = bincode::encode_to_vec(value, config).unwrap();
        let (decoded, _): (T, _) = bincode::decode_from_slice(&bytes, config).unwrap();
        decoded
    }

    #[test]
    fn hello_roundtrip() {
        let msg = ClientMessage::Hello {
            version: PROTOCOL_VERSION,
            name: "phone".to_string(),
        };
        assert_eq!(bincode_roundtrip(&msg), msg);
    }

    #[test]
    fn non_text_command_payload_survives_the_wire() {
        let msg = ClientMessage::Command(Payload::Number(42.0));
        assert_eq!(bincode_roundtrip(&msg), msg);
    }

    #[test]
    fn server_message_texts() {
        assert_eq!(ServerMessage::welcome().message(), "Welcome to the server!");
        assert_eq!(ServerMessage::shutdown().message(), "Server is shutting down");
        assert_eq!(ServerMessage::error("nope").event_name(), "error");
        assert_eq!(ServerMessage::shutdown().event_name(), "server_shutdown");
    }

    #[test]
    fn payload_kind() {
        assert_eq!(Payload::text("HOME").kind(), "text");
        assert_eq!(Payload::Flag(true).kind(), "flag");
        assert_eq!(Payload::Empty.kind(), "empty");
    }

    #[test]
    fn protocol_version_display() {
        assert_eq!(PROTOCOL_VERSION.to_string(), "0.1");
    }
}

//! Shared types for podium.
//!
//! This crate contains the types shared across the podium workspace:
//! connection identities, presentation actions, pointer positions, and the
//! messages exchanged between the controller and the host.

pub mod action;
pub mod identity;
pub mod message;
pub mod pointer;

pub use action::Action;
pub use identity::ConnectionId;
pub use message::{
    ClientMessage, Payload, ProtocolVersion, ServerMessage, PROTOCOL_VERSION, SHUTDOWN_MESSAGE,
    WELCOME_MESSAGE,
};
pub use pointer::{PointerError, PointerPosition};

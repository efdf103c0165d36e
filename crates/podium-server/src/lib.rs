//! Control server for podium.
//!
//! Accepts controller connections through a [`podium_protocol::ControlTransport`],
//! keeps exactly one controller session, authorizes its commands against a
//! fixed table, and forwards the resulting actions to a
//! [`podium_input::ActionExecutor`].

pub mod authorizer;
pub mod config;
pub mod error;
pub mod net;
pub mod server;
pub mod session;
pub mod setup;
pub mod state;

pub use authorizer::{Authorizer, PayloadError, Rejection};
pub use config::Config;
pub use error::ServerError;
pub use server::{ControlServer, ServerHandle, ServerOptions, StatusSnapshot, DEFAULT_GRACE_PERIOD};
pub use session::{Session, SessionRegistry};
pub use state::ServerState;

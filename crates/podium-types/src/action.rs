//! Presentation actions.
//!
//! An [`Action`] is the host-independent effect a controller asks for. The
//! server decides which action a command maps to; an executor backend
//! decides how the action reaches the presentation software.

use serde::{Deserialize, Serialize};

/// A presentation-control effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    /// Move to the next slide.
    Advance,
    /// Move to the previous slide.
    Retreat,
    /// Start the slideshow.
    Begin,
    /// End the slideshow.
    Terminate,
    /// Jump to the first slide.
    JumpFirst,
    /// Jump to the last slide.
    JumpLast,
}

impl Action {
    /// Every action, in table order.
    pub const ALL: [Action; 6] = [
        Action::Advance,
        Action::Retreat,
        Action::Begin,
        Action::Terminate,
        Action::JumpFirst,
        Action::JumpLast,
    ];

    /// Short lowercase name, used in logs.
    pub fn name(self) -> &'static str {
        match self {
            Self::Advance => "advance",
            Self::Retreat => "retreat",
            Self::Begin => "begin",
            Self::Terminate => "terminate",
            Self::JumpFirst => "jump-first",
            Self::JumpLast => "jump-last",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

//! Which key each action presses.
//!
//! Presentation software (PowerPoint, Keynote, LibreOffice Impress, browser
//! decks) shares these bindings, so the mapping is fixed.

use podium_types::Action;

/// A key the executor may press on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostKey {
    ArrowRight,
    ArrowLeft,
    F5,
    Escape,
    Home,
    End,
}

/// The key that performs `action`.
pub fn key_for(action: Action) -> HostKey {
    match action {
        Action::Advance => HostKey::ArrowRight,
        Action::Retreat => HostKey::ArrowLeft,
        Action::Begin => HostKey::F5,
        Action::Terminate => HostKey::Escape,
        Action::JumpFirst => HostKey::Home,
        Action::JumpLast => HostKey::End,
    }
}

//! Mapping from host keys to evdev key codes.

use evdev::KeyCode as EvdevKey;

use crate::keys::HostKey;

/// Every key the virtual keyboard must advertise.
pub const KEYS: [HostKey; 6] = [
    HostKey::ArrowRight,
    HostKey::ArrowLeft,
    HostKey::F5,
    HostKey::Escape,
    HostKey::Home,
    HostKey::End,
];

pub fn host_key_to_evdev(key: HostKey) -> EvdevKey {
    match key {
        HostKey::ArrowRight => EvdevKey::KEY_RIGHT,
        HostKey::ArrowLeft => EvdevKey::KEY_LEFT,
        HostKey::F5 => EvdevKey::KEY_F5,
        HostKey::Escape => EvdevKey::KEY_ESC,
        HostKey::Home => EvdevKey::KEY_HOME,
        HostKey::End => EvdevKey::KEY_END,
    }
}

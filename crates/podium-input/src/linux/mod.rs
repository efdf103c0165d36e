//! Linux backend: uinput virtual keyboard and absolute pointer.

mod executor;
mod keymap;

pub use executor::UinputExecutor;

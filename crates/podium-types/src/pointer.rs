//! Normalised pointer positions.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a pointer coordinate pair was refused.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum PointerError {
    #[error("pointer coordinate is not a finite number")]
    NotFinite,

    #[error("pointer coordinate ({x}, {y}) is outside [0, 1]")]
    OutOfRange { x: f64, y: f64 },
}

/// A pointer position normalised to the host screen.
///
/// `(0.0, 0.0)` is the top-left corner and `(1.0, 1.0)` the bottom-right.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointerPosition {
    x: f64,
    y: f64,
}

impl PointerPosition {
    /// Validate a coordinate pair.
    pub fn new(x: f64, y: f64) -> Result<Self, PointerError> {
        if !x.is_finite() || !y.is_finite() {
            return Err(PointerError::NotFinite);
        }
        if !(0.0..=1.0).contains(&x) || !(0.0..=1.0).contains(&y) {
            return Err(PointerError::OutOfRange { x, y });
        }
        Ok(Self { x, y })
    }

    pub fn x(self) -> f64 {
        self.x
    }

    pub fn y(self) -> f64 {
        self.y
    }

    /// Scale onto an integer axis range `0..=max`.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn scaled(self, max: u32) -> (u32, u32) {
        let max_f = f64::from(max);
        ((self.x * max_f).round() as u32, (self.y * max_f).round() as u32)
    }
}

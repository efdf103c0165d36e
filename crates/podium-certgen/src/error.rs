//! Certificate generation errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CertgenError {
    #[error("certificate generation failed: {0}")]
    Generation(String),

    #[error("invalid subject name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },
}

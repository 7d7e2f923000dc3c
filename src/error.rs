use thiserror::Error;

use crate::types::{SettingsError, ValidationError};

/// Unified error type covering settings loading, argument validation, and I/O.
///
/// Returned by convenience methods like
/// [`Settings::from_file()`](crate::Settings::from_file).
#[derive(Debug, Error)]
pub enum FmeError {
    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

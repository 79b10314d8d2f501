//! Error types for the `hunter` command line tool.

use thiserror::Error;

use super::*;

/// Result alias used throughout the binary.
pub type Result<T> = core::result::Result<T, HunterdError>;

/// Errors surfaced by the command line tool.
#[derive(Error, Debug)]
pub enum HunterdError {
  /// The pipeline or its configuration failed.
  #[error(transparent)]
  Hunter(#[from] HunterError),

  /// An interactive prompt could not be shown.
  #[error(transparent)]
  Dialoguer(#[from] dialoguer::Error),

  /// Reading or writing a local file failed.
  #[error(transparent)]
  Io(#[from] std::io::Error),
}

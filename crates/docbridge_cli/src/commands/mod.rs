//! CLI command implementations.

pub mod config;
pub mod demo;

use thiserror::Error;

/// Errors raised by CLI commands.
#[derive(Error, Debug)]
pub enum CommandError {
    /// Client failure.
    #[error(transparent)]
    Client(#[from] docbridge_client::ClientError),

    /// Emulator failure.
    #[error(transparent)]
    Emulator(#[from] docbridge_emulator::EmulatorError),

    /// Output could not be rendered.
    #[error("failed to render output: {0}")]
    Render(#[from] serde_json::Error),

    /// The query did not return what was saved.
    #[error("expected {expected} matching assets, found {actual}")]
    Mismatch {
        /// Matches implied by the saved assets.
        expected: usize,
        /// Matches returned by the store.
        actual: usize,
    },
}

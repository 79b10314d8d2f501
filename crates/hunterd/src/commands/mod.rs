//! Subcommands of the `hunter` CLI.

use super::*;

pub mod init;
pub mod run;

pub use init::{init, InitOptions};
pub use run::{run, RunOptions};

/// Available commands for the CLI
#[derive(Subcommand, Clone)]
pub enum Commands {
  /// Write a configuration file holding every default
  Init(InitOptions),

  /// Harvest, filter and archive papers, then summarize and translate them
  Run(RunOptions),
}

//! Command line runner for the `hunter` paper pipeline.
//!
//! The binary wires a [`Config`] from a TOML file, command line overrides and the environment,
//! then runs the harvest, admission, archive and summary phases once.
//!
//! # Usage
//!
//! ```bash
//! # Write the default configuration to the platform config directory
//! hunter init
//!
//! # Archive yesterday's and today's industry papers without summaries
//! hunter run --no-summary
//!
//! # Look back three days, admit through the LLM vote as well, push translations to Telegram
//! hunter -v run --last-n-days 3 --use-llm-filter --telegram
//! ```
//!
//! Secrets never live in the configuration file: the LLM key is read from `DEEPSEEK_API_KEY`
//! and the Telegram credentials from `TELEGRAM_BOT_TOKEN` and `TELEGRAM_CHAT_ID`.

#![warn(missing_docs, clippy::missing_docs_in_private_items)]

use std::path::PathBuf;

use clap::{builder::ArgAction, Args, Parser, Subcommand};
use console::style;
use hunter::{config::Config, error::HunterError};
use tracing::debug;
use tracing_subscriber::EnvFilter;

pub mod commands;
pub mod error;

use crate::{commands::*, error::*};

/// Marks neutral status lines
static INFO_PREFIX: &str = "ℹ ";
/// Marks completed steps
static SUCCESS_PREFIX: &str = "✓ ";
/// Marks skipped records
static WARNING_PREFIX: &str = "! ";
/// Marks the fatal error printed before exit
static ERROR_PREFIX: &str = "✗ ";
/// Glyph before every archived file except the last
static TREE_BRANCH: &str = "├─";
/// Glyph before the last archived file
static TREE_LEAF: &str = "└─";

/// Arguments shared by every subcommand
#[derive(Parser)]
#[command(author, version, about = "Harvest, filter and archive fresh industry papers from arXiv")]
pub struct Cli {
  /// Logging detail, repeated for more (-v, -vv, -vvv)
  #[arg(short, long, action = ArgAction::Count, global = true)]
  verbose: u8,

  /// Configuration file, defaults to `hunter/config.toml` in the platform config directory
  #[arg(long, short, global = true)]
  config: Option<PathBuf>,

  /// What to do
  #[command(subcommand)]
  command: Commands,

  /// Answer yes to every prompt
  #[arg(long, hide = true, global = true)]
  accept_defaults: bool,
}

impl Cli {
  /// Configuration file this invocation reads or writes.
  fn config_path(&self) -> PathBuf { self.config.clone().unwrap_or_else(Config::default_path) }
}

/// Installs the stderr subscriber for a `-v` count:
/// - 0: warn (default)
/// - 1: info
/// - 2: debug
/// - 3+: trace
///
/// `RUST_LOG` takes precedence when set. Logs go to stderr so stdout only carries results.
fn setup_logging(verbosity: u8) {
  let filter = match verbosity {
    0 => "warn",
    1 => "info",
    2 => "debug",
    _ => "trace",
  };

  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .with_file(true)
    .with_line_number(true)
    .with_target(true)
    .init();
}

/// Entry point for the `hunter` CLI application
///
/// # Errors
///
/// Returns a [`HunterdError`] when the configuration is invalid, when harvesting fails, or when
/// the configuration file cannot be written.
#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();
  setup_logging(cli.verbose);
  debug!("Using configuration path {}", cli.config_path().display());

  let result = match &cli.command {
    Commands::Run(options) => run(&cli, options).await,
    Commands::Init(options) => init(&cli, options),
  };

  if let Err(e) = &result {
    eprintln!("{} {e}", style(ERROR_PREFIX).red());
  }
  result
}

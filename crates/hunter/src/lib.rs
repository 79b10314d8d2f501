//! Harvest, filter, archive and summarize freshly published arXiv papers.
//!
//! `hunter` watches a slice of arXiv for recent papers on a topic and keeps only those written
//! by a target set of organizations. It provides:
//!
//! - Paginated, deduplicated, time-windowed harvesting from the arXiv Atom API
//! - A layered admission filter (the "gatekeeper") over author affiliations, e-mail domains and
//!   an optional LLM vote
//! - Day-keyed archiving of admitted PDFs under canonical, collision-free filenames
//! - LLM-generated structured summaries and abstract translations
//! - Optional Telegram push of the translated abstracts
//!
//! # Getting Started
//!
//! ```no_run
//! use hunter::{config::Config, pipeline::Pipeline};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!   let config = Config::default().with_environment();
//!   config.validate()?;
//!
//!   let today = chrono::Utc::now().date_naive();
//!   let mut pipeline = Pipeline::from_config(&config, today)?;
//!   let report = pipeline.run().await?;
//!   println!("Archived {} papers", report.archived.len());
//!   Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`paper`]: Paper and author metadata
//! - [`harvester`]: Search API client and the lazy candidate stream
//! - [`gatekeeper`]: Ordered admission checks
//! - [`archivist`]: PDF download and on-disk layout
//! - [`analyst`]: Summaries, translations and admission votes
//! - [`llm`]: OpenAI-compatible chat-completion client and reply parsing
//! - [`pdf`]: Text and cover-image extraction from downloaded PDFs
//! - [`notifier`]: Telegram delivery of translated abstracts and cover pictures
//! - [`pipeline`]: The two-phase run orchestration
//! - [`config`]: The immutable configuration threaded into every component
//! - [`format`]: Filename slugs and date helpers
//! - [`retry`]: Bounded retries with backoff for network calls

#![warn(missing_docs)]

use std::{
  collections::{BTreeMap, HashSet, VecDeque},
  fmt::Display,
  path::{Path, PathBuf},
  sync::Arc,
  time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, info, trace, warn};
#[cfg(test)]
use {tempfile::tempdir, tracing_test::traced_test};

pub mod analyst;
pub mod archivist;
pub mod config;
pub mod error;
pub mod format;
pub mod gatekeeper;
pub mod harvester;
pub mod llm;
pub mod notifier;
pub mod paper;
pub mod pdf;
pub mod pipeline;
pub mod retry;

use crate::{error::*, paper::*};

/// Common traits and types for ergonomic imports.
///
/// ```no_run
/// use hunter::prelude::*;
/// ```
pub mod prelude {
  pub use crate::{
    archivist::PdfFetcher,
    error::{HunterError, Result},
    gatekeeper::{AdmissionCheck, Voter},
    harvester::PageSource,
    llm::ChatBackend,
    notifier::Notifier,
  };
}

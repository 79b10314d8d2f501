//! Error types for the hunter library.
//!
//! A single [`HunterError`] covers every failure mode of a run. Callers mostly care about one
//! distinction, exposed by [`HunterError::is_transient`]: transient failures are worth retrying,
//! everything else is not.
//!
//! # Examples
//!
//! ```
//! use hunter::error::HunterError;
//!
//! let err = HunterError::HttpStatus(503, "upstream busy".into());
//! assert!(err.is_transient());
//!
//! let err = HunterError::Integrity("missing %PDF- header".into());
//! assert!(!err.is_transient());
//! ```

use thiserror::Error;

/// Error type alias used for the [`hunter`](crate) crate.
pub type Result<T> = core::result::Result<T, HunterError>;

/// Errors that can occur while harvesting, filtering, archiving or summarizing papers.
#[derive(Error, Debug)]
pub enum HunterError {
  /// A network request failed before a response was received.
  ///
  /// This can occur when:
  /// - The network is unavailable
  /// - The server is unreachable
  /// - The request times out
  /// - TLS/SSL errors occur
  #[error(transparent)]
  Network(#[from] reqwest::Error),

  /// A remote service answered with a non-success status code.
  ///
  /// Carries the status code and whatever body the server returned, which is usually the only
  /// useful hint when credentials or payloads are wrong.
  #[error("HTTP {0}: {1}")]
  HttpStatus(u16, String),

  /// An API returned data we could not make sense of.
  #[error("API error: {0}")]
  ApiError(String),

  /// A file system operation failed.
  #[error(transparent)]
  Path(#[from] std::io::Error),

  /// A downloaded file could not be moved into its final location.
  #[error(transparent)]
  Persist(#[from] tempfile::PersistError),

  /// PDF parsing errors from the lopdf library.
  ///
  /// Common error cases include malformed or encrypted PDF files and invalid stream encodings.
  #[error(transparent)]
  Lopdf(#[from] lopdf::Error),

  /// The search API returned a feed that is not well-formed XML.
  #[error(transparent)]
  Xml(#[from] quick_xml::Error),

  /// A JSON document failed to (de)serialize.
  #[error(transparent)]
  Json(#[from] serde_json::Error),

  /// The configuration file could not be parsed.
  #[error(transparent)]
  TomlDe(#[from] toml::de::Error),

  /// The configuration could not be rendered as TOML.
  #[error(transparent)]
  TomlSer(#[from] toml::ser::Error),

  /// A configured regular expression is invalid.
  #[error(transparent)]
  Regex(#[from] regex::Error),

  /// A configured URL is invalid.
  #[error(transparent)]
  Url(#[from] url::ParseError),

  /// A paper has no PDF link to download.
  #[error("No PDF URL available for paper {0}")]
  MissingPdfUrl(String),

  /// A downloaded document failed the minimal integrity checks.
  #[error("Integrity check failed: {0}")]
  Integrity(String),

  /// A model was not specified for the LLM request.
  #[error("No model was chosen for the LLM.")]
  LLMMissingModel,

  /// No messages were provided in the LLM request.
  #[error("No messages were supplied to send to the LLM.")]
  LLMMissingMessage,

  /// The configuration can never lead to a successful run.
  #[error("{0}")]
  Config(String),
}

impl HunterError {
  /// Whether retrying the failed operation could plausibly succeed.
  ///
  /// Timeouts, connection failures, 5xx responses and rate limiting (429) are transient.
  pub fn is_transient(&self) -> bool {
    match self {
      Self::Network(e) => e.is_timeout() || e.is_connect() || e.is_request(),
      Self::HttpStatus(status, _) => *status >= 500 || *status == 429,
      _ => false,
    }
  }
}

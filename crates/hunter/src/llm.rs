//! Client for OpenAI-compatible chat-completion endpoints.
//!
//! Requests are assembled with the [`ChatRequest`] builder and sent through a [`ChatBackend`].
//! [`OpenAiClient`] is the HTTP implementation; tests substitute canned backends.
//!
//! Replies are free text that is supposed to contain JSON. [`parse_json_reply`] is the only place
//! that interprets them: it returns either a validated value or an explicit
//! [`ParsedReply::Invalid`], and never panics on malformed data, so every caller chooses its own
//! fallback.
//!
//! # Examples
//!
//! ```no_run
//! use hunter::{
//!   llm::{ChatBackend, ChatRequest, OpenAiClient},
//!   retry::RetryPolicy,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = OpenAiClient::new("https://api.deepseek.com", Some("sk-...".into()), 120)?
//!   .with_retry(RetryPolicy::default());
//! let request = ChatRequest::new()
//!   .with_model("deepseek-chat")
//!   .with_system("You are a concise assistant.")
//!   .with_message("What is a recommender system?");
//!
//! let reply = client.complete(&request).await?;
//! println!("{reply}");
//! # Ok(())
//! # }
//! ```

use reqwest::{header::AUTHORIZATION, Url};

use super::*;
use crate::retry::RetryPolicy;

/// Path every chat-completion endpoint ends with.
pub const CHAT_COMPLETIONS_PATH: &str = "/chat/completions";

/// Normalizes a configured base URL to a full chat-completions endpoint.
///
/// A bare host gets `/v1/chat/completions`, a URL ending in a version segment such as `/v1` gets
/// `/chat/completions`, and a URL that already ends in `/chat/completions` is kept. Applying the
/// normalization twice gives the same result as applying it once.
///
/// ```
/// use hunter::llm::normalize_endpoint;
///
/// let once = normalize_endpoint("https://api.example.com");
/// assert_eq!(once, "https://api.example.com/v1/chat/completions");
/// assert_eq!(normalize_endpoint(&once), once);
/// assert_eq!(normalize_endpoint("https://host/v1/"), "https://host/v1/chat/completions");
/// ```
pub fn normalize_endpoint(base: &str) -> String {
  lazy_static! {
    static ref VERSION_SEGMENT: Regex = Regex::new(r"/v\d+$").unwrap();
  }

  let base = base.trim().trim_end_matches('/');
  if base.ends_with(CHAT_COMPLETIONS_PATH) {
    base.to_string()
  } else if VERSION_SEGMENT.is_match(base) {
    format!("{base}{CHAT_COMPLETIONS_PATH}")
  } else {
    format!("{base}/v1{CHAT_COMPLETIONS_PATH}")
  }
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
  /// `system`, `user` or `assistant`
  pub role:    String,
  /// Message text
  pub content: String,
}

/// Request builder for chat completions.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
  /// Model name; sending without one is an error
  pub model:       Option<String>,
  /// Conversation so far; sending without any is an error
  pub messages:    Vec<Message>,
  /// Upper bound on generated tokens
  pub max_tokens:  u32,
  /// Sampling temperature
  pub temperature: f64,
}

impl Default for ChatRequest {
  fn default() -> Self {
    Self { model: None, messages: Vec::new(), max_tokens: 2048, temperature: 0.2 }
  }
}

impl ChatRequest {
  /// Creates an empty request with default sampling settings.
  pub fn new() -> Self { Self::default() }

  /// Sets the model.
  pub fn with_model(mut self, model: &str) -> Self {
    self.model.replace(model.to_string());
    self
  }

  /// Adds a system message.
  pub fn with_system(mut self, content: &str) -> Self {
    self.messages.push(Message { role: "system".to_string(), content: content.to_string() });
    self
  }

  /// Adds a user message.
  pub fn with_message(mut self, content: &str) -> Self {
    self.messages.push(Message { role: "user".to_string(), content: content.to_string() });
    self
  }

  /// Caps generated tokens; endpoints commonly refuse more than 8192.
  pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
    self.max_tokens = max_tokens.min(8192);
    self
  }

  /// Sets the sampling temperature.
  pub fn with_temperature(mut self, temperature: f64) -> Self {
    self.temperature = temperature;
    self
  }

  /// Checks the request can be sent.
  pub fn validate(&self) -> Result<()> {
    if self.model.is_none() {
      return Err(HunterError::LLMMissingModel);
    }
    if self.messages.is_empty() {
      return Err(HunterError::LLMMissingMessage);
    }
    Ok(())
  }
}

/// Response envelope of a chat completion.
#[derive(Debug, Deserialize)]
pub struct ChatResponse {
  /// Candidate completions
  #[serde(default)]
  pub choices: Vec<Choice>,
}

/// One candidate completion.
#[derive(Debug, Deserialize)]
pub struct Choice {
  /// Generated message
  pub message: Message,
}

impl ChatResponse {
  /// Trimmed text of the first choice.
  pub fn content(&self) -> Option<&str> {
    self.choices.first().map(|c| c.message.content.trim())
  }
}

/// Something that answers chat requests with reply text.
#[async_trait]
pub trait ChatBackend: Send + Sync {
  /// Sends a request and returns the text of the first choice.
  async fn complete(&self, request: &ChatRequest) -> Result<String>;
}

/// HTTP client for an OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
  /// HTTP client carrying the request timeout
  client:   reqwest::Client,
  /// Normalized chat-completions URL
  endpoint: Url,
  /// Bearer token
  api_key:  Option<String>,
  /// Retry policy for transient failures
  retry:    RetryPolicy,
}

impl OpenAiClient {
  /// Creates a client for `base_url`, normalized with [`normalize_endpoint`].
  pub fn new(base_url: &str, api_key: Option<String>, timeout_secs: u64) -> Result<Self> {
    let endpoint = Url::parse(&normalize_endpoint(base_url))?;
    let client = reqwest::Client::builder().timeout(Duration::from_secs(timeout_secs)).build()?;
    debug!("LLM endpoint: {endpoint}");
    Ok(Self { client, endpoint, api_key, retry: RetryPolicy::none() })
  }

  /// Retries transient failures with `retry`.
  pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
    self.retry = retry;
    self
  }

  /// The endpoint requests are sent to.
  pub fn endpoint(&self) -> &Url { &self.endpoint }
}

#[async_trait]
impl ChatBackend for OpenAiClient {
  async fn complete(&self, request: &ChatRequest) -> Result<String> {
    request.validate()?;

    self
      .retry
      .run("chat completion", || async {
        let mut builder = self.client.post(self.endpoint.clone()).json(request);
        if let Some(key) = &self.api_key {
          builder = builder.header(AUTHORIZATION, format!("Bearer {key}"));
        }
        let response = builder.send().await?;

        let status = response.status();
        if !status.is_success() {
          let body = response.text().await.unwrap_or_default();
          return Err(HunterError::HttpStatus(status.as_u16(), body));
        }

        let response: ChatResponse = response.json().await?;
        response
          .content()
          .map(str::to_string)
          .ok_or_else(|| HunterError::ApiError("Chat completion returned no choices".into()))
      })
      .await
  }
}

/// Result of interpreting a reply as structured data.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedReply<T> {
  /// The reply held a well-formed value
  Valid(T),
  /// The reply could not be interpreted
  Invalid {
    /// The reply text as received
    raw:    String,
    /// Why parsing failed
    reason: String,
  },
}

impl<T> ParsedReply<T> {
  /// The parsed value, if any.
  pub fn ok(self) -> Option<T> {
    match self {
      Self::Valid(value) => Some(value),
      Self::Invalid { .. } => None,
    }
  }
}

/// Parses a reply as JSON, tolerating Markdown code fences and chatter around a single object.
///
/// ```
/// use hunter::llm::{parse_json_reply, ParsedReply};
/// use serde_json::Value;
///
/// let reply = "Sure!\n```json\n{\"admit\": true}\n```";
/// assert!(matches!(parse_json_reply::<Value>(reply), ParsedReply::Valid(_)));
/// assert!(matches!(parse_json_reply::<Value>("no idea"), ParsedReply::Invalid { .. }));
/// ```
pub fn parse_json_reply<T: DeserializeOwned>(raw: &str) -> ParsedReply<T> {
  let fenced = strip_code_fence(raw);
  let first_error = match serde_json::from_str::<T>(fenced) {
    Ok(value) => return ParsedReply::Valid(value),
    Err(e) => e.to_string(),
  };

  if let (Some(start), Some(end)) = (fenced.find('{'), fenced.rfind('}')) {
    if start < end {
      if let Ok(value) = serde_json::from_str::<T>(&fenced[start..=end]) {
        return ParsedReply::Valid(value);
      }
    }
  }

  ParsedReply::Invalid { raw: raw.to_string(), reason: first_error }
}

/// Returns the body of the first fenced block, or the trimmed input when there is none.
fn strip_code_fence(text: &str) -> &str {
  let text = text.trim();
  let Some(open) = text.find("```") else { return text };
  let after = &text[open + 3..];
  // Skip an info string such as `json`.
  let body = after.find('\n').map_or(after, |i| &after[i + 1..]);
  body.find("```").map_or(body, |close| &body[..close]).trim()
}

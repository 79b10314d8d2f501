//! Outbound notifications for archived papers.
//!
//! Messages are plain text. [`format_translation_message`] renders the block printed for every
//! translated abstract, and a [`Notifier`] pushes it somewhere; [`TelegramNotifier`] posts it to a
//! Telegram chat through the Bot API, followed by the paper's cover picture when it has one.

use reqwest::{
  multipart::{Form, Part},
  RequestBuilder,
};
use url::Url;

use super::*;
use crate::{config::TelegramConfig, pdf::truncate_chars, retry::RetryPolicy};

/// Longest message the Telegram Bot API accepts, in characters.
pub const TELEGRAM_MESSAGE_LIMIT: usize = 4096;

/// Longest photo caption the Telegram Bot API accepts, in characters.
pub const TELEGRAM_CAPTION_LIMIT: usize = 1024;

/// Placeholder for missing fields in rendered messages.
const NOT_AVAILABLE: &str = "N/A";

/// Something that delivers text messages and, optionally, pictures.
#[async_trait]
pub trait Notifier: Send + Sync {
  /// Delivers one message.
  async fn send_message(&self, text: &str) -> Result<()>;

  /// Delivers one JPEG with a caption. Notifiers without picture support accept and drop it.
  async fn send_photo(&self, _jpeg: &[u8], _caption: &str) -> Result<()> { Ok(()) }
}

/// Posts messages to a Telegram chat.
#[derive(Debug, Clone)]
pub struct TelegramNotifier {
  client:  reqwest::Client,
  /// `{api_base}/bot{token}/`, which every method name is joined onto
  bot:     Url,
  chat_id: String,
  retry:   RetryPolicy,
}

#[derive(Serialize)]
struct SendMessage<'a> {
  chat_id:                  &'a str,
  text:                     &'a str,
  disable_web_page_preview: bool,
}

#[derive(Deserialize)]
struct TelegramReply {
  ok:          bool,
  #[serde(default)]
  description: Option<String>,
}

impl TelegramNotifier {
  /// A notifier for `chat_id` using the bot identified by `token`.
  pub fn new(api_base: &str, token: &str, chat_id: &str, timeout_secs: u64) -> Result<Self> {
    let bot = Url::parse(&format!("{}/bot{token}/", api_base.trim_end_matches('/')))?;
    let client = reqwest::Client::builder().timeout(Duration::from_secs(timeout_secs)).build()?;
    Ok(Self { client, bot, chat_id: chat_id.to_string(), retry: RetryPolicy::none() })
  }

  /// Retries timeouts, rate limits and server errors with `retry`.
  pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
    self.retry = retry;
    self
  }

  /// A notifier built from the credentials copied into `config`.
  pub fn from_config(config: &TelegramConfig) -> Result<Self> {
    match (&config.token, &config.chat_id) {
      (Some(token), Some(chat_id)) =>
        Self::new(&config.api_base, token, chat_id, config.timeout_secs),
      _ => Err(HunterError::Config(format!(
        "Telegram push requested but {}/{} are missing",
        config.token_env, config.chat_id_env
      ))),
    }
  }

  /// URL of the Bot API `method`.
  pub fn method_url(&self, method: &str) -> Result<Url> { Ok(self.bot.join(method)?) }

  /// Posts to `method`, rebuilding the request with `body` for every attempt, and checks the
  /// `ok` flag of the reply.
  async fn call<F>(&self, method: &str, body: F) -> Result<()>
  where F: Fn(RequestBuilder) -> Result<RequestBuilder> + Send + Sync {
    let url = self.method_url(method)?;
    let label = format!("Telegram {method}");
    self
      .retry
      .run(&label, || async {
        let response = body(self.client.post(url.clone()))?.send().await?;

        let status = response.status();
        let text = response.text().await?;
        let reply: Option<TelegramReply> = serde_json::from_str(&text).ok();
        match reply {
          Some(reply) if status.is_success() && reply.ok => Ok::<_, HunterError>(()),
          Some(TelegramReply { description: Some(description), .. }) =>
            Err(HunterError::HttpStatus(status.as_u16(), description)),
          _ => Err(HunterError::HttpStatus(status.as_u16(), text)),
        }
      })
      .await
  }
}

#[async_trait]
impl Notifier for TelegramNotifier {
  async fn send_message(&self, text: &str) -> Result<()> {
    let (text, truncated) = truncate_chars(text, TELEGRAM_MESSAGE_LIMIT - 4);
    if truncated {
      debug!("Telegram message truncated to {TELEGRAM_MESSAGE_LIMIT} characters");
    }

    let payload =
      SendMessage { chat_id: &self.chat_id, text: &text, disable_web_page_preview: true };
    self.call("sendMessage", |request| Ok(request.json(&payload))).await
  }

  async fn send_photo(&self, jpeg: &[u8], caption: &str) -> Result<()> {
    let (caption, _) = truncate_chars(caption, TELEGRAM_CAPTION_LIMIT - 4);
    self
      .call("sendPhoto", |request| {
        let photo = Part::bytes(jpeg.to_vec()).file_name("cover.jpg").mime_str("image/jpeg")?;
        let form = Form::new()
          .text("chat_id", self.chat_id.clone())
          .text("caption", caption.clone())
          .part("photo", photo);
        Ok(request.multipart(form))
      })
      .await
  }
}

/// Renders the block printed (and optionally pushed) for a translated abstract.
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use hunter::{
///   notifier::format_translation_message,
///   paper::{Author, Paper},
/// };
///
/// let paper = Paper {
///   identifier:    "2405.05001v1".into(),
///   title:         "Scaling Laws".into(),
///   authors:       vec![Author::new("Alice").with_affiliation("Google")],
///   abstract_text: "We scale.".into(),
///   categories:    vec!["cs.IR".into()],
///   published:     Utc.with_ymd_and_hms(2024, 5, 9, 17, 59, 0).unwrap(),
///   updated:       None,
///   pdf_url:       None,
/// };
/// let message = format_translation_message(&paper, "Chinese", "我们扩展。");
/// assert!(message.contains("Authors: Alice (Google)"));
/// assert!(message.contains("Updated: N/A"));
/// ```
pub fn format_translation_message(paper: &Paper, language: &str, translation: &str) -> String {
  let or_na = |s: String| if s.is_empty() { NOT_AVAILABLE.to_string() } else { s };

  let authors = paper
    .authors
    .iter()
    .map(|a| match &a.affiliation {
      Some(affiliation) => format!("{} ({affiliation})", a.name),
      None => a.name.clone(),
    })
    .collect::<Vec<_>>()
    .join("; ");
  let timestamp = |t: &DateTime<Utc>| t.format("%Y-%m-%d %H:%M UTC").to_string();

  format!(
    "Title: {}\narXiv: {}\nPublished: {}\nUpdated: {}\nAuthors: {}\nAffiliations: {}\n\
     Categories: {}\nTranslation ({language}):\n{translation}",
    paper.title,
    paper.identifier,
    timestamp(&paper.published),
    paper.updated.as_ref().map_or_else(|| NOT_AVAILABLE.to_string(), timestamp),
    or_na(authors),
    or_na(paper.affiliations().join("; ")),
    or_na(paper.categories.join(", ")),
  )
}

//! LLM-backed summaries, translations and admission votes.
//!
//! The [`Analyst`] owns a [`ChatBackend`] and turns archived papers into [`PaperSummary`]
//! values. Model output is never trusted: a summary that does not parse, even after one stricter
//! retry, is kept as an invalid summary carrying the raw text, and a vote that does not parse is
//! a rejection.

use serde_json::{Map, Value};

use super::*;
use crate::{
  archivist::ArchivedArtifact,
  config::{AnalystConfig, Config},
  gatekeeper::{Vote, Voter},
  llm::{parse_json_reply, ChatBackend, ChatRequest, OpenAiClient, ParsedReply},
  pdf::PdfExtractor,
};

const SUMMARY_SYSTEM_PROMPT: &str = "You are an expert reviewer of machine learning research \
                                     who writes precise digests for industry practitioners.";

const STRICT_REMINDER: &str = "Your previous answer could not be parsed. Return only a JSON \
                               object, with no Markdown fences and no commentary.";

const VOTE_SYSTEM_PROMPT: &str =
  "You decide whether a research paper was written by people working at a given set of companies.";

/// Structured digest of one archived paper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperSummary {
  /// Identifier of the summarized paper
  pub paper_id:            String,
  /// PDF the summary was generated from
  pub artifact_path:       PathBuf,
  /// Parsed fields, keyed by the configured summary keys
  pub fields:              BTreeMap<String, Value>,
  /// Model output as received, kept when it could not be parsed
  pub raw:                 Option<String>,
  /// Abstract translated into the target language
  pub translated_abstract: Option<String>,
  /// When the summary was produced
  pub generated_at:        DateTime<Utc>,
  /// Whether the model output parsed into all required fields
  pub valid:               bool,
}

/// Produces summaries, translations and votes through an LLM.
pub struct Analyst {
  /// Chat endpoint
  backend:   Box<dyn ChatBackend>,
  /// Model and prompt parameters
  config:    AnalystConfig,
  /// Company labels offered to the vote prompt
  companies: Vec<String>,
}

impl Analyst {
  /// An analyst talking to `backend`.
  pub fn new(backend: impl ChatBackend + 'static, config: &AnalystConfig) -> Self {
    Self { backend: Box::new(backend), config: config.clone(), companies: Vec::new() }
  }

  /// An analyst talking to the configured endpoint, voting over the configured companies.
  pub fn from_config(config: &Config) -> Result<Self> {
    let analyst = &config.analyst;
    let client =
      OpenAiClient::new(&analyst.base_url, analyst.api_key.clone(), analyst.timeout_secs)?
        .with_retry(config.retry);
    Ok(
      Self::new(client, analyst)
        .with_companies(config.gatekeeper.companies.iter().map(|c| c.label.clone())),
    )
  }

  /// Sets the companies the vote prompt asks about.
  pub fn with_companies(mut self, companies: impl IntoIterator<Item = String>) -> Self {
    self.companies = companies.into_iter().collect();
    self
  }

  fn request(&self) -> ChatRequest {
    ChatRequest::new()
      .with_model(&self.config.model)
      .with_max_tokens(self.config.max_tokens)
      .with_temperature(self.config.temperature)
  }

  /// Summarizes an archived paper, optionally translating its abstract as well.
  ///
  /// Returns an error only when the first call to the endpoint fails. Unparseable output yields a
  /// summary with `valid == false`, also when the stricter retry cannot reach the endpoint.
  pub async fn summarize(
    &self,
    artifact: &ArchivedArtifact,
    translate: bool,
  ) -> Result<PaperSummary> {
    let paper = &artifact.paper;
    let content = match PdfExtractor::new(self.config.max_pages, self.config.max_chars)
      .extract(&artifact.path)
    {
      Ok(extracted) if !extracted.text.is_empty() => extracted.text,
      Ok(_) => {
        warn!("No text found in {}, summarizing the abstract instead", artifact.filename);
        paper.abstract_text.clone()
      },
      Err(e) => {
        warn!("Could not read {} ({e}), summarizing the abstract instead", artifact.filename);
        paper.abstract_text.clone()
      },
    };

    let prompt = self.summary_prompt(paper, &content);
    let base = self.request().with_system(SUMMARY_SYSTEM_PROMPT);

    let raw = self.backend.complete(&base.clone().with_message(&prompt)).await?;
    let parsed = match self.parse_summary(&raw) {
      ParsedReply::Invalid { raw, reason } => {
        debug!("Summary for {} did not parse ({reason}), retrying", paper.identifier);
        let strict = base.with_message(&format!("{prompt}\n\n{STRICT_REMINDER}"));
        match self.backend.complete(&strict).await {
          Ok(retried) => self.parse_summary(&retried),
          Err(e) => {
            warn!("Strict retry for {} failed: {e}", paper.identifier);
            ParsedReply::Invalid { raw, reason }
          },
        }
      },
      valid => valid,
    };

    let (fields, raw, valid) = match parsed {
      ParsedReply::Valid(fields) => (fields, None, true),
      ParsedReply::Invalid { raw, reason } => {
        warn!("Keeping unparsed summary for {}: {reason}", paper.identifier);
        (BTreeMap::new(), Some(raw), false)
      },
    };

    let translated_abstract = if translate {
      match self.translate(paper).await {
        Ok(translation) => Some(translation),
        Err(e) => {
          warn!("Translation of {} failed, keeping the original abstract: {e}", paper.identifier);
          None
        },
      }
    } else {
      None
    };

    Ok(PaperSummary {
      paper_id: paper.identifier.clone(),
      artifact_path: artifact.path.clone(),
      fields,
      raw,
      translated_abstract,
      generated_at: Utc::now(),
      valid,
    })
  }

  /// Translates the abstract of `paper` into the configured target language.
  pub async fn translate(&self, paper: &Paper) -> Result<String> {
    let request = self
      .request()
      .with_system("You are a professional translator of scientific writing.")
      .with_message(&format!(
        "Translate the following abstract into {}. Keep technical terms accurate and return only \
         the translation.\n\nTitle: {}\n\nAbstract: {}",
        self.config.target_language, paper.title, paper.abstract_text
      ));
    let translation = self.backend.complete(&request).await?;
    if translation.trim().is_empty() {
      return Err(HunterError::ApiError("empty translation".into()));
    }
    Ok(translation.trim().to_string())
  }

  /// Asks whether `paper` comes from one of the target companies. Never fails: any error or
  /// malformed answer is a negative vote.
  pub async fn vote(&self, paper: &Paper) -> Vote {
    let request = self
      .request()
      .with_temperature(0.0)
      .with_system(VOTE_SYSTEM_PROMPT)
      .with_message(&self.vote_prompt(paper));

    match self.backend.complete(&request).await {
      Ok(raw) => match parse_json_reply::<Vote>(&raw) {
        ParsedReply::Valid(vote) => vote,
        ParsedReply::Invalid { reason, .. } => {
          warn!("Unparseable vote for {}: {reason}", paper.identifier);
          Vote::default()
        },
      },
      Err(e) => {
        warn!("Vote for {} failed: {e}", paper.identifier);
        Vote::default()
      },
    }
  }

  fn summary_prompt(&self, paper: &Paper, content: &str) -> String {
    let keys = self.config.summary_keys.iter().map(|k| format!("\"{k}\"")).collect::<Vec<_>>();
    format!(
      "Summarize the paper below as a JSON object with exactly these keys: {}. Each value is a \
       short paragraph.\n\nTitle: {}\nAuthors: {}\n\n{content}",
      keys.join(", "),
      paper.title,
      paper.author_names(),
    )
  }

  fn vote_prompt(&self, paper: &Paper) -> String {
    let authors = paper
      .authors
      .iter()
      .map(|a| {
        let details =
          [a.affiliation.as_deref(), a.email.as_deref()].into_iter().flatten().collect::<Vec<_>>();
        if details.is_empty() {
          a.name.clone()
        } else {
          format!("{} ({})", a.name, details.join("; "))
        }
      })
      .collect::<Vec<_>>()
      .join("\n- ");
    format!(
      "Target companies: {}.\n\nTitle: {}\nAuthors:\n- {authors}\n\nAbstract: {}\n\nAnswer with a \
       JSON object {{\"admit\": true|false, \"company\": \"<label>\"|null}}. Admit only when at \
       least one author clearly works at a target company.",
      self.companies.join(", "),
      paper.title,
      paper.abstract_text,
    )
  }

  /// Parses a summary reply and checks every required key is present.
  fn parse_summary(&self, raw: &str) -> ParsedReply<BTreeMap<String, Value>> {
    let object = match parse_json_reply::<Map<String, Value>>(raw) {
      ParsedReply::Valid(object) => object,
      ParsedReply::Invalid { raw, reason } => return ParsedReply::Invalid { raw, reason },
    };

    let missing: Vec<&str> = self
      .config
      .summary_keys
      .iter()
      .filter(|k| !object.contains_key(k.as_str()))
      .map(String::as_str)
      .collect();
    if !missing.is_empty() {
      return ParsedReply::Invalid {
        raw:    raw.to_string(),
        reason: format!("missing keys: {}", missing.join(", ")),
      };
    }
    ParsedReply::Valid(object.into_iter().collect())
  }
}

#[async_trait]
impl Voter for Analyst {
  async fn vote(&self, paper: &Paper) -> Vote { Analyst::vote(self, paper).await }
}

//! Run configuration.
//!
//! Every component receives its section of [`Config`] at construction and never reads process
//! state on its own. The only place the environment is consulted is
//! [`Config::with_environment`], which copies secrets and endpoint overrides into the value once.
//!
//! Configuration files are TOML and every field has a default, so a file only needs to carry the
//! values it changes:
//!
//! ```toml
//! [search]
//! keywords = ["recommender system", "CTR prediction"]
//! last_n_days = 2
//!
//! [gatekeeper]
//! use_llm_filter = true
//! llm_call_limit = 20
//!
//! [run]
//! summarize = false
//! ```

use std::env;

use super::*;
use crate::retry::RetryPolicy;

/// Top level configuration for a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Harvesting parameters
  pub search:     SearchConfig,
  /// Admission filter parameters
  pub gatekeeper: GatekeeperConfig,
  /// On-disk layout and download parameters
  pub archivist:  ArchivistConfig,
  /// LLM endpoint and prompt parameters
  pub analyst:    AnalystConfig,
  /// Telegram push parameters
  pub telegram:   TelegramConfig,
  /// Which optional phases a run performs
  pub run:        RunConfig,
  /// Retry policy shared by every network call
  pub retry:      RetryPolicy,
}

/// Harvesting parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
  /// Atom query endpoint
  pub api_url:               String,
  /// Keyword phrases, OR-ed together in the upstream query
  pub keywords:              Vec<String>,
  /// Subject categories; empty means no category filter
  pub categories:            Vec<String>,
  /// Number of trailing days before today included in the window
  pub last_n_days:           u32,
  /// Maximum number of records yielded by a harvest
  pub max_results:           usize,
  /// Number of records requested per page
  pub page_size:             usize,
  /// Drop records whose title and abstract mention none of the keywords
  pub require_keyword_match: bool,
  /// Per-request timeout in seconds
  pub timeout_secs:          u64,
}

/// A company label together with the affiliation pattern that identifies it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyPattern {
  /// Label recorded on admitted papers and used in filenames
  pub label:   String,
  /// Case-insensitive regular expression tested against affiliation text
  pub pattern: String,
}

/// Admission filter parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatekeeperConfig {
  /// Target organizations, tested in order
  pub companies:           Vec<CompanyPattern>,
  /// Enable the e-mail domain layer
  pub use_email_heuristic: bool,
  /// Domain (or domain suffix) to company label
  pub email_domains:       BTreeMap<String, String>,
  /// Enable the LLM fallback vote
  pub use_llm_filter:      bool,
  /// Maximum number of fallback votes per run
  pub llm_call_limit:      Option<usize>,
  /// Admit every candidate without running any check
  pub skip:                bool,
}

/// On-disk layout and download parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchivistConfig {
  /// Root under which day directories are created
  pub base_dir:     PathBuf,
  /// Per-download timeout in seconds
  pub timeout_secs: u64,
}

/// LLM endpoint and prompt parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalystConfig {
  /// Name of the environment variable holding the API key
  pub api_key_env:     String,
  /// API key, filled from the environment
  #[serde(skip)]
  pub api_key:         Option<String>,
  /// Model name sent with every request
  pub model:           String,
  /// Endpoint, either a bare host or a full chat-completions URL
  pub base_url:        String,
  /// Upper bound on generated tokens
  pub max_tokens:      u32,
  /// Sampling temperature for summaries and translations
  pub temperature:     f64,
  /// Number of leading PDF pages fed to the summary prompt
  pub max_pages:       usize,
  /// Character budget for the extracted PDF text
  pub max_chars:       usize,
  /// Keys the summary JSON object must contain
  pub summary_keys:    Vec<String>,
  /// Language abstracts are translated into
  pub target_language: String,
  /// Per-request timeout in seconds
  pub timeout_secs:    u64,
}

/// Telegram push parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
  /// Bot API root
  pub api_base:     String,
  /// Name of the environment variable holding the bot token
  pub token_env:    String,
  /// Name of the environment variable holding the chat id
  pub chat_id_env:  String,
  /// Bot token, filled from the environment
  #[serde(skip)]
  pub token:        Option<String>,
  /// Chat id, filled from the environment
  #[serde(skip)]
  pub chat_id:      Option<String>,
  /// Per-request timeout in seconds
  pub timeout_secs: u64,
}

/// Which optional phases a run performs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
  /// Produce LLM summaries after the download phase
  pub summarize:           bool,
  /// Translate each archived abstract
  pub translate_abstracts: bool,
  /// Push translations to Telegram
  pub telegram:            bool,
  /// Follow each pushed translation with the paper's first-page picture
  pub cover_image:         bool,
  /// Stop the download phase after this many archived papers
  pub limit:               Option<usize>,
}

impl Config {
  /// Returns the default configuration file location.
  ///
  /// - On Unix: `~/.config/hunter/config.toml`
  /// - On macOS: `~/Library/Application Support/hunter/config.toml`
  /// - Fallback: `./hunter/config.toml`
  pub fn default_path() -> PathBuf {
    dirs::config_dir().unwrap_or_else(|| PathBuf::from(".")).join("hunter").join("config.toml")
  }

  /// Loads a configuration file; missing fields take their defaults.
  pub fn load(path: impl AsRef<Path>) -> Result<Self> {
    let content = std::fs::read_to_string(path.as_ref())?;
    let config = toml::from_str(&content)?;
    debug!("Loaded configuration from {}", path.as_ref().display());
    Ok(config)
  }

  /// Loads `path` if it exists, otherwise falls back to the defaults.
  pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
    if path.as_ref().exists() {
      Self::load(path)
    } else {
      debug!("No configuration at {}, using defaults", path.as_ref().display());
      Ok(Self::default())
    }
  }

  /// Writes the configuration as TOML, creating parent directories.
  pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
    if let Some(parent) = path.as_ref().parent() {
      std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path.as_ref(), toml::to_string_pretty(self)?)?;
    Ok(())
  }

  /// Copies secrets and endpoint overrides from the process environment.
  ///
  /// Reads the variables named by `analyst.api_key_env`, `telegram.token_env` and
  /// `telegram.chat_id_env`, plus `LLM_BASE_URL` and `LLM_MODEL` when set.
  pub fn with_environment(mut self) -> Self {
    let non_empty = |name: &str| env::var(name).ok().filter(|v| !v.trim().is_empty());

    self.analyst.api_key = non_empty(&self.analyst.api_key_env);
    if let Some(url) = non_empty("LLM_BASE_URL") {
      self.analyst.base_url = url;
    }
    if let Some(model) = non_empty("LLM_MODEL") {
      self.analyst.model = model;
    }
    self.telegram.token = non_empty(&self.telegram.token_env);
    self.telegram.chat_id = non_empty(&self.telegram.chat_id_env);
    self
  }

  /// Rejects configurations that are guaranteed to fail, before any network call is made.
  pub fn validate(&self) -> Result<()> {
    if self.search.page_size == 0 {
      return Err(HunterError::Config("search.page_size must be greater than zero".into()));
    }
    if self.search.keywords.iter().all(|k| k.trim().is_empty()) {
      return Err(HunterError::Config("at least one search keyword is required".into()));
    }
    for company in &self.gatekeeper.companies {
      Regex::new(&company.pattern).map_err(|e| {
        HunterError::Config(format!("invalid pattern for company {}: {e}", company.label))
      })?;
    }

    if self.needs_llm() && self.analyst.api_key.is_none() {
      return Err(HunterError::Config(format!(
        "{} is not set but summaries, translation or the LLM filter are enabled",
        self.analyst.api_key_env
      )));
    }
    if self.run.telegram && (self.telegram.token.is_none() || self.telegram.chat_id.is_none()) {
      return Err(HunterError::Config(format!(
        "Telegram push requested but {}/{} are missing",
        self.telegram.token_env, self.telegram.chat_id_env
      )));
    }
    Ok(())
  }

  /// Whether any enabled feature calls the LLM endpoint.
  pub fn needs_llm(&self) -> bool {
    self.run.summarize
      || self.run.translate_abstracts
      || (self.gatekeeper.use_llm_filter && !self.gatekeeper.skip)
  }
}

impl Default for SearchConfig {
  fn default() -> Self {
    Self {
      api_url:               "http://export.arxiv.org/api/query".into(),
      keywords:              to_strings(&[
        "recommendation system",
        "recommender system",
        "CTR prediction",
        "LLM for rec",
      ]),
      categories:            to_strings(&["cs.IR", "cs.LG", "cs.AI", "stat.ML", "cs.CL"]),
      last_n_days:           1,
      max_results:           500,
      page_size:             100,
      require_keyword_match: false,
      timeout_secs:          30,
    }
  }
}

impl Default for GatekeeperConfig {
  fn default() -> Self {
    let companies = [
      ("Google", r"\bgoogle\b"),
      ("DeepMind", r"\bdeepmind\b"),
      ("Meta", r"\b(meta|facebook|instagram)\b"),
      ("ByteDance", r"\b(bytedance|tiktok|douyin|toutiao)\b"),
      ("Tencent", r"\b(tencent|wechat)\b"),
      ("Alibaba", r"\b(alibaba|taobao|tmall|ant group)\b"),
      ("Kuaishou", r"\bkuaishou\b"),
      ("Xiaohongshu", r"\b(xiaohongshu|rednote)\b"),
      ("Bilibili", r"\bbilibili\b"),
      ("Baidu", r"\bbaidu\b"),
      ("Microsoft", r"\bmicrosoft\b"),
      ("Apple", r"\bapple\b"),
      ("Amazon", r"\bamazon\b"),
      ("Netflix", r"\bnetflix\b"),
    ]
    .into_iter()
    .map(|(label, pattern)| CompanyPattern { label: label.into(), pattern: pattern.into() })
    .collect();

    let email_domains = [
      ("google.com", "Google"),
      ("deepmind.com", "DeepMind"),
      ("meta.com", "Meta"),
      ("fb.com", "Meta"),
      ("bytedance.com", "ByteDance"),
      ("tencent.com", "Tencent"),
      ("alibaba-inc.com", "Alibaba"),
      ("antgroup.com", "Alibaba"),
      ("kuaishou.com", "Kuaishou"),
      ("xiaohongshu.com", "Xiaohongshu"),
      ("bilibili.com", "Bilibili"),
      ("baidu.com", "Baidu"),
      ("microsoft.com", "Microsoft"),
      ("apple.com", "Apple"),
      ("amazon.com", "Amazon"),
      ("netflix.com", "Netflix"),
    ]
    .into_iter()
    .map(|(domain, label)| (domain.to_string(), label.to_string()))
    .collect();

    Self {
      companies,
      use_email_heuristic: true,
      email_domains,
      use_llm_filter: false,
      llm_call_limit: None,
      skip: false,
    }
  }
}

impl Default for ArchivistConfig {
  fn default() -> Self { Self { base_dir: PathBuf::from("downloads"), timeout_secs: 60 } }
}

impl Default for AnalystConfig {
  fn default() -> Self {
    Self {
      api_key_env:     "DEEPSEEK_API_KEY".into(),
      api_key:         None,
      model:           "deepseek-chat".into(),
      base_url:        "https://api.deepseek.com".into(),
      max_tokens:      2048,
      temperature:     0.2,
      max_pages:       6,
      max_chars:       4000,
      summary_keys:    to_strings(&[
        "one_liner",
        "problem",
        "method",
        "results",
        "industry_value",
      ]),
      target_language: "Chinese".into(),
      timeout_secs:    120,
    }
  }
}

impl Default for TelegramConfig {
  fn default() -> Self {
    Self {
      api_base:     "https://api.telegram.org".into(),
      token_env:    "TELEGRAM_BOT_TOKEN".into(),
      chat_id_env:  "TELEGRAM_CHAT_ID".into(),
      token:        None,
      chat_id:      None,
      timeout_secs: 30,
    }
  }
}

impl Default for RunConfig {
  fn default() -> Self {
    Self {
      summarize:           true,
      translate_abstracts: false,
      telegram:            false,
      cover_image:         true,
      limit:               None,
    }
  }
}

/// Owned copies of a list of literals.
fn to_strings(items: &[&str]) -> Vec<String> { items.iter().map(|s| s.to_string()).collect() }

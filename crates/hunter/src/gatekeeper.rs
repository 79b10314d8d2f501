//! Layered admission filtering.
//!
//! The [`Gatekeeper`] runs an ordered list of [`AdmissionCheck`]s against every candidate. Each
//! check answers with a [`Verdict`]: admit, reject, or defer to the next check. The first check
//! that does not defer decides; a candidate every check defers on is rejected as
//! [`Layer::NoneMatched`].
//!
//! The default chain is:
//! 1. [`MetadataWhitelist`]: author affiliations against company patterns (always on)
//! 2. [`EmailHeuristic`]: domain-like tokens in e-mails and affiliations (optional)
//! 3. [`LlmFallback`]: a constrained LLM vote (optional, fails closed, budgeted)
//!
//! # Examples
//!
//! ```
//! # use chrono::Utc;
//! use hunter::{
//!   config::GatekeeperConfig,
//!   gatekeeper::{Gatekeeper, Layer},
//!   paper::{Author, Paper},
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let gatekeeper = Gatekeeper::from_config(&GatekeeperConfig::default(), None)?;
//! # let paper = Paper {
//! #   identifier: "x".into(), title: "t".into(), abstract_text: String::new(),
//! #   authors: vec![Author::new("A").with_affiliation("Kuaishou Technology")],
//! #   categories: vec![], published: Utc::now(), updated: None, pdf_url: None,
//! # };
//! let decision = gatekeeper.admit(&paper).await;
//! assert!(decision.admitted);
//! assert_eq!(decision.layer, Layer::MetadataWhitelist);
//! assert_eq!(decision.company.as_deref(), Some("Kuaishou"));
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};

use regex::RegexBuilder;

use super::*;
use crate::config::GatekeeperConfig;

/// The layer that produced an admission decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Layer {
  /// Affiliation text matched a company pattern
  MetadataWhitelist,
  /// An e-mail or affiliation domain matched the domain map
  EmailHeuristic,
  /// The LLM voted to admit
  LlmFallback,
  /// No layer admitted the candidate
  NoneMatched,
  /// Filtering was bypassed entirely
  Skipped,
}

impl Display for Layer {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let name = match self {
      Self::MetadataWhitelist => "metadata-whitelist",
      Self::EmailHeuristic => "email-heuristic",
      Self::LlmFallback => "llm-fallback",
      Self::NoneMatched => "none-matched",
      Self::Skipped => "skipped",
    };
    f.write_str(name)
  }
}

/// Outcome of a single check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
  /// Admit, optionally naming the matched company
  Admit(Option<String>),
  /// Reject outright
  Reject,
  /// No opinion; ask the next check
  Defer,
}

/// The final, immutable decision for one candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionDecision {
  /// Identifier of the decided paper
  pub paper_id: String,
  /// Whether the paper survives
  pub admitted: bool,
  /// Layer that rendered the verdict
  pub layer:    Layer,
  /// Matched company label, if any
  pub company:  Option<String>,
}

impl AdmissionDecision {
  /// Admission without any check having run.
  pub fn skipped(paper: &Paper) -> Self {
    Self {
      paper_id: paper.identifier.clone(),
      admitted: true,
      layer:    Layer::Skipped,
      company:  None,
    }
  }
}

/// One layer of the admission chain.
#[async_trait]
pub trait AdmissionCheck: Send + Sync {
  /// Layer reported when this check decides.
  fn layer(&self) -> Layer;

  /// Inspects a candidate.
  async fn check(&self, paper: &Paper) -> Verdict;
}

/// A yes/no answer from an LLM on whether a paper comes from a target company.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Vote {
  /// Whether the model thinks the paper should be admitted
  pub admit:   bool,
  /// Company the model attributed the paper to
  #[serde(default)]
  pub company: Option<String>,
}

/// Something that can cast a fallback vote. Implementations must never fail: errors are a
/// negative vote.
#[async_trait]
pub trait Voter: Send + Sync {
  /// Votes on a candidate.
  async fn vote(&self, paper: &Paper) -> Vote;
}

/// Tests author affiliations against labelled, case-insensitive patterns.
pub struct MetadataWhitelist {
  companies: Vec<(String, Regex)>,
}

impl MetadataWhitelist {
  /// Compiles `(label, pattern)` pairs; order is match priority.
  pub fn new<'a>(companies: impl IntoIterator<Item = (&'a str, &'a str)>) -> Result<Self> {
    let companies = companies
      .into_iter()
      .map(|(label, pattern)| {
        Ok((label.to_string(), RegexBuilder::new(pattern).case_insensitive(true).build()?))
      })
      .collect::<Result<Vec<_>>>()?;
    Ok(Self { companies })
  }

  /// First company whose pattern matches `text`.
  pub fn match_text(&self, text: &str) -> Option<&str> {
    self.companies.iter().find(|(_, re)| re.is_match(text)).map(|(label, _)| label.as_str())
  }
}

#[async_trait]
impl AdmissionCheck for MetadataWhitelist {
  fn layer(&self) -> Layer { Layer::MetadataWhitelist }

  async fn check(&self, paper: &Paper) -> Verdict {
    paper
      .authors
      .iter()
      .filter_map(|a| a.affiliation.as_deref())
      .find_map(|affiliation| self.match_text(affiliation))
      .map_or(Verdict::Defer, |label| Verdict::Admit(Some(label.to_string())))
  }
}

lazy_static! {
  /// Domain-like tokens such as the host part of `name@sub.example.com` or `example.co.uk`.
  static ref DOMAIN: Regex = Regex::new(concat!(
    r"(?i)\b[a-z0-9](?:[a-z0-9-]*[a-z0-9])?",
    r"(?:\.[a-z0-9](?:[a-z0-9-]*[a-z0-9])?)*\.[a-z]{2,}\b"
  ))
  .unwrap();
}

/// Matches domain-like tokens in author e-mails and affiliations against a domain map.
pub struct EmailHeuristic {
  domains: Vec<(String, String)>,
}

impl EmailHeuristic {
  /// `domains` maps a domain (or domain suffix) to a company label.
  pub fn new(domains: &BTreeMap<String, String>) -> Self {
    let domains =
      domains.iter().map(|(domain, label)| (domain.trim().to_lowercase(), label.clone())).collect();
    Self { domains }
  }

  /// Lowercased domain-like tokens found in `text`.
  pub fn domains_in(text: &str) -> Vec<String> {
    DOMAIN.find_iter(text).map(|m| m.as_str().to_lowercase()).collect()
  }

  /// Company label for a single domain token, honouring subdomains.
  pub fn match_domain(&self, token: &str) -> Option<&str> {
    self
      .domains
      .iter()
      .find(|(domain, _)| {
        token == domain.as_str()
          || token.strip_suffix(domain.as_str()).is_some_and(|p| p.ends_with('.'))
      })
      .map(|(_, label)| label.as_str())
  }
}

#[async_trait]
impl AdmissionCheck for EmailHeuristic {
  fn layer(&self) -> Layer { Layer::EmailHeuristic }

  async fn check(&self, paper: &Paper) -> Verdict {
    paper
      .authors
      .iter()
      .flat_map(|a| a.email.iter().chain(a.affiliation.iter()))
      .flat_map(|text| Self::domains_in(text))
      .find_map(|token| self.match_domain(&token).map(str::to_string))
      .map_or(Verdict::Defer, |label| Verdict::Admit(Some(label)))
  }
}

/// Asks a [`Voter`] when the deterministic layers found nothing.
///
/// A negative vote defers, so the chain ends in [`Layer::NoneMatched`]. Once `limit` votes have
/// been cast the check defers without calling the voter.
pub struct LlmFallback {
  voter: Arc<dyn Voter>,
  limit: Option<usize>,
  used:  AtomicUsize,
}

impl LlmFallback {
  /// Wraps a voter with an optional budget of calls.
  pub fn new(voter: Arc<dyn Voter>, limit: Option<usize>) -> Self {
    Self { voter, limit, used: AtomicUsize::new(0) }
  }

  /// Number of votes cast so far.
  pub fn calls(&self) -> usize { self.used.load(Ordering::SeqCst) }
}

#[async_trait]
impl AdmissionCheck for LlmFallback {
  fn layer(&self) -> Layer { Layer::LlmFallback }

  async fn check(&self, paper: &Paper) -> Verdict {
    if self.limit.is_some_and(|limit| self.calls() >= limit) {
      debug!("LLM vote budget exhausted, skipping vote for {}", paper.identifier);
      return Verdict::Defer;
    }
    self.used.fetch_add(1, Ordering::SeqCst);

    let vote = self.voter.vote(paper).await;
    if vote.admit {
      Verdict::Admit(vote.company.filter(|c| !c.trim().is_empty()))
    } else {
      Verdict::Defer
    }
  }
}

/// The ordered admission chain.
pub struct Gatekeeper {
  checks: Vec<Box<dyn AdmissionCheck>>,
  skip:   bool,
}

impl Gatekeeper {
  /// A gatekeeper with no checks; everything is rejected until checks are added.
  pub fn new() -> Self { Self { checks: Vec::new(), skip: false } }

  /// A gatekeeper that admits everything without running any check.
  pub fn skipping() -> Self { Self { checks: Vec::new(), skip: true } }

  /// Builds the default chain described by `config`.
  ///
  /// The LLM layer is only added when `use_llm_filter` is set and a voter is supplied. When
  /// `skip` is set no check of any kind runs, the LLM vote included.
  pub fn from_config(config: &GatekeeperConfig, voter: Option<Arc<dyn Voter>>) -> Result<Self> {
    if config.skip {
      return Ok(Self::skipping());
    }

    let mut gatekeeper = Self::new().with_check(MetadataWhitelist::new(
      config.companies.iter().map(|c| (c.label.as_str(), c.pattern.as_str())),
    )?);
    if config.use_email_heuristic {
      gatekeeper = gatekeeper.with_check(EmailHeuristic::new(&config.email_domains));
    }
    match (config.use_llm_filter, voter) {
      (true, Some(voter)) =>
        gatekeeper = gatekeeper.with_check(LlmFallback::new(voter, config.llm_call_limit)),
      (true, None) => warn!("LLM filter requested but no voter is available"),
      _ => (),
    }
    Ok(gatekeeper)
  }

  /// Appends a check to the end of the chain.
  pub fn with_check(mut self, check: impl AdmissionCheck + 'static) -> Self {
    self.checks.push(Box::new(check));
    self
  }

  /// Layers in evaluation order.
  pub fn layers(&self) -> Vec<Layer> { self.checks.iter().map(|c| c.layer()).collect() }

  /// Decides on one candidate.
  pub async fn admit(&self, paper: &Paper) -> AdmissionDecision {
    if self.skip {
      return AdmissionDecision::skipped(paper);
    }

    for check in &self.checks {
      let (admitted, company) = match check.check(paper).await {
        Verdict::Defer => continue,
        Verdict::Admit(company) => (true, company),
        Verdict::Reject => (false, None),
      };
      debug!("{} decided by {}: admitted={admitted}", paper.identifier, check.layer());
      return AdmissionDecision {
        paper_id: paper.identifier.clone(),
        admitted,
        layer: check.layer(),
        company,
      };
    }

    trace!("No layer admitted {}", paper.identifier);
    AdmissionDecision {
      paper_id: paper.identifier.clone(),
      admitted: false,
      layer:    Layer::NoneMatched,
      company:  None,
    }
  }
}

impl Default for Gatekeeper {
  fn default() -> Self { Self::new() }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::AtomicBool;

  use super::*;
  use crate::paper::tests::paper;

  /// Votes a fixed way and remembers whether it was asked.
  struct FixedVoter {
    vote:   Vote,
    called: AtomicBool,
  }

  impl FixedVoter {
    fn new(admit: bool, company: Option<&str>) -> Arc<Self> {
      Arc::new(Self {
        vote:   Vote { admit, company: company.map(String::from) },
        called: AtomicBool::new(false),
      })
    }
  }

  #[async_trait]
  impl Voter for FixedVoter {
    async fn vote(&self, _: &Paper) -> Vote {
      self.called.store(true, Ordering::SeqCst);
      self.vote.clone()
    }
  }

  struct RejectAll;

  #[async_trait]
  impl AdmissionCheck for RejectAll {
    fn layer(&self) -> Layer { Layer::NoneMatched }

    async fn check(&self, _: &Paper) -> Verdict { Verdict::Reject }
  }

  fn with_affiliation(affiliation: &str) -> Paper {
    let mut p = paper("2405.00001v1", "Title", (2024, 5, 9));
    p.authors = vec![Author::new("Alice"), Author::new("Bob").with_affiliation(affiliation)];
    p
  }

  fn llm_config() -> GatekeeperConfig {
    GatekeeperConfig { use_llm_filter: true, ..GatekeeperConfig::default() }
  }

  #[tokio::test]
  async fn test_whitelist_precedes_llm_fallback() {
    let voter = FixedVoter::new(false, None);
    let gatekeeper = Gatekeeper::from_config(&llm_config(), Some(voter.clone())).unwrap();

    let decision = gatekeeper.admit(&with_affiliation("ByteDance Inc.")).await;
    assert!(decision.admitted);
    assert_eq!(decision.layer, Layer::MetadataWhitelist);
    assert_eq!(decision.company.as_deref(), Some("ByteDance"));
    assert!(!voter.called.load(Ordering::SeqCst));
  }

  #[test]
  fn test_whitelist_uses_configured_order() {
    let whitelist = MetadataWhitelist::new([("Meta", r"\bmeta\b"), ("Google", "google")]).unwrap();
    assert_eq!(whitelist.match_text("Google and META"), Some("Meta"));
    assert_eq!(whitelist.match_text("University of Tokyo"), None);
  }

  #[tokio::test]
  async fn test_email_heuristic_matches_subdomains() {
    let mut p = paper("2405.00001v1", "Title", (2024, 5, 9));
    p.authors = vec![Author::new("Alice").with_email("alice@research.google.com")];
    let gatekeeper = Gatekeeper::from_config(&GatekeeperConfig::default(), None).unwrap();

    let decision = gatekeeper.admit(&p).await;
    assert_eq!(decision.layer, Layer::EmailHeuristic);
    assert_eq!(decision.company.as_deref(), Some("Google"));
  }

  #[test]
  fn test_email_heuristic_ignores_lookalikes() {
    let heuristic = EmailHeuristic::new(&GatekeeperConfig::default().email_domains);
    assert_eq!(heuristic.match_domain("notgoogle.com"), None);
    assert_eq!(heuristic.match_domain("mail.alibaba-inc.com"), Some("Alibaba"));
    assert_eq!(
      EmailHeuristic::domains_in("Dept. of CS; contact: x.y@Fb.com"),
      vec!["fb.com".to_string()]
    );
  }

  #[tokio::test]
  async fn test_email_layer_disabled() {
    let mut p = paper("2405.00001v1", "Title", (2024, 5, 9));
    p.authors = vec![Author::new("Alice").with_email("alice@netflix.com")];
    let config = GatekeeperConfig { use_email_heuristic: false, ..GatekeeperConfig::default() };
    let gatekeeper = Gatekeeper::from_config(&config, None).unwrap();

    let decision = gatekeeper.admit(&p).await;
    assert!(!decision.admitted);
    assert_eq!(decision.layer, Layer::NoneMatched);
  }

  #[tokio::test]
  async fn test_llm_fallback_admits() {
    let voter = FixedVoter::new(true, Some("Pinterest"));
    let gatekeeper = Gatekeeper::from_config(&llm_config(), Some(voter.clone())).unwrap();

    let decision = gatekeeper.admit(&with_affiliation("Stanford University")).await;
    assert!(decision.admitted);
    assert_eq!(decision.layer, Layer::LlmFallback);
    assert_eq!(decision.company.as_deref(), Some("Pinterest"));
    assert!(voter.called.load(Ordering::SeqCst));
  }

  #[tokio::test]
  async fn test_negative_vote_rejects() {
    let voter = FixedVoter::new(false, None);
    let gatekeeper = Gatekeeper::from_config(&llm_config(), Some(voter)).unwrap();

    let decision = gatekeeper.admit(&with_affiliation("Stanford University")).await;
    assert!(!decision.admitted);
    assert_eq!(decision.layer, Layer::NoneMatched);
  }

  #[tokio::test]
  async fn test_llm_budget() {
    let voter = FixedVoter::new(true, None);
    let fallback = LlmFallback::new(voter, Some(1));
    let p = with_affiliation("Stanford University");

    assert_eq!(fallback.check(&p).await, Verdict::Admit(None));
    assert_eq!(fallback.check(&p).await, Verdict::Defer);
    assert_eq!(fallback.calls(), 1);
  }

  #[tokio::test]
  async fn test_skip_takes_precedence_over_llm() {
    let voter = FixedVoter::new(false, None);
    let config = GatekeeperConfig { skip: true, ..llm_config() };
    let gatekeeper = Gatekeeper::from_config(&config, Some(voter.clone())).unwrap();

    let decision = gatekeeper.admit(&with_affiliation("Stanford University")).await;
    assert!(decision.admitted);
    assert_eq!(decision.layer, Layer::Skipped);
    assert_eq!(decision.company, None);
    assert!(!voter.called.load(Ordering::SeqCst));
  }

  #[tokio::test]
  async fn test_reject_short_circuits() {
    let voter = FixedVoter::new(true, None);
    let gatekeeper = Gatekeeper::new()
      .with_check(RejectAll)
      .with_check(LlmFallback::new(voter.clone(), None));

    let decision = gatekeeper.admit(&with_affiliation("Google")).await;
    assert!(!decision.admitted);
    assert!(!voter.called.load(Ordering::SeqCst));
  }

  #[test]
  fn test_default_chain_layers() {
    let gatekeeper = Gatekeeper::from_config(&GatekeeperConfig::default(), None).unwrap();
    assert_eq!(gatekeeper.layers(), vec![Layer::MetadataWhitelist, Layer::EmailHeuristic]);
    assert_eq!(Layer::MetadataWhitelist.to_string(), "metadata-whitelist");
  }
}

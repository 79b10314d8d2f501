//! Orchestration of a full run.
//!
//! A run has up to three sequential phases:
//!
//! 1. **Download**: every harvested candidate goes through the gatekeeper, and every admitted one
//!    is archived. A harvesting error aborts the run; a failed download only skips its record.
//! 2. **Summarize**: each archived paper is summarized and its Markdown rewritten.
//! 3. **Translate**: each archived abstract is translated, rendered as a message and optionally
//!    pushed through a [`Notifier`].
//!
//! Per-record failures in any phase are logged and collected in [`RunReport::skipped`]; they
//! never stop the run. Rendered messages are returned in [`RunReport::messages`] for the caller
//! to print.

use futures::TryStreamExt;

use super::*;
use crate::{
  analyst::{Analyst, PaperSummary},
  archivist::{ArchivedArtifact, Archivist},
  config::{Config, RunConfig},
  gatekeeper::{AdmissionDecision, Gatekeeper, Voter},
  harvester::{ArxivApi, Harvester},
  notifier::{format_translation_message, Notifier, TelegramNotifier},
  pdf,
};

/// Phase in which a record was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
  /// Fetching, verifying or storing the PDF
  Download,
  /// Generating or writing the summary
  Summary,
  /// Translating the abstract
  Translation,
  /// Pushing the message
  Notification,
}

/// A record that did not make it through a phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Skip {
  /// Identifier of the affected paper
  pub paper_id: String,
  /// Phase that failed
  pub stage:    Stage,
  /// Error message
  pub reason:   String,
}

/// Everything a run produced.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
  /// Number of harvested candidates
  pub candidates: usize,
  /// Every admission decision, in harvest order
  pub decisions:  Vec<AdmissionDecision>,
  /// Papers stored on disk
  pub archived:   Vec<ArchivedArtifact>,
  /// Summaries produced in the summarize phase
  pub summaries:  Vec<PaperSummary>,
  /// Rendered translation messages
  pub messages:   Vec<String>,
  /// Per-record failures
  pub skipped:    Vec<Skip>,
}

impl RunReport {
  /// Number of admitted candidates.
  pub fn admitted(&self) -> usize { self.decisions.iter().filter(|d| d.admitted).count() }

  /// Number of rejected candidates.
  pub fn rejected(&self) -> usize { self.decisions.len() - self.admitted() }

  fn skip(&mut self, paper: &Paper, stage: Stage, error: &HunterError) {
    let paper_id = paper.identifier.clone();
    self.skipped.push(Skip { paper_id, stage, reason: error.to_string() });
  }
}

/// Runs harvesting, admission, archiving and the optional LLM phases.
pub struct Pipeline {
  harvester:  Harvester,
  gatekeeper: Gatekeeper,
  archivist:  Archivist,
  analyst:    Option<Arc<Analyst>>,
  notifier:   Option<Box<dyn Notifier>>,
  run:        RunConfig,
  language:   String,
}

impl Pipeline {
  /// A pipeline without LLM or notification support, running the download phase only.
  pub fn new(harvester: Harvester, gatekeeper: Gatekeeper, archivist: Archivist) -> Self {
    Self {
      harvester,
      gatekeeper,
      archivist,
      analyst: None,
      notifier: None,
      run: RunConfig { summarize: false, ..RunConfig::default() },
      language: crate::config::AnalystConfig::default().target_language,
    }
  }

  /// Wires every component from `config`, with the search window ending on `today`.
  ///
  /// The configuration is validated first, so credential problems surface before any network
  /// call. The analyst is only built when an enabled feature needs it, and it doubles as the
  /// gatekeeper's fallback voter.
  pub fn from_config(config: &Config, today: NaiveDate) -> Result<Self> {
    config.validate()?;

    let analyst =
      if config.needs_llm() { Some(Arc::new(Analyst::from_config(config)?)) } else { None };
    let voter = analyst.clone().map(|a| a as Arc<dyn Voter>);

    let harvester =
      Harvester::new(ArxivApi::new(&config.search, config.retry)?, &config.search, today);
    let gatekeeper = Gatekeeper::from_config(&config.gatekeeper, voter)?;
    let archivist = Archivist::from_config(&config.archivist, config.retry)?;

    let mut pipeline = Self::new(harvester, gatekeeper, archivist).with_run_config(&config.run);
    pipeline.analyst = analyst;
    pipeline.language = config.analyst.target_language.clone();
    if config.run.telegram {
      let notifier = TelegramNotifier::from_config(&config.telegram)?.with_retry(config.retry);
      pipeline = pipeline.with_notifier(notifier);
    }
    Ok(pipeline)
  }

  /// Uses `analyst` for summaries and translations.
  pub fn with_analyst(mut self, analyst: Arc<Analyst>) -> Self {
    self.analyst = Some(analyst);
    self
  }

  /// Pushes translation messages through `notifier`.
  pub fn with_notifier(mut self, notifier: impl Notifier + 'static) -> Self {
    self.notifier = Some(Box::new(notifier));
    self
  }

  /// Selects the optional phases and the download limit.
  pub fn with_run_config(mut self, run: &RunConfig) -> Self {
    self.run = run.clone();
    self
  }

  /// Sets the language translations are labelled with.
  pub fn with_language(mut self, language: &str) -> Self {
    self.language = language.to_string();
    self
  }

  /// Executes one run.
  ///
  /// Returns an error only when harvesting fails; artifacts archived before that point stay on
  /// disk.
  pub async fn run(&mut self) -> Result<RunReport> {
    let mut report = RunReport::default();

    self.download(&mut report).await?;
    info!(
      "Download phase done: {} candidates, {} admitted, {} archived",
      report.candidates,
      report.admitted(),
      report.archived.len()
    );

    match (&self.analyst, self.run.summarize) {
      (Some(analyst), true) => self.summarize(analyst, &mut report).await,
      (None, true) => warn!("Summaries requested but no LLM is configured, skipping"),
      (_, false) => info!("Summary step skipped"),
    }

    if self.run.translate_abstracts {
      match &self.analyst {
        Some(analyst) => self.translate(analyst, &mut report).await,
        None => warn!("Translation requested but no LLM is configured, skipping"),
      }
    }

    info!("Finished. Archived {} papers, {} skips", report.archived.len(), report.skipped.len());
    Ok(report)
  }

  async fn download(&mut self, report: &mut RunReport) -> Result<()> {
    let Self { harvester, gatekeeper, archivist, run, .. } = self;

    let mut candidates = std::pin::pin!(harvester.stream());
    while let Some(paper) = candidates.try_next().await? {
      report.candidates += 1;
      let decision = gatekeeper.admit(&paper).await;
      let admitted = decision.admitted;
      report.decisions.push(decision.clone());
      if !admitted {
        trace!("Rejected {}", paper.identifier);
        continue;
      }

      match archivist.archive(&paper, &decision).await {
        Ok(artifact) => report.archived.push(artifact),
        Err(e) => {
          warn!("Failed to download {}: {e}", paper.identifier);
          report.skip(&paper, Stage::Download, &e);
          continue;
        },
      }

      if run.limit.is_some_and(|limit| report.archived.len() >= limit) {
        info!("Reached the limit of {} papers", report.archived.len());
        break;
      }
    }
    Ok(())
  }

  async fn summarize(&self, analyst: &Analyst, report: &mut RunReport) {
    for artifact in &report.archived {
      let summary = match analyst.summarize(artifact, self.run.translate_abstracts).await {
        Ok(summary) => summary,
        Err(e) => {
          warn!("Failed to summarize {}: {e}", artifact.paper.identifier);
          report.skipped.push(Skip {
            paper_id: artifact.paper.identifier.clone(),
            stage:    Stage::Summary,
            reason:   e.to_string(),
          });
          continue;
        },
      };

      if let Err(e) = self.archivist.write_summary(artifact, &summary) {
        warn!("Failed to write summary for {}: {e}", artifact.paper.identifier);
        report.skipped.push(Skip {
          paper_id: artifact.paper.identifier.clone(),
          stage:    Stage::Summary,
          reason:   e.to_string(),
        });
        continue;
      }
      info!("Summarized {}", artifact.paper);
      report.summaries.push(summary);
    }
  }

  async fn translate(&self, analyst: &Analyst, report: &mut RunReport) {
    for artifact in report.archived.clone() {
      let paper = &artifact.paper;
      let cached = report
        .summaries
        .iter()
        .find(|s| s.paper_id == paper.identifier)
        .and_then(|s| s.translated_abstract.clone());

      let translation = match cached {
        Some(translation) => translation,
        None => match analyst.translate(paper).await {
          Ok(translation) => translation,
          Err(e) => {
            warn!("Failed to translate {}: {e}", paper.identifier);
            report.skip(paper, Stage::Translation, &e);
            continue;
          },
        },
      };

      let message = format_translation_message(paper, &self.language, &translation);

      if let Some(notifier) = &self.notifier {
        match notifier.send_message(&message).await {
          Ok(()) if self.run.cover_image => {
            if let Err(e) = push_cover(notifier.as_ref(), &artifact).await {
              warn!("Failed to push the cover of {} to Telegram: {e}", paper.identifier);
              report.skip(paper, Stage::Notification, &e);
            }
          },
          Ok(()) => {},
          Err(e) => {
            warn!("Failed to push {} to Telegram: {e}", paper.identifier);
            report.skip(paper, Stage::Notification, &e);
          },
        }
      }
      report.messages.push(message);
    }
  }
}

/// Sends the largest first-page JPEG of an archived PDF, captioned with the paper's title.
async fn push_cover(notifier: &dyn Notifier, artifact: &ArchivedArtifact) -> Result<()> {
  let cover = match pdf::cover_image(&artifact.path) {
    Ok(Some(cover)) => cover,
    Ok(None) => {
      debug!("{} has no embedded first-page picture", artifact.paper.identifier);
      return Ok(());
    },
    Err(e) => {
      warn!("Could not read the cover of {}: {e}", artifact.paper.identifier);
      return Ok(());
    },
  };
  let caption = format!("{} ({})", artifact.paper.title, artifact.paper.identifier);
  notifier.send_photo(&cover.jpeg, &caption).await
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    archivist::tests::{FakeFetcher, FAKE_PDF},
    config::{AnalystConfig, SearchConfig},
    gatekeeper::{Layer, MetadataWhitelist},
    harvester::tests::FakeSource,
    llm::{tests::ScriptedBackend, ChatBackend, ChatRequest},
    notifier::tests::RecordingNotifier,
    paper::tests::paper,
    pdf::tests::illustrated_pdf,
  };

  const SUMMARY: &str = r#"{"one_liner": "o", "problem": "p", "method": "m", "results": "r",
    "industry_value": "i"}"#;

  fn today() -> NaiveDate { NaiveDate::from_ymd_opt(2024, 5, 10).unwrap() }

  fn google_paper(id: &str, day: u32) -> Paper {
    let mut p = paper(id, &format!("Recommender {id}"), (2024, 5, day));
    p.authors[0].affiliation = Some("Google Research".into());
    p
  }

  fn harvester(records: Vec<Paper>) -> Harvester {
    let config = SearchConfig { keywords: vec!["recommender".into()], ..SearchConfig::default() };
    Harvester::new(FakeSource::new(records).0, &config, today())
  }

  fn gatekeeper() -> Gatekeeper {
    Gatekeeper::new().with_check(MetadataWhitelist::new([("Google", r"\bgoogle\b")]).unwrap())
  }

  #[traced_test]
  #[tokio::test]
  async fn test_partial_download_failure() {
    let dir = tempdir().unwrap();
    let records: Vec<Paper> =
      (1..=5).map(|i| google_paper(&format!("2405.0000{i}"), 10)).collect();
    let fetcher = FakeFetcher::serving(FAKE_PDF).failing_on("http://arxiv.org/pdf/2405.00003");
    let archivist = Archivist::new(dir.path(), fetcher);

    let report = Pipeline::new(harvester(records), gatekeeper(), archivist).run().await.unwrap();

    assert_eq!(report.admitted(), 5);
    assert_eq!(report.archived.len(), 4);
    assert_eq!(
      report.skipped,
      vec![Skip {
        paper_id: "2405.00003".into(),
        stage:    Stage::Download,
        reason:   "HTTP 404: not found".into(),
      }]
    );
    assert!(logs_contain("Failed to download 2405.00003"));
    assert_eq!(std::fs::read_dir(dir.path().join("2024-05-10")).unwrap().count(), 9);
  }

  #[tokio::test]
  async fn test_rejections_and_limit() {
    let dir = tempdir().unwrap();
    let mut outsider = paper("2405.00009", "Recommender outsider", (2024, 5, 10));
    outsider.authors[0].affiliation = Some("ETH Zurich".into());
    let records = vec![
      google_paper("2405.00001", 10),
      outsider,
      google_paper("2405.00002", 9),
      google_paper("2405.00003", 9),
    ];
    let archivist = Archivist::new(dir.path(), FakeFetcher::serving(FAKE_PDF));
    let run = RunConfig { summarize: false, limit: Some(2), ..RunConfig::default() };

    let report = Pipeline::new(harvester(records), gatekeeper(), archivist)
      .with_run_config(&run)
      .run()
      .await
      .unwrap();

    assert_eq!(report.candidates, 3);
    assert_eq!(report.rejected(), 1);
    let archived: Vec<&str> =
      report.archived.iter().map(|a| a.paper.identifier.as_str()).collect();
    assert_eq!(archived, vec!["2405.00001", "2405.00002"]);
    assert!(report.archived.iter().all(|a| a.layer == Layer::MetadataWhitelist));
    assert_eq!(report.archived[0].company.as_deref(), Some("Google"));
  }

  #[tokio::test]
  async fn test_harvest_failure_is_fatal() {
    let dir = tempdir().unwrap();
    let records: Vec<Paper> = (0..150)
      .map(|i| {
        let mut p = google_paper(&format!("p{i:03}"), 10);
        p.published -= chrono::TimeDelta::minutes(i);
        p
      })
      .collect();
    let config = SearchConfig { keywords: vec!["recommender".into()], ..SearchConfig::default() };
    let source = FakeSource::new(records).0.failing_at(100);
    let harvester = Harvester::new(source, &config, today());
    let archivist = Archivist::new(dir.path(), FakeFetcher::serving(FAKE_PDF));

    let result = Pipeline::new(harvester, gatekeeper(), archivist).run().await;

    assert!(matches!(result, Err(HunterError::HttpStatus(503, _))));
    // Papers archived before the failure stay on disk. The oldest record of the first page waits
    // for the second page and is never archived.
    let stored = std::fs::read_dir(dir.path().join("2024-05-10")).unwrap().count();
    assert_eq!(stored, 99 * 2 + 1);
  }

  #[tokio::test]
  async fn test_summaries_translations_and_notifications() {
    let dir = tempdir().unwrap();
    let records = vec![google_paper("2405.00001", 10), google_paper("2405.00002", 10)];
    let backend = ScriptedBackend::new(vec![
      Ok(SUMMARY.to_string()),
      Ok("翻译一".to_string()),
      Err(HunterError::HttpStatus(500, "down".into())),
    ]);
    let analyst = Arc::new(Analyst::new(backend, &AnalystConfig::default()));
    let notifier = RecordingNotifier::default();
    let sent = notifier.sent.clone();
    let run = RunConfig { summarize: true, translate_abstracts: true, ..RunConfig::default() };
    let archivist = Archivist::new(dir.path(), FakeFetcher::serving(FAKE_PDF));

    let report = Pipeline::new(harvester(records), gatekeeper(), archivist)
      .with_analyst(analyst)
      .with_notifier(notifier)
      .with_run_config(&run)
      .run()
      .await
      .unwrap();

    assert_eq!(report.archived.len(), 2);
    assert_eq!(report.summaries.len(), 1);
    assert_eq!(report.summaries[0].translated_abstract.as_deref(), Some("翻译一"));
    assert_eq!(report.skipped.len(), 2);
    assert_eq!(report.skipped[0].stage, Stage::Summary);
    assert_eq!(report.skipped[1].stage, Stage::Translation);
    assert_eq!(report.messages.len(), 1);
    assert!(report.messages[0].contains("Translation (Chinese):\n翻译一"));
    assert_eq!(*sent.lock().unwrap(), report.messages);

    let markdown = std::fs::read_to_string(report.archived[0].markdown_path()).unwrap();
    assert!(markdown.contains("### Summary"));
  }

  /// Replies with a valid summary after deleting the archive it was asked about.
  struct DiskWiper(PathBuf);

  #[async_trait]
  impl ChatBackend for DiskWiper {
    async fn complete(&self, _: &ChatRequest) -> Result<String> {
      std::fs::remove_dir_all(&self.0)?;
      Ok(SUMMARY.to_string())
    }
  }

  #[traced_test]
  #[tokio::test]
  async fn test_unwritable_summary_is_skipped() {
    let dir = tempdir().unwrap();
    let wiper = DiskWiper(dir.path().join("2024-05-10"));
    let analyst = Analyst::new(wiper, &AnalystConfig::default());
    let archivist = Archivist::new(dir.path(), FakeFetcher::serving(FAKE_PDF));

    let records = vec![google_paper("2405.00001", 10)];

    let report = Pipeline::new(harvester(records), gatekeeper(), archivist)
      .with_analyst(Arc::new(analyst))
      .with_run_config(&RunConfig::default())
      .run()
      .await
      .unwrap();

    assert_eq!(report.archived.len(), 1);
    assert!(report.summaries.is_empty());
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].stage, Stage::Summary);
    assert!(logs_contain("Failed to write summary for 2405.00001"));
  }

  #[traced_test]
  #[tokio::test]
  async fn test_notification_failures_are_not_fatal() {
    let dir = tempdir().unwrap();
    let backend = ScriptedBackend::replying(&["Traduction"]);
    let analyst = Arc::new(Analyst::new(backend, &AnalystConfig::default()));
    let run = RunConfig { summarize: false, translate_abstracts: true, ..RunConfig::default() };
    let archivist = Archivist::new(dir.path(), FakeFetcher::serving(FAKE_PDF));

    let records = vec![google_paper("2405.00001", 10)];

    let report = Pipeline::new(harvester(records), gatekeeper(), archivist)
      .with_analyst(analyst)
      .with_notifier(RecordingNotifier { fail: true, ..RecordingNotifier::default() })
      .with_run_config(&run)
      .with_language("French")
      .run()
      .await
      .unwrap();

    assert_eq!(report.messages.len(), 1);
    assert!(report.messages[0].contains("Translation (French):\nTraduction"));
    assert_eq!(report.skipped[0].stage, Stage::Notification);
    assert!(logs_contain("Failed to push 2405.00001 to Telegram"));
  }

  #[tokio::test]
  async fn test_cover_follows_translation() {
    let dir = tempdir().unwrap();
    let backend = ScriptedBackend::replying(&["Traduction"]);
    let analyst = Arc::new(Analyst::new(backend, &AnalystConfig::default()));
    let run = RunConfig { summarize: false, translate_abstracts: true, ..RunConfig::default() };
    let pdf = illustrated_pdf(&[(640, 480, "DCTDecode", &b"figure one"[..])]);
    let archivist = Archivist::new(dir.path(), FakeFetcher::serving(&pdf));
    let notifier = RecordingNotifier::default();
    let (sent, photos) = (notifier.sent.clone(), notifier.photos.clone());

    let records = vec![google_paper("2405.00001", 10)];

    let report = Pipeline::new(harvester(records), gatekeeper(), archivist)
      .with_analyst(analyst)
      .with_notifier(notifier)
      .with_run_config(&run)
      .run()
      .await
      .unwrap();

    assert!(report.skipped.is_empty());
    assert_eq!(sent.lock().unwrap().len(), 1);
    let photos = photos.lock().unwrap();
    assert_eq!(photos.len(), 1);
    assert_eq!(photos[0].0, b"figure one");
    assert_eq!(photos[0].1, "Recommender 2405.00001 (2405.00001)");
  }

  #[tokio::test]
  async fn test_cover_push_can_be_disabled() {
    let dir = tempdir().unwrap();
    let backend = ScriptedBackend::replying(&["Traduction"]);
    let analyst = Arc::new(Analyst::new(backend, &AnalystConfig::default()));
    let run = RunConfig {
      summarize: false,
      translate_abstracts: true,
      cover_image: false,
      ..RunConfig::default()
    };
    let pdf = illustrated_pdf(&[(640, 480, "DCTDecode", &b"figure one"[..])]);
    let archivist = Archivist::new(dir.path(), FakeFetcher::serving(&pdf));
    let notifier = RecordingNotifier::default();
    let (sent, photos) = (notifier.sent.clone(), notifier.photos.clone());

    Pipeline::new(harvester(vec![google_paper("2405.00001", 10)]), gatekeeper(), archivist)
      .with_analyst(analyst)
      .with_notifier(notifier)
      .with_run_config(&run)
      .run()
      .await
      .unwrap();

    assert_eq!(sent.lock().unwrap().len(), 1);
    assert!(photos.lock().unwrap().is_empty());
  }

  #[test]
  fn test_from_config_validates_first() {
    let config = Config::default();
    let err = Pipeline::from_config(&config, today()).err().unwrap();
    assert!(matches!(err, HunterError::Config(_)));
  }
}

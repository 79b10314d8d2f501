//! Download and on-disk layout of admitted papers.
//!
//! Every admitted paper ends up in a directory named after its submission date:
//!
//! ```text
//! downloads/
//! └── 2024-05-09/
//!     ├── 2024-05-09_google_alice_researcher_scaling_laws_for_sequential_recommendation.pdf
//!     ├── 2024-05-09_google_alice_researcher_scaling_laws_for_sequential_recommendation.md
//!     └── Summary.md
//! ```
//!
//! A download is checked for the PDF header before anything touches the disk, then written to a
//! temporary file inside the day directory and moved to its canonical name, so a failed or
//! partial download never leaves anything behind. Filenames are claimed for the lifetime of an
//! [`Archivist`]: a second paper mapping to an already claimed name gets a `-2`, `-3`, ... suffix
//! instead of replacing it.

use std::{
  fs::OpenOptions,
  io::Write,
};

use reqwest::header::USER_AGENT;

use super::*;
use crate::{
  analyst::PaperSummary,
  config::ArchivistConfig,
  format::slugify,
  gatekeeper::{AdmissionDecision, Layer},
  harvester::HUNTER_USER_AGENT,
  retry::RetryPolicy,
};

/// Name of the cumulative per-day digest.
pub const SUMMARY_FILE: &str = "Summary.md";

/// Company placeholder used when no company was matched.
pub const UNKNOWN_COMPANY: &str = "Unknown";

/// Magic bytes every PDF starts with.
pub const PDF_MAGIC: &[u8] = b"%PDF-";

const COMPANY_SLUG_LEN: usize = 40;
const AUTHOR_SLUG_LEN: usize = 40;
const TITLE_SLUG_LEN: usize = 80;

/// Something that can fetch the bytes of a PDF.
#[async_trait]
pub trait PdfFetcher: Send + Sync {
  /// Downloads the document at `url`.
  async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// Fetches PDFs over HTTP.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
  /// HTTP client carrying the download timeout
  client: reqwest::Client,
  /// Retry policy for transient failures
  retry:  RetryPolicy,
}

impl HttpFetcher {
  /// A fetcher giving up on a single attempt after `timeout_secs`.
  pub fn new(timeout_secs: u64, retry: RetryPolicy) -> Result<Self> {
    let client = reqwest::Client::builder().timeout(Duration::from_secs(timeout_secs)).build()?;
    Ok(Self { client, retry })
  }
}

#[async_trait]
impl PdfFetcher for HttpFetcher {
  async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
    self
      .retry
      .run("PDF download", || async {
        let response = self.client.get(url).header(USER_AGENT, HUNTER_USER_AGENT).send().await?;

        let status = response.status();
        if !status.is_success() {
          let body = response.text().await.unwrap_or_default();
          return Err(HunterError::HttpStatus(status.as_u16(), body));
        }
        Ok(response.bytes().await?.to_vec())
      })
      .await
  }
}

/// A paper persisted to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedArtifact {
  /// The archived paper
  pub paper:      Paper,
  /// Canonical filename, including the `.pdf` extension
  pub filename:   String,
  /// Full path of the stored PDF
  pub path:       PathBuf,
  /// When the PDF was persisted
  pub created_at: DateTime<Utc>,
  /// Matched company label, if any
  pub company:    Option<String>,
  /// Admission layer that let the paper through
  pub layer:      Layer,
}

impl ArchivedArtifact {
  /// Path of the companion Markdown file.
  pub fn markdown_path(&self) -> PathBuf { self.path.with_extension("md") }

  /// Path of the digest of the day directory holding this artifact.
  pub fn digest_path(&self) -> PathBuf {
    self.path.parent().map_or_else(|| PathBuf::from(SUMMARY_FILE), |dir| dir.join(SUMMARY_FILE))
  }
}

/// The deterministic filename stem for a paper, before collision handling.
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use hunter::{archivist::base_stem, paper::{Author, Paper}};
///
/// let paper = Paper {
///   identifier:    "2405.05001v1".into(),
///   title:         "Scaling Laws for Sequential Recommendation".into(),
///   authors:       vec![Author::new("Alice Researcher")],
///   abstract_text: String::new(),
///   categories:    vec![],
///   published:     Utc.with_ymd_and_hms(2024, 5, 9, 17, 59, 0).unwrap(),
///   updated:       None,
///   pdf_url:       None,
/// };
/// assert_eq!(
///   base_stem(&paper, Some("Google DeepMind")),
///   "2024-05-09_google_deepmind_alice_researcher_scaling_laws_for_sequential_recommendation"
/// );
/// assert!(base_stem(&paper, None).starts_with("2024-05-09_Unknown_alice_researcher_"));
/// ```
pub fn base_stem(paper: &Paper, company: Option<&str>) -> String {
  let company = match company.filter(|c| !c.trim().is_empty()) {
    Some(company) => slugify(company, COMPANY_SLUG_LEN),
    None => UNKNOWN_COMPANY.to_string(),
  };
  format!(
    "{}_{company}_{}_{}",
    paper.submission_date().format("%Y-%m-%d"),
    slugify(paper.first_author(), AUTHOR_SLUG_LEN),
    slugify(&paper.title, TITLE_SLUG_LEN),
  )
}

/// Downloads admitted papers and lays them out on disk.
pub struct Archivist {
  /// Root holding the day directories
  base_dir: PathBuf,
  /// Where PDF bytes come from
  fetcher:  Box<dyn PdfFetcher>,
  /// Paths handed out so far
  claimed:  HashSet<PathBuf>,
}

impl Archivist {
  /// An archivist writing under `base_dir`.
  pub fn new(base_dir: impl Into<PathBuf>, fetcher: impl PdfFetcher + 'static) -> Self {
    Self { base_dir: base_dir.into(), fetcher: Box::new(fetcher), claimed: HashSet::new() }
  }

  /// An archivist downloading over HTTP with the settings in `config`.
  pub fn from_config(config: &ArchivistConfig, retry: RetryPolicy) -> Result<Self> {
    Ok(Self::new(&config.base_dir, HttpFetcher::new(config.timeout_secs, retry)?))
  }

  /// Root holding the day directories.
  pub fn base_dir(&self) -> &Path { &self.base_dir }

  /// Directory holding the papers submitted on `date`.
  pub fn day_dir(&self, date: NaiveDate) -> PathBuf {
    self.base_dir.join(date.format("%Y-%m-%d").to_string())
  }

  /// Downloads, verifies and stores one admitted paper, then writes its Markdown entries.
  pub async fn archive(
    &mut self,
    paper: &Paper,
    decision: &AdmissionDecision,
  ) -> Result<ArchivedArtifact> {
    let url = paper
      .pdf_url
      .as_deref()
      .ok_or_else(|| HunterError::MissingPdfUrl(paper.identifier.clone()))?;

    debug!("Downloading {} from {url}", paper.identifier);
    let bytes = self.fetcher.fetch(url).await?;
    verify_pdf(&bytes)?;

    let dir = self.day_dir(paper.submission_date());
    std::fs::create_dir_all(&dir)?;

    // Dropping the temporary file on any early return removes it.
    let mut temp =
      tempfile::Builder::new().prefix(".download-").suffix(".part").tempfile_in(&dir)?;
    temp.write_all(&bytes)?;
    temp.flush()?;

    let stem = base_stem(paper, decision.company.as_deref());
    let (filename, path) = self.claim(&dir, &stem);
    temp.persist(&path)?;

    let artifact = ArchivedArtifact {
      paper: paper.clone(),
      filename,
      path,
      created_at: Utc::now(),
      company: decision.company.clone(),
      layer: decision.layer,
    };

    let entry = render_entry(&artifact, None);
    std::fs::write(artifact.markdown_path(), &entry)?;
    append(&artifact.digest_path(), &entry)?;

    info!("Archived {} as {}", paper.identifier, artifact.filename);
    Ok(artifact)
  }

  /// Rewrites the per-paper Markdown with `summary` and appends the summary to the digest.
  pub fn write_summary(
    &self,
    artifact: &ArchivedArtifact,
    summary: &PaperSummary,
  ) -> Result<PathBuf> {
    let path = artifact.markdown_path();
    std::fs::write(&path, render_entry(artifact, Some(summary)))?;

    let mut digest =
      format!("### Digest: {} ({})\n\n", artifact.paper.title, artifact.paper.identifier);
    digest.push_str(&render_summary(summary));
    append(&artifact.digest_path(), &digest)?;

    debug!("Wrote summary for {} to {}", artifact.paper.identifier, path.display());
    Ok(path)
  }

  /// Picks the first unclaimed name for `stem` in `dir`.
  fn claim(&mut self, dir: &Path, stem: &str) -> (String, PathBuf) {
    let mut counter = 1;
    loop {
      let filename =
        if counter == 1 { format!("{stem}.pdf") } else { format!("{stem}-{counter}.pdf") };
      let path = dir.join(&filename);
      if self.claimed.insert(path.clone()) {
        if counter > 1 {
          debug!("{stem}.pdf already taken in this run, using {filename}");
        }
        return (filename, path);
      }
      counter += 1;
    }
  }
}

/// Checks the download is non-empty and starts with the PDF magic bytes.
fn verify_pdf(bytes: &[u8]) -> Result<()> {
  if bytes.is_empty() {
    return Err(HunterError::Integrity("downloaded file is empty".into()));
  }
  if !bytes.starts_with(PDF_MAGIC) {
    return Err(HunterError::Integrity("missing %PDF- header".into()));
  }
  Ok(())
}

fn append(path: &Path, text: &str) -> Result<()> {
  let mut file = OpenOptions::new().create(true).append(true).open(path)?;
  file.write_all(text.as_bytes())?;
  file.write_all(b"\n")?;
  Ok(())
}

/// Markdown block describing an artifact, with its summary when there is one.
pub fn render_entry(artifact: &ArchivedArtifact, summary: Option<&PaperSummary>) -> String {
  let paper = &artifact.paper;
  let authors = paper
    .authors
    .iter()
    .map(|a| match &a.affiliation {
      Some(affiliation) => format!("{} ({affiliation})", a.name),
      None => a.name.clone(),
    })
    .collect::<Vec<_>>()
    .join(", ");

  let mut out = format!("## {}\n\n", paper.title);
  out.push_str(&format!("- **arXiv ID**: {}\n", paper.identifier));
  out.push_str(&format!("- **Authors**: {authors}\n"));
  out.push_str(&format!("- **Categories**: {}\n", paper.categories.join(", ")));
  out.push_str(&format!("- **Submitted**: {}\n", paper.submission_date()));
  let company = artifact.company.as_deref().unwrap_or(UNKNOWN_COMPANY);
  out.push_str(&format!("- **Company**: {company}\n"));
  out.push_str(&format!("- **Admitted by**: {}\n", artifact.layer));
  out.push_str(&format!("- **Link**: {}\n", paper.abstract_url()));
  out.push_str(&format!("- **File**: `{}`\n\n", artifact.filename));
  out.push_str(&format!("### Abstract\n\n{}\n", paper.abstract_text));

  if let Some(summary) = summary {
    out.push('\n');
    out.push_str(&render_summary(summary));
  }
  out
}

fn render_summary(summary: &PaperSummary) -> String {
  let mut out = String::new();
  if summary.valid {
    out.push_str("### Summary\n\n");
    for (key, value) in &summary.fields {
      let value = match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
      };
      out.push_str(&format!("- **{key}**: {value}\n"));
    }
  } else {
    out.push_str("### Summary (unparsed model output)\n\n```\n");
    out.push_str(summary.raw.as_deref().unwrap_or_default());
    out.push_str("\n```\n");
  }

  if let Some(translated) = &summary.translated_abstract {
    out.push_str(&format!("\n### Translated abstract\n\n{translated}\n"));
  }
  out
}

#[cfg(test)]
pub(crate) mod tests {
  use std::sync::Mutex;

  use super::*;
  use crate::paper::tests::paper;

  /// Minimal bytes that pass the integrity check.
  pub(crate) const FAKE_PDF: &[u8] = b"%PDF-1.5\n%fake\n";

  /// Serves `body` for every URL except those listed as failing, which answer 404.
  pub(crate) struct FakeFetcher {
    pub(crate) body:    Vec<u8>,
    pub(crate) failing: HashSet<String>,
    pub(crate) fetched: Arc<Mutex<Vec<String>>>,
  }

  impl FakeFetcher {
    pub(crate) fn serving(body: &[u8]) -> Self {
      Self { body: body.to_vec(), failing: HashSet::new(), fetched: Arc::default() }
    }

    pub(crate) fn failing_on(mut self, url: &str) -> Self {
      self.failing.insert(url.to_string());
      self
    }
  }

  #[async_trait]
  impl PdfFetcher for FakeFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
      self.fetched.lock().unwrap().push(url.to_string());
      if self.failing.contains(url) {
        return Err(HunterError::HttpStatus(404, "not found".into()));
      }
      Ok(self.body.clone())
    }
  }

  fn decision(paper: &Paper, company: Option<&str>) -> AdmissionDecision {
    AdmissionDecision {
      paper_id: paper.identifier.clone(),
      admitted: true,
      layer:    Layer::MetadataWhitelist,
      company:  company.map(str::to_string),
    }
  }

  /// Files in `dir`, sorted by name.
  fn listing(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
      .unwrap()
      .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
      .collect();
    names.sort();
    names
  }

  #[tokio::test]
  async fn test_archive_layout() {
    let dir = tempdir().unwrap();
    let mut archivist = Archivist::new(dir.path(), FakeFetcher::serving(FAKE_PDF));
    let mut p = paper("2405.05001v1", "Scaling Laws for Sequential Recommendation", (2024, 5, 9));
    p.authors[0].affiliation = Some("Google Research".into());

    let artifact = archivist.archive(&p, &decision(&p, Some("Google"))).await.unwrap();

    let stem = "2024-05-09_google_alice_researcher_scaling_laws_for_sequential_recommendation";
    assert_eq!(artifact.filename, format!("{stem}.pdf"));
    assert_eq!(artifact.path, dir.path().join("2024-05-09").join(&artifact.filename));
    assert_eq!(std::fs::read(&artifact.path).unwrap(), FAKE_PDF);
    assert_eq!(
      listing(&dir.path().join("2024-05-09")),
      vec![format!("{stem}.md"), format!("{stem}.pdf"), SUMMARY_FILE.to_string()]
    );

    let markdown = std::fs::read_to_string(artifact.markdown_path()).unwrap();
    assert!(markdown.starts_with("## Scaling Laws for Sequential Recommendation"));
    assert!(markdown.contains("Alice Researcher (Google Research), Bob Scholar"));
    assert!(markdown.contains("- **Company**: Google"));
    assert!(markdown.contains("- **Admitted by**: metadata-whitelist"));
    assert!(markdown.contains("Abstract of Scaling Laws"));
    assert_eq!(std::fs::read_to_string(artifact.digest_path()).unwrap(), format!("{markdown}\n"));
  }

  #[tokio::test]
  async fn test_unknown_company_placeholder() {
    let dir = tempdir().unwrap();
    let mut archivist = Archivist::new(dir.path(), FakeFetcher::serving(FAKE_PDF));
    let p = paper("2405.05001v1", "Title", (2024, 5, 9));

    let artifact = archivist.archive(&p, &AdmissionDecision::skipped(&p)).await.unwrap();
    assert_eq!(artifact.filename, "2024-05-09_Unknown_alice_researcher_title.pdf");
    assert_eq!(artifact.layer, Layer::Skipped);
  }

  #[tokio::test]
  async fn test_collisions_get_suffixes() {
    let dir = tempdir().unwrap();
    let mut archivist = Archivist::new(dir.path(), FakeFetcher::serving(FAKE_PDF));
    let p = paper("2405.05001v1", "Same Title", (2024, 5, 9));
    let d = decision(&p, Some("Meta"));

    let first = archivist.archive(&p, &d).await.unwrap();
    let second = archivist.archive(&p, &d).await.unwrap();
    let third = archivist.archive(&p, &d).await.unwrap();

    assert_eq!(first.filename, "2024-05-09_meta_alice_researcher_same_title.pdf");
    assert_eq!(second.filename, "2024-05-09_meta_alice_researcher_same_title-2.pdf");
    assert_eq!(third.filename, "2024-05-09_meta_alice_researcher_same_title-3.pdf");
    assert!(first.path.exists() && second.path.exists() && third.path.exists());

    let digest = std::fs::read_to_string(first.digest_path()).unwrap();
    assert_eq!(digest.matches("## Same Title").count(), 3);
  }

  #[tokio::test]
  async fn test_separate_runs_share_base_name() {
    let dir = tempdir().unwrap();
    let p = paper("2405.05001v1", "Same Title", (2024, 5, 9));
    let d = decision(&p, None);

    let first = Archivist::new(dir.path(), FakeFetcher::serving(FAKE_PDF)).archive(&p, &d).await;
    let second = Archivist::new(dir.path(), FakeFetcher::serving(FAKE_PDF)).archive(&p, &d).await;
    assert_eq!(first.unwrap().filename, second.unwrap().filename);
  }

  #[tokio::test]
  async fn test_integrity_failures_leave_nothing_behind() {
    let dir = tempdir().unwrap();
    let p = paper("2405.05001v1", "Title", (2024, 5, 9));
    let d = decision(&p, None);

    let mut html = Archivist::new(dir.path(), FakeFetcher::serving(b"<html>captcha</html>"));
    assert!(matches!(html.archive(&p, &d).await, Err(HunterError::Integrity(_))));

    let mut empty = Archivist::new(dir.path(), FakeFetcher::serving(b""));
    assert!(matches!(empty.archive(&p, &d).await, Err(HunterError::Integrity(_))));

    assert!(!dir.path().join("2024-05-09").exists());
  }

  #[tokio::test]
  async fn test_download_errors_and_missing_links() {
    let dir = tempdir().unwrap();
    let mut p = paper("2405.05001v1", "Title", (2024, 5, 9));
    let fetcher = FakeFetcher::serving(FAKE_PDF).failing_on("http://arxiv.org/pdf/2405.05001v1");
    let mut archivist = Archivist::new(dir.path(), fetcher);

    let result = archivist.archive(&p, &decision(&p, None)).await;
    assert!(matches!(result, Err(HunterError::HttpStatus(404, _))));
    assert!(!dir.path().join("2024-05-09").exists());

    p.pdf_url = None;
    let result = archivist.archive(&p, &decision(&p, None)).await;
    assert!(matches!(result, Err(HunterError::MissingPdfUrl(id)) if id == "2405.05001v1"));
  }

  #[tokio::test]
  async fn test_write_summary() {
    let dir = tempdir().unwrap();
    let mut archivist = Archivist::new(dir.path(), FakeFetcher::serving(FAKE_PDF));
    let p = paper("2405.05001v1", "Title", (2024, 5, 9));
    let artifact = archivist.archive(&p, &decision(&p, Some("Google"))).await.unwrap();

    let summary = PaperSummary {
      paper_id:            p.identifier.clone(),
      artifact_path:       artifact.path.clone(),
      fields:              BTreeMap::from([(
        "one_liner".to_string(),
        serde_json::Value::String("Bigger is better.".into()),
      )]),
      raw:                 None,
      translated_abstract: Some("Résumé traduit.".into()),
      generated_at:        Utc::now(),
      valid:               true,
    };
    let path = archivist.write_summary(&artifact, &summary).unwrap();

    let markdown = std::fs::read_to_string(path).unwrap();
    assert!(markdown.contains("- **one_liner**: Bigger is better."));
    assert!(markdown.contains("### Translated abstract\n\nRésumé traduit."));
    assert_eq!(markdown.matches("## Title").count(), 1);

    let digest = std::fs::read_to_string(artifact.digest_path()).unwrap();
    assert!(digest.contains("### Digest: Title (2405.05001v1)"));
    assert!(digest.contains("Bigger is better."));
  }

  #[test]
  fn test_invalid_summary_keeps_raw_text() {
    let p = paper("2405.05001v1", "Title", (2024, 5, 9));
    let artifact = ArchivedArtifact {
      paper:      p.clone(),
      filename:   "x.pdf".into(),
      path:       PathBuf::from("/tmp/2024-05-09/x.pdf"),
      created_at: Utc::now(),
      company:    None,
      layer:      Layer::EmailHeuristic,
    };
    let summary = PaperSummary {
      paper_id:            p.identifier,
      artifact_path:       artifact.path.clone(),
      fields:              BTreeMap::new(),
      raw:                 Some("I cannot comply".into()),
      translated_abstract: None,
      generated_at:        Utc::now(),
      valid:               false,
    };

    let markdown = render_entry(&artifact, Some(&summary));
    assert!(markdown.contains("- **Company**: Unknown"));
    assert!(markdown.contains("### Summary (unparsed model output)\n\n```\nI cannot comply\n```"));
    assert_eq!(artifact.digest_path(), PathBuf::from("/tmp/2024-05-09/Summary.md"));
  }
}

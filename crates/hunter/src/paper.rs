//! Paper metadata as produced by the harvester.
//!
//! A [`Paper`] is immutable once harvested: the gatekeeper, archivist and analyst only ever read
//! it. Its persisted trace is the archived filename and the Markdown written next to it.

use super::*;

/// One search result with the metadata the rest of the pipeline relies on.
///
/// # Examples
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use hunter::paper::{Author, Paper};
///
/// let paper = Paper {
///   identifier:    "2405.01234v1".into(),
///   title:         "Scaling Sequential Recommenders".into(),
///   authors:       vec![Author::new("Alice Researcher")],
///   abstract_text: "We study scaling laws for recommender systems.".into(),
///   categories:    vec!["cs.IR".into()],
///   published:     Utc.with_ymd_and_hms(2024, 5, 9, 17, 59, 0).unwrap(),
///   updated:       None,
///   pdf_url:       Some("http://arxiv.org/pdf/2405.01234v1".into()),
/// };
/// assert_eq!(paper.first_author(), "Alice Researcher");
/// assert!(paper.mentions_any(&["RECOMMENDER".to_string()]));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paper {
  /// Source-assigned identifier, unique per paper
  pub identifier:    String,
  /// Whitespace-normalized title
  pub title:         String,
  /// Authors in publication order
  pub authors:       Vec<Author>,
  /// Whitespace-normalized abstract
  pub abstract_text: String,
  /// Subject category tags
  pub categories:    Vec<String>,
  /// Submission timestamp, used for ordering and the date window
  pub published:     DateTime<Utc>,
  /// Last revision timestamp, when the source reports one
  pub updated:       Option<DateTime<Utc>>,
  /// Link to the PDF document
  pub pdf_url:       Option<String>,
}

/// A paper author with whatever institutional details the source exposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
  /// Full name
  pub name:        String,
  /// Institutional affiliation
  pub affiliation: Option<String>,
  /// Contact e-mail
  pub email:       Option<String>,
}

impl Author {
  /// An author known only by name.
  pub fn new(name: impl Into<String>) -> Self {
    Self { name: name.into(), affiliation: None, email: None }
  }

  /// Sets the affiliation.
  pub fn with_affiliation(mut self, affiliation: impl Into<String>) -> Self {
    self.affiliation = Some(affiliation.into());
    self
  }

  /// Sets the e-mail address.
  pub fn with_email(mut self, email: impl Into<String>) -> Self {
    self.email = Some(email.into());
    self
  }
}

impl Paper {
  /// Name of the first author, or `"unknown"` for anonymous records.
  pub fn first_author(&self) -> &str {
    self.authors.first().map(|a| a.name.as_str()).unwrap_or("unknown")
  }

  /// Calendar date (UTC) of submission.
  pub fn submission_date(&self) -> NaiveDate { self.published.date_naive() }

  /// Case-insensitive substring match of any keyword against title and abstract.
  pub fn mentions_any(&self, keywords: &[String]) -> bool {
    let haystack = format!("{} {}", self.title, self.abstract_text).to_lowercase();
    keywords
      .iter()
      .map(|k| k.trim().to_lowercase())
      .filter(|k| !k.is_empty())
      .any(|k| haystack.contains(&k))
  }

  /// Author names joined with commas.
  pub fn author_names(&self) -> String {
    self.authors.iter().map(|a| a.name.as_str()).collect::<Vec<_>>().join(", ")
  }

  /// Distinct affiliations in order of first appearance.
  pub fn affiliations(&self) -> Vec<&str> {
    let mut seen = HashSet::new();
    self
      .authors
      .iter()
      .filter_map(|a| a.affiliation.as_deref())
      .filter(|a| seen.insert(*a))
      .collect()
  }

  /// Link to the abstract page, derived from the PDF link when possible.
  pub fn abstract_url(&self) -> String {
    match &self.pdf_url {
      Some(pdf) if pdf.contains("/pdf/") =>
        pdf.replacen("/pdf/", "/abs/", 1).trim_end_matches(".pdf").to_string(),
      _ => format!("https://arxiv.org/abs/{}", self.identifier),
    }
  }
}

impl Display for Paper {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{} ({})", self.title, self.identifier)
  }
}

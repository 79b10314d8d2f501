//! Paginated, deduplicated, time-windowed harvesting.
//!
//! The [`Harvester`] turns a keyword set, a category set and a trailing-day window into a lazy
//! stream of [`Paper`]s. Pages are only requested as the stream is polled, and every call to
//! [`Harvester::stream`] starts again from the first page, so the sequence can be re-iterated
//! from scratch.
//!
//! Paging stops as soon as one of these holds:
//! - a page comes back shorter than requested
//! - the oldest record of a page precedes the date window
//! - the maximum result count is reached
//!
//! The remote API is hidden behind [`PageSource`]; [`ArxivApi`] is the production
//! implementation.
//!
//! # Examples
//!
//! ```no_run
//! use futures::TryStreamExt;
//! use hunter::{
//!   config::SearchConfig,
//!   harvester::{ArxivApi, Harvester},
//!   retry::RetryPolicy,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SearchConfig::default();
//! let api = ArxivApi::new(&config, RetryPolicy::default())?;
//! let today = chrono::Utc::now().date_naive();
//! let harvester = Harvester::new(api, &config, today);
//!
//! let mut stream = std::pin::pin!(harvester.stream());
//! while let Some(paper) = stream.try_next().await? {
//!   println!("{paper}");
//! }
//! # Ok(())
//! # }
//! ```

use chrono::Days;
use futures::{stream, Stream, TryStreamExt};
use reqwest::{header::USER_AGENT, Url};

use super::*;
use crate::{config::SearchConfig, retry::RetryPolicy};

pub mod atom;

/// `User-Agent` sent to the search API.
pub const HUNTER_USER_AGENT: &str = concat!("hunter/", env!("CARGO_PKG_VERSION"));

/// An inclusive range of submission dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
  /// First day included
  pub since: NaiveDate,
  /// Last day included
  pub until: NaiveDate,
}

impl DateWindow {
  /// The `last_n_days` days before `today`, plus `today` itself to tolerate timezone skew.
  pub fn trailing(today: NaiveDate, last_n_days: u32) -> Self {
    let since = today.checked_sub_days(Days::new(last_n_days.into())).unwrap_or(NaiveDate::MIN);
    Self { since, until: today }
  }

  /// Whether `date` falls inside the window.
  pub fn contains(&self, date: NaiveDate) -> bool { self.since <= date && date <= self.until }

  /// Whether `date` is older than the window.
  pub fn precedes(&self, date: NaiveDate) -> bool { date < self.since }
}

/// What to ask the search API for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
  /// Keyword phrases, OR-ed together
  pub keywords:   Vec<String>,
  /// Categories, OR-ed together; empty means no category filter
  pub categories: Vec<String>,
  /// Submission date window
  pub window:     DateWindow,
}

impl SearchQuery {
  /// Builds a query, dropping blank keywords and categories.
  pub fn new(keywords: &[String], categories: &[String], window: DateWindow) -> Self {
    let clean = |items: &[String]| {
      items.iter().map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect::<Vec<_>>()
    };
    Self { keywords: clean(keywords), categories: clean(categories), window }
  }

  /// Renders the arXiv `search_query` expression.
  ///
  /// ```
  /// use chrono::NaiveDate;
  /// use hunter::harvester::{DateWindow, SearchQuery};
  ///
  /// let window = DateWindow::trailing(NaiveDate::from_ymd_opt(2024, 5, 10).unwrap(), 1);
  /// let query = SearchQuery::new(&["CTR prediction".into()], &["cs.IR".into()], window);
  /// assert_eq!(
  ///   query.to_arxiv_query(),
  ///   r#"(all:"CTR prediction") AND submittedDate:[202405090000 TO 202405102359] AND (cat:cs.IR)"#
  /// );
  /// ```
  pub fn to_arxiv_query(&self) -> String {
    let keywords = self
      .keywords
      .iter()
      .map(|k| format!("all:\"{}\"", k.replace('"', "")))
      .collect::<Vec<_>>()
      .join(" OR ");
    let dates = format!(
      "submittedDate:[{}0000 TO {}2359]",
      self.window.since.format("%Y%m%d"),
      self.window.until.format("%Y%m%d")
    );
    let mut query = format!("({keywords}) AND {dates}");
    if !self.categories.is_empty() {
      let categories =
        self.categories.iter().map(|c| format!("cat:{c}")).collect::<Vec<_>>().join(" OR ");
      query.push_str(&format!(" AND ({categories})"));
    }
    query
  }
}

/// A remote API that serves search results one page at a time.
#[async_trait]
pub trait PageSource: Send + Sync {
  /// Fetches up to `size` records starting at offset `start`.
  async fn fetch_page(&self, query: &SearchQuery, start: usize, size: usize)
    -> Result<Vec<Paper>>;
}

/// The arXiv Atom export API.
#[derive(Debug, Clone)]
pub struct ArxivApi {
  /// HTTP client carrying the request timeout
  client: reqwest::Client,
  /// Query endpoint
  url:    Url,
  /// Retry policy for transient failures
  retry:  RetryPolicy,
}

impl ArxivApi {
  /// Creates a client for the endpoint and timeout in `config`.
  pub fn new(config: &SearchConfig, retry: RetryPolicy) -> Result<Self> {
    let client =
      reqwest::Client::builder().timeout(Duration::from_secs(config.timeout_secs)).build()?;
    Ok(Self { client, url: Url::parse(&config.api_url)?, retry })
  }
}

#[async_trait]
impl PageSource for ArxivApi {
  async fn fetch_page(
    &self,
    query: &SearchQuery,
    start: usize,
    size: usize,
  ) -> Result<Vec<Paper>> {
    let search_query = query.to_arxiv_query();
    debug!("Requesting arXiv page start={start} size={size}: {search_query}");

    self
      .retry
      .run("arXiv query", || async {
        let response = self
          .client
          .get(self.url.clone())
          .header(USER_AGENT, HUNTER_USER_AGENT)
          .query(&[
            ("search_query", search_query.clone()),
            ("start", start.to_string()),
            ("max_results", size.to_string()),
            ("sortBy", "submittedDate".to_string()),
            ("sortOrder", "descending".to_string()),
          ])
          .send()
          .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
          return Err(HunterError::HttpStatus(status.as_u16(), body));
        }
        atom::parse_feed(&body)
      })
      .await
  }
}

/// Produces the candidate stream for one search.
pub struct Harvester {
  /// Where pages come from
  source:                Box<dyn PageSource>,
  /// The search being run
  query:                 SearchQuery,
  /// Records requested per page
  page_size:             usize,
  /// Maximum records yielded
  max_results:           usize,
  /// Drop records that mention none of the keywords
  require_keyword_match: bool,
}

/// Paging state of one pass over the results.
#[derive(Default)]
struct Cursor {
  start:     usize,
  buffer:    VecDeque<Paper>,
  /// Records tied with the oldest timestamp seen so far, released once a later page moves past
  /// that timestamp or the results run out
  held:      Vec<Paper>,
  seen:      HashSet<String>,
  yielded:   usize,
  exhausted: bool,
}

impl Harvester {
  /// Creates a harvester for `config`, with the date window ending on `today`.
  pub fn new(source: impl PageSource + 'static, config: &SearchConfig, today: NaiveDate) -> Self {
    let window = DateWindow::trailing(today, config.last_n_days);
    Self {
      source:                Box::new(source),
      query:                 SearchQuery::new(&config.keywords, &config.categories, window),
      page_size:             config.page_size.max(1),
      max_results:           config.max_results,
      require_keyword_match: config.require_keyword_match,
    }
  }

  /// The query this harvester runs.
  pub fn query(&self) -> &SearchQuery { &self.query }

  /// A fresh pass over the results, starting from the first page.
  ///
  /// Within a page records are ordered by submission time descending, ties broken by identifier
  /// ascending; the API returns pages in the same order. A fetch error ends the stream after the
  /// records already yielded.
  pub fn stream(&self) -> impl Stream<Item = Result<Paper>> + '_ {
    info!(
      "Searching with keywords={:?}, categories={:?}, window={} to {}",
      self.query.keywords, self.query.categories, self.query.window.since, self.query.window.until
    );
    stream::try_unfold(Cursor::default(), move |cursor| self.advance(cursor))
  }

  /// Materializes a full pass, sorted by submission time descending then identifier.
  pub async fn collect(&self) -> Result<Vec<Paper>> {
    let mut papers: Vec<Paper> = self.stream().try_collect().await?;
    sort_papers(&mut papers);
    info!("Fetched {} papers", papers.len());
    Ok(papers)
  }

  async fn advance(&self, mut cursor: Cursor) -> Result<Option<(Paper, Cursor)>> {
    loop {
      if cursor.yielded >= self.max_results {
        return Ok(None);
      }
      if let Some(paper) = cursor.buffer.pop_front() {
        cursor.yielded += 1;
        return Ok(Some((paper, cursor)));
      }
      if cursor.exhausted {
        return Ok(None);
      }
      self.fill(&mut cursor).await?;
    }
  }

  /// Fetches the next page into the cursor buffer.
  async fn fill(&self, cursor: &mut Cursor) -> Result<()> {
    let mut page = self.source.fetch_page(&self.query, cursor.start, self.page_size).await?;
    debug!("Page at offset {} returned {} records", cursor.start, page.len());

    cursor.start += self.page_size;
    if page.len() < self.page_size || cursor.start >= self.max_results {
      cursor.exhausted = true;
    }

    sort_papers(&mut page);
    if page.last().is_some_and(|oldest| self.query.window.precedes(oldest.submission_date())) {
      debug!("Page reaches past {}, stopping", self.query.window.since);
      cursor.exhausted = true;
    }

    let mut batch = std::mem::take(&mut cursor.held);
    for paper in page {
      if !self.query.window.contains(paper.submission_date()) {
        trace!("Outside window: {}", paper.identifier);
        continue;
      }
      if self.require_keyword_match && !paper.mentions_any(&self.query.keywords) {
        debug!("Skip (keyword miss): {}", paper.title);
        continue;
      }
      if cursor.seen.insert(paper.identifier.clone()) {
        batch.push(paper);
      }
    }
    sort_papers(&mut batch);

    if !cursor.exhausted {
      if let Some(oldest) = batch.last().map(|p| p.published) {
        let split = batch.iter().rposition(|p| p.published != oldest).map_or(0, |i| i + 1);
        cursor.held = batch.split_off(split);
      }
    }
    cursor.buffer.extend(batch);
    Ok(())
  }
}

/// Sorts by submission time descending, ties broken by identifier ascending.
pub fn sort_papers(papers: &mut [Paper]) {
  papers.sort_by(|a, b| {
    b.published.cmp(&a.published).then_with(|| a.identifier.cmp(&b.identifier))
  });
}

//! arXiv Atom feed parsing.
//!
//! Walks the feed with a `quick-xml` event reader and keeps only what a [`Paper`] needs. Entries
//! missing an identifier, a title or a parseable submission date are dropped with a warning
//! rather than failing the whole page.

use quick_xml::{
  events::{attributes::Attributes, Event},
  Reader,
};

use super::*;

/// Fields of the entry currently being read.
#[derive(Default)]
struct EntryState {
  id:         String,
  title:      String,
  summary:    String,
  published:  String,
  updated:    String,
  authors:    Vec<Author>,
  categories: Vec<String>,
  pdf_url:    Option<String>,
  author:     Option<Author>,
}

/// Parses one page of an arXiv Atom response.
pub fn parse_feed(xml: &str) -> Result<Vec<Paper>> {
  let mut reader = Reader::from_str(xml);
  reader.config_mut().trim_text(true);

  let mut papers = Vec::new();
  let mut path: Vec<String> = Vec::new();
  let mut entry: Option<EntryState> = None;

  loop {
    match reader.read_event()? {
      Event::Start(e) => {
        let name = local_name(e.local_name().as_ref());
        if name == "entry" {
          entry = Some(EntryState::default());
        } else if let Some(state) = entry.as_mut() {
          if name == "author" {
            state.author = Some(Author::new(String::new()));
          } else {
            read_attributes(&name, e.attributes(), state);
          }
        }
        path.push(name);
      },
      Event::Empty(e) =>
        if let Some(state) = entry.as_mut() {
          read_attributes(&local_name(e.local_name().as_ref()), e.attributes(), state);
        },
      Event::Text(e) => {
        let (Some(state), Some(tag)) = (entry.as_mut(), path.last()) else { continue };
        let text = e.unescape().map_err(|e| HunterError::ApiError(e.to_string()))?;
        match (tag.as_str(), state.author.as_mut()) {
          ("name", Some(author)) => author.name.push_str(&text),
          ("affiliation", Some(author)) =>
            author.affiliation.get_or_insert_with(String::new).push_str(&text),
          ("email", Some(author)) => author.email.get_or_insert_with(String::new).push_str(&text),
          ("id", None) => state.id.push_str(&text),
          ("title", None) => state.title.push_str(&text),
          ("summary", None) => state.summary.push_str(&text),
          ("published", None) => state.published.push_str(&text),
          ("updated", None) => state.updated.push_str(&text),
          _ => (),
        }
      },
      Event::End(e) => {
        path.pop();
        match local_name(e.local_name().as_ref()).as_str() {
          "author" =>
            if let Some(state) = entry.as_mut() {
              if let Some(author) = state.author.take() {
                state.authors.push(clean_author(author));
              }
            },
          "entry" =>
            if let Some(state) = entry.take() {
              if let Some(paper) = finish_entry(state) {
                papers.push(paper);
              }
            },
          _ => (),
        }
      },
      Event::Eof => break,
      _ => (),
    }
  }

  trace!("Parsed {} entries from Atom feed", papers.len());
  Ok(papers)
}

/// Collapses internal whitespace and trims.
pub fn normalize_whitespace(text: &str) -> String {
  text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Extracts `2405.01234v1` from `http://arxiv.org/abs/2405.01234v1`.
pub fn identifier_from_url(url: &str) -> String {
  let url = url.trim().trim_end_matches('/');
  match url.rfind("/abs/") {
    Some(i) => url[i + "/abs/".len()..].to_string(),
    None => url.rsplit('/').next().unwrap_or(url).to_string(),
  }
}

fn local_name(bytes: &[u8]) -> String { String::from_utf8_lossy(bytes).into_owned() }

/// Picks up the PDF link and category terms, both carried in attributes.
fn read_attributes(name: &str, attributes: Attributes, state: &mut EntryState) {
  let attribute = |key: &str| {
    attributes
      .clone()
      .flatten()
      .find(|a| a.key.local_name().as_ref() == key.as_bytes())
      .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
  };

  match name {
    "link" if state.pdf_url.is_none() =>
      if attribute("type").as_deref() == Some("application/pdf") {
        state.pdf_url = attribute("href");
      },
    "category" =>
      if let Some(term) = attribute("term").filter(|t| !t.trim().is_empty()) {
        if !state.categories.contains(&term) {
          state.categories.push(term);
        }
      },
    _ => (),
  }
}

fn clean_author(author: Author) -> Author {
  let clean = |s: Option<String>| s.map(|s| normalize_whitespace(&s)).filter(|s| !s.is_empty());
  Author {
    name:        normalize_whitespace(&author.name),
    affiliation: clean(author.affiliation),
    email:       clean(author.email),
  }
}

fn finish_entry(state: EntryState) -> Option<Paper> {
  let identifier = identifier_from_url(&state.id);
  let title = normalize_whitespace(&state.title);
  if identifier.is_empty() || title.is_empty() {
    warn!("Dropping Atom entry without identifier or title");
    return None;
  }

  let published = match parse_timestamp(&state.published) {
    Some(published) => published,
    None => {
      warn!("Dropping {identifier}: unparseable submission date {:?}", state.published);
      return None;
    },
  };

  Some(Paper {
    identifier,
    title,
    authors: state.authors,
    abstract_text: normalize_whitespace(&state.summary),
    categories: state.categories,
    published,
    updated: parse_timestamp(&state.updated),
    pdf_url: state.pdf_url,
  })
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(text.trim()).ok().map(|dt| dt.with_timezone(&Utc))
}

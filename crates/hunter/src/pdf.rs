//! Leading-page text and cover picture extraction from archived PDFs.
//!
//! Only the first few pages of a paper are read: title, abstract and introduction are enough for
//! a digest, and they keep the prompt small. Pages that fail to decode are skipped with a
//! warning so a single odd font does not lose the whole document.
//!
//! [`cover_image`] picks the largest JPEG drawn on the first page. Pages are not rasterized, so a
//! first page made only of text and vector graphics has no cover.

use lopdf::Document;

use super::*;
use crate::harvester::atom::normalize_whitespace;

/// Marker appended when extracted text is cut at the character budget.
pub const ELLIPSIS: &str = " ...";

/// Text pulled from the leading pages of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedText {
  /// Whitespace-normalized, possibly truncated text
  pub text:      String,
  /// Number of pages the text was read from
  pub pages:     usize,
  /// Whether the text was cut at the character budget
  pub truncated: bool,
}

/// Extracts text from PDF files with `lopdf`.
#[derive(Debug, Clone, Copy)]
pub struct PdfExtractor {
  /// Number of leading pages read
  max_pages: usize,
  /// Maximum characters kept
  max_chars: usize,
}

impl PdfExtractor {
  /// An extractor reading at most `max_pages` pages and keeping at most `max_chars` characters.
  pub fn new(max_pages: usize, max_chars: usize) -> Self { Self { max_pages, max_chars } }

  /// Reads the document at `path`.
  pub fn extract(&self, path: impl AsRef<Path>) -> Result<ExtractedText> {
    let document = Document::load(path.as_ref())?;
    Ok(self.extract_document(&document))
  }

  /// Reads a document held in memory.
  pub fn extract_bytes(&self, bytes: &[u8]) -> Result<ExtractedText> {
    let document = Document::load_mem(bytes)?;
    Ok(self.extract_document(&document))
  }

  fn extract_document(&self, document: &Document) -> ExtractedText {
    let page_numbers: Vec<u32> = document.get_pages().into_keys().take(self.max_pages).collect();

    let mut raw = String::new();
    for page in &page_numbers {
      match document.extract_text(&[*page]) {
        Ok(text) => {
          raw.push_str(&text);
          raw.push('\n');
        },
        Err(e) => warn!("Skipping page {page}: {e}"),
      }
    }

    let (text, truncated) = truncate_chars(&normalize_whitespace(&raw), self.max_chars);
    trace!("Extracted {} characters from {} pages", text.len(), page_numbers.len());
    ExtractedText { text, pages: page_numbers.len(), truncated }
  }
}

/// A JPEG embedded on the first page of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverImage {
  /// The image stream, a complete JPEG file
  pub jpeg:   Vec<u8>,
  /// Width in pixels
  pub width:  i64,
  /// Height in pixels
  pub height: i64,
}

/// The largest JPEG on the first page of the document at `path`, if there is one.
///
/// Only images stored with a lone `DCTDecode` filter qualify, since their stream is the JPEG
/// file itself.
pub fn cover_image(path: impl AsRef<Path>) -> Result<Option<CoverImage>> {
  let document = Document::load(path.as_ref())?;
  let Some(&page_id) = document.get_pages().values().next() else {
    return Ok(None);
  };

  let images = match document.get_page_images(page_id) {
    Ok(images) => images,
    Err(e) => {
      trace!("No images on the first page of {}: {e}", path.as_ref().display());
      return Ok(None);
    },
  };

  Ok(
    images
      .into_iter()
      .filter(|image| image.filters.as_deref().is_some_and(|f| f == ["DCTDecode"]))
      .max_by_key(|image| image.width * image.height)
      .map(|image| CoverImage {
        jpeg:   image.content.to_vec(),
        width:  image.width,
        height: image.height,
      }),
  )
}

/// Keeps at most `max_chars` characters, appending [`ELLIPSIS`] when anything was cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> (String, bool) {
  match text.char_indices().nth(max_chars) {
    Some((cut, _)) => (format!("{}{ELLIPSIS}", text[..cut].trim_end()), true),
    None => (text.to_string(), false),
  }
}

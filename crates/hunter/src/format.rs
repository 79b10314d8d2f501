//! Filesystem-safe name formatting.
//!
//! Slugs are lowercase ASCII: diacritics are stripped through NFKD decomposition, every run of
//! other characters collapses to a single `_`, and the result is cut to a bounded length so the
//! composed filename stays well under common filesystem limits.

use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

/// Separator placed between slug words.
pub const SEPARATOR: char = '_';

/// Slug used when nothing alphanumeric survives.
pub const EMPTY_SLUG: &str = "paper";

/// Turns arbitrary text into a filename component of at most `max_length` characters.
///
/// # Examples
///
/// ```
/// use hunter::format::slugify;
///
/// assert_eq!(slugify("Élodie Müller-Brandt", 40), "elodie_muller_brandt");
/// assert_eq!(slugify("LLMs for Rec: A Survey!", 10), "llms_for_r");
/// assert_eq!(slugify("???", 10), "paper");
/// ```
pub fn slugify(text: &str, max_length: usize) -> String {
  let mut slug = String::with_capacity(text.len());
  for c in text.nfkd().filter(|c| !is_combining_mark(*c)) {
    if c.is_ascii_alphanumeric() {
      slug.push(c.to_ascii_lowercase());
    } else if !slug.is_empty() && !slug.ends_with(SEPARATOR) {
      slug.push(SEPARATOR);
    }
  }

  // Slug is pure ASCII here, so byte truncation is safe.
  slug.truncate(max_length);
  let slug = slug.trim_matches(SEPARATOR);
  if slug.is_empty() {
    EMPTY_SLUG.to_string()
  } else {
    slug.to_string()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_collapses_separators() {
    assert_eq!(slugify("  Multi---Task   Learning  ", 80), "multi_task_learning");
  }

  #[test]
  fn test_strips_diacritics() {
    assert_eq!(slugify("Zoë Çelik", 80), "zoe_celik");
    assert_eq!(slugify("Ångström", 80), "angstrom");
  }

  #[test]
  fn test_non_latin_falls_back() {
    assert_eq!(slugify("推荐系统", 80), EMPTY_SLUG);
  }

  #[test]
  fn test_truncation_never_ends_with_separator() {
    let slug = slugify("abcd efgh", 5);
    assert_eq!(slug, "abcd");
    assert!(slugify(&"word ".repeat(100), 80).len() <= 80);
  }
}

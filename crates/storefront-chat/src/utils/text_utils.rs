//! Text helpers used when summarizing catalog content for prompts

use std::borrow::Cow;
use regex::Regex;
use lazy_static::lazy_static;

lazy_static! {
    static ref WHITESPACE_REGEX: Regex = Regex::new(r"\s+").unwrap();
    static ref HTML_TAG_REGEX: Regex = Regex::new(r"<[^>]*>").unwrap();
}

/// Marker appended to any text that was cut short.
pub const ELLIPSIS: &str = "...";

pub struct TextUtils;

impl TextUtils {
    /// Collapse runs of whitespace into single spaces and trim the ends
    pub fn normalize_whitespace(text: &str) -> Cow<'_, str> {
        if WHITESPACE_REGEX.is_match(text) {
            Cow::Owned(WHITESPACE_REGEX.replace_all(text, " ").trim().to_string())
        } else {
            Cow::Borrowed(text)
        }
    }

    /// Storefront bodies arrive as HTML; the model only needs the words.
    pub fn strip_html(text: &str) -> String {
        let without_tags = HTML_TAG_REGEX.replace_all(text, " ");
        let decoded = without_tags
            .replace("&nbsp;", " ")
            .replace("&amp;", "&")
            .replace("&quot;", "\"")
            .replace("&#39;", "'")
            .replace("&lt;", "<")
            .replace("&gt;", ">");
        Self::normalize_whitespace(&decoded).into_owned()
    }

    /// Keep at most `max_chars` characters, appending `...` when anything was cut.
    ///
    /// Counts chars rather than bytes so multi-byte product copy never splits
    /// inside a code point.
    pub fn truncate_with_ellipsis(text: &str, max_chars: usize) -> Cow<'_, str> {
        match text.char_indices().nth(max_chars) {
            None => Cow::Borrowed(text),
            Some((byte_pos, _)) => {
                let mut result = String::with_capacity(byte_pos + ELLIPSIS.len());
                result.push_str(&text[..byte_pos]);
                result.push_str(ELLIPSIS);
                Cow::Owned(result)
            }
        }
    }

    /// Strip markup, normalize, then truncate. Used for every catalog body.
    pub fn summarize(text: &str, max_chars: usize) -> String {
        let plain = Self::strip_html(text);
        Self::truncate_with_ellipsis(&plain, max_chars).into_owned()
    }
}

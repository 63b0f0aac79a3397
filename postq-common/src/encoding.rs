//! RFC 2047 encoded words for headers that may carry non-ASCII text.
//!
//! Subjects and display names are always wrapped as `=?utf-8?B?<base64>?=`,
//! even when they are plain ASCII or empty.

use base64::{Engine, engine::general_purpose::STANDARD};

const PREFIX: &str = "=?utf-8?B?";
const SUFFIX: &str = "?=";

/// Wrap the UTF-8 bytes of `text` in a base64 encoded word
#[must_use]
pub fn encode_word(text: &str) -> String {
    format!("{PREFIX}{}{SUFFIX}", STANDARD.encode(text.as_bytes()))
}

/// Recover the text from a word produced by [`encode_word`].
///
/// Returns `None` if `word` is not a base64 UTF-8 encoded word.
#[must_use]
pub fn decode_word(word: &str) -> Option<String> {
    let payload = word
        .get(..PREFIX.len())
        .filter(|prefix| prefix.eq_ignore_ascii_case(PREFIX))
        .and_then(|_| word[PREFIX.len()..].strip_suffix(SUFFIX))?;

    let bytes = STANDARD.decode(payload).ok()?;
    String::from_utf8(bytes).ok()
}

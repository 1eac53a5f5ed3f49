use std::sync::LazyLock;

use regex::Regex;

static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Turns a provider snippet into plain text: decodes HTML entities, drops
/// anything tag-like and collapses whitespace runs into single spaces.
pub fn clean(text: &str) -> String {
    let decoded = html_escape::decode_html_entities(text);
    let stripped = TAG.replace_all(&decoded, "");
    WHITESPACE.replace_all(&stripped, " ").trim().to_string()
}

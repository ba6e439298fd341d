//! Reduce an HTML page to readable markdown-ish text.

use crate::html;
use regex::{Captures, Regex};
use std::sync::LazyLock;

/// Elements whose whole subtree is boilerplate or not text at all.
const EXCLUDED_TAGS: &[&str] = &[
    "head", "script", "style", "noscript", "nav", "footer", "header", "aside", "form", "iframe",
    "svg",
];

static COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("valid regex"));

static EXCLUDED: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    EXCLUDED_TAGS
        .iter()
        .map(|tag| Regex::new(&format!(r"(?is)<{tag}\b[^>]*>.*?</{tag}\s*>")).expect("valid regex"))
        .collect()
});

static HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<h([1-6])\b[^>]*>(.*?)</h[1-6]\s*>").expect("valid regex")
});

static LIST_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<li\b[^>]*>").expect("valid regex"));

static LINE_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<br\s*/?>").expect("valid regex"));

static BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)</?(p|div|section|article|main|table|tr|ul|ol|blockquote|pre|dl|dt|dd|figure)\b[^>]*>",
    )
    .expect("valid regex")
});

fn is_heading(block: &str) -> bool {
    block.starts_with('#')
}

fn word_count(block: &str) -> usize {
    block.split_whitespace().count()
}

/// Convert `page` to text blocks separated by blank lines. Headings become
/// `#` lines and list items `- ` lines. Blocks with fewer than `min_words`
/// words are pruned as navigation residue, unless that would leave nothing
/// but headings.
pub fn html_to_markdown(page: &str, min_words: usize) -> String {
    let mut text = COMMENT.replace_all(page, "").into_owned();
    for re in EXCLUDED.iter() {
        text = re.replace_all(&text, "").into_owned();
    }

    let text = HEADING.replace_all(&text, |caps: &Captures| {
        let level = caps[1].parse::<usize>().unwrap_or(1);
        format!("\n\n{} {}\n\n", "#".repeat(level), html::inline_text(&caps[2]))
    });
    let text = LIST_ITEM.replace_all(&text, "\n- ");
    let text = LINE_BREAK.replace_all(&text, "\n");
    let text = BLOCK.replace_all(&text, "\n\n");
    let text = html::decode_entities(&html::strip_tags(&text));

    let blocks: Vec<String> = text
        .split("\n\n")
        .map(|block| {
            block
                .lines()
                .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
                .filter(|line| !line.is_empty() && line != "-")
                .collect::<Vec<_>>()
                .join("\n")
        })
        .filter(|block| !block.is_empty())
        .collect();

    let pruned: Vec<&String> = blocks
        .iter()
        .filter(|b| is_heading(b) || word_count(b) >= min_words)
        .collect();

    if pruned.iter().all(|b| is_heading(b)) {
        return blocks.join("\n\n");
    }

    pruned
        .into_iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join("\n\n")
}

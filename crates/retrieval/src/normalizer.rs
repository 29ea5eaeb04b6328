//! Content Normalizer
//!
//! Turns raw HTML, markdown, plain text and repository payloads into bounded
//! plain text. Every function here is pure: same input, same output.

use std::sync::OnceLock;

use regex::Regex;

use crate::github::RepoMetadata;

/// Elements whose content never reaches the normalized text
const SKIPPED_TAGS: &[&str] = &[
    "script", "style", "nav", "header", "footer", "aside", "noscript", "iframe", "svg", "form",
];

/// A raw payload as received by a strategy
#[derive(Debug, Clone, Copy)]
pub enum RawPayload<'a> {
    Html(&'a str),
    Markdown(&'a str),
    /// Already-decoded text; only whitespace and length are touched
    Text(&'a str),
    /// Repository content, optionally headed by its metadata
    Repository {
        summary: Option<&'a RepoMetadata>,
        body: &'a str,
        markdown: bool,
    },
}

/// Bounded plain-text normalizer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentNormalizer {
    max_bytes: usize,
}

impl ContentNormalizer {
    pub fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Normalize a payload into plain text no longer than the configured cap.
    pub fn normalize(&self, payload: RawPayload<'_>) -> String {
        let text = match payload {
            RawPayload::Html(html) => html_to_text(html),
            RawPayload::Markdown(md) => strip_markdown(&decode_entities(md)),
            RawPayload::Text(text) => text.to_string(),
            RawPayload::Repository {
                summary,
                body,
                markdown,
            } => {
                let body = if markdown {
                    strip_markdown(&decode_entities(body))
                } else {
                    body.to_string()
                };
                match summary {
                    Some(meta) => format!("{}\n\n{}", repository_header(meta), body),
                    None => body,
                }
            }
        };
        truncate_at_whitespace(&collapse_whitespace(&text), self.max_bytes)
    }
}

/// Page title from `<title>`, if any
pub fn extract_title(html: &str) -> Option<String> {
    static TITLE: OnceLock<Regex> = OnceLock::new();
    let re = TITLE.get_or_init(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").unwrap());
    let raw = re.captures(html)?.get(1)?.as_str();
    let title = collapse_whitespace(&decode_entities(raw)).replace('\n', " ");
    if title.is_empty() {
        None
    } else {
        Some(title)
    }
}

/// Structured lead-in for repository content
fn repository_header(meta: &RepoMetadata) -> String {
    let mut lines = vec![format!("Repository: {}", meta.full_name)];
    if let Some(description) = meta.description.as_deref().filter(|d| !d.trim().is_empty()) {
        lines.push(format!("Description: {}", description.trim()));
    }
    let mut facts = vec![format!("Stars: {}", meta.stars)];
    if let Some(language) = meta.language.as_deref() {
        facts.push(format!("Language: {}", language));
    }
    lines.push(facts.join(" | "));
    lines.join("\n")
}

/// Prefer `<main>` or `<article>` over the whole document.
fn main_region(html: &str) -> &str {
    static MAIN: OnceLock<Regex> = OnceLock::new();
    static ARTICLE: OnceLock<Regex> = OnceLock::new();
    static BODY: OnceLock<Regex> = OnceLock::new();
    let patterns = [
        MAIN.get_or_init(|| Regex::new(r"(?is)<main\b[^>]*>(.*)</main>").unwrap()),
        ARTICLE.get_or_init(|| Regex::new(r"(?is)<article\b[^>]*>(.*)</article>").unwrap()),
        BODY.get_or_init(|| Regex::new(r"(?is)<body\b[^>]*>(.*)</body>").unwrap()),
    ];
    patterns
        .iter()
        .find_map(|re| re.captures(html).and_then(|c| c.get(1)))
        .map(|m| m.as_str())
        .unwrap_or(html)
}

fn html_to_text(html: &str) -> String {
    let region = main_region(html);
    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(SKIPPED_TAGS.to_vec())
        .build();
    match converter.convert(region) {
        Ok(markdown) => strip_markdown(&decode_entities(&markdown)),
        Err(e) => {
            tracing::debug!(error = %e, "html conversion failed, stripping tags");
            strip_markdown(&decode_entities(&strip_tags(region)))
        }
    }
}

fn strip_tags(html: &str) -> String {
    static BLOCKS: OnceLock<Regex> = OnceLock::new();
    static TAGS: OnceLock<Regex> = OnceLock::new();
    let blocks = BLOCKS.get_or_init(|| {
        Regex::new(r"(?is)<(script|style|nav|header|footer|aside|noscript)\b.*?</(script|style|nav|header|footer|aside|noscript)>")
            .unwrap()
    });
    let tags = TAGS.get_or_init(|| Regex::new(r"(?s)<[^>]*>").unwrap());
    let without_blocks = blocks.replace_all(html, " ");
    tags.replace_all(&without_blocks, "\n").into_owned()
}

/// Remove markdown syntax, keeping the readable text.
fn strip_markdown(md: &str) -> String {
    static RULES: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    let rules = RULES.get_or_init(|| {
        [
            (r"(?s)<!--.*?-->", ""),
            (r"(?m)^[ \t]*(```|~~~).*$", ""),
            (r"!\[([^\]]*)\]\([^)]*\)", "$1"),
            (r"\[([^\]]+)\]\([^)]*\)", "$1"),
            (r"(?m)^[ \t]*\[[^\]]+\]:[ \t]*\S+.*$", ""),
            (r"(?m)^[ \t]{0,3}#{1,6}[ \t]+", ""),
            (r"(?m)^[ \t]*>[ \t]?", ""),
            (r"(?m)^[ \t]*([-*_][ \t]*){3,}$", ""),
            (r"\*\*|__|`", ""),
            (r"(?s)<[^>]+>", ""),
        ]
        .into_iter()
        .map(|(pattern, replacement)| (Regex::new(pattern).unwrap(), replacement))
        .collect()
    });

    let mut text = md.to_string();
    for (re, replacement) in rules {
        text = re.replace_all(&text, *replacement).into_owned();
    }
    text
}

/// Decode named and numeric character references.
fn decode_entities(text: &str) -> String {
    static ENTITY: OnceLock<Regex> = OnceLock::new();
    let re = ENTITY
        .get_or_init(|| Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z]{2,8});").unwrap());
    re.replace_all(text, |caps: &regex::Captures<'_>| {
        let name = &caps[1];
        let decoded = if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
            u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
        } else if let Some(dec) = name.strip_prefix('#') {
            dec.parse::<u32>().ok().and_then(char::from_u32)
        } else {
            match name {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "nbsp" => Some(' '),
                "ndash" => Some('\u{2013}'),
                "mdash" => Some('\u{2014}'),
                "hellip" => Some('\u{2026}'),
                "copy" => Some('\u{a9}'),
                _ => None,
            }
        };
        decoded
            .map(String::from)
            .unwrap_or_else(|| caps[0].to_string())
    })
    .into_owned()
}

/// Trim every line, squeeze inner runs of whitespace to one space and keep at
/// most one blank line between paragraphs.
pub fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_blank = false;
    for line in text.lines() {
        let mut words = line.split_whitespace().peekable();
        if words.peek().is_none() {
            pending_blank = !out.is_empty();
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
            if pending_blank {
                out.push('\n');
            }
        }
        pending_blank = false;
        let mut first = true;
        for word in words {
            if !first {
                out.push(' ');
            }
            out.push_str(word);
            first = false;
        }
    }
    out
}

/// Cut `text` to at most `max_bytes`, only ever at a whitespace boundary.
///
/// A first token longer than the cap yields an empty string.
pub fn truncate_at_whitespace(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let cut = text
        .char_indices()
        .take_while(|(i, _)| *i <= max_bytes)
        .filter(|(_, c)| c.is_whitespace())
        .map(|(i, _)| i)
        .last();
    match cut {
        Some(i) => text[..i].trim_end().to_string(),
        None => String::new(),
    }
}

//! Retrieval Classification
//!
//! First pipeline stage: decide whether a turn plausibly needs external
//! knowledge and pull out explicit references (URLs, repository links).
//! The heuristics sit behind `RetrievalClassifier` so they can be swapped.

use std::sync::OnceLock;

use grounded_chat_retrieval::{mentions_repository, RepoRef, RetrievalRequest};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Outcome of the classify stage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub needs_retrieval: bool,
    /// Explicit references found in the input, in order of appearance
    pub requests: Vec<RetrievalRequest>,
    /// Short labels for the signals that fired
    pub signals: Vec<String>,
}

pub trait RetrievalClassifier: Send + Sync {
    fn classify(&self, input: &str) -> Classification;
}

/// Words that suggest the answer depends on current information
const TEMPORAL_TERMS: &[&str] = &[
    "today",
    "tonight",
    "yesterday",
    "tomorrow",
    "now",
    "currently",
    "current",
    "latest",
    "recent",
    "recently",
    "news",
    "headlines",
    "this week",
    "this month",
    "this year",
    "right now",
    "weather",
    "price",
    "stock",
    "score",
];

const QUESTION_OPENERS: &[&str] = &["who", "what", "when", "where", "which", "how"];

fn url_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)\b(?:https?://|www\.)[^\s<>"'`]+"#).expect("valid url regex")
    })
}

fn year_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(?:19|20)\d{2}\b").expect("valid year regex"))
}

fn capitalized_phrase_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b[A-Z][\w&.-]*(?:\s+(?:of\s+|the\s+)?[A-Z][\w&.-]*)+")
            .expect("valid capitalized phrase regex")
    })
}

/// Trailing characters that end a sentence rather than a URL
fn trim_url(candidate: &str) -> &str {
    let mut url = candidate.trim_end_matches(['.', ',', ';', ':', '!', '?', '\'', '"']);
    // Drop an unbalanced closing bracket picked up from prose
    while let Some(stripped) = url.strip_suffix([')', ']']) {
        let opens = url.matches(['(', '[']).count();
        let closes = url.matches([')', ']']).count();
        if closes > opens {
            url = stripped.trim_end_matches(['.', ',', ';', ':', '!', '?']);
        } else {
            break;
        }
    }
    url
}

/// Keyword and pattern heuristics
#[derive(Debug, Clone)]
pub struct HeuristicClassifier {
    repository_hosts: Vec<String>,
    max_result_bytes: usize,
}

impl HeuristicClassifier {
    pub fn new(repository_hosts: Vec<String>, max_result_bytes: usize) -> Self {
        Self {
            repository_hosts,
            max_result_bytes,
        }
    }

    fn repo_ref(&self, candidate: &str) -> Option<RetrievalRequest> {
        RepoRef::parse(candidate, &self.repository_hosts).map(|_| {
            RetrievalRequest::repo_ref(candidate).with_max_result_bytes(self.max_result_bytes)
        })
    }

    /// URLs and scheme-less repository links, deduplicated
    fn extract_requests(&self, input: &str) -> Vec<RetrievalRequest> {
        let mut requests: Vec<RetrievalRequest> = Vec::new();
        let mut push = |request: RetrievalRequest| {
            if !requests.iter().any(|r| r.raw == request.raw) {
                requests.push(request);
            }
        };

        for m in url_pattern().find_iter(input) {
            let url = trim_url(m.as_str());
            if url.is_empty() {
                continue;
            }
            match self.repo_ref(url) {
                Some(request) => push(request),
                None => push(RetrievalRequest::url(url).with_max_result_bytes(self.max_result_bytes)),
            }
        }

        // Bare `host/owner/name` mentions
        for token in input.split_whitespace() {
            let token = trim_url(token.trim_start_matches(['(', '[', '<']));
            if token.contains("://") || token.to_lowercase().starts_with("www.") {
                continue;
            }
            if token.contains('/') {
                if let Some(request) = self.repo_ref(token) {
                    push(request);
                }
            }
        }

        requests
    }

    fn temporal_signal(lower: &str) -> Option<&'static str> {
        TEMPORAL_TERMS.iter().copied().find(|term| {
            if term.contains(' ') {
                lower.contains(term)
            } else {
                lower
                    .split(|c: char| !c.is_alphanumeric())
                    .any(|word| word == *term)
            }
        })
    }

    /// A question that names something: `Who founded Acme Robotics?`
    fn entity_question(input: &str, lower: &str) -> bool {
        let is_question = input.trim_end().ends_with('?')
            || lower
                .split_whitespace()
                .next()
                .is_some_and(|w| QUESTION_OPENERS.contains(&w));
        if !is_question {
            return false;
        }
        capitalized_phrase_pattern()
            .find_iter(input)
            .any(|m| {
                // A sentence opener followed by one capitalised word is not an entity
                let first = m.as_str().split_whitespace().next().unwrap_or_default();
                let opener = m.start() == input.len() - input.trim_start().len()
                    && QUESTION_OPENERS.contains(&first.to_lowercase().as_str());
                !opener || m.as_str().split_whitespace().count() > 2
            })
    }
}

impl Default for HeuristicClassifier {
    fn default() -> Self {
        Self::new(
            vec![grounded_chat_retrieval::DEFAULT_REPOSITORY_HOST.to_string()],
            grounded_chat_retrieval::DEFAULT_MAX_RESULT_BYTES,
        )
    }
}

impl RetrievalClassifier for HeuristicClassifier {
    fn classify(&self, input: &str) -> Classification {
        let lower = input.to_lowercase();
        let requests = self.extract_requests(input);
        let mut signals = Vec::new();

        if !requests.is_empty() {
            signals.push(format!("references:{}", requests.len()));
        }
        if let Some(term) = Self::temporal_signal(&lower) {
            signals.push(format!("temporal:{}", term));
        }
        if year_pattern().is_match(input) {
            signals.push("year".to_string());
        }
        if mentions_repository(input) {
            signals.push("repository_terms".to_string());
        }
        if Self::entity_question(input, &lower) {
            signals.push("named_entity_question".to_string());
        }

        Classification {
            needs_retrieval: !signals.is_empty(),
            requests,
            signals,
        }
    }
}

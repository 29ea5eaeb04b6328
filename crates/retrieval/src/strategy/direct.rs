//! Direct fetch: HTTP GET against a literal URL.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use mini_moka::sync::Cache;

use super::{AttemptContext, RetrievalStrategy};
use crate::limiter::FetchLimiter;
use crate::normalizer::{extract_title, truncate_at_whitespace, ContentNormalizer, RawPayload};
use crate::types::{ErrorKind, RetrievalRequest, RetrievalResult, StrategyKind};

/// Browser identities rotated across attempts
pub const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Edg/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Safari/605.1.15",
];

/// Maximum download size (2MB)
const DEFAULT_MAX_DOWNLOAD_BYTES: usize = 2 * 1024 * 1024;

/// Cache TTL (15 minutes)
const CACHE_TTL_SECS: u64 = 15 * 60;

/// Maximum cache entries
const MAX_CACHE_ENTRIES: u64 = 100;

#[derive(Debug, Clone)]
pub struct DirectFetchConfig {
    /// Allow loopback/private targets. Off outside tests.
    pub allow_private_hosts: bool,
    pub max_download_bytes: usize,
    pub cache_ttl: Duration,
}

impl Default for DirectFetchConfig {
    fn default() -> Self {
        Self {
            allow_private_hosts: false,
            max_download_bytes: DEFAULT_MAX_DOWNLOAD_BYTES,
            cache_ttl: Duration::from_secs(CACHE_TTL_SECS),
        }
    }
}

/// Fully normalized page text, before any per-request truncation
#[derive(Debug, Clone)]
struct CachedPage {
    text: String,
    metadata: BTreeMap<String, String>,
}

pub struct DirectFetchStrategy {
    client: reqwest::Client,
    limiter: FetchLimiter,
    config: DirectFetchConfig,
    cache: Cache<String, CachedPage>,
}

/// How a response body should be normalized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyKind {
    Html,
    Markdown,
    Text,
}

/// Decode a text body, or `None` when it looks binary.
///
/// UTF-16 needs a byte order mark. UTF-8 cut mid-character by the
/// download cap loses the partial character instead of gaining U+FFFD.
fn decode_body(bytes: &[u8]) -> Option<String> {
    let utf16 = match bytes {
        [0xFF, 0xFE, rest @ ..] => Some((rest, true)),
        [0xFE, 0xFF, rest @ ..] => Some((rest, false)),
        _ => None,
    };
    if let Some((rest, little_endian)) = utf16 {
        let units = rest.chunks_exact(2).map(|pair| {
            let pair = [pair[0], pair[1]];
            if little_endian {
                u16::from_le_bytes(pair)
            } else {
                u16::from_be_bytes(pair)
            }
        });
        return Some(
            char::decode_utf16(units)
                .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
                .collect(),
        );
    }

    if bytes.contains(&0) {
        return None;
    }
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => Some(text.to_string()),
        Err(e) if e.error_len().is_none() => {
            Some(String::from_utf8_lossy(&bytes[..e.valid_up_to()]).into_owned())
        }
        Err(_) => Some(String::from_utf8_lossy(bytes).into_owned()),
    }
}

fn classify_content_type(content_type: &str) -> Option<BodyKind> {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    match mime.as_str() {
        "text/html" | "application/xhtml+xml" => Some(BodyKind::Html),
        "text/markdown" | "text/x-markdown" => Some(BodyKind::Markdown),
        "application/json" | "application/xml" | "text/xml" => Some(BodyKind::Text),
        m if m.starts_with("text/") => Some(BodyKind::Text),
        m if m.ends_with("+json") || m.ends_with("+xml") => Some(BodyKind::Text),
        // Unlabelled bodies are sniffed after download
        "" => Some(BodyKind::Text),
        _ => None,
    }
}

/// Map a non-success HTTP status onto the retrieval taxonomy.
fn status_error_kind(status: u16) -> Option<ErrorKind> {
    match status {
        200..=299 => None,
        401 | 403 | 407 => Some(ErrorKind::AuthRequired),
        404 | 410 => Some(ErrorKind::NotFound),
        429 => Some(ErrorKind::RateLimited),
        415 => Some(ErrorKind::UnsupportedContent),
        _ => Some(ErrorKind::NetworkFailure),
    }
}

/// Check if a hostname is a private/local address
fn is_private_host(host: &str) -> bool {
    let lower = host.trim_matches(|c| c == '[' || c == ']').to_lowercase();
    if lower == "localhost"
        || lower.ends_with(".localhost")
        || lower.ends_with(".local")
        || lower.ends_with(".internal")
    {
        return true;
    }

    if let Ok(ip) = lower.parse::<IpAddr>() {
        return match ip {
            IpAddr::V4(ipv4) => {
                ipv4.is_loopback()
                    || ipv4.is_private()
                    || ipv4.is_link_local()
                    || ipv4.is_unspecified()
                    || ipv4.is_broadcast()
            }
            IpAddr::V6(ipv6) => {
                ipv6.is_loopback()
                    || ipv6.is_unspecified()
                    // fc00::/7 unique local, fe80::/10 link local
                    || (ipv6.segments()[0] & 0xfe00) == 0xfc00
                    || (ipv6.segments()[0] & 0xffc0) == 0xfe80
            }
        };
    }

    false
}

impl DirectFetchStrategy {
    pub fn new(client: reqwest::Client, limiter: FetchLimiter, config: DirectFetchConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(MAX_CACHE_ENTRIES)
            .time_to_live(config.cache_ttl)
            .build();
        Self {
            client,
            limiter,
            config,
            cache,
        }
    }

    /// Parse and vet a URL: scheme, host, SSRF guard.
    fn validate_url(&self, raw: &str) -> Result<url::Url, (ErrorKind, String)> {
        let raw = raw.trim();
        let with_scheme = if raw.contains("://") {
            raw.to_string()
        } else {
            format!("https://{}", raw)
        };

        let url = url::Url::parse(&with_scheme)
            .map_err(|e| (ErrorKind::UnsupportedContent, format!("Invalid URL: {}", e)))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err((
                ErrorKind::UnsupportedContent,
                format!("Unsupported URL scheme: {}", url.scheme()),
            ));
        }

        let host = url
            .host_str()
            .ok_or_else(|| (ErrorKind::UnsupportedContent, "URL has no host".to_string()))?;

        if !self.config.allow_private_hosts && is_private_host(host) {
            return Err((
                ErrorKind::UnsupportedContent,
                format!("Blocked: private/local address '{}'", host),
            ));
        }

        Ok(url)
    }

    fn user_agent(attempt: u32) -> &'static str {
        USER_AGENTS[attempt as usize % USER_AGENTS.len()]
    }

    fn respond(page: &CachedPage, max_bytes: usize, cached: bool) -> RetrievalResult {
        let mut metadata = page.metadata.clone();
        if cached {
            metadata.insert("cached".to_string(), "true".to_string());
        }
        RetrievalResult::success(
            StrategyKind::Direct,
            truncate_at_whitespace(&page.text, max_bytes),
            metadata,
        )
    }

    async fn fetch(&self, url: url::Url, attempt: u32) -> Result<CachedPage, (ErrorKind, String)> {
        let _permit = self.limiter.acquire().await;

        let response = self
            .client
            .get(url.as_str())
            .header(reqwest::header::USER_AGENT, Self::user_agent(attempt))
            .header(
                reqwest::header::ACCEPT,
                "text/html,application/xhtml+xml,application/xml;q=0.9,text/plain;q=0.8,*/*;q=0.5",
            )
            .header(reqwest::header::ACCEPT_LANGUAGE, "en-US,en;q=0.5")
            .send()
            .await
            .map_err(|e| {
                let message = if e.is_timeout() {
                    format!("Timed out fetching {}", url)
                } else {
                    format!("Failed to fetch {}: {}", url, e)
                };
                (ErrorKind::NetworkFailure, message)
            })?;

        let status = response.status();
        if let Some(kind) = status_error_kind(status.as_u16()) {
            return Err((
                kind,
                format!(
                    "HTTP error: {} {}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("Unknown")
                ),
            ));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let mut body_kind = classify_content_type(&content_type).ok_or_else(|| {
            (
                ErrorKind::UnsupportedContent,
                format!("Unsupported content type: {}", content_type),
            )
        })?;

        if let Some(content_length) = response.content_length() {
            if content_length > self.config.max_download_bytes as u64 {
                return Err((
                    ErrorKind::UnsupportedContent,
                    format!(
                        "Content too large: {:.1} MB (max {:.1} MB)",
                        content_length as f64 / (1024.0 * 1024.0),
                        self.config.max_download_bytes as f64 / (1024.0 * 1024.0)
                    ),
                ));
            }
        }

        let final_url = response.url().clone();
        let mut response = response;
        let mut bytes: Vec<u8> = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| (ErrorKind::NetworkFailure, format!("Failed to read body: {}", e)))?
        {
            bytes.extend_from_slice(&chunk);
            if bytes.len() >= self.config.max_download_bytes {
                // Chunked bodies carry no length up front
                bytes.truncate(self.config.max_download_bytes);
                tracing::debug!(url = %final_url, "download cap reached, truncating body");
                break;
            }
        }

        let body = decode_body(&bytes).ok_or_else(|| {
            (
                ErrorKind::UnsupportedContent,
                "Binary content detected".to_string(),
            )
        })?;

        if content_type.is_empty() && body.trim_start().starts_with('<') {
            body_kind = BodyKind::Html;
        }

        let normalizer = ContentNormalizer::new(usize::MAX);
        let (text, title) = match body_kind {
            BodyKind::Html => (
                normalizer.normalize(RawPayload::Html(&body)),
                extract_title(&body),
            ),
            BodyKind::Markdown => (normalizer.normalize(RawPayload::Markdown(&body)), None),
            BodyKind::Text => (normalizer.normalize(RawPayload::Text(&body)), None),
        };

        if text.is_empty() {
            return Err((
                ErrorKind::UnsupportedContent,
                format!("No readable text at {}", final_url),
            ));
        }

        let mut metadata = BTreeMap::new();
        metadata.insert(
            "title".to_string(),
            title.unwrap_or_else(|| final_url.host_str().unwrap_or_default().to_string()),
        );
        metadata.insert("url".to_string(), final_url.to_string());
        metadata.insert("status".to_string(), status.as_u16().to_string());
        if !content_type.is_empty() {
            metadata.insert("content_type".to_string(), content_type);
        }

        Ok(CachedPage { text, metadata })
    }
}

#[async_trait]
impl RetrievalStrategy for DirectFetchStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Direct
    }

    async fn attempt(&self, request: &RetrievalRequest, ctx: &AttemptContext) -> RetrievalResult {
        let url = match self.validate_url(&request.raw) {
            Ok(url) => url,
            Err((kind, message)) => return RetrievalResult::failure(StrategyKind::Direct, kind, message),
        };
        let key = url.to_string();

        if let Some(page) = self.cache.get(&key) {
            tracing::debug!(url = %key, "direct fetch cache hit");
            return Self::respond(&page, request.max_result_bytes, true);
        }

        let started = Instant::now();
        let outcome = tokio::select! {
            _ = ctx.cancel.cancelled() => return RetrievalResult::cancelled(StrategyKind::Direct),
            outcome = self.fetch(url, ctx.attempt) => outcome,
        };

        match outcome {
            Ok(page) => {
                tracing::debug!(
                    url = %key,
                    attempt = ctx.attempt,
                    chars = page.text.len(),
                    duration_ms = started.elapsed().as_millis() as u64,
                    "direct fetch succeeded"
                );
                let result = Self::respond(&page, request.max_result_bytes, false);
                self.cache.insert(key, page);
                result
            }
            Err((kind, message)) => {
                tracing::debug!(url = %key, attempt = ctx.attempt, error_kind = %kind, "direct fetch failed");
                RetrievalResult::failure(StrategyKind::Direct, kind, message)
            }
        }
    }
}

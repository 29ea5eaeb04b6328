//! HTTP client factory for retrieval
//!
//! Same proxy handling as the model providers, plus redirect and
//! decompression settings suited to fetching arbitrary pages.

use std::time::Duration;

use grounded_chat_core::ProxyConfig;

/// Maximum redirects followed per request
const MAX_REDIRECTS: usize = 5;

/// Build the client shared by the retrieval strategies.
///
/// `timeout` is the per-attempt ceiling; callers may still wrap attempts in a
/// shorter deadline.
pub fn build_fetch_client(
    proxy: Option<&ProxyConfig>,
    timeout: Duration,
) -> Result<reqwest::Client, reqwest::Error> {
    let mut builder = reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .gzip(true);
    match proxy {
        Some(cfg) => {
            let mut p = reqwest::Proxy::all(cfg.url())?;
            if let (Some(u), Some(pw)) = (&cfg.username, &cfg.password) {
                p = p.basic_auth(u, pw);
            }
            builder = builder.proxy(p);
        }
        None => {
            builder = builder.no_proxy();
        }
    }
    builder.build()
}

//! Loopback HTTP server and shared test doubles.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use grounded_chat_core::{ContextStore, CoreError, CoreResult, TurnRecord};
use grounded_chat_llm::{LlmError, LlmResult, TextGenerator};
use grounded_chat_retrieval::{
    build_fetch_client, DirectFetchConfig, DirectFetchStrategy, FetchLimiter, RepoApiError,
    RepoFile, RepoMetadata, RepositoryHost,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Canned response for one path
#[derive(Clone)]
pub struct Route {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl Route {
    pub fn html(body: &str) -> Self {
        Self {
            status: 200,
            content_type: "text/html; charset=utf-8",
            body: body.as_bytes().to_vec(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            content_type: "text/plain",
            body: b"error".to_vec(),
        }
    }
}

/// Minimal HTTP/1.1 server answering from a fixed route table
pub struct LoopbackServer {
    pub addr: String,
    hits: Arc<Mutex<HashMap<String, usize>>>,
    total: Arc<AtomicUsize>,
}

impl LoopbackServer {
    pub async fn start(routes: Vec<(&'static str, Route)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let routes: Arc<HashMap<String, Route>> =
            Arc::new(routes.into_iter().map(|(p, r)| (p.to_string(), r)).collect());
        let hits = Arc::new(Mutex::new(HashMap::new()));
        let total = Arc::new(AtomicUsize::new(0));

        let (hits_task, total_task) = (hits.clone(), total.clone());
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let routes = routes.clone();
                let hits = hits_task.clone();
                let total = total_task.clone();
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let mut chunk = [0u8; 1024];
                    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut chunk).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => buf.extend_from_slice(&chunk[..n]),
                        }
                    }
                    let request = String::from_utf8_lossy(&buf);
                    let path = request
                        .lines()
                        .next()
                        .and_then(|line| line.split_whitespace().nth(1))
                        .unwrap_or("/")
                        .to_string();
                    total.fetch_add(1, Ordering::SeqCst);
                    *hits.lock().unwrap().entry(path.clone()).or_insert(0) += 1;

                    let route = routes.get(&path).cloned().unwrap_or_else(|| Route::status(404));
                    let head = format!(
                        "HTTP/1.1 {} X\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        route.status,
                        route.content_type,
                        route.body.len()
                    );
                    let _ = socket.write_all(head.as_bytes()).await;
                    let _ = socket.write_all(&route.body).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        Self { addr, hits, total }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn hits(&self, path: &str) -> usize {
        self.hits.lock().unwrap().get(path).copied().unwrap_or(0)
    }

    pub fn total_hits(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

/// Listener that accepts connections and never answers them
pub struct SilentServer {
    pub addr: String,
}

impl SilentServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        Self { addr }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// Direct strategy allowed to reach loopback addresses
pub fn loopback_direct() -> Arc<DirectFetchStrategy> {
    let client = build_fetch_client(None, std::time::Duration::from_secs(5)).unwrap();
    Arc::new(DirectFetchStrategy::new(
        client,
        FetchLimiter::default(),
        DirectFetchConfig {
            allow_private_hosts: true,
            ..Default::default()
        },
    ))
}

/// Repository host whose every call fails the same way
pub struct FailingHost(pub RepoApiError);

#[async_trait]
impl RepositoryHost for FailingHost {
    async fn get_metadata(&self, _owner: &str, _name: &str) -> Result<RepoMetadata, RepoApiError> {
        Err(self.0.clone())
    }

    async fn get_readme(&self, _owner: &str, _name: &str) -> Result<RepoFile, RepoApiError> {
        Err(self.0.clone())
    }

    async fn get_file(
        &self,
        _owner: &str,
        _name: &str,
        _path: &str,
        _git_ref: Option<&str>,
    ) -> Result<RepoFile, RepoApiError> {
        Err(self.0.clone())
    }

    async fn search_repositories(
        &self,
        _query: &str,
        _max_results: usize,
    ) -> Result<Vec<RepoMetadata>, RepoApiError> {
        Err(self.0.clone())
    }
}

/// Generator that fails any prompt containing one of `fail_markers`
/// and otherwise answers with a fixed string
pub struct MarkerGenerator {
    fail_markers: Vec<&'static str>,
    pub calls: Mutex<Vec<String>>,
}

impl MarkerGenerator {
    pub fn new(fail_markers: Vec<&'static str>) -> Arc<Self> {
        Arc::new(Self {
            fail_markers,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl TextGenerator for MarkerGenerator {
    async fn generate(&self, _model_id: &str, prompt: &str) -> LlmResult<String> {
        self.calls.lock().unwrap().push(prompt.to_string());
        if self.fail_markers.iter().any(|m| prompt.contains(m)) {
            return Err(LlmError::ServerError {
                message: "upstream unavailable".to_string(),
                status: Some(503),
            });
        }
        Ok("Here is a grounded answer.".to_string())
    }
}

/// In-memory store that records every append
#[derive(Default)]
pub struct RecordingStore {
    pub appended: Mutex<Vec<TurnRecord>>,
    pub fail_reads: bool,
}

impl ContextStore for RecordingStore {
    fn append_turn(&self, record: TurnRecord) -> CoreResult<i64> {
        let mut appended = self.appended.lock().unwrap();
        appended.push(record);
        Ok(appended.len() as i64)
    }

    fn recent_turns(&self, limit: usize) -> CoreResult<Vec<TurnRecord>> {
        if self.fail_reads {
            return Err(CoreError::storage("disk on fire"));
        }
        let appended = self.appended.lock().unwrap();
        let skip = appended.len().saturating_sub(limit);
        Ok(appended[skip..].to_vec())
    }

    fn pinned_insights(&self) -> CoreResult<Vec<TurnRecord>> {
        if self.fail_reads {
            return Err(CoreError::storage("disk on fire"));
        }
        Ok(Vec::new())
    }
}

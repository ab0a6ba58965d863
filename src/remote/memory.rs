//! In-process [`ContentStore`] used by tests and local dry runs.
//!
//! Follows the remote contract (sha-guarded writes, 409 on a stale sha, 422
//! on creating an existing file) and adds fault injection plus a log of
//! every PUT with its start and end instants, so tests can check that
//! pushes never overlapped.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use gitvault_core::models::RepoCoordinates;

use super::{ContentStore, ContentStoreFactory, RemoteError, RemoteFile};

/// A scripted failure for the next PUT to a path.
#[derive(Debug, Clone)]
pub enum Fault {
    /// Answer 409 without writing.
    Conflict,
    /// Answer with this status without writing.
    Status(u16),
    /// Another writer lands this content first; the PUT then gets a 409.
    ConcurrentWrite(String),
}

/// One PUT as observed by the store.
#[derive(Debug, Clone)]
pub struct PutRecord {
    pub path: String,
    pub started: Instant,
    pub finished: Instant,
    pub ok: bool,
}

#[derive(Default)]
struct Inner {
    files: HashMap<String, RemoteFile>,
    faults: HashMap<String, VecDeque<Fault>>,
    records: Vec<PutRecord>,
    gets: u64,
    in_flight: usize,
    max_in_flight: usize,
    latency: Duration,
}

/// Git-style blob sha, computed with SHA-256.
fn blob_sha(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("blob {}\0", content.len()).as_bytes());
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Default)]
pub struct MemoryContentStore {
    inner: Mutex<Inner>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Hold every PUT open for `latency` before it is applied.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    /// Queue `fault` for the next `times` PUTs to `path`.
    pub fn inject(&self, path: &str, fault: Fault, times: u32) {
        let mut inner = self.lock();
        let queue = inner.faults.entry(path.to_string()).or_default();
        for _ in 0..times {
            queue.push_back(fault.clone());
        }
    }

    /// Write a file directly, bypassing the PUT log.
    pub fn seed(&self, path: &str, content: &str) {
        self.lock().files.insert(
            path.to_string(),
            RemoteFile {
                sha: blob_sha(content),
                content: content.to_string(),
            },
        );
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.lock().files.get(path).map(|f| f.content.clone())
    }

    pub fn sha(&self, path: &str) -> Option<String> {
        self.lock().files.get(path).map(|f| f.sha.clone())
    }

    /// Every stored path, sorted.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.lock().files.keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn puts(&self) -> Vec<PutRecord> {
        self.lock().records.clone()
    }

    pub fn put_attempts(&self, path: &str) -> usize {
        self.lock().records.iter().filter(|r| r.path == path).count()
    }

    pub fn successful_puts(&self, path: &str) -> usize {
        self.lock()
            .records
            .iter()
            .filter(|r| r.path == path && r.ok)
            .count()
    }

    /// GETs plus PUT attempts served so far.
    pub fn total_calls(&self) -> u64 {
        let inner = self.lock();
        inner.gets + inner.records.len() as u64
    }

    pub fn max_in_flight(&self) -> usize {
        self.lock().max_in_flight
    }

    /// Whether any two PUTs to paths ending in `suffix` had overlapping
    /// network windows.
    pub fn puts_overlap(&self, suffix: &str) -> bool {
        let mut windows: Vec<(Instant, Instant)> = self
            .lock()
            .records
            .iter()
            .filter(|r| r.path.ends_with(suffix))
            .map(|r| (r.started, r.finished))
            .collect();
        windows.sort();
        windows.windows(2).any(|w| w[1].0 < w[0].1)
    }

    fn apply_put(
        inner: &mut Inner,
        path: &str,
        content: &str,
        sha: Option<&str>,
    ) -> Result<String, RemoteError> {
        if let Some(fault) = inner.faults.get_mut(path).and_then(|q| q.pop_front()) {
            return match fault {
                Fault::Conflict => Err(RemoteError::Conflict(path.to_string())),
                Fault::Status(status) => Err(RemoteError::Status {
                    path: path.to_string(),
                    status,
                    message: "injected".to_string(),
                }),
                Fault::ConcurrentWrite(foreign) => {
                    inner.files.insert(
                        path.to_string(),
                        RemoteFile {
                            sha: blob_sha(&foreign),
                            content: foreign,
                        },
                    );
                    Err(RemoteError::Conflict(path.to_string()))
                }
            };
        }

        match (inner.files.get(path), sha) {
            (Some(_), None) => Err(RemoteError::AlreadyExists(path.to_string())),
            (None, Some(_)) => Err(RemoteError::Conflict(path.to_string())),
            (Some(existing), Some(expected)) if existing.sha != expected => {
                Err(RemoteError::Conflict(path.to_string()))
            }
            _ => {
                let new_sha = blob_sha(content);
                inner.files.insert(
                    path.to_string(),
                    RemoteFile {
                        sha: new_sha.clone(),
                        content: content.to_string(),
                    },
                );
                Ok(new_sha)
            }
        }
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn get_file(&self, path: &str) -> Result<Option<RemoteFile>, RemoteError> {
        let mut inner = self.lock();
        inner.gets += 1;
        Ok(inner.files.get(path).cloned())
    }

    async fn put_file(
        &self,
        path: &str,
        content: &str,
        _message: &str,
        sha: Option<&str>,
    ) -> Result<String, RemoteError> {
        let started = Instant::now();
        let latency = {
            let mut inner = self.lock();
            inner.in_flight += 1;
            inner.max_in_flight = inner.max_in_flight.max(inner.in_flight);
            inner.latency
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut inner = self.lock();
        let result = Self::apply_put(&mut inner, path, content, sha);
        inner.in_flight -= 1;
        inner.records.push(PutRecord {
            path: path.to_string(),
            started,
            finished: Instant::now(),
            ok: result.is_ok(),
        });
        result
    }
}

/// A set of in-memory repositories, one per owner/repo/branch.
#[derive(Default)]
pub struct MemoryRemote {
    repos: Mutex<HashMap<String, Arc<MemoryContentStore>>>,
    tokens: Mutex<Vec<String>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn repo(&self, repo: &RepoCoordinates) -> Arc<MemoryContentStore> {
        let key = format!("{}/{}@{}", repo.owner, repo.repo, repo.branch);
        self.repos
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(key)
            .or_default()
            .clone()
    }

    /// Tokens presented to [`ContentStoreFactory::connect`], in order.
    pub fn tokens_seen(&self) -> Vec<String> {
        self.tokens.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl ContentStoreFactory for MemoryRemote {
    fn connect(&self, repo: &RepoCoordinates, token: &str) -> Arc<dyn ContentStore> {
        self.tokens
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(token.to_string());
        self.repo(repo)
    }
}

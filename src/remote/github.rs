//! GitHub contents API client.
//!
//! `GET  {api_base}/repos/{owner}/{repo}/contents/{path}?ref={branch}`
//! `PUT  {api_base}/repos/{owner}/{repo}/contents/{path}` with
//! `{message, content (base64), branch, sha?}`.
//!
//! Every path segment is percent-encoded, so vault names containing `#`,
//! `?` or spaces address the file they name.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use gitvault_core::models::RepoCoordinates;

use super::{ContentStore, ContentStoreFactory, RemoteError, RemoteFile};
use crate::config::RemoteConfig;

#[derive(Deserialize)]
struct ContentsResponse {
    sha: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    encoding: Option<String>,
}

#[derive(Serialize)]
struct PutRequest<'a> {
    message: &'a str,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
}

#[derive(Deserialize)]
struct PutResponse {
    content: PutContent,
}

#[derive(Deserialize)]
struct PutContent {
    sha: String,
}

/// Builds [`GitHubContentStore`]s that share one connection pool.
pub struct GitHubFactory {
    client: reqwest::Client,
    api_base: String,
}

impl GitHubFactory {
    pub fn new(config: &RemoteConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
        })
    }
}

impl ContentStoreFactory for GitHubFactory {
    fn connect(&self, repo: &RepoCoordinates, token: &str) -> Arc<dyn ContentStore> {
        Arc::new(GitHubContentStore {
            client: self.client.clone(),
            api_base: self.api_base.clone(),
            repo: repo.clone(),
            token: token.to_string(),
        })
    }
}

pub struct GitHubContentStore {
    client: reqwest::Client,
    api_base: String,
    repo: RepoCoordinates,
    token: String,
}

impl GitHubContentStore {
    fn url(&self, path: &str) -> Result<reqwest::Url, RemoteError> {
        let mut url = reqwest::Url::parse(&self.api_base).map_err(|e| {
            RemoteError::Transport(format!("invalid api base {}: {}", self.api_base, e))
        })?;
        url.path_segments_mut()
            .map_err(|_| {
                RemoteError::Transport(format!("api base {} cannot take a path", self.api_base))
            })?
            .pop_if_empty()
            .extend(["repos", self.repo.owner.as_str(), self.repo.repo.as_str(), "contents"])
            .extend(path.split('/'));
        Ok(url)
    }

    fn request(
        &self,
        method: reqwest::Method,
        path: &str,
    ) -> Result<reqwest::RequestBuilder, RemoteError> {
        Ok(self
            .client
            .request(method, self.url(path)?)
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json"))
    }
}

fn transport(e: reqwest::Error) -> RemoteError {
    RemoteError::Transport(e.to_string())
}

async fn status_error(path: &str, response: reqwest::Response) -> RemoteError {
    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();
    RemoteError::Status {
        path: path.to_string(),
        status,
        message,
    }
}

#[async_trait]
impl ContentStore for GitHubContentStore {
    async fn get_file(&self, path: &str) -> Result<Option<RemoteFile>, RemoteError> {
        let response = self
            .request(reqwest::Method::GET, path)?
            .query(&[("ref", self.repo.branch.as_str())])
            .send()
            .await
            .map_err(transport)?;

        match response.status().as_u16() {
            404 => Ok(None),
            200 => {
                let body: ContentsResponse = response
                    .json()
                    .await
                    .map_err(|e| RemoteError::Malformed(format!("{}: {}", path, e)))?;
                if let Some(enc) = body.encoding.as_deref() {
                    if enc != "base64" {
                        return Err(RemoteError::Malformed(format!(
                            "{}: unsupported encoding '{}'",
                            path, enc
                        )));
                    }
                }
                // The API wraps base64 at 60 columns.
                let packed: String = body.content.split_whitespace().collect();
                let bytes = STANDARD
                    .decode(packed)
                    .map_err(|e| RemoteError::Malformed(format!("{}: {}", path, e)))?;
                let content = String::from_utf8(bytes)
                    .map_err(|e| RemoteError::Malformed(format!("{}: {}", path, e)))?;
                Ok(Some(RemoteFile {
                    sha: body.sha,
                    content,
                }))
            }
            _ => Err(status_error(path, response).await),
        }
    }

    async fn put_file(
        &self,
        path: &str,
        content: &str,
        message: &str,
        sha: Option<&str>,
    ) -> Result<String, RemoteError> {
        let body = PutRequest {
            message,
            content: STANDARD.encode(content.as_bytes()),
            branch: &self.repo.branch,
            sha,
        };
        let response = self
            .request(reqwest::Method::PUT, path)?
            .json(&body)
            .send()
            .await
            .map_err(transport)?;

        match response.status().as_u16() {
            200 | 201 => {
                let body: PutResponse = response
                    .json()
                    .await
                    .map_err(|e| RemoteError::Malformed(format!("{}: {}", path, e)))?;
                Ok(body.content.sha)
            }
            409 => Err(RemoteError::Conflict(path.to_string())),
            422 => Err(RemoteError::AlreadyExists(path.to_string())),
            _ => Err(status_error(path, response).await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::Method::{GET, PUT};
    use httpmock::MockServer;
    use serde_json::json;
    use std::net::TcpListener;

    fn can_bind_localhost() -> bool {
        TcpListener::bind("127.0.0.1:0").is_ok()
    }

    fn acme_notes() -> RepoCoordinates {
        RepoCoordinates {
            owner: "acme".to_string(),
            repo: "notes".to_string(),
            branch: "main".to_string(),
        }
    }

    fn store(server: &MockServer) -> Arc<dyn ContentStore> {
        let config = RemoteConfig {
            api_base: server.base_url(),
            ..RemoteConfig::default()
        };
        GitHubFactory::new(&config)
            .unwrap()
            .connect(&acme_notes(), "tok")
    }

    #[test]
    fn test_url_encodes_each_segment() {
        let store = GitHubContentStore {
            client: reqwest::Client::new(),
            api_base: "https://ghe.example.com/api/v3".to_string(),
            repo: acme_notes(),
            token: "tok".to_string(),
        };
        assert_eq!(
            store.url("vaults/My#Vault/Folder_0/Article_0.md").unwrap().as_str(),
            "https://ghe.example.com/api/v3/repos/acme/notes/contents/vaults/My%23Vault/Folder_0/Article_0.md"
        );
        assert_eq!(
            store.url("Team Notes/Why?/a.md").unwrap().as_str(),
            "https://ghe.example.com/api/v3/repos/acme/notes/contents/Team%20Notes/Why%3F/a.md"
        );
    }

    #[tokio::test]
    async fn test_put_to_reserved_characters_reaches_full_path() {
        if !can_bind_localhost() {
            eprintln!("Skipping httpmock tests: cannot bind to localhost");
            return;
        }
        let server = MockServer::start_async().await;
        let full = server
            .mock_async(|when, then| {
                when.method(PUT).path_contains("Vault/Folder_0/Article_0.md");
                then.status(201).json_body(json!({"content": {"sha": "right"}}));
            })
            .await;
        let truncated = server
            .mock_async(|when, then| {
                when.method(PUT).path("/repos/acme/notes/contents/My");
                then.status(201).json_body(json!({"content": {"sha": "wrong"}}));
            })
            .await;

        let sha = store(&server)
            .put_file("My#Vault/Folder_0/Article_0.md", "body", "add", None)
            .await
            .unwrap();
        assert_eq!(sha, "right");
        assert_eq!(full.hits_async().await, 1);
        assert_eq!(truncated.hits_async().await, 0);
    }

    #[tokio::test]
    async fn test_get_file_decodes_wrapped_base64() {
        if !can_bind_localhost() {
            eprintln!("Skipping httpmock tests: cannot bind to localhost");
            return;
        }
        let server = MockServer::start_async().await;
        let encoded = STANDARD.encode("hello world");
        let wrapped = format!("{}\n{}\n", &encoded[..8], &encoded[8..]);
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/repos/acme/notes/contents/v/Folder_0/Article_0.md")
                    .query_param("ref", "main")
                    .header("authorization", "Bearer tok");
                then.status(200).json_body(json!({
                    "sha": "abc123",
                    "content": wrapped,
                    "encoding": "base64"
                }));
            })
            .await;

        let file = store(&server)
            .get_file("v/Folder_0/Article_0.md")
            .await
            .unwrap()
            .unwrap();
        mock.assert_async().await;
        assert_eq!(file.sha, "abc123");
        assert_eq!(file.content, "hello world");
    }

    #[tokio::test]
    async fn test_get_missing_file_is_none() {
        if !can_bind_localhost() {
            eprintln!("Skipping httpmock tests: cannot bind to localhost");
            return;
        }
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/repos/acme/notes/contents/missing.md");
                then.status(404).json_body(json!({"message": "Not Found"}));
            })
            .await;
        assert!(store(&server).get_file("missing.md").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_sends_sha_branch_and_base64() {
        if !can_bind_localhost() {
            eprintln!("Skipping httpmock tests: cannot bind to localhost");
            return;
        }
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/repos/acme/notes/contents/a.md")
                    .json_body(json!({
                        "message": "add a",
                        "content": STANDARD.encode("body"),
                        "branch": "main",
                        "sha": "old"
                    }));
                then.status(200)
                    .json_body(json!({"content": {"sha": "new"}, "commit": {"sha": "c1"}}));
            })
            .await;

        let sha = store(&server)
            .put_file("a.md", "body", "add a", Some("old"))
            .await
            .unwrap();
        mock.assert_async().await;
        assert_eq!(sha, "new");
    }

    #[tokio::test]
    async fn test_put_status_classification() {
        if !can_bind_localhost() {
            eprintln!("Skipping httpmock tests: cannot bind to localhost");
            return;
        }
        let server = MockServer::start_async().await;
        for (file, status) in [("c.md", 409), ("e.md", 422), ("f.md", 500)] {
            server
                .mock_async(|when, then| {
                    when.method(PUT).path(format!("/repos/acme/notes/contents/{file}"));
                    then.status(status).json_body(json!({"message": "nope"}));
                })
                .await;
        }
        let s = store(&server);
        assert!(matches!(
            s.put_file("c.md", "x", "m", Some("s")).await,
            Err(RemoteError::Conflict(_))
        ));
        assert!(matches!(
            s.put_file("e.md", "x", "m", None).await,
            Err(RemoteError::AlreadyExists(_))
        ));
        assert!(matches!(
            s.put_file("f.md", "x", "m", None).await,
            Err(RemoteError::Status { status: 500, .. })
        ));
    }

    #[tokio::test]
    async fn test_malformed_body_is_reported() {
        if !can_bind_localhost() {
            eprintln!("Skipping httpmock tests: cannot bind to localhost");
            return;
        }
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/repos/acme/notes/contents/bad.md");
                then.status(200).body("not json");
            })
            .await;
        assert!(matches!(
            store(&server).get_file("bad.md").await,
            Err(RemoteError::Malformed(_))
        ));
    }
}

//! Fetch & Inspect: download a repository snapshot, extract it, run the
//! detection rules over every file, and clean up.

mod archive;
mod rules;

pub use rules::{DetectionRule, KeyMarkerRule, default_rules};

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reposcan_model::Finding;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Result, ScanError};

/// Produces findings for one repository.
#[async_trait]
pub trait RepositoryInspector: Send + Sync {
    async fn scan(
        &self,
        owner: &str,
        repo: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Finding>>;
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root under which each run gets its own scratch directory.
    pub working_dir: PathBuf,
    /// Host API base; the tarball is fetched from
    /// `{archive_base_url}/repos/{owner}/{repo}/tarball`.
    pub archive_base_url: String,
    pub http_timeout: Duration,
    pub user_agent: String,
    pub github_token: Option<String>,
}

/// Default [`RepositoryInspector`] backed by an HTTP tarball endpoint.
pub struct FetchInspectEngine {
    config: EngineConfig,
    client: reqwest::Client,
    rules: Vec<Arc<dyn DetectionRule>>,
}

impl fmt::Debug for FetchInspectEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchInspectEngine")
            .field("working_dir", &self.config.working_dir)
            .field("archive_base_url", &self.config.archive_base_url)
            .field("rules", &self.rules.len())
            .finish()
    }
}

impl FetchInspectEngine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| {
                ScanError::Internal(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            config,
            client,
            rules: default_rules(),
        })
    }

    /// Replace the active rule set.
    pub fn with_rules(mut self, rules: Vec<Arc<dyn DetectionRule>>) -> Self {
        self.rules = rules;
        self
    }

    fn archive_url(&self, owner: &str, repo: &str) -> String {
        format!(
            "{}/repos/{owner}/{repo}/tarball",
            self.config.archive_base_url.trim_end_matches('/')
        )
    }

    async fn download(
        &self,
        url: &str,
        dest: &std::path::Path,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let mut request = self.client.get(url);
        if let Some(token) = &self.config.github_token {
            request = request.bearer_auth(token);
        }

        let response = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(ScanError::Cancelled("archive download".to_string()));
            }
            response = request.send() => response?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(ScanError::Fetch(format!("GET {url} returned {status}")));
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut body = response.bytes_stream();
        let mut written = 0u64;
        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(ScanError::Cancelled("archive download".to_string()));
                }
                chunk = body.next() => chunk,
            };
            let Some(chunk) = chunk else {
                break;
            };
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        debug!(url, bytes = written, "archive downloaded");
        Ok(written)
    }
}

#[async_trait]
impl RepositoryInspector for FetchInspectEngine {
    async fn scan(
        &self,
        owner: &str,
        repo: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Finding>> {
        info!(owner, repo, "starting repository scan");

        // Removed on drop, whichever way this returns.
        let run_dir = tempfile::Builder::new()
            .prefix("scan-")
            .tempdir_in(&self.config.working_dir)?;
        debug!(path = %run_dir.path().display(), "created working directory");

        let url = self.archive_url(owner, repo);
        let archive_path = run_dir.path().join("archive.tar.gz");
        if let Err(e) = self.download(&url, &archive_path, cancel).await {
            warn!(owner, repo, error = %e, "failed to download archive");
            return Err(e);
        }

        let extract_to = run_dir.path().join("src");
        let rules = self.rules.clone();
        let task_cancel = cancel.clone();
        let (task_owner, task_repo) = (owner.to_string(), repo.to_string());

        let findings = tokio::task::spawn_blocking(move || -> Result<Vec<Finding>> {
            archive::unpack(&archive_path, &extract_to, &task_cancel)?;
            let repo_dir =
                archive::locate_repository_dir(&extract_to, &task_owner, &task_repo)?;
            debug!(repo_dir = %repo_dir.display(), "found repository directory");
            rules::inspect_tree(&repo_dir, &rules, &task_cancel)
        })
        .await
        .map_err(|e| ScanError::Internal(format!("inspection task failed: {e}")))?;

        drop(run_dir);

        match &findings {
            Ok(found) => info!(owner, repo, findings = found.len(), "repository scan finished"),
            Err(e) => warn!(owner, repo, error = %e, "repository scan failed"),
        }
        findings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, http::StatusCode, routing::get};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn engine(base_url: String, working_dir: PathBuf) -> FetchInspectEngine {
        FetchInspectEngine::new(EngineConfig {
            working_dir,
            archive_base_url: base_url,
            http_timeout: Duration::from_secs(5),
            user_agent: "reposcan-test".into(),
            github_token: None,
        })
        .unwrap()
    }

    fn is_empty_dir(path: &std::path::Path) -> bool {
        std::fs::read_dir(path).unwrap().next().is_none()
    }

    #[tokio::test]
    async fn scans_served_tarball_and_cleans_up() {
        let tarball = archive::testing::tarball(&[
            ("acme-widgets-abc123/", ""),
            ("acme-widgets-abc123/README.md", "# widgets\n"),
            ("acme-widgets-abc123/config/keys.txt", "private_key = 1\nok\npublic_key = 2\n"),
        ]);
        let base = serve(Router::new().route(
            "/repos/acme/widgets/tarball",
            get(move || {
                let body = tarball.clone();
                async move { body }
            }),
        ))
        .await;

        let work = tempfile::tempdir().unwrap();
        let findings = engine(base, work.path().to_path_buf())
            .scan("acme", "widgets", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].location.path, "config/keys.txt");
        assert_eq!(findings[0].location.position.begin.line, 1);
        assert_eq!(findings[1].location.position.begin.line, 3);
        assert!(is_empty_dir(work.path()));
    }

    #[tokio::test]
    async fn non_success_status_is_fetch_error() {
        let base = serve(Router::new().route(
            "/repos/acme/widgets/tarball",
            get(|| async { StatusCode::NOT_FOUND }),
        ))
        .await;

        let work = tempfile::tempdir().unwrap();
        let err = engine(base, work.path().to_path_buf())
            .scan("acme", "widgets", &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ScanError::Fetch(_)));
        assert!(is_empty_dir(work.path()));
    }

    #[tokio::test]
    async fn missing_repository_dir_fails_and_cleans_up() {
        let tarball = archive::testing::tarball(&[("someone-else-1/file", "x")]);
        let base = serve(Router::new().route(
            "/repos/acme/widgets/tarball",
            get(move || {
                let body = tarball.clone();
                async move { body }
            }),
        ))
        .await;

        let work = tempfile::tempdir().unwrap();
        let err = engine(base, work.path().to_path_buf())
            .scan("acme", "widgets", &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "empty repository directory for acme/widgets");
        assert!(is_empty_dir(work.path()));
    }
}

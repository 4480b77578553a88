/*
 * SPDX-FileCopyrightText: 2026 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use async_trait::async_trait;
use common::consts::{GITHUB_ARCHIVE_TIMEOUT, GITHUB_CONTENT_TIMEOUT};
use common::error::{JobError, JobResult};
use common::input::load_secret;
use common::types::Cli;
use futures::StreamExt;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Outcome of looking up `pubstorm.json` at a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectConfig {
    Found { path: String },
    Missing,
    Invalid,
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    path: String,
}

impl ProjectConfig {
    pub fn parse(body: &[u8]) -> Self {
        match serde_json::from_slice::<ConfigFile>(body) {
            Ok(config) => ProjectConfig::Found { path: config.path },
            Err(_) => ProjectConfig::Invalid,
        }
    }
}

/// Fills `{archive_format}` and `{/ref}` in a GitHub `archive_url` template.
pub fn tarball_url(archive_url: &str, git_ref: &str) -> String {
    archive_url
        .replacen("{archive_format}", "tarball", 1)
        .replacen("{/ref}", &format!("/{}", git_ref), 1)
}

#[async_trait]
pub trait GithubFetcher: Send + Sync + fmt::Debug {
    async fn project_config(&self, full_name: &str, git_ref: &str) -> JobResult<ProjectConfig>;

    /// Streams the archive at `url` into `dest`, returning the byte count.
    async fn download_archive(&self, url: &str, dest: &Path) -> JobResult<u64>;
}

pub struct HttpGithubFetcher {
    api_host: String,
    token: Option<String>,
    content_client: Client,
    archive_client: Client,
}

impl fmt::Debug for HttpGithubFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpGithubFetcher")
            .field("api_host", &self.api_host)
            .finish()
    }
}

impl HttpGithubFetcher {
    pub fn new(cli: &Cli) -> anyhow::Result<Self> {
        let token = cli
            .github_token_file
            .as_deref()
            .map(load_secret)
            .filter(|t| !t.is_empty());

        Ok(Self {
            api_host: cli.github_api_host.trim_end_matches('/').to_string(),
            token,
            content_client: Client::builder().timeout(GITHUB_CONTENT_TIMEOUT).build()?,
            archive_client: Client::builder().timeout(GITHUB_ARCHIVE_TIMEOUT).build()?,
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.header(AUTHORIZATION, format!("token {}", token)),
            None => request,
        }
    }
}

#[async_trait]
impl GithubFetcher for HttpGithubFetcher {
    async fn project_config(&self, full_name: &str, git_ref: &str) -> JobResult<ProjectConfig> {
        let url = format!("{}/repos/{}/contents/pubstorm.json", self.api_host, full_name);
        let request = self
            .content_client
            .get(&url)
            .query(&[("ref", git_ref)])
            .header(ACCEPT, "application/vnd.github.v3.raw");

        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| JobError::transient(format!("GitHub contents request failed: {}", e)))?;

        if response.status() != StatusCode::OK {
            debug!(status = %response.status(), repo = %full_name, "pubstorm.json not found");
            return Ok(ProjectConfig::Missing);
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| JobError::transient(format!("GitHub contents read failed: {}", e)))?;

        Ok(ProjectConfig::parse(&body))
    }

    async fn download_archive(&self, url: &str, dest: &Path) -> JobResult<u64> {
        let response = self
            .authorize(self.archive_client.get(url))
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Error downloading archive of repo from GitHub");
                JobError::transient("could not download archive of repository from GitHub")
            })?;

        if response.status() != StatusCode::OK {
            return Err(JobError::transient(format!(
                "could not download archive of repository from GitHub ({})",
                response.status()
            )));
        }

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| JobError::internal(format!("Failed to create archive file: {}", e)))?;

        let mut written = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk
                .map_err(|e| JobError::transient(format!("GitHub archive read failed: {}", e)))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| JobError::internal(format!("Failed to write archive: {}", e)))?;
            written += chunk.len() as u64;
        }

        file.flush()
            .await
            .map_err(|e| JobError::internal(format!("Failed to write archive: {}", e)))?;

        Ok(written)
    }
}

/// In-memory fetcher for tests.
#[derive(Debug, Default)]
pub struct FakeGithubFetcher {
    configs: Mutex<HashMap<String, ProjectConfig>>,
    archives: Mutex<HashMap<String, Vec<u8>>>,
}

impl FakeGithubFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(self, full_name: &str, git_ref: &str, config: ProjectConfig) -> Self {
        self.configs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(format!("{}@{}", full_name, git_ref), config);
        self
    }

    pub fn with_archive(self, url: &str, body: Vec<u8>) -> Self {
        self.archives
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(url.to_string(), body);
        self
    }
}

#[async_trait]
impl GithubFetcher for FakeGithubFetcher {
    async fn project_config(&self, full_name: &str, git_ref: &str) -> JobResult<ProjectConfig> {
        Ok(self
            .configs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&format!("{}@{}", full_name, git_ref))
            .cloned()
            .unwrap_or(ProjectConfig::Missing))
    }

    async fn download_archive(&self, url: &str, dest: &Path) -> JobResult<u64> {
        let body = self
            .archives
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(url)
            .cloned()
            .ok_or_else(|| JobError::transient(format!("no archive at {}", url)))?;

        tokio::fs::write(dest, &body)
            .await
            .map_err(|e| JobError::internal(e.to_string()))?;

        Ok(body.len() as u64)
    }
}

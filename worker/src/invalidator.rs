/*
 * SPDX-FileCopyrightText: 2026 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use async_trait::async_trait;
use common::consts::EDGE_TIMEOUT;
use common::error::{JobError, JobResult};
use common::messages::InvalidationMessage;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use tracing::{debug, instrument};

use super::consumer::Handler;
use super::decode;

/// Forwards invalidation messages to the edge API, one POST per domain.
#[derive(Debug, Clone)]
pub struct Invalidator {
    api_host: String,
    client: Client,
}

impl Invalidator {
    pub fn new(api_host: &str) -> anyhow::Result<Self> {
        Ok(Self {
            api_host: api_host.trim_end_matches('/').to_string(),
            client: Client::builder().timeout(EDGE_TIMEOUT).build()?,
        })
    }

    #[instrument(skip(self, message), fields(domains = message.domains.len()))]
    pub async fn work(&self, message: InvalidationMessage) -> JobResult {
        for domain in &message.domains {
            let url = format!("{}/invalidate/{}", self.api_host, domain);

            let response = self
                .client
                .post(&url)
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .send()
                .await
                .map_err(|e| JobError::transient(format!("edge request failed: {}", e)))?;

            if response.status() != StatusCode::OK {
                return Err(JobError::transient(format!(
                    "edge returned {} invalidating {}",
                    response.status(),
                    domain
                )));
            }

            debug!(domain = %domain, "Invalidated domain");
        }

        Ok(())
    }
}

#[async_trait]
impl Handler for Invalidator {
    fn name(&self) -> &'static str {
        "edged"
    }

    async fn handle(&self, data: &[u8]) -> JobResult {
        self.work(decode(data)?).await
    }
}

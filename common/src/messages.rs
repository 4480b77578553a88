/*
 * SPDX-FileCopyrightText: 2026 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::consts::*;
use super::mq::MessageBus;

/// A message carried by one of the durable work queues.
pub trait Job: Serialize + DeserializeOwned {
    const QUEUE: &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushJobData {
    pub push_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildJobData {
    pub deployment_id: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployJobData {
    pub deployment_id: i64,
    #[serde(default)]
    pub skip_webroot_upload: bool,
    #[serde(default)]
    pub skip_invalidation: bool,
    #[serde(default)]
    pub use_raw_bundle: bool,
}

impl DeployJobData {
    pub fn new(deployment_id: i64) -> Self {
        Self {
            deployment_id,
            ..Default::default()
        }
    }

    /// Ships the uploaded bundle without the optimizer pass.
    pub fn raw(deployment_id: i64) -> Self {
        Self {
            deployment_id,
            use_raw_bundle: true,
            ..Default::default()
        }
    }

    pub fn rollback(deployment_id: i64) -> Self {
        Self {
            deployment_id,
            skip_webroot_upload: true,
            ..Default::default()
        }
    }

    /// Rewrites domain pointers of an already deployed deployment.
    pub fn pointer_refresh(deployment_id: i64) -> Self {
        Self {
            deployment_id,
            skip_webroot_upload: true,
            skip_invalidation: true,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationMessage {
    pub domains: Vec<String>,
}

impl Job for PushJobData {
    const QUEUE: &'static str = QUEUE_PUSH;
}

impl Job for BuildJobData {
    const QUEUE: &'static str = QUEUE_BUILD;
}

impl Job for DeployJobData {
    const QUEUE: &'static str = QUEUE_DEPLOY;
}

pub async fn enqueue<J: Job>(bus: &dyn MessageBus, job: &J) -> Result<()> {
    let body = serde_json::to_vec(job).context("Failed to encode job")?;
    bus.enqueue(J::QUEUE, &body)
        .await
        .with_context(|| format!("Failed to enqueue {} job", J::QUEUE))
}

pub async fn publish_invalidation(bus: &dyn MessageBus, domains: Vec<String>) -> Result<()> {
    let body = serde_json::to_vec(&InvalidationMessage { domains })
        .context("Failed to encode invalidation")?;
    bus.publish(EXCHANGE_EDGES, ROUTE_INVALIDATION, &body)
        .await
        .context("Failed to publish invalidation")
}

/// Enqueues a build, or a raw deploy when the project skips the optimizer.
/// Returns whether the build was skipped.
pub async fn enqueue_build_or_deploy(
    bus: &dyn MessageBus,
    deployment_id: i64,
    skip_build: bool,
) -> Result<bool> {
    if skip_build {
        enqueue(bus, &DeployJobData::raw(deployment_id)).await?;
    } else {
        enqueue(bus, &BuildJobData { deployment_id }).await?;
    }

    Ok(skip_build)
}

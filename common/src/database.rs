/*
 * SPDX-FileCopyrightText: 2026 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use chrono::{NaiveDateTime, Utc};
use entity::deployment::DeploymentState;
use migration::Migrator;
use sea_orm::ActiveValue::Set;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectOptions, ConnectionTrait, Database, DatabaseConnection,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, TransactionTrait,
};
use sea_orm_migration::MigratorTrait;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;
use tracing::log::LevelFilter;

use super::certs::CertInfo;
use super::input::{default_domain_name, generate_prefix};
use super::paths;
use super::types::*;

pub async fn connect_db(cli: &Cli) -> Result<DatabaseConnection> {
    let db_url = if let Some(file) = &cli.database_url_file {
        std::fs::read_to_string(file)
            .context("Failed to read database url from file")?
            .trim()
            .to_string()
    } else if let Some(url) = &cli.database_url {
        url.clone()
    } else {
        anyhow::bail!("No database url provided")
    };

    let mut opt = ConnectOptions::new(db_url);

    if cli.log_level == "debug" {
        opt.sqlx_logging(true)
            .sqlx_logging_level(LevelFilter::Debug);
    } else {
        opt.sqlx_logging(false);
    }

    opt.max_connections(50)
        .min_connections(2)
        .connect_timeout(Duration::from_secs(8))
        .acquire_timeout(Duration::from_secs(8))
        .idle_timeout(Duration::from_secs(60))
        .max_lifetime(Duration::from_secs(30 * 60));

    let db = Database::connect(opt)
        .await
        .context("Failed to connect to database")?;
    Migrator::up(&db, None)
        .await
        .context("Failed to run database migrations")?;
    Ok(db)
}

fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

pub async fn get_project_by_name<C: ConnectionTrait>(db: &C, name: &str) -> Result<Option<MProject>> {
    EProject::find()
        .filter(CProject::Name.eq(name))
        .filter(CProject::DeletedAt.is_null())
        .one(db)
        .await
        .context("Failed to query project")
}

pub async fn is_collaborator<C: ConnectionTrait>(
    db: &C,
    project: &MProject,
    user_id: i64,
) -> Result<bool> {
    if project.user_id == user_id {
        return Ok(true);
    }

    let collab = ECollab::find()
        .filter(CCollab::ProjectId.eq(project.id))
        .filter(CCollab::UserId.eq(user_id))
        .one(db)
        .await
        .context("Failed to query collaborator")?;

    Ok(collab.is_some())
}

/// Sets `locked_at` if it is unset. Returns false when someone else holds the lock.
pub async fn lock_project<C: ConnectionTrait>(db: &C, project_id: i64) -> Result<bool> {
    let result = EProject::update_many()
        .col_expr(CProject::LockedAt, Expr::value(now()))
        .filter(CProject::Id.eq(project_id))
        .filter(CProject::LockedAt.is_null())
        .exec(db)
        .await
        .context("Failed to lock project")?;

    Ok(result.rows_affected == 1)
}

pub async fn unlock_project<C: ConnectionTrait>(db: &C, project_id: i64) -> Result<()> {
    EProject::update_many()
        .col_expr(CProject::LockedAt, Expr::value(Option::<NaiveDateTime>::None))
        .filter(CProject::Id.eq(project_id))
        .filter(CProject::LockedAt.is_not_null())
        .exec(db)
        .await
        .context("Failed to unlock project")?;

    Ok(())
}

/// Held project lock. Dropping it without `release` (a cancelled request or
/// job) unlocks in a spawned task.
#[derive(Debug)]
pub struct ProjectLock {
    state: Arc<ServerState>,
    project_id: i64,
    armed: bool,
}

impl ProjectLock {
    /// `None` when someone else holds the lock.
    pub async fn acquire(state: &Arc<ServerState>, project_id: i64) -> Result<Option<Self>> {
        if !lock_project(&state.db, project_id).await? {
            return Ok(None);
        }

        Ok(Some(Self {
            state: Arc::clone(state),
            project_id,
            armed: true,
        }))
    }

    pub async fn release(mut self) -> Result<()> {
        self.armed = false;
        unlock_project(&self.state.db, self.project_id).await
    }
}

impl Drop for ProjectLock {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let project_id = self.project_id;
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            error!(project_id, "Dropped project lock outside of a runtime, lock stays set");
            return;
        };

        let state = Arc::clone(&self.state);
        handle.spawn(async move {
            if let Err(e) = unlock_project(&state.db, project_id).await {
                error!(error = %e, project_id, "Failed to unlock project");
            }
        });
    }
}

/// Highest version ever assigned in the project plus one, soft-deleted rows included.
pub async fn next_version<C: ConnectionTrait>(db: &C, project_id: i64) -> Result<i64> {
    let latest = EDeployment::find()
        .filter(CDeployment::ProjectId.eq(project_id))
        .order_by_desc(CDeployment::Version)
        .one(db)
        .await
        .context("Failed to query latest deployment version")?;

    Ok(latest.map(|d| d.version + 1).unwrap_or(1))
}

#[derive(Debug, Clone)]
pub struct NewDeployment {
    pub project_id: i64,
    pub user_id: i64,
    pub state: DeploymentState,
    pub raw_bundle_id: Option<i64>,
    pub checksum: Option<String>,
    pub js_env_vars: serde_json::Value,
}

/// Inserts a deployment with the next version of its project in its own
/// transaction.
pub async fn create_deployment(db: &DatabaseConnection, new: NewDeployment) -> Result<MDeployment> {
    let txn = db.begin().await.context("Failed to begin transaction")?;
    let deployment = insert_deployment(&txn, new).await?;
    txn.commit().await.context("Failed to commit deployment")?;

    Ok(deployment)
}

/// Locks the project row and inserts a deployment with the next version. Run
/// inside a transaction so concurrent inserts queue up on the lock.
pub async fn insert_deployment<C: ConnectionTrait>(txn: &C, new: NewDeployment) -> Result<MDeployment> {
    EProject::find_by_id(new.project_id)
        .lock_exclusive()
        .one(txn)
        .await
        .context("Failed to lock project row")?
        .with_context(|| format!("Project {} not found", new.project_id))?;

    let version = next_version(txn, new.project_id).await?;
    let now = now();

    let adeployment = ADeployment {
        project_id: Set(new.project_id),
        user_id: Set(new.user_id),
        state: Set(new.state),
        prefix: Set(generate_prefix()),
        version: Set(version),
        raw_bundle_id: Set(new.raw_bundle_id),
        checksum: Set(new.checksum),
        js_env_vars: Set(new.js_env_vars),
        error_message: Set(None),
        deployed_at: Set(None),
        purged_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        deleted_at: Set(None),
        ..Default::default()
    };

    adeployment
        .insert(txn)
        .await
        .context("Failed to insert deployment")
}

/// Default domain first (when enabled), then custom domains by name.
pub async fn domain_names<C: ConnectionTrait>(
    db: &C,
    project: &MProject,
    default_domain: &str,
) -> Result<Vec<String>> {
    let domains = EDomain::find()
        .filter(CDomain::ProjectId.eq(project.id))
        .order_by_asc(CDomain::Name)
        .all(db)
        .await
        .context("Failed to query domains")?;

    let mut names = Vec::with_capacity(domains.len() + 1);
    if project.default_domain_enabled {
        names.push(default_domain_name(&project.name, default_domain));
    }

    names.extend(domains.into_iter().map(|d| d.name));
    Ok(names)
}

/// Domain names prefixed with the scheme the site is served on. The default
/// domain and domains with a certificate use https.
pub async fn domain_names_with_protocol<C: ConnectionTrait>(
    db: &C,
    project: &MProject,
    default_domain: &str,
) -> Result<Vec<String>> {
    let domains = EDomain::find()
        .filter(CDomain::ProjectId.eq(project.id))
        .order_by_asc(CDomain::Name)
        .all(db)
        .await
        .context("Failed to query domains")?;

    let secured: Vec<i64> = ECert::find()
        .filter(CCert::DomainId.is_in(domains.iter().map(|d| d.id).collect::<Vec<i64>>()))
        .all(db)
        .await
        .context("Failed to query certs")?
        .into_iter()
        .map(|c| c.domain_id)
        .collect();

    let mut names = Vec::with_capacity(domains.len() + 1);
    if project.default_domain_enabled {
        names.push(format!(
            "https://{}",
            default_domain_name(&project.name, default_domain)
        ));
    }

    names.extend(domains.into_iter().map(|d| {
        let scheme = if secured.contains(&d.id) { "https" } else { "http" };
        format!("{}://{}", scheme, d.name)
    }));

    Ok(names)
}

pub async fn count_domains<C: ConnectionTrait>(db: &C, project_id: i64) -> Result<u64> {
    EDomain::find()
        .filter(CDomain::ProjectId.eq(project_id))
        .count(db)
        .await
        .context("Failed to count domains")
}

pub async fn find_domain<C: ConnectionTrait>(
    db: &C,
    project_id: i64,
    name: &str,
) -> Result<Option<MDomain>> {
    EDomain::find()
        .filter(CDomain::ProjectId.eq(project_id))
        .filter(CDomain::Name.eq(name))
        .one(db)
        .await
        .context("Failed to query domain")
}

/// Deployed, not deleted deployments newest first. A limit of 0 returns all.
pub async fn completed_deployments<C: ConnectionTrait>(
    db: &C,
    project_id: i64,
    limit: u64,
) -> Result<Vec<MDeployment>> {
    let mut query = EDeployment::find()
        .filter(CDeployment::ProjectId.eq(project_id))
        .filter(CDeployment::State.eq(DeploymentState::Deployed))
        .filter(CDeployment::DeletedAt.is_null())
        .order_by_desc(CDeployment::DeployedAt);

    if limit > 0 {
        query = query.limit(limit);
    }

    query
        .all(db)
        .await
        .context("Failed to query completed deployments")
}

/// The deployed deployment that went live right before `current`.
pub async fn previous_completed_deployment<C: ConnectionTrait>(
    db: &C,
    current: &MDeployment,
) -> Result<Option<MDeployment>> {
    let Some(deployed_at) = current.deployed_at else {
        return Ok(None);
    };

    if current.state != DeploymentState::Deployed {
        return Ok(None);
    }

    EDeployment::find()
        .filter(CDeployment::ProjectId.eq(current.project_id))
        .filter(CDeployment::State.eq(DeploymentState::Deployed))
        .filter(CDeployment::DeletedAt.is_null())
        .filter(CDeployment::DeployedAt.lt(deployed_at))
        .order_by_desc(CDeployment::DeployedAt)
        .one(db)
        .await
        .context("Failed to query previous deployment")
}

/// Soft-deletes every deployed deployment older than the newest `n`.
pub async fn delete_except_last_n<C: ConnectionTrait>(
    db: &C,
    project_id: i64,
    n: u64,
) -> Result<u64> {
    let cutoff = EDeployment::find()
        .filter(CDeployment::ProjectId.eq(project_id))
        .filter(CDeployment::State.eq(DeploymentState::Deployed))
        .filter(CDeployment::DeletedAt.is_null())
        .order_by_desc(CDeployment::DeployedAt)
        .offset(n)
        .one(db)
        .await
        .context("Failed to query deployment cutoff")?;

    let Some(cutoff) = cutoff.and_then(|d| d.deployed_at) else {
        return Ok(0);
    };

    let result = EDeployment::update_many()
        .col_expr(CDeployment::DeletedAt, Expr::value(now()))
        .filter(CDeployment::ProjectId.eq(project_id))
        .filter(CDeployment::State.eq(DeploymentState::Deployed))
        .filter(CDeployment::DeletedAt.is_null())
        .filter(CDeployment::DeployedAt.lte(cutoff))
        .exec(db)
        .await
        .context("Failed to delete old deployments")?;

    Ok(result.rows_affected)
}

/// Blob key of the bundle a deployment was uploaded with.
pub async fn raw_bundle_key<C: ConnectionTrait>(db: &C, deployment: &MDeployment) -> Result<String> {
    if let Some(id) = deployment.raw_bundle_id {
        let bundle = ERawBundle::find_by_id(id)
            .one(db)
            .await
            .context("Failed to query raw bundle")?;

        if let Some(bundle) = bundle {
            return Ok(bundle.uploaded_path);
        }
    }

    Ok(paths::raw_bundle_key(&deployment.prefix_id()))
}

pub async fn find_raw_bundle<C: ConnectionTrait>(
    db: &C,
    project_id: i64,
    checksum: &str,
) -> Result<Option<MRawBundle>> {
    ERawBundle::find()
        .filter(CRawBundle::ProjectId.eq(project_id))
        .filter(CRawBundle::Checksum.eq(checksum))
        .filter(CRawBundle::DeletedAt.is_null())
        .order_by_desc(CRawBundle::Id)
        .one(db)
        .await
        .context("Failed to query raw bundle")
}

pub async fn create_raw_bundle<C: ConnectionTrait>(
    db: &C,
    project_id: i64,
    checksum: &str,
    uploaded_path: &str,
) -> Result<MRawBundle> {
    ARawBundle {
        project_id: Set(project_id),
        checksum: Set(checksum.to_string()),
        uploaded_path: Set(uploaded_path.to_string()),
        created_at: Set(now()),
        deleted_at: Set(None),
        ..Default::default()
    }
    .insert(db)
    .await
    .context("Failed to insert raw bundle")
}

/// Creates or refreshes the cert row of a domain.
pub async fn upsert_cert<C: ConnectionTrait>(
    db: &C,
    domain: &MDomain,
    info: &CertInfo,
) -> Result<MCert> {
    let existing = ECert::find()
        .filter(CCert::DomainId.eq(domain.id))
        .one(db)
        .await
        .context("Failed to query cert")?;

    let now = now();
    let fill = |acert: &mut ACert| {
        acert.certificate_path = Set(paths::cert_key(&domain.name));
        acert.private_key_path = Set(paths::cert_private_key_key(&domain.name));
        acert.starts_at = Set(info.starts_at);
        acert.expires_at = Set(info.expires_at);
        acert.common_name = Set(info.common_name.clone());
        acert.issuer = Set(info.issuer.clone());
        acert.subject = Set(info.subject.clone());
        acert.updated_at = Set(now);
    };

    let cert = match existing {
        Some(cert) => {
            let mut acert: ACert = cert.into();
            fill(&mut acert);
            acert.update(db).await
        }
        None => {
            let mut acert = ACert {
                domain_id: Set(domain.id),
                created_at: Set(now),
                ..Default::default()
            };
            fill(&mut acert);
            acert.insert(db).await
        }
    };

    cert.context("Failed to save cert")
}

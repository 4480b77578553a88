/*
 * SPDX-FileCopyrightText: 2026 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Deployment state transitions.
//!
//! Every transition is a compare-and-set on the expected source state, so a
//! redelivered job that finds its deployment already moved on changes nothing.

use chrono::Utc;
use entity::deployment::DeploymentState;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    TransactionTrait,
};
use thiserror::Error;
use tracing::info;

use super::database::delete_except_last_n;
use super::error::{ErrorKind, JobError};
use super::types::*;

#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("illegal transition from {from} to {to}")]
    Illegal {
        from: DeploymentState,
        to: DeploymentState,
    },
    #[error("deployment {id} is not in expected state {expected}")]
    Stale { id: i64, expected: DeploymentState },
    #[error("database error: {0}")]
    Database(#[from] DbErr),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<TransitionError> for JobError {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::Illegal { .. } | TransitionError::Stale { .. } => {
                JobError::new(ErrorKind::Precondition, err.to_string())
            }
            e => JobError::transient(e.to_string()),
        }
    }
}

pub async fn transition<C: ConnectionTrait>(
    db: &C,
    deployment: &MDeployment,
    to: DeploymentState,
) -> Result<MDeployment, TransitionError> {
    apply(db, deployment, to, None).await
}

/// Moves a deployment into `build_failed` or `deploy_failed` with a message
/// the user will see.
pub async fn fail<C: ConnectionTrait>(
    db: &C,
    deployment: &MDeployment,
    to: DeploymentState,
    message: &str,
) -> Result<MDeployment, TransitionError> {
    if !to.is_failure() {
        return Err(TransitionError::Illegal {
            from: deployment.state,
            to,
        });
    }

    apply(db, deployment, to, Some(message)).await
}

pub async fn set_error_message<C: ConnectionTrait>(
    db: &C,
    deployment_id: i64,
    message: &str,
) -> Result<(), TransitionError> {
    EDeployment::update_many()
        .col_expr(CDeployment::ErrorMessage, Expr::value(message))
        .col_expr(CDeployment::UpdatedAt, Expr::value(Utc::now().naive_utc()))
        .filter(CDeployment::Id.eq(deployment_id))
        .exec(db)
        .await?;

    Ok(())
}

async fn apply<C: ConnectionTrait>(
    db: &C,
    deployment: &MDeployment,
    to: DeploymentState,
    error_message: Option<&str>,
) -> Result<MDeployment, TransitionError> {
    let from = deployment.state;

    if !from.can_transition_to(to) {
        return Err(TransitionError::Illegal { from, to });
    }

    let now = Utc::now().naive_utc();
    let mut updated = deployment.clone();
    updated.state = to;
    updated.updated_at = now;

    let mut update = EDeployment::update_many()
        .col_expr(CDeployment::State, Expr::value(to))
        .col_expr(CDeployment::UpdatedAt, Expr::value(now));

    if to == DeploymentState::Deployed {
        update = update.col_expr(CDeployment::DeployedAt, Expr::value(now));
        updated.deployed_at = Some(now);
    }

    if let Some(message) = error_message {
        update = update.col_expr(CDeployment::ErrorMessage, Expr::value(message));
        updated.error_message = Some(message.to_string());
    }

    let result = update
        .filter(CDeployment::Id.eq(deployment.id))
        .filter(CDeployment::State.eq(from))
        .exec(db)
        .await?;

    if result.rows_affected != 1 {
        return Err(TransitionError::Stale {
            id: deployment.id,
            expected: from,
        });
    }

    info!(
        deployment_id = deployment.id,
        project_id = deployment.project_id,
        from = %from,
        to = %to,
        "Deployment state changed"
    );

    Ok(updated)
}

/// Marks a deployment live: sets it deployed, points the project at it and
/// soft-deletes deployments beyond `max_deploys_kept`, all in one transaction.
pub async fn mark_deployed(
    db: &DatabaseConnection,
    deployment: &MDeployment,
    project: &MProject,
) -> Result<MDeployment, TransitionError> {
    let txn = db.begin().await?;

    let deployed = transition(&txn, deployment, DeploymentState::Deployed).await?;

    EProject::update_many()
        .col_expr(CProject::ActiveDeploymentId, Expr::value(deployed.id))
        .col_expr(CProject::UpdatedAt, Expr::value(Utc::now().naive_utc()))
        .filter(CProject::Id.eq(project.id))
        .exec(&txn)
        .await?;

    if project.max_deploys_kept > 0 {
        let deleted = delete_except_last_n(&txn, project.id, project.max_deploys_kept as u64).await?;
        if deleted > 0 {
            info!(project_id = project.id, deleted, "Soft-deleted old deployments");
        }
    }

    txn.commit().await?;
    Ok(deployed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};
    use serde_json::json;

    fn deployment(state: DeploymentState) -> MDeployment {
        let date = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();

        MDeployment {
            id: 5,
            project_id: 1,
            user_id: 1,
            state,
            prefix: "a1b2".to_string(),
            version: 2,
            raw_bundle_id: None,
            checksum: None,
            js_env_vars: json!({}),
            error_message: None,
            deployed_at: None,
            purged_at: None,
            created_at: date,
            updated_at: date,
            deleted_at: None,
        }
    }

    fn project() -> MProject {
        let date = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();

        MProject {
            id: 1,
            user_id: 1,
            name: "foo".to_string(),
            active_deployment_id: None,
            locked_at: None,
            skip_build: false,
            max_deploys_kept: 10,
            default_domain_enabled: true,
            force_https: false,
            watermark: false,
            basic_auth_username: None,
            encrypted_basic_auth_password: None,
            created_at: date,
            updated_at: date,
            deleted_at: None,
        }
    }

    fn exec(rows_affected: u64) -> MockExecResult {
        MockExecResult {
            last_insert_id: 0,
            rows_affected,
        }
    }

    #[tokio::test]
    async fn test_transition_applies_compare_and_set() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([exec(1)])
            .into_connection();

        let updated = transition(&db, &deployment(DeploymentState::PendingBuild), DeploymentState::Built)
            .await
            .unwrap();

        assert_eq!(updated.state, DeploymentState::Built);

        let log = db.into_transaction_log();
        assert_eq!(log.len(), 1);
        let sql = format!("{:?}", log[0]);
        assert!(sql.contains("UPDATE"));
        assert!(sql.contains("deployment"));
    }

    #[tokio::test]
    async fn test_transition_to_deployed_sets_timestamp() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([exec(1)])
            .into_connection();

        let updated = transition(
            &db,
            &deployment(DeploymentState::PendingDeploy),
            DeploymentState::Deployed,
        )
        .await
        .unwrap();

        assert!(updated.deployed_at.is_some());
    }

    #[tokio::test]
    async fn test_stale_transition() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([exec(0)])
            .into_connection();

        let err = transition(&db, &deployment(DeploymentState::PendingBuild), DeploymentState::Built)
            .await
            .unwrap_err();

        assert!(matches!(err, TransitionError::Stale { id: 5, .. }));
        assert!(JobError::from(err).is_permanent());
    }

    #[tokio::test]
    async fn test_illegal_transition_skips_database() {
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();

        let err = transition(&db, &deployment(DeploymentState::Deployed), DeploymentState::Built)
            .await
            .unwrap_err();

        assert!(matches!(err, TransitionError::Illegal { .. }));
        assert!(db.into_transaction_log().is_empty());
    }

    #[tokio::test]
    async fn test_fail_records_message() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([exec(1)])
            .into_connection();

        let failed = fail(
            &db,
            &deployment(DeploymentState::PendingUpload),
            DeploymentState::DeployFailed,
            "no pubstorm.json",
        )
        .await
        .unwrap();

        assert_eq!(failed.state, DeploymentState::DeployFailed);
        assert_eq!(failed.error_message.as_deref(), Some("no pubstorm.json"));

        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        assert!(
            fail(&db, &deployment(DeploymentState::PendingBuild), DeploymentState::Built, "x")
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_mark_deployed() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([exec(1), exec(1)])
            .append_query_results([Vec::<MDeployment>::new()])
            .into_connection();

        let deployed = mark_deployed(&db, &deployment(DeploymentState::PendingDeploy), &project())
            .await
            .unwrap();

        assert_eq!(deployed.state, DeploymentState::Deployed);
        assert!(deployed.deployed_at.is_some());
    }
}

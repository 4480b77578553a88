/*
 * SPDX-FileCopyrightText: 2026 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

mod common;

use crate::common::*;
use ::common::consts::MSG_MISSING_PUBSTORM_JSON;
use ::common::error::ErrorKind;
use ::common::messages::PushJobData;
use ::common::storage::Acl;
use ::common::types::{MPush, MRawBundle, MRepo};
use entity::deployment::DeploymentState;
use sea_orm::{DatabaseBackend, MockDatabase};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use worker::github::{FakeGithubFetcher, ProjectConfig};
use worker::push::PushWorker;

const ARCHIVE_URL: &str = "https://api.github.com/repos/PubStorm/site/{archive_format}{/ref}";

fn push() -> MPush {
    MPush {
        id: 9,
        repo_id: 3,
        deployment_id: 5,
        git_ref: "refs/heads/master".to_string(),
        payload: json!({
            "ref": "refs/heads/master",
            "after": "abc123",
            "repository": {
                "full_name": "PubStorm/site",
                "archive_url": ARCHIVE_URL,
            }
        })
        .to_string(),
        processed_at: None,
        created_at: date(),
    }
}

fn repo() -> MRepo {
    MRepo {
        id: 3,
        project_id: 1,
        user_id: 1,
        uri: "https://github.com/PubStorm/site.git".to_string(),
        branch: "master".to_string(),
        webhook_path: "f00ba7".to_string(),
        webhook_secret: None,
        created_at: date(),
    }
}

#[tokio::test]
async fn test_push_without_pubstorm_json() {
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results([vec![push()]])
        .append_query_results([vec![repo()]])
        .append_query_results([vec![deployment(5, DeploymentState::PendingUpload)]])
        .append_query_results([vec![project()]])
        .append_exec_results([exec(1)])
        .into_connection();
    let env = create_mock_state(db);

    let worker = PushWorker::new(Arc::clone(&env.state), Arc::new(FakeGithubFetcher::new()));
    let err = worker.work(PushJobData { push_id: 9 }).await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::PermanentExternal);
    assert!(err.is_permanent());
    assert!(env.storage.keys().is_empty());
    assert!(env.bus.sent().is_empty());

    drop(worker);
    let state = Arc::try_unwrap(env.state).unwrap();
    let log = format!("{:?}", state.db.into_transaction_log());
    assert!(log.contains(MSG_MISSING_PUBSTORM_JSON));
}

#[tokio::test]
async fn test_push_repacks_site_directory() {
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results([vec![push()]])
        .append_query_results([vec![repo()]])
        .append_query_results([vec![deployment(5, DeploymentState::PendingUpload)]])
        .append_query_results([vec![project()]])
        .append_query_results([vec![MRawBundle {
            id: 11,
            project_id: 1,
            checksum: "inserted".to_string(),
            uploaded_path: "deployments/a1b2-5/raw-bundle.tar.gz".to_string(),
            created_at: date(),
            deleted_at: None,
        }]])
        .append_exec_results([exec(1), exec(1), exec(1), exec(1)])
        .into_connection();
    let env = create_mock_state(db);

    let archive = tar_gz(&[
        ("PubStorm-site-abc123/README.md", b"# site"),
        ("PubStorm-site-abc123/pubstorm.json", br#"{"path": "build"}"#),
        ("PubStorm-site-abc123/build/index.html", b"hi"),
        ("PubStorm-site-abc123/build/css/site.css", b"body {}"),
    ]);
    let github = FakeGithubFetcher::new()
        .with_config(
            "PubStorm/site",
            "abc123",
            ProjectConfig::Found {
                path: "build".to_string(),
            },
        )
        .with_archive(
            "https://api.github.com/repos/PubStorm/site/tarball/abc123",
            archive,
        );

    let worker = PushWorker::new(Arc::clone(&env.state), Arc::new(github));
    worker.work(PushJobData { push_id: 9 }).await.unwrap();

    let bundle = env
        .storage
        .get("deployments/a1b2-5/raw-bundle.tar.gz")
        .expect("raw bundle uploaded");
    assert_eq!(bundle.acl, Acl::Private);
    assert_eq!(
        tar_gz_names(&bundle.body),
        vec!["css/site.css".to_string(), "index.html".to_string()]
    );

    assert_eq!(env.bus.enqueued("build"), vec![json!({"deployment_id": 5})]);
    assert!(env.bus.enqueued("deploy").is_empty());

    drop(worker);
    let checksum = hex::encode(Sha256::digest(&bundle.body));
    let state = Arc::try_unwrap(env.state).unwrap();
    let log = state
        .db
        .into_transaction_log()
        .iter()
        .map(|entry| format!("{:?}", entry))
        .collect::<Vec<_>>();
    let insert = log
        .iter()
        .find(|entry| entry.contains("INSERT"))
        .expect("raw bundle inserted");
    assert!(insert.contains("raw_bundle"));
    assert!(insert.contains(&checksum));
    let update = log
        .iter()
        .find(|entry| entry.contains("UPDATE") && entry.contains("raw_bundle_id"))
        .expect("deployment points at the raw bundle");
    assert!(update.contains("BigInt(Some(11))"));
    assert!(update.contains(&checksum));
}

#[tokio::test]
async fn test_push_for_started_deployment_is_noop() {
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results([vec![push()]])
        .append_query_results([vec![repo()]])
        .append_query_results([vec![deployment(5, DeploymentState::PendingBuild)]])
        .into_connection();
    let env = create_mock_state(db);

    let worker = PushWorker::new(Arc::clone(&env.state), Arc::new(FakeGithubFetcher::new()));
    let err = worker.work(PushJobData { push_id: 9 }).await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::Precondition);
    assert!(env.storage.calls().is_empty());
    assert!(env.bus.sent().is_empty());
}

/*
 * SPDX-FileCopyrightText: 2026 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

mod common;

use crate::common::*;
use ::common::acme::FakeAcmeClient;
use ::common::storage::{Acl, StorageCall};
use ::common::types::MDeployment;
use jobs::purger::{PurgeTally, purge_deleted};
use sea_orm::{DatabaseBackend, MockDatabase};
use std::sync::Arc;

#[tokio::test]
async fn test_purges_deleted_deployment() {
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results([vec![deleted_deployment(5, "a1b2")]])
        .append_exec_results([exec(1), exec(1)])
        .into_connection();
    let env = create_mock_state(db, FakeAcmeClient::new());

    for key in [
        "deployments/a1b2-5/raw-bundle.tar.gz",
        "deployments/a1b2-5/webroot/index.html",
        "deployments/a1b2-50/webroot/index.html",
    ] {
        env.storage.insert(key, b"x".to_vec(), Acl::Private, "text/html");
    }

    let tally = purge_deleted(Arc::clone(&env.state)).await.unwrap();

    assert_eq!(
        tally,
        PurgeTally {
            found: 1,
            purged: 1,
            failed: 0,
        }
    );
    assert_eq!(
        env.storage.keys(),
        vec!["deployments/a1b2-50/webroot/index.html".to_string()]
    );

    let db = Arc::try_unwrap(env.state).unwrap().db;
    let log = format!("{:?}", db.into_transaction_log());
    assert!(log.contains("purged_at"));
    assert!(log.contains("raw_bundle"));
    assert!(log.contains("deployments/a1b2-5/%"));
}

#[tokio::test]
async fn test_nothing_to_purge() {
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results([Vec::<MDeployment>::new()])
        .into_connection();
    let env = create_mock_state(db, FakeAcmeClient::new());

    let tally = purge_deleted(Arc::clone(&env.state)).await.unwrap();

    assert_eq!(tally, PurgeTally::default());
    assert!(env.storage.calls().is_empty());
}

#[tokio::test]
async fn test_database_failure_is_counted() {
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results([vec![deleted_deployment(5, "a1b2")]])
        .into_connection();
    let env = create_mock_state(db, FakeAcmeClient::new());

    let tally = purge_deleted(Arc::clone(&env.state)).await.unwrap();

    assert_eq!(tally.failed, 1);
    assert_eq!(
        env.storage.calls(),
        vec![StorageCall::DeletePrefix {
            prefix: "deployments/a1b2-5".to_string()
        }]
    );
}

/*
 * SPDX-FileCopyrightText: 2026 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

mod common;

use crate::common::*;
use ::common::consts::{BUNDLE_CONTENT_TYPE, EXCHANGE_EDGES, ROUTE_INVALIDATION};
use ::common::error::ErrorKind;
use ::common::messages::DeployJobData;
use ::common::storage::{Acl, StorageCall};
use ::common::types::{MDeployment, MDomain};
use entity::deployment::DeploymentState;
use sea_orm::{DatabaseBackend, MockDatabase};
use serde_json::json;
use std::sync::Arc;
use worker::deploy::DeployWorker;

fn meta(env: &TestEnv, domain: &str) -> serde_json::Value {
    let object = env
        .storage
        .get(&format!("domains/{}/meta.json", domain))
        .expect("meta.json uploaded");
    assert_eq!(object.acl, Acl::PublicRead);
    assert_eq!(object.content_type, "application/json");
    serde_json::from_slice(&object.body).unwrap()
}

fn webroot_uploads(env: &TestEnv) -> Vec<String> {
    env.storage
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            StorageCall::Upload { key, .. } if key.contains("/webroot/") => Some(key),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_first_deploy() {
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results([vec![deployment(5, DeploymentState::PendingDeploy)]])
        .append_query_results([vec![project()]])
        .append_query_results([vec![deployment(5, DeploymentState::PendingDeploy)]])
        .append_query_results([Vec::<MDomain>::new()])
        .append_query_results([Vec::<MDeployment>::new()])
        .append_exec_results([exec(1), exec(1), exec(1), exec(1)])
        .into_connection();
    let env = create_mock_state(db);

    env.storage.insert(
        "deployments/a1b2-5/optimized-bundle.tar.gz",
        tar_gz(&[
            ("index.html", b"<html><body>hi</body></html>"),
            ("css/site.css", b"body {}"),
            ("my page.html", b"skipped"),
        ]),
        Acl::Private,
        BUNDLE_CONTENT_TYPE,
    );

    let worker = DeployWorker::new(Arc::clone(&env.state));
    worker.work(DeployJobData::new(5)).await.unwrap();

    let index = env
        .storage
        .get("deployments/a1b2-5/webroot/index.html")
        .expect("index.html uploaded");
    assert_eq!(index.acl, Acl::PublicRead);
    assert_eq!(index.content_type, "text/html");
    let html = String::from_utf8(index.body.to_vec()).unwrap();
    assert!(html.starts_with("<html><body>hi<!-- PubStorm -->"));
    assert!(html.ends_with("</body></html>"));

    let css = env
        .storage
        .get("deployments/a1b2-5/webroot/css/site.css")
        .expect("site.css uploaded");
    assert_eq!(css.content_type, "text/css");
    assert_eq!(css.body.as_ref(), b"body {}");

    assert!(env.storage.get("deployments/a1b2-5/webroot/my page.html").is_none());
    assert!(env.storage.get("deployments/a1b2-5/webroot/jsenv.js").is_none());

    assert_eq!(meta(&env, "foo.pubstormapp.com"), json!({"prefix": "a1b2-5"}));
    assert_eq!(
        env.bus.published(EXCHANGE_EDGES, ROUTE_INVALIDATION),
        vec![json!({"domains": ["foo.pubstormapp.com"]})]
    );
}

#[tokio::test]
async fn test_raw_deploy_after_failed_build() {
    let mut failed = deployment(5, DeploymentState::BuildFailed);
    failed.js_env_vars = json!({"API_HOST": "https://api.foo.com"});

    let mut project = project();
    project.watermark = false;
    project.force_https = true;

    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results([vec![failed.clone()]])
        .append_query_results([vec![project]])
        .append_query_results([vec![failed]])
        .append_query_results([vec![domain(2, "www.foo.com")]])
        .append_query_results([Vec::<MDeployment>::new()])
        .append_exec_results([exec(1), exec(1), exec(1), exec(1)])
        .into_connection();
    let env = create_mock_state(db);

    env.storage.insert(
        "deployments/a1b2-5/raw-bundle.tar.gz",
        tar_gz(&[("index.html", b"<html><body>raw</body></html>")]),
        Acl::Private,
        BUNDLE_CONTENT_TYPE,
    );

    let worker = DeployWorker::new(Arc::clone(&env.state));
    worker.work(DeployJobData::raw(5)).await.unwrap();

    let index = env
        .storage
        .get("deployments/a1b2-5/webroot/index.html")
        .unwrap();
    assert_eq!(index.body.as_ref(), b"<html><body>raw</body></html>");

    let jsenv = env
        .storage
        .get("deployments/a1b2-5/webroot/jsenv.js")
        .expect("jsenv.js uploaded");
    assert_eq!(jsenv.content_type, "application/javascript");
    assert!(
        String::from_utf8(jsenv.body.to_vec())
            .unwrap()
            .contains(r#"{"API_HOST":"https://api.foo.com"}"#)
    );

    let expected = json!({"prefix": "a1b2-5", "force_https": true});
    assert_eq!(meta(&env, "foo.pubstormapp.com"), expected);
    assert_eq!(meta(&env, "www.foo.com"), expected);
    assert_eq!(
        env.bus.published(EXCHANGE_EDGES, ROUTE_INVALIDATION),
        vec![json!({"domains": ["foo.pubstormapp.com", "www.foo.com"]})]
    );
}

#[tokio::test]
async fn test_optimized_deploy_after_reported_errors() {
    let failed = deployment(5, DeploymentState::BuildFailed);

    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results([vec![failed.clone()]])
        .append_query_results([vec![project()]])
        .append_query_results([vec![failed]])
        .append_query_results([Vec::<MDomain>::new()])
        .append_query_results([Vec::<MDeployment>::new()])
        .append_exec_results([exec(1), exec(1), exec(1), exec(1)])
        .into_connection();
    let env = create_mock_state(db);

    env.storage.insert(
        "deployments/a1b2-5/optimized-bundle.tar.gz",
        tar_gz(&[("index.html", b"<html><body>optimized</body></html>")]),
        Acl::Private,
        BUNDLE_CONTENT_TYPE,
    );

    let worker = DeployWorker::new(Arc::clone(&env.state));
    worker.work(DeployJobData::new(5)).await.unwrap();

    let index = env
        .storage
        .get("deployments/a1b2-5/webroot/index.html")
        .unwrap();
    assert!(String::from_utf8(index.body.to_vec()).unwrap().contains("optimized"));
    assert!(env.storage.get("domains/foo.pubstormapp.com/meta.json").is_some());
}

#[tokio::test]
async fn test_rollback_rewrites_pointers_only() {
    let mut project = project();
    project.active_deployment_id = Some(7);

    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results([vec![deployment(5, DeploymentState::PendingRollback)]])
        .append_query_results([vec![project]])
        .append_query_results([vec![deployment(5, DeploymentState::PendingRollback)]])
        .append_query_results([vec![domain(2, "www.foo.com")]])
        .append_query_results([Vec::<MDeployment>::new()])
        .append_exec_results([exec(1), exec(1), exec(1), exec(1)])
        .into_connection();
    let env = create_mock_state(db);

    let worker = DeployWorker::new(Arc::clone(&env.state));
    worker.work(DeployJobData::rollback(5)).await.unwrap();

    assert!(webroot_uploads(&env).is_empty());
    assert_eq!(meta(&env, "foo.pubstormapp.com")["prefix"], "a1b2-5");
    assert_eq!(meta(&env, "www.foo.com")["prefix"], "a1b2-5");
    assert_eq!(
        env.bus.published(EXCHANGE_EDGES, ROUTE_INVALIDATION),
        vec![json!({"domains": ["foo.pubstormapp.com", "www.foo.com"]})]
    );
}

#[tokio::test]
async fn test_pointer_refresh_keeps_state() {
    let mut project = project();
    project.active_deployment_id = Some(5);

    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results([vec![deployment(5, DeploymentState::Deployed)]])
        .append_query_results([vec![project]])
        .append_query_results([vec![deployment(5, DeploymentState::Deployed)]])
        .append_query_results([vec![domain(2, "www.foo.com")]])
        .append_exec_results([exec(1), exec(1)])
        .into_connection();
    let env = create_mock_state(db);

    let worker = DeployWorker::new(Arc::clone(&env.state));
    worker.work(DeployJobData::pointer_refresh(5)).await.unwrap();

    assert_eq!(meta(&env, "www.foo.com"), json!({"prefix": "a1b2-5"}));
    assert!(env.bus.sent().is_empty());
    assert!(webroot_uploads(&env).is_empty());
}

#[tokio::test]
async fn test_redelivered_deploy_is_noop() {
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results([vec![deployment(5, DeploymentState::Deployed)]])
        .into_connection();
    let env = create_mock_state(db);

    let worker = DeployWorker::new(Arc::clone(&env.state));
    let err = worker.work(DeployJobData::new(5)).await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::Precondition);
    assert!(env.storage.calls().is_empty());
    assert!(env.bus.sent().is_empty());
}

#[tokio::test]
async fn test_corrupt_bundle_fails_deployment() {
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results([vec![deployment(5, DeploymentState::PendingDeploy)]])
        .append_query_results([vec![project()]])
        .append_query_results([vec![deployment(5, DeploymentState::PendingDeploy)]])
        .append_exec_results([exec(1), exec(1), exec(1)])
        .into_connection();
    let env = create_mock_state(db);

    env.storage.insert(
        "deployments/a1b2-5/optimized-bundle.tar.gz",
        b"definitely not gzip".to_vec(),
        Acl::Private,
        BUNDLE_CONTENT_TYPE,
    );

    let worker = DeployWorker::new(Arc::clone(&env.state));
    let err = worker.work(DeployJobData::new(5)).await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::PermanentExternal);
    assert!(webroot_uploads(&env).is_empty());
    assert!(env.bus.sent().is_empty());
}

/*
 * SPDX-FileCopyrightText: 2026 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

pub use sea_orm_migration::prelude::*;

mod m20260301_000001_create_table_user;
mod m20260301_000002_create_table_oauth_client;
mod m20260301_000003_create_table_oauth_token;
mod m20260301_000004_create_table_project;
mod m20260301_000005_create_table_collab;
mod m20260301_000006_create_table_raw_bundle;
mod m20260301_000007_create_table_deployment;
mod m20260301_000008_create_table_domain;
mod m20260301_000009_create_table_cert;
mod m20260301_000010_create_table_acme_cert;
mod m20260301_000011_create_table_repo;
mod m20260301_000012_create_table_push;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260301_000001_create_table_user::Migration),
            Box::new(m20260301_000002_create_table_oauth_client::Migration),
            Box::new(m20260301_000003_create_table_oauth_token::Migration),
            Box::new(m20260301_000004_create_table_project::Migration),
            Box::new(m20260301_000005_create_table_collab::Migration),
            Box::new(m20260301_000006_create_table_raw_bundle::Migration),
            Box::new(m20260301_000007_create_table_deployment::Migration),
            Box::new(m20260301_000008_create_table_domain::Migration),
            Box::new(m20260301_000009_create_table_cert::Migration),
            Box::new(m20260301_000010_create_table_acme_cert::Migration),
            Box::new(m20260301_000011_create_table_repo::Migration),
            Box::new(m20260301_000012_create_table_push::Migration),
        ]
    }
}

/*
 * SPDX-FileCopyrightText: 2026 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(AcmeCert::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AcmeCert::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(AcmeCert::DomainId)
                            .big_integer()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(AcmeCert::LetsencryptKey).text().not_null())
                    .col(ColumnDef::new(AcmeCert::PrivateKey).text().not_null())
                    .col(ColumnDef::new(AcmeCert::Cert).text())
                    .col(ColumnDef::new(AcmeCert::CertUri).string())
                    .col(ColumnDef::new(AcmeCert::HttpChallengePath).string())
                    .col(ColumnDef::new(AcmeCert::HttpChallengeResource).string())
                    .col(ColumnDef::new(AcmeCert::CreatedAt).date_time().not_null())
                    .col(ColumnDef::new(AcmeCert::UpdatedAt).date_time().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-acme_cert-domain_id")
                            .from(AcmeCert::Table, AcmeCert::DomainId)
                            .to(Domain::Table, Domain::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(AcmeCert::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum AcmeCert {
    Table,
    Id,
    DomainId,
    LetsencryptKey,
    PrivateKey,
    Cert,
    CertUri,
    HttpChallengePath,
    HttpChallengeResource,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Domain {
    Table,
    Id,
}

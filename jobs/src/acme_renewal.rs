/*
 * SPDX-FileCopyrightText: 2026 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Renews Let's Encrypt certificates that are about to expire.

use anyhow::{Context, Result, anyhow};
use bytes::Bytes;
use chrono::{Duration, Utc};
use common::acme::Renewal;
use common::certs;
use common::consts::ACME_RENEWAL_THRESHOLD_DAYS;
use common::database::upsert_cert;
use common::messages::publish_invalidation;
use common::paths;
use common::storage::Acl;
use common::types::*;
use futures::StreamExt;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use std::sync::{Arc, Mutex};
use tracing::{error, info, instrument};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenewalTally {
    pub attempted: usize,
    pub renewed: usize,
    pub not_ready: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewOutcome {
    Renewed,
    /// The CA has not issued the renewal yet.
    NotReady,
}

/// Issuer certificate shared by every renewal of one run. The first issuer
/// seen wins.
#[derive(Debug, Default)]
pub struct IssuerCache(Mutex<Option<String>>);

impl IssuerCache {
    pub fn resolve(&self, candidate: Option<String>) -> Option<String> {
        let mut cached = self.0.lock().unwrap_or_else(|e| e.into_inner());
        if cached.is_none() {
            *cached = candidate;
        }

        cached.clone()
    }
}

/// Let's Encrypt certs whose `Cert` row expires before `deadline`.
pub async fn find_expiring_acme_certs(
    state: &ServerState,
    deadline: chrono::NaiveDateTime,
) -> Result<Vec<MAcmeCert>> {
    let domain_ids = ECert::find()
        .filter(CCert::ExpiresAt.lte(deadline))
        .all(&state.db)
        .await
        .context("Failed to query expiring certs")?
        .into_iter()
        .map(|c| c.domain_id)
        .collect::<Vec<i64>>();

    if domain_ids.is_empty() {
        return Ok(Vec::new());
    }

    EAcmeCert::find()
        .filter(CAcmeCert::DomainId.is_in(domain_ids))
        .all(&state.db)
        .await
        .context("Failed to query ACME certs")
}

#[instrument(skip(state, issuers, acme_cert), fields(acme_cert_id = acme_cert.id))]
pub async fn renew(
    state: &ServerState,
    issuers: &IssuerCache,
    acme_cert: &MAcmeCert,
) -> Result<RenewOutcome> {
    let encrypter = &state.encrypter;

    let chain = acme_cert
        .cert
        .as_deref()
        .ok_or_else(|| anyhow!("ACME cert {} has no certificate", acme_cert.id))?;
    let chain = encrypter
        .decrypt_base64(chain)
        .with_context(|| format!("Failed to decrypt ACME cert {}", acme_cert.id))?;
    let cert_uri = acme_cert
        .cert_uri
        .as_deref()
        .ok_or_else(|| anyhow!("ACME cert {} has no certificate URI", acme_cert.id))?;

    let domain = EDomain::find_by_id(acme_cert.domain_id)
        .one(&state.db)
        .await
        .context("Failed to query domain")?
        .ok_or_else(|| anyhow!("domain {} not found", acme_cert.domain_id))?;

    let current = certs::inspect(&chain)?;
    info!(domain = %domain.name, expires_at = %current.expires_at, "Renewing certificate");

    let account_key = String::from_utf8(encrypter.decrypt_base64(&acme_cert.letsencrypt_key)?)
        .context("Let's Encrypt key is not valid UTF-8")?;

    let mut issued = match state.acme.renew(&account_key, cert_uri).await? {
        Renewal::RetryAfter(seconds) => {
            info!(domain = %domain.name, retry_after = seconds, "Certificate not available yet");
            return Ok(RenewOutcome::NotReady);
        }
        Renewal::Issued(issued) => issued,
    };

    if issued.der == certs::leaf_der(&chain)? {
        info!(domain = %domain.name, "Identical certificate returned, requesting a new one");

        let private_key = String::from_utf8(encrypter.decrypt_base64(&acme_cert.private_key)?)
            .context("certificate key is not valid UTF-8")?;
        let csr = certs::create_csr_der(&private_key, &domain.name)?;
        issued = state.acme.new_cert(&account_key, &domain.name, &csr).await?;
    }

    let issuer = issuers.resolve(match issued.issuer_pem.clone() {
        Some(pem) => Some(pem),
        None => certs::issuer_pem(&chain)?,
    });
    let bundled = certs::bundle(&issued.der, issuer.as_deref());
    let info = certs::inspect(bundled.as_bytes())?;

    EAcmeCert::update_many()
        .col_expr(CAcmeCert::CertUri, Expr::value(issued.uri.clone()))
        .col_expr(
            CAcmeCert::Cert,
            Expr::value(encrypter.encrypt_to_base64(bundled.as_bytes())),
        )
        .col_expr(CAcmeCert::UpdatedAt, Expr::value(Utc::now().naive_utc()))
        .filter(CAcmeCert::Id.eq(acme_cert.id))
        .exec(&state.db)
        .await
        .context("Failed to save ACME cert")?;

    state
        .storage
        .upload(
            &paths::cert_key(&domain.name),
            Bytes::from(encrypter.encrypt(bundled.as_bytes())),
            Acl::Private,
            "application/octet-stream",
        )
        .await
        .context("Failed to upload certificate")?;

    upsert_cert(&state.db, &domain, &info).await?;
    publish_invalidation(state.bus.as_ref(), vec![domain.name.clone()]).await?;

    info!(domain = %domain.name, expires_at = %info.expires_at, "Renewed certificate");
    Ok(RenewOutcome::Renewed)
}

/// Renews every expiring cert with at most `acme_renewal_workers` requests in
/// flight.
pub async fn renew_expiring(state: Arc<ServerState>) -> Result<RenewalTally> {
    let deadline = (Utc::now() + Duration::days(ACME_RENEWAL_THRESHOLD_DAYS)).naive_utc();
    let acme_certs = find_expiring_acme_certs(&state, deadline).await?;
    info!(count = acme_certs.len(), "Found expiring Let's Encrypt certs");

    let issuers = IssuerCache::default();
    let results = futures::stream::iter(acme_certs.iter())
        .map(|acme_cert| {
            let state = &state;
            let issuers = &issuers;
            async move { (acme_cert.id, renew(state, issuers, acme_cert).await) }
        })
        .buffer_unordered(state.cli.acme_renewal_workers.max(1))
        .collect::<Vec<_>>()
        .await;

    let mut tally = RenewalTally {
        attempted: results.len(),
        ..Default::default()
    };

    for (id, result) in results {
        match result {
            Ok(RenewOutcome::Renewed) => tally.renewed += 1,
            Ok(RenewOutcome::NotReady) => tally.not_ready += 1,
            Err(e) => {
                error!(error = %format!("{:#}", e), acme_cert_id = id, "Failed to renew ACME cert");
                sentry::capture_message(
                    &format!("failed to renew ACME cert {}: {:#}", id, e),
                    sentry::Level::Error,
                );
                tally.failed += 1;
            }
        }
    }

    info!(
        attempted = tally.attempted,
        renewed = tally.renewed,
        not_ready = tally.not_ready,
        failed = tally.failed,
        "Attempted renewal of ACME certificates"
    );

    Ok(tally)
}

/*
 * SPDX-FileCopyrightText: 2026 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::{Extension, Json};
use bytes::Bytes;
use chrono::Utc;
use common::acme::AcmeError;
use common::certs::{self, CertError};
use common::consts::MAX_CERT_UPLOAD_SIZE;
use common::database::{find_domain, upsert_cert};
use common::messages::publish_invalidation;
use common::paths;
use common::storage::Acl;
use common::types::*;
use sea_orm::ActiveValue::Set;
use sea_orm::sea_query::Expr;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{error, info, instrument};

use crate::error::{WebError, WebResult};
use crate::views::CertJson;

const KEY_CONTENT_TYPE: &str = "application/octet-stream";

fn is_default_domain(name: &str, default_domain: &str) -> bool {
    name == default_domain || name.ends_with(&format!(".{}", default_domain))
}

fn default_domain_forbidden() -> WebError {
    WebError::Forbidden("the default domain is already secure".to_string())
}

/// `Content-Length` must be present and within `max`.
pub fn check_content_length(headers: &HeaderMap, max: u64) -> WebResult<u64> {
    let length = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.parse::<u64>().ok())
        .ok_or_else(|| WebError::BadRequest("Content-Length header is required".to_string()))?;

    if length > max {
        return Err(WebError::BadRequest("request body is too large".to_string()));
    }

    Ok(length)
}

pub fn multipart_required() -> WebError {
    WebError::BadRequest("the request should be encoded in multipart/form-data format".to_string())
}

/// Stores the encrypted certificate chain and key and tells the edges to
/// drop their cached copy.
async fn upload_cert(
    state: &ServerState,
    domain: &str,
    chain: &[u8],
    private_key: &[u8],
) -> WebResult<()> {
    for (key, body) in [
        (paths::cert_key(domain), chain),
        (paths::cert_private_key_key(domain), private_key),
    ] {
        state
            .storage
            .upload(
                &key,
                Bytes::from(state.encrypter.encrypt(body)),
                Acl::Private,
                KEY_CONTENT_TYPE,
            )
            .await?;
    }

    publish_invalidation(state.bus.as_ref(), vec![domain.to_string()]).await?;
    Ok(())
}

pub async fn get_cert(
    state: State<Arc<ServerState>>,
    Extension(project): Extension<MProject>,
    Path((_, domain_name)): Path<(String, String)>,
) -> WebResult<Json<Value>> {
    let domain = find_domain(&state.db, project.id, &domain_name)
        .await?
        .ok_or_else(|| WebError::not_found("cert"))?;

    let cert = ECert::find()
        .filter(CCert::DomainId.eq(domain.id))
        .one(&state.db)
        .await?
        .ok_or_else(|| WebError::not_found("cert"))?;

    Ok(Json(json!({ "cert": CertJson::from(&cert) })))
}

/// Accepts a user supplied certificate and key as multipart parts `cert` and
/// `key`.
pub async fn post_cert(
    state: State<Arc<ServerState>>,
    Extension(project): Extension<MProject>,
    Path((_, domain_name)): Path<(String, String)>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> WebResult<(StatusCode, Json<Value>)> {
    if is_default_domain(&domain_name, &state.cli.default_domain) {
        return Err(default_domain_forbidden());
    }

    let mut multipart = multipart.map_err(|_| multipart_required())?;
    check_content_length(&headers, MAX_CERT_UPLOAD_SIZE)?;

    let domain = find_domain(&state.db, project.id, &domain_name)
        .await?
        .ok_or_else(|| WebError::not_found("domain"))?;

    let mut cert_pem: Option<Bytes> = None;
    let mut key_pem: Option<Bytes> = None;

    while let Some(field) = multipart.next_field().await.map_err(|_| multipart_required())? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "" => continue,
            "cert" => cert_pem = Some(field.bytes().await.map_err(|_| multipart_required())?),
            "key" => key_pem = Some(field.bytes().await.map_err(|_| multipart_required())?),
            _ => return Err(WebError::invalid_params_description("unrecognized form field")),
        }
    }

    let (Some(cert_pem), Some(key_pem)) = (cert_pem, key_pem) else {
        return Err(WebError::invalid_params_description(
            "both cert and key are required",
        ));
    };

    let info = certs::get_info(&cert_pem, &key_pem, &domain.name).map_err(|e| match e {
        CertError::InvalidCommonName => {
            WebError::invalid_params_description("invalid common name (domain name mismatch)")
        }
        _ => WebError::invalid_params_description("invalid cert or key"),
    })?;

    upload_cert(&state, &domain.name, &cert_pem, &key_pem).await?;
    let cert = upsert_cert(&state.db, &domain, &info).await?;

    info!(project_id = project.id, domain = %domain.name, "Certificate uploaded");

    Ok((
        StatusCode::CREATED,
        Json(json!({ "cert": CertJson::from(&cert) })),
    ))
}

fn acme_unavailable(description: &str, domain: &str, err: AcmeError) -> WebError {
    error!(error = %err, domain = %domain, "{}", description);
    WebError::ServiceUnavailable(description.to_string())
}

fn decrypt_pem(state: &ServerState, data: &str) -> WebResult<String> {
    let plain = state
        .encrypter
        .decrypt_base64(data)
        .map_err(anyhow::Error::from)?;
    String::from_utf8(plain).map_err(|e| WebError::Internal(e.into()))
}

async fn find_or_create_acme_cert(state: &ServerState, domain: &MDomain) -> WebResult<MAcmeCert> {
    let existing = EAcmeCert::find()
        .filter(CAcmeCert::DomainId.eq(domain.id))
        .one(&state.db)
        .await?;

    if let Some(acme_cert) = existing {
        return Ok(acme_cert);
    }

    let account_key = certs::generate_key_pem().map_err(anyhow::Error::from)?;
    let private_key = certs::generate_key_pem().map_err(anyhow::Error::from)?;
    let now = Utc::now().naive_utc();

    let acme_cert = AAcmeCert {
        domain_id: Set(domain.id),
        letsencrypt_key: Set(state.encrypter.encrypt_to_base64(account_key.as_bytes())),
        private_key: Set(state.encrypter.encrypt_to_base64(private_key.as_bytes())),
        cert: Set(None),
        cert_uri: Set(None),
        http_challenge_path: Set(None),
        http_challenge_resource: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&state.db)
    .await?;

    Ok(acme_cert)
}

/// Obtains a certificate from Let's Encrypt through the HTTP-01 challenge.
#[instrument(skip_all, fields(project_id = project.id, domain = %domain_name))]
pub async fn post_letsencrypt(
    state: State<Arc<ServerState>>,
    Extension(project): Extension<MProject>,
    Path((_, domain_name)): Path<(String, String)>,
) -> WebResult<Json<Value>> {
    if is_default_domain(&domain_name, &state.cli.default_domain) {
        return Err(default_domain_forbidden());
    }

    let domain = find_domain(&state.db, project.id, &domain_name)
        .await?
        .ok_or_else(|| WebError::not_found("domain"))?;

    let acme_cert = find_or_create_acme_cert(&state, &domain).await?;
    let account_key = decrypt_pem(&state, &acme_cert.letsencrypt_key)?;

    state
        .acme
        .register(&account_key)
        .await
        .map_err(|e| acme_unavailable("could not connect to Let's Encrypt", &domain.name, e))?;

    let authorization = state
        .acme
        .authorize(&account_key, &domain.name)
        .await
        .map_err(|e| acme_unavailable("could not connect to Let's Encrypt", &domain.name, e))?;

    EAcmeCert::update_many()
        .col_expr(CAcmeCert::HttpChallengePath, Expr::value(authorization.path.clone()))
        .col_expr(
            CAcmeCert::HttpChallengeResource,
            Expr::value(authorization.resource.clone()),
        )
        .col_expr(CAcmeCert::UpdatedAt, Expr::value(Utc::now().naive_utc()))
        .filter(CAcmeCert::Id.eq(acme_cert.id))
        .exec(&state.db)
        .await?;

    state
        .acme
        .accept_challenge(&account_key, &authorization)
        .await
        .map_err(|e| acme_unavailable("domain could not be verified", &domain.name, e))?;

    let private_key = decrypt_pem(&state, &acme_cert.private_key)?;
    let csr = certs::create_csr_der(&private_key, &domain.name).map_err(anyhow::Error::from)?;

    let issued = state
        .acme
        .new_cert(&account_key, &domain.name, &csr)
        .await
        .map_err(|e| {
            acme_unavailable(
                "could not obtain a certificate from Let's Encrypt",
                &domain.name,
                e,
            )
        })?;

    let chain = certs::bundle(&issued.der, issued.issuer_pem.as_deref());
    let info = certs::inspect(chain.as_bytes()).map_err(anyhow::Error::from)?;

    EAcmeCert::update_many()
        .col_expr(
            CAcmeCert::Cert,
            Expr::value(state.encrypter.encrypt_to_base64(chain.as_bytes())),
        )
        .col_expr(CAcmeCert::CertUri, Expr::value(issued.uri.clone()))
        .col_expr(CAcmeCert::UpdatedAt, Expr::value(Utc::now().naive_utc()))
        .filter(CAcmeCert::Id.eq(acme_cert.id))
        .exec(&state.db)
        .await?;

    upload_cert(&state, &domain.name, chain.as_bytes(), private_key.as_bytes()).await?;
    let cert = upsert_cert(&state.db, &domain, &info).await?;

    info!(domain = %domain.name, cert_uri = %issued.uri, "Let's Encrypt certificate issued");

    Ok(Json(json!({ "cert": CertJson::from(&cert) })))
}

pub async fn delete_cert(
    state: State<Arc<ServerState>>,
    Extension(project): Extension<MProject>,
    Path((_, domain_name)): Path<(String, String)>,
) -> WebResult<Json<Value>> {
    let domain = find_domain(&state.db, project.id, &domain_name)
        .await?
        .ok_or_else(|| WebError::not_found("cert"))?;

    let cert = ECert::find()
        .filter(CCert::DomainId.eq(domain.id))
        .one(&state.db)
        .await?
        .ok_or_else(|| WebError::not_found("cert"))?;

    ECert::delete_by_id(cert.id).exec(&state.db).await?;

    state.storage.delete(&cert.certificate_path).await?;
    state.storage.delete(&cert.private_key_path).await?;
    publish_invalidation(state.bus.as_ref(), vec![domain.name.clone()]).await?;

    info!(project_id = project.id, domain = %domain.name, "Certificate removed");

    Ok(Json(json!({ "deleted": true })))
}

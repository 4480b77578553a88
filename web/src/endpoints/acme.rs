/*
 * SPDX-FileCopyrightText: 2026 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use common::types::*;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use std::sync::Arc;

use crate::error::WebResult;

pub const CHALLENGE_PATH_PREFIX: &str = "/.well-known/acme-challenge/";

/// Answers the HTTP-01 challenge stored while a certificate is requested.
pub async fn get_challenge(
    state: State<Arc<ServerState>>,
    Path(token): Path<String>,
) -> WebResult<Response> {
    let path = format!("{}{}", CHALLENGE_PATH_PREFIX, token);

    let acme_cert = EAcmeCert::find()
        .filter(CAcmeCert::HttpChallengePath.eq(path))
        .one(&state.db)
        .await?;

    let Some(resource) = acme_cert.and_then(|c| c.http_challenge_resource) else {
        return Ok(StatusCode::NOT_FOUND.into_response());
    };

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        resource,
    )
        .into_response())
}

/*
 * SPDX-FileCopyrightText: 2026 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;
use common::types::*;
use regex::Regex;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use std::sync::{Arc, LazyLock};

use super::error::{WebError, WebResult};

static BEARER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\A\s*Bearer\s+(\S+)\s*\z").unwrap());

pub fn bearer_token(value: &str) -> Option<&str> {
    BEARER_RE
        .captures(value)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Resolves the bearer token to its user. Inserts both the token and the
/// user into the request extensions.
pub async fn authorize(
    state: State<Arc<ServerState>>,
    mut req: Request,
    next: Next,
) -> WebResult<Response<Body>> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(bearer_token)
        .map(str::to_string)
        .ok_or_else(|| WebError::Unauthorized("access token is required".to_string()))?;

    let oauth_token = EOauthToken::find()
        .filter(COauthToken::Token.eq(token))
        .one(&state.db)
        .await?
        .ok_or_else(|| WebError::Unauthorized("access token is invalid".to_string()))?;

    let user = EUser::find_by_id(oauth_token.user_id)
        .one(&state.db)
        .await?
        .ok_or_else(|| WebError::Unauthorized("access token is invalid".to_string()))?;

    req.extensions_mut().insert(oauth_token);
    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

pub fn hash_password(password: &str) -> String {
    password_auth::generate_hash(password)
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    password_auth::verify_password(password, hash).is_ok()
}

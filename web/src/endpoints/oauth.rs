/*
 * SPDX-FileCopyrightText: 2026 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use axum::extract::rejection::FormRejection;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::{Extension, Form, Json};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use common::input::generate_token;
use common::types::*;
use sea_orm::ActiveValue::Set;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::info;

use crate::auth::verify_password;
use crate::error::{WebError, WebResult};

#[derive(Deserialize, Debug, Default)]
pub struct TokenRequest {
    #[serde(default)]
    pub grant_type: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub client_id: String,
}

/// Client credentials from HTTP Basic auth, falling back to the form fields.
fn client_credentials(headers: &HeaderMap, form: &TokenRequest) -> WebResult<(String, String)> {
    let basic = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Basic "));

    let Some(encoded) = basic else {
        return Ok((form.client_id.clone(), form.client_secret.clone()));
    };

    let decoded = STANDARD
        .decode(encoded.trim())
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or(WebError::InvalidClient)?;

    let (id, secret) = decoded.split_once(':').ok_or(WebError::InvalidClient)?;
    Ok((id.to_string(), secret.to_string()))
}

pub async fn post_token(
    state: State<Arc<ServerState>>,
    headers: HeaderMap,
    form: Result<Form<TokenRequest>, FormRejection>,
) -> WebResult<Json<TokenResponse>> {
    let form = form.map(|Form(f)| f).unwrap_or_default();

    for (name, value) in [
        ("grant_type", &form.grant_type),
        ("username", &form.username),
        ("password", &form.password),
    ] {
        if value.is_empty() {
            return Err(WebError::BadRequest(format!("\"{}\" is required", name)));
        }
    }

    if form.grant_type != "password" {
        return Err(WebError::Api {
            status: StatusCode::BAD_REQUEST,
            error: "unsupported_grant_type",
            description: format!("grant type \"{}\" is not supported", form.grant_type),
        });
    }

    let user = EUser::find()
        .filter(CUser::Email.eq(form.username.trim().to_lowercase()))
        .one(&state.db)
        .await?
        .filter(|u| verify_password(&form.password, &u.password))
        .ok_or_else(|| WebError::invalid_grant("user credentials are invalid"))?;

    if user.confirmed_at.is_none() {
        return Err(WebError::invalid_grant(
            "user has not confirmed email address",
        ));
    }

    let (client_id, client_secret) = client_credentials(&headers, &form)?;

    let client = EOauthClient::find()
        .filter(COauthClient::ClientId.eq(client_id))
        .filter(COauthClient::ClientSecret.eq(client_secret))
        .one(&state.db)
        .await?
        .ok_or(WebError::InvalidClient)?;

    let token = AOauthToken {
        user_id: Set(user.id),
        oauth_client_id: Set(client.id),
        token: Set(generate_token()),
        created_at: Set(Utc::now().naive_utc()),
        ..Default::default()
    }
    .insert(&state.db)
    .await?;

    info!(user_id = user.id, oauth_client_id = client.id, "User logged in");

    Ok(Json(TokenResponse {
        access_token: token.token,
        token_type: "bearer".to_string(),
        client_id: client.client_id,
    }))
}

pub async fn delete_token(
    state: State<Arc<ServerState>>,
    Extension(token): Extension<MOauthToken>,
) -> WebResult<Json<Value>> {
    EOauthToken::delete_by_id(token.id).exec(&state.db).await?;

    Ok(Json(json!({ "invalidated": true })))
}

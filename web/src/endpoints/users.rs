/*
 * SPDX-FileCopyrightText: 2026 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use axum::extract::rejection::FormRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Form, Json};
use chrono::Utc;
use common::input::{generate_confirmation_code, validate_email, validate_password};
use common::types::*;
use sea_orm::ActiveValue::Set;
use sea_orm::sea_query::Expr;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, TransactionTrait};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::info;

use crate::auth::{hash_password, verify_password};
use crate::error::{FieldErrors, WebError, WebResult, invalid_params_with};
use crate::views::UserJson;

#[derive(Deserialize, Debug, Default)]
pub struct CreateUserRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    pub name: Option<String>,
    pub organization: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
pub struct ConfirmRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub confirmation_code: String,
}

#[derive(Deserialize, Debug, Default)]
pub struct ResendRequest {
    #[serde(default)]
    pub email: String,
}

#[derive(Deserialize, Debug, Default)]
pub struct UpdateUserRequest {
    #[serde(default)]
    pub existing_password: String,
    #[serde(default)]
    pub password: String,
}

pub async fn post_users(
    state: State<Arc<ServerState>>,
    form: Result<Form<CreateUserRequest>, FormRejection>,
) -> WebResult<(StatusCode, Json<Value>)> {
    let form = form.map(|Form(f)| f).unwrap_or_default();
    let email = form.email.trim().to_lowercase();

    let mut errors = FieldErrors::new();
    if let Err(e) = validate_email(&email) {
        errors.insert("email".to_string(), e);
    }
    if let Err(e) = validate_password(&form.password) {
        errors.insert("password".to_string(), e);
    }
    if !errors.is_empty() {
        return Err(WebError::InvalidParams(errors));
    }

    let taken = EUser::find()
        .filter(CUser::Email.eq(email.as_str()))
        .one(&state.db)
        .await?;

    if taken.is_some() {
        return Err(WebError::invalid_param("email", "is taken"));
    }

    let now = Utc::now().naive_utc();
    let user = AUser {
        email: Set(email),
        password: Set(hash_password(&form.password)),
        name: Set(form.name.filter(|n| !n.is_empty())),
        organization: Set(form.organization.filter(|o| !o.is_empty())),
        confirmation_code: Set(generate_confirmation_code()),
        confirmed_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&state.db)
    .await?;

    info!(user_id = user.id, "User signed up, confirmation code issued");

    Ok((
        StatusCode::CREATED,
        Json(json!({ "user": UserJson::from(&user) })),
    ))
}

pub async fn post_confirm(
    state: State<Arc<ServerState>>,
    form: Result<Form<ConfirmRequest>, FormRejection>,
) -> WebResult<Response> {
    let form = form.map(|Form(f)| f).unwrap_or_default();

    for (name, value) in [
        ("email", &form.email),
        ("confirmation_code", &form.confirmation_code),
    ] {
        if value.is_empty() {
            return Ok(invalid_params_with(
                &format!("{} is required", name),
                "confirmed",
                false,
            ));
        }
    }

    let result = EUser::update_many()
        .col_expr(CUser::ConfirmedAt, Expr::value(Utc::now().naive_utc()))
        .filter(CUser::Email.eq(form.email.trim().to_lowercase()))
        .filter(CUser::ConfirmationCode.eq(form.confirmation_code.trim()))
        .filter(CUser::ConfirmedAt.is_null())
        .exec(&state.db)
        .await?;

    if result.rows_affected == 0 {
        return Ok(invalid_params_with(
            "invalid email or confirmation_code",
            "confirmed",
            false,
        ));
    }

    Ok(Json(json!({ "confirmed": true })).into_response())
}

pub async fn post_confirm_resend(
    state: State<Arc<ServerState>>,
    form: Result<Form<ResendRequest>, FormRejection>,
) -> WebResult<Response> {
    let form = form.map(|Form(f)| f).unwrap_or_default();

    if form.email.is_empty() {
        return Ok(invalid_params_with("email is required", "sent", false));
    }

    let user = EUser::find()
        .filter(CUser::Email.eq(form.email.trim().to_lowercase()))
        .filter(CUser::ConfirmedAt.is_null())
        .one(&state.db)
        .await?;

    let Some(user) = user else {
        return Ok(invalid_params_with(
            "email is not found or already confirmed",
            "sent",
            false,
        ));
    };

    EUser::update_many()
        .col_expr(CUser::ConfirmationCode, Expr::value(generate_confirmation_code()))
        .col_expr(CUser::UpdatedAt, Expr::value(Utc::now().naive_utc()))
        .filter(CUser::Id.eq(user.id))
        .exec(&state.db)
        .await?;

    info!(user_id = user.id, "Confirmation code reissued");

    Ok(Json(json!({ "sent": true })).into_response())
}

pub async fn get_user(Extension(user): Extension<MUser>) -> WebResult<Json<Value>> {
    Ok(Json(json!({ "user": UserJson::from(&user) })))
}

/// Changes the password and signs the user out everywhere.
pub async fn put_user(
    state: State<Arc<ServerState>>,
    Extension(user): Extension<MUser>,
    form: Result<Form<UpdateUserRequest>, FormRejection>,
) -> WebResult<Json<Value>> {
    let form = form.map(|Form(f)| f).unwrap_or_default();

    for (name, value) in [
        ("existing_password", &form.existing_password),
        ("password", &form.password),
    ] {
        if value.is_empty() {
            return Err(WebError::invalid_param(name, "is required"));
        }
    }

    if !verify_password(&form.existing_password, &user.password) {
        return Err(WebError::invalid_param("existing_password", "is incorrect"));
    }

    if form.existing_password == form.password {
        return Err(WebError::invalid_param(
            "password",
            "cannot be the same as the existing password",
        ));
    }

    validate_password(&form.password).map_err(|e| WebError::invalid_param("password", e))?;

    let txn = state.db.begin().await?;

    EUser::update_many()
        .col_expr(CUser::Password, Expr::value(hash_password(&form.password)))
        .col_expr(CUser::UpdatedAt, Expr::value(Utc::now().naive_utc()))
        .filter(CUser::Id.eq(user.id))
        .exec(&txn)
        .await?;

    EOauthToken::delete_many()
        .filter(COauthToken::UserId.eq(user.id))
        .exec(&txn)
        .await?;

    txn.commit().await?;

    Ok(Json(json!({ "user": UserJson::from(&user) })))
}

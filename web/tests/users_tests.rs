/*
 * SPDX-FileCopyrightText: 2026 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

mod common;

use crate::common::*;
use ::common::types::MUser;
use axum::body::Body;
use axum::http::StatusCode;
use serde_json::json;

#[tokio::test]
async fn test_sign_up() {
    let db = mock_db()
        .append_query_results([Vec::<MUser>::new()])
        .append_query_results([vec![user()]])
        .into_connection();
    let env = create_mock_state(db);

    let (status, body) = send(
        env.app(),
        form(
            request("POST", "/users"),
            "email=Harry%40Potter.com&password=password&name=Harry",
        ),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(
        body,
        json!({"user": {"email": "harry@potter.com", "name": "Harry", "organization": ""}})
    );
}

#[tokio::test]
async fn test_sign_up_validates_fields() {
    let env = create_mock_state(mock_db().into_connection());

    let (status, body) = send(
        env.app(),
        form(request("POST", "/users"), "email=harry&password=123"),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(
        body,
        json!({
            "error": "invalid_params",
            "errors": {
                "email": "is invalid",
                "password": "is too short (min. 6 characters)",
            }
        })
    );
}

#[tokio::test]
async fn test_sign_up_with_taken_email() {
    let db = mock_db()
        .append_query_results([vec![user()]])
        .into_connection();
    let env = create_mock_state(db);

    let (status, body) = send(
        env.app(),
        form(
            request("POST", "/users"),
            "email=harry%40potter.com&password=password",
        ),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["errors"], json!({"email": "is taken"}));
}

#[tokio::test]
async fn test_confirm() {
    let db = mock_db().append_exec_results([exec(1)]).into_connection();
    let env = create_mock_state(db);

    let (status, body) = send(
        env.app(),
        form(
            request("POST", "/user/confirm"),
            "email=harry%40potter.com&confirmation_code=123456",
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"confirmed": true}));
}

#[tokio::test]
async fn test_confirm_with_wrong_code() {
    let db = mock_db().append_exec_results([exec(0)]).into_connection();
    let env = create_mock_state(db);

    let (status, body) = send(
        env.app(),
        form(
            request("POST", "/user/confirm"),
            "email=harry%40potter.com&confirmation_code=000000",
        ),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(
        body,
        json!({
            "error": "invalid_params",
            "error_description": "invalid email or confirmation_code",
            "confirmed": false,
        })
    );
}

#[tokio::test]
async fn test_resend_confirmation_code() {
    let mut unconfirmed = user();
    unconfirmed.confirmed_at = None;

    let db = mock_db()
        .append_query_results([vec![unconfirmed]])
        .append_exec_results([exec(1)])
        .into_connection();
    let env = create_mock_state(db);

    let (status, body) = send(
        env.app(),
        form(request("POST", "/user/confirm/resend"), "email=harry%40potter.com"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"sent": true}));
}

#[tokio::test]
async fn test_resend_requires_email() {
    let env = create_mock_state(mock_db().into_connection());

    let (status, body) = send(
        env.app(),
        request("POST", "/user/confirm/resend")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error_description"], "email is required");
    assert_eq!(body["sent"], false);
}

#[tokio::test]
async fn test_change_password() {
    let db = authorized_db()
        .append_exec_results([exec(1), exec(2)])
        .into_connection();
    let env = create_mock_state(db);

    let (status, body) = send(
        env.app(),
        form(
            authed("PUT", "/user"),
            "existing_password=password&password=newpassword",
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["email"], "harry@potter.com");
}

#[tokio::test]
async fn test_change_password_checks_existing_password() {
    let env = create_mock_state(authorized_db().into_connection());

    let (status, body) = send(
        env.app(),
        form(
            authed("PUT", "/user"),
            "existing_password=wrong&password=newpassword",
        ),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["errors"], json!({"existing_password": "is incorrect"}));
}

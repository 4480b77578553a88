/*
 * SPDX-FileCopyrightText: 2026 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use axum::extract::{Path, State};
use axum::{Extension, Json};
use common::database::find_raw_bundle;
use common::types::*;
use serde_json::{Value, json};
use std::sync::Arc;

use crate::error::{WebError, WebResult};
use crate::views::RawBundleJson;

pub async fn get_raw_bundle(
    state: State<Arc<ServerState>>,
    Extension(project): Extension<MProject>,
    Path((_, checksum)): Path<(String, String)>,
) -> WebResult<Json<Value>> {
    let bundle = find_raw_bundle(&state.db, project.id, &checksum)
        .await?
        .ok_or_else(|| WebError::not_found("raw bundle"))?;

    Ok(Json(json!({ "raw_bundle": RawBundleJson::from(&bundle) })))
}

/*
 * SPDX-FileCopyrightText: 2026 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use chrono::{Datelike, Months, NaiveDate, NaiveTime};
use common::input::load_secret;
use common::types::*;
use entity::deployment::DeploymentState;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;

use crate::error::{WebError, WebResult};

#[derive(Deserialize, Debug, Default)]
pub struct StatsQuery {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub year: String,
    #[serde(default)]
    pub month: String,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ProjectStats {
    pub project_id: i64,
    pub project_name: String,
    pub year: i32,
    pub month: u32,
    pub deployments_created: u64,
    pub deployments_succeeded: u64,
}

fn required_int(field: &str, value: &str) -> WebResult<i64> {
    if value.is_empty() {
        return Err(WebError::invalid_param(field, "is required"));
    }

    value
        .parse::<i64>()
        .map_err(|_| WebError::invalid_param(field, "is invalid"))
}

fn authorized(state: &ServerState, token: &str) -> bool {
    let Some(file) = state.cli.stats_token_file.as_deref() else {
        return false;
    };

    let expected = load_secret(file);
    !expected.is_empty() && expected == token
}

/// First day of the month and first day of the following month.
fn month_range(year: i64, month: i64) -> WebResult<(NaiveDate, NaiveDate)> {
    if year < 0 {
        return Err(WebError::invalid_param("year", "is invalid"));
    }

    if !(1..=12).contains(&month) {
        return Err(WebError::invalid_param("month", "is invalid"));
    }

    let from = i32::try_from(year)
        .ok()
        .and_then(|y| NaiveDate::from_ymd_opt(y, month as u32, 1))
        .ok_or_else(|| WebError::invalid_param("year", "is invalid"))?;

    let to = from
        .checked_add_months(Months::new(1))
        .ok_or_else(|| WebError::invalid_param("year", "is invalid"))?;

    Ok((from, to))
}

/// Deployment counts of one project for a calendar month. Guarded by the
/// admin token instead of a user token.
pub async fn get_stats(
    state: State<Arc<ServerState>>,
    Query(query): Query<StatsQuery>,
) -> WebResult<Json<Value>> {
    if !authorized(&state, &query.token) {
        return Err(WebError::Api {
            status: StatusCode::UNAUTHORIZED,
            error: "invalid_admin_token",
            description: "admin token is required".to_string(),
        });
    }

    let project_id = required_int("project_id", &query.project_id)?;
    let year = required_int("year", &query.year)?;
    let month = required_int("month", &query.month)?;
    let (from, to) = month_range(year, month)?;

    let project = EProject::find_by_id(project_id)
        .one(&state.db)
        .await?
        .ok_or_else(|| WebError::invalid_param("project_id", "project could not be found"))?;

    let (start, end) = (from.and_time(NaiveTime::MIN), to.and_time(NaiveTime::MIN));

    let deployments_created = EDeployment::find()
        .filter(CDeployment::ProjectId.eq(project.id))
        .filter(CDeployment::CreatedAt.gte(start))
        .filter(CDeployment::CreatedAt.lt(end))
        .count(&state.db)
        .await?;

    let deployments_succeeded = EDeployment::find()
        .filter(CDeployment::ProjectId.eq(project.id))
        .filter(CDeployment::State.eq(DeploymentState::Deployed))
        .filter(CDeployment::DeployedAt.gte(start))
        .filter(CDeployment::DeployedAt.lt(end))
        .count(&state.db)
        .await?;

    let stats = ProjectStats {
        project_id: project.id,
        project_name: project.name,
        year: from.year(),
        month: from.month(),
        deployments_created,
        deployments_succeeded,
    };

    Ok(Json(json!({ "stats": stats })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_month_range() {
        let (from, to) = month_range(2016, 12).unwrap();
        assert_eq!(from, NaiveDate::from_ymd_opt(2016, 12, 1).unwrap());
        assert_eq!(to, NaiveDate::from_ymd_opt(2017, 1, 1).unwrap());

        assert!(month_range(2016, 0).is_err());
        assert!(month_range(2016, 13).is_err());
        assert!(month_range(-1, 5).is_err());
    }

    #[test]
    fn test_required_int() {
        assert_eq!(required_int("year", "2016").unwrap(), 2016);
        assert!(matches!(
            required_int("year", ""),
            Err(WebError::InvalidParams(ref e)) if e["year"] == "is required"
        ));
        assert!(matches!(
            required_int("year", "abc"),
            Err(WebError::InvalidParams(ref e)) if e["year"] == "is invalid"
        ));
    }
}

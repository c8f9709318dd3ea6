//! Audit query endpoint (admin only; never journaled itself).

use axum::{
    extract::{Query, State},
    Extension, Json,
};
use chrono::{NaiveDate, Utc};
use validator::Validate;

use crate::api::dto::{AuditQuery, AuditResponse};
use crate::api::error::{ApiError, ApiResult};
use crate::api::request_id::RequestId;
use crate::api::router::AppState;
use crate::audit::reader::{self, QueryFilters, MAX_QUERY_LIMIT};
use crate::domain::ErrorKind;

const DEFAULT_LIMIT: usize = 200;
const LISTED_DATES: usize = 30;

fn validate_date(raw: &str) -> Result<String, ErrorKind> {
    // Strict shape first (digits and dashes only), then a real-date check.
    let shape_ok = raw.len() == 10
        && raw
            .chars()
            .enumerate()
            .all(|(i, c)| if i == 4 || i == 7 { c == '-' } else { c.is_ascii_digit() });
    if !shape_ok {
        return Err(ErrorKind::Validation(
            "invalid date format, use YYYY-MM-DD".to_string(),
        ));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| ErrorKind::Validation("invalid date, use YYYY-MM-DD".to_string()))?;
    Ok(raw.to_string())
}

/// `GET /admin/audit?date&limit&user&action&contains`
pub async fn query(
    State(state): State<AppState>,
    Extension(RequestId(trace_id)): Extension<RequestId>,
    Query(params): Query<AuditQuery>,
) -> ApiResult<Json<AuditResponse>> {
    params
        .validate()
        .map_err(|e| ApiError::new(ErrorKind::Validation(e.to_string()), &trace_id))?;

    let date = match &params.date {
        Some(raw) => validate_date(raw).map_err(|k| ApiError::new(k, &trace_id))?,
        None => Utc::now().format("%Y-%m-%d").to_string(),
    };

    let limit = match params.limit {
        Some(0) => {
            return Err(ApiError::new(
                ErrorKind::Validation("limit must be a positive number".to_string()),
                &trace_id,
            ));
        }
        Some(n) => n.min(MAX_QUERY_LIMIT),
        None => DEFAULT_LIMIT,
    };

    let filters = QueryFilters {
        user: params.user.clone(),
        action: params.action.clone(),
        contains: params.contains.clone(),
    };

    let events = reader::query(
        &state.audit_dir,
        &date,
        limit,
        state.audit_limits.max_continuations,
        &filters,
    )
    .await;

    let mut available_dates = reader::list_dates(&state.audit_dir).await;
    available_dates.truncate(LISTED_DATES);

    Ok(Json(AuditResponse {
        ok: true,
        date,
        count: events.len(),
        limit,
        events,
        available_dates,
    }))
}

//! Admin metric editor: listing, single-row CRUD, and bulk upsert.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use super::error::{ApiError, ValidationErrorBuilder};
use super::extract::{ApiJson, ApiQuery};
use super::validation::{validate_date, validate_date_range, validate_metric_values};
use crate::db::{
    BulkMetricEntry, BulkMetricRequest, BulkMetricResult, Campaign, CreateMetricRequest,
    DailyMetric, DbPool, LinkTarget, MetricListQuery, MetricListResponse, MetricValues,
    TrackingLink, UpdateMetricRequest, User, UserRole,
};
use crate::AppState;

const DUPLICATE_DATE: &str = "Metrics for this date already exist for this link";

fn duplicate_date(err: sqlx::Error) -> ApiError {
    match ApiError::from(err) {
        e if e.status() == StatusCode::CONFLICT => ApiError::conflict(DUPLICATE_DATE),
        e => e,
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Work out which link an entry refers to, recording problems under
/// `prefix`-qualified field names. Referenced rows must exist.
async fn link_target(
    db: &DbPool,
    errors: &mut ValidationErrorBuilder,
    prefix: &str,
    link_id: Option<&str>,
    user_id: Option<&str>,
    campaign_id: Option<&str>,
) -> Result<Option<LinkTarget>, ApiError> {
    match (
        non_empty(link_id),
        non_empty(user_id),
        non_empty(campaign_id),
    ) {
        (Some(link_id), _, _) => {
            if TrackingLink::find_by_id(db, link_id).await?.is_none() {
                errors.add(format!("{}link_id", prefix), "Tracking link does not exist");
                return Ok(None);
            }
            Ok(Some(LinkTarget::Link(link_id.to_string())))
        }
        (None, Some(user_id), Some(campaign_id)) => {
            let mut valid = true;
            match User::find_by_id(db, user_id).await? {
                Some(user) if user.role_enum() == UserRole::Affiliate => {}
                Some(_) => {
                    errors.add(
                        format!("{}user_id", prefix),
                        "Metrics can only be recorded for affiliates",
                    );
                    valid = false;
                }
                None => {
                    errors.add(format!("{}user_id", prefix), "User does not exist");
                    valid = false;
                }
            }
            if Campaign::find_by_id(db, campaign_id).await?.is_none() {
                errors.add(format!("{}campaign_id", prefix), "Campaign does not exist");
                valid = false;
            }
            Ok(valid.then(|| LinkTarget::UserCampaign {
                user_id: user_id.to_string(),
                campaign_id: campaign_id.to_string(),
            }))
        }
        _ => {
            errors.add(
                format!("{}link_id", prefix),
                "Either link_id or both user_id and campaign_id are required",
            );
            Ok(None)
        }
    }
}

pub async fn list_metrics(
    State(state): State<Arc<AppState>>,
    ApiQuery(mut query): ApiQuery<MetricListQuery>,
) -> Result<Json<MetricListResponse>, ApiError> {
    for field in [&mut query.start_date, &mut query.end_date] {
        if field.as_deref().is_some_and(|v| v.trim().is_empty()) {
            *field = None;
        }
    }
    validate_date_range(query.start_date.as_deref(), query.end_date.as_deref())
        .map_err(|e| ApiError::validation_field("date_range", e))?;

    Ok(Json(DailyMetric::list(&state.db, &query).await?))
}

pub async fn create_metric(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<CreateMetricRequest>,
) -> Result<(StatusCode, Json<DailyMetric>), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    errors
        .check("date", validate_date(&req.date))
        .check("values", validate_metric_values(&req.values));
    let target = link_target(
        &state.db,
        &mut errors,
        "",
        req.link_id.as_deref(),
        req.user_id.as_deref(),
        req.campaign_id.as_deref(),
    )
    .await?;
    errors.finish()?;
    let target = target.ok_or_else(|| ApiError::bad_request("Tracking link is required"))?;

    let date = req.date.trim();
    if let LinkTarget::Link(link_id) = &target {
        if DailyMetric::date_taken(&state.db, link_id, date, None).await? {
            return Err(ApiError::conflict(DUPLICATE_DATE));
        }
    }

    let metric = DailyMetric::create_for_target(&state.db, &target, date, &req.values)
        .await
        .map_err(duplicate_date)?;

    tracing::info!(metric_id = %metric.id, link_id = %metric.link_id, date = %metric.date, "Created daily metric");

    Ok((StatusCode::CREATED, Json(metric)))
}

pub async fn update_metric(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<UpdateMetricRequest>,
) -> Result<Json<DailyMetric>, ApiError> {
    let existing = DailyMetric::find_by_id(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::not_found("Metric not found"))?;

    let date = req
        .date
        .as_deref()
        .map(str::trim)
        .unwrap_or(existing.date.as_str())
        .to_string();
    let values = req.apply_to(existing.values());

    let mut errors = ValidationErrorBuilder::new();
    errors
        .check("date", validate_date(&date))
        .check("values", validate_metric_values(&values));
    errors.finish()?;

    if date != existing.date
        && DailyMetric::date_taken(&state.db, &existing.link_id, &date, Some(&id)).await?
    {
        return Err(ApiError::conflict(DUPLICATE_DATE));
    }

    let metric = DailyMetric::update(&state.db, &id, &date, &values)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => ApiError::not_found("Metric not found"),
            other => duplicate_date(other),
        })?;

    Ok(Json(metric))
}

pub async fn delete_metric(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    DailyMetric::delete(&state.db, &id)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => ApiError::not_found("Metric not found"),
            other => other.into(),
        })?;

    tracing::info!(metric_id = %id, "Deleted daily metric");
    Ok(StatusCode::NO_CONTENT)
}

/// Validate a bulk entry; problems are keyed `entries[i].field`
async fn validate_entry(
    db: &DbPool,
    errors: &mut ValidationErrorBuilder,
    index: usize,
    entry: &BulkMetricEntry,
) -> Result<Option<(LinkTarget, String, MetricValues)>, ApiError> {
    let prefix = format!("entries[{}].", index);
    let before = errors.len();

    errors
        .check(format!("{}date", prefix), validate_date(&entry.date))
        .check(format!("{}values", prefix), validate_metric_values(&entry.values));
    let target = link_target(
        db,
        errors,
        &prefix,
        entry.link_id.as_deref(),
        entry.user_id.as_deref(),
        entry.campaign_id.as_deref(),
    )
    .await?;

    if errors.len() != before {
        return Ok(None);
    }
    Ok(target.map(|t| (t, entry.date.trim().to_string(), entry.values.clone())))
}

/// Upsert many rows at once. Any invalid entry rejects the whole batch.
pub async fn bulk_upsert_metrics(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<BulkMetricRequest>,
) -> Result<Json<BulkMetricResult>, ApiError> {
    if req.entries.is_empty() {
        return Err(ApiError::validation_field(
            "entries",
            "At least one entry is required",
        ));
    }

    let mut errors = ValidationErrorBuilder::new();
    let mut validated = Vec::with_capacity(req.entries.len());
    for (index, entry) in req.entries.iter().enumerate() {
        if let Some(row) = validate_entry(&state.db, &mut errors, index, entry).await? {
            validated.push(row);
        }
    }
    errors.finish()?;

    let result = DailyMetric::bulk_upsert(&state.db, &validated)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => {
                ApiError::bad_request("A referenced tracking link no longer exists")
            }
            other => other.into(),
        })?;

    tracing::info!(
        created = result.created,
        updated = result.updated,
        "Bulk metric upsert completed"
    );

    Ok(Json(result))
}

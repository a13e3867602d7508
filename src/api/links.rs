use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use super::error::{ApiError, ValidationErrorBuilder};
use super::extract::{ApiJson, ApiQuery};
use super::scope::scope_for;
use super::validation::{validate_id, validate_tracking_code, validate_url};
use crate::db::{
    Campaign, CreateLinkRequest, LinkWithNames, TrackingLink, UpdateLinkRequest, User,
};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct MyLinksQuery {
    pub affiliate_id: Option<String>,
}

/// Links visible to the caller
pub async fn list_my_links(
    State(state): State<Arc<AppState>>,
    user: User,
    ApiQuery(query): ApiQuery<MyLinksQuery>,
) -> Result<Json<Vec<LinkWithNames>>, ApiError> {
    let scope = scope_for(&state.db, &user, query.affiliate_id.as_deref()).await?;
    let ids = scope.user_ids();
    Ok(Json(
        TrackingLink::list_with_names(&state.db, ids.as_deref()).await?,
    ))
}

#[derive(Debug, Default, Deserialize)]
pub struct AdminLinksQuery {
    pub user_id: Option<String>,
}

pub async fn list_links(
    State(state): State<Arc<AppState>>,
    ApiQuery(query): ApiQuery<AdminLinksQuery>,
) -> Result<Json<Vec<LinkWithNames>>, ApiError> {
    let ids = query
        .user_id
        .filter(|id| !id.trim().is_empty())
        .map(|id| vec![id]);
    Ok(Json(
        TrackingLink::list_with_names(&state.db, ids.as_deref()).await?,
    ))
}

pub async fn create_link(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<CreateLinkRequest>,
) -> Result<(StatusCode, Json<TrackingLink>), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    errors
        .check("user_id", validate_id(&req.user_id, "User"))
        .check("campaign_id", validate_id(&req.campaign_id, "Campaign"))
        .check("url", validate_url(&req.url));
    if let Some(code) = &req.tracking_code {
        errors.check("tracking_code", validate_tracking_code(code));
    }
    errors.finish()?;

    let owner = User::find_by_id(&state.db, &req.user_id)
        .await?
        .ok_or_else(|| ApiError::validation_field("user_id", "User does not exist"))?;
    if owner.is_admin() {
        return Err(ApiError::validation_field(
            "user_id",
            "Tracking links can only belong to affiliates",
        ));
    }
    if Campaign::find_by_id(&state.db, &req.campaign_id).await?.is_none() {
        return Err(ApiError::validation_field("campaign_id", "Campaign does not exist"));
    }

    let link = TrackingLink::create(
        &state.db,
        &req.user_id,
        &req.campaign_id,
        &req.url,
        req.tracking_code.as_deref(),
    )
    .await
    .map_err(|e| match ApiError::from(e) {
        err if err.status() == StatusCode::CONFLICT => {
            ApiError::conflict("Tracking code is already in use")
        }
        err => err,
    })?;

    tracing::info!(link_id = %link.id, user_id = %link.user_id, "Created tracking link {}", link.tracking_code);

    Ok((StatusCode::CREATED, Json(link)))
}

pub async fn update_link(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<UpdateLinkRequest>,
) -> Result<Json<TrackingLink>, ApiError> {
    validate_url(&req.url).map_err(|e| ApiError::validation_field("url", e))?;

    let link = TrackingLink::update_url(&state.db, &id, &req.url)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => ApiError::not_found("Tracking link not found"),
            other => other.into(),
        })?;

    Ok(Json(link))
}

/// Delete a link and its metrics
pub async fn delete_link(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    TrackingLink::delete(&state.db, &id)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => ApiError::not_found("Tracking link not found"),
            other => other.into(),
        })?;

    tracing::info!(link_id = %id, "Deleted tracking link");
    Ok(StatusCode::NO_CONTENT)
}

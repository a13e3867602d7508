use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;

use super::error::{ApiError, ValidationErrorBuilder};
use super::extract::ApiJson;
use super::validation::{validate_name, validate_slug};
use crate::db::{generate_slug, Campaign, CreateCampaignRequest};
use crate::AppState;

pub async fn list_campaigns(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Campaign>>, ApiError> {
    Ok(Json(Campaign::list_all(&state.db).await?))
}

pub async fn create_campaign(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<CreateCampaignRequest>,
) -> Result<(StatusCode, Json<Campaign>), ApiError> {
    let slug = match req.slug.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(slug) => slug.to_string(),
        None => generate_slug(&req.name),
    };

    let mut errors = ValidationErrorBuilder::new();
    errors
        .check("name", validate_name(&req.name))
        .check("slug", validate_slug(&slug));
    errors.finish()?;

    let campaign = Campaign::create(&state.db, &req.name, &slug)
        .await
        .map_err(|e| match ApiError::from(e) {
            err if err.status() == StatusCode::CONFLICT => {
                ApiError::conflict(format!("A campaign with slug '{}' already exists", slug))
            }
            err => err,
        })?;

    tracing::info!(campaign_id = %campaign.id, "Created campaign {}", campaign.name);

    Ok((StatusCode::CREATED, Json(campaign)))
}

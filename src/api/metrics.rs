//! Dashboard endpoints, available to every signed-in user and scoped to the
//! users they may see.

use axum::{
    extract::State,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::error::ApiError;
use super::extract::ApiQuery;
use super::scope::{scope_for, UserScope};
use super::validation::validate_date_range;
use crate::db::{
    AffiliateOption, CampaignPerformance, DailyMetric, FunnelPoint, LinkPerformance, MetricFilter,
    MetricTotals, TimeSeriesPoint, User,
};
use crate::AppState;

pub const DEFAULT_TOP_LIMIT: i64 = 10;
pub const MAX_TOP_LIMIT: i64 = 100;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    /// Comma-separated user ids, or "all"
    pub affiliate_id: Option<String>,
    pub limit: Option<i64>,
}

impl MetricsQuery {
    /// Empty strings from HTML forms count as absent
    fn date(value: &Option<String>) -> Option<String> {
        value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    /// Validate the date range and combine it with the caller's scope
    pub async fn filter(&self, state: &AppState, user: &User) -> Result<MetricFilter, ApiError> {
        let start_date = Self::date(&self.start_date);
        let end_date = Self::date(&self.end_date);
        validate_date_range(start_date.as_deref(), end_date.as_deref())
            .map_err(|e| ApiError::validation_field("date_range", e))?;

        let scope = scope_for(&state.db, user, self.affiliate_id.as_deref()).await?;

        Ok(MetricFilter {
            start_date,
            end_date,
            user_ids: scope.user_ids(),
            ..Default::default()
        })
    }
}

#[derive(Debug, Serialize)]
pub struct DashboardResponse {
    pub totals: MetricTotals,
    pub funnel: Vec<FunnelPoint>,
}

pub async fn dashboard(
    State(state): State<Arc<AppState>>,
    user: User,
    ApiQuery(query): ApiQuery<MetricsQuery>,
) -> Result<Json<DashboardResponse>, ApiError> {
    let filter = query.filter(&state, &user).await?;

    let totals = DailyMetric::totals(&state.db, &filter).await?;
    let funnel = DailyMetric::funnel(&state.db, &filter).await?;

    Ok(Json(DashboardResponse { totals, funnel }))
}

pub async fn funnel(
    State(state): State<Arc<AppState>>,
    user: User,
    ApiQuery(query): ApiQuery<MetricsQuery>,
) -> Result<Json<Vec<FunnelPoint>>, ApiError> {
    let filter = query.filter(&state, &user).await?;
    Ok(Json(DailyMetric::funnel(&state.db, &filter).await?))
}

/// Best performing tracking links
pub async fn top_campaigns(
    State(state): State<Arc<AppState>>,
    user: User,
    ApiQuery(query): ApiQuery<MetricsQuery>,
) -> Result<Json<Vec<LinkPerformance>>, ApiError> {
    let filter = query.filter(&state, &user).await?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_TOP_LIMIT)
        .clamp(1, MAX_TOP_LIMIT);

    Ok(Json(DailyMetric::top_links(&state.db, &filter, limit).await?))
}

pub async fn time_series(
    State(state): State<Arc<AppState>>,
    user: User,
    ApiQuery(query): ApiQuery<MetricsQuery>,
) -> Result<Json<Vec<TimeSeriesPoint>>, ApiError> {
    let filter = query.filter(&state, &user).await?;
    Ok(Json(DailyMetric::time_series(&state.db, &filter).await?))
}

pub async fn by_campaign(
    State(state): State<Arc<AppState>>,
    user: User,
    ApiQuery(query): ApiQuery<MetricsQuery>,
) -> Result<Json<Vec<CampaignPerformance>>, ApiError> {
    let filter = query.filter(&state, &user).await?;
    Ok(Json(DailyMetric::by_campaign(&state.db, &filter).await?))
}

/// Affiliates the caller may pick in the `affiliate_id` filter
pub async fn affiliates(
    State(state): State<Arc<AppState>>,
    user: User,
) -> Result<Json<Vec<AffiliateOption>>, ApiError> {
    let scope = scope_for(&state.db, &user, None).await?;
    let options = match scope {
        UserScope::All => User::affiliate_options(&state.db, None).await?,
        UserScope::Only(ids) => User::affiliate_options(&state.db, Some(&ids)).await?,
    };
    Ok(Json(options))
}

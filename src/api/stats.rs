use axum::{
    extract::State,
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::error::ApiError;
use super::extract::ApiQuery;
use super::validation::validate_date_range;
use crate::db::{
    AffiliatePerformance, Campaign, DailyMetric, MetricFilter, MetricTotals, TrackingLink, User,
};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct DateRangeQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

impl DateRangeQuery {
    fn filter(&self) -> Result<MetricFilter, ApiError> {
        let clean = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        let start_date = clean(&self.start_date);
        let end_date = clean(&self.end_date);
        validate_date_range(start_date.as_deref(), end_date.as_deref())
            .map_err(|e| ApiError::validation_field("date_range", e))?;

        Ok(MetricFilter {
            start_date,
            end_date,
            ..Default::default()
        })
    }
}

/// Admin overview counters
#[derive(Debug, Serialize)]
pub struct AdminStats {
    /// Affiliate count per status; every status is present
    pub affiliates: BTreeMap<String, i64>,
    pub total_affiliates: i64,
    pub campaigns: i64,
    pub links: i64,
    pub metrics: MetricTotals,
}

pub async fn get_stats(
    State(state): State<Arc<AppState>>,
    ApiQuery(query): ApiQuery<DateRangeQuery>,
) -> Result<Json<AdminStats>, ApiError> {
    let filter = query.filter()?;

    let mut affiliates: BTreeMap<String, i64> = ["pending", "active", "banned", "rejected"]
        .into_iter()
        .map(|s| (s.to_string(), 0))
        .collect();
    for (status, count) in User::count_by_status(&state.db).await? {
        affiliates.insert(status, count);
    }
    let total_affiliates = affiliates.values().sum();

    Ok(Json(AdminStats {
        affiliates,
        total_affiliates,
        campaigns: Campaign::count(&state.db).await?,
        links: TrackingLink::count(&state.db).await?,
        metrics: DailyMetric::totals(&state.db, &filter).await?,
    }))
}

/// Per-affiliate performance, best earners first
pub async fn get_performance(
    State(state): State<Arc<AppState>>,
    ApiQuery(query): ApiQuery<DateRangeQuery>,
) -> Result<Json<Vec<AffiliatePerformance>>, ApiError> {
    let filter = query.filter()?;
    Ok(Json(DailyMetric::by_affiliate(&state.db, &filter).await?))
}

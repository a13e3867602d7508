//! Daily metric models and the aggregation queries behind the dashboards.
//!
//! Every row holds one tracking link's numbers for one day. The aggregation
//! helpers take a [`MetricFilter`] (date range plus the set of visible users)
//! and group rows by date, link, campaign, or affiliate.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection, SqlitePool};

use super::link::TrackingLink;

/// Conversion rate in percent: FTDs per registration, 0 when there are none
pub fn conversion_rate(ftds: i64, registrations: i64) -> f64 {
    if registrations == 0 {
        0.0
    } else {
        ftds as f64 / registrations as f64 * 100.0
    }
}

/// Total commission earned: CPA plus revenue share
pub fn total_commission(commission_cpa: f64, commission_rev: f64) -> f64 {
    commission_cpa + commission_rev
}

/// Counters and amounts carried by a metric row
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricValues {
    #[serde(default)]
    pub clicks: i64,
    #[serde(default)]
    pub registrations: i64,
    #[serde(default)]
    pub ftds: i64,
    #[serde(default)]
    pub qualified_cpa: i64,
    #[serde(default)]
    pub deposit_amount: f64,
    #[serde(default)]
    pub commission_cpa: f64,
    #[serde(default)]
    pub commission_rev: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DailyMetric {
    pub id: String,
    pub link_id: String,
    pub user_id: String,
    pub date: String,
    pub clicks: i64,
    pub registrations: i64,
    pub ftds: i64,
    pub qualified_cpa: i64,
    pub deposit_amount: f64,
    pub commission_cpa: f64,
    pub commission_rev: f64,
    pub created_at: String,
    pub updated_at: String,
}

impl DailyMetric {
    pub fn values(&self) -> MetricValues {
        MetricValues {
            clicks: self.clicks,
            registrations: self.registrations,
            ftds: self.ftds,
            qualified_cpa: self.qualified_cpa,
            deposit_amount: self.deposit_amount,
            commission_cpa: self.commission_cpa,
            commission_rev: self.commission_rev,
        }
    }
}

/// Metric row joined with affiliate, campaign, and link details
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct MetricWithNames {
    pub id: String,
    pub link_id: String,
    pub tracking_code: String,
    pub user_id: String,
    pub affiliate_name: String,
    pub campaign_id: String,
    pub campaign_name: String,
    pub date: String,
    pub clicks: i64,
    pub registrations: i64,
    pub ftds: i64,
    pub qualified_cpa: i64,
    pub deposit_amount: f64,
    pub commission_cpa: f64,
    pub commission_rev: f64,
    pub updated_at: String,
}

/// Create request. The link is given directly or resolved from the
/// user/campaign pair.
#[derive(Debug, Deserialize)]
pub struct CreateMetricRequest {
    pub link_id: Option<String>,
    pub user_id: Option<String>,
    pub campaign_id: Option<String>,
    pub date: String,
    #[serde(flatten)]
    pub values: MetricValues,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateMetricRequest {
    pub date: Option<String>,
    pub clicks: Option<i64>,
    pub registrations: Option<i64>,
    pub ftds: Option<i64>,
    pub qualified_cpa: Option<i64>,
    pub deposit_amount: Option<f64>,
    pub commission_cpa: Option<f64>,
    pub commission_rev: Option<f64>,
}

impl UpdateMetricRequest {
    /// Overlay the provided fields on existing values
    pub fn apply_to(&self, mut values: MetricValues) -> MetricValues {
        if let Some(v) = self.clicks {
            values.clicks = v;
        }
        if let Some(v) = self.registrations {
            values.registrations = v;
        }
        if let Some(v) = self.ftds {
            values.ftds = v;
        }
        if let Some(v) = self.qualified_cpa {
            values.qualified_cpa = v;
        }
        if let Some(v) = self.deposit_amount {
            values.deposit_amount = v;
        }
        if let Some(v) = self.commission_cpa {
            values.commission_cpa = v;
        }
        if let Some(v) = self.commission_rev {
            values.commission_rev = v;
        }
        values
    }
}

/// One entry of a bulk upsert
#[derive(Debug, Clone, Deserialize)]
pub struct BulkMetricEntry {
    pub link_id: Option<String>,
    pub user_id: Option<String>,
    pub campaign_id: Option<String>,
    pub date: String,
    #[serde(flatten)]
    pub values: MetricValues,
}

#[derive(Debug, Deserialize)]
pub struct BulkMetricRequest {
    pub entries: Vec<BulkMetricEntry>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BulkMetricResult {
    pub created: usize,
    pub updated: usize,
}

/// How a bulk entry names its link once validated
#[derive(Debug, Clone)]
pub enum LinkTarget {
    Link(String),
    UserCampaign { user_id: String, campaign_id: String },
    Code(String),
}

/// Query parameters for the admin metric listing
#[derive(Debug, Clone, Deserialize, Default)]
pub struct MetricListQuery {
    pub user_id: Option<String>,
    pub link_id: Option<String>,
    pub campaign_id: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    /// Page number (1-indexed, defaults to 1)
    pub page: Option<i64>,
    /// Items per page (defaults to 50, max 200)
    pub per_page: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricListResponse {
    pub items: Vec<MetricWithNames>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}

/// Row filter shared by listings and aggregations.
///
/// `user_ids: None` means every user; `Some(vec![])` matches nothing.
#[derive(Debug, Clone, Default)]
pub struct MetricFilter {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub user_ids: Option<Vec<String>>,
    pub link_id: Option<String>,
    pub campaign_id: Option<String>,
}

impl MetricFilter {
    /// Build a WHERE clause over `daily_metrics m JOIN tracking_links l`
    /// with its positional bindings.
    pub fn where_clause(&self) -> (String, Vec<String>) {
        let mut conditions = Vec::new();
        let mut bindings: Vec<String> = Vec::new();

        if let Some(start) = &self.start_date {
            conditions.push("m.date >= ?".to_string());
            bindings.push(start.clone());
        }

        if let Some(end) = &self.end_date {
            conditions.push("m.date <= ?".to_string());
            bindings.push(end.clone());
        }

        if let Some(ids) = &self.user_ids {
            if ids.is_empty() {
                conditions.push("1 = 0".to_string());
            } else {
                conditions.push(format!("m.user_id IN ({})", vec!["?"; ids.len()].join(", ")));
                bindings.extend(ids.iter().cloned());
            }
        }

        if let Some(link_id) = &self.link_id {
            conditions.push("m.link_id = ?".to_string());
            bindings.push(link_id.clone());
        }

        if let Some(campaign_id) = &self.campaign_id {
            conditions.push("l.campaign_id = ?".to_string());
            bindings.push(campaign_id.clone());
        }

        let clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (clause, bindings)
    }
}

/// Summed counters over a group of metric rows
#[derive(Debug, Clone, Default, PartialEq, Serialize, FromRow)]
pub struct MetricSums {
    pub clicks: i64,
    pub registrations: i64,
    pub ftds: i64,
    pub qualified_cpa: i64,
    pub deposit_amount: f64,
    pub commission_cpa: f64,
    pub commission_rev: f64,
}

impl MetricSums {
    pub fn derived(&self) -> Derived {
        Derived {
            conversion_rate: conversion_rate(self.ftds, self.registrations),
            total_commission: total_commission(self.commission_cpa, self.commission_rev),
        }
    }
}

/// Values computed from sums rather than stored
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Derived {
    pub conversion_rate: f64,
    pub total_commission: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricTotals {
    #[serde(flatten)]
    pub sums: MetricSums,
    #[serde(flatten)]
    pub derived: Derived,
}

impl From<MetricSums> for MetricTotals {
    fn from(sums: MetricSums) -> Self {
        let derived = sums.derived();
        Self { sums, derived }
    }
}

/// Per-day funnel point
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct FunnelPoint {
    pub date: String,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub sums: MetricSums,
    #[sqlx(skip)]
    #[serde(flatten)]
    pub derived: Derived,
}

/// Registrations/FTDs per day
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct TimeSeriesPoint {
    pub date: String,
    pub registrations: i64,
    pub ftds: i64,
}

/// Performance of one tracking link
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct LinkPerformance {
    pub link_id: String,
    pub tracking_code: String,
    pub user_id: String,
    pub affiliate_name: String,
    pub campaign_id: String,
    pub campaign_name: String,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub sums: MetricSums,
    #[sqlx(skip)]
    #[serde(flatten)]
    pub derived: Derived,
}

/// Performance of one campaign across all its links
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct CampaignPerformance {
    pub campaign_id: String,
    pub campaign_name: String,
    pub link_count: i64,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub sums: MetricSums,
    #[sqlx(skip)]
    #[serde(flatten)]
    pub derived: Derived,
}

/// Performance of one affiliate across all their links
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AffiliatePerformance {
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub status: String,
    pub parent_id: Option<String>,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub sums: MetricSums,
    #[sqlx(skip)]
    #[serde(flatten)]
    pub derived: Derived,
}

const SUM_COLUMNS: &str = r#"
    CAST(COALESCE(SUM(m.clicks), 0) AS INTEGER) AS clicks,
    CAST(COALESCE(SUM(m.registrations), 0) AS INTEGER) AS registrations,
    CAST(COALESCE(SUM(m.ftds), 0) AS INTEGER) AS ftds,
    CAST(COALESCE(SUM(m.qualified_cpa), 0) AS INTEGER) AS qualified_cpa,
    CAST(COALESCE(SUM(m.deposit_amount), 0) AS REAL) AS deposit_amount,
    CAST(COALESCE(SUM(m.commission_cpa), 0) AS REAL) AS commission_cpa,
    CAST(COALESCE(SUM(m.commission_rev), 0) AS REAL) AS commission_rev
"#;

const METRIC_FROM: &str = "FROM daily_metrics m JOIN tracking_links l ON l.id = m.link_id";

impl DailyMetric {
    pub async fn find_by_id(db: &SqlitePool, id: &str) -> Result<Option<DailyMetric>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM daily_metrics WHERE id = ?")
            .bind(id)
            .fetch_optional(db)
            .await
    }

    /// Whether another row already holds `date` for the link
    pub async fn date_taken(
        db: &SqlitePool,
        link_id: &str,
        date: &str,
        except_id: Option<&str>,
    ) -> Result<bool, sqlx::Error> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM daily_metrics WHERE link_id = ? AND date = ? AND id != ?",
        )
        .bind(link_id)
        .bind(date)
        .bind(except_id.unwrap_or(""))
        .fetch_one(db)
        .await?;
        Ok(count > 0)
    }

    pub async fn create(
        db: &SqlitePool,
        link: &TrackingLink,
        date: &str,
        values: &MetricValues,
    ) -> Result<DailyMetric, sqlx::Error> {
        let mut conn = db.acquire().await?;
        insert_metric(&mut conn, link, date, values).await
    }

    pub async fn update(
        db: &SqlitePool,
        id: &str,
        date: &str,
        values: &MetricValues,
    ) -> Result<DailyMetric, sqlx::Error> {
        let now = chrono::Utc::now().to_rfc3339();
        let result = sqlx::query(
            r#"
            UPDATE daily_metrics
            SET date = ?, clicks = ?, registrations = ?, ftds = ?, qualified_cpa = ?,
                deposit_amount = ?, commission_cpa = ?, commission_rev = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(date)
        .bind(values.clicks)
        .bind(values.registrations)
        .bind(values.ftds)
        .bind(values.qualified_cpa)
        .bind(values.deposit_amount)
        .bind(values.commission_cpa)
        .bind(values.commission_rev)
        .bind(&now)
        .bind(id)
        .execute(db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(sqlx::Error::RowNotFound);
        }

        Self::find_by_id(db, id).await?.ok_or(sqlx::Error::RowNotFound)
    }

    pub async fn delete(db: &SqlitePool, id: &str) -> Result<(), sqlx::Error> {
        let result = sqlx::query("DELETE FROM daily_metrics WHERE id = ?")
            .bind(id)
            .execute(db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(sqlx::Error::RowNotFound);
        }
        Ok(())
    }

    /// Create a row for a link target. A link implicitly created for a
    /// user/campaign pair is rolled back if the insert fails.
    pub async fn create_for_target(
        db: &SqlitePool,
        target: &LinkTarget,
        date: &str,
        values: &MetricValues,
    ) -> Result<DailyMetric, sqlx::Error> {
        let mut tx = db.begin().await?;

        let link = resolve_link(&mut tx, target).await?;
        let metric = insert_metric(&mut tx, &link, date, values).await?;

        tx.commit().await?;
        Ok(metric)
    }

    /// Upsert a batch of already-validated entries in one transaction
    pub async fn bulk_upsert(
        db: &SqlitePool,
        entries: &[(LinkTarget, String, MetricValues)],
    ) -> Result<BulkMetricResult, sqlx::Error> {
        let mut tx = db.begin().await?;
        let mut result = BulkMetricResult::default();

        for (target, date, values) in entries {
            let link = resolve_link(&mut tx, target).await?;
            if upsert_metric(&mut tx, &link, date, values).await? {
                result.created += 1;
            } else {
                result.updated += 1;
            }
        }

        tx.commit().await?;
        Ok(result)
    }

    /// Paginated listing for the admin metric editor
    pub async fn list(
        db: &SqlitePool,
        query: &MetricListQuery,
    ) -> Result<MetricListResponse, sqlx::Error> {
        let page = query.page.unwrap_or(1).max(1);
        let per_page = query.per_page.unwrap_or(50).clamp(1, 200);
        let offset = (page - 1).saturating_mul(per_page);

        let filter = MetricFilter {
            start_date: query.start_date.clone(),
            end_date: query.end_date.clone(),
            user_ids: query.user_id.clone().map(|id| vec![id]),
            link_id: query.link_id.clone(),
            campaign_id: query.campaign_id.clone(),
        };
        let (where_clause, bindings) = filter.where_clause();

        let count_sql = format!("SELECT COUNT(*) {} {}", METRIC_FROM, where_clause);
        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
        for binding in &bindings {
            count_query = count_query.bind(binding);
        }
        let total = count_query.fetch_one(db).await?;

        let sql = format!(
            r#"
            SELECT m.id, m.link_id, l.tracking_code, m.user_id, u.name AS affiliate_name,
                   c.id AS campaign_id, c.name AS campaign_name, m.date, m.clicks,
                   m.registrations, m.ftds, m.qualified_cpa, m.deposit_amount,
                   m.commission_cpa, m.commission_rev, m.updated_at
            {}
            JOIN users u ON u.id = m.user_id
            JOIN campaigns c ON c.id = l.campaign_id
            {}
            ORDER BY m.date DESC, u.name ASC, l.tracking_code ASC
            LIMIT ? OFFSET ?
            "#,
            METRIC_FROM, where_clause
        );
        let mut list_query = sqlx::query_as::<_, MetricWithNames>(&sql);
        for binding in &bindings {
            list_query = list_query.bind(binding);
        }
        let items = list_query.bind(per_page).bind(offset).fetch_all(db).await?;

        let total_pages = (total as f64 / per_page as f64).ceil() as i64;

        Ok(MetricListResponse {
            items,
            total,
            page,
            per_page,
            total_pages,
        })
    }

    /// Sums across every matching row
    pub async fn totals(db: &SqlitePool, filter: &MetricFilter) -> Result<MetricTotals, sqlx::Error> {
        let (where_clause, bindings) = filter.where_clause();
        let sql = format!("SELECT {} {} {}", SUM_COLUMNS, METRIC_FROM, where_clause);

        let mut query = sqlx::query_as::<_, MetricSums>(&sql);
        for binding in &bindings {
            query = query.bind(binding);
        }
        Ok(query.fetch_one(db).await?.into())
    }

    /// Conversion funnel grouped by date, oldest first
    pub async fn funnel(db: &SqlitePool, filter: &MetricFilter) -> Result<Vec<FunnelPoint>, sqlx::Error> {
        let (where_clause, bindings) = filter.where_clause();
        let sql = format!(
            "SELECT m.date AS date, {} {} {} GROUP BY m.date ORDER BY m.date ASC",
            SUM_COLUMNS, METRIC_FROM, where_clause
        );

        let mut query = sqlx::query_as::<_, FunnelPoint>(&sql);
        for binding in &bindings {
            query = query.bind(binding);
        }
        let mut points = query.fetch_all(db).await?;
        for point in &mut points {
            point.derived = point.sums.derived();
        }
        Ok(points)
    }

    /// Registrations and FTDs per day, oldest first
    pub async fn time_series(
        db: &SqlitePool,
        filter: &MetricFilter,
    ) -> Result<Vec<TimeSeriesPoint>, sqlx::Error> {
        let (where_clause, bindings) = filter.where_clause();
        let sql = format!(
            r#"
            SELECT m.date AS date,
                   CAST(COALESCE(SUM(m.registrations), 0) AS INTEGER) AS registrations,
                   CAST(COALESCE(SUM(m.ftds), 0) AS INTEGER) AS ftds
            {} {}
            GROUP BY m.date
            ORDER BY m.date ASC
            "#,
            METRIC_FROM, where_clause
        );

        let mut query = sqlx::query_as::<_, TimeSeriesPoint>(&sql);
        for binding in &bindings {
            query = query.bind(binding);
        }
        query.fetch_all(db).await
    }

    /// Best tracking links by CPA commission
    pub async fn top_links(
        db: &SqlitePool,
        filter: &MetricFilter,
        limit: i64,
    ) -> Result<Vec<LinkPerformance>, sqlx::Error> {
        let (where_clause, bindings) = filter.where_clause();
        let sql = format!(
            r#"
            SELECT l.id AS link_id, l.tracking_code, l.user_id, u.name AS affiliate_name,
                   c.id AS campaign_id, c.name AS campaign_name, {}
            {}
            JOIN users u ON u.id = l.user_id
            JOIN campaigns c ON c.id = l.campaign_id
            {}
            GROUP BY l.id
            ORDER BY SUM(m.commission_cpa) DESC,
                     SUM(m.commission_cpa) + SUM(m.commission_rev) DESC,
                     l.tracking_code ASC
            LIMIT ?
            "#,
            SUM_COLUMNS, METRIC_FROM, where_clause
        );

        let mut query = sqlx::query_as::<_, LinkPerformance>(&sql);
        for binding in &bindings {
            query = query.bind(binding);
        }
        let mut rows = query.bind(limit).fetch_all(db).await?;
        for row in &mut rows {
            row.derived = row.sums.derived();
        }
        Ok(rows)
    }

    /// Per-campaign performance summed over every link
    pub async fn by_campaign(
        db: &SqlitePool,
        filter: &MetricFilter,
    ) -> Result<Vec<CampaignPerformance>, sqlx::Error> {
        let (where_clause, bindings) = filter.where_clause();
        let sql = format!(
            r#"
            SELECT c.id AS campaign_id, c.name AS campaign_name,
                   COUNT(DISTINCT l.id) AS link_count, {}
            {}
            JOIN campaigns c ON c.id = l.campaign_id
            {}
            GROUP BY c.id
            ORDER BY SUM(m.commission_cpa) DESC, c.name ASC
            "#,
            SUM_COLUMNS, METRIC_FROM, where_clause
        );

        let mut query = sqlx::query_as::<_, CampaignPerformance>(&sql);
        for binding in &bindings {
            query = query.bind(binding);
        }
        let mut rows = query.fetch_all(db).await?;
        for row in &mut rows {
            row.derived = row.sums.derived();
        }
        Ok(rows)
    }

    /// Per-affiliate performance. Affiliates without rows in the range are
    /// included with zero sums.
    pub async fn by_affiliate(
        db: &SqlitePool,
        filter: &MetricFilter,
    ) -> Result<Vec<AffiliatePerformance>, sqlx::Error> {
        // Date bounds go into the join so affiliates without rows survive
        let mut join_conditions = vec!["m.user_id = u.id".to_string()];
        let mut bindings: Vec<String> = Vec::new();
        if let Some(start) = &filter.start_date {
            join_conditions.push("m.date >= ?".to_string());
            bindings.push(start.clone());
        }
        if let Some(end) = &filter.end_date {
            join_conditions.push("m.date <= ?".to_string());
            bindings.push(end.clone());
        }

        let mut sql = format!(
            r#"
            SELECT u.id AS user_id, u.name, u.email, u.status, u.parent_id, {}
            FROM users u
            LEFT JOIN daily_metrics m ON {}
            WHERE u.role = 'affiliate'
            "#,
            SUM_COLUMNS,
            join_conditions.join(" AND ")
        );
        if let Some(ids) = &filter.user_ids {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            sql.push_str(&format!(" AND u.id IN ({})", vec!["?"; ids.len()].join(", ")));
            bindings.extend(ids.iter().cloned());
        }
        sql.push_str(
            r#"
            GROUP BY u.id
            ORDER BY COALESCE(SUM(m.commission_cpa), 0) + COALESCE(SUM(m.commission_rev), 0) DESC,
                     u.name ASC
            "#,
        );

        let mut query = sqlx::query_as::<_, AffiliatePerformance>(&sql);
        for binding in &bindings {
            query = query.bind(binding);
        }
        let mut rows = query.fetch_all(db).await?;
        for row in &mut rows {
            row.derived = row.sums.derived();
        }
        Ok(rows)
    }
}

/// Insert a metric on an existing connection. The row's user is taken from
/// the link so the two can never disagree.
pub(crate) async fn insert_metric(
    conn: &mut SqliteConnection,
    link: &TrackingLink,
    date: &str,
    values: &MetricValues,
) -> Result<DailyMetric, sqlx::Error> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();

    sqlx::query(
        r#"
        INSERT INTO daily_metrics (id, link_id, user_id, date, clicks, registrations, ftds,
                                   qualified_cpa, deposit_amount, commission_cpa, commission_rev,
                                   created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&link.id)
    .bind(&link.user_id)
    .bind(date)
    .bind(values.clicks)
    .bind(values.registrations)
    .bind(values.ftds)
    .bind(values.qualified_cpa)
    .bind(values.deposit_amount)
    .bind(values.commission_cpa)
    .bind(values.commission_rev)
    .bind(&now)
    .bind(&now)
    .execute(&mut *conn)
    .await?;

    sqlx::query_as("SELECT * FROM daily_metrics WHERE id = ?")
        .bind(&id)
        .fetch_one(&mut *conn)
        .await
}

/// Insert or overwrite the `(link, date)` row. Returns true when a new row
/// was created.
pub(crate) async fn upsert_metric(
    conn: &mut SqliteConnection,
    link: &TrackingLink,
    date: &str,
    values: &MetricValues,
) -> Result<bool, sqlx::Error> {
    let existing: Option<String> =
        sqlx::query_scalar("SELECT id FROM daily_metrics WHERE link_id = ? AND date = ?")
            .bind(&link.id)
            .bind(date)
            .fetch_optional(&mut *conn)
            .await?;

    match existing {
        None => {
            insert_metric(conn, link, date, values).await?;
            Ok(true)
        }
        Some(id) => {
            let now = chrono::Utc::now().to_rfc3339();
            sqlx::query(
                r#"
                UPDATE daily_metrics
                SET clicks = ?, registrations = ?, ftds = ?, qualified_cpa = ?,
                    deposit_amount = ?, commission_cpa = ?, commission_rev = ?, updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(values.clicks)
            .bind(values.registrations)
            .bind(values.ftds)
            .bind(values.qualified_cpa)
            .bind(values.deposit_amount)
            .bind(values.commission_cpa)
            .bind(values.commission_rev)
            .bind(&now)
            .bind(&id)
            .execute(&mut *conn)
            .await?;
            Ok(false)
        }
    }
}

/// Resolve a link target to a link row, creating a link for a user/campaign
/// pair that has none.
pub(crate) async fn resolve_link(
    conn: &mut SqliteConnection,
    target: &LinkTarget,
) -> Result<TrackingLink, sqlx::Error> {
    match target {
        LinkTarget::Link(id) => sqlx::query_as("SELECT * FROM tracking_links WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or(sqlx::Error::RowNotFound),
        LinkTarget::Code(code) => TrackingLink::find_by_code(conn, code)
            .await?
            .ok_or(sqlx::Error::RowNotFound),
        LinkTarget::UserCampaign {
            user_id,
            campaign_id,
        } => super::link::find_or_create_link(conn, user_id, campaign_id).await,
    }
}

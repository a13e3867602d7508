//! Tracking link models.

use rand::{distr::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection, SqlitePool};

/// Length of generated tracking codes
pub const TRACKING_CODE_LEN: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TrackingLink {
    pub id: String,
    pub user_id: String,
    pub campaign_id: String,
    pub url: String,
    pub tracking_code: String,
    pub created_at: String,
}

/// Tracking link joined with its affiliate and campaign names
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct LinkWithNames {
    pub id: String,
    pub user_id: String,
    pub affiliate_name: String,
    pub campaign_id: String,
    pub campaign_name: String,
    pub url: String,
    pub tracking_code: String,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateLinkRequest {
    pub user_id: String,
    pub campaign_id: String,
    pub url: String,
    pub tracking_code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateLinkRequest {
    pub url: String,
}

/// Random lower-case alphanumeric tracking code
pub fn generate_tracking_code() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(TRACKING_CODE_LEN)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect()
}

const LINK_WITH_NAMES_SELECT: &str = r#"
    SELECT l.id, l.user_id, u.name AS affiliate_name, l.campaign_id, c.name AS campaign_name,
           l.url, l.tracking_code, l.created_at
    FROM tracking_links l
    JOIN users u ON u.id = l.user_id
    JOIN campaigns c ON c.id = l.campaign_id
"#;

impl TrackingLink {
    pub async fn find_by_id(db: &SqlitePool, id: &str) -> Result<Option<TrackingLink>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM tracking_links WHERE id = ?")
            .bind(id)
            .fetch_optional(db)
            .await
    }

    pub async fn find_by_code(
        conn: &mut SqliteConnection,
        code: &str,
    ) -> Result<Option<TrackingLink>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM tracking_links WHERE tracking_code = ?")
            .bind(code)
            .fetch_optional(conn)
            .await
    }

    pub async fn count(db: &SqlitePool) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM tracking_links")
            .fetch_one(db)
            .await
    }

    pub async fn count_for_user(db: &SqlitePool, user_id: &str) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM tracking_links WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(db)
            .await
    }

    pub async fn create(
        db: &SqlitePool,
        user_id: &str,
        campaign_id: &str,
        url: &str,
        tracking_code: Option<&str>,
    ) -> Result<TrackingLink, sqlx::Error> {
        let mut conn = db.acquire().await?;
        insert_link(&mut conn, user_id, campaign_id, url, tracking_code).await
    }

    pub async fn update_url(db: &SqlitePool, id: &str, url: &str) -> Result<TrackingLink, sqlx::Error> {
        let result = sqlx::query("UPDATE tracking_links SET url = ? WHERE id = ?")
            .bind(url.trim())
            .bind(id)
            .execute(db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(sqlx::Error::RowNotFound);
        }
        Self::find_by_id(db, id).await?.ok_or(sqlx::Error::RowNotFound)
    }

    /// Delete a link together with its metrics
    pub async fn delete(db: &SqlitePool, id: &str) -> Result<(), sqlx::Error> {
        let mut tx = db.begin().await?;

        sqlx::query("DELETE FROM daily_metrics WHERE link_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM tracking_links WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(sqlx::Error::RowNotFound);
        }

        tx.commit().await
    }

    /// Links with names, optionally restricted to a set of owners
    pub async fn list_with_names(
        db: &SqlitePool,
        user_ids: Option<&[String]>,
    ) -> Result<Vec<LinkWithNames>, sqlx::Error> {
        let mut sql = String::from(LINK_WITH_NAMES_SELECT);
        if let Some(ids) = user_ids {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            sql.push_str(&format!(
                " WHERE l.user_id IN ({})",
                vec!["?"; ids.len()].join(", ")
            ));
        }
        sql.push_str(" ORDER BY c.name ASC, u.name ASC, l.created_at ASC");

        let mut query = sqlx::query_as::<_, LinkWithNames>(&sql);
        if let Some(ids) = user_ids {
            for id in ids {
                query = query.bind(id);
            }
        }
        query.fetch_all(db).await
    }
}

/// Insert a link on an existing connection (pool connection or transaction).
/// A fresh code is generated when none is given.
pub(crate) async fn insert_link(
    conn: &mut SqliteConnection,
    user_id: &str,
    campaign_id: &str,
    url: &str,
    tracking_code: Option<&str>,
) -> Result<TrackingLink, sqlx::Error> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    let code = tracking_code
        .map(|c| c.trim().to_string())
        .unwrap_or_else(generate_tracking_code);

    sqlx::query(
        r#"
        INSERT INTO tracking_links (id, user_id, campaign_id, url, tracking_code, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(user_id)
    .bind(campaign_id)
    .bind(url.trim())
    .bind(&code)
    .bind(&now)
    .execute(&mut *conn)
    .await?;

    sqlx::query_as("SELECT * FROM tracking_links WHERE id = ?")
        .bind(&id)
        .fetch_one(&mut *conn)
        .await
}

/// The user's first link for a campaign, creating an empty one when the pair
/// has none yet.
pub(crate) async fn find_or_create_link(
    conn: &mut SqliteConnection,
    user_id: &str,
    campaign_id: &str,
) -> Result<TrackingLink, sqlx::Error> {
    let existing: Option<TrackingLink> = sqlx::query_as(
        r#"
        SELECT * FROM tracking_links
        WHERE user_id = ? AND campaign_id = ?
        ORDER BY created_at ASC, id ASC
        LIMIT 1
        "#,
    )
    .bind(user_id)
    .bind(campaign_id)
    .fetch_optional(&mut *conn)
    .await?;

    match existing {
        Some(link) => Ok(link),
        None => {
            tracing::info!(user_id, campaign_id, "Creating tracking link for manual metric entry");
            insert_link(conn, user_id, campaign_id, "", None).await
        }
    }
}

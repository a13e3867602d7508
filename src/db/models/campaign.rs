//! Campaign models.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// A named marketing channel. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Campaign {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateCampaignRequest {
    pub name: String,
    pub slug: Option<String>,
}

/// Generate a URL-friendly slug from a name
pub fn generate_slug(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

impl Campaign {
    pub async fn list_all(db: &SqlitePool) -> Result<Vec<Campaign>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM campaigns ORDER BY name ASC")
            .fetch_all(db)
            .await
    }

    pub async fn find_by_id(db: &SqlitePool, id: &str) -> Result<Option<Campaign>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM campaigns WHERE id = ?")
            .bind(id)
            .fetch_optional(db)
            .await
    }

    pub async fn count(db: &SqlitePool) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM campaigns")
            .fetch_one(db)
            .await
    }

    pub async fn create(db: &SqlitePool, name: &str, slug: &str) -> Result<Campaign, sqlx::Error> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();

        sqlx::query("INSERT INTO campaigns (id, name, slug, created_at) VALUES (?, ?, ?, ?)")
            .bind(&id)
            .bind(name.trim())
            .bind(slug)
            .bind(&now)
            .execute(db)
            .await?;

        Self::find_by_id(db, &id).await?.ok_or(sqlx::Error::RowNotFound)
    }
}

//! User models: admins and affiliates, with the parent/sub-account hierarchy.

use serde::{Deserialize, Deserializer, Serialize};
use sqlx::{FromRow, SqliteConnection, SqlitePool};

/// Account role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    Affiliate,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Affiliate => "affiliate",
        }
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "admin" => Ok(UserRole::Admin),
            "affiliate" => Ok(UserRole::Affiliate),
            _ => Err(format!("Unknown role: {}", s)),
        }
    }
}

/// Account lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    /// Self-registered, waiting for an admin decision
    Pending,
    Active,
    Banned,
    Rejected,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Pending => "pending",
            UserStatus::Active => "active",
            UserStatus::Banned => "banned",
            UserStatus::Rejected => "rejected",
        }
    }

    /// Message shown when an account in this status tries to log in.
    /// `None` means the status allows login.
    pub fn login_denial(&self) -> Option<&'static str> {
        match self {
            UserStatus::Active => None,
            UserStatus::Pending => Some("Your account is pending approval"),
            UserStatus::Rejected => Some("Your application has been rejected"),
            UserStatus::Banned => Some("Your account has been banned"),
        }
    }
}

impl std::fmt::Display for UserStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for UserStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(UserStatus::Pending),
            "active" => Ok(UserStatus::Active),
            "banned" => Ok(UserStatus::Banned),
            "rejected" => Ok(UserStatus::Rejected),
            _ => Err(format!("Unknown status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: String,
    pub status: String,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub telegram: Option<String>,
    pub projected_ftds: Option<String>,
    pub cpa_amount: Option<f64>,
    pub parent_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl User {
    /// Unknown role strings are treated as the least privileged role.
    pub fn role_enum(&self) -> UserRole {
        self.role.parse().unwrap_or(UserRole::Affiliate)
    }

    /// Unknown status strings are treated as pending (no access).
    pub fn status_enum(&self) -> UserStatus {
        self.status.parse().unwrap_or(UserStatus::Pending)
    }

    pub fn is_admin(&self) -> bool {
        self.role_enum() == UserRole::Admin
    }

    /// Whether a request carrying this user's token may proceed.
    pub fn has_access(&self) -> bool {
        self.is_admin() || self.status_enum() == UserStatus::Active
    }
}

/// Public view of a user (never includes the password hash)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: String,
    pub status: String,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub telegram: Option<String>,
    pub projected_ftds: Option<String>,
    pub cpa_amount: Option<f64>,
    pub parent_id: Option<String>,
    pub created_at: String,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            name: user.name,
            email: user.email,
            role: user.role,
            status: user.status,
            phone: user.phone,
            company: user.company,
            telegram: user.telegram,
            projected_ftds: user.projected_ftds,
            cpa_amount: user.cpa_amount,
            parent_id: user.parent_id,
            created_at: user.created_at,
        }
    }
}

/// Affiliate row for admin listings
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AffiliateSummary {
    pub id: String,
    pub name: String,
    pub email: String,
    pub status: String,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub telegram: Option<String>,
    pub projected_ftds: Option<String>,
    pub cpa_amount: Option<f64>,
    pub parent_id: Option<String>,
    pub parent_name: Option<String>,
    pub sub_account_count: i64,
    pub created_at: String,
}

/// Minimal affiliate entry used for filter dropdowns
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AffiliateOption {
    pub id: String,
    pub name: String,
    pub email: String,
    pub parent_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user: UserResponse,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub telegram: Option<String>,
    pub projected_ftds: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: Option<String>,
    pub status: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub telegram: Option<String>,
    pub projected_ftds: Option<String>,
    pub cpa_amount: Option<f64>,
    pub parent_id: Option<String>,
}

/// Partial update. For `parent_id`, an absent field leaves the parent
/// unchanged while an explicit `null` detaches the user.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateUserRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub role: Option<String>,
    pub status: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub telegram: Option<String>,
    pub projected_ftds: Option<String>,
    pub cpa_amount: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub parent_id: Option<Option<String>>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

/// Distinguishes an explicit `null` from a missing field.
fn deserialize_some<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// Trim and lower-case an email address for storage and lookup.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Fields for inserting a user row
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: UserRole,
    pub status: UserStatus,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub telegram: Option<String>,
    pub projected_ftds: Option<String>,
    pub cpa_amount: Option<f64>,
    pub parent_id: Option<String>,
}

impl User {
    pub async fn find_by_id(db: &SqlitePool, id: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(db)
            .await
    }

    pub async fn find_by_email(db: &SqlitePool, email: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM users WHERE email = ?")
            .bind(normalize_email(email))
            .fetch_optional(db)
            .await
    }

    pub async fn email_taken(
        db: &SqlitePool,
        email: &str,
        except_id: Option<&str>,
    ) -> Result<bool, sqlx::Error> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE email = ? AND id != ?")
            .bind(normalize_email(email))
            .bind(except_id.unwrap_or(""))
            .fetch_one(db)
            .await?;
        Ok(count > 0)
    }

    pub async fn create(db: &SqlitePool, new: NewUser) -> Result<User, sqlx::Error> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO users (id, name, email, password_hash, role, status, phone, company,
                               telegram, projected_ftds, cpa_amount, parent_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(new.name.trim())
        .bind(normalize_email(&new.email))
        .bind(&new.password_hash)
        .bind(new.role.as_str())
        .bind(new.status.as_str())
        .bind(&new.phone)
        .bind(&new.company)
        .bind(&new.telegram)
        .bind(&new.projected_ftds)
        .bind(new.cpa_amount)
        .bind(&new.parent_id)
        .bind(&now)
        .bind(&now)
        .execute(db)
        .await?;

        Self::find_by_id(db, &id).await?.ok_or(sqlx::Error::RowNotFound)
    }

    pub async fn list_all(db: &SqlitePool) -> Result<Vec<User>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM users ORDER BY created_at DESC, name ASC")
            .fetch_all(db)
            .await
    }

    pub async fn list_pending(db: &SqlitePool) -> Result<Vec<User>, sqlx::Error> {
        sqlx::query_as(
            "SELECT * FROM users WHERE role = 'affiliate' AND status = 'pending' ORDER BY created_at DESC",
        )
        .fetch_all(db)
        .await
    }

    /// Ids of the direct sub-accounts of a user
    pub async fn child_ids(db: &SqlitePool, parent_id: &str) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar("SELECT id FROM users WHERE parent_id = ? ORDER BY name ASC")
            .bind(parent_id)
            .fetch_all(db)
            .await
    }

    pub async fn children(db: &SqlitePool, parent_id: &str) -> Result<Vec<User>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM users WHERE parent_id = ? ORDER BY name ASC")
            .bind(parent_id)
            .fetch_all(db)
            .await
    }

    pub async fn set_status(
        db: &SqlitePool,
        id: &str,
        status: UserStatus,
    ) -> Result<User, sqlx::Error> {
        let now = chrono::Utc::now().to_rfc3339();
        let result = sqlx::query("UPDATE users SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(&now)
            .bind(id)
            .execute(db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(sqlx::Error::RowNotFound);
        }

        Self::find_by_id(db, id).await?.ok_or(sqlx::Error::RowNotFound)
    }

    /// Persist every mutable column of `self`.
    pub async fn save(&self, db: &SqlitePool) -> Result<User, sqlx::Error> {
        let now = chrono::Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            UPDATE users
            SET name = ?, email = ?, password_hash = ?, role = ?, status = ?, phone = ?,
                company = ?, telegram = ?, projected_ftds = ?, cpa_amount = ?, parent_id = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&self.name)
        .bind(normalize_email(&self.email))
        .bind(&self.password_hash)
        .bind(&self.role)
        .bind(&self.status)
        .bind(&self.phone)
        .bind(&self.company)
        .bind(&self.telegram)
        .bind(&self.projected_ftds)
        .bind(self.cpa_amount)
        .bind(&self.parent_id)
        .bind(&now)
        .bind(&self.id)
        .execute(db)
        .await?;

        Self::find_by_id(db, &self.id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    /// Hard-delete a user: metrics, then links, then detach sub-accounts,
    /// then the user row, all in one transaction.
    pub async fn delete_cascade(db: &SqlitePool, id: &str) -> Result<(), sqlx::Error> {
        let mut tx = db.begin().await?;

        delete_cascade_in(&mut *tx, id).await?;

        tx.commit().await
    }

    pub async fn list_affiliates(
        db: &SqlitePool,
        status: Option<UserStatus>,
    ) -> Result<Vec<AffiliateSummary>, sqlx::Error> {
        let mut sql = String::from(
            r#"
            SELECT u.id, u.name, u.email, u.status, u.phone, u.company, u.telegram,
                   u.projected_ftds, u.cpa_amount, u.parent_id, p.name AS parent_name,
                   (SELECT COUNT(*) FROM users c WHERE c.parent_id = u.id) AS sub_account_count,
                   u.created_at
            FROM users u
            LEFT JOIN users p ON p.id = u.parent_id
            WHERE u.role = 'affiliate'
            "#,
        );
        if status.is_some() {
            sql.push_str(" AND u.status = ?");
        }
        sql.push_str(" ORDER BY u.created_at DESC, u.name ASC");

        let mut query = sqlx::query_as::<_, AffiliateSummary>(&sql);
        if let Some(status) = status {
            query = query.bind(status.as_str());
        }
        query.fetch_all(db).await
    }

    /// Affiliates a caller may pick in a filter; `None` means every affiliate.
    pub async fn affiliate_options(
        db: &SqlitePool,
        ids: Option<&[String]>,
    ) -> Result<Vec<AffiliateOption>, sqlx::Error> {
        match ids {
            None => {
                sqlx::query_as(
                    "SELECT id, name, email, parent_id FROM users WHERE role = 'affiliate' ORDER BY name ASC",
                )
                .fetch_all(db)
                .await
            }
            Some([]) => Ok(Vec::new()),
            Some(ids) => {
                let placeholders = vec!["?"; ids.len()].join(", ");
                let sql = format!(
                    "SELECT id, name, email, parent_id FROM users WHERE id IN ({}) ORDER BY name ASC",
                    placeholders
                );
                let mut query = sqlx::query_as::<_, AffiliateOption>(&sql);
                for id in ids {
                    query = query.bind(id);
                }
                query.fetch_all(db).await
            }
        }
    }

    pub async fn count_by_status(db: &SqlitePool) -> Result<Vec<(String, i64)>, sqlx::Error> {
        sqlx::query_as(
            "SELECT status, COUNT(*) FROM users WHERE role = 'affiliate' GROUP BY status ORDER BY status",
        )
        .fetch_all(db)
        .await
    }
}

async fn delete_cascade_in(conn: &mut SqliteConnection, id: &str) -> Result<(), sqlx::Error> {
    let exists: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE id = ?")
        .bind(id)
        .fetch_one(&mut *conn)
        .await?;
    if exists == 0 {
        return Err(sqlx::Error::RowNotFound);
    }

    sqlx::query("DELETE FROM daily_metrics WHERE user_id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM tracking_links WHERE user_id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("UPDATE users SET parent_id = NULL WHERE parent_id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

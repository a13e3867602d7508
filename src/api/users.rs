//! Admin endpoints for signup review, affiliates, and user management.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::auth::hash_for_storage;
use super::error::{ApiError, ValidationErrorBuilder};
use super::extract::{ApiJson, ApiQuery};
use super::validation::{
    parse_role, parse_status, validate_cpa_amount, validate_email, validate_name,
    validate_optional_text, validate_password, validate_projected_ftds,
};
use crate::db::{
    normalize_email, AffiliateSummary, CreateUserRequest, DbPool, LinkWithNames, NewUser,
    TrackingLink, UpdateStatusRequest, UpdateUserRequest, User, UserResponse, UserRole,
    UserStatus,
};
use crate::AppState;

fn user_not_found(err: sqlx::Error) -> ApiError {
    match err {
        sqlx::Error::RowNotFound => ApiError::not_found("User not found"),
        other => other.into(),
    }
}

async fn load_user(db: &DbPool, id: &str) -> Result<User, ApiError> {
    User::find_by_id(db, id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))
}

/// Check that `parent_id` may become the parent of `user_id` (`None` for a
/// user that does not exist yet). The hierarchy is one level deep.
async fn validate_parent(
    db: &DbPool,
    user_id: Option<&str>,
    parent_id: &str,
) -> Result<(), ApiError> {
    if user_id == Some(parent_id) {
        return Err(ApiError::validation_field(
            "parent_id",
            "A user cannot be their own parent",
        ));
    }

    let parent = User::find_by_id(db, parent_id)
        .await?
        .ok_or_else(|| ApiError::validation_field("parent_id", "Parent user does not exist"))?;
    if parent.role_enum() != UserRole::Affiliate {
        return Err(ApiError::validation_field(
            "parent_id",
            "Parent must be an affiliate",
        ));
    }
    if parent.parent_id.is_some() {
        return Err(ApiError::validation_field(
            "parent_id",
            "Parent is already a sub-account",
        ));
    }

    if let Some(user_id) = user_id {
        if !User::child_ids(db, user_id).await?.is_empty() {
            return Err(ApiError::validation_field(
                "parent_id",
                "A user with sub-accounts cannot be given a parent",
            ));
        }
    }

    Ok(())
}

// -------------------------------------------------------------------------
// Signup requests
// -------------------------------------------------------------------------

pub async fn list_requests(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<UserResponse>>, ApiError> {
    let pending = User::list_pending(&state.db).await?;
    Ok(Json(pending.into_iter().map(UserResponse::from).collect()))
}

async fn decide_request(
    state: &AppState,
    id: &str,
    status: UserStatus,
) -> Result<UserResponse, ApiError> {
    let user = load_user(&state.db, id).await?;
    if user.role_enum() != UserRole::Affiliate {
        return Err(ApiError::bad_request("Only affiliate signups can be reviewed"));
    }

    let user = User::set_status(&state.db, id, status)
        .await
        .map_err(user_not_found)?;
    tracing::info!(user_id = %user.id, status = %status, "Signup request reviewed");
    Ok(user.into())
}

pub async fn approve_request(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<UserResponse>, ApiError> {
    Ok(Json(decide_request(&state, &id, UserStatus::Active).await?))
}

pub async fn reject_request(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<UserResponse>, ApiError> {
    Ok(Json(decide_request(&state, &id, UserStatus::Rejected).await?))
}

/// Ban, unban, or otherwise move a user between statuses
pub async fn update_status(
    State(state): State<Arc<AppState>>,
    admin: User,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<UpdateStatusRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    let status = parse_status(&req.status).map_err(|e| ApiError::validation_field("status", e))?;
    if admin.id == id {
        return Err(ApiError::bad_request("You cannot change your own status"));
    }

    let user = User::set_status(&state.db, &id, status)
        .await
        .map_err(user_not_found)?;
    tracing::info!(user_id = %user.id, status = %status, "User status changed");
    Ok(Json(user.into()))
}

// -------------------------------------------------------------------------
// Affiliates
// -------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct AffiliatesQuery {
    pub status: Option<String>,
}

pub async fn list_affiliates(
    State(state): State<Arc<AppState>>,
    ApiQuery(query): ApiQuery<AffiliatesQuery>,
) -> Result<Json<Vec<AffiliateSummary>>, ApiError> {
    let status = match query.status.as_deref().map(str::trim) {
        None | Some("") | Some("all") => None,
        Some(s) => Some(parse_status(s).map_err(|e| ApiError::validation_field("status", e))?),
    };
    Ok(Json(User::list_affiliates(&state.db, status).await?))
}

#[derive(Debug, Serialize)]
pub struct AffiliateDetail {
    pub affiliate: UserResponse,
    pub links: Vec<LinkWithNames>,
    pub sub_accounts: Vec<UserResponse>,
}

pub async fn get_affiliate(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<AffiliateDetail>, ApiError> {
    let user = User::find_by_id(&state.db, &id)
        .await?
        .filter(|u| u.role_enum() == UserRole::Affiliate)
        .ok_or_else(|| ApiError::not_found("Affiliate not found"))?;

    let links = TrackingLink::list_with_names(&state.db, Some(std::slice::from_ref(&id))).await?;
    let sub_accounts = User::children(&state.db, &id).await?;

    Ok(Json(AffiliateDetail {
        affiliate: user.into(),
        links,
        sub_accounts: sub_accounts.into_iter().map(UserResponse::from).collect(),
    }))
}

// -------------------------------------------------------------------------
// Users
// -------------------------------------------------------------------------

pub async fn list_users(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<UserResponse>>, ApiError> {
    let users = User::list_all(&state.db).await?;
    Ok(Json(users.into_iter().map(UserResponse::from).collect()))
}

fn check_profile_fields(
    errors: &mut ValidationErrorBuilder,
    phone: &Option<String>,
    company: &Option<String>,
    telegram: &Option<String>,
    projected_ftds: &Option<String>,
    cpa_amount: Option<f64>,
) {
    errors
        .check("phone", validate_optional_text(phone, "Phone"))
        .check("company", validate_optional_text(company, "Company"))
        .check("telegram", validate_optional_text(telegram, "Telegram"))
        .check("projected_ftds", validate_projected_ftds(projected_ftds))
        .check("cpa_amount", validate_cpa_amount(cpa_amount));
}

/// Parse an optional field, recording a parse failure under `field`
fn optional_field<T>(
    errors: &mut ValidationErrorBuilder,
    field: &str,
    value: Option<&str>,
    parse: fn(&str) -> Result<T, String>,
) -> Option<T> {
    match value.map(parse) {
        Some(Ok(parsed)) => Some(parsed),
        Some(Err(e)) => {
            errors.add(field, e);
            None
        }
        None => None,
    }
}

pub async fn create_user(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<CreateUserRequest>,
) -> Result<(StatusCode, Json<UserResponse>), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    errors
        .check("name", validate_name(&req.name))
        .check("email", validate_email(&req.email))
        .check("password", validate_password(&req.password));
    check_profile_fields(
        &mut errors,
        &req.phone,
        &req.company,
        &req.telegram,
        &req.projected_ftds,
        req.cpa_amount,
    );

    let role = optional_field(&mut errors, "role", req.role.as_deref(), parse_role)
        .unwrap_or(UserRole::Affiliate);
    let status = optional_field(&mut errors, "status", req.status.as_deref(), parse_status)
        .unwrap_or(UserStatus::Active);
    errors.finish()?;

    if User::email_taken(&state.db, &req.email, None).await? {
        return Err(ApiError::conflict("Email is already registered"));
    }

    let parent_id = req.parent_id.filter(|p| !p.trim().is_empty());
    if let Some(parent_id) = &parent_id {
        if role != UserRole::Affiliate {
            return Err(ApiError::validation_field(
                "parent_id",
                "Only affiliates can have a parent",
            ));
        }
        validate_parent(&state.db, None, parent_id).await?;
    }

    let user = User::create(
        &state.db,
        NewUser {
            name: req.name,
            email: req.email,
            password_hash: hash_for_storage(&req.password)?,
            role,
            status,
            phone: req.phone,
            company: req.company,
            telegram: req.telegram,
            projected_ftds: req.projected_ftds,
            cpa_amount: req.cpa_amount,
            parent_id,
        },
    )
    .await?;

    tracing::info!(user_id = %user.id, role = %role, "Created user {}", user.email);

    Ok((StatusCode::CREATED, Json(user.into())))
}

pub async fn update_user(
    State(state): State<Arc<AppState>>,
    admin: User,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<UpdateUserRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    let mut user = load_user(&state.db, &id).await?;

    let mut errors = ValidationErrorBuilder::new();
    if let Some(name) = &req.name {
        errors.check("name", validate_name(name));
    }
    if let Some(email) = &req.email {
        errors.check("email", validate_email(email));
    }
    if let Some(password) = &req.password {
        errors.check("password", validate_password(password));
    }
    check_profile_fields(
        &mut errors,
        &req.phone,
        &req.company,
        &req.telegram,
        &req.projected_ftds,
        req.cpa_amount,
    );
    let role = optional_field(&mut errors, "role", req.role.as_deref(), parse_role);
    let status = optional_field(&mut errors, "status", req.status.as_deref(), parse_status);
    errors.finish()?;

    if admin.id == id
        && (role.is_some_and(|r| r != UserRole::Admin)
            || status.is_some_and(|s| s != user.status_enum()))
    {
        return Err(ApiError::bad_request(
            "You cannot change your own role or status",
        ));
    }

    // Sub-accounts and tracking data may only hang off affiliates
    if user.role_enum() == UserRole::Affiliate && role.is_some_and(|r| r != UserRole::Affiliate) {
        if !User::child_ids(&state.db, &id).await?.is_empty() {
            return Err(ApiError::validation_field(
                "role",
                "An affiliate with sub-accounts cannot change role",
            ));
        }
        if TrackingLink::count_for_user(&state.db, &id).await? > 0 {
            return Err(ApiError::validation_field(
                "role",
                "An affiliate with tracking links cannot change role",
            ));
        }
    }

    if let Some(email) = &req.email {
        if User::email_taken(&state.db, email, Some(&id)).await? {
            return Err(ApiError::conflict("Email is already registered"));
        }
        user.email = normalize_email(email);
    }
    if let Some(name) = req.name {
        user.name = name.trim().to_string();
    }
    if let Some(password) = &req.password {
        user.password_hash = hash_for_storage(password)?;
    }
    if let Some(role) = role {
        user.role = role.as_str().to_string();
    }
    if let Some(status) = status {
        user.status = status.as_str().to_string();
    }
    if req.phone.is_some() {
        user.phone = req.phone;
    }
    if req.company.is_some() {
        user.company = req.company;
    }
    if req.telegram.is_some() {
        user.telegram = req.telegram;
    }
    if req.projected_ftds.is_some() {
        user.projected_ftds = req.projected_ftds;
    }
    if req.cpa_amount.is_some() {
        user.cpa_amount = req.cpa_amount;
    }

    match req.parent_id {
        None => {}
        Some(None) => user.parent_id = None,
        Some(Some(parent_id)) if parent_id.trim().is_empty() => user.parent_id = None,
        Some(Some(parent_id)) => {
            validate_parent(&state.db, Some(&id), &parent_id).await?;
            user.parent_id = Some(parent_id);
        }
    }
    if user.parent_id.is_some() && user.role_enum() != UserRole::Affiliate {
        return Err(ApiError::validation_field(
            "parent_id",
            "Only affiliates can have a parent",
        ));
    }

    let user = user.save(&state.db).await?;
    tracing::info!(user_id = %user.id, "Updated user");
    Ok(Json(user.into()))
}

/// Hard delete with links, metrics, and sub-account detachment
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    admin: User,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if admin.id == id {
        return Err(ApiError::bad_request("You cannot delete your own account"));
    }

    User::delete_cascade(&state.db, &id)
        .await
        .map_err(user_not_found)?;

    tracing::info!(user_id = %id, deleted_by = %admin.id, "Deleted user");
    Ok(StatusCode::NO_CONTENT)
}

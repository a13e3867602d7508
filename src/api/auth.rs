use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    async_trait,
    body::Body,
    extract::{FromRequestParts, State},
    http::{request::Parts, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Serialize;
use std::sync::Arc;

use super::error::{ApiError, ValidationErrorBuilder};
use super::extract::ApiJson;
use super::validation::{
    validate_email, validate_name, validate_optional_text, validate_password,
    validate_projected_ftds,
};
use crate::config::AuthConfig;
use crate::db::{
    DbPool, LoginRequest, LoginResponse, NewUser, RegisterRequest, User, UserResponse, UserRole,
    UserStatus,
};
use crate::AppState;

/// Name of the http-only session cookie
pub const TOKEN_COOKIE: &str = "token";

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Serialize)]
pub struct RegisterResponse {
    pub message: String,
    pub user: UserResponse,
}

/// Hash a password using Argon2
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2.hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Verify a password against a hash
pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

pub(crate) fn hash_for_storage(password: &str) -> Result<String, ApiError> {
    hash_password(password).map_err(|e| {
        tracing::error!("Failed to hash password: {}", e);
        ApiError::internal("Failed to hash password")
    })
}

fn session_cookie(token: String, auth: &AuthConfig) -> Cookie<'static> {
    Cookie::build((TOKEN_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(auth.secure_cookies)
        .max_age(time::Duration::days(auth.token_ttl_days))
        .build()
}

/// Login endpoint. Sets the session cookie on success.
pub async fn login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    ApiJson(request): ApiJson<LoginRequest>,
) -> Result<(CookieJar, Json<LoginResponse>), ApiError> {
    let user = User::find_by_email(&state.db, &request.email).await?;

    let user = match user {
        Some(user) if verify_password(&request.password, &user.password_hash) => user,
        _ => {
            tracing::warn!(email = %request.email.trim(), "Failed login attempt");
            return Err(ApiError::unauthorized("Invalid email or password"));
        }
    };

    if !user.is_admin() {
        if let Some(denial) = user.status_enum().login_denial() {
            tracing::warn!(user_id = %user.id, status = %user.status, "Login refused for inactive account");
            return Err(ApiError::forbidden(denial));
        }
    }

    let token = state.jwt.generate_token(&user).map_err(|e| {
        tracing::error!("Failed to sign session token: {}", e);
        ApiError::internal("Failed to create session")
    })?;

    tracing::info!(user_id = %user.id, "User logged in");

    let jar = jar.add(session_cookie(token, &state.config.auth));
    Ok((
        jar,
        Json(LoginResponse {
            user: UserResponse::from(user),
        }),
    ))
}

/// Self-registration. New affiliates wait for admin approval.
pub async fn register(
    State(state): State<Arc<AppState>>,
    ApiJson(request): ApiJson<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    errors
        .check("name", validate_name(&request.name))
        .check("email", validate_email(&request.email))
        .check("password", validate_password(&request.password))
        .check("phone", validate_optional_text(&request.phone, "Phone"))
        .check("company", validate_optional_text(&request.company, "Company"))
        .check("telegram", validate_optional_text(&request.telegram, "Telegram"))
        .check("projected_ftds", validate_projected_ftds(&request.projected_ftds));
    errors.finish()?;

    if User::email_taken(&state.db, &request.email, None).await? {
        return Err(ApiError::conflict("Email is already registered"));
    }

    let user = User::create(
        &state.db,
        NewUser {
            name: request.name,
            email: request.email,
            password_hash: hash_for_storage(&request.password)?,
            role: UserRole::Affiliate,
            status: UserStatus::Pending,
            phone: request.phone,
            company: request.company,
            telegram: request.telegram,
            projected_ftds: request.projected_ftds,
            cpa_amount: None,
            parent_id: None,
        },
    )
    .await?;

    tracing::info!(user_id = %user.id, "New affiliate registered, pending approval");

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: "Registration received. Your account is pending approval.".to_string(),
            user: user.into(),
        }),
    ))
}

pub async fn logout(jar: CookieJar) -> (CookieJar, Json<MessageResponse>) {
    let jar = jar.remove(Cookie::build((TOKEN_COOKIE, "")).path("/"));
    (
        jar,
        Json(MessageResponse {
            message: "Logged out".to_string(),
        }),
    )
}

pub async fn me(user: User) -> Json<UserResponse> {
    Json(user.into())
}

/// Resolve the user behind the session cookie
pub async fn authenticate(state: &AppState, jar: &CookieJar) -> Result<User, ApiError> {
    let token = jar
        .get(TOKEN_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;

    let claims = state
        .jwt
        .validate_token(&token)
        .map_err(|_| ApiError::unauthorized("Invalid or expired session"))?;

    let user = User::find_by_id(&state.db, &claims.sub)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid or expired session"))?;

    if !user.has_access() {
        return Err(ApiError::unauthorized("Account is not active"));
    }

    Ok(user)
}

/// Auth middleware: resolves the session and stores the user in request
/// extensions for the extractor and the admin check.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let user = authenticate(&state, &jar).await?;
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

/// Must run inside `auth_middleware`
pub async fn admin_middleware(request: Request<Body>, next: Next) -> Response {
    match request.extensions().get::<User>() {
        Some(user) if user.is_admin() => next.run(request).await,
        Some(_) => ApiError::forbidden("Admin access required").into_response(),
        None => ApiError::unauthorized("Authentication required").into_response(),
    }
}

/// Extractor for the authenticated user
#[async_trait]
impl FromRequestParts<Arc<AppState>> for User {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<User>() {
            return Ok(user.clone());
        }
        let jar = CookieJar::from_headers(&parts.headers);
        authenticate(state, &jar).await
    }
}

/// Create an active admin account
pub async fn create_admin(
    db: &DbPool,
    email: &str,
    name: &str,
    password: &str,
) -> anyhow::Result<User> {
    if let Err(e) = validate_email(email) {
        anyhow::bail!("Invalid admin email: {}", e);
    }
    if let Err(e) = validate_password(password) {
        anyhow::bail!("Invalid admin password: {}", e);
    }
    if User::email_taken(db, email, None).await? {
        anyhow::bail!("A user with email {} already exists", email.trim());
    }

    let password_hash =
        hash_password(password).map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?;

    let user = User::create(
        db,
        NewUser {
            name: name.to_string(),
            email: email.to_string(),
            password_hash,
            role: UserRole::Admin,
            status: UserStatus::Active,
            phone: None,
            company: None,
            telegram: None,
            projected_ftds: None,
            cpa_amount: None,
            parent_id: None,
        },
    )
    .await?;

    Ok(user)
}

/// Seed the configured admin account on startup if it does not exist yet
pub async fn ensure_admin_user(db: &DbPool, auth: &AuthConfig) -> anyhow::Result<()> {
    let (Some(email), Some(password)) = (&auth.admin_email, &auth.admin_password) else {
        return Ok(());
    };

    if User::find_by_email(db, email).await?.is_some() {
        tracing::debug!("Admin account {} already exists", email);
        return Ok(());
    }

    let user = create_admin(db, email, "Administrator", password).await?;
    tracing::info!(user_id = %user.id, "Created admin account {}", user.email);
    Ok(())
}

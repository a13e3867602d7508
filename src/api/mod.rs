mod admin_metrics;
pub mod auth;
mod campaigns;
pub mod error;
mod extract;
pub mod jwt;
mod links;
mod metrics;
pub mod scope;
mod stats;
mod users;
pub mod validation;

use axum::{
    http::{header, HeaderValue, Method},
    middleware,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Auth routes (public, except /me which resolves the cookie itself)
    let auth_routes = Router::new()
        .route("/login", post(auth::login))
        .route("/register", post(auth::register))
        .route("/logout", post(auth::logout))
        .route("/me", get(auth::me));

    // Any signed-in user, scoped to what they may see
    let api_routes = Router::new()
        .route("/metrics/dashboard", get(metrics::dashboard))
        .route("/metrics/funnel", get(metrics::funnel))
        .route("/metrics/top-campaigns", get(metrics::top_campaigns))
        .route("/metrics/time-series", get(metrics::time_series))
        .route("/metrics/by-campaign", get(metrics::by_campaign))
        .route("/metrics/affiliates", get(metrics::affiliates))
        .route("/campaigns", get(campaigns::list_campaigns))
        .route("/links", get(links::list_my_links))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ));

    let admin_routes = Router::new()
        // Signup review
        .route("/requests", get(users::list_requests))
        .route("/requests/:id/approve", post(users::approve_request))
        .route("/requests/:id/reject", post(users::reject_request))
        // Affiliates
        .route("/affiliates", get(users::list_affiliates))
        .route("/affiliates/:id", get(users::get_affiliate))
        // Users
        .route("/users", get(users::list_users).post(users::create_user))
        .route(
            "/users/:id",
            put(users::update_user).delete(users::delete_user),
        )
        .route("/users/:id/status", put(users::update_status))
        // Metrics
        .route(
            "/metrics",
            get(admin_metrics::list_metrics).post(admin_metrics::create_metric),
        )
        .route("/metrics/bulk", post(admin_metrics::bulk_upsert_metrics))
        .route(
            "/metrics/:id",
            put(admin_metrics::update_metric).delete(admin_metrics::delete_metric),
        )
        // Tracking links
        .route("/links", get(links::list_links).post(links::create_link))
        .route(
            "/links/:id",
            put(links::update_link).delete(links::delete_link),
        )
        // Campaigns
        .route(
            "/campaigns",
            get(campaigns::list_campaigns).post(campaigns::create_campaign),
        )
        // Reports
        .route("/stats", get(stats::get_stats))
        .route("/performance", get(stats::get_performance))
        // Layers run bottom-up: authenticate, then require admin
        .layer(middleware::from_fn(auth::admin_middleware))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ));

    let mut router = Router::new()
        .route("/health", get(health_check))
        .nest("/api/auth", auth_routes)
        .nest("/api/admin", admin_routes)
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http());

    if let Some(cors) = cors_layer(&state.config.server.cors_origins) {
        router = router.layer(cors);
    }

    router.with_state(state)
}

/// Credentialed CORS for the configured browser origins
fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", o);
                None
            }
        })
        .collect();

    if origins.is_empty() {
        return None;
    }

    Some(
        CorsLayer::new()
            .allow_origin(origins)
            .allow_credentials(true)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
            .allow_headers([header::CONTENT_TYPE]),
    )
}

async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::testing::{new_user, seed_affiliate, seed_campaign};
    use crate::db::{init_memory, DailyMetric, MetricValues, TrackingLink, User, UserRole, UserStatus};
    use axum::body::Body;
    use axum::http::{HeaderMap, Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn test_app() -> (Router, Arc<AppState>) {
        let mut config = Config::default();
        config.auth.jwt_secret = "test-secret".to_string();
        let db = init_memory().await.unwrap();
        let state = Arc::new(AppState::new(config, db));
        (create_router(state.clone()), state)
    }

    fn cookie_for(state: &AppState, user: &User) -> String {
        format!("token={}", state.jwt.generate_token(user).unwrap())
    }

    async fn seed_admin(state: &AppState) -> User {
        User::create(
            &state.db,
            new_user("Boss", "boss@example.com", UserRole::Admin, UserStatus::Active),
        )
        .await
        .unwrap()
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        cookie: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, HeaderMap, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).to_string()))
        };
        (status, headers, value)
    }

    #[tokio::test]
    async fn test_health_check() {
        let (app, _) = test_app().await;
        let (status, _, body) = send(&app, "GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Value::String("OK".to_string()));
    }

    #[tokio::test]
    async fn test_login_by_status() {
        let (app, state) = test_app().await;
        let hash = auth::hash_password("password123").unwrap();

        let statuses = [
            ("active", UserRole::Affiliate, UserStatus::Active),
            ("pending", UserRole::Affiliate, UserStatus::Pending),
            ("banned", UserRole::Affiliate, UserStatus::Banned),
            ("rejected", UserRole::Affiliate, UserStatus::Rejected),
            ("pendingadmin", UserRole::Admin, UserStatus::Pending),
        ];
        for (name, role, status) in statuses {
            let mut user = new_user(name, &format!("{}@example.com", name), role, status);
            user.password_hash = hash.clone();
            User::create(&state.db, user).await.unwrap();
        }

        let login = |email: &str, password: &str| json!({ "email": email, "password": password });

        let (status, headers, body) = send(
            &app,
            "POST",
            "/api/auth/login",
            None,
            Some(login("Active@Example.com", "password123")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["email"], "active@example.com");
        assert!(body["user"].get("password_hash").is_none());
        let set_cookie = headers
            .get(header::SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(set_cookie.starts_with("token="));
        assert!(set_cookie.contains("HttpOnly"));
        assert!(set_cookie.contains("SameSite=Lax"));
        assert!(set_cookie.contains("Max-Age=604800"));

        let expected = [
            ("pending@example.com", "Your account is pending approval"),
            ("banned@example.com", "Your account has been banned"),
            ("rejected@example.com", "Your application has been rejected"),
        ];
        for (email, message) in expected {
            let (status, headers, body) =
                send(&app, "POST", "/api/auth/login", None, Some(login(email, "password123"))).await;
            assert_eq!(status, StatusCode::FORBIDDEN, "{}", email);
            assert_eq!(body["error"]["message"], message);
            assert!(headers.get(header::SET_COOKIE).is_none());
        }

        let (status, _, _) = send(
            &app,
            "POST",
            "/api/auth/login",
            None,
            Some(login("pendingadmin@example.com", "password123")),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "admins bypass the status check");

        for (email, password) in [
            ("active@example.com", "wrong-password"),
            ("nobody@example.com", "password123"),
        ] {
            let (status, _, body) =
                send(&app, "POST", "/api/auth/login", None, Some(login(email, password))).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
            assert_eq!(body["error"]["message"], "Invalid email or password");
        }
    }

    #[tokio::test]
    async fn test_register_creates_pending_affiliate() {
        let (app, state) = test_app().await;
        let payload = json!({
            "name": "Newbie",
            "email": "new@example.com",
            "password": "password123",
            "projected_ftds": "10-50"
        });

        let (status, headers, body) =
            send(&app, "POST", "/api/auth/register", None, Some(payload.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["user"]["status"], "pending");
        assert_eq!(body["user"]["role"], "affiliate");
        assert!(headers.get(header::SET_COOKIE).is_none());

        let stored = User::find_by_email(&state.db, "new@example.com").await.unwrap().unwrap();
        assert!(auth::verify_password("password123", &stored.password_hash));

        let (status, _, _) = send(&app, "POST", "/api/auth/register", None, Some(payload)).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _, body) = send(
            &app,
            "POST",
            "/api/auth/register",
            None,
            Some(json!({ "name": "", "email": "bad", "password": "short" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let details = body["error"]["details"].as_object().unwrap();
        assert!(details.contains_key("name"));
        assert!(details.contains_key("email"));
        assert!(details.contains_key("password"));
    }

    #[tokio::test]
    async fn test_session_lookup_and_logout() {
        let (app, state) = test_app().await;
        let ann = seed_affiliate(&state.db, "Ann", None).await;
        let cookie = cookie_for(&state, &ann);

        let (status, _, _) = send(&app, "GET", "/api/auth/me", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _, _) = send(&app, "GET", "/api/auth/me", Some("token=garbage"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _, body) = send(&app, "GET", "/api/auth/me", Some(&cookie), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], ann.id);

        // A ban takes effect on the next request even with a valid token
        User::set_status(&state.db, &ann.id, UserStatus::Banned).await.unwrap();
        let (status, _, _) = send(&app, "GET", "/api/metrics/dashboard", Some(&cookie), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, headers, _) = send(&app, "POST", "/api/auth/logout", Some(&cookie), None).await;
        assert_eq!(status, StatusCode::OK);
        let set_cookie = headers.get(header::SET_COOKIE).unwrap().to_str().unwrap();
        assert!(set_cookie.starts_with("token="));
        assert!(set_cookie.contains("Max-Age=0"));
    }

    #[tokio::test]
    async fn test_admin_routes_require_admin() {
        let (app, state) = test_app().await;
        let ann = seed_affiliate(&state.db, "Ann", None).await;
        let admin = seed_admin(&state).await;

        let (status, _, _) = send(&app, "GET", "/api/admin/users", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _, body) =
            send(&app, "GET", "/api/admin/users", Some(&cookie_for(&state, &ann)), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["code"], "forbidden");

        let (status, _, body) =
            send(&app, "GET", "/api/admin/users", Some(&cookie_for(&state, &admin)), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_dashboard_is_scoped_to_hierarchy() {
        let (app, state) = test_app().await;
        let a = seed_affiliate(&state.db, "A", None).await;
        let b = seed_affiliate(&state.db, "B", Some(&a.id)).await;
        let d = seed_affiliate(&state.db, "D", None).await;
        let campaign = seed_campaign(&state.db, "Casino").await;

        for (user, clicks) in [(&a, 1), (&b, 10), (&d, 100)] {
            let link = TrackingLink::create(&state.db, &user.id, &campaign.id, "", None)
                .await
                .unwrap();
            let values = MetricValues {
                clicks,
                registrations: 10,
                ftds: 5,
                commission_cpa: 50.0,
                commission_rev: 5.0,
                ..Default::default()
            };
            DailyMetric::create(&state.db, &link, "2024-03-01", &values)
                .await
                .unwrap();
        }

        let cookie = cookie_for(&state, &a);
        let clicks = |body: &Value| body["totals"]["clicks"].as_i64().unwrap();

        let (status, _, body) = send(&app, "GET", "/api/metrics/dashboard", Some(&cookie), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(clicks(&body), 11);
        assert_eq!(body["totals"]["conversion_rate"], 50.0);
        assert_eq!(body["totals"]["total_commission"], 110.0);
        assert_eq!(body["funnel"].as_array().unwrap().len(), 1);

        let uri = format!("/api/metrics/dashboard?affiliate_id={}", d.id);
        let (_, _, body) = send(&app, "GET", &uri, Some(&cookie), None).await;
        assert_eq!(clicks(&body), 1, "unrelated affiliate falls back to self");

        let uri = format!("/api/metrics/dashboard?affiliate_id={}", b.id);
        let (_, _, body) = send(&app, "GET", &uri, Some(&cookie), None).await;
        assert_eq!(clicks(&body), 10);

        let (_, _, body) = send(&app, "GET", "/api/metrics/affiliates", Some(&cookie), None).await;
        assert_eq!(body.as_array().unwrap().len(), 2);

        let admin = seed_admin(&state).await;
        let admin_cookie = cookie_for(&state, &admin);
        let (_, _, body) = send(&app, "GET", "/api/metrics/dashboard?affiliate_id=all", Some(&admin_cookie), None).await;
        assert_eq!(clicks(&body), 111);

        let (_, _, body) = send(&app, "GET", "/api/metrics/top-campaigns?limit=0", Some(&admin_cookie), None).await;
        assert_eq!(body.as_array().unwrap().len(), 1, "limit is clamped to at least 1");

        let (_, _, body) = send(&app, "GET", "/api/links", Some(&cookie), None).await;
        assert_eq!(body.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_metric_date_range_validation() {
        let (app, state) = test_app().await;
        let ann = seed_affiliate(&state.db, "Ann", None).await;
        let cookie = cookie_for(&state, &ann);

        let (status, _, _) = send(
            &app,
            "GET",
            "/api/metrics/time-series?start_date=2024-02-01&end_date=2024-01-01",
            Some(&cookie),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, _) = send(
            &app,
            "GET",
            "/api/metrics/time-series?start_date=yesterday",
            Some(&cookie),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, body) = send(
            &app,
            "GET",
            "/api/metrics/time-series?start_date=&end_date=2024-01-01",
            Some(&cookie),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_signup_review_flow() {
        let (app, state) = test_app().await;
        let admin = seed_admin(&state).await;
        let cookie = cookie_for(&state, &admin);
        let pending = User::create(
            &state.db,
            new_user("Pat", "pat@example.com", UserRole::Affiliate, UserStatus::Pending),
        )
        .await
        .unwrap();

        let (_, _, body) = send(&app, "GET", "/api/admin/requests", Some(&cookie), None).await;
        assert_eq!(body.as_array().unwrap().len(), 1);

        let uri = format!("/api/admin/requests/{}/approve", pending.id);
        let (status, _, body) = send(&app, "POST", &uri, Some(&cookie), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "active");

        let (_, _, body) = send(&app, "GET", "/api/admin/requests", Some(&cookie), None).await;
        assert!(body.as_array().unwrap().is_empty());

        let uri = format!("/api/admin/requests/{}/reject", admin.id);
        let (status, _, _) = send(&app, "POST", &uri, Some(&cookie), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, _) =
            send(&app, "POST", "/api/admin/requests/missing/approve", Some(&cookie), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let uri = format!("/api/admin/users/{}/status", pending.id);
        let (status, _, body) =
            send(&app, "PUT", &uri, Some(&cookie), Some(json!({ "status": "banned" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "banned");

        let uri = format!("/api/admin/users/{}/status", admin.id);
        let (status, _, _) =
            send(&app, "PUT", &uri, Some(&cookie), Some(json!({ "status": "banned" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_user_hierarchy_rules() {
        let (app, state) = test_app().await;
        let admin = seed_admin(&state).await;
        let cookie = cookie_for(&state, &admin);
        let parent = seed_affiliate(&state.db, "Parent", None).await;
        let child = seed_affiliate(&state.db, "Child", Some(&parent.id)).await;
        let other = seed_affiliate(&state.db, "Other", None).await;

        let update = |id: &str| format!("/api/admin/users/{}", id);

        // Own parent
        let (status, _, _) = send(&app, "PUT", &update(&other.id), Some(&cookie), Some(json!({ "parent_id": other.id }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        // Parent that is itself a sub-account
        let (status, _, _) = send(&app, "PUT", &update(&other.id), Some(&cookie), Some(json!({ "parent_id": child.id }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        // A user with children cannot get a parent
        let (status, _, _) = send(&app, "PUT", &update(&parent.id), Some(&cookie), Some(json!({ "parent_id": other.id }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        // Admin as parent
        let (status, _, _) = send(&app, "PUT", &update(&other.id), Some(&cookie), Some(json!({ "parent_id": admin.id }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, body) = send(&app, "PUT", &update(&other.id), Some(&cookie), Some(json!({ "parent_id": parent.id }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["parent_id"], parent.id);

        let (status, _, body) = send(&app, "PUT", &update(&child.id), Some(&cookie), Some(json!({ "parent_id": null, "company": "Acme" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["parent_id"], Value::Null);
        assert_eq!(body["company"], "Acme");

        let (status, _, _) = send(&app, "PUT", &update(&child.id), Some(&cookie), Some(json!({ "email": "parent@example.com" }))).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let uri = format!("/api/admin/affiliates/{}", parent.id);
        let (status, _, body) = send(&app, "GET", &uri, Some(&cookie), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["affiliate"]["id"], parent.id);
        assert_eq!(body["sub_accounts"].as_array().unwrap().len(), 1);
        assert_eq!(body["sub_accounts"][0]["id"], other.id);
    }

    #[tokio::test]
    async fn test_create_and_delete_user() {
        let (app, state) = test_app().await;
        let admin = seed_admin(&state).await;
        let cookie = cookie_for(&state, &admin);
        let campaign = seed_campaign(&state.db, "Casino").await;

        let (status, _, created) = send(
            &app,
            "POST",
            "/api/admin/users",
            Some(&cookie),
            Some(json!({ "name": "Zed", "email": "zed@example.com", "password": "password123" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["status"], "active");
        assert_eq!(created["role"], "affiliate");
        let zed_id = created["id"].as_str().unwrap().to_string();

        let (status, _, _) = send(
            &app,
            "POST",
            "/api/admin/users",
            Some(&cookie),
            Some(json!({ "name": "Zed 2", "email": "ZED@example.com", "password": "password123" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let child = seed_affiliate(&state.db, "Kid", Some(&zed_id)).await;
        let (status, _, _) = send(
            &app,
            "POST",
            "/api/admin/metrics",
            Some(&cookie),
            Some(json!({ "user_id": zed_id, "campaign_id": campaign.id, "date": "2024-01-01", "clicks": 5 })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, _, _) = send(&app, "DELETE", &format!("/api/admin/users/{}", admin.id), Some(&cookie), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, body) = send(&app, "DELETE", &format!("/api/admin/users/{}", zed_id), Some(&cookie), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(body, Value::Null);

        assert_eq!(TrackingLink::count(&state.db).await.unwrap(), 0);
        let child = User::find_by_id(&state.db, &child.id).await.unwrap().unwrap();
        assert_eq!(child.parent_id, None);

        let (status, _, _) = send(&app, "DELETE", &format!("/api/admin/users/{}", zed_id), Some(&cookie), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_metric_crud_and_duplicates() {
        let (app, state) = test_app().await;
        let admin = seed_admin(&state).await;
        let cookie = cookie_for(&state, &admin);
        let ann = seed_affiliate(&state.db, "Ann", None).await;
        let campaign = seed_campaign(&state.db, "Casino").await;

        let (status, _, link) = send(
            &app,
            "POST",
            "/api/admin/links",
            Some(&cookie),
            Some(json!({ "user_id": ann.id, "campaign_id": campaign.id, "url": "https://casino.test", "tracking_code": "ann-casino" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let link_id = link["id"].as_str().unwrap().to_string();

        let (status, _, _) = send(
            &app,
            "POST",
            "/api/admin/links",
            Some(&cookie),
            Some(json!({ "user_id": ann.id, "campaign_id": campaign.id, "url": "", "tracking_code": "ann-casino" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let payload = json!({ "link_id": link_id, "date": "2024-01-01", "registrations": 4, "ftds": 1 });
        let (status, _, metric) =
            send(&app, "POST", "/api/admin/metrics", Some(&cookie), Some(payload.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(metric["user_id"], ann.id);

        let (status, _, body) =
            send(&app, "POST", "/api/admin/metrics", Some(&cookie), Some(payload)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(
            body["error"]["message"],
            "Metrics for this date already exist for this link"
        );

        // By user/campaign pair the existing link is reused
        let (status, _, second) = send(
            &app,
            "POST",
            "/api/admin/metrics",
            Some(&cookie),
            Some(json!({ "user_id": ann.id, "campaign_id": campaign.id, "date": "2024-01-02", "clicks": 7 })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(second["link_id"], link_id);

        let uri = format!("/api/admin/metrics/{}", second["id"].as_str().unwrap());
        let (status, _, _) =
            send(&app, "PUT", &uri, Some(&cookie), Some(json!({ "date": "2024-01-01" }))).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _, updated) =
            send(&app, "PUT", &uri, Some(&cookie), Some(json!({ "clicks": 9, "commission_rev": 2.5 }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["clicks"], 9);
        assert_eq!(updated["commission_rev"], 2.5);

        let (status, _, _) =
            send(&app, "PUT", &uri, Some(&cookie), Some(json!({ "ftds": -1 }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, _, page) = send(&app, "GET", "/api/admin/metrics?per_page=1", Some(&cookie), None).await;
        assert_eq!(page["total"], 2);
        assert_eq!(page["items"].as_array().unwrap().len(), 1);
        assert_eq!(page["items"][0]["tracking_code"], "ann-casino");

        let (status, _, _) = send(&app, "DELETE", &uri, Some(&cookie), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _, _) = send(&app, "DELETE", &uri, Some(&cookie), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_bulk_upsert_validation_and_counts() {
        let (app, state) = test_app().await;
        let admin = seed_admin(&state).await;
        let cookie = cookie_for(&state, &admin);
        let ann = seed_affiliate(&state.db, "Ann", None).await;
        let campaign = seed_campaign(&state.db, "Casino").await;

        let (status, _, body) = send(
            &app,
            "POST",
            "/api/admin/metrics/bulk",
            Some(&cookie),
            Some(json!({ "entries": [
                { "user_id": ann.id, "campaign_id": campaign.id, "date": "2024-01-01", "clicks": 1 },
                { "user_id": ann.id, "campaign_id": campaign.id, "date": "2024-13-01", "clicks": 1 }
            ]})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"]["details"].get("entries[1].date").is_some());
        assert_eq!(TrackingLink::count(&state.db).await.unwrap(), 0);

        let entries = json!({ "entries": [
            { "user_id": ann.id, "campaign_id": campaign.id, "date": "2024-01-01", "clicks": 1 },
            { "user_id": ann.id, "campaign_id": campaign.id, "date": "2024-01-02", "clicks": 2 }
        ]});
        let (status, _, body) =
            send(&app, "POST", "/api/admin/metrics/bulk", Some(&cookie), Some(entries.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "created": 2, "updated": 0 }));

        let (_, _, body) =
            send(&app, "POST", "/api/admin/metrics/bulk", Some(&cookie), Some(entries)).await;
        assert_eq!(body, json!({ "created": 0, "updated": 2 }));

        let (status, _, _) = send(
            &app,
            "POST",
            "/api/admin/metrics/bulk",
            Some(&cookie),
            Some(json!({ "entries": [] })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_campaigns_and_stats() {
        let (app, state) = test_app().await;
        let admin = seed_admin(&state).await;
        let cookie = cookie_for(&state, &admin);
        let ann = seed_affiliate(&state.db, "Ann", None).await;

        let (status, _, campaign) = send(
            &app,
            "POST",
            "/api/admin/campaigns",
            Some(&cookie),
            Some(json!({ "name": "Summer Casino" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(campaign["slug"], "summer-casino");

        let (status, _, _) = send(
            &app,
            "POST",
            "/api/admin/campaigns",
            Some(&cookie),
            Some(json!({ "name": "Summer Casino!" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _, body) =
            send(&app, "GET", "/api/campaigns", Some(&cookie_for(&state, &ann)), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);

        let (status, _, stats) = send(&app, "GET", "/api/admin/stats", Some(&cookie), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stats["affiliates"]["active"], 1);
        assert_eq!(stats["affiliates"]["pending"], 0);
        assert_eq!(stats["total_affiliates"], 1);
        assert_eq!(stats["campaigns"], 1);
        assert_eq!(stats["metrics"]["clicks"], 0);

        let (status, _, perf) = send(&app, "GET", "/api/admin/performance", Some(&cookie), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(perf[0]["user_id"], ann.id);
        assert_eq!(perf[0]["total_commission"], 0.0);
    }

    #[tokio::test]
    async fn test_metric_dates_must_be_canonical() {
        let (app, state) = test_app().await;
        let admin = seed_admin(&state).await;
        let cookie = cookie_for(&state, &admin);
        let ann = seed_affiliate(&state.db, "Ann", None).await;
        let campaign = seed_campaign(&state.db, "Casino").await;

        let entry = |date: &str| json!({ "user_id": ann.id, "campaign_id": campaign.id, "date": date, "clicks": 3 });

        let (status, _, _) =
            send(&app, "POST", "/api/admin/metrics", Some(&cookie), Some(entry("2024-01-05"))).await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, _, body) =
            send(&app, "POST", "/api/admin/metrics", Some(&cookie), Some(entry("2024-01- 5"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"]["details"].get("date").is_some());

        let (status, _, body) = send(
            &app,
            "POST",
            "/api/admin/metrics/bulk",
            Some(&cookie),
            Some(json!({ "entries": [entry("2024- 1-05")] })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"]["details"].get("entries[0].date").is_some());

        let (_, _, page) = send(&app, "GET", "/api/admin/metrics", Some(&cookie), None).await;
        assert_eq!(page["total"], 1);
        assert_eq!(page["items"][0]["date"], "2024-01-05");
    }

    #[tokio::test]
    async fn test_role_change_requires_detached_affiliate() {
        let (app, state) = test_app().await;
        let admin = seed_admin(&state).await;
        let cookie = cookie_for(&state, &admin);
        let parent = seed_affiliate(&state.db, "Parent", None).await;
        let child = seed_affiliate(&state.db, "Child", Some(&parent.id)).await;
        let linked = seed_affiliate(&state.db, "Linked", None).await;
        let plain = seed_affiliate(&state.db, "Plain", None).await;
        let campaign = seed_campaign(&state.db, "Casino").await;
        TrackingLink::create(&state.db, &linked.id, &campaign.id, "", Some("linked-casino"))
            .await
            .unwrap();

        let promote = json!({ "role": "admin" });
        let update = |id: &str| format!("/api/admin/users/{}", id);

        let (status, _, body) =
            send(&app, "PUT", &update(&parent.id), Some(&cookie), Some(promote.clone())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"]["details"].get("role").is_some());
        let parent = User::find_by_id(&state.db, &parent.id).await.unwrap().unwrap();
        assert_eq!(parent.role_enum(), UserRole::Affiliate);
        let child = User::find_by_id(&state.db, &child.id).await.unwrap().unwrap();
        assert_eq!(child.parent_id.as_deref(), Some(parent.id.as_str()));

        let (status, _, _) =
            send(&app, "PUT", &update(&linked.id), Some(&cookie), Some(promote.clone())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, body) =
            send(&app, "PUT", &update(&plain.id), Some(&cookie), Some(promote)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["role"], "admin");
    }

    #[tokio::test]
    async fn test_undecodable_requests_use_error_envelope() {
        let (app, state) = test_app().await;
        let admin = seed_admin(&state).await;
        let cookie = cookie_for(&state, &admin);

        let (status, _, body) = send(
            &app,
            "POST",
            "/api/auth/register",
            None,
            Some(json!({ "name": "Ann", "email": "ann@example.com" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "validation_error");
        assert!(body["error"]["details"].get("password").is_some());

        let (status, _, body) = send(
            &app,
            "POST",
            "/api/auth/register",
            None,
            Some(json!({ "name": "Ann", "email": "ann@example.com", "password": 12345678 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "validation_error");

        let request = Request::builder()
            .method("POST")
            .uri("/api/auth/login")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{\"email\":"))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["code"], "bad_request");

        let (status, _, body) =
            send(&app, "GET", "/api/admin/metrics?page=abc", Some(&cookie), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"]["details"].get("query").is_some());
    }

    #[tokio::test]
    async fn test_metric_list_far_page() {
        let (app, state) = test_app().await;
        let admin = seed_admin(&state).await;
        let cookie = cookie_for(&state, &admin);

        let uri = format!("/api/admin/metrics?page={}", i64::MAX);
        let (status, _, body) = send(&app, "GET", &uri, Some(&cookie), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["items"].as_array().unwrap().len(), 0);
        assert_eq!(body["page"], i64::MAX);
    }
}

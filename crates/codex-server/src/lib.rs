//! CodeXAlpha server library logic.

pub mod api;
pub mod api_admin;
pub mod api_auth;
pub mod api_codex;
pub mod api_export;
pub mod api_lightathon;
pub mod api_runs;
pub mod api_share;
pub mod background;
pub mod config;
pub mod middleware;
pub mod notify;
pub mod settings;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, patch, post, put},
    Extension, Json, Router,
};
use codex_db::DbPool;
use codex_generation::Generator;
use codex_types::{AppPolicy, Branding};
use middleware::RateLimiter;
use notify::Mailer;
use serde_json::{json, Value};
use std::sync::{Arc, RwLock};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: DbPool,
    /// Active tunables, replaced by `PUT /api/admin/policy`.
    ///
    /// Uses `std::sync::RwLock`: guards are only held to clone or swap the
    /// value, never across an `.await`.
    pub policy: Arc<RwLock<AppPolicy>>,
    /// White-label settings, replaced by `PUT /api/admin/branding`.
    pub branding: Arc<RwLock<Branding>>,
    /// Codex generator. Shares `policy` with this state.
    pub generator: Generator,
    /// Rate limiter state.
    pub rate_limiter: RateLimiter,
    /// Outbound email.
    pub mailer: Mailer,
    /// HMAC key for share access grants.
    pub share_secret: Arc<Vec<u8>>,
    /// The public URL of the web app, used in links.
    pub public_url: String,
    /// Session lifetime in hours.
    pub session_ttl_hours: u32,
    /// PBKDF2 rounds for new account passwords.
    pub password_iterations: u32,
    /// Directory holding the built web client.
    pub client_dir: String,
}

impl AppState {
    /// A copy of the active policy.
    pub fn policy_snapshot(&self) -> AppPolicy {
        match self.policy.read() {
            Ok(policy) => policy.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// A copy of the active branding.
    pub fn branding_snapshot(&self) -> Branding {
        match self.branding.read() {
            Ok(branding) => branding.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

/// Maximum request body size (1 MiB). Transcripts are the largest payloads.
const MAX_REQUEST_BODY_BYTES: usize = 1024 * 1024;

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    // Layers run bottom-up: auth first, so the rate limiter can key on the
    // account, then the admin check.
    let admin_routes = Router::new()
        .route("/api/admin/users", get(api_admin::list_users_handler))
        .route(
            "/api/admin/users/{id}",
            patch(api_admin::update_user_handler),
        )
        .route(
            "/api/admin/policy",
            get(api_admin::get_policy_handler).put(api_admin::update_policy_handler),
        )
        .route("/api/admin/branding", put(api_admin::update_branding_handler))
        .route(
            "/api/admin/templates",
            get(api_admin::list_all_templates_handler),
        )
        .route(
            "/api/admin/templates/{id}",
            put(api_admin::update_template_handler),
        )
        .route("/api/admin/runs", get(api_admin::list_all_runs_handler))
        .route(
            "/api/admin/analytics/summary",
            get(api_admin::analytics_summary_handler),
        )
        .route(
            "/api/admin/analytics/events",
            get(api_admin::analytics_events_handler),
        )
        .layer(axum::middleware::from_fn(middleware::admin_middleware))
        .layer(axum::middleware::from_fn(middleware::rate_limit_middleware))
        .layer(axum::middleware::from_fn(middleware::auth_middleware));

    let protected_routes = Router::new()
        .route("/api/auth/logout", post(api_auth::logout_handler))
        .route(
            "/api/me",
            get(api_auth::get_me_handler).patch(api_auth::update_me_handler),
        )
        .route("/api/templates", get(api_runs::list_templates_handler))
        .route(
            "/api/runs",
            post(api_runs::create_run_handler).get(api_runs::list_runs_handler),
        )
        .route(
            "/api/runs/{id}",
            get(api_runs::get_run_handler).delete(api_runs::delete_run_handler),
        )
        .route("/api/runs/{id}/events", get(api_runs::run_events_handler))
        .route("/api/codexes/{id}", get(api_codex::get_codex_handler))
        .route(
            "/api/codexes/{id}/retry",
            post(api_codex::retry_codex_handler),
        )
        .route(
            "/api/codexes/{id}/pdf",
            get(api_export::export_codex_handler),
        )
        .route(
            "/api/sections/{id}/regenerate",
            post(api_codex::regenerate_section_handler),
        )
        .route(
            "/api/codexes/{id}/share-links",
            post(api_share::create_share_link_handler).get(api_share::list_share_links_handler),
        )
        .route(
            "/api/share-links/{id}",
            delete(api_share::revoke_share_link_handler),
        )
        .route(
            "/api/share-links/{id}/email",
            post(api_share::email_share_link_handler),
        )
        .route(
            "/api/lightathon/enrollments",
            post(api_lightathon::enroll_handler),
        )
        .route(
            "/api/lightathon/enrollments/current",
            get(api_lightathon::current_enrollment_handler),
        )
        .route(
            "/api/lightathon/enrollments/{id}/missions/{day}/complete",
            post(api_lightathon::complete_mission_handler),
        )
        .route(
            "/api/lightathon/enrollments/{id}/abandon",
            post(api_lightathon::abandon_handler),
        )
        .route(
            "/api/lightathon/leaderboard",
            get(api_lightathon::leaderboard_handler),
        )
        .layer(axum::middleware::from_fn(middleware::rate_limit_middleware))
        .layer(axum::middleware::from_fn(middleware::auth_middleware));

    let public_routes = Router::new()
        .route("/api/auth/signup", post(api_auth::signup_handler))
        .route("/api/auth/login", post(api_auth::login_handler))
        .route("/api/branding", get(api_admin::get_branding_handler))
        .route("/api/shared/{token}", get(api_share::get_shared_handler))
        .route(
            "/api/shared/{token}/unlock",
            post(api_share::unlock_shared_handler),
        )
        .route(
            "/api/shared/{token}/pdf",
            get(api_export::export_shared_handler),
        )
        .layer(axum::middleware::from_fn(middleware::rate_limit_middleware));

    let router = Router::new()
        .route("/health", get(health))
        .merge(public_routes)
        .merge(protected_routes)
        .merge(admin_routes);

    // Serve the web client if it has been built.
    let client_dir = state.client_dir.clone();
    let router = if std::path::Path::new(&client_dir).join("index.html").exists() {
        tracing::info!(path = %client_dir, "serving client static files");
        let index = format!("{}/index.html", client_dir);
        router.fallback_service(ServeDir::new(&client_dir).fallback(ServeFile::new(index)))
    } else {
        tracing::info!(path = %client_dir, "client directory not found, skipping static file serving");
        router
    };

    router
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}

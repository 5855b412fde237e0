use crate::api::ApiError;
use crate::AppState;
use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use codex_identity::{user_for_session, User};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// The signed-in account, stored in request extensions by
/// [`auth_middleware`].
#[derive(Clone, Debug)]
pub struct UserContext {
    pub user: User,
    /// The raw bearer token, kept so logout can revoke it.
    pub session_token: String,
}

fn bearer_token(req: &Request<Body>) -> Option<String> {
    let value = req.headers().get(axum::http::header::AUTHORIZATION)?;
    let value = value.to_str().ok()?;
    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

fn app_state(req: &Request<Body>) -> Result<Arc<AppState>, ApiError> {
    req.extensions()
        .get::<Arc<AppState>>()
        .cloned()
        .ok_or_else(|| ApiError::InternalServerError("application state missing".to_string()))
}

/// Middleware to authenticate requests via `Authorization: Bearer <session token>`.
pub async fn auth_middleware(mut req: Request<Body>, next: Next) -> Result<Response, ApiError> {
    let token = bearer_token(&req)
        .ok_or_else(|| ApiError::Unauthorized("missing bearer token".to_string()))?;
    let state = app_state(&req)?;

    let lookup_token = token.clone();
    let user = crate::api::with_conn(&state, move |conn| {
        // Unknown, expired and deactivated sessions all look the same to the caller.
        user_for_session(conn, &lookup_token).map_err(|e| match e {
            codex_identity::IdentityError::Database(db) => ApiError::from(db),
            _ => ApiError::Unauthorized("session is invalid or expired".to_string()),
        })
    })
    .await?;

    req.extensions_mut().insert(UserContext {
        user,
        session_token: token,
    });

    Ok(next.run(req).await)
}

/// Rejects non-admin accounts. Must run after [`auth_middleware`].
pub async fn admin_middleware(req: Request<Body>, next: Next) -> Result<Response, ApiError> {
    let is_admin = req
        .extensions()
        .get::<UserContext>()
        .map(|ctx| ctx.user.is_admin())
        .ok_or_else(|| ApiError::Unauthorized("authentication required".to_string()))?;
    if !is_admin {
        return Err(ApiError::Forbidden("admin role required".to_string()));
    }
    Ok(next.run(req).await)
}

/// Which policy limit a request counts against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteClass {
    /// Sign-up and login.
    Auth,
    /// Share link password unlocks.
    Unlock,
    Default,
}

impl RouteClass {
    pub fn for_path(path: &str) -> Self {
        if path == "/api/auth/signup" || path == "/api/auth/login" {
            Self::Auth
        } else if path.starts_with("/api/shared/") && path.ends_with("/unlock") {
            Self::Unlock
        } else {
            Self::Default
        }
    }
}

/// Rate limiting key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RateLimitKey {
    /// Rate limit by IP address.
    Ip(IpAddr, RouteClass),
    /// Rate limit by signed-in account.
    User(String, RouteClass),
}

/// In-memory rate limiter state.
///
/// Uses a simple fixed window counter.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    state: Arc<Mutex<HashMap<RateLimitKey, (u32, Instant)>>>,
}

const WINDOW: Duration = Duration::from_secs(60);

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Check if the request is allowed.
    ///
    /// Returns `true` if allowed, `false` if limit exceeded.
    pub fn check(&self, key: RateLimitKey, limit: u32) -> bool {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("rate limiter lock poisoned, recovering with stale state");
                poisoned.into_inner()
            }
        };
        let now = Instant::now();

        // Evict only expired windows so active limits survive the cleanup.
        if state.len() > 10000 {
            state.retain(|_, (_, start)| now.duration_since(*start) <= WINDOW);
        }

        let (count, start) = state.entry(key).or_insert((0, now));

        if now.duration_since(*start) > WINDOW {
            *count = 1;
            *start = now;
            true
        } else {
            *count += 1;
            *count <= limit
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Rate limiting middleware.
///
/// Keys on the signed-in account when [`auth_middleware`] ran first,
/// otherwise on the client IP.
pub async fn rate_limit_middleware(req: Request<Body>, next: Next) -> Result<Response, StatusCode> {
    let state = req
        .extensions()
        .get::<Arc<AppState>>()
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?
        .clone();

    let class = RouteClass::for_path(req.uri().path());
    let key = if let Some(ctx) = req.extensions().get::<UserContext>() {
        RateLimitKey::User(ctx.user.id.clone(), class)
    } else if let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        RateLimitKey::Ip(addr.ip(), class)
    } else {
        // Without ConnectInfo every client would share one bucket.
        tracing::error!("rate limiter has no client address; serve with connect info");
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    };

    let limit = {
        let policy = match state.policy.read() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::error!("app policy lock poisoned");
                return Err(StatusCode::INTERNAL_SERVER_ERROR);
            }
        };
        match class {
            RouteClass::Auth => policy.rate_limit.auth_limit,
            RouteClass::Unlock => policy.rate_limit.unlock_limit,
            RouteClass::Default => policy.rate_limit.default_limit,
        }
    };

    if !state.rate_limiter.check(key, limit) {
        return Ok(ApiError::TooManyRequests("rate limit exceeded".to_string()).into_response());
    }

    Ok(next.run(req).await)
}

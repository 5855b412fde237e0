//! CodeXAlpha server binary.
//!
//! Starts an axum HTTP server with structured logging, database
//! initialization, background generation, and graceful shutdown on
//! SIGTERM/SIGINT.

use codex_generation::{Generator, PromptOptions};
use codex_server::notify::Mailer;
use codex_server::{app, background, config, settings, AppState};
use std::error::Error;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("CODEX_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    let config = config::load_config(selected_config_path)
        .map_err(|e| format!("failed to load configuration: {}", e))?;

    // Initialize tracing
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    // Initialize database
    let pool = codex_db::create_pool(
        &config.database.path,
        codex_db::DbRuntimeSettings {
            busy_timeout_ms: config.database.busy_timeout_ms,
            pool_max_size: config.database.pool_max_size,
        },
    )
    .map_err(|e| format!("failed to create database pool, check database.path: {}", e))?;

    let (policy, branding) = {
        let conn = pool.get()?;
        let applied = codex_db::run_migrations(&conn)?;
        if applied > 0 {
            tracing::info!(count = applied, "applied database migrations");
        }
        (settings::load_policy(&conn)?, settings::load_branding(&conn)?)
    };

    let provider = codex_ai::build_provider(&config.ai)?;
    tracing::info!(provider = provider.name(), model = %config.ai.model, "ai provider ready");

    let policy = Arc::new(RwLock::new(policy));
    let generator = Generator::new(
        pool.clone(),
        provider,
        policy.clone(),
        PromptOptions::from(&config.ai),
    );

    let mailer = Mailer::new(&config.email)?;
    if !mailer.is_enabled() {
        tracing::warn!("email.resend_api_key is empty, notification emails are disabled");
    }

    let share_secret = if config.share.access_secret.is_empty() {
        tracing::warn!(
            "share.access_secret is empty, using a random key; share access grants will not survive a restart"
        );
        codex_identity::random_token().into_bytes()
    } else {
        config.share.access_secret.clone().into_bytes()
    };

    let state = AppState {
        pool,
        policy,
        branding: Arc::new(RwLock::new(branding)),
        generator,
        rate_limiter: codex_server::middleware::RateLimiter::new(),
        mailer,
        share_secret: Arc::new(share_secret),
        public_url: config.server.public_url.clone(),
        session_ttl_hours: config.auth.session_ttl_hours,
        password_iterations: config.auth.password_iterations,
        client_dir: config.server.client_dir.clone(),
    };

    let shared = Arc::new(state.clone());
    background::resume_generation(shared.clone()).await;
    tokio::spawn(background::start_recovery_task(shared.clone()));
    tokio::spawn(background::start_pruning_task(shared));

    let app = app(state);
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(%addr, "starting codex server");

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| format!("failed to bind to {}: {}", addr, e))?;

    // Serve with graceful shutdown
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("codex server shut down");
    Ok(())
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}

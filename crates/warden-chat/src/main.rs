//! Guarded chat server
//!
//! Thin HTTP front-end over the warden-guard pipeline:
//! - `POST /chat`   one mediated chat turn
//! - `GET /health`  scanner counts and generator readiness

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use warden_guard::generator::LlamaServerGenerator;
use warden_guard::rate_limit::SessionRateLimiter;
use warden_guard::runner::ScannerRegistry;
use warden_guard::{ChatRequest, Pipeline, WardenConfig};

/// Default llama.cpp server URL
const DEFAULT_GENERATOR_URL: &str = "http://localhost:8080";

/// How often idle vault sessions are swept
const VAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

const INTERNAL_ERROR_REPLY: &str = "An internal error occurred. Please try again.";

const RATE_LIMITED_REPLY: &str = "Too many requests. Please slow down.";

/// Chat server arguments
#[derive(Parser, Debug)]
#[command(name = "warden-chat")]
#[command(about = "Chat over a local LLM with input and output scanning")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "5000")]
    port: u16,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// TOML configuration file; built-in defaults when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Base URL of the completion server
    #[arg(long, default_value = DEFAULT_GENERATOR_URL)]
    generator_url: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Request/Response Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    session_id: Option<String>,
}

impl ChatBody {
    /// Requests without a session get a private one-off session, so their
    /// placeholders can never be resolved by another client
    fn session_id(&self) -> String {
        match self.session_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => Uuid::new_v4().to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatReply {
    response: String,
    blocked: bool,
    sanitized: bool,
}

impl ChatReply {
    /// Fixed reply that reveals nothing about the pipeline
    fn generic(message: &str) -> Self {
        Self {
            response: message.to_string(),
            blocked: false,
            sanitized: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: String,
    scanners: ScannerCounts,
    generator_ready: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ScannerCounts {
    input: usize,
    output: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
struct AppState {
    pipeline: Arc<Pipeline>,
    limiter: Arc<SessionRateLimiter>,
}

async fn chat_handler(
    State(state): State<AppState>,
    Json(body): Json<ChatBody>,
) -> (StatusCode, Json<ChatReply>) {
    let session_id = body.session_id();
    if let Err(e) = state.limiter.check(&session_id).await {
        warn!(session_id = %session_id, error = %e, "Rate limited");
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(ChatReply::generic(RATE_LIMITED_REPLY)),
        );
    }

    match state
        .pipeline
        .process(ChatRequest::new(body.message, session_id.clone()))
        .await
    {
        Ok(outcome) => {
            info!(
                session_id = %session_id,
                blocked = outcome.was_blocked,
                sanitized = outcome.was_sanitized,
                "Chat turn complete"
            );
            (
                StatusCode::OK,
                Json(ChatReply {
                    response: outcome.text,
                    blocked: outcome.was_blocked,
                    sanitized: outcome.was_sanitized,
                }),
            )
        }
        Err(e) => {
            error!(session_id = %session_id, error = %e, "Chat turn failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ChatReply::generic(INTERNAL_ERROR_REPLY)),
            )
        }
    }
}

async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let health = state.pipeline.health().await;
    let (code, status) = if health.is_ready() {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
    };

    (
        code,
        Json(HealthResponse {
            status: status.to_string(),
            scanners: ScannerCounts {
                input: health.input_scanners,
                output: health.output_scanners,
            },
            generator_ready: health.generator_ready,
        }),
    )
}

fn app(state: AppState) -> Router {
    Router::new()
        .route("/chat", post(chat_handler))
        .route("/health", get(health_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn load_config(path: Option<&PathBuf>) -> warden_guard::Result<WardenConfig> {
    match path {
        Some(path) => WardenConfig::load(path),
        None => Ok(WardenConfig::default()),
    }
}

/// Periodically drop vault sessions that have gone idle
fn spawn_vault_sweeper(pipeline: Arc<Pipeline>) {
    tokio::spawn(async move {
        let mut ticks = tokio::time::interval(VAULT_SWEEP_INTERVAL);
        loop {
            ticks.tick().await;
            let evicted = pipeline.vault().evict_idle();
            debug!(evicted, sessions = pipeline.vault().session_count(), "Vault sweep");
        }
    });
}

/// Rebuild the pipeline configuration from disk on every SIGHUP
#[cfg(unix)]
fn spawn_reload_on_hangup(pipeline: Arc<Pipeline>, path: Option<PathBuf>) {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let mut hangups = match signal(SignalKind::hangup()) {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGHUP, reload disabled");
                return;
            }
        };

        while hangups.recv().await.is_some() {
            info!("SIGHUP received, reloading configuration");
            let reloaded = match load_config(path.as_ref()) {
                Ok(config) => pipeline.reload(config).await,
                Err(e) => Err(e),
            };
            if let Err(e) = reloaded {
                error!(error = %e, "Reload failed, keeping previous configuration");
            }
        }
    });
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let config = load_config(args.config.as_ref())?;

    ScannerRegistry::warm_up();

    let generator = LlamaServerGenerator::new(
        args.generator_url.clone(),
        Duration::from_millis(config.pipeline.request_timeout_ms),
    )?;
    let limiter = Arc::new(SessionRateLimiter::new(config.rate_limit.clone()));
    let pipeline = Arc::new(Pipeline::new(config, Arc::new(generator))?);

    spawn_vault_sweeper(pipeline.clone());
    #[cfg(unix)]
    spawn_reload_on_hangup(pipeline.clone(), args.config.clone());

    let health = pipeline.health().await;
    println!(
        r#"
╔══════════════════════════════════════════════════════════════════╗
║     Warden Chat (guarded local LLM)                              ║
╠══════════════════════════════════════════════════════════════════╣
  Listening:   http://{}:{}/chat
  Generator:   {} ({})
  Scanners:    {} input, {} output
╚══════════════════════════════════════════════════════════════════╝
"#,
        args.host,
        args.port,
        args.generator_url,
        if health.generator_ready { "ready" } else { "not reachable" },
        health.input_scanners,
        health.output_scanners,
    );

    let app = app(AppState { pipeline, limiter });

    let listener = tokio::net::TcpListener::bind(format!("{}:{}", args.host, args.port)).await?;
    info!(host = %args.host, port = args.port, "Server listening");

    axum::serve(listener, app).await?;

    Ok(())
}

mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::{HeaderMap, HeaderName, HeaderValue, Method, header},
    response::IntoResponse,
    routing::get,
};
use serde::Deserialize;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use waypoint_api::auth::{AppState, AppStateInner, Authenticator};
use waypoint_api::middleware::{DECLARED_USER_HEADER, token_from_headers};
use waypoint_db::Database;
use waypoint_gateway::{DeliveryEngine, Dispatcher, EngineSettings, Handshake, handle_connection};

use crate::config::Config;

/// Used when `RUST_LOG` is unset.
const DEFAULT_LOG_FILTER: &str =
    "waypoint=debug,waypoint_gateway=debug,waypoint_api=debug,waypoint_db=debug,tower_http=debug";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init database
    let db = Arc::new(Database::open(&config.db_path)?);

    // Shared state
    let engine = DeliveryEngine::new(
        db.clone(),
        Dispatcher::new(),
        EngineSettings {
            history_page: config.history_page,
            pending_digest: config.pending_digest,
        },
    );
    let authenticator = Authenticator::new(config.auth_url.as_deref(), config.auth_timeout)?;
    match &config.auth_url {
        Some(url) => info!("Validating tokens against {}", url),
        None => info!("No WAYPOINT_AUTH_URL set, trusting declared identities"),
    }

    let state: AppState = Arc::new(AppStateInner {
        db,
        engine,
        authenticator,
        public_user_inbox: config.public_user_inbox,
    });

    let socket_route = Router::new()
        .route("/socket", get(ws_upgrade))
        .with_state(state.clone());

    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .merge(waypoint_api::router(state))
        .merge(socket_route)
        .layer(cors_layer(&config.frontend_origins)?)
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Waypoint server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn cors_layer(origins: &[String]) -> anyhow::Result<CorsLayer> {
    let origins = origins
        .iter()
        .map(|o| o.parse::<HeaderValue>())
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static(DECLARED_USER_HEADER),
        ]))
}

#[derive(Debug, Deserialize)]
struct SocketQuery {
    token: Option<String>,
    username: Option<String>,
    #[serde(rename = "serverOffset")]
    server_offset: Option<i64>,
}

/// Resolves identity before the upgrade so the connection starts out either
/// identified or anonymous.
async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<SocketQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let token = token_from_headers(&headers).or(query.token);
    let identity = state
        .authenticator
        .resolve(token.as_deref(), query.username.as_deref())
        .await;

    let handshake = Handshake {
        identity,
        server_offset: query.server_offset,
    };
    let engine = state.engine.clone();
    ws.on_upgrade(move |socket| handle_connection(socket, engine, handshake))
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}

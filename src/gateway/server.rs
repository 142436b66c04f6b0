use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Router,
    extract::{State, ws::WebSocketUpgrade},
    middleware,
    response::Response,
    routing::get,
};
use tokio::sync::mpsc;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use super::api::{self, AppState, SharedState};
use super::auth;
use crate::config::GatewayConfig;
use crate::preview::{GitWatcher, debounce};

/// Capacity of the change-signal channel feeding the debouncer.
const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Options for `gantry serve` that are not part of the config file.
#[derive(Debug, Clone, Default)]
pub struct ServeOptions {
    /// Open the preview in a browser once listening.
    pub open: bool,
}

/// Build the full application router: API, live-reload socket and the
/// static preview tree.
pub fn build_router(state: SharedState) -> Router {
    let preview = ServeDir::new(state.publisher.layout().root());

    let api = api::api_router().route_layer(middleware::from_fn_with_state(
        state.clone(),
        auth::require_token,
    ));

    Router::new()
        .route("/health", get(api::health_check))
        .route("/ws", get(live_socket))
        .merge(api)
        .nest_service("/preview", preview)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn live_socket(ws: WebSocketUpgrade, State(state): State<SharedState>) -> Response {
    state.live.upgrade(ws)
}

/// Run the gateway until Ctrl-C or SIGTERM.
pub async fn start_server(config: GatewayConfig, options: ServeOptions) -> Result<()> {
    let state = Arc::new(AppState::from_config(&config));

    match state.publish_and_notify().await {
        Ok(publication) => tracing::info!(
            branch = %publication.branch,
            url = %publication.url,
            "initial publish complete"
        ),
        Err(e) => tracing::warn!(error = %e, "initial publish failed"),
    }

    let (change_tx, change_rx) = mpsc::channel::<()>(CHANGE_CHANNEL_CAPACITY);
    let mut watcher = GitWatcher::start(
        &state.workdir,
        config.poll_interval(),
        Arc::new(move || {
            // A full channel already guarantees a pending publish.
            let _ = change_tx.try_send(());
        }),
    );
    let publish_state = state.clone();
    let debouncer = tokio::spawn(debounce::run(change_rx, config.debounce(), move || {
        let state = publish_state.clone();
        async move {
            if let Err(e) = state.publish_and_notify().await {
                tracing::warn!(error = %e, "publish after branch change failed");
            }
        }
    }));

    let app = build_router(state.clone());
    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    let local_addr = listener.local_addr()?;

    let preview_url = state.publisher.layout().url(&state.publisher.resolve_branch(&state.workdir));
    tracing::info!(addr = %local_addr, workdir = %state.workdir.display(), "gateway listening");
    println!("Gantry running at http://{}", local_addr);
    println!("Preview: {}", preview_url);

    if options.open
        && let Err(e) = open::that(&preview_url)
    {
        tracing::warn!(error = %e, "failed to open browser");
    }

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error");

    state.supervisor.shutdown();
    watcher.close();
    if let Err(e) = debouncer.await {
        tracing::warn!(error = %e, "publish debouncer ended abnormally");
    }
    tracing::info!("gateway stopped");
    println!("Server shut down gracefully.");
    served
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown requested");
}

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::signal::ctrl_c;
#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};
use tower_http::trace::TraceLayer;
use tower_sessions::{MemoryStore, SessionManagerLayer};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

mod activities;
mod client;
mod config;
mod error;
mod forms;
mod models;
mod navigation;
mod page;
mod refresh;
mod remote;
mod routes;
mod session;


use client::{ClientRegistry, ClientSettings, RemoteFactory};
use config::Config;
use page::Pages;
use remote::{supabase::http_client, RemoteDataService, SupabaseClient, SupabaseEndpoint};

const DEFAULT_LOG_FILTER: &str = "activity_tracker=info,tower_http=info";

/// Shared by every handler. Browser-specific state lives in `clients`.
pub struct AppState {
    pub pages: Pages,
    pub clients: ClientRegistry,
}

#[tokio::main]
async fn main() {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    if let Err(e) = run().await {
        error!("{e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!("Loading config...");
    let config = Config::load()?;

    let http = http_client(config.request_timeout)?;
    let endpoint = SupabaseEndpoint::from_config(&config);
    info!(url = %endpoint.url, table = %endpoint.table, "Using backend");

    let factory: RemoteFactory = Arc::new(move || {
        Arc::new(SupabaseClient::new(http.clone(), endpoint.clone())) as Arc<dyn RemoteDataService>
    });

    let state = Arc::new(AppState {
        pages: Pages::new()?,
        clients: ClientRegistry::new(factory, ClientSettings::from(&config)),
    });

    spawn_pruner(state.clone(), config.client_idle_timeout);

    let address = format!("{}:{}", config.bind_addr, config.port);
    let listener = TcpListener::bind(&address).await?;
    info!("Server running on http://{address}");

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down");
    Ok(())
}

pub fn app(state: Arc<AppState>) -> Router {
    let sessions = SessionManagerLayer::new(MemoryStore::default()).with_secure(false);

    Router::new()
        .route("/", get(routes::home))
        .route("/health", get(routes::health_check))
        .route("/auth/login", get(routes::login_page).post(routes::login))
        .route("/auth/signup", get(routes::signup_page).post(routes::signup))
        .route("/auth/logout", post(routes::logout))
        .route("/activities", post(routes::add_activity))
        .route("/activities/:id", post(routes::update_activity))
        .route("/activities/:id/edit", get(routes::edit_activity))
        .route("/edit/close", post(routes::close_edit))
        .layer(sessions)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Periodically drops browser contexts nobody has used for `idle`.
fn spawn_pruner(state: Arc<AppState>, idle: Duration) {
    tokio::spawn(async move {
        let period = idle.clamp(Duration::from_secs(1), Duration::from_secs(60));
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let pruned = state.clients.prune(idle, Instant::now()).await;
            if pruned > 0 {
                info!(pruned, "Pruned idle client contexts");
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                error!("Failed to install signal handler: {e}");
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
}

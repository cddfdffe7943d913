use axum::{Router, routing::get};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod handlers;
mod panel_client;
mod singbox;

use config::SubConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warden_sub=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = SubConfig::load()?;
    tracing::info!("Subscription endpoint starting...");
    tracing::info!("Panel URL: {}", config.panel_url);
    if let Some(path) = &config.template_path {
        tracing::info!("Template: {}", path);
    }

    let state = AppState::new(config.clone())?;
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.listen_port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/sub/{uuid}/singbox", get(handlers::subscription::singbox_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Clone)]
pub struct AppState {
    pub config: SubConfig,
    pub panel_client: panel_client::PanelClient,
    pub template: Arc<Value>,
}

impl AppState {
    fn new(config: SubConfig) -> anyhow::Result<Self> {
        let template = Arc::new(config.load_template()?);
        let panel_client = panel_client::PanelClient::new(
            config.panel_url.clone(),
            config.auth_token.clone(),
        );

        Ok(Self {
            config,
            panel_client,
            template,
        })
    }
}

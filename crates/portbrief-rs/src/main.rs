mod adapters;
mod analyzer;
mod api;
mod config;
mod db;
mod freshness;
mod mail;
mod models;
mod normalizer;
mod parser;
mod pipeline;
mod render;
mod security;
mod store;
mod ui;

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
    body::Body,
    http::Request,
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, info_span};

use crate::{
    adapters::build_scanner,
    analyzer::build_analyzer,
    api::{create_scan, health},
    config::AppConfig,
    mail::SendmailMailer,
    pipeline::{PipelineDeps, PipelineSettings, ScanPipeline},
    render::WkhtmltopdfRenderer,
    store::{FsObjectStore, SqliteMetadataStore, StoreAvailability},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub pipeline: Arc<ScanPipeline>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let config = Arc::new(AppConfig::load()?);

    let pool = db::create_pool(&config.database_url)?;
    let objects = Arc::new(FsObjectStore::new(&config.object_store_root));
    let metadata = Arc::new(SqliteMetadataStore::new(pool));
    let availability = StoreAvailability::probe(objects.as_ref(), metadata.as_ref()).await;

    let deps = PipelineDeps {
        scanner: build_scanner(&config),
        analyzer: build_analyzer(&config).context("failed to build analyzer")?,
        objects,
        metadata,
        renderer: Arc::new(WkhtmltopdfRenderer::new(&config.wkhtmltopdf_path)),
        mailer: Arc::new(SendmailMailer::new(
            &config.sendmail_path,
            &config.email_from,
            &config.email_sender_name,
        )),
    };
    info!(
        scanner = deps.scanner.name(),
        analyzer = deps.analyzer.name(),
        stores_available = availability.is_available(),
        "pipeline configured"
    );

    let pipeline = ScanPipeline::new(
        deps,
        availability,
        PipelineSettings {
            freshness_window: config.freshness_window()?,
            fallback_dir: config.fallback_dir.clone(),
        },
    );

    let state = AppState {
        config: config.clone(),
        pipeline: Arc::new(pipeline),
    };
    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("invalid host/port")?;

    info!(%addr, "PortBrief listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

pub(crate) fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/scan", post(create_scan))
        .route("/", get(ui::index))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http().make_span_with(|req: &Request<Body>| {
                info_span!(
                    "request",
                    id = %uuid::Uuid::new_v4(),
                    method = %req.method(),
                    path = %req.uri().path(),
                )
            }),
        )
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();
}

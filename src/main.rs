use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::StatusCode;
use axum::{routing::get, Router};
use sentry_tower::{NewSentryLayer, SentryHttpLayer};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::AppConfig;

mod app_state;
mod config;
mod consts;
mod error;
mod middleware;
pub mod videogen;

use app_state::AppState;

async fn main_impl(conf: AppConfig) -> Result<()> {
    #[derive(OpenApi)]
    #[openapi(
        tags(
            (name = "VIDEOGEN", description = "Veo 3 video generation"),
        )
    )]
    struct ApiDoc;

    let addr = conf.socket_addr()?;
    let session_idle = conf.session_idle();
    let sweep_interval = conf.session_sweep_interval();
    let shared_state = Arc::new(AppState::new(conf)?);

    let shutdown = CancellationToken::new();
    tokio::spawn(videogen::session::run_session_expiry(
        shared_state.sessions.clone(),
        session_idle,
        sweep_interval,
        shutdown.clone(),
    ));

    let sentry_tower_layer = ServiceBuilder::new()
        .layer(NewSentryLayer::new_from_top())
        .layer(SentryHttpLayer::with_transaction());

    let router = OpenApiRouter::with_openapi(ApiDoc::openapi()).nest(
        "/api/v1/videogen",
        videogen::videogen_router(shared_state.clone()),
    );

    let (router, api) = router.split_for_parts();

    let router =
        router.merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", api.clone()));

    let http = Router::new()
        .route("/healthz", get(health_handler))
        .fallback_service(router)
        .layer(CorsLayer::permissive())
        .layer(sentry_tower_layer);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    log::info!("listening on {addr}");

    let served = axum::serve(listener, http).await;
    shutdown.cancel();
    served?;

    Ok(())
}

fn main() {
    let conf = match AppConfig::load() {
        Ok(conf) => conf,
        Err(e) => {
            eprintln!("Failed to load configuration: {e:#}");
            std::process::exit(1);
        }
    };

    // No DSN means events stay local
    let _guard = conf.sentry_dsn.as_deref().map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                traces_sample_rate: conf.sentry_traces_sample_rate,
                send_default_pii: false,
                attach_stacktrace: true,
                before_send: Some(crate::middleware::sentry_scrub::create_before_send()),
                ..Default::default()
            },
        ))
    });

    // Only errors become sentry events; warnings ride along as breadcrumbs
    let sentry_layer = sentry_tracing::layer().event_filter(|metadata| match *metadata.level() {
        tracing::Level::ERROR => sentry_tracing::EventFilter::Event,
        tracing::Level::WARN => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    });

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "{}=info,tower_http=warn,axum::rejection=warn,hyper=warn,reqwest=warn",
                    env!("CARGO_CRATE_NAME")
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_layer)
        .init();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!("Failed to start tokio runtime: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(main_impl(conf)) {
        tracing::error!("Server exited with error: {e:#}");
        std::process::exit(1);
    }
}

#[instrument]
async fn health_handler() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::{get, post},
};

use http::{HeaderValue, Method, header};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_cookies::CookieManagerLayer;
use tower_governor::governor::GovernorConfigBuilder;
use tower_http::{
    cors::CorsLayer,
    services::ServeDir,
    trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};

use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod db;
mod error;
mod state;
mod crypto {
    pub mod csrf;
}

mod models {
    pub mod job;
    pub mod principal;
    pub mod session;
    pub mod technician;
}

mod repositories {
    pub mod job;
    #[cfg(test)]
    pub mod memory;
    pub mod profile;
}

mod services {
    pub mod assignment;
    pub mod auth;
    pub mod identity;
    pub mod lifecycle;
    pub mod roles;
    pub mod session;
}

mod handlers {
    pub mod auth;
    pub mod jobs;
    pub mod portal;
    pub mod technicians;
}

mod middleware_layer {
    pub mod auth;
    pub mod csrf;
    pub mod rate_limit;
}

mod validation {
    pub mod request;
}

use config::Config;
use middleware_layer::auth::{home_path, login_path};
use models::principal::Role;
use state::AppState;

/// Login bodies and job payloads are small.
const BODY_LIMIT_BYTES: usize = 64 * 1024;

fn cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let origins = config
        .allowed_origins
        .iter()
        .map(|origin| {
            origin
                .parse::<HeaderValue>()
                .map_err(|e| anyhow::anyhow!("Invalid origin {origin}: {e}"))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::COOKIE,
            header::HeaderName::from_static("x-csrf-token"),
        ])
        .allow_credentials(true)
        .expose_headers([header::HeaderName::from_static("x-csrf-token")])
        .max_age(Duration::from_secs(86400)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    tracing::info!("✅ Configuration loaded successfully");

    let state = AppState::new(&config).await?;
    tracing::info!("✅ AppState initialized");

    let cors = cors_layer(&state.config)?;

    let api_governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(50)
            .burst_size(200)
            .use_headers()
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Invalid rate limiter configuration"))?,
    );

    let login_routes = Router::new()
        .route("/api/auth/login", post(handlers::auth::login))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware_layer::rate_limit::rate_limit_login,
        ))
        .with_state(state.clone());

    let api_routes = Router::new()
        .route("/api/auth/logout", post(handlers::auth::logout))
        .route(
            "/api/jobs",
            get(handlers::jobs::list_jobs).post(handlers::jobs::create_job),
        )
        .route("/api/jobs/{job_id}", get(handlers::jobs::get_job))
        .route("/api/jobs/{job_id}/assign", post(handlers::jobs::assign_job))
        .route(
            "/api/jobs/{job_id}/transition",
            post(handlers::jobs::transition_job),
        )
        .route(
            "/api/technicians",
            get(handlers::technicians::list_technicians),
        )
        .layer(tower_governor::GovernorLayer::new(api_governor_conf))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware_layer::csrf::verify_csrf,
        ))
        .with_state(state.clone());

    let mut portal_routes = Router::new();
    for role in Role::ALL {
        portal_routes = portal_routes
            .route(
                login_path(role),
                get(move || handlers::portal::login_page(role)),
            )
            .route(home_path(role), get(handlers::portal::dashboard));
    }
    let portal_routes = portal_routes.with_state(state.clone());

    let app = Router::new()
        .merge(login_routes)
        .merge(api_routes)
        .merge(portal_routes)
        .fallback_service(ServeDir::new("public"))
        .layer(from_fn_with_state(
            state.clone(),
            middleware_layer::auth::access_gateway,
        ))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default())
                .on_request(DefaultOnRequest::default().level(Level::DEBUG))
                .on_response(DefaultOnResponse::default().level(Level::DEBUG))
                .on_failure(DefaultOnFailure::default().level(Level::ERROR)),
        )
        .layer(CookieManagerLayer::new())
        .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES))
        .layer(cors);

    let addr = state.config.bind_addr;
    tracing::info!("🚀 Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

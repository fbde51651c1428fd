// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Blog API server
//!
//! ## Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! - `BIND_ADDR`: Server bind address (default: 0.0.0.0:8080)
//! - `THROTTLE_ANON_RATE` / `THROTTLE_USER_RATE`: Requests per window (default: 50)
//! - `THROTTLE_WINDOW_SECS`: Window length in seconds (default: 60)
//! - `PAGE_SIZE` / `MAX_PAGE_SIZE`: Pagination sizes (default: 10 / 100)
//! - `MEDIA_ROOT` / `MEDIA_URL`: Upload directory and URL prefix (default: media, /media/)
//! - `STORE_TIMEOUT_MS`: Resource store call budget (default: 5000)
//! - `REQUIRE_AUTH_FOR_WRITES`: Reject anonymous writes (default: false)
//! - `ALLOWED_ORIGINS`: Comma-separated CORS origins (default: none)

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use blog_api::{
    config::Config,
    handlers::{router, AppState},
    limiter::RateLimiter,
    media::MediaStore,
    metrics::Metrics,
    pipeline::Pipeline,
    store::ResourceStore,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let config = Config::from_env();
    info!(
        bind_addr = %config.bind_addr,
        anon_rate = config.throttle.anon_rate,
        user_rate = config.throttle.user_rate,
        window_secs = config.throttle.window_secs,
        page_size = config.pagination.page_size,
        media_root = %config.media.root.display(),
        "Starting blog API"
    );

    tokio::fs::create_dir_all(&config.media.root).await?;

    let pipeline = Pipeline::new(
        config.clone(),
        ResourceStore::in_memory(),
        RateLimiter::new(config.throttle.clone()),
        MediaStore::new(&config.media),
        Metrics::new()?,
    );
    let state = Arc::new(AppState {
        pipeline,
        config: config.clone(),
    });

    // Expired throttle windows are dropped periodically
    let cleanup_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(cleanup_state.config.throttle.cleanup_interval());
        loop {
            interval.tick().await;
            cleanup_state.pipeline.limiter().cleanup();
        }
    });

    let app = router(state);

    let addr: SocketAddr = config.bind_addr.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "Server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

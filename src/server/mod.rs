use crate::cache::{self, CacheSettings, ConversionCache};
use crate::config::Config;
use crate::conversion::{ConversionExecutor, Fetch, HostnameWhitelist, HttpFetcher};
use crate::scratch::ScratchDir;
use crate::tokens::{self, TokenStore};
use anyhow::{Context, Result};
use axum::{
    http::{header, Method},
    Router,
};
use gifforge_av::{FfmpegTranscoder, Transcode};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinHandle;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub mod auth;
pub mod error;
pub mod openapi;
pub mod routes_api;

/// Shared application context
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub tokens: Arc<TokenStore>,
    pub cache: ConversionCache,
    pub whitelist: Arc<HostnameWhitelist>,
    /// Background sweeps, aborted on shutdown
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl AppContext {
    /// Build the context with the HTTP fetcher and ffmpeg transcoder.
    pub fn new(config: Config) -> Result<Self> {
        let fetcher = HttpFetcher::new(Duration::from_secs(config.sources.fetch_timeout_secs))
            .context("Failed to create HTTP client")?;
        let transcoder = FfmpegTranscoder::discover(config.tools.ffmpeg_path.as_deref())
            .context("ffmpeg is required for conversions")?
            .with_timeout(Duration::from_secs(config.tools.transcode_timeout_secs));

        Self::with_collaborators(config, Arc::new(fetcher), Arc::new(transcoder))
    }

    /// Build the context around the given fetcher and transcoder.
    pub fn with_collaborators(
        config: Config,
        fetcher: Arc<dyn Fetch>,
        transcoder: Arc<dyn Transcode>,
    ) -> Result<Self> {
        let scratch_dir = config.cache.scratch_dir();
        let scratch = ScratchDir::create(&scratch_dir)
            .with_context(|| format!("Failed to create scratch directory {:?}", scratch_dir))?;

        let whitelist = Arc::new(HostnameWhitelist::new(&config.sources.hostname_whitelist));
        let executor = ConversionExecutor::new(
            Arc::clone(&whitelist),
            fetcher,
            transcoder,
            scratch,
            config.output.max_size,
        );
        let cache = ConversionCache::new(
            Arc::new(executor),
            CacheSettings::from_config(&config.cache),
        );
        let tokens = Arc::new(TokenStore::from_config(&config.tokens));

        Ok(Self {
            config: Arc::new(config),
            tokens,
            cache,
            whitelist,
            tasks: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Spawn the expiry sweeps. Must be called from within a tokio runtime.
    pub fn start_background_tasks(&self) {
        let mut tasks = self.tasks.lock();

        tasks.push(tokens::start_purge_task(
            Arc::clone(&self.tokens),
            self.config.tokens.ttl_resolution(),
        ));

        let cache_config = &self.config.cache;
        if cache_config.ttl_autopurge && cache_config.ttl().is_some() {
            tasks.push(cache::start_purge_task(
                self.cache.clone(),
                cache_config.ttl_resolution(),
            ));
        }

        tracing::debug!(tasks = tasks.len(), "Background sweeps started");
    }

    /// Stop the sweeps and delete every cached artifact.
    pub fn shutdown(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }

        let removed = self.cache.clear();
        tracing::info!(removed, "Removed cached artifacts");
    }
}

/// Create the Axum router with all routes
pub fn create_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        // OpenAPI documentation (Swagger UI at /api/docs)
        .nest("/api", openapi::openapi_routes())
        .merge(routes_api::api_routes(&ctx))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

/// Start the HTTP server
pub async fn start_server(config: Config) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    let ctx = AppContext::new(config)?;
    ctx.start_background_tasks();

    tracing::info!(
        whitelisted_hosts = ctx.whitelist.len(),
        scratch_dir = ?ctx.config.cache.scratch_dir(),
        "Conversion service ready"
    );

    let app = create_router(ctx.clone());

    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    ctx.shutdown();
    result?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
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

    tracing::info!("Shutdown signal received");
}

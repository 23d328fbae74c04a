//! Axum server bootstrap - the composition root.
//!
//! The only place where concrete adapters are instantiated and wired into
//! the core engines.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use aigw_core::ports::{GenerationService, ModelCatalog, TokenMaintenance, TokenManager};
use aigw_core::{
    GatewaySettings, ImageService, ImagineOrchestrator, SessionStore, SlidingWindowLimiter,
    StaticModelCatalog, StaticTokenPool, TaskRegistry, TokenJobs, is_production_env,
};
use aigw_upstream::UpstreamClient;
use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::info;

use crate::state::AppState;

/// CORS configuration for the web server.
#[derive(Debug, Clone, Default)]
pub enum CorsConfig {
    /// Allow all origins.
    #[default]
    AllowAll,
    /// Allow specific origins.
    AllowOrigins(Vec<String>),
}

impl CorsConfig {
    /// An empty origin list allows everything.
    pub fn from_origins(origins: &[String]) -> Self {
        if origins.is_empty() {
            Self::AllowAll
        } else {
            Self::AllowOrigins(origins.to_vec())
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors: CorsConfig,
}

impl ServerConfig {
    pub fn from_settings(settings: &GatewaySettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            cors: CorsConfig::from_origins(&settings.server.cors_origins),
        }
    }

    fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// The external collaborators the engines are built from.
#[derive(Clone)]
pub struct GatewayPorts {
    pub tokens: Arc<dyn TokenManager>,
    pub generation: Arc<dyn GenerationService>,
    pub maintenance: Arc<dyn TokenMaintenance>,
    pub models: Arc<dyn ModelCatalog>,
}

/// Everything the handlers need.
pub struct AxumContext {
    pub settings: Arc<GatewaySettings>,
    pub limiter: SlidingWindowLimiter,
    /// Resolved once at startup from the settings and the environment.
    pub rate_limit_active: bool,
    pub registry: TaskRegistry,
    pub sessions: Arc<SessionStore>,
    pub orchestrator: Arc<ImagineOrchestrator>,
    pub images: ImageService,
    pub jobs: TokenJobs,
}

impl std::fmt::Debug for AxumContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AxumContext")
            .field("rate_limit_active", &self.rate_limit_active)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl AxumContext {
    /// Wire the engines around a set of ports.
    pub fn from_parts(settings: GatewaySettings, ports: GatewayPorts) -> Self {
        let rate_limit_active = settings.rate_limit.is_active(is_production_env());
        let registry = TaskRegistry::new(Duration::from_secs(settings.batch.retention_secs));
        let sessions = Arc::new(SessionStore::new(Duration::from_secs(
            settings.imagine.session_ttl_secs,
        )));
        let orchestrator = Arc::new(ImagineOrchestrator::new(
            Arc::clone(&ports.tokens),
            Arc::clone(&ports.generation),
            Arc::clone(&ports.models),
            Arc::clone(&sessions),
            settings.imagine.clone(),
        ));
        let images = ImageService::new(
            Arc::clone(&ports.tokens),
            Arc::clone(&ports.generation),
            Arc::clone(&ports.models),
        );
        let jobs = TokenJobs::new(
            ports.tokens,
            ports.maintenance,
            registry.clone(),
            settings.batch.clone(),
        );

        Self {
            settings: Arc::new(settings),
            limiter: SlidingWindowLimiter::new(),
            rate_limit_active,
            registry,
            sessions,
            orchestrator,
            images,
            jobs,
        }
    }

    /// Teardown hook: stop every imagine run and cancel running tasks.
    pub fn shutdown(&self) {
        self.orchestrator.shutdown();
        let cancelled = self.registry.cancel_all();
        info!(cancelled, "Gateway shutdown complete");
    }
}

/// Build the context from settings with the production adapters.
pub fn bootstrap(settings: GatewaySettings) -> Result<AxumContext> {
    let tokens = Arc::new(StaticTokenPool::new(&settings.tokens));
    if tokens.is_empty() {
        tracing::warn!("No upstream tokens configured; generation requests will fail");
    }
    let upstream =
        Arc::new(UpstreamClient::new(&settings.upstream).context("Failed to build upstream client")?);
    let models = Arc::new(StaticModelCatalog::from_settings(&settings.imagine));
    info!(
        upstream = %upstream.base_url(),
        tokens = tokens.len(),
        "Gateway adapters ready"
    );

    let ports = GatewayPorts {
        tokens,
        generation: upstream.clone(),
        maintenance: upstream,
        models,
    };
    Ok(AxumContext::from_parts(settings, ports))
}

/// Bind, serve until `shutdown` resolves, then run the teardown hook while
/// axum drains open connections.
pub async fn start_server<F>(config: ServerConfig, state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = crate::routes::create_router(Arc::clone(&state), &config.cors);

    let addr = config.addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("aigw gateway listening on http://{}", listener.local_addr()?);

    let teardown = Arc::clone(&state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown.await;
        info!("Shutdown signal received");
        teardown.shutdown();
    })
    .await?;
    Ok(())
}

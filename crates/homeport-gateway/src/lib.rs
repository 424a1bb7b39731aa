//! HTTP gateway for homeport
//!
//! One listener serves three surfaces:
//! - `/{port}/...`: the primary proxy entry, authorized by the sharing
//!   policy and forwarded with the prefix stripped
//! - `/api/...`: the share management API (session protected)
//! - everything else: the fallback router, which attributes orphan asset
//!   requests to a port or serves the gateway UI

pub mod access_log;
pub mod challenge;
pub mod config;
pub mod cookies;
pub mod entry;
pub mod fallback;
pub mod forwarded;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod policy;
pub mod portal;
pub mod proxy;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use homeport_auth::{CookieError, CookieSigner, RateLimiter, SessionValidator};
use homeport_registry::PortRegistry;
use std::{future::Future, net::SocketAddr, sync::Arc};
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use utoipa::OpenApi;

pub use access_log::{AccessEntry, AccessLog, TracingAccessLog};
pub use config::GatewayConfig;
pub use forwarded::ClientAddr;
pub use policy::{Decision, SharingPolicy};
pub use proxy::{ForwardMode, ProxyEngine, ProxyError};

/// Application state shared across handlers
pub struct AppState {
    pub config: GatewayConfig,
    pub registry: Arc<dyn PortRegistry>,
    pub policy: SharingPolicy,
    pub proxy: ProxyEngine,
    pub access_log: Arc<dyn AccessLog>,
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Homeport API",
        version = "0.1.0",
        description = "Share management API for the homeport port gateway"
    ),
    paths(
        handlers::share_port,
        handlers::unshare_port,
        handlers::list_ports,
        handlers::health_check,
        handlers::openapi_json,
    ),
    components(
        schemas(
            homeport_proto::ShareMode,
            homeport_proto::PortRecord,
            models::ShareRequest,
            models::ShareResponse,
            models::PortList,
            models::HealthResponse,
            models::ErrorResponse,
        )
    ),
    tags(
        (name = "sharing", description = "Port sharing endpoints"),
        (name = "ports", description = "Tracked port endpoints"),
        (name = "system", description = "System health and info endpoints")
    )
)]
pub struct ApiDoc;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Invalid cookie secret: {0}")]
    CookieSecret(#[from] CookieError),

    #[error("Invalid duration setting: {0}")]
    Duration(String),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Gateway server
pub struct GatewayServer {
    state: Arc<AppState>,
}

impl GatewayServer {
    pub fn new(
        config: GatewayConfig,
        registry: Arc<dyn PortRegistry>,
        sessions: Arc<dyn SessionValidator>,
    ) -> Result<Self, GatewayError> {
        let limiter = Arc::new(RateLimiter::new(
            config.rate_limit_attempts,
            config.rate_limit_window,
        ));
        Self::with_rate_limiter(config, registry, sessions, limiter)
    }

    /// Build a server around an existing rate limiter
    pub fn with_rate_limiter(
        config: GatewayConfig,
        registry: Arc<dyn PortRegistry>,
        sessions: Arc<dyn SessionValidator>,
        limiter: Arc<RateLimiter>,
    ) -> Result<Self, GatewayError> {
        let cookie_ttl = chrono::Duration::from_std(config.auth_cookie_ttl)
            .map_err(|e| GatewayError::Duration(e.to_string()))?;
        let cookies = CookieSigner::new(config.cookie_secret.clone(), cookie_ttl)?;

        let policy = SharingPolicy::new(sessions, cookies, limiter)
            .with_dev_mode(config.dev_mode)
            .with_forward_unregistered(config.forward_unregistered)
            .with_login_path(config.login_path.clone());

        let proxy = ProxyEngine::new(config.connect_timeout, config.context_cookie_ttl);

        Ok(Self {
            state: Arc::new(AppState {
                config,
                registry,
                policy,
                proxy,
                access_log: Arc::new(TracingAccessLog),
            }),
        })
    }

    /// Replace the access log sink
    ///
    /// Has no effect once [`GatewayServer::state`] has been shared.
    pub fn with_access_log(mut self, access_log: Arc<dyn AccessLog>) -> Self {
        match Arc::get_mut(&mut self.state) {
            Some(state) => state.access_log = access_log,
            None => warn!("Access log not replaced: gateway state is already shared"),
        }
        self
    }

    pub fn state(&self) -> Arc<AppState> {
        self.state.clone()
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        let session_state = middleware::SessionState {
            validator: self.state.policy.sessions(),
            dev_mode: self.state.config.dev_mode,
        };

        // Build PUBLIC routes (no session required)
        let public_router = Router::new()
            .route("/", get(handlers::ui_root))
            .route("/api/health", get(handlers::health_check))
            .route("/api/openapi.json", get(handlers::openapi_json));

        // Build PROTECTED routes (require a top-level session)
        let protected_router = Router::new()
            .route("/api/ports", get(handlers::list_ports))
            .route(
                "/api/share/{port}",
                post(handlers::share_port).delete(handlers::unshare_port),
            )
            .layer(axum_middleware::from_fn_with_state(
                session_state,
                middleware::require_session,
            ));

        public_router
            .merge(protected_router)
            .fallback(entry::gateway_entry)
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
    }

    /// Bind the configured address and serve until `shutdown` resolves
    pub async fn start<F>(self, shutdown: F) -> Result<(), GatewayError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.state.config.bind_addr;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| GatewayError::Bind { addr, source })?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<(), GatewayError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let router = self.build_router();
        let cleanup = self.state.policy.limiter().spawn_cleanup();

        if let Ok(addr) = listener.local_addr() {
            info!("Gateway listening on http://{}", addr);
            info!("OpenAPI spec: http://{}/api/openapi.json", addr);
        }

        let result = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await;

        cleanup.abort();
        info!("Gateway stopped");
        result.map_err(GatewayError::Serve)
    }
}

//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Assemble the request pipeline around any axum router
//! - Serve gateway routes and forward the rest upstream
//! - Bind server to listener with client address info
//! - Run background maintenance (rate-limit purge)
//!
//! # Layer order (outermost first)
//! ```text
//! TraceLayer → set request id → propagate request id
//!     → security headers → rate limiter → error translator
//!     → catch panic → handler
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, http::uri::InvalidUri, middleware, routing::get, Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;

use crate::config::GatewayConfig;
use crate::http::request::{propagate_request_id_layer, set_request_id_layer};
use crate::http::translator::{catch_panic_layer, error_envelope_middleware, ErrorTranslator};
use crate::http::upstream::{forward_handler, Upstream};
use crate::security::{
    rate_limit_middleware, security_headers_middleware, RateLimiter, SecurityHeaders,
};

/// The cooperating middleware stages, ready to wrap a router.
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub rate_limiter: Option<Arc<RateLimiter>>,
    pub security_headers: Option<Arc<SecurityHeaders>>,
    pub translator: ErrorTranslator,
}

impl Pipeline {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            rate_limiter: config
                .rate_limit
                .enabled
                .then(|| Arc::new(RateLimiter::from_config(&config.rate_limit))),
            security_headers: config
                .security
                .enable_headers
                .then(|| Arc::new(SecurityHeaders::from_config(&config.security))),
            translator: ErrorTranslator::new(Some(Duration::from_secs(config.timeouts.request_secs))),
        }
    }

    /// Wrap `router` with every configured stage.
    pub fn wrap(&self, router: Router) -> Router {
        let mut router = router
            .layer(catch_panic_layer())
            .layer(middleware::from_fn_with_state(self.translator, error_envelope_middleware));

        if let Some(limiter) = &self.rate_limiter {
            router = router.layer(middleware::from_fn_with_state(limiter.clone(), rate_limit_middleware));
        }
        if let Some(headers) = &self.security_headers {
            router = router.layer(middleware::from_fn_with_state(
                headers.clone(),
                security_headers_middleware,
            ));
        }

        router
            .layer(propagate_request_id_layer())
            .layer(set_request_id_layer())
            .layer(TraceLayer::new_for_http())
    }
}

#[derive(Debug, Serialize)]
pub struct GatewayStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub rate_limit_keys: usize,
}

async fn get_status(State(limiter): State<Option<Arc<RateLimiter>>>) -> Json<GatewayStatus> {
    Json(GatewayStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        rate_limit_keys: limiter.map(|l| l.store().len()).unwrap_or(0),
    })
}

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
    config: GatewayConfig,
    pipeline: Pipeline,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: GatewayConfig) -> Result<Self, InvalidUri> {
        let pipeline = Pipeline::from_config(&config);
        Self::with_pipeline(config, pipeline)
    }

    /// Create a server around an already assembled pipeline.
    pub fn with_pipeline(config: GatewayConfig, pipeline: Pipeline) -> Result<Self, InvalidUri> {
        let upstream = if config.upstream.enabled {
            Some(Upstream::new(&config.upstream.address)?)
        } else {
            None
        };

        let routes = Router::new()
            .route("/_gateway/status", get(get_status))
            .with_state(pipeline.rate_limiter.clone())
            .fallback(forward_handler)
            .with_state(upstream);

        let router = pipeline.wrap(routes);
        Ok(Self {
            router,
            config,
            pipeline,
        })
    }

    /// The fully layered router, for in-process use.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Run the server until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        if let Some(limiter) = &self.pipeline.rate_limiter {
            let interval = Duration::from_secs(self.config.rate_limit.purge_interval_secs);
            tokio::spawn(limiter.clone().run_purge(interval, shutdown.resubscribe()));
        }

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

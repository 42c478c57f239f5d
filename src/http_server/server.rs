//! # HTTP Server
//!
//! Status server combining the health and debug routers.

use std::io;
use std::net::SocketAddr;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use super::config::HttpServerConfig;
use super::status_routes::{health_routes, status_routes};
use crate::observability::{log_event_with_fields, Event};
use crate::updatestream::UpdateStreamService;

/// HTTP status server for one update stream service
pub struct HttpServer {
    config: HttpServerConfig,
    router: Router,
}

impl HttpServer {
    pub fn new(config: HttpServerConfig, service: UpdateStreamService) -> Self {
        let router = Self::build_router(&config, service);
        Self { config, router }
    }

    fn build_router(config: &HttpServerConfig, service: UpdateStreamService) -> Router {
        let cors = if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|s| s.parse().ok())
                .collect();

            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods(Any)
                .allow_headers(Any)
        };

        Router::new()
            .merge(health_routes())
            .merge(status_routes(service))
            .layer(cors)
    }

    /// Get the socket address
    pub fn socket_addr(&self) -> String {
        self.config.socket_addr()
    }

    /// Get the router (for testing)
    pub fn router(self) -> Router {
        self.router
    }

    /// Binds the configured address.
    pub async fn bind(self) -> io::Result<BoundHttpServer> {
        let listener = TcpListener::bind(self.config.socket_addr()).await?;
        let local_addr = listener.local_addr()?;
        Ok(BoundHttpServer {
            listener,
            local_addr,
            router: self.router,
        })
    }
}

/// An `HttpServer` holding its listening socket.
pub struct BoundHttpServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    router: Router,
}

impl BoundHttpServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serves requests until `shutdown` fires.
    pub async fn serve(self, mut shutdown: broadcast::Receiver<()>) -> io::Result<()> {
        let addr = self.local_addr.to_string();
        log_event_with_fields(Event::HttpListening, &[("addr", addr.as_str())]);

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await
    }
}

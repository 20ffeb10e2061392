//! HTTP listeners: the guarded public surface and the admin surface.
//!
//! The public listener answers every path with a plain `OK` stand-in. An
//! application embedding floodgate wraps its own router with
//! [`admission::protect`] instead, which installs the same admission
//! middleware in front of real handlers.

pub mod admin;

use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

use crate::admission::{self, AdmissionState};
use crate::config::{AdmissionConfig, ServerConfig};
use crate::error::Result;
use crate::ratelimit::SettingsManager;

/// HTTP server hosting the public and admin listeners.
pub struct HttpServer {
    config: ServerConfig,
    admission: AdmissionConfig,
    manager: Arc<SettingsManager>,
}

impl HttpServer {
    pub fn new(config: ServerConfig, admission: AdmissionConfig, manager: Arc<SettingsManager>) -> Self {
        Self {
            config,
            admission,
            manager,
        }
    }

    /// The public router. Every request passes admission before reaching
    /// the upstream handler.
    pub fn public_router(&self) -> Router {
        let state = AdmissionState::new(self.manager.detector().clone(), &self.admission);
        admission::protect(Router::new().fallback(upstream), state)
    }

    pub fn admin_router(&self) -> Router {
        admin::router(self.manager.clone())
    }

    /// Bind the configured addresses and serve until `signal` resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let public = TcpListener::bind(self.config.listen_addr).await?;
        let admin = TcpListener::bind(self.config.admin_addr).await?;
        self.serve_listeners(public, admin, signal).await
    }

    /// Serve on already-bound listeners until `signal` resolves.
    pub async fn serve_listeners<F>(self, public: TcpListener, admin: TcpListener, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!(
            public_addr = %public.local_addr()?,
            admin_addr = %admin.local_addr()?,
            "Starting HTTP listeners"
        );

        let (stop_tx, stop_rx) = watch::channel(false);
        tokio::spawn(async move {
            signal.await;
            let _ = stop_tx.send(true);
        });

        let public_server = axum::serve(
            public,
            self.public_router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(stopped(stop_rx.clone()));
        let admin_server =
            axum::serve(admin, self.admin_router()).with_graceful_shutdown(stopped(stop_rx));

        let (public_result, admin_result) =
            tokio::join!(public_server.into_future(), admin_server.into_future());

        for result in [&public_result, &admin_result] {
            if let Err(e) = result {
                error!(error = %e, "HTTP listener failed");
            }
        }
        public_result?;
        admin_result?;

        info!("HTTP listeners stopped");
        Ok(())
    }
}

/// Stand-in for the request pipeline behind admission control.
async fn upstream() -> &'static str {
    "OK"
}

async fn stopped(mut stop: watch::Receiver<bool>) {
    let _ = stop.wait_for(|stopped| *stopped).await;
}

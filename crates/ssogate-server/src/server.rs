use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::middleware::from_fn_with_state;
use ssogate_auth::middleware::sso_middleware;
use ssogate_auth::{AuthController, FileSessionStore, OAuthProvider, SessionStore};
use tokio::task::JoinHandle;

use crate::config::AppConfig;
use crate::proxy::{ProxyState, forward};

pub struct GatewayServer {
    addr: SocketAddr,
    app: Router,
    purge_task: Option<JoinHandle<()>>,
}

impl GatewayServer {
    /// Opens the session store, connects the flow controller to the
    /// identity provider and assembles the router.
    pub async fn build(config: AppConfig) -> anyhow::Result<Self> {
        let gateway = Arc::new(config.gateway.clone());

        let sessions: Arc<dyn SessionStore> =
            Arc::new(FileSessionStore::open(&gateway.session_store_path).await?);
        let provider = Arc::new(OAuthProvider::from_config(&gateway)?);
        let controller = Arc::new(AuthController::new(gateway.clone(), sessions, provider));

        let proxy = ProxyState::new(
            config.upstream.url.clone(),
            config.upstream.timeout(),
            config.server.body_limit_bytes,
        )?;

        tracing::info!(
            store = %gateway.session_store_path.display(),
            auth_server = %gateway.provider.auth_server,
            upstream = %config.upstream.url,
            locations = gateway.locations.len(),
            "Gateway initialized"
        );

        let purge_task = spawn_purge_task(controller.clone(), gateway.purge_interval);

        Ok(Self {
            addr: config.addr(),
            app: build_router(controller, proxy),
            purge_task,
        })
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        axum::serve(
            listener,
            self.app
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;
        if let Some(task) = self.purge_task {
            task.abort();
        }
        Ok(())
    }
}

/// Every request passes the single-sign-on layer before it is proxied.
pub fn build_router(controller: Arc<AuthController>, proxy: ProxyState) -> Router {
    Router::new()
        .fallback(forward)
        .with_state(proxy)
        .layer(from_fn_with_state(controller, sso_middleware))
}

fn spawn_purge_task(controller: Arc<AuthController>, interval: Duration) -> Option<JoinHandle<()>> {
    if interval.is_zero() {
        tracing::info!("Session purge disabled");
        return None;
    }
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = controller.purge_expired().await {
                tracing::warn!(error = %e, "Session purge failed");
            }
        }
    }))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}

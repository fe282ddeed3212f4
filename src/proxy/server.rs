//! Server assembly and lifecycle
//!
//! Wires configuration into the concrete collaborators (OAuth2 provider,
//! file token store, validator, dispatcher, forwarder), then runs the
//! listener with graceful shutdown. TLS termination is optional and uses
//! the same router either way.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum_server::Handle;
use axum_server::tls_rustls::RustlsConfig;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::dispatch::Dispatcher;
use super::domains::EndpointGuard;
use super::forward::Forwarder;
use super::router::{AppState, create_router};
use crate::auth::{FileTokenStore, OAuth2Provider, TokenStore, TokenValidator};
use crate::config::Config;
use crate::{Error, Result};

/// The assembled proxy, ready to serve
pub struct PepProxy {
    config: Config,
    state: Arc<AppState>,
}

impl PepProxy {
    /// Assemble the proxy from configuration.
    ///
    /// One HTTP client is shared between identity-provider calls and
    /// backend forwarding, so `server.request_timeout` bounds both.
    pub fn new(config: Config) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.server.request_timeout)
            .build()
            .map_err(|e| Error::Internal(format!("failed to build HTTP client: {e}")))?;

        let provider = Arc::new(OAuth2Provider::new(http_client.clone(), &config.oauth2));

        let store: Arc<dyn TokenStore> = match &config.token_store.directory {
            Some(dir) => Arc::new(FileTokenStore::new(dir.clone())?),
            None => Arc::new(FileTokenStore::default_location()?),
        };

        let validator = Arc::new(TokenValidator::new(
            provider,
            store,
            config.oauth2.client_id.clone(),
            config.cache.default_ttl,
        ));

        let mut dispatcher = Dispatcher::new(config.mount_prefix.clone());
        for (domain, endpoint) in &config.endpoints {
            dispatcher.register(domain.clone(), Arc::new(EndpointGuard::from_config(endpoint)));
        }

        let forwarder = Forwarder::new(http_client, config.app_base_url());

        let state = Arc::new(AppState {
            validator,
            dispatcher,
            forwarder,
            public_paths: config.public_paths.clone(),
            mount_prefix: config.mount_prefix.clone(),
            max_body_size: config.server.max_body_size,
        });

        Ok(Self { config, state })
    }

    /// Run the proxy until a shutdown signal arrives
    pub async fn run(self) -> Result<()> {
        let router = create_router(self.state.clone());

        let addr: SocketAddr = format!("{}:{}", self.config.server.host, self.config.server.port)
            .parse()
            .map_err(|e| Error::Config(format!("invalid listen address: {e}")))?;

        let mut domains: Vec<&str> = self.state.dispatcher.domains().collect();
        domains.sort_unstable();

        info!("Starting PEP proxy v{}", env!("CARGO_PKG_VERSION"));
        info!("Identity provider: {}", self.config.oauth2.server_url);
        info!("Backend: {}", self.config.app_base_url());
        info!("API domains: {}", domains.join(", "));
        if !self.config.public_paths.is_empty() {
            info!("Public paths: {}", self.config.public_paths.join(", "));
        }

        if self.config.server.tls.enabled {
            self.run_tls(addr, router).await
        } else {
            let listener = TcpListener::bind(addr).await?;
            info!("Listening on http://{}", listener.local_addr()?);
            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown_signal())
                .await?;
            info!("Server stopped");
            Ok(())
        }
    }

    async fn run_tls(self, addr: SocketAddr, router: axum::Router) -> Result<()> {
        let tls = &self.config.server.tls;
        let (Some(cert_file), Some(key_file)) = (&tls.cert_file, &tls.key_file) else {
            return Err(Error::Config(
                "TLS enabled but cert_file or key_file is missing".to_string(),
            ));
        };

        let rustls_config = RustlsConfig::from_pem_file(cert_file, key_file)
            .await
            .map_err(|e| Error::Config(format!("failed to load TLS material: {e}")))?;

        let handle = Handle::new();
        tokio::spawn(graceful_shutdown(
            handle.clone(),
            self.config.server.shutdown_timeout,
        ));

        info!("Listening on https://{addr}");
        axum_server::bind_rustls(addr, rustls_config)
            .handle(handle)
            .serve(router.into_make_service())
            .await?;
        info!("Server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to install shutdown handler: {e}");
        return;
    }
    info!("Shutdown signal received");
}

async fn graceful_shutdown(handle: Handle, timeout: Duration) {
    shutdown_signal().await;
    handle.graceful_shutdown(Some(timeout));
}

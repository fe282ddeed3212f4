//! Configuration management

use std::{collections::HashMap, env, path::Path, path::PathBuf, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// OAuth2 identity provider configuration
    pub oauth2: OAuth2Config,
    /// Upstream application (backend) configuration
    pub app: AppConfig,
    /// Token cache configuration
    pub cache: CacheConfig,
    /// Delegated token store configuration
    pub token_store: TokenStoreConfig,
    /// API domain endpoints: first path segment -> authorization settings
    pub endpoints: HashMap<String, EndpointConfig>,
    /// Paths that bypass permission dispatch (still identified best-effort)
    pub public_paths: Vec<String>,
    /// Prefix under which proxied APIs are mounted (e.g. "/proxy")
    pub mount_prefix: String,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Request timeout for outbound calls (provider and upstream)
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    /// Maximum request body size (bytes)
    pub max_body_size: usize,
    /// TLS listener configuration
    pub tls: TlsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8004,
            request_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(30),
            max_body_size: 10 * 1024 * 1024, // 10MB
            tls: TlsConfig::default(),
        }
    }
}

/// TLS listener configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TlsConfig {
    /// Terminate TLS on the listening socket
    pub enabled: bool,
    /// PEM certificate chain file
    pub cert_file: Option<PathBuf>,
    /// PEM private key file
    pub key_file: Option<PathBuf>,
}

/// OAuth2 identity provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuth2Config {
    /// Base URL of the identity provider (account server)
    pub server_url: String,
    /// Client ID registered for this proxy.
    /// Tokens carrying this app id are platform tokens; any other app id
    /// enters the delegated-token resolution flow.
    pub client_id: String,
    /// Client secret (supports `env:VAR_NAME` indirection)
    pub client_secret: String,
}

impl Default for OAuth2Config {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8000".to_string(),
            client_id: String::new(),
            client_secret: String::new(),
        }
    }
}

impl OAuth2Config {
    /// Resolve the client secret (expand `env:VAR_NAME` indirection)
    #[must_use]
    pub fn resolve_client_secret(&self) -> String {
        if let Some(var_name) = self.client_secret.strip_prefix("env:") {
            env::var(var_name).unwrap_or_else(|_| self.client_secret.clone())
        } else {
            self.client_secret.clone()
        }
    }
}

/// Upstream application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Backend host
    pub host: String,
    /// Backend port
    pub port: u16,
    /// Contact the backend over HTTPS
    pub ssl: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8080,
            ssl: false,
        }
    }
}

/// Token cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL applied to freshly validated platform tokens
    #[serde(with = "humantime_serde")]
    pub default_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(3600),
        }
    }
}

/// Delegated token store configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TokenStoreConfig {
    /// Base directory for stored token records
    /// (default: `~/.pep-proxy/tokens`)
    pub directory: Option<PathBuf>,
}

/// Authorization settings for a single API domain
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Reject unauthenticated requests to this domain
    pub require_auth: bool,
    /// Allowed HTTP methods (None = all methods)
    pub methods: Option<Vec<String>>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            require_auth: true,
            methods: None,
        }
    }
}

fn default_endpoints() -> HashMap<String, EndpointConfig> {
    ["catalog", "ordering", "inventory", "charging"]
        .into_iter()
        .map(|name| (name.to_string(), EndpointConfig::default()))
        .collect()
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        // Load from file if provided
        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (PEP_PROXY_ prefix)
        figment = figment.merge(Env::prefixed("PEP_PROXY_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        // Load env files into process environment (before secret resolution)
        config.load_env_files();

        if config.endpoints.is_empty() {
            config.endpoints = default_endpoints();
        }
        config.mount_prefix = normalize_prefix(&config.mount_prefix);

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => {
                        tracing::info!("Loaded env file: {expanded}");
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load env file {expanded}: {e}");
                    }
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Base URL of the upstream backend, per the TLS flag
    #[must_use]
    pub fn app_base_url(&self) -> String {
        let scheme = if self.app.ssl { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.app.host, self.app.port)
    }
}

/// Normalize a mount prefix: no trailing slash, and a leading slash
/// whenever the prefix is non-empty.
#[must_use]
pub fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.strip_suffix('/').unwrap_or(prefix);
    if trimmed.is_empty() || trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

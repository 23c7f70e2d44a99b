//! Configuration types
//!
//! Everything is validated when the config is built, so a constructed
//! [`InventoryConfig`] is always usable by the client.

use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::time::Duration;
use url::Url;

use crate::error::ConfigError;

/// Default lifetime of every cache entry (two hours).
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(7200);

/// Longest accepted cache TTL (thirty days).
pub const MAX_CACHE_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Default per-request timeout handed to the HTTP client.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Credentials exchanged for a session token at login.
#[derive(Clone)]
pub struct Credentials {
    username: String,
    password: SecretString,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        self.password.expose_secret()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Replaces the public download host with the internal one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRewrite {
    external: String,
    internal: String,
}

impl HostRewrite {
    pub fn new(external: impl Into<String>, internal: impl Into<String>) -> Result<Self, ConfigError> {
        let external = external.into();
        let internal = internal.into();
        if external.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "external_host".to_string(),
            });
        }
        if internal.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "internal_host".to_string(),
            });
        }
        Ok(Self { external, internal })
    }

    pub fn external(&self) -> &str {
        &self.external
    }

    pub fn internal(&self) -> &str {
        &self.internal
    }

    /// Replace every occurrence of the external host. Other URLs pass through.
    pub fn apply(&self, url: &str) -> String {
        url.replace(&self.external, &self.internal)
    }
}

/// Settings for the remote inventory client and its cache.
#[derive(Debug, Clone)]
pub struct InventoryConfig {
    /// Root of the JSON API; always ends with `/`.
    pub base_url: Url,
    pub credentials: Credentials,
    /// Version the `available` check expects the service to report.
    pub api_version: Option<String>,
    /// Catalog node sent with download requests.
    pub node: String,
    /// Application context attached by `set_user_context`.
    pub application_context: String,
    pub host_rewrite: HostRewrite,
    pub cache_ttl: Duration,
    pub request_timeout: Duration,
}

impl InventoryConfig {
    /// Build a config, validating the base URL.
    pub fn new(
        base_url: &str,
        credentials: Credentials,
        host_rewrite: HostRewrite,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: parse_base_url(base_url)?,
            credentials,
            api_version: None,
            node: "EE".to_string(),
            application_context: "ESPA".to_string(),
            host_rewrite,
            cache_ttl: DEFAULT_CACHE_TTL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = Some(version.into());
        self
    }

    pub fn with_node(mut self, node: impl Into<String>) -> Self {
        self.node = node.into();
        self
    }

    pub fn with_application_context(mut self, context: impl Into<String>) -> Self {
        self.application_context = context.into();
        self
    }

    /// Set the cache TTL. Must be non-zero and at most [`MAX_CACHE_TTL`].
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidValue {
            field: "cache_ttl".to_string(),
            value: format!("{}s", ttl.as_secs()),
            reason,
        };
        if ttl.is_zero() {
            return Err(invalid("must be greater than zero".to_string()));
        }
        if ttl > MAX_CACHE_TTL {
            return Err(invalid(format!(
                "must not exceed {}s",
                MAX_CACHE_TTL.as_secs()
            )));
        }
        self.cache_ttl = ttl;
        Ok(self)
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `M2M_BASE_URL`: JSON API root, e.g. `https://host/inventory/json/v/1.4.1/`
    /// - `M2M_USERNAME`, `M2M_PASSWORD`: machine account credentials
    /// - `M2M_EXTERNAL_HOST`: public download host to replace
    /// - `M2M_INTERNAL_HOSTS`: comma-separated internal hosts (first one is used)
    ///
    /// Optional:
    /// - `M2M_API_VERSION`: expected version for availability checks
    /// - `M2M_NODE`: catalog node (default: EE)
    /// - `M2M_APPLICATION_CONTEXT`: user context label (default: ESPA)
    /// - `M2M_CACHE_TTL_SECS`: cache entry lifetime (default: 7200)
    /// - `M2M_REQUEST_TIMEOUT_SECS`: HTTP timeout (default: 120)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`InventoryConfig::from_env`] with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ConfigError::MissingRequired {
                    field: key.to_string(),
                })
        };

        let internal_hosts = required("M2M_INTERNAL_HOSTS")?;
        let internal = internal_hosts
            .split(',')
            .map(str::trim)
            .find(|h| !h.is_empty())
            .unwrap_or_default()
            .to_string();

        let mut config = Self::new(
            &required("M2M_BASE_URL")?,
            Credentials::new(required("M2M_USERNAME")?, required("M2M_PASSWORD")?),
            HostRewrite::new(required("M2M_EXTERNAL_HOST")?, internal)?,
        )?;

        if let Some(version) = lookup("M2M_API_VERSION") {
            config = config.with_api_version(version);
        }
        if let Some(node) = lookup("M2M_NODE") {
            config = config.with_node(node);
        }
        if let Some(context) = lookup("M2M_APPLICATION_CONTEXT") {
            config = config.with_application_context(context);
        }
        if let Some(secs) = lookup("M2M_CACHE_TTL_SECS") {
            config = config.with_cache_ttl(Duration::from_secs(parse_secs(
                "M2M_CACHE_TTL_SECS",
                &secs,
            )?))?;
        }
        if let Some(secs) = lookup("M2M_REQUEST_TIMEOUT_SECS") {
            config = config.with_request_timeout(Duration::from_secs(parse_secs(
                "M2M_REQUEST_TIMEOUT_SECS",
                &secs,
            )?));
        }

        Ok(config)
    }

    /// Absolute URL for an API endpoint such as `idLookup`.
    pub fn endpoint_url(&self, endpoint: &str) -> Result<Url, ConfigError> {
        self.base_url
            .join(endpoint)
            .map_err(|e| ConfigError::InvalidValue {
                field: "endpoint".to_string(),
                value: endpoint.to_string(),
                reason: e.to_string(),
            })
    }
}

fn parse_base_url(raw: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidValue {
        field: "base_url".to_string(),
        value: raw.to_string(),
        reason,
    };

    let mut url = Url::parse(raw.trim()).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("scheme must be http or https".to_string()));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn parse_secs(field: &str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        value: raw.to_string(),
        reason: "expected whole seconds".to_string(),
    })
}

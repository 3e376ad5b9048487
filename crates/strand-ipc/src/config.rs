//! Configuration for clients and servers, loaded from TOML.
//!
//! ```toml
//! [client]
//! factory = "tcp"
//! connect_timeout_ms = 20000
//!
//! [server]
//! handler_count = 10
//! authorization = true
//!
//! [server.acls]
//! InterDatanodeProtocol = "dn hdfs"
//! ```

use crate::dispatch::{AccessControlList, DispatchTable, Dispatcher, ProtocolAclPolicy, ServiceBinding};
use crate::transport::{
    ConnectionConfig, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_FACTORY, DEFAULT_MAX_PENDING_REQUESTS,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors reading or writing a configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write config {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Top-level IPC configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IpcConfig {
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Name of a transport factory registered on the pool; part of the
    /// pool key.
    #[serde(default = "default_factory")]
    pub factory: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_max_pending_requests")]
    pub max_pending_requests: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Maximum handlers running at once.
    #[serde(default = "default_handler_count")]
    pub handler_count: usize,
    /// Log every call and return value.
    #[serde(default)]
    pub verbose: bool,
    /// Check callers against the access lists.
    #[serde(default)]
    pub authorization: bool,
    /// Access list for protocols not named in `acls`.
    #[serde(default = "default_acl")]
    pub default_acl: String,
    /// Per-protocol access lists, `"users groups"`.
    #[serde(default)]
    pub acls: BTreeMap<String, String>,
}

fn default_factory() -> String { DEFAULT_FACTORY.to_string() }
fn default_connect_timeout_ms() -> u64 { DEFAULT_CONNECT_TIMEOUT_MS }
fn default_max_pending_requests() -> usize { DEFAULT_MAX_PENDING_REQUESTS }
fn default_handler_count() -> usize { 10 }
fn default_acl() -> String { AccessControlList::WILDCARD.to_string() }

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            factory: default_factory(),
            connect_timeout_ms: default_connect_timeout_ms(),
            max_pending_requests: default_max_pending_requests(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            handler_count: default_handler_count(),
            verbose: false,
            authorization: false,
            default_acl: default_acl(),
            acls: BTreeMap::new(),
        }
    }
}

impl IpcConfig {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse from a TOML string; missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Parse` if the string is not valid TOML or a key
    /// has the wrong type.
    ///
    /// # Examples
    ///
    /// ```
    /// use strand_ipc::IpcConfig;
    ///
    /// let config = IpcConfig::from_toml_str("[client]\nfactory = \"local\"\n").unwrap();
    /// assert_eq!(config.client.connection_config().factory, "local");
    /// assert!(IpcConfig::from_toml_str("[client]\nfactory = 3\n").is_err());
    /// ```
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Render as pretty-printed TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Save to a TOML file.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        std::fs::write(path, self.to_toml()?).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl ClientConfig {
    /// The pool key these settings select.
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            factory: self.factory.clone(),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            max_pending_requests: self.max_pending_requests,
        }
    }
}

impl ServerConfig {
    /// Per-protocol access lists, with `default_acl` for the rest.
    pub fn access_policy(&self) -> ProtocolAclPolicy {
        ProtocolAclPolicy::from_map(&self.acls)
            .with_fallback(AccessControlList::parse(&self.default_acl))
    }

    /// An empty dispatcher using this config's policy and verbosity.
    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new()
            .with_policy(Arc::new(self.access_policy()))
            .with_verbose(self.verbose)
    }

    /// Bind `table` with this config's authorization switch.
    pub fn binding(&self, table: DispatchTable) -> ServiceBinding {
        ServiceBinding::new(table).with_authorization(self.authorization)
    }
}

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use common::cluster::parse_duration;
use serde::{Deserialize, Serialize};
use url::Url;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/vault";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DEFAULT_VAULT_ADDR: &str = "http://127.0.0.1:8200";

/// Optional `config.toml` in the node's config directory
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    /// Backend address used when `--vault-addr` and `VAULT_ADDR` are unset
    #[serde(default)]
    pub vault_addr: Option<Url>,
    /// Client-side request timeout, e.g. `30s`
    #[serde(default)]
    pub request_timeout: Option<String>,
}

impl NodeConfig {
    pub fn path(config_path: &Path) -> PathBuf {
        config_path.join(CONFIG_FILE_NAME)
    }

    /// Load the config file, falling back to defaults when there is none
    pub fn load(config_path: &Path) -> Result<Self, StateError> {
        let path = Self::path(config_path);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => return Err(StateError::Io { path, source }),
        };
        toml::from_str(&contents).map_err(|source| StateError::TomlDe { path, source })
    }

    /// Explicit address, then the file, then the local default
    pub fn resolve_vault_addr(&self, explicit: Option<Url>) -> Result<Url, StateError> {
        if let Some(url) = explicit.or_else(|| self.vault_addr.clone()) {
            return Ok(url);
        }
        Url::parse(DEFAULT_VAULT_ADDR).map_err(StateError::Url)
    }

    /// Explicit timeout, then the file; none means the transport default
    pub fn resolve_timeout(&self, explicit: Option<Duration>) -> Result<Option<Duration>, StateError> {
        if explicit.is_some() {
            return Ok(explicit);
        }
        self.request_timeout
            .as_deref()
            .map(parse_duration)
            .transpose()
            .map_err(StateError::Config)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    TomlDe {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid backend address: {0}")]
    Url(#[source] url::ParseError),

    #[error(transparent)]
    Config(#[from] common::cluster::ConfigError),
}

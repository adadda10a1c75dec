//! The token a node authenticates with
//!
//! Two files under the node's config directory hold it:
//!
//! - `init-token`: the bootstrap token an operator drops in place. It is
//!   exchanged once and then wiped (truncated, not deleted).
//! - `token`: the working instance token, renewed in place.
//!
//! Emptying both files forces a fresh bootstrap on the next run.

use std::fs::{self, OpenOptions};
use std::io;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use nix::unistd::{Gid, Uid};

use crate::backend::{BackendError, TokenAuth, TokenCreateRequest};
use crate::cert::files::{write_file, PRIVATE_MODE};
use crate::cert::{FileError, Ownership};
use crate::cluster::{ClusterId, NodeRole};

pub const INIT_TOKEN_FILE: &str = "init-token";
pub const TOKEN_FILE: &str = "token";

#[derive(Debug, thiserror::Error)]
pub enum InstanceTokenError {
    #[error("error reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("error wiping {path}: {source}")]
    Wipe {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    File(#[from] FileError),
    #[error("no token found in {token} or {init_token}")]
    NoToken { token: PathBuf, init_token: PathBuf },
    #[error("error renewing tokens: token not renewable: {0}")]
    NotRenewable(String),
    #[error(transparent)]
    Sealed(BackendError),
    #[error("error looking up token: {0}")]
    Lookup(#[source] BackendError),
    #[error("error renewing token: {0}")]
    Renew(#[source] BackendError),
    #[error("error creating instance token through role '{role}': {source}")]
    Create {
        role: String,
        #[source]
        source: BackendError,
    },
}

impl InstanceTokenError {
    /// Keep sealed responses apart from every other backend failure
    fn backend(source: BackendError, wrap: impl FnOnce(BackendError) -> Self) -> Self {
        if source.is_sealed() {
            InstanceTokenError::Sealed(source)
        } else {
            wrap(source)
        }
    }
}

/// Token files of one node
#[derive(Debug, Clone)]
pub struct InstanceToken {
    config_path: PathBuf,
    role: Option<(ClusterId, NodeRole)>,
    fallback: Option<String>,
}

impl InstanceToken {
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            role: None,
            fallback: None,
        }
    }

    /// Exchange the init token through the node role's token role
    ///
    /// Without a role the init token itself becomes the instance token.
    pub fn with_role(mut self, cluster: ClusterId, role: NodeRole) -> Self {
        self.role = Some((cluster, role));
        self
    }

    /// Token to use when both files are empty, e.g. from `VAULT_TOKEN`
    pub fn with_fallback(mut self, token: Option<String>) -> Self {
        self.fallback = token.filter(|token| !token.is_empty());
        self
    }

    pub fn token_path(&self) -> PathBuf {
        self.config_path.join(TOKEN_FILE)
    }

    pub fn init_token_path(&self) -> PathBuf {
        self.config_path.join(INIT_TOKEN_FILE)
    }

    /// Contents of the token file, empty when the file is missing
    pub fn token(&self) -> Result<String, InstanceTokenError> {
        read_token_file(&self.token_path())
    }

    pub fn init_token(&self) -> Result<String, InstanceTokenError> {
        read_token_file(&self.init_token_path())
    }

    /// One renewal cycle
    ///
    /// With a working token: look it up, refuse if it is not renewable,
    ///  renew it and persist what the backend returns. Without one, bootstrap
    ///  from the init token. The handle is left authenticated with the
    ///  resulting token.
    pub async fn token_renew_run<A>(&self, auth: &A) -> Result<String, InstanceTokenError>
    where
        A: TokenAuth + ?Sized,
    {
        let token = self.token()?;
        if token.is_empty() {
            return self.bootstrap(auth).await;
        }

        auth.set_client_token(Some(token.clone()));
        let lookup = auth
            .lookup_self()
            .await
            .map_err(|e| InstanceTokenError::backend(e, InstanceTokenError::Lookup))?;
        if !lookup.renewable {
            return Err(InstanceTokenError::NotRenewable(lookup.id));
        }

        let renewed = auth
            .renew_self()
            .await
            .map_err(|e| InstanceTokenError::backend(e, InstanceTokenError::Renew))?;
        let renewed = if renewed.client_token.is_empty() {
            token
        } else {
            renewed.client_token
        };

        write_token_file(&self.token_path(), &renewed)?;
        auth.set_client_token(Some(renewed.clone()));
        tracing::info!("renewed instance token");
        Ok(renewed)
    }

    /// The token for a single operation, without renewing it
    pub async fn current_token<A>(&self, auth: &A) -> Result<String, InstanceTokenError>
    where
        A: TokenAuth + ?Sized,
    {
        let token = self.token()?;
        if token.is_empty() {
            return self.bootstrap(auth).await;
        }
        auth.set_client_token(Some(token.clone()));
        Ok(token)
    }

    async fn bootstrap<A>(&self, auth: &A) -> Result<String, InstanceTokenError>
    where
        A: TokenAuth + ?Sized,
    {
        let init_token = self.init_token()?;
        if init_token.is_empty() {
            return match &self.fallback {
                Some(token) => {
                    tracing::debug!("token files empty, using the supplied token");
                    auth.set_client_token(Some(token.clone()));
                    Ok(token.clone())
                }
                None => Err(InstanceTokenError::NoToken {
                    token: self.token_path(),
                    init_token: self.init_token_path(),
                }),
            };
        }

        let token = match &self.role {
            Some((cluster, role)) => {
                let role_name = cluster.token_role_name(*role);
                auth.set_client_token(Some(init_token));
                let request = TokenCreateRequest {
                    display_name: role.to_string(),
                    ttl: None,
                    period: None,
                    policies: Vec::new(),
                };
                let created = auth
                    .create_with_role(&role_name, &request)
                    .await
                    .map_err(|e| {
                        InstanceTokenError::backend(e, |source| InstanceTokenError::Create {
                            role: role_name.clone(),
                            source,
                        })
                    })?;
                tracing::info!("created instance token through role '{}'", role_name);
                created.client_token
            }
            None => init_token,
        };

        write_token_file(&self.token_path(), &token)?;
        wipe(&self.init_token_path())?;
        auth.set_client_token(Some(token.clone()));
        Ok(token)
    }
}

fn read_token_file(path: &Path) -> Result<String, InstanceTokenError> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(contents.trim().to_string()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
        Err(source) => Err(InstanceTokenError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Replace a token file, keeping the mode and owner an operator gave it
fn write_token_file(path: &Path, token: &str) -> Result<(), InstanceTokenError> {
    let (mode, ownership) = match fs::metadata(path) {
        Ok(meta) => (
            meta.permissions().mode() & 0o777,
            Ownership {
                uid: Uid::from_raw(meta.uid()),
                gid: Gid::from_raw(meta.gid()),
            },
        ),
        Err(_) => (PRIVATE_MODE, Ownership::default()),
    };
    write_file(path, token.as_bytes(), mode, &ownership)?;
    Ok(())
}

fn wipe(path: &Path) -> Result<(), InstanceTokenError> {
    match OpenOptions::new().write(true).truncate(true).open(path) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(InstanceTokenError::Wipe {
            path: path.to_path_buf(),
            source,
        }),
    }
}

//! Reconciliation of every backend resource a cluster needs
//!
//! [`Cluster::ensure`] runs a fixed, ordered list of steps:
//!
//! 1. the generic secrets mount and the service-account key
//! 2. the three PKI tiers: mount, tuning, CA, signing roles
//! 3. the node-role policies
//! 4. per node role: token role, creator policy and init token
//!
//! Policies and token roles only name paths created by steps 1 and 2, which
//!  is the one real ordering constraint. Every step runs even when an
//!  earlier one fails; failures are collected into [`EnsureErrors`].

use std::collections::BTreeMap;
use std::fmt;

mod id;
pub mod init_token;
pub mod mount;
pub mod paths;
pub mod pki;
pub mod policy;
pub mod secrets;
mod validity;

pub use id::{ClusterId, NodeRole, PkiTier};
pub use init_token::{InitToken, InitTokenError};
pub use mount::{MountError, MountKind, MountSpec};
pub use paths::ResourcePath;
pub use pki::{PkiEngine, PkiError, PkiRole};
pub use policy::{Policy, PolicyError};
pub use secrets::{SecretsEngine, SecretsError, SERVICE_ACCOUNT_KEY_BITS};
pub use validity::{parse_duration, Validity};

use crate::backend::Backend;

/// Invalid operator input
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid cluster id '{0}': {1}")]
    InvalidClusterId(String, &'static str),
    #[error("invalid role '{0}', expected one of etcd, master, worker, all")]
    InvalidRole(String),
    #[error("invalid duration '{0}'")]
    InvalidDuration(String),
}

/// A single failed reconciliation step
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("secrets {path}: {source}")]
    Secrets {
        path: ResourcePath,
        #[source]
        source: SecretsError,
    },
    #[error("backend {path}: {source}")]
    Pki {
        path: ResourcePath,
        #[source]
        source: PkiError,
    },
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error("init token {role}: {source}")]
    InitToken {
        role: NodeRole,
        #[source]
        source: InitTokenError,
    },
}

/// Every failure collected while reconciling
#[derive(Debug, Default)]
pub struct EnsureErrors(Vec<ReconcileError>);

impl EnsureErrors {
    pub fn push(&mut self, err: ReconcileError) {
        self.0.push(err);
    }

    pub fn extend(&mut self, other: EnsureErrors) {
        self.0.extend(other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn errors(&self) -> &[ReconcileError] {
        &self.0
    }

    pub fn into_result(self) -> Result<(), EnsureErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for EnsureErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.len() {
            1 => write!(f, "1 error occurred:")?,
            n => write!(f, "{} errors occurred:", n)?,
        }
        for err in &self.0 {
            write!(f, "\n\t* {}", err)?;
        }
        write!(f, "\n\n")
    }
}

impl std::error::Error for EnsureErrors {}

impl From<ReconcileError> for EnsureErrors {
    fn from(err: ReconcileError) -> Self {
        Self(vec![err])
    }
}

/// Settings of a cluster's resources
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterConfig {
    pub validity: Validity,
    pub service_account_key_bits: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            validity: Validity::default(),
            service_account_key_bits: SERVICE_ACCOUNT_KEY_BITS,
        }
    }
}

/// All resources of one cluster
#[derive(Debug, Clone)]
pub struct Cluster {
    id: ClusterId,
    secrets: SecretsEngine,
    pkis: Vec<PkiEngine>,
    init_tokens: BTreeMap<NodeRole, InitToken>,
}

impl Cluster {
    pub fn new(id: ClusterId, config: ClusterConfig) -> Self {
        let secrets = SecretsEngine::new(id.clone(), config.service_account_key_bits);
        let pkis = PkiTier::ALL
            .into_iter()
            .map(|tier| PkiEngine::new(id.clone(), tier, config.validity))
            .collect();
        let init_tokens = NodeRole::ALL
            .into_iter()
            .map(|role| (role, InitToken::new(id.clone(), role, config.validity)))
            .collect();

        Self {
            id,
            secrets,
            pkis,
            init_tokens,
        }
    }

    pub fn id(&self) -> &ClusterId {
        &self.id
    }

    pub fn pki(&self, tier: PkiTier) -> Option<&PkiEngine> {
        self.pkis.iter().find(|pki| pki.tier() == tier)
    }

    pub fn init_token_mut(&mut self, role: NodeRole) -> Option<&mut InitToken> {
        self.init_tokens.get_mut(&role)
    }

    /// Converge every resource of the cluster
    pub async fn ensure<B>(&mut self, backend: &B) -> Result<(), EnsureErrors>
    where
        B: Backend + ?Sized,
    {
        let mut errors = EnsureErrors::default();

        // 1. secrets
        if let Err(source) = self.secrets.ensure(backend).await {
            errors.push(ReconcileError::Secrets {
                path: self.id.secrets_mount(),
                source,
            });
        }

        // 2. certificate authorities
        for pki in &self.pkis {
            if let Err(source) = pki.ensure(backend).await {
                errors.push(ReconcileError::Pki {
                    path: pki.path(),
                    source,
                });
            }
        }

        // 3. node policies, naming paths from 1 and 2
        if let Err(policy_errors) = policy::ensure_policies(backend, &self.id).await {
            for err in policy_errors {
                errors.push(err.into());
            }
        }

        // 4. token roles, creator policies and init tokens
        for init_token in self.init_tokens.values_mut() {
            if let Err(init_errors) = init_token.ensure(backend).await {
                errors.extend(init_errors);
            }
        }

        errors.into_result()
    }

    /// Whether [`Cluster::ensure`] would change anything, checking every step
    pub async fn ensure_dry_run<B>(&self, backend: &B) -> Result<bool, EnsureErrors>
    where
        B: Backend + ?Sized,
    {
        let mut errors = EnsureErrors::default();
        let mut changes = false;

        match self.secrets.ensure_dry_run(backend).await {
            Ok(changed) => changes |= changed,
            Err(source) => errors.push(ReconcileError::Secrets {
                path: self.id.secrets_mount(),
                source,
            }),
        }

        for pki in &self.pkis {
            match pki.ensure_dry_run(backend).await {
                Ok(changed) => changes |= changed,
                Err(source) => errors.push(ReconcileError::Pki {
                    path: pki.path(),
                    source,
                }),
            }
        }

        for policy in policy::node_policies(&self.id) {
            match policy.needs_write(backend).await {
                Ok(changed) => changes |= changed,
                Err(err) => errors.push(err.into()),
            }
        }

        for init_token in self.init_tokens.values() {
            match init_token.ensure_dry_run(backend).await {
                Ok(changed) => changes |= changed,
                Err(source) => errors.push(ReconcileError::InitToken {
                    role: init_token.role(),
                    source,
                }),
            }
        }

        errors.into_result().map(|()| changes)
    }

    /// Init token of every node role, creating missing ones
    pub async fn init_tokens<B>(
        &mut self,
        backend: &B,
    ) -> Result<BTreeMap<NodeRole, String>, EnsureErrors>
    where
        B: Backend + ?Sized,
    {
        let mut errors = EnsureErrors::default();
        let mut tokens = BTreeMap::new();
        for (role, init_token) in self.init_tokens.iter_mut() {
            match init_token.init_token(backend).await {
                Ok(token) => {
                    tokens.insert(*role, token);
                }
                Err(source) => errors.push(ReconcileError::InitToken {
                    role: *role,
                    source,
                }),
            }
        }
        errors.into_result().map(|()| tokens)
    }

    /// Use an operator-supplied init token for a role on the next
    ///  [`Cluster::ensure`]
    pub fn request_init_token(&mut self, role: NodeRole, token: impl Into<String>) {
        if let Some(init_token) = self.init_tokens.get_mut(&role) {
            init_token.request_token(token);
        }
    }

    /// Store an operator-supplied init token for a role right away
    pub async fn set_init_token<B>(
        &mut self,
        backend: &B,
        role: NodeRole,
        token: &str,
    ) -> Result<(), InitTokenError>
    where
        B: Backend + ?Sized,
    {
        match self.init_tokens.get_mut(&role) {
            Some(init_token) => init_token.set_init_token_store(backend, token).await,
            None => Ok(()),
        }
    }
}

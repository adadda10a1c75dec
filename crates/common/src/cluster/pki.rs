use std::time::Duration;

use serde_json::{json, Value};

use crate::backend::{
    settings_match, ttl_string, BackendError, MountTuning, SecretData, SecretStore, SysAdmin,
};

use super::mount::{MountError, MountKind, MountSpec};
use super::paths::ResourcePath;
use super::{ClusterId, PkiTier, Validity};

#[derive(Debug, thiserror::Error)]
pub enum PkiError {
    #[error(transparent)]
    Mount(#[from] MountError),
    #[error("error reading ca path '{path}': {source}")]
    ReadCa {
        path: ResourcePath,
        #[source]
        source: BackendError,
    },
    #[error("error writing new CA at '{path}': {source}")]
    GenerateCa {
        path: ResourcePath,
        #[source]
        source: BackendError,
    },
    #[error("error reading role '{role}' from '{path}': {source}")]
    ReadRole {
        role: String,
        path: ResourcePath,
        #[source]
        source: BackendError,
    },
    #[error("error writing role '{role}' to '{path}': {source}")]
    WriteRole {
        role: String,
        path: ResourcePath,
        #[source]
        source: BackendError,
    },
}

/// A signing role on one of the PKI mounts
#[derive(Debug, Clone, PartialEq)]
pub struct PkiRole {
    pub name: &'static str,
    pub validity: Duration,
    pub server: bool,
    pub client: bool,
    /// Organization stamped on issued certificates (e.g. `system:nodes`)
    pub organization: Option<&'static str>,
}

impl PkiRole {
    fn new(name: &'static str, validity: Duration, server: bool, client: bool) -> Self {
        Self {
            name,
            validity,
            server,
            client,
            organization: None,
        }
    }

    fn with_organization(mut self, organization: &'static str) -> Self {
        self.organization = Some(organization);
        self
    }

    /// Parameters written to `roles/<name>`
    ///
    /// Names come from the sign request rather than the CSR, and any name is
    ///  allowed; access is restricted by who may reach the sign path.
    pub fn data(&self) -> SecretData {
        let ttl = ttl_string(self.validity);
        let mut data = SecretData::new();
        data.insert("use_csr_common_name".to_string(), json!(false));
        data.insert("use_csr_sans".to_string(), json!(false));
        data.insert("enforce_hostnames".to_string(), json!(false));
        data.insert("allow_any_name".to_string(), json!(true));
        data.insert("allow_ip_sans".to_string(), json!(true));
        data.insert("server_flag".to_string(), json!(self.server));
        data.insert("client_flag".to_string(), json!(self.client));
        data.insert("max_ttl".to_string(), json!(ttl));
        data.insert("ttl".to_string(), Value::String(ttl));
        if let Some(organization) = self.organization {
            data.insert("organization".to_string(), json!(organization));
        }
        data
    }
}

/// What [`PkiEngine::ensure`] changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PkiOutcome {
    pub mount_created: bool,
    pub tuned: bool,
    pub ca_generated: bool,
    pub roles_written: usize,
}

/// One certificate authority of a cluster, backed by a PKI mount
#[derive(Debug, Clone)]
pub struct PkiEngine {
    cluster: ClusterId,
    tier: PkiTier,
    validity: Validity,
}

impl PkiEngine {
    pub fn new(cluster: ClusterId, tier: PkiTier, validity: Validity) -> Self {
        Self {
            cluster,
            tier,
            validity,
        }
    }

    pub fn tier(&self) -> PkiTier {
        self.tier
    }

    pub fn path(&self) -> ResourcePath {
        self.cluster.pki_mount(self.tier)
    }

    fn description(&self) -> String {
        format!("Kubernetes {}/{} CA", self.cluster, self.tier)
    }

    /// Both lease TTLs of the mount follow the CA validity
    pub fn mount_spec(&self) -> MountSpec {
        MountSpec {
            path: self.path(),
            kind: MountKind::Pki,
            description: self.description(),
            tuning: Some(MountTuning::uniform(self.validity.ca)),
        }
    }

    /// Signing roles served by this tier
    pub fn roles(&self) -> Vec<PkiRole> {
        let components = self.validity.components;
        match self.tier {
            PkiTier::EtcdK8s | PkiTier::EtcdOverlay => vec![
                PkiRole::new("client", components, false, true),
                PkiRole::new("server", components, true, true),
            ],
            PkiTier::K8s => vec![
                PkiRole::new("kube-apiserver", components, true, true),
                PkiRole::new("kube-scheduler", components, false, true),
                PkiRole::new("kube-controller-manager", components, false, true),
                PkiRole::new("kube-proxy", components, false, true),
                PkiRole::new("kubelet", components, true, true).with_organization("system:nodes"),
                PkiRole::new("admin", self.validity.admin, false, true)
                    .with_organization("system:masters"),
            ],
        }
    }

    /// Converge mount, tuning, CA and signing roles
    ///
    /// The CA is generated only when none is observed; an existing CA is
    ///  never replaced.
    pub async fn ensure<B>(&self, backend: &B) -> Result<PkiOutcome, PkiError>
    where
        B: SecretStore + SysAdmin + ?Sized,
    {
        let mount = self.mount_spec().ensure(backend).await?;
        let mut outcome = PkiOutcome {
            mount_created: mount.created,
            tuned: mount.tuned,
            ca_generated: false,
            roles_written: 0,
        };

        if self.ca_exists(backend).await? {
            tracing::debug!("CA already present at '{}'", self.path());
        } else {
            self.generate_ca(backend).await?;
            outcome.ca_generated = true;
        }

        for role in self.roles() {
            if self.role_matches(backend, &role).await? {
                continue;
            }
            self.write_role(backend, &role).await?;
            outcome.roles_written += 1;
        }

        Ok(outcome)
    }

    /// Whether [`PkiEngine::ensure`] would change the mount, its tuning,
    ///  the CA or a signing role
    pub async fn ensure_dry_run<B>(&self, backend: &B) -> Result<bool, PkiError>
    where
        B: SecretStore + SysAdmin + ?Sized,
    {
        if self.mount_spec().ensure_dry_run(backend).await? {
            return Ok(true);
        }
        if !self.ca_exists(backend).await? {
            return Ok(true);
        }
        for role in self.roles() {
            if !self.role_matches(backend, &role).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Whether the stored role already carries the desired parameters
    pub async fn role_matches<S>(&self, store: &S, role: &PkiRole) -> Result<bool, PkiError>
    where
        S: SecretStore + ?Sized,
    {
        let path = self.cluster.pki_role(self.tier, role.name);
        let current = store
            .read(path.as_str())
            .await
            .map_err(|source| PkiError::ReadRole {
                role: role.name.to_string(),
                path: path.clone(),
                source,
            })?;
        Ok(current
            .and_then(|secret| secret.data)
            .is_some_and(|data| settings_match(&role.data(), &data)))
    }

    /// A CA exists when `cert/ca` holds a non-empty certificate
    pub async fn ca_exists<S>(&self, store: &S) -> Result<bool, PkiError>
    where
        S: SecretStore + ?Sized,
    {
        let path = self.cluster.pki_ca(self.tier);
        let secret = store
            .read(path.as_str())
            .await
            .map_err(|source| PkiError::ReadCa {
                path: path.clone(),
                source,
            })?;

        Ok(secret
            .as_ref()
            .and_then(|secret| secret.str_field("certificate"))
            .map(|certificate| !certificate.is_empty())
            .unwrap_or(false))
    }

    async fn generate_ca<S>(&self, store: &S) -> Result<(), PkiError>
    where
        S: SecretStore + ?Sized,
    {
        let path = self.cluster.pki_generate(self.tier);
        let mut data = SecretData::new();
        data.insert("common_name".to_string(), json!(self.description()));
        data.insert("ttl".to_string(), json!(ttl_string(self.validity.ca)));
        data.insert("exclude_cn_from_sans".to_string(), json!(true));

        store
            .write(path.as_str(), data)
            .await
            .map_err(|source| PkiError::GenerateCa {
                path: path.clone(),
                source,
            })?;
        tracing::info!("generated CA '{}'", self.description());
        Ok(())
    }

    /// Write a signing role, replacing whatever is stored
    pub async fn write_role<S>(&self, store: &S, role: &PkiRole) -> Result<(), PkiError>
    where
        S: SecretStore + ?Sized,
    {
        let path = self.cluster.pki_role(self.tier, role.name);
        store
            .write(path.as_str(), role.data())
            .await
            .map_err(|source| PkiError::WriteRole {
                role: role.name.to_string(),
                path: self.path(),
                source,
            })?;
        tracing::debug!("wrote role '{}'", path);
        Ok(())
    }
}

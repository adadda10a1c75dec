use crate::backend::{BackendError, SysAdmin};

use super::{ClusterId, NodeRole, PkiTier};

/// Capabilities granted on signing and token-create paths
pub const SIGN_CAPABILITIES: [&str; 3] = ["create", "read", "update"];

const K8S_MASTER_ROLES: [&str; 4] = [
    "kube-apiserver",
    "kube-scheduler",
    "kube-controller-manager",
    "admin",
];

#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("error reading policy '{name}': {source}")]
    Read {
        name: String,
        #[source]
        source: BackendError,
    },
    #[error("error writing policy '{name}': {source}")]
    Write {
        name: String,
        #[source]
        source: BackendError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyPath {
    pub path: String,
    pub capabilities: Vec<&'static str>,
}

impl PolicyPath {
    pub fn new(path: impl ToString, capabilities: &[&'static str]) -> Self {
        Self {
            path: path.to_string(),
            capabilities: capabilities.to_vec(),
        }
    }
}

/// A named access policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    pub name: String,
    pub paths: Vec<PolicyPath>,
}

impl Policy {
    /// Render the policy document in HCL
    pub fn render(&self) -> String {
        self.paths
            .iter()
            .map(|entry| {
                let capabilities = entry
                    .capabilities
                    .iter()
                    .map(|c| format!("\"{}\"", c))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(
                    "path \"{}\" {{\n  capabilities = [{}]\n}}\n",
                    entry.path, capabilities
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn path_set(&self) -> impl Iterator<Item = &str> {
        self.paths.iter().map(|entry| entry.path.as_str())
    }

    /// Write the policy unless the backend already holds the same document
    ///
    /// Returns whether a write happened.
    pub async fn write<S>(&self, sys: &S) -> Result<bool, PolicyError>
    where
        S: SysAdmin + ?Sized,
    {
        let rules = self.render();
        let current = sys
            .get_policy(&self.name)
            .await
            .map_err(|source| PolicyError::Read {
                name: self.name.clone(),
                source,
            })?;
        if current.as_deref().map(str::trim) == Some(rules.trim()) {
            tracing::debug!("policy '{}' up to date", self.name);
            return Ok(false);
        }

        sys.put_policy(&self.name, &rules)
            .await
            .map_err(|source| PolicyError::Write {
                name: self.name.clone(),
                source,
            })?;
        tracing::info!("policy '{}' written", self.name);
        Ok(true)
    }

    /// Whether [`Policy::write`] would write
    pub async fn needs_write<S>(&self, sys: &S) -> Result<bool, PolicyError>
    where
        S: SysAdmin + ?Sized,
    {
        let current = sys
            .get_policy(&self.name)
            .await
            .map_err(|source| PolicyError::Read {
                name: self.name.clone(),
                source,
            })?;
        Ok(current.as_deref().map(str::trim) != Some(self.render().trim()))
    }
}

fn sign(cluster: &ClusterId, tier: PkiTier, role: &str) -> PolicyPath {
    PolicyPath::new(cluster.pki_sign(tier, role), &SIGN_CAPABILITIES)
}

pub fn etcd_policy(cluster: &ClusterId) -> Policy {
    Policy {
        name: cluster.policy_name(NodeRole::Etcd),
        paths: vec![
            sign(cluster, PkiTier::EtcdK8s, "server"),
            sign(cluster, PkiTier::EtcdOverlay, "server"),
        ],
    }
}

fn worker_paths(cluster: &ClusterId) -> Vec<PolicyPath> {
    vec![
        sign(cluster, PkiTier::K8s, "kubelet"),
        sign(cluster, PkiTier::K8s, "kube-proxy"),
        sign(cluster, PkiTier::EtcdOverlay, "client"),
    ]
}

pub fn worker_policy(cluster: &ClusterId) -> Policy {
    Policy {
        name: cluster.policy_name(NodeRole::Worker),
        paths: worker_paths(cluster),
    }
}

/// Masters get their own signing paths, read access to the service-account
///  key, and every worker path
pub fn master_policy(cluster: &ClusterId) -> Policy {
    let mut paths = vec![
        sign(cluster, PkiTier::EtcdK8s, "client"),
        PolicyPath::new(cluster.service_account_key(), &["read"]),
    ];
    paths.extend(
        K8S_MASTER_ROLES
            .iter()
            .map(|role| sign(cluster, PkiTier::K8s, role)),
    );
    paths.extend(worker_paths(cluster));

    Policy {
        name: cluster.policy_name(NodeRole::Master),
        paths,
    }
}

/// Policies of the three backend node roles, in write order
pub fn node_policies(cluster: &ClusterId) -> Vec<Policy> {
    vec![
        etcd_policy(cluster),
        master_policy(cluster),
        worker_policy(cluster),
    ]
}

/// Node policies a token created for `role` may carry
pub fn role_policies(cluster: &ClusterId, role: NodeRole) -> Vec<String> {
    match role {
        NodeRole::All => [NodeRole::Etcd, NodeRole::Master, NodeRole::Worker]
            .iter()
            .map(|role| cluster.policy_name(*role))
            .collect(),
        role => vec![cluster.policy_name(role)],
    }
}

/// Policy allowed to create tokens through the role's token role
pub fn creator_policy(cluster: &ClusterId, role: NodeRole) -> Policy {
    Policy {
        name: cluster.creator_policy_name(role),
        paths: vec![PolicyPath::new(
            cluster.token_create(role),
            &SIGN_CAPABILITIES,
        )],
    }
}

/// Write every node policy, attempting all of them
pub async fn ensure_policies<S>(sys: &S, cluster: &ClusterId) -> Result<(), Vec<PolicyError>>
where
    S: SysAdmin + ?Sized,
{
    let mut errors = Vec::new();
    for policy in node_policies(cluster) {
        if let Err(err) = policy.write(sys).await {
            errors.push(err);
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

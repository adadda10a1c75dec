//! Naming of every backend resource a cluster owns
//!
//! All paths derive from the cluster id by pure composition. For cluster `c`:
//!
//! | resource | path |
//! |---|---|
//! | PKI mount | `c/pki/<tier>` |
//! | CA read / generate | `c/pki/<tier>/cert/ca`, `c/pki/<tier>/root/generate/internal` |
//! | signing role / sign | `c/pki/<tier>/roles/<name>`, `c/pki/<tier>/sign/<name>` |
//! | secrets mount | `c/secrets` |
//! | service-account key | `c/secrets/service-accounts` |
//! | init-token store | `c/secrets/init_token_<role>` |
//! | policy / creator policy | `c/<role>`, `c/<role>-creator` |
//! | token role / create | `auth/token/roles/c-<role>`, `auth/token/create/c-<role>` |

use std::fmt;

use super::{ClusterId, NodeRole, PkiTier};

/// A slash-separated backend path, always kept in normalized form
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourcePath(String);

impl ResourcePath {
    pub fn new(path: &str) -> Self {
        Self(normalize(path))
    }

    /// Append one or more segments
    pub fn join(&self, segment: &str) -> Self {
        if self.0.is_empty() {
            return Self::new(segment);
        }
        Self::new(&format!("{}/{}", self.0, segment))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ResourcePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Strip leading, trailing and duplicate separators
///
/// Mount listings echo paths with a trailing `/`, and operators may pass
///  either form, so paths are compared in this form only.
pub fn normalize(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

pub fn same_path(a: &str, b: &str) -> bool {
    normalize(a) == normalize(b)
}

impl ClusterId {
    pub fn root(&self) -> ResourcePath {
        ResourcePath::new(self.as_str())
    }

    pub fn pki_mount(&self, tier: PkiTier) -> ResourcePath {
        self.root().join("pki").join(tier.as_str())
    }

    pub fn pki_ca(&self, tier: PkiTier) -> ResourcePath {
        self.pki_mount(tier).join("cert/ca")
    }

    pub fn pki_generate(&self, tier: PkiTier) -> ResourcePath {
        self.pki_mount(tier).join("root/generate/internal")
    }

    pub fn pki_role(&self, tier: PkiTier, role: &str) -> ResourcePath {
        self.pki_mount(tier).join("roles").join(role)
    }

    pub fn pki_sign(&self, tier: PkiTier, role: &str) -> ResourcePath {
        self.pki_mount(tier).join("sign").join(role)
    }

    pub fn secrets_mount(&self) -> ResourcePath {
        self.root().join("secrets")
    }

    pub fn service_account_key(&self) -> ResourcePath {
        self.secrets_mount().join("service-accounts")
    }

    pub fn init_token_store(&self, role: NodeRole) -> ResourcePath {
        self.secrets_mount()
            .join(&format!("init_token_{}", role.as_str()))
    }

    /// Name of the policy granting a node role its signing paths
    pub fn policy_name(&self, role: NodeRole) -> String {
        format!("{}/{}", self.as_str(), role.as_str())
    }

    /// Name of the policy allowed to create tokens through a role
    pub fn creator_policy_name(&self, role: NodeRole) -> String {
        format!("{}-creator", self.policy_name(role))
    }

    /// Name of the token role of a node role (`c-<role>`)
    pub fn token_role_name(&self, role: NodeRole) -> String {
        format!("{}-{}", self.as_str(), role.as_str())
    }

    pub fn token_role(&self, role: NodeRole) -> ResourcePath {
        ResourcePath::new("auth/token/roles").join(&self.token_role_name(role))
    }

    pub fn token_create(&self, role: NodeRole) -> ResourcePath {
        ResourcePath::new("auth/token/create").join(&self.token_role_name(role))
    }

    pub fn token_path_suffix(&self, role: NodeRole) -> String {
        self.policy_name(role)
    }
}

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Identifier of a cluster, lowercase letters, digits and dashes only
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClusterId(String);

impl ClusterId {
    pub fn new(id: impl Into<String>) -> Result<Self, ConfigError> {
        let id = id.into();
        if id.is_empty() {
            return Err(ConfigError::InvalidClusterId(id, "must not be empty"));
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(ConfigError::InvalidClusterId(
                id,
                "only lowercase letters, digits and '-' are allowed",
            ));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ClusterId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ClusterId {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ClusterId> for String {
    fn from(id: ClusterId) -> Self {
        id.0
    }
}

/// Role a node plays in the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Etcd,
    Master,
    Worker,
    All,
}

impl NodeRole {
    pub const ALL: [NodeRole; 4] = [
        NodeRole::Etcd,
        NodeRole::Master,
        NodeRole::Worker,
        NodeRole::All,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::Etcd => "etcd",
            NodeRole::Master => "master",
            NodeRole::Worker => "worker",
            NodeRole::All => "all",
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeRole {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeRole::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| ConfigError::InvalidRole(s.to_string()))
    }
}

/// One of the three certificate authorities of a cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PkiTier {
    /// etcd serving the Kubernetes API
    EtcdK8s,
    /// etcd serving the overlay network
    EtcdOverlay,
    /// Kubernetes components
    K8s,
}

impl PkiTier {
    pub const ALL: [PkiTier; 3] = [PkiTier::EtcdK8s, PkiTier::EtcdOverlay, PkiTier::K8s];

    pub fn as_str(&self) -> &'static str {
        match self {
            PkiTier::EtcdK8s => "etcd-k8s",
            PkiTier::EtcdOverlay => "etcd-overlay",
            PkiTier::K8s => "k8s",
        }
    }
}

impl fmt::Display for PkiTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_id_validation() {
        assert!(ClusterId::new("test-cluster-01").is_ok());
        assert!(ClusterId::new("").is_err());
        assert!(ClusterId::new("Test").is_err());
        assert!(ClusterId::new("a/b").is_err());
        assert!(ClusterId::new("a_b").is_err());
    }

    #[test]
    fn test_cluster_id_error_message() {
        let err = ClusterId::new("Bad").unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid cluster id 'Bad': only lowercase letters, digits and '-' are allowed"
        );
    }

    #[test]
    fn test_node_role_parse() {
        assert_eq!("worker".parse::<NodeRole>().unwrap(), NodeRole::Worker);
        assert_eq!("all".parse::<NodeRole>().unwrap(), NodeRole::All);
        assert!("admin".parse::<NodeRole>().is_err());
    }
}

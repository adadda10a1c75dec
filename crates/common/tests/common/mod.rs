//! Shared test utilities for reconciliation and node lifecycle tests
#![allow(dead_code)]

use std::fs;
use std::path::Path;

use common::backend::{MemoryBackend, TokenAuth};
use common::cert::{CertRequest, Ownership};
use common::cluster::{Cluster, ClusterConfig, ClusterId, NodeRole, PkiTier};
use common::crypto::{KeySpec, KeyType};
use common::instance_token::InstanceToken;
use tempfile::TempDir;

pub const CLUSTER: &str = "test-cluster";

/// Default settings with a smaller service-account key
pub fn config() -> ClusterConfig {
    ClusterConfig {
        service_account_key_bits: 2048,
        ..Default::default()
    }
}

pub fn cluster_id() -> ClusterId {
    ClusterId::new(CLUSTER).unwrap()
}

/// A backend with every resource of the test cluster in place
pub async fn setup_cluster() -> (MemoryBackend, Cluster) {
    let backend = MemoryBackend::new();
    let mut cluster = Cluster::new(cluster_id(), config());
    cluster.ensure(&backend).await.unwrap();
    (backend, cluster)
}

/// A node of `role`: its own backend handle, bootstrapped from the role's
///  init token, and the directory holding its token files
pub async fn setup_node(
    backend: &MemoryBackend,
    cluster: &mut Cluster,
    role: NodeRole,
) -> (MemoryBackend, InstanceToken, TempDir) {
    let config_dir = TempDir::new().unwrap();
    let tokens = cluster.init_tokens(backend).await.unwrap();
    fs::write(config_dir.path().join("init-token"), &tokens[&role]).unwrap();

    let node = backend.client();
    let instance = InstanceToken::new(config_dir.path()).with_role(cluster_id(), role);
    instance.token_renew_run(&node).await.unwrap();
    assert!(node.client_token().is_some());

    (node, instance, config_dir)
}

/// Request for a kubelet certificate written under `dir`
pub fn kubelet_request(dir: &Path) -> CertRequest {
    CertRequest {
        sign_path: cluster_id()
            .pki_sign(PkiTier::K8s, "kubelet")
            .to_string(),
        common_name: "system:node:worker-1".to_string(),
        ip_sans: vec!["10.0.0.11".parse().unwrap()],
        san_hosts: vec!["worker-1".to_string(), "worker-1.cluster.local".to_string()],
        key_spec: KeySpec {
            key_type: KeyType::Rsa,
            bits: 2048,
        },
        destination: dir.join("pki/kubelet"),
        ownership: Ownership::default(),
    }
}

pub fn file_mode(path: &Path) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path).unwrap().permissions().mode() & 0o777
}

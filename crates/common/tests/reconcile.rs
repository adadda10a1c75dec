//! Integration tests for cluster reconciliation

mod common;

use ::common::backend::{MemoryBackend, SecretStore, SysAdmin};
use ::common::cluster::{Cluster, NodeRole, PkiTier};

#[tokio::test]
async fn test_second_ensure_changes_nothing() {
    let backend = MemoryBackend::new();
    let mut cluster = Cluster::new(common::cluster_id(), common::config());

    assert!(cluster.ensure_dry_run(&backend).await.unwrap());
    cluster.ensure(&backend).await.unwrap();
    let first = backend.counters();
    assert_eq!(first.mounts, 4);
    assert_eq!(first.ca_generations, 3);
    assert_eq!(first.tokens_created, 4);
    // 10 signing roles across the three CAs, 4 token roles
    assert_eq!(first.role_writes, 14);

    assert!(!cluster.ensure_dry_run(&backend).await.unwrap());

    // a fresh process starts without cached init tokens
    let mut again = Cluster::new(common::cluster_id(), common::config());
    again.ensure(&backend).await.unwrap();
    let second = backend.counters();
    assert_eq!(second.mounts, first.mounts);
    assert_eq!(second.tunes, first.tunes);
    assert_eq!(second.ca_generations, first.ca_generations);
    assert_eq!(second.policy_writes, first.policy_writes);
    assert_eq!(second.role_writes, first.role_writes);
    assert_eq!(second.secret_writes, first.secret_writes);
    assert_eq!(second.tokens_created, first.tokens_created);
}

#[tokio::test]
async fn test_ca_survives_reconciliation() {
    let (backend, _) = common::setup_cluster().await;
    let mount = common::cluster_id().pki_mount(PkiTier::EtcdOverlay);
    let ca = backend.ca_certificate(mount.as_str()).unwrap();

    let mut cluster = Cluster::new(common::cluster_id(), common::config());
    cluster.ensure(&backend).await.unwrap();
    assert_eq!(backend.ca_certificate(mount.as_str()).unwrap(), ca);
}

#[tokio::test]
async fn test_service_account_key_survives_reconciliation() {
    let (backend, mut cluster) = common::setup_cluster().await;
    let path = common::cluster_id().service_account_key();
    let key = backend.read(path.as_str()).await.unwrap().unwrap();

    cluster.ensure(&backend).await.unwrap();
    assert_eq!(backend.read(path.as_str()).await.unwrap().unwrap(), key);
}

#[tokio::test]
async fn test_failures_are_collected() {
    let backend = MemoryBackend::new();
    backend.fail_on("test-cluster/pki/k8s/cert");
    backend.fail_on("sys/policy/test-cluster/master");

    let mut cluster = Cluster::new(common::cluster_id(), common::config());
    let errors = cluster.ensure(&backend).await.unwrap_err();

    // k8s CA read, master policy, master creator policy
    assert_eq!(errors.len(), 3);
    assert!(errors.to_string().starts_with("3 errors occurred:\n\t* "));

    // everything else still converged
    assert!(backend.get_policy("test-cluster/worker").await.unwrap().is_some());
    assert!(backend
        .ca_certificate(common::cluster_id().pki_mount(PkiTier::EtcdK8s).as_str())
        .is_some());
    assert!(backend
        .read("test-cluster/secrets/init_token_master")
        .await
        .unwrap()
        .is_some());

    backend.clear_failures();
    cluster.ensure(&backend).await.unwrap();
}

#[tokio::test]
async fn test_sealed_backend_fails_every_step() {
    let backend = MemoryBackend::new();
    backend.seal();
    let mut cluster = Cluster::new(common::cluster_id(), common::config());
    let errors = cluster.ensure(&backend).await.unwrap_err();
    assert!(errors.len() > 1);
    assert_eq!(backend.counters().mounts, 0);
}

#[tokio::test]
async fn test_operator_init_token_is_kept() {
    let (backend, mut cluster) = common::setup_cluster().await;
    let before = cluster.init_tokens(&backend).await.unwrap();

    cluster
        .set_init_token(&backend, NodeRole::Etcd, "operator-etcd-token")
        .await
        .unwrap();
    cluster.ensure(&backend).await.unwrap();

    let mut fresh = Cluster::new(common::cluster_id(), common::config());
    let after = fresh.init_tokens(&backend).await.unwrap();
    assert_eq!(after[&NodeRole::Etcd], "operator-etcd-token");
    assert_eq!(after[&NodeRole::Worker], before[&NodeRole::Worker]);
    assert!(!backend.token_exists(&before[&NodeRole::Etcd]));
}

#[tokio::test]
async fn test_master_may_sign_worker_paths_but_not_the_reverse() {
    let (backend, mut cluster) = common::setup_cluster().await;
    let (master, _, _master_dir) =
        common::setup_node(&backend, &mut cluster, NodeRole::Master).await;
    let (worker, _, _worker_dir) =
        common::setup_node(&backend, &mut cluster, NodeRole::Worker).await;

    let dir = tempfile::tempdir().unwrap();
    let mut request = common::kubelet_request(dir.path());
    request.run(&master).await.unwrap();
    request.run(&worker).await.unwrap();

    request.sign_path = common::cluster_id()
        .pki_sign(PkiTier::K8s, "kube-apiserver")
        .to_string();
    request.run(&master).await.unwrap();
    assert!(matches!(
        request.run(&worker).await,
        Err(::common::cert::CertError::PermissionDenied { .. })
    ));

    let key_path = common::cluster_id().service_account_key();
    assert!(master.read(key_path.as_str()).await.is_ok());
    assert!(worker
        .read(key_path.as_str())
        .await
        .unwrap_err()
        .is_permission_denied());
}

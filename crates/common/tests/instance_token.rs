//! Integration tests for the instance token lifecycle

mod common;

use std::fs;

use ::common::backend::{memory::ROOT_TOKEN, TokenAuth};
use ::common::cluster::NodeRole;
use ::common::instance_token::{InstanceToken, InstanceTokenError};

#[tokio::test]
async fn test_bootstrap_then_renew() {
    let (backend, mut cluster) = common::setup_cluster().await;
    let (node, instance, _config) =
        common::setup_node(&backend, &mut cluster, NodeRole::Worker).await;

    let token = instance.token().unwrap();
    assert!(!token.is_empty());
    assert_eq!(instance.init_token().unwrap(), "");
    assert!(instance.init_token_path().exists());
    assert_eq!(
        backend.token_policies(&token).unwrap(),
        vec!["test-cluster/worker", "default"]
    );

    let renewed = instance.token_renew_run(&node).await.unwrap();
    assert_eq!(renewed, token);
    assert_eq!(backend.counters().renewals, 1);
    assert_eq!(node.client_token().as_deref(), Some(token.as_str()));
}

#[tokio::test]
async fn test_wiped_files_force_new_bootstrap() {
    let (backend, mut cluster) = common::setup_cluster().await;
    let (node, instance, _config) =
        common::setup_node(&backend, &mut cluster, NodeRole::Etcd).await;
    let first = instance.token().unwrap();

    let init_tokens = cluster.init_tokens(&backend).await.unwrap();
    fs::write(instance.token_path(), "").unwrap();
    fs::write(instance.init_token_path(), &init_tokens[&NodeRole::Etcd]).unwrap();

    let second = instance.token_renew_run(&node).await.unwrap();
    assert_ne!(second, first);
    assert_eq!(instance.token().unwrap(), second);
    assert_eq!(instance.init_token().unwrap(), "");
}

#[tokio::test]
async fn test_root_token_is_not_renewable() {
    let (backend, _) = common::setup_cluster().await;
    let config = tempfile::tempdir().unwrap();
    fs::write(config.path().join("init-token"), ROOT_TOKEN).unwrap();

    let instance = InstanceToken::new(config.path());
    let node = backend.client();
    assert_eq!(instance.current_token(&node).await.unwrap(), ROOT_TOKEN);

    let err = instance.token_renew_run(&node).await.unwrap_err();
    assert!(err
        .to_string()
        .starts_with("error renewing tokens: token not renewable: "));
    assert!(matches!(err, InstanceTokenError::NotRenewable(id) if id == ROOT_TOKEN));
}

#[tokio::test]
async fn test_sealed_backend_keeps_token() {
    let (backend, mut cluster) = common::setup_cluster().await;
    let (node, instance, _config) =
        common::setup_node(&backend, &mut cluster, NodeRole::Master).await;
    let token = instance.token().unwrap();

    backend.seal();
    assert!(matches!(
        instance.token_renew_run(&node).await,
        Err(InstanceTokenError::Sealed(_))
    ));
    assert_eq!(instance.token().unwrap(), token);

    backend.unseal();
    instance.token_renew_run(&node).await.unwrap();
}

#[tokio::test]
async fn test_exchange_rejected_for_wrong_role() {
    let (backend, mut cluster) = common::setup_cluster().await;
    let init_tokens = cluster.init_tokens(&backend).await.unwrap();

    // the worker init token may only create worker tokens
    let config = tempfile::tempdir().unwrap();
    fs::write(
        config.path().join("init-token"),
        &init_tokens[&NodeRole::Worker],
    )
    .unwrap();
    let instance = InstanceToken::new(config.path()).with_role(common::cluster_id(), NodeRole::Master);
    let err = instance
        .token_renew_run(&backend.client())
        .await
        .unwrap_err();
    assert!(matches!(err, InstanceTokenError::Create { .. }));
    assert_eq!(instance.token().unwrap(), "");
    assert_eq!(instance.init_token().unwrap(), init_tokens[&NodeRole::Worker]);
}

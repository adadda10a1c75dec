use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use clap::Args;

use common::backend::Backend;
use common::cluster::{
    parse_duration, Cluster, ClusterConfig, ClusterId, EnsureErrors, NodeRole, Validity,
};

#[derive(Args, Debug, Clone)]
pub struct Setup {
    /// Cluster to reconcile (lowercase letters, digits and '-')
    pub cluster_id: ClusterId,

    /// Maximum validity of the certificate authorities
    #[arg(long, value_parser = parse_duration)]
    pub max_validity_ca: Option<Duration>,

    /// Maximum validity of admin certificates
    #[arg(long, value_parser = parse_duration)]
    pub max_validity_admin: Option<Duration>,

    /// Maximum validity of component certificates and instance tokens
    #[arg(long, value_parser = parse_duration)]
    pub max_validity_components: Option<Duration>,

    /// Maximum validity of init tokens
    #[arg(long, value_parser = parse_duration)]
    pub max_validity_init_tokens: Option<Duration>,

    /// Use this init token for the etcd role
    #[arg(long)]
    pub init_token_etcd: Option<String>,

    /// Use this init token for the master role
    #[arg(long)]
    pub init_token_master: Option<String>,

    /// Use this init token for the worker role
    #[arg(long)]
    pub init_token_worker: Option<String>,

    /// Use this init token for the all role
    #[arg(long)]
    pub init_token_all: Option<String>,

    /// Only report whether anything would change
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error(transparent)]
    Ensure(#[from] EnsureErrors),
}

#[derive(Debug)]
pub enum SetupOutput {
    DryRun(bool),
    Applied(BTreeMap<NodeRole, String>),
}

impl fmt::Display for SetupOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetupOutput::DryRun(true) => write!(f, "changes needed"),
            SetupOutput::DryRun(false) => write!(f, "no changes needed"),
            SetupOutput::Applied(tokens) => {
                let lines: Vec<String> = tokens
                    .iter()
                    .map(|(role, token)| format!("{}: {}", role, token))
                    .collect();
                write!(f, "{}", lines.join("\n"))
            }
        }
    }
}

impl Setup {
    pub fn validity(&self) -> Validity {
        let defaults = Validity::default();
        Validity {
            ca: self.max_validity_ca.unwrap_or(defaults.ca),
            admin: self.max_validity_admin.unwrap_or(defaults.admin),
            components: self.max_validity_components.unwrap_or(defaults.components),
            init_tokens: self.max_validity_init_tokens.unwrap_or(defaults.init_tokens),
        }
    }

    fn init_token_overrides(&self) -> Vec<(NodeRole, &str)> {
        [
            (NodeRole::Etcd, &self.init_token_etcd),
            (NodeRole::Master, &self.init_token_master),
            (NodeRole::Worker, &self.init_token_worker),
            (NodeRole::All, &self.init_token_all),
        ]
        .into_iter()
        .filter_map(|(role, token)| {
            token
                .as_deref()
                .filter(|token| !token.is_empty())
                .map(|token| (role, token))
        })
        .collect()
    }

    /// Reconcile the cluster, storing operator-supplied init tokens in place
    ///  of creating new ones
    pub async fn run<B>(&self, backend: &B) -> Result<SetupOutput, SetupError>
    where
        B: Backend + ?Sized,
    {
        let config = ClusterConfig {
            validity: self.validity(),
            ..Default::default()
        };
        let mut cluster = Cluster::new(self.cluster_id.clone(), config);
        for (role, token) in self.init_token_overrides() {
            cluster.request_init_token(role, token);
        }

        if self.dry_run {
            let changes = cluster.ensure_dry_run(backend).await?;
            return Ok(SetupOutput::DryRun(changes));
        }

        cluster.ensure(backend).await?;
        tracing::info!("cluster '{}' reconciled", self.cluster_id);

        let tokens = cluster.init_tokens(backend).await?;
        Ok(SetupOutput::Applied(tokens))
    }
}

#[async_trait::async_trait]
impl crate::op::Op for Setup {
    type Error = SetupError;
    type Output = SetupOutput;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        self.run(&ctx.backend).await
    }
}

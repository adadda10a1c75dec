use std::error::Error;
use std::path::PathBuf;

use common::backend::{BackendError, HttpBackend, TokenAuth};
use common::instance_token::InstanceToken;

use crate::args::Args;
use crate::state::{NodeConfig, StateError};

#[derive(Debug, thiserror::Error)]
pub enum OpContextError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

#[derive(Clone)]
pub struct OpContext {
    /// Backend client, authenticated with `--vault-token` if one was given
    pub backend: HttpBackend,
    /// Directory holding config.toml and the token files
    pub config_path: PathBuf,
    /// Token from `--vault-token` / `VAULT_TOKEN`
    pub vault_token: Option<String>,
}

impl OpContext {
    /// Resolve the backend address and timeout, then build the client
    pub fn new(args: &Args) -> Result<Self, OpContextError> {
        let config = NodeConfig::load(&args.config_path)?;
        let remote = config.resolve_vault_addr(args.vault_addr.clone())?;
        let timeout = config.resolve_timeout(args.timeout)?;

        let backend = HttpBackend::new(&remote, timeout)?;
        let vault_token = args.vault_token.clone().filter(|token| !token.is_empty());
        backend.set_client_token(vault_token.clone());
        tracing::debug!("using backend at {}", remote);

        Ok(Self {
            backend,
            config_path: args.config_path.clone(),
            vault_token,
        })
    }

    /// The node's token files, falling back to `--vault-token`
    pub fn instance_token(&self) -> InstanceToken {
        InstanceToken::new(&self.config_path).with_fallback(self.vault_token.clone())
    }
}

#[async_trait::async_trait]
pub trait Op: Send + Sync {
    type Error: Error + Send + Sync + 'static;
    type Output;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error>;
}

#[macro_export]
macro_rules! command_enum {
    ($(($variant:ident, $type:ty)),* $(,)?) => {
        #[derive(Subcommand, Debug, Clone)]
        pub enum Command {
            $($variant($type),)*
        }

        #[derive(Debug)]
        pub enum OpOutput {
            $($variant(<$type as $crate::op::Op>::Output),)*
        }

        #[derive(Debug, thiserror::Error)]
        pub enum OpError {
            $(
                #[error(transparent)]
                $variant(<$type as $crate::op::Op>::Error),
            )*
        }

        #[async_trait::async_trait]
        impl $crate::op::Op for Command {
            type Output = OpOutput;
            type Error = OpError;

            async fn execute(&self, ctx: &$crate::op::OpContext) -> Result<Self::Output, Self::Error> {
                match self {
                    $(
                        Command::$variant(op) => {
                            op.execute(ctx).await
                                .map(OpOutput::$variant)
                                .map_err(OpError::$variant)
                        },
                    )*
                }
            }
        }

        impl std::fmt::Display for OpOutput {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(
                        OpOutput::$variant(output) => write!(f, "{}", output),
                    )*
                }
            }
        }
    };
}

use serde_json::{json, Value};

use crate::backend::{
    settings_match, ttl_string, Backend, BackendError, SecretData, SecretStore, TokenCreateRequest,
};

use super::paths::ResourcePath;
use super::policy::{creator_policy, role_policies, PolicyError};
use super::{ClusterId, EnsureErrors, NodeRole, ReconcileError, Validity};

/// Field under which the init token is stored
pub const INIT_TOKEN_FIELD: &str = "init_token";

#[derive(Debug, thiserror::Error)]
pub enum InitTokenError {
    #[error("error reading token role {path}: {source}")]
    ReadRole {
        path: ResourcePath,
        #[source]
        source: BackendError,
    },
    #[error("error writing token role {path}: {source}")]
    WriteRole {
        path: ResourcePath,
        #[source]
        source: BackendError,
    },
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error("error reading init token at {path}: {source}")]
    Read {
        path: ResourcePath,
        #[source]
        source: BackendError,
    },
    #[error("secret {path} doesn't contain a key 'init_token'")]
    MissingField { path: ResourcePath },
    #[error("secret {path} key 'init_token' is not a string")]
    WrongType { path: ResourcePath },
    #[error("failed to create init token: {0}")]
    Create(#[source] BackendError),
    #[error("failed to store init token in '{path}': {source}")]
    Store {
        path: ResourcePath,
        #[source]
        source: BackendError,
    },
}

/// Bootstrap token of one node role
///
/// The token is cached after the first successful [`InitToken::init_token`];
///  only [`InitToken::set_init_token_store`] replaces the cached value.
#[derive(Debug, Clone)]
pub struct InitToken {
    cluster: ClusterId,
    role: NodeRole,
    validity: Validity,
    token: Option<String>,
    /// Operator-supplied token that [`InitToken::ensure`] stores in place of
    ///  creating one
    requested: Option<String>,
}

impl InitToken {
    pub fn new(cluster: ClusterId, role: NodeRole, validity: Validity) -> Self {
        Self {
            cluster,
            role,
            validity,
            token: None,
            requested: None,
        }
    }

    /// Have [`InitToken::ensure`] store `token` instead of creating one
    pub fn request_token(&mut self, token: impl Into<String>) {
        self.requested = Some(token.into());
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    /// Token-role name (`<cluster>-<role>`)
    pub fn name(&self) -> String {
        self.cluster.token_role_name(self.role)
    }

    pub fn store_path(&self) -> ResourcePath {
        self.cluster.init_token_store(self.role)
    }

    /// Parameters of the token role nodes exchange their init token through
    pub fn token_role_data(&self) -> SecretData {
        let mut policies = role_policies(&self.cluster, self.role);
        policies.push("default".to_string());

        let mut data = SecretData::new();
        data.insert(
            "period".to_string(),
            json!(ttl_string(self.validity.components)),
        );
        data.insert("orphan".to_string(), json!(true));
        data.insert("allowed_policies".to_string(), json!(policies.join(",")));
        data.insert(
            "path_suffix".to_string(),
            json!(self.cluster.token_path_suffix(self.role)),
        );
        data
    }

    /// Write the token role and creator policy, then make sure an init token
    ///  exists. Every step is attempted.
    pub async fn ensure<B>(&mut self, backend: &B) -> Result<(), EnsureErrors>
    where
        B: Backend + ?Sized,
    {
        let mut errors = EnsureErrors::default();

        if let Err(err) = self.write_token_role(backend).await {
            errors.push(self.wrap(err));
        }
        if let Err(err) = creator_policy(&self.cluster, self.role).write(backend).await {
            errors.push(self.wrap(err.into()));
        }
        let stored = match self.requested.clone() {
            Some(token) => self.set_init_token_store(backend, &token).await,
            None => self.init_token(backend).await.map(|_| ()),
        };
        if let Err(err) = stored {
            errors.push(self.wrap(err));
        }

        errors.into_result()
    }

    /// Whether [`InitToken::ensure`] would change the token role, the
    ///  creator policy or the stored token
    pub async fn ensure_dry_run<B>(&self, backend: &B) -> Result<bool, InitTokenError>
    where
        B: Backend + ?Sized,
    {
        if !self.token_role_matches(backend).await? {
            return Ok(true);
        }
        if creator_policy(&self.cluster, self.role)
            .needs_write(backend)
            .await?
        {
            return Ok(true);
        }
        let stored = self.init_token_store(backend).await?;
        Ok(match &self.requested {
            Some(token) => stored.as_ref() != Some(token),
            None => stored.is_none(),
        })
    }

    /// Whether the stored token role already carries the desired parameters
    pub async fn token_role_matches<S>(&self, store: &S) -> Result<bool, InitTokenError>
    where
        S: SecretStore + ?Sized,
    {
        let path = self.cluster.token_role(self.role);
        let current = store
            .read(path.as_str())
            .await
            .map_err(|source| InitTokenError::ReadRole { path, source })?;
        Ok(current
            .and_then(|secret| secret.data)
            .is_some_and(|data| settings_match(&self.token_role_data(), &data)))
    }

    async fn write_token_role<S>(&self, store: &S) -> Result<(), InitTokenError>
    where
        S: SecretStore + ?Sized,
    {
        let path = self.cluster.token_role(self.role);
        if self.token_role_matches(store).await? {
            tracing::debug!("token role '{}' up to date", path);
            return Ok(());
        }
        store
            .write(path.as_str(), self.token_role_data())
            .await
            .map_err(|source| InitTokenError::WriteRole {
                path: path.clone(),
                source,
            })?;
        tracing::info!("wrote token role '{}'", path);
        Ok(())
    }

    /// The role's init token: cached, else stored, else newly created
    ///
    /// A new token is an orphan carrying only the creator policy, so it can
    ///  do nothing but create instance tokens through the role.
    pub async fn init_token<B>(&mut self, backend: &B) -> Result<String, InitTokenError>
    where
        B: Backend + ?Sized,
    {
        if let Some(token) = &self.token {
            return Ok(token.clone());
        }

        if let Some(token) = self.init_token_store(backend).await? {
            self.token = Some(token.clone());
            return Ok(token);
        }

        let ttl = ttl_string(self.validity.init_tokens);
        let request = TokenCreateRequest {
            display_name: self.name(),
            ttl: Some(ttl.clone()),
            period: Some(ttl),
            policies: vec![self.cluster.creator_policy_name(self.role)],
        };
        let auth = backend
            .create_orphan(&request)
            .await
            .map_err(InitTokenError::Create)?;
        self.store(backend, &auth.client_token).await?;
        tracing::info!("created init token for role '{}'", self.role);

        self.token = Some(auth.client_token.clone());
        Ok(auth.client_token)
    }

    /// The stored init token, if any
    pub async fn init_token_store<S>(&self, store: &S) -> Result<Option<String>, InitTokenError>
    where
        S: SecretStore + ?Sized,
    {
        let path = self.store_path();
        let secret = store
            .read(path.as_str())
            .await
            .map_err(|source| InitTokenError::Read {
                path: path.clone(),
                source,
            })?;
        let Some(secret) = secret else {
            return Ok(None);
        };

        match secret.field(INIT_TOKEN_FIELD) {
            None => Err(InitTokenError::MissingField { path }),
            Some(Value::String(token)) => Ok(Some(token.clone())),
            Some(_) => Err(InitTokenError::WrongType { path }),
        }
    }

    /// Replace the stored init token with an operator-supplied one
    ///
    /// The previous token is revoked on a best-effort basis. Storing the
    ///  token that is already stored is a no-op.
    pub async fn set_init_token_store<B>(
        &mut self,
        backend: &B,
        token: &str,
    ) -> Result<(), InitTokenError>
    where
        B: Backend + ?Sized,
    {
        let current = self.init_token_store(backend).await?;
        if current.as_deref() == Some(token) {
            tracing::debug!("init token for role '{}' unchanged", self.role);
            self.token = Some(token.to_string());
            return Ok(());
        }

        if let Some(old) = current {
            tracing::info!("token found in backend for role '{}'", self.role);
            match backend.revoke_orphan(&old).await {
                Ok(()) => tracing::info!("revoked init token of role '{}'", self.role),
                Err(err) => tracing::warn!(
                    "failed to revoke init token at path {}: {}",
                    self.store_path(),
                    err
                ),
            }
        }

        self.store(backend, token).await?;
        tracing::info!("user token written for role '{}'", self.role);
        self.token = Some(token.to_string());
        Ok(())
    }

    async fn store<S>(&self, store: &S, token: &str) -> Result<(), InitTokenError>
    where
        S: SecretStore + ?Sized,
    {
        let path = self.store_path();
        let mut data = SecretData::new();
        data.insert(INIT_TOKEN_FIELD.to_string(), json!(token));
        store
            .write(path.as_str(), data)
            .await
            .map_err(|source| InitTokenError::Store { path, source })?;
        Ok(())
    }

    fn wrap(&self, source: InitTokenError) -> ReconcileError {
        ReconcileError::InitToken {
            role: self.role,
            source,
        }
    }
}

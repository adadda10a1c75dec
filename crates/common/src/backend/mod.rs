//! Capabilities of the secret-management backend
//!
//! Every component takes the narrowest capability it needs:
//!
//! - [`SecretStore`]: read and write logical paths (secrets, PKI endpoints,
//!   token roles)
//! - [`SysAdmin`]: manage mounts and policies
//! - [`TokenAuth`]: create, revoke, look up and renew tokens
//!
//! [`Backend`] bundles all three and is implemented for anything that
//!  provides them. [`HttpBackend`] talks to a real server, [`MemoryBackend`]
//!  keeps everything in process for tests.

use std::collections::HashMap;

use async_trait::async_trait;

mod error;
pub mod http;
pub mod memory;
mod types;

pub use error::BackendError;
pub use http::HttpBackend;
pub use memory::MemoryBackend;
pub use types::{
    parse_ttl, read_back_shape, settings_match, split_list, ttl_string, MountConfigOutput,
    MountInput, MountOutput, MountTuning, Secret, SecretAuth, SecretData, TokenCreateRequest,
    TokenLookup,
};

/// Read and write logical paths
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Read a path, `None` when nothing is stored there
    async fn read(&self, path: &str) -> Result<Option<Secret>, BackendError>;

    /// Write a path; some endpoints answer with a secret (e.g. signing)
    async fn write(&self, path: &str, data: SecretData) -> Result<Option<Secret>, BackendError>;
}

/// Manage mounts and access policies
#[async_trait]
pub trait SysAdmin: Send + Sync {
    /// All mounts keyed by path, as echoed by the backend
    async fn list_mounts(&self) -> Result<HashMap<String, MountOutput>, BackendError>;

    async fn mount(&self, path: &str, input: &MountInput) -> Result<(), BackendError>;

    async fn tune_mount(&self, path: &str, tuning: &MountTuning) -> Result<(), BackendError>;

    async fn put_policy(&self, name: &str, rules: &str) -> Result<(), BackendError>;

    /// Current rules of a policy, `None` when it does not exist
    async fn get_policy(&self, name: &str) -> Result<Option<String>, BackendError>;
}

/// Manage tokens
///
/// The client token is the credential used for every subsequent call made
///  through this handle.
#[async_trait]
pub trait TokenAuth: Send + Sync {
    fn client_token(&self) -> Option<String>;

    fn set_client_token(&self, token: Option<String>);

    async fn create_orphan(&self, request: &TokenCreateRequest) -> Result<SecretAuth, BackendError>;

    /// Create a token through a token role (`auth/token/create/<role>`)
    async fn create_with_role(
        &self,
        role: &str,
        request: &TokenCreateRequest,
    ) -> Result<SecretAuth, BackendError>;

    async fn revoke_orphan(&self, token: &str) -> Result<(), BackendError>;

    async fn lookup_self(&self) -> Result<TokenLookup, BackendError>;

    async fn renew_self(&self) -> Result<SecretAuth, BackendError>;
}

/// Everything the reconcilers need from a backend
pub trait Backend: SecretStore + SysAdmin + TokenAuth {}

impl<T: SecretStore + SysAdmin + TokenAuth> Backend for T {}

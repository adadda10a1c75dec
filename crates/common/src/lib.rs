/**
 * Capabilities of the secret-management backend,
 *  with an HTTP client and an in-memory implementation.
 */
pub mod backend;
/**
 * Certificate issuance and renewal for a node:
 *  local key, CSR, sign call and file layout.
 */
pub mod cert;
/**
 * Reconciliation of a cluster's mounts, CAs,
 *  policies, token roles and init tokens.
 */
pub mod cluster;
/**
 * Node key generation and loading, CSRs and
 *  the service-account key.
 */
pub mod crypto;
/**
 * Bootstrap and renewal of the token a node
 *  authenticates with.
 */
pub mod instance_token;
/**
 * Helper for setting build version information
 *  at compile time.
 */
pub mod version;

pub mod prelude {
    pub use crate::backend::{Backend, BackendError, HttpBackend, MemoryBackend};
    pub use crate::cert::{CertError, CertRequest, Ownership, SignedCertificate};
    pub use crate::cluster::{Cluster, ClusterConfig, ClusterId, EnsureErrors, NodeRole, Validity};
    pub use crate::crypto::{KeySpec, KeyType, PrivateKey};
    pub use crate::instance_token::{InstanceToken, InstanceTokenError};
    pub use crate::version::BuildInfo;
}

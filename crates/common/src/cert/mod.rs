//! Certificate issuance and renewal for a node
//!
//! One [`CertRequest::run`] produces three files next to a destination
//!  prefix:
//!
//! - `<dest>-key.pem`: the private key (0600), generated once and reused
//! - `<dest>.pem`: the leaf certificate (0644), replaced on every run
//! - `<dest>-ca.pem`: the CA bundle (0644), replaced on every run
//!
//! The key never leaves the node. Only a CSR is sent to the sign endpoint,
//!  authenticated with whatever token the backend handle carries.

use std::ffi::OsString;
use std::io;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use serde_json::json;

use crate::backend::{BackendError, SecretData, SecretStore};
use crate::crypto::{KeyError, KeySpec, PrivateKey};

mod decode;
pub mod files;

pub use decode::SignedCertificate;
pub use files::{FileError, Ownership};

use files::{ensure_dir, write_file, PRIVATE_MODE, PUBLIC_MODE};

#[derive(Debug, thiserror::Error)]
pub enum CertError {
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error(transparent)]
    File(#[from] FileError),
    #[error("error reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("error signing at '{path}': {source}")]
    Unreachable {
        path: String,
        #[source]
        source: BackendError,
    },
    #[error("error signing at '{path}': {source}")]
    Sealed {
        path: String,
        #[source]
        source: BackendError,
    },
    #[error("error signing at '{path}': {source}")]
    PermissionDenied {
        path: String,
        #[source]
        source: BackendError,
    },
    #[error("error signing at '{path}': {source}")]
    Sign {
        path: String,
        #[source]
        source: BackendError,
    },
    #[error("malformed sign response: {0}")]
    Malformed(String),
}

impl CertError {
    fn from_sign(path: &str, source: BackendError) -> Self {
        let path = path.to_string();
        match source {
            BackendError::Unreachable(_) => CertError::Unreachable { path, source },
            BackendError::Sealed(_) => CertError::Sealed { path, source },
            BackendError::PermissionDenied(_) => CertError::PermissionDenied { path, source },
            _ => CertError::Sign { path, source },
        }
    }
}

/// Everything needed to obtain one certificate
#[derive(Debug, Clone)]
pub struct CertRequest {
    /// Sign endpoint, e.g. `<cluster>/pki/k8s/sign/kubelet`
    pub sign_path: String,
    pub common_name: String,
    pub ip_sans: Vec<IpAddr>,
    pub san_hosts: Vec<String>,
    pub key_spec: KeySpec,
    /// Prefix of the written files
    pub destination: PathBuf,
    pub ownership: Ownership,
}

impl CertRequest {
    pub fn key_path(&self) -> PathBuf {
        with_suffix(&self.destination, "-key.pem")
    }

    pub fn cert_path(&self) -> PathBuf {
        with_suffix(&self.destination, ".pem")
    }

    pub fn ca_path(&self) -> PathBuf {
        with_suffix(&self.destination, "-ca.pem")
    }

    /// Issue or renew the certificate
    ///
    /// The key is written as soon as it is generated, so a failed sign call
    ///  still leaves it in place for the next run. Nothing is retried.
    pub async fn run<S>(&self, store: &S) -> Result<SignedCertificate, CertError>
    where
        S: SecretStore + ?Sized,
    {
        self.key_spec.validate()?;

        if let Some(dir) = self.destination.parent() {
            if !dir.as_os_str().is_empty() {
                ensure_dir(dir, &self.ownership)?;
            }
        }

        let key = self.load_or_generate_key().await?;
        let csr = key.csr_pem(&self.common_name, &self.san_hosts, &self.ip_sans)?;

        let response = store
            .write(&self.sign_path, self.sign_data(csr))
            .await
            .map_err(|e| CertError::from_sign(&self.sign_path, e))?
            .ok_or_else(|| CertError::Malformed("empty response".to_string()))?;
        let signed = SignedCertificate::from_secret(&response)?;

        write_file(
            &self.cert_path(),
            signed.certificate.as_bytes(),
            PUBLIC_MODE,
            &self.ownership,
        )?;
        write_file(
            &self.ca_path(),
            signed.ca_bundle.as_bytes(),
            PUBLIC_MODE,
            &self.ownership,
        )?;
        tracing::info!(
            "certificate for '{}' written to {}",
            self.common_name,
            self.cert_path().display()
        );

        Ok(signed)
    }

    async fn load_or_generate_key(&self) -> Result<PrivateKey, CertError> {
        let path = self.key_path();
        match std::fs::read_to_string(&path) {
            Ok(pem) => {
                tracing::debug!("reusing key {}", path.display());
                return Ok(PrivateKey::from_pem(&pem)?);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => return Err(CertError::Read { path, source }),
        }

        let spec = self.key_spec;
        let key = tokio::task::spawn_blocking(move || PrivateKey::generate(spec))
            .await
            .map_err(|e| KeyError::Generate(e.to_string()))??;
        write_file(&path, key.to_pem().as_bytes(), PRIVATE_MODE, &self.ownership)?;
        tracing::info!("generated {} key {}", spec.key_type, path.display());
        Ok(key)
    }

    fn sign_data(&self, csr: String) -> SecretData {
        let ip_sans = self
            .ip_sans
            .iter()
            .map(IpAddr::to_string)
            .collect::<Vec<_>>()
            .join(",");

        let mut data = SecretData::new();
        data.insert("csr".to_string(), json!(csr));
        data.insert("common_name".to_string(), json!(self.common_name));
        data.insert("alt_names".to_string(), json!(self.san_hosts.join(",")));
        data.insert("ip_sans".to_string(), json!(ip_sans));
        data
    }
}

fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut path = OsString::from(prefix.as_os_str());
    path.push(suffix);
    PathBuf::from(path)
}

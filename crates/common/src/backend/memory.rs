use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use rcgen::string::Ia5String;
use rcgen::{
    BasicConstraints, CertificateParams, CertificateSigningRequestParams, DistinguishedName,
    DnType, DnValue, ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose, SanType,
    SerialNumber,
};
use reqwest::StatusCode;
use serde_json::{json, Value};
use time::OffsetDateTime;
use uuid::Uuid;

use super::types::{
    parse_ttl, read_back_shape, split_list, MountConfigOutput, MountInput, MountOutput,
    MountTuning, Secret, SecretAuth, SecretData, TokenCreateRequest, TokenLookup,
};
use super::{BackendError, SecretStore, SysAdmin, TokenAuth};
use crate::cluster::paths::normalize;

/// Token the in-memory backend is initialized with, carrying the root policy
pub const ROOT_TOKEN: &str = "root-token-dev";

const ROOT_POLICY: &str = "root";
const SEALED_MESSAGE: &str = "Vault is sealed";
const DEFAULT_SIGN_TTL: Duration = Duration::from_secs(30 * 24 * 3600);

/// Per-kind count of mutating calls the backend has served
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendCounters {
    pub mounts: u64,
    pub tunes: u64,
    pub ca_generations: u64,
    pub policy_writes: u64,
    pub role_writes: u64,
    pub secret_writes: u64,
    pub tokens_created: u64,
    pub revocations: u64,
    pub renewals: u64,
    pub signings: u64,
}

/// In-memory backend for tests
///
/// Holds the full server state (mounts, secrets, policies, tokens, CAs)
///  behind a shared lock. Every handle carries its own client token;
///  [`MemoryBackend::client`] hands out a fresh unauthenticated handle onto
///  the same state, the way a second node would connect to the same server.
///
/// PKI mounts issue real certificates: CA generation and CSR signing are
///  done with `rcgen`. Non-root tokens are checked against the paths listed
///  in their policies.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    inner: Arc<RwLock<MemoryBackendInner>>,
    token: Arc<RwLock<Option<String>>>,
}

#[derive(Debug, Default)]
struct MemoryBackendInner {
    sealed: bool,
    /// Mounts keyed by cleaned path (no leading/trailing separators)
    mounts: BTreeMap<String, MountOutput>,
    /// Generic secrets keyed by cleaned path
    secrets: HashMap<String, SecretData>,
    policies: HashMap<String, String>,
    token_roles: HashMap<String, SecretData>,
    tokens: HashMap<String, TokenEntry>,
    /// CA material keyed by PKI mount path
    cas: HashMap<String, CaEntry>,
    /// PKI signing roles keyed by `<mount>/roles/<name>`
    pki_roles: HashMap<String, SecretData>,
    /// Respond to signing with `issuing_ca` only, without `ca_chain`
    issuing_ca_only: bool,
    fail_prefixes: Vec<String>,
    counters: BackendCounters,
    next_serial: u64,
}

#[derive(Debug, Clone)]
struct TokenEntry {
    accessor: String,
    display_name: String,
    policies: Vec<String>,
    renewable: bool,
    ttl: u64,
}

#[derive(Debug, Clone)]
struct CaEntry {
    cert_pem: String,
    key_pem: String,
}

impl MemoryBackend {
    /// Create a fresh backend, with a handle authenticated as root
    pub fn new() -> Self {
        let mut inner = MemoryBackendInner {
            next_serial: 1,
            ..Default::default()
        };
        inner.mounts.insert(
            "sys".to_string(),
            MountOutput {
                mount_type: "system".to_string(),
                description: "system endpoints".to_string(),
                config: MountConfigOutput::default(),
            },
        );
        inner.mounts.insert(
            "secret".to_string(),
            MountOutput {
                mount_type: "kv".to_string(),
                description: "key/value secret storage".to_string(),
                config: MountConfigOutput::default(),
            },
        );
        inner.tokens.insert(
            ROOT_TOKEN.to_string(),
            TokenEntry {
                accessor: Uuid::new_v4().to_string(),
                display_name: "root".to_string(),
                policies: vec![ROOT_POLICY.to_string()],
                renewable: false,
                ttl: 0,
            },
        );

        Self {
            inner: Arc::new(RwLock::new(inner)),
            token: Arc::new(RwLock::new(Some(ROOT_TOKEN.to_string()))),
        }
    }

    /// A new handle onto the same state, without a client token
    pub fn client(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            token: Arc::new(RwLock::new(None)),
        }
    }

    pub fn seal(&self) {
        self.inner.write().sealed = true;
    }

    pub fn unseal(&self) {
        self.inner.write().sealed = false;
    }

    /// Fail every call whose API path starts with `prefix`
    pub fn fail_on(&self, prefix: &str) {
        self.inner.write().fail_prefixes.push(prefix.to_string());
    }

    pub fn clear_failures(&self) {
        self.inner.write().fail_prefixes.clear();
    }

    /// Answer signing requests with a single `issuing_ca` field instead of
    ///  a `ca_chain` list
    pub fn set_issuing_ca_only(&self, issuing_ca_only: bool) {
        self.inner.write().issuing_ca_only = issuing_ca_only;
    }

    pub fn counters(&self) -> BackendCounters {
        self.inner.read().counters
    }

    pub fn token_exists(&self, token: &str) -> bool {
        self.inner.read().tokens.contains_key(token)
    }

    /// Policies attached to a token, if it exists
    pub fn token_policies(&self, token: &str) -> Option<Vec<String>> {
        self.inner
            .read()
            .tokens
            .get(token)
            .map(|entry| entry.policies.clone())
    }

    /// Register a token directly, bypassing token roles
    pub fn insert_token(&self, token: &str, policies: &[&str], renewable: bool) {
        self.inner.write().tokens.insert(
            token.to_string(),
            TokenEntry {
                accessor: Uuid::new_v4().to_string(),
                display_name: token.to_string(),
                policies: policies.iter().map(|p| p.to_string()).collect(),
                renewable,
                ttl: 3600,
            },
        );
    }

    /// Certificate of the CA on a PKI mount, if one was generated
    pub fn ca_certificate(&self, mount: &str) -> Option<String> {
        self.inner
            .read()
            .cas
            .get(&normalize(mount))
            .map(|ca| ca.cert_pem.clone())
    }

    /// Take the state lock after the checks every call goes through:
    ///  seal status, injected failures and the caller's token
    fn authorize(
        &self,
        api_path: &str,
        access: Access,
    ) -> Result<parking_lot::RwLockWriteGuard<'_, MemoryBackendInner>, BackendError> {
        let inner = self.inner.write();
        if inner.sealed {
            return Err(BackendError::Sealed(SEALED_MESSAGE.to_string()));
        }
        if inner
            .fail_prefixes
            .iter()
            .any(|prefix| api_path.starts_with(prefix.as_str()))
        {
            return Err(BackendError::HttpStatus(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("injected failure on {}", api_path),
            ));
        }

        let token = self.token.read().clone().unwrap_or_default();
        let entry = inner
            .tokens
            .get(&token)
            .ok_or_else(|| BackendError::PermissionDenied("permission denied".to_string()))?;

        let allowed = match access {
            Access::AnyToken => true,
            Access::Root => entry.policies.iter().any(|p| p == ROOT_POLICY),
            Access::Path => inner.grants(entry, api_path),
        };
        if !allowed {
            return Err(BackendError::PermissionDenied("permission denied".to_string()));
        }
        Ok(inner)
    }

    fn current_token(&self) -> String {
        self.token.read().clone().unwrap_or_default()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy)]
enum Access {
    AnyToken,
    Root,
    Path,
}

impl MemoryBackendInner {
    /// Whether any of the token's policies lists the path
    fn grants(&self, entry: &TokenEntry, path: &str) -> bool {
        entry.policies.iter().any(|name| {
            if name == ROOT_POLICY {
                return true;
            }
            self.policies
                .get(name)
                .map(|rules| policy_paths(rules).any(|granted| path_matches(granted, path)))
                .unwrap_or(false)
        })
    }

    /// The PKI mount a path lives under, with the remaining sub-path
    fn pki_mount<'a>(&self, path: &'a str) -> Option<(String, &'a str)> {
        self.mount_for(path)
            .filter(|(_, mount)| mount.mount_type == "pki")
            .map(|(mount_path, _)| {
                let rest = path[mount_path.len()..].trim_start_matches('/');
                (mount_path, rest)
            })
    }

    fn mount_for(&self, path: &str) -> Option<(String, &MountOutput)> {
        self.mounts
            .iter()
            .filter(|(mount_path, _)| {
                path == mount_path.as_str() || path.starts_with(&format!("{}/", mount_path))
            })
            .max_by_key(|(mount_path, _)| mount_path.len())
            .map(|(mount_path, mount)| (mount_path.clone(), mount))
    }

    fn issue_token(
        &mut self,
        display_name: &str,
        policies: Vec<String>,
        ttl: u64,
        renewable: bool,
    ) -> SecretAuth {
        let client_token = format!("s.{}", Uuid::new_v4().simple());
        let accessor = Uuid::new_v4().to_string();
        self.tokens.insert(
            client_token.clone(),
            TokenEntry {
                accessor: accessor.clone(),
                display_name: display_name.to_string(),
                policies: policies.clone(),
                renewable,
                ttl,
            },
        );
        self.counters.tokens_created += 1;

        SecretAuth {
            client_token,
            accessor,
            policies: Some(policies),
            lease_duration: ttl,
            renewable,
        }
    }

    fn next_serial(&mut self) -> u64 {
        let serial = self.next_serial;
        self.next_serial += 1;
        serial
    }

    fn generate_ca(&mut self, mount: &str, data: &SecretData) -> Result<Secret, BackendError> {
        let common_name = data
            .get("common_name")
            .and_then(Value::as_str)
            .filter(|cn| !cn.is_empty())
            .ok_or_else(|| bad_request("missing common_name"))?
            .to_string();
        let ttl = data
            .get("ttl")
            .and_then(parse_ttl)
            .or_else(|| {
                self.mounts
                    .get(mount)
                    .map(|m| m.config.max_lease_ttl)
                    .filter(|ttl| *ttl > 0)
            })
            .unwrap_or(DEFAULT_SIGN_TTL.as_secs());

        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, DnValue::Utf8String(common_name));
        params.distinguished_name = dn;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let now = OffsetDateTime::now_utc();
        params.not_before = now - time::Duration::minutes(1);
        params.not_after = now + Duration::from_secs(ttl);
        params.serial_number = Some(SerialNumber::from_slice(&self.next_serial().to_be_bytes()));

        let key_pair = KeyPair::generate().map_err(internal)?;
        let cert = params.self_signed(&key_pair).map_err(internal)?;
        let cert_pem = cert.pem();

        self.cas.insert(
            mount.to_string(),
            CaEntry {
                cert_pem: cert_pem.clone(),
                key_pem: key_pair.serialize_pem(),
            },
        );
        self.counters.ca_generations += 1;

        let mut out = SecretData::new();
        out.insert("certificate".to_string(), json!(cert_pem));
        out.insert("issuing_ca".to_string(), json!(cert_pem));
        Ok(Secret::from_data(out))
    }

    fn sign(&mut self, mount: &str, role_name: &str, data: &SecretData) -> Result<Secret, BackendError> {
        let role = self
            .pki_roles
            .get(&format!("{}/roles/{}", mount, role_name))
            .cloned()
            .ok_or_else(|| bad_request(&format!("unknown role: {}", role_name)))?;
        let ca = self
            .cas
            .get(mount)
            .cloned()
            .ok_or_else(|| bad_request("backend must be configured with a CA certificate/key"))?;

        let csr_pem = data
            .get("csr")
            .and_then(Value::as_str)
            .ok_or_else(|| bad_request("missing csr"))?;
        let common_name = data
            .get("common_name")
            .and_then(Value::as_str)
            .filter(|cn| !cn.is_empty())
            .ok_or_else(|| bad_request("the common_name field is required"))?;

        let mut csr_params = CertificateSigningRequestParams::from_pem(csr_pem)
            .map_err(|e| bad_request(&format!("failed to parse CSR: {}", e)))?;

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, DnValue::Utf8String(common_name.to_string()));
        for org in split_list(role.get("organization")) {
            dn.push(DnType::OrganizationName, DnValue::Utf8String(org));
        }
        csr_params.params.distinguished_name = dn;

        let mut sans = Vec::new();
        for host in split_list(data.get("alt_names")) {
            let name = Ia5String::try_from(host.clone())
                .map_err(|e| bad_request(&format!("invalid alt name {}: {}", host, e)))?;
            sans.push(SanType::DnsName(name));
        }
        for ip in split_list(data.get("ip_sans")) {
            let addr: IpAddr = ip
                .parse()
                .map_err(|_| bad_request(&format!("invalid IP SAN: {}", ip)))?;
            sans.push(SanType::IpAddress(addr));
        }
        csr_params.params.subject_alt_names = sans;

        csr_params.params.is_ca = IsCa::NoCa;
        csr_params.params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        let mut usages = Vec::new();
        if role.get("server_flag").and_then(Value::as_bool).unwrap_or(true) {
            usages.push(ExtendedKeyUsagePurpose::ServerAuth);
        }
        if role.get("client_flag").and_then(Value::as_bool).unwrap_or(true) {
            usages.push(ExtendedKeyUsagePurpose::ClientAuth);
        }
        csr_params.params.extended_key_usages = usages;

        let ttl = role
            .get("ttl")
            .and_then(parse_ttl)
            .or_else(|| role.get("max_ttl").and_then(parse_ttl))
            .filter(|ttl| *ttl > 0)
            .unwrap_or(DEFAULT_SIGN_TTL.as_secs());
        let now = OffsetDateTime::now_utc();
        csr_params.params.not_before = now - time::Duration::minutes(1);
        csr_params.params.not_after = now + Duration::from_secs(ttl);
        let serial = self.next_serial();
        csr_params.params.serial_number = Some(SerialNumber::from_slice(&serial.to_be_bytes()));
        csr_params.params.use_authority_key_identifier_extension = true;

        let ca_key = KeyPair::from_pem(&ca.key_pem).map_err(internal)?;
        let issuer = Issuer::from_ca_cert_pem(&ca.cert_pem, &ca_key).map_err(internal)?;
        let signed = csr_params.signed_by(&issuer).map_err(internal)?;
        self.counters.signings += 1;

        let mut out = SecretData::new();
        out.insert("certificate".to_string(), json!(signed.pem()));
        if self.issuing_ca_only {
            out.insert("issuing_ca".to_string(), json!(ca.cert_pem));
        } else {
            out.insert("issuing_ca".to_string(), json!(ca.cert_pem));
            out.insert("ca_chain".to_string(), json!([ca.cert_pem]));
        }
        out.insert("serial_number".to_string(), json!(format!("{:016x}", serial)));
        Ok(Secret {
            lease_duration: ttl,
            ..Secret::from_data(out)
        })
    }
}

#[async_trait]
impl SecretStore for MemoryBackend {
    async fn read(&self, path: &str) -> Result<Option<Secret>, BackendError> {
        let path = normalize(path);
        let inner = self.authorize(&path, Access::Path)?;

        if let Some(role) = path.strip_prefix("auth/token/roles/") {
            return Ok(inner.token_roles.get(role).cloned().map(Secret::from_data));
        }

        if let Some((mount, rest)) = inner.pki_mount(&path) {
            if rest == "cert/ca" {
                let certificate = inner
                    .cas
                    .get(&mount)
                    .map(|ca| ca.cert_pem.clone())
                    .unwrap_or_default();
                let mut data = SecretData::new();
                data.insert("certificate".to_string(), json!(certificate));
                return Ok(Some(Secret::from_data(data)));
            }
            return Ok(inner
                .pki_roles
                .get(&path)
                .cloned()
                .map(Secret::from_data));
        }

        Ok(inner.secrets.get(&path).cloned().map(Secret::from_data))
    }

    async fn write(&self, path: &str, data: SecretData) -> Result<Option<Secret>, BackendError> {
        let path = normalize(path);

        if let Some(role) = path.strip_prefix("auth/token/roles/") {
            let mut inner = self.authorize(&path, Access::Root)?;
            inner.token_roles.insert(role.to_string(), read_back_shape(&data));
            inner.counters.role_writes += 1;
            return Ok(None);
        }

        let mut inner = self.authorize(&path, Access::Path)?;

        if let Some((mount, rest)) = inner.pki_mount(&path) {
            let rest = rest.to_string();
            if rest == "root/generate/internal" {
                return inner.generate_ca(&mount, &data).map(Some);
            }
            if let Some(role) = rest.strip_prefix("roles/") {
                inner
                    .pki_roles
                    .insert(format!("{}/roles/{}", mount, role), read_back_shape(&data));
                inner.counters.role_writes += 1;
                return Ok(None);
            }
            if let Some(role) = rest.strip_prefix("sign/") {
                return inner.sign(&mount, role, &data).map(Some);
            }
            return Err(BackendError::HttpStatus(
                StatusCode::NOT_FOUND,
                format!("unsupported path: {}", path),
            ));
        }

        let generic = inner
            .mount_for(&path)
            .map(|(_, mount)| mount.mount_type == "generic" || mount.mount_type == "kv")
            .unwrap_or(false);
        if !generic {
            return Err(BackendError::HttpStatus(
                StatusCode::NOT_FOUND,
                format!("no handler for route '{}'", path),
            ));
        }
        inner.secrets.insert(path, data);
        inner.counters.secret_writes += 1;
        Ok(None)
    }
}

#[async_trait]
impl SysAdmin for MemoryBackend {
    async fn list_mounts(&self) -> Result<HashMap<String, MountOutput>, BackendError> {
        let inner = self.authorize("sys/mounts", Access::Root)?;
        Ok(inner
            .mounts
            .iter()
            .map(|(path, mount)| (format!("{}/", path), mount.clone()))
            .collect())
    }

    async fn mount(&self, path: &str, input: &MountInput) -> Result<(), BackendError> {
        let path = normalize(path);
        let mut inner = self.authorize(&format!("sys/mounts/{}", path), Access::Root)?;
        if inner.mounts.contains_key(&path) {
            return Err(bad_request(&format!("existing mount at {}/", path)));
        }
        inner.mounts.insert(
            path,
            MountOutput {
                mount_type: input.mount_type.clone(),
                description: input.description.clone(),
                config: MountConfigOutput::default(),
            },
        );
        inner.counters.mounts += 1;
        Ok(())
    }

    async fn tune_mount(&self, path: &str, tuning: &MountTuning) -> Result<(), BackendError> {
        let path = normalize(path);
        let mut inner = self.authorize(&format!("sys/mounts/{}/tune", path), Access::Root)?;
        let mount = inner
            .mounts
            .get_mut(&path)
            .ok_or_else(|| bad_request(&format!("no mount at {}/", path)))?;
        mount.config = MountConfigOutput {
            default_lease_ttl: tuning.default_lease_ttl.as_secs(),
            max_lease_ttl: tuning.max_lease_ttl.as_secs(),
        };
        inner.counters.tunes += 1;
        Ok(())
    }

    async fn put_policy(&self, name: &str, rules: &str) -> Result<(), BackendError> {
        let mut inner = self.authorize(&format!("sys/policy/{}", name), Access::Root)?;
        inner.policies.insert(name.to_string(), rules.to_string());
        inner.counters.policy_writes += 1;
        Ok(())
    }

    async fn get_policy(&self, name: &str) -> Result<Option<String>, BackendError> {
        let inner = self.authorize(&format!("sys/policy/{}", name), Access::Root)?;
        Ok(inner.policies.get(name).cloned())
    }
}

#[async_trait]
impl TokenAuth for MemoryBackend {
    fn client_token(&self) -> Option<String> {
        self.token.read().clone()
    }

    fn set_client_token(&self, token: Option<String>) {
        *self.token.write() = token;
    }

    async fn create_orphan(&self, request: &TokenCreateRequest) -> Result<SecretAuth, BackendError> {
        let mut inner = self.authorize("auth/token/create-orphan", Access::Root)?;
        let ttl = request
            .period
            .as_ref()
            .or(request.ttl.as_ref())
            .and_then(|ttl| parse_ttl(&json!(ttl)))
            .unwrap_or(0);
        Ok(inner.issue_token(&request.display_name, request.policies.clone(), ttl, true))
    }

    async fn create_with_role(
        &self,
        role: &str,
        request: &TokenCreateRequest,
    ) -> Result<SecretAuth, BackendError> {
        let mut inner = self.authorize(&format!("auth/token/create/{}", role), Access::Path)?;
        let role_data = inner
            .token_roles
            .get(role)
            .cloned()
            .ok_or_else(|| bad_request(&format!("unknown role {}", role)))?;

        let allowed = split_list(role_data.get("allowed_policies"));
        let policies = if request.policies.is_empty() {
            allowed
        } else {
            if let Some(denied) = request.policies.iter().find(|p| !allowed.contains(p)) {
                return Err(bad_request(&format!(
                    "token policies ({}) must be subset of the role's allowed policies",
                    denied
                )));
            }
            request.policies.clone()
        };
        let period = role_data.get("period").and_then(parse_ttl).unwrap_or(0);
        Ok(inner.issue_token(&format!("{}-{}", role, request.display_name), policies, period, true))
    }

    async fn revoke_orphan(&self, token: &str) -> Result<(), BackendError> {
        let mut inner = self.authorize("auth/token/revoke-orphan", Access::Root)?;
        if inner.tokens.remove(token).is_none() {
            return Err(bad_request("token to revoke not found"));
        }
        inner.counters.revocations += 1;
        Ok(())
    }

    async fn lookup_self(&self) -> Result<TokenLookup, BackendError> {
        let inner = self.authorize("auth/token/lookup-self", Access::AnyToken)?;
        let id = self.current_token();
        let entry = inner
            .tokens
            .get(&id)
            .ok_or_else(|| BackendError::PermissionDenied("permission denied".to_string()))?;
        Ok(TokenLookup {
            id: id.clone(),
            accessor: entry.accessor.clone(),
            display_name: entry.display_name.clone(),
            policies: Some(entry.policies.clone()),
            renewable: entry.renewable,
            ttl: entry.ttl,
        })
    }

    async fn renew_self(&self) -> Result<SecretAuth, BackendError> {
        let mut inner = self.authorize("auth/token/renew-self", Access::AnyToken)?;
        let id = self.current_token();
        let entry = inner
            .tokens
            .get(&id)
            .cloned()
            .ok_or_else(|| BackendError::PermissionDenied("permission denied".to_string()))?;
        if !entry.renewable {
            return Err(bad_request("lease is not renewable"));
        }
        inner.counters.renewals += 1;
        Ok(SecretAuth {
            client_token: id,
            accessor: entry.accessor,
            policies: Some(entry.policies),
            lease_duration: entry.ttl,
            renewable: true,
        })
    }
}

fn bad_request(message: &str) -> BackendError {
    BackendError::HttpStatus(StatusCode::BAD_REQUEST, message.to_string())
}

fn internal(err: rcgen::Error) -> BackendError {
    BackendError::HttpStatus(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

/// Paths named by `path "<p>"` stanzas of a policy document
fn policy_paths(rules: &str) -> impl Iterator<Item = &str> {
    rules.lines().filter_map(|line| {
        line.trim()
            .strip_prefix("path \"")
            .and_then(|rest| rest.split('"').next())
    })
}

fn path_matches(granted: &str, path: &str) -> bool {
    match granted.strip_suffix('*') {
        Some(prefix) => path.starts_with(prefix),
        None => granted == path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pki_input() -> MountInput {
        MountInput {
            mount_type: "pki".to_string(),
            description: "test CA".to_string(),
        }
    }

    #[tokio::test]
    async fn test_mount_twice_is_rejected() {
        let backend = MemoryBackend::new();
        backend.mount("c1/pki/k8s", &pki_input()).await.unwrap();
        let err = backend.mount("/c1/pki/k8s/", &pki_input()).await.unwrap_err();
        assert!(err.to_string().contains("existing mount"));

        let mounts = backend.list_mounts().await.unwrap();
        assert_eq!(mounts["c1/pki/k8s/"].mount_type, "pki");
        assert_eq!(backend.counters().mounts, 1);
    }

    #[tokio::test]
    async fn test_cert_ca_is_empty_until_generated() {
        let backend = MemoryBackend::new();
        backend.mount("c1/pki/k8s", &pki_input()).await.unwrap();

        let secret = backend.read("c1/pki/k8s/cert/ca").await.unwrap().unwrap();
        assert_eq!(secret.str_field("certificate"), Some(""));

        let mut data = SecretData::new();
        data.insert("common_name".to_string(), json!("Kubernetes c1/k8s CA"));
        data.insert("ttl".to_string(), json!("3600s"));
        backend
            .write("c1/pki/k8s/root/generate/internal", data)
            .await
            .unwrap();

        let secret = backend.read("c1/pki/k8s/cert/ca").await.unwrap().unwrap();
        assert!(secret
            .str_field("certificate")
            .unwrap()
            .starts_with("-----BEGIN CERTIFICATE-----"));
    }

    #[tokio::test]
    async fn test_sealed_rejects_everything() {
        let backend = MemoryBackend::new();
        backend.seal();
        assert!(backend.list_mounts().await.unwrap_err().is_sealed());
        assert!(backend.read("secret/foo").await.unwrap_err().is_sealed());
        assert!(backend.renew_self().await.unwrap_err().is_sealed());

        backend.unseal();
        backend.list_mounts().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_token_is_denied() {
        let backend = MemoryBackend::new();
        let client = backend.client();
        assert!(client.read("secret/foo").await.unwrap_err().is_permission_denied());

        client.set_client_token(Some("bogus".to_string()));
        assert!(client.lookup_self().await.unwrap_err().is_permission_denied());
    }

    #[tokio::test]
    async fn test_policy_paths_grant_access() {
        let backend = MemoryBackend::new();
        let mut data = SecretData::new();
        data.insert("key".to_string(), json!("value"));
        backend.write("secret/allowed", data.clone()).await.unwrap();
        backend.write("secret/denied", data).await.unwrap();
        backend
            .put_policy(
                "reader",
                "path \"secret/allowed\" {\n  capabilities = [\"read\"]\n}\n",
            )
            .await
            .unwrap();
        backend.insert_token("reader-token", &["reader"], true);

        let client = backend.client();
        client.set_client_token(Some("reader-token".to_string()));
        let secret = client.read("secret/allowed").await.unwrap().unwrap();
        assert_eq!(secret.str_field("key"), Some("value"));
        assert!(client.read("secret/denied").await.unwrap_err().is_permission_denied());
    }

    #[tokio::test]
    async fn test_root_token_is_not_renewable() {
        let backend = MemoryBackend::new();
        let lookup = backend.lookup_self().await.unwrap();
        assert_eq!(lookup.id, ROOT_TOKEN);
        assert!(!lookup.renewable);
        assert!(backend.renew_self().await.is_err());
    }

    #[tokio::test]
    async fn test_fail_on_prefix() {
        let backend = MemoryBackend::new();
        backend.fail_on("sys/policy/c1");
        assert!(backend.put_policy("c1/worker", "").await.is_err());
        backend.put_policy("other", "").await.unwrap();

        backend.clear_failures();
        backend.put_policy("c1/worker", "").await.unwrap();
    }

    #[test]
    fn test_policy_paths_parse() {
        let rules = "path \"c1/pki/k8s/sign/kubelet\" {\n  capabilities = [\"create\"]\n}\n\npath \"c1/secrets/*\" {\n}\n";
        let paths: Vec<_> = policy_paths(rules).collect();
        assert_eq!(paths, vec!["c1/pki/k8s/sign/kubelet", "c1/secrets/*"]);
        assert!(path_matches("c1/secrets/*", "c1/secrets/service-accounts"));
        assert!(!path_matches("c1/pki/k8s/sign/kubelet", "c1/pki/k8s/sign/admin"));
    }
}

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use serde_json::{Map, Value};
use url::Url;

use super::requests::*;
use super::ApiRequest;
use crate::backend::types::{
    MountInput, MountOutput, MountTuning, Secret, SecretAuth, SecretData, TokenCreateRequest,
    TokenLookup,
};
use crate::backend::{BackendError, SecretStore, SysAdmin, TokenAuth};

const TOKEN_HEADER: &str = "X-Vault-Token";

/// Backend implementation speaking the HTTP API
///
/// Clones share the client token, so switching tokens on one handle is
///  observed by all of them.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    remote: Url,
    client: Client,
    token: Arc<RwLock<Option<String>>>,
}

impl HttpBackend {
    pub fn new(remote: &Url, timeout: Option<Duration>) -> Result<Self, BackendError> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert("Content-Type", HeaderValue::from_static("application/json"));
        let mut builder = Client::builder().default_headers(default_headers);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(BackendError::Reqwest)?;

        // Url::join drops the last segment unless the base ends in a slash
        let mut remote = remote.clone();
        if !remote.path().ends_with('/') {
            let path = format!("{}/", remote.path());
            remote.set_path(&path);
        }

        Ok(Self {
            remote,
            client,
            token: Arc::new(RwLock::new(None)),
        })
    }

    /// Get the base URL for API requests
    pub fn base_url(&self) -> &Url {
        &self.remote
    }

    /// Issue a request, returning `None` when the backend answered with no
    ///  content (or a 404 the request treats as empty)
    pub async fn call<T: ApiRequest>(&self, request: T) -> Result<Option<T::Response>, BackendError> {
        let mut request_builder = request.build_request(&self.remote, &self.client)?;
        if let Some(token) = self.token.read().as_deref() {
            request_builder = request_builder.header(TOKEN_HEADER, token);
        }
        let response = request_builder.send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND && T::NOT_FOUND_IS_EMPTY {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await?;
            return Err(BackendError::from_response(status, &body));
        }
        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        let body = response.bytes().await?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        serde_json::from_slice(&body)
            .map(Some)
            .map_err(|e| BackendError::Decode(e.to_string()))
    }

    async fn call_auth<T: ApiRequest<Response = Secret>>(
        &self,
        request: T,
        what: &str,
    ) -> Result<SecretAuth, BackendError> {
        self.call(request)
            .await?
            .and_then(|secret| secret.auth)
            .ok_or_else(|| BackendError::Decode(format!("{} returned no auth block", what)))
    }
}

#[async_trait]
impl SecretStore for HttpBackend {
    async fn read(&self, path: &str) -> Result<Option<Secret>, BackendError> {
        self.call(ReadRequest {
            path: path.to_string(),
        })
        .await
    }

    async fn write(&self, path: &str, data: SecretData) -> Result<Option<Secret>, BackendError> {
        self.call(WriteRequest {
            path: path.to_string(),
            data,
        })
        .await
    }
}

#[async_trait]
impl SysAdmin for HttpBackend {
    async fn list_mounts(&self) -> Result<HashMap<String, MountOutput>, BackendError> {
        let body = self.call(ListMountsRequest).await?.unwrap_or_default();
        Ok(parse_mounts(body))
    }

    async fn mount(&self, path: &str, input: &MountInput) -> Result<(), BackendError> {
        self.call(MountRequest {
            path: path.to_string(),
            input: input.clone(),
        })
        .await?;
        Ok(())
    }

    async fn tune_mount(&self, path: &str, tuning: &MountTuning) -> Result<(), BackendError> {
        self.call(TuneMountRequest {
            path: path.to_string(),
            tuning: *tuning,
        })
        .await?;
        Ok(())
    }

    async fn put_policy(&self, name: &str, rules: &str) -> Result<(), BackendError> {
        self.call(PutPolicyRequest {
            name: name.to_string(),
            rules: rules.to_string(),
        })
        .await?;
        Ok(())
    }

    async fn get_policy(&self, name: &str) -> Result<Option<String>, BackendError> {
        Ok(self
            .call(GetPolicyRequest {
                name: name.to_string(),
            })
            .await?
            .and_then(PolicyResponse::into_rules))
    }
}

#[async_trait]
impl TokenAuth for HttpBackend {
    fn client_token(&self) -> Option<String> {
        self.token.read().clone()
    }

    fn set_client_token(&self, token: Option<String>) {
        *self.token.write() = token;
    }

    async fn create_orphan(&self, request: &TokenCreateRequest) -> Result<SecretAuth, BackendError> {
        self.call_auth(
            CreateOrphanRequest {
                request: request.clone(),
            },
            "create-orphan",
        )
        .await
    }

    async fn create_with_role(
        &self,
        role: &str,
        request: &TokenCreateRequest,
    ) -> Result<SecretAuth, BackendError> {
        self.call_auth(
            CreateWithRoleRequest {
                role: role.to_string(),
                request: request.clone(),
            },
            "create",
        )
        .await
    }

    async fn revoke_orphan(&self, token: &str) -> Result<(), BackendError> {
        self.call(RevokeOrphanRequest {
            token: token.to_string(),
        })
        .await?;
        Ok(())
    }

    async fn lookup_self(&self) -> Result<TokenLookup, BackendError> {
        let data = self
            .call(LookupSelfRequest)
            .await?
            .and_then(|secret| secret.data)
            .ok_or_else(|| BackendError::Decode("lookup-self returned no data".to_string()))?;
        serde_json::from_value(Value::Object(data)).map_err(|e| BackendError::Decode(e.to_string()))
    }

    async fn renew_self(&self) -> Result<SecretAuth, BackendError> {
        self.call_auth(RenewSelfRequest, "renew-self").await
    }
}

/// Extract mounts from a listing body
///
/// Newer backends nest the listing under `data` and also echo it at the top
///  level next to response metadata; only entries that look like mounts are
///  kept.
fn parse_mounts(mut body: Map<String, Value>) -> HashMap<String, MountOutput> {
    let entries = match body.remove("data") {
        Some(Value::Object(data)) => data,
        _ => body,
    };

    entries
        .into_iter()
        .filter_map(|(path, value)| {
            serde_json::from_value::<MountOutput>(value)
                .ok()
                .map(|mount| (path, mount))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_mounts_nested() {
        let body = json!({
            "request_id": "abc",
            "lease_duration": 0,
            "data": {
                "c1/pki/k8s/": {
                    "type": "pki",
                    "description": "k8s CA",
                    "config": {"default_lease_ttl": 3600, "max_lease_ttl": 7200}
                },
                "sys/": {"type": "system", "description": "", "config": {}}
            }
        });
        let Value::Object(body) = body else { unreachable!() };
        let mounts = parse_mounts(body);

        assert_eq!(mounts.len(), 2);
        let pki = &mounts["c1/pki/k8s/"];
        assert_eq!(pki.mount_type, "pki");
        assert_eq!(pki.config.max_lease_ttl, 7200);
    }

    #[test]
    fn test_parse_mounts_top_level_skips_metadata() {
        let body = json!({
            "request_id": "abc",
            "renewable": false,
            "secret/": {"type": "kv", "description": "", "config": {}}
        });
        let Value::Object(body) = body else { unreachable!() };
        let mounts = parse_mounts(body);

        assert_eq!(mounts.len(), 1);
        assert_eq!(mounts["secret/"].mount_type, "kv");
    }

    #[test]
    fn test_base_url_gets_trailing_slash() {
        let backend =
            HttpBackend::new(&Url::parse("http://127.0.0.1:8200/vault").unwrap(), None).unwrap();
        assert_eq!(backend.base_url().as_str(), "http://127.0.0.1:8200/vault/");
    }

    #[test]
    fn test_token_is_shared_between_clones() {
        let backend =
            HttpBackend::new(&Url::parse("http://127.0.0.1:8200").unwrap(), None).unwrap();
        let other = backend.clone();
        backend.set_client_token(Some("t1".to_string()));
        assert_eq!(other.client_token().as_deref(), Some("t1"));
    }
}

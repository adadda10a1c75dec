//! Request types for the backend's HTTP API, one per endpoint

use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

use super::{api_url, ApiRequest};
use crate::backend::types::{MountInput, MountTuning, Secret, SecretData, TokenCreateRequest};
use crate::backend::{ttl_string, BackendError};

/// Read a secret at an arbitrary logical path
#[derive(Debug, Clone)]
pub struct ReadRequest {
    pub path: String,
}

impl ApiRequest for ReadRequest {
    type Response = Secret;
    const NOT_FOUND_IS_EMPTY: bool = true;

    fn build_request(self, base_url: &Url, client: &Client) -> Result<RequestBuilder, BackendError> {
        Ok(client.get(api_url(base_url, &self.path)?))
    }
}

/// Write a secret (or trigger an endpoint) at an arbitrary logical path
#[derive(Debug, Clone)]
pub struct WriteRequest {
    pub path: String,
    pub data: SecretData,
}

impl ApiRequest for WriteRequest {
    type Response = Secret;

    fn build_request(self, base_url: &Url, client: &Client) -> Result<RequestBuilder, BackendError> {
        Ok(client.put(api_url(base_url, &self.path)?).json(&self.data))
    }
}

/// List every mount known to the backend
///
/// The response is kept raw: depending on version the mounts are either at
///  the top level or nested under `data`.
#[derive(Debug, Clone)]
pub struct ListMountsRequest;

impl ApiRequest for ListMountsRequest {
    type Response = Map<String, Value>;

    fn build_request(self, base_url: &Url, client: &Client) -> Result<RequestBuilder, BackendError> {
        Ok(client.get(api_url(base_url, "sys/mounts")?))
    }
}

#[derive(Debug, Clone)]
pub struct MountRequest {
    pub path: String,
    pub input: MountInput,
}

impl ApiRequest for MountRequest {
    type Response = Value;

    fn build_request(self, base_url: &Url, client: &Client) -> Result<RequestBuilder, BackendError> {
        let url = api_url(base_url, &format!("sys/mounts/{}", self.path))?;
        Ok(client.post(url).json(&self.input))
    }
}

#[derive(Debug, Clone)]
pub struct TuneMountRequest {
    pub path: String,
    pub tuning: MountTuning,
}

#[derive(Debug, Serialize)]
struct TuneBody {
    default_lease_ttl: String,
    max_lease_ttl: String,
}

impl ApiRequest for TuneMountRequest {
    type Response = Value;

    fn build_request(self, base_url: &Url, client: &Client) -> Result<RequestBuilder, BackendError> {
        let url = api_url(base_url, &format!("sys/mounts/{}/tune", self.path))?;
        let body = TuneBody {
            default_lease_ttl: ttl_string(self.tuning.default_lease_ttl),
            max_lease_ttl: ttl_string(self.tuning.max_lease_ttl),
        };
        Ok(client.post(url).json(&body))
    }
}

#[derive(Debug, Clone)]
pub struct PutPolicyRequest {
    pub name: String,
    pub rules: String,
}

impl ApiRequest for PutPolicyRequest {
    type Response = Value;

    fn build_request(self, base_url: &Url, client: &Client) -> Result<RequestBuilder, BackendError> {
        let url = api_url(base_url, &format!("sys/policy/{}", self.name))?;
        Ok(client
            .put(url)
            .json(&serde_json::json!({ "policy": self.rules })))
    }
}

#[derive(Debug, Clone)]
pub struct GetPolicyRequest {
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PolicyResponse {
    #[serde(default)]
    pub rules: Option<String>,
    #[serde(default)]
    pub data: Option<PolicyData>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PolicyData {
    #[serde(default)]
    pub rules: Option<String>,
}

impl PolicyResponse {
    pub fn into_rules(self) -> Option<String> {
        self.data
            .and_then(|data| data.rules)
            .or(self.rules)
            .filter(|rules| !rules.is_empty())
    }
}

impl ApiRequest for GetPolicyRequest {
    type Response = PolicyResponse;
    const NOT_FOUND_IS_EMPTY: bool = true;

    fn build_request(self, base_url: &Url, client: &Client) -> Result<RequestBuilder, BackendError> {
        let url = api_url(base_url, &format!("sys/policy/{}", self.name))?;
        Ok(client.get(url))
    }
}

#[derive(Debug, Clone)]
pub struct CreateOrphanRequest {
    pub request: TokenCreateRequest,
}

impl ApiRequest for CreateOrphanRequest {
    type Response = Secret;

    fn build_request(self, base_url: &Url, client: &Client) -> Result<RequestBuilder, BackendError> {
        let url = api_url(base_url, "auth/token/create-orphan")?;
        Ok(client.post(url).json(&self.request))
    }
}

#[derive(Debug, Clone)]
pub struct CreateWithRoleRequest {
    pub role: String,
    pub request: TokenCreateRequest,
}

impl ApiRequest for CreateWithRoleRequest {
    type Response = Secret;

    fn build_request(self, base_url: &Url, client: &Client) -> Result<RequestBuilder, BackendError> {
        let url = api_url(base_url, &format!("auth/token/create/{}", self.role))?;
        Ok(client.post(url).json(&self.request))
    }
}

#[derive(Debug, Clone)]
pub struct RevokeOrphanRequest {
    pub token: String,
}

impl ApiRequest for RevokeOrphanRequest {
    type Response = Value;

    fn build_request(self, base_url: &Url, client: &Client) -> Result<RequestBuilder, BackendError> {
        let url = api_url(base_url, "auth/token/revoke-orphan")?;
        Ok(client
            .post(url)
            .json(&serde_json::json!({ "token": self.token })))
    }
}

#[derive(Debug, Clone)]
pub struct LookupSelfRequest;

impl ApiRequest for LookupSelfRequest {
    type Response = Secret;

    fn build_request(self, base_url: &Url, client: &Client) -> Result<RequestBuilder, BackendError> {
        Ok(client.get(api_url(base_url, "auth/token/lookup-self")?))
    }
}

#[derive(Debug, Clone)]
pub struct RenewSelfRequest;

impl ApiRequest for RenewSelfRequest {
    type Response = Secret;

    fn build_request(self, base_url: &Url, client: &Client) -> Result<RequestBuilder, BackendError> {
        let url = api_url(base_url, "auth/token/renew-self")?;
        Ok(client.post(url).json(&serde_json::json!({})))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_policy_response_prefers_nested_rules() {
        let response: PolicyResponse = serde_json::from_value(json!({
            "name": "c1/worker",
            "rules": "old",
            "data": {"name": "c1/worker", "rules": "new"}
        }))
        .unwrap();
        assert_eq!(response.into_rules().as_deref(), Some("new"));
    }

    #[test]
    fn test_policy_response_empty_rules_is_none() {
        let response: PolicyResponse = serde_json::from_value(json!({"rules": ""})).unwrap();
        assert_eq!(response.into_rules(), None);
    }

    #[test]
    fn test_tune_body_uses_seconds() {
        let base = Url::parse("http://127.0.0.1:8200/").unwrap();
        let request = TuneMountRequest {
            path: "c1/pki/k8s".to_string(),
            tuning: MountTuning::uniform(std::time::Duration::from_secs(120)),
        }
        .build_request(&base, &Client::new())
        .unwrap()
        .build()
        .unwrap();

        assert_eq!(
            request.url().as_str(),
            "http://127.0.0.1:8200/v1/sys/mounts/c1/pki/k8s/tune"
        );
        let body: Value =
            serde_json::from_slice(request.body().unwrap().as_bytes().unwrap()).unwrap();
        assert_eq!(
            body,
            json!({"default_lease_ttl": "120s", "max_lease_ttl": "120s"})
        );
    }
}

mod client;
pub mod requests;

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use url::Url;

use super::BackendError;

pub use client::HttpBackend;

/// A single backend API call
///
/// Each request knows how to build itself against the backend's base URL,
///  and what shape the response body takes.
pub trait ApiRequest {
    type Response: DeserializeOwned;

    /// Whether a 404 from the backend means "nothing here" rather than
    ///  an error
    const NOT_FOUND_IS_EMPTY: bool = false;

    fn build_request(self, base_url: &Url, client: &Client) -> Result<RequestBuilder, BackendError>;
}

/// Resolve an API path (without the `v1/` prefix) against the base URL
pub(crate) fn api_url(base_url: &Url, path: &str) -> Result<Url, BackendError> {
    let path = path.trim_start_matches('/');
    Ok(base_url.join(&format!("v1/{}", path))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_url_joins_under_v1() {
        let base = Url::parse("http://127.0.0.1:8200/").unwrap();
        let url = api_url(&base, "/c1/pki/k8s/cert/ca").unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:8200/v1/c1/pki/k8s/cert/ca");
    }

    #[test]
    fn test_api_url_keeps_base_prefix() {
        let base = Url::parse("https://vault.example.com/proxy/").unwrap();
        let url = api_url(&base, "sys/mounts").unwrap();
        assert_eq!(url.as_str(), "https://vault.example.com/proxy/v1/sys/mounts");
    }
}

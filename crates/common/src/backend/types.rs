use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key/value payload of a secret, as returned and accepted by the backend
pub type SecretData = Map<String, Value>;

/// A response envelope returned by the backend for reads, writes and
///  token operations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Secret {
    #[serde(default)]
    pub lease_duration: u64,
    #[serde(default)]
    pub renewable: bool,
    #[serde(default)]
    pub data: Option<SecretData>,
    #[serde(default)]
    pub auth: Option<SecretAuth>,
    #[serde(default)]
    pub warnings: Option<Vec<String>>,
}

impl Secret {
    pub fn from_data(data: SecretData) -> Self {
        Self {
            data: Some(data),
            ..Default::default()
        }
    }

    /// Look up a single field of the secret's data
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.data.as_ref().and_then(|data| data.get(key))
    }

    /// Look up a field and return it only if it is a string
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.field(key).and_then(Value::as_str)
    }
}

/// Authentication block attached to token responses
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecretAuth {
    #[serde(default)]
    pub client_token: String,
    #[serde(default)]
    pub accessor: String,
    #[serde(default)]
    pub policies: Option<Vec<String>>,
    #[serde(default)]
    pub lease_duration: u64,
    #[serde(default)]
    pub renewable: bool,
}

/// Result of looking up the calling token
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenLookup {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub accessor: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub policies: Option<Vec<String>>,
    #[serde(default)]
    pub renewable: bool,
    #[serde(default)]
    pub ttl: u64,
}

/// Lease configuration reported for an existing mount, in seconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountConfigOutput {
    #[serde(default)]
    pub default_lease_ttl: u64,
    #[serde(default)]
    pub max_lease_ttl: u64,
}

/// A mount as reported by the backend's mount listing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountOutput {
    #[serde(rename = "type")]
    pub mount_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub config: MountConfigOutput,
}

/// Parameters for creating a mount
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MountInput {
    #[serde(rename = "type")]
    pub mount_type: String,
    pub description: String,
}

/// Desired lease tuning of a mount
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MountTuning {
    pub default_lease_ttl: Duration,
    pub max_lease_ttl: Duration,
}

impl MountTuning {
    /// Both lease TTLs set to the same value
    pub fn uniform(ttl: Duration) -> Self {
        Self {
            default_lease_ttl: ttl,
            max_lease_ttl: ttl,
        }
    }

    /// Whether an observed mount configuration differs from this tuning
    pub fn differs_from(&self, observed: &MountConfigOutput) -> bool {
        observed.default_lease_ttl != self.default_lease_ttl.as_secs()
            || observed.max_lease_ttl != self.max_lease_ttl.as_secs()
    }
}

/// Parameters for creating a token, either orphaned or through a token role
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TokenCreateRequest {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub policies: Vec<String>,
}

/// Format a duration the way the backend expects TTL strings (`"<secs>s"`)
pub fn ttl_string(duration: Duration) -> String {
    format!("{}s", duration.as_secs())
}

/// Parse a TTL value the backend may hand back either as a number of
///  seconds or as a `"<secs>s"` string
pub fn parse_ttl(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().trim_end_matches('s').parse().ok(),
        _ => None,
    }
}

/// Fields the backend reads back as a number of seconds
const TTL_FIELDS: &[&str] = &[
    "ttl",
    "max_ttl",
    "period",
    "explicit_max_ttl",
    "default_lease_ttl",
    "max_lease_ttl",
];

/// Fields the backend reads back as a list
const LIST_FIELDS: &[&str] = &[
    "allowed_policies",
    "disallowed_policies",
    "allowed_domains",
    "organization",
    "ou",
];

/// Items of a list field, given either as a comma-separated string or as a
///  JSON array
pub fn split_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// Whether two values of a role field mean the same thing
///
/// TTLs compare in seconds and lists compare as sets, whichever shape each
///  side comes in.
pub fn same_setting(key: &str, desired: &Value, observed: &Value) -> bool {
    if TTL_FIELDS.contains(&key) {
        return parse_ttl(desired).is_some() && parse_ttl(desired) == parse_ttl(observed);
    }
    if LIST_FIELDS.contains(&key) || desired.is_array() || observed.is_array() {
        let desired: BTreeSet<String> = split_list(Some(desired)).into_iter().collect();
        let observed: BTreeSet<String> = split_list(Some(observed)).into_iter().collect();
        return desired == observed;
    }
    desired == observed
}

/// Whether every desired field is present in `observed` with the same
///  meaning. Extra observed fields are ignored.
pub fn settings_match(desired: &SecretData, observed: &SecretData) -> bool {
    desired.iter().all(|(key, value)| {
        observed
            .get(key)
            .is_some_and(|current| same_setting(key, value, current))
    })
}

/// Rewrite role fields the way the backend reads them back: TTLs as
///  seconds and list fields as arrays
pub fn read_back_shape(data: &SecretData) -> SecretData {
    data.iter()
        .map(|(key, value)| {
            let value = if TTL_FIELDS.contains(&key.as_str()) {
                parse_ttl(value).map(Value::from).unwrap_or_else(|| value.clone())
            } else if LIST_FIELDS.contains(&key.as_str()) {
                Value::from(split_list(Some(value)))
            } else {
                value.clone()
            };
            (key.clone(), value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_secret_tolerates_null_data() {
        let secret: Secret = serde_json::from_value(json!({
            "lease_duration": 0,
            "renewable": false,
            "data": null,
            "auth": {
                "client_token": "abc",
                "accessor": "def",
                "policies": ["default"],
                "lease_duration": 3600,
                "renewable": true
            }
        }))
        .unwrap();

        assert!(secret.data.is_none());
        assert_eq!(secret.auth.unwrap().client_token, "abc");
    }

    #[test]
    fn test_str_field_ignores_non_strings() {
        let secret: Secret = serde_json::from_value(json!({
            "data": {"certificate": "cert", "serial": 7}
        }))
        .unwrap();

        assert_eq!(secret.str_field("certificate"), Some("cert"));
        assert_eq!(secret.str_field("serial"), None);
        assert_eq!(secret.str_field("missing"), None);
    }

    #[test]
    fn test_tuning_differs() {
        let tuning = MountTuning::uniform(Duration::from_secs(3600));
        let same = MountConfigOutput {
            default_lease_ttl: 3600,
            max_lease_ttl: 3600,
        };
        let other = MountConfigOutput {
            default_lease_ttl: 0,
            max_lease_ttl: 3600,
        };
        assert!(!tuning.differs_from(&same));
        assert!(tuning.differs_from(&other));
    }

    #[test]
    fn test_parse_ttl() {
        assert_eq!(parse_ttl(&json!(60)), Some(60));
        assert_eq!(parse_ttl(&json!("60s")), Some(60));
        assert_eq!(parse_ttl(&json!("soon")), None);
        assert_eq!(ttl_string(Duration::from_secs(90)), "90s");
    }

    #[test]
    fn test_settings_match_read_back_shape() {
        let mut written = SecretData::new();
        written.insert("period".to_string(), json!("3600s"));
        written.insert("allowed_policies".to_string(), json!("c1/worker,default"));
        written.insert("organization".to_string(), json!("system:nodes"));
        written.insert("orphan".to_string(), json!(true));

        let mut read = SecretData::new();
        read.insert("period".to_string(), json!(3600));
        read.insert("allowed_policies".to_string(), json!(["default", "c1/worker"]));
        read.insert("organization".to_string(), json!(["system:nodes"]));
        read.insert("orphan".to_string(), json!(true));
        read.insert("renewable".to_string(), json!(true));

        assert!(settings_match(&written, &read));
        assert_eq!(read_back_shape(&written).get("period"), Some(&json!(3600)));
        assert!(settings_match(&written, &read_back_shape(&written)));

        read.insert("period".to_string(), json!(60));
        assert!(!settings_match(&written, &read));
        read.insert("period".to_string(), json!(3600));
        read.insert("allowed_policies".to_string(), json!(["default", "c1/master"]));
        assert!(!settings_match(&written, &read));
        read.remove("allowed_policies");
        assert!(!settings_match(&written, &read));
    }
}

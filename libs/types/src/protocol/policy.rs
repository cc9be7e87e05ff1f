//! Call classification
//!
//! Which calls need special handling is data, not code: the bridge and the
//! dispatcher both consult the same [`CallPolicy`].

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallPolicy {
    /// Types whose `fetch_key` method forwards a raw HTTP request
    pub fetch_passthrough_types: Vec<String>,
    pub fetch_key: String,
    /// Types whose calls always take the asynchronous path
    pub always_async_types: Vec<String>,
    /// Types whose `mutating_argument_key` method writes into its first argument
    pub mutating_argument_types: Vec<String>,
    pub mutating_argument_key: String,
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self {
            fetch_passthrough_types: strings(&["Fetcher", "DurableObject", "WorkerRpc"]),
            fetch_key: "fetch".to_string(),
            always_async_types: strings(&["DurableObject", "WorkerRpc"]),
            mutating_argument_types: strings(&["HeadResult", "GetResult"]),
            mutating_argument_key: "writeHttpMetadata".to_string(),
        }
    }
}

impl CallPolicy {
    pub fn is_fetch_passthrough(&self, type_name: &str, key: Option<&str>) -> bool {
        key == Some(self.fetch_key.as_str()) && contains(&self.fetch_passthrough_types, type_name)
    }

    pub fn is_always_async(&self, type_name: &str) -> bool {
        contains(&self.always_async_types, type_name)
    }

    pub fn is_mutating_argument(&self, type_name: &str, key: Option<&str>) -> bool {
        key == Some(self.mutating_argument_key.as_str())
            && contains(&self.mutating_argument_types, type_name)
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn contains(types: &[String], type_name: &str) -> bool {
    types.iter().any(|t| t == type_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_classifies_known_forms() {
        let policy = CallPolicy::default();
        assert!(policy.is_fetch_passthrough("Fetcher", Some("fetch")));
        assert!(!policy.is_fetch_passthrough("Fetcher", Some("connect")));
        assert!(!policy.is_fetch_passthrough("KvNamespace", Some("fetch")));
        assert!(policy.is_always_async("DurableObject"));
        assert!(!policy.is_always_async("Fetcher"));
        assert!(policy.is_mutating_argument("HeadResult", Some("writeHttpMetadata")));
        assert!(!policy.is_mutating_argument("HeadResult", None));
    }

    #[test]
    fn partial_policies_keep_remaining_defaults() {
        let policy: CallPolicy =
            serde_json::from_str(r#"{"always_async_types":["Queue"]}"#).unwrap();
        assert!(policy.is_always_async("Queue"));
        assert!(!policy.is_always_async("DurableObject"));
        assert_eq!(policy.fetch_key, "fetch");
    }
}

//! kwatch core types: resource descriptors, object keys and change events.

#![forbid(unsafe_code)]

use std::fmt;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod filter;

pub use filter::NameFilter;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("unexpected GroupVersion string: {0}")]
    InvalidGroupVersion(String),
}

/// One watchable resource type, e.g. `apps/v1/deployments`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub group: String,
    pub version: String,
    /// Plural resource name as served by the API (`deployments`).
    pub resource: String,
    /// Kind served under this resource (`Deployment`); needed to address it dynamically.
    pub kind: String,
}

impl ResourceDescriptor {
    pub fn group_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// `group/version/resource` key matched by the group-version-resource filter.
    pub fn gvr_key(&self) -> String {
        format!("{}/{}", self.group_version(), self.resource)
    }
}

impl fmt::Display for ResourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.gvr_key())
    }
}

/// A resource served under one group-version in the discovered catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogResource {
    pub name: String,
    pub kind: String,
}

/// Catalog entry: a group-version and every resource it serves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub group_version: String,
    pub resources: Vec<CatalogResource>,
}

/// Split `apps/v1` into `("apps", "v1")` and `v1` into `("", "v1")`.
pub fn parse_group_version(gv: &str) -> Result<(String, String), CoreError> {
    if gv.is_empty() || gv == "/" {
        return Ok((String::new(), String::new()));
    }
    match gv.split('/').collect::<Vec<_>>().as_slice() {
        [version] => Ok((String::new(), (*version).to_string())),
        [group, version] => Ok(((*group).to_string(), (*version).to_string())),
        _ => Err(CoreError::InvalidGroupVersion(gv.to_string())),
    }
}

/// Last observed state of an object. An empty JSON object stands for "does not exist".
pub type ObjectState = Value;

/// Baseline used when an object did not exist before, or no longer exists.
pub fn empty_state() -> ObjectState {
    Value::Object(serde_json::Map::new())
}

fn str_field<'a>(obj: &'a Value, path: &[&str]) -> &'a str {
    let mut cur = obj;
    for seg in path {
        match cur.get(seg) {
            Some(v) => cur = v,
            None => return "",
        }
    }
    cur.as_str().unwrap_or("")
}

pub fn namespace_of(obj: &Value) -> &str {
    str_field(obj, &["metadata", "namespace"])
}

/// Cache key of an object: `[namespace/]name [apiVersion/]kind`, kind lowercased.
pub fn object_key(obj: &Value) -> String {
    let mut key = String::new();
    let ns = namespace_of(obj);
    if !ns.is_empty() {
        key.push_str(ns);
        key.push('/');
    }
    key.push_str(str_field(obj, &["metadata", "name"]));
    key.push(' ');
    let api = str_field(obj, &["apiVersion"]);
    if !api.is_empty() {
        key.push_str(api);
        key.push('/');
    }
    key.push_str(&str_field(obj, &["kind"]).to_lowercase());
    key
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EventType {
    Added,
    Modified,
    Deleted,
    /// Liveness only; carries no object change.
    Bookmark,
}

/// One notification read from a change stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchEvent {
    pub event_type: EventType,
    pub object: Value,
}

impl WatchEvent {
    pub fn new(event_type: EventType, object: Value) -> Self {
        Self { event_type, object }
    }
}

/// A rendered change ready for printing.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    /// When the change was processed (not when it happened in the cluster).
    pub timestamp: DateTime<Local>,
    pub key: String,
    pub diff: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_includes_namespace_and_lowercased_kind() {
        let o = json!({ "kind": "Widget", "metadata": { "namespace": "a", "name": "x" } });
        assert_eq!(object_key(&o), "a/x widget");
    }

    #[test]
    fn key_includes_api_version_when_present() {
        let o = json!({ "apiVersion": "apps/v1", "kind": "Deployment", "metadata": { "namespace": "ns", "name": "web" } });
        assert_eq!(object_key(&o), "ns/web apps/v1/deployment");
        let cluster = json!({ "apiVersion": "v1", "kind": "Node", "metadata": { "name": "n1" } });
        assert_eq!(object_key(&cluster), "n1 v1/node");
    }

    #[test]
    fn key_of_empty_object_does_not_panic() {
        assert_eq!(object_key(&empty_state()), " ");
    }

    #[test]
    fn parse_group_version_core_and_named() {
        assert_eq!(parse_group_version("v1").unwrap(), (String::new(), "v1".to_string()));
        assert_eq!(parse_group_version("apps/v1").unwrap(), ("apps".to_string(), "v1".to_string()));
        assert!(parse_group_version("a/b/c").is_err());
    }

    #[test]
    fn descriptor_keys() {
        let d = ResourceDescriptor { group: String::new(), version: "v1".into(), resource: "pods".into(), kind: "Pod".into() };
        assert_eq!(d.gvr_key(), "v1/pods");
        let d = ResourceDescriptor { group: "apps".into(), version: "v1".into(), resource: "deployments".into(), kind: "Deployment".into() };
        assert_eq!(d.to_string(), "apps/v1/deployments");
    }
}

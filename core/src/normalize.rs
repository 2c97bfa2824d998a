//! Flattening of response envelopes into per-operation results.
//!
//! Keyspace actions are flattened (see [`Reply`]); anything else, including
//! the lock, leader and stats modules' JSON, is passed through as
//! [`Reply::Raw`].

use chrono::DateTime;
use serde_json::Value;
use thiserror::Error;

use crate::types::{Entry, Envelope, Node, Reply};

/// Actions whose envelopes are flattened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Get,
    Set,
    Create,
    Delete,
    Expire,
    CompareAndSwap,
    CompareAndDelete,
}

impl Action {
    fn parse(action: &str) -> Option<Self> {
        Some(match action {
            "get" => Action::Get,
            "set" => Action::Set,
            "create" => Action::Create,
            "delete" => Action::Delete,
            "expire" => Action::Expire,
            "compareAndSwap" => Action::CompareAndSwap,
            "compareAndDelete" => Action::CompareAndDelete,
            _ => return None,
        })
    }

    fn as_str(self) -> &'static str {
        match self {
            Action::Get => "get",
            Action::Set => "set",
            Action::Create => "create",
            Action::Delete => "delete",
            Action::Expire => "expire",
            Action::CompareAndSwap => "compareAndSwap",
            Action::CompareAndDelete => "compareAndDelete",
        }
    }
}

/// An envelope whose action is known but whose nodes are not where the
/// action requires them.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("malformed {action} envelope: {source}")]
    Malformed {
        action: String,
        source: serde_json::Error,
    },

    #[error("{action} envelope has no {field}")]
    Missing { action: String, field: &'static str },

    #[error("invalid expiration {value:?}: {source}")]
    Expiration {
        value: String,
        source: chrono::ParseError,
    },
}

/// Flatten a parsed response body.
pub fn normalize(value: Value) -> Result<Reply, EnvelopeError> {
    let Some(action) = value.get("action").and_then(Value::as_str).and_then(Action::parse) else {
        return Ok(Reply::Raw(value));
    };
    let envelope: Envelope =
        serde_json::from_value(value).map_err(|source| EnvelopeError::Malformed {
            action: action.as_str().to_string(),
            source,
        })?;

    match action {
        Action::Get => {
            let node = node(&envelope)?;
            if !node.dir {
                return Ok(Reply::Value(node.value.clone()));
            }
            match &node.nodes {
                Some(children) => Ok(Reply::Listing(children.iter().map(entry).collect())),
                None => Ok(Reply::Key(node.key.clone())),
            }
        }
        Action::Set => {
            let node = node(&envelope)?;
            match &envelope.prev_node {
                Some(prev) => Ok(Reply::Pair(node.value.clone(), prev.value.clone())),
                None => Ok(Reply::Value(node.value.clone())),
            }
        }
        Action::Create => {
            let node = node(&envelope)?;
            Ok(Reply::Pair(Some(node.key.clone()), node.value.clone()))
        }
        Action::Delete => {
            let prev = prev_node(&envelope)?;
            match prev.value.as_deref() {
                Some(value) if !value.is_empty() => Ok(Reply::Value(Some(value.to_string()))),
                _ => Ok(Reply::Key(prev.key.clone())),
            }
        }
        Action::Expire => {
            let prev = prev_node(&envelope)?;
            let raw = prev.expiration.as_deref().ok_or_else(|| EnvelopeError::Missing {
                action: envelope.action.clone(),
                field: "prevNode.expiration",
            })?;
            let expiration =
                DateTime::parse_from_rfc3339(raw).map_err(|source| EnvelopeError::Expiration {
                    value: raw.to_string(),
                    source,
                })?;
            Ok(Reply::Expired {
                key: prev.key.clone(),
                expiration,
            })
        }
        Action::CompareAndSwap => {
            let node = node(&envelope)?;
            let prev = prev_node(&envelope)?;
            Ok(Reply::Pair(prev.value.clone(), node.value.clone()))
        }
        Action::CompareAndDelete => Ok(Reply::Value(prev_node(&envelope)?.value.clone())),
    }
}

fn node(envelope: &Envelope) -> Result<&Node, EnvelopeError> {
    envelope.node.as_ref().ok_or_else(|| EnvelopeError::Missing {
        action: envelope.action.clone(),
        field: "node",
    })
}

fn prev_node(envelope: &Envelope) -> Result<&Node, EnvelopeError> {
    envelope.prev_node.as_ref().ok_or_else(|| EnvelopeError::Missing {
        action: envelope.action.clone(),
        field: "prevNode",
    })
}

fn entry(child: &Value) -> Entry {
    let key = child.get("key").and_then(Value::as_str);
    let value = child.get("value").and_then(Value::as_str);
    let dir = child.get("dir").and_then(Value::as_bool).unwrap_or(false);
    match (key, value) {
        (Some(key), Some(value)) => Entry::File {
            key: key.to_string(),
            value: value.to_string(),
        },
        (Some(key), None) if dir => Entry::Dir {
            key: key.to_string(),
            dir: true,
        },
        _ => Entry::Node(child.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn get_file_yields_value() {
        let reply = normalize(json!({"action": "get", "node": {"dir": false, "value": "bar"}})).unwrap();
        assert_eq!(reply, Reply::Value(Some("bar".to_string())));
    }

    #[test]
    fn get_dir_yields_simplified_children() {
        let reply = normalize(json!({
            "action": "get",
            "node": {"dir": true, "nodes": [{"key": "/a", "value": "1"}, {"key": "/b", "dir": true}]}
        }))
        .unwrap();
        let entries = reply.into_listing().unwrap();
        assert_eq!(
            serde_json::to_value(&entries).unwrap(),
            json!([{"key": "/a", "value": "1"}, {"key": "/b", "dir": true}])
        );
    }

    #[test]
    fn get_dir_children_drop_index_fields() {
        let reply = normalize(json!({
            "action": "get",
            "node": {"key": "/d", "dir": true, "nodes": [
                {"key": "/d/a", "value": "1", "modifiedIndex": 4, "createdIndex": 4},
                {"key": "/d/odd", "modifiedIndex": 5}
            ]}
        }))
        .unwrap();
        assert_eq!(
            reply,
            Reply::Listing(vec![
                Entry::File {
                    key: "/d/a".to_string(),
                    value: "1".to_string()
                },
                Entry::Node(json!({"key": "/d/odd", "modifiedIndex": 5})),
            ])
        );
    }

    #[test]
    fn get_empty_dir_yields_key() {
        let reply = normalize(json!({"action": "get", "node": {"key": "/empty", "dir": true}})).unwrap();
        assert_eq!(reply, Reply::Key("/empty".to_string()));
    }

    #[test]
    fn set_with_prev_node_yields_new_and_old() {
        let reply = normalize(json!({"action": "set", "node": {"value": "2"}, "prevNode": {"value": "1"}})).unwrap();
        assert_eq!(reply, Reply::Pair(Some("2".to_string()), Some("1".to_string())));
    }

    #[test]
    fn set_without_prev_node_yields_value() {
        let reply = normalize(json!({"action": "set", "node": {"key": "/a", "value": "2"}})).unwrap();
        assert_eq!(reply, Reply::Value(Some("2".to_string())));
    }

    #[test]
    fn create_yields_key_and_value() {
        let reply = normalize(json!({"action": "create", "node": {"key": "/x", "value": "v"}})).unwrap();
        assert_eq!(reply, Reply::Pair(Some("/x".to_string()), Some("v".to_string())));
    }

    #[test]
    fn delete_without_value_yields_key() {
        let reply = normalize(json!({"action": "delete", "prevNode": {"key": "/x"}})).unwrap();
        assert_eq!(reply, Reply::Key("/x".to_string()));
    }

    #[test]
    fn delete_with_empty_value_yields_key() {
        let reply = normalize(json!({"action": "delete", "prevNode": {"key": "/x", "value": ""}})).unwrap();
        assert_eq!(reply, Reply::Key("/x".to_string()));
    }

    #[test]
    fn delete_with_value_yields_value() {
        let reply = normalize(json!({"action": "delete", "node": {"key": "/x"}, "prevNode": {"key": "/x", "value": "old"}})).unwrap();
        assert_eq!(reply, Reply::Value(Some("old".to_string())));
    }

    #[test]
    fn expire_parses_timestamp() {
        let reply = normalize(json!({
            "action": "expire",
            "node": {"key": "/t"},
            "prevNode": {"key": "/t", "expiration": "2013-12-04T12:01:21.874888581-08:00"}
        }))
        .unwrap();
        match reply {
            Reply::Expired { key, expiration } => {
                assert_eq!(key, "/t");
                assert_eq!(expiration.timestamp(), 1_386_187_281);
            }
            other => panic!("expected Expired, got {other:?}"),
        }
    }

    #[test]
    fn expire_with_bad_timestamp_is_an_error() {
        let err = normalize(json!({"action": "expire", "prevNode": {"key": "/t", "expiration": "yesterday"}})).unwrap_err();
        assert!(matches!(err, EnvelopeError::Expiration { .. }));
    }

    #[test]
    fn compare_and_swap_yields_old_and_new() {
        let reply = normalize(json!({
            "action": "compareAndSwap",
            "node": {"key": "/a", "value": "new"},
            "prevNode": {"key": "/a", "value": "old"}
        }))
        .unwrap();
        assert_eq!(reply, Reply::Pair(Some("old".to_string()), Some("new".to_string())));
    }

    #[test]
    fn compare_and_delete_yields_prev_value() {
        let reply = normalize(json!({"action": "compareAndDelete", "prevNode": {"key": "/a", "value": "old"}})).unwrap();
        assert_eq!(reply, Reply::Value(Some("old".to_string())));
    }

    #[test]
    fn unknown_action_passes_through() {
        let body = json!({"action": "update", "node": {"key": "/a", "value": "1"}});
        assert_eq!(normalize(body.clone()).unwrap(), Reply::Raw(body));
    }

    #[test]
    fn non_envelope_values_pass_through() {
        let stats = json!({"leader": "node1", "followers": {}});
        assert_eq!(normalize(stats.clone()).unwrap(), Reply::Raw(stats));
        assert_eq!(normalize(json!("node1")).unwrap(), Reply::Raw(json!("node1")));
    }

    #[test]
    fn missing_prev_node_is_reported() {
        let err = normalize(json!({"action": "compareAndDelete", "node": {"key": "/a"}})).unwrap_err();
        assert!(matches!(err, EnvelopeError::Missing { field: "prevNode", .. }));
    }
}

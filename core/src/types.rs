//! Wire and result types for the keyspace API.
//!
//! # Design
//! [`Envelope`] and [`Node`] mirror the service's JSON. They are defined
//! here rather than shared with the mock server; the integration tests catch
//! drift between the two. [`Reply`] is what callers actually receive: the
//! envelope flattened into the shape each operation promises.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The service's response wrapper for keyspace operations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<Node>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_node: Option<Node>,
}

/// A key or directory entry. The root directory carries no key.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    #[serde(default)]
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default)]
    pub dir: bool,
    /// Children, kept raw so unexpected shapes can be passed through.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_index: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_index: Option<u64>,
}

/// One child of a directory listing.
///
/// Serialises as `{"key", "value"}` for files and `{"key", "dir": true}`
/// for directories.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum Entry {
    File { key: String, value: String },
    Dir { key: String, dir: bool },
    /// A child that is neither, passed through untouched.
    Node(Value),
}

/// The result of a successful call, shaped per operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// A single value: `get` on a file, `set` without a previous node,
    /// `delete` and `compareAndDelete`.
    Value(Option<String>),
    /// A bare key: `get` on an empty directory, `delete` of a valueless node.
    Key(String),
    Listing(Vec<Entry>),
    /// `set` with a previous node: (new, old). `create`: (key, value).
    /// `compareAndSwap`: (old, new).
    Pair(Option<String>, Option<String>),
    Expired {
        key: String,
        expiration: DateTime<FixedOffset>,
    },
    /// JSON the normaliser has no flattening for, returned unchanged.
    Raw(Value),
    /// A non-JSON body returned under a success status.
    Text(String),
}

impl Reply {
    /// The single string carried by `Value`, `Key` or `Text`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Reply::Value(value) => value.as_deref(),
            Reply::Key(key) | Reply::Text(key) => Some(key),
            _ => None,
        }
    }

    pub fn into_listing(self) -> Option<Vec<Entry>> {
        match self {
            Reply::Listing(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn into_pair(self) -> Option<(Option<String>, Option<String>)> {
        match self {
            Reply::Pair(a, b) => Some((a, b)),
            _ => None,
        }
    }
}

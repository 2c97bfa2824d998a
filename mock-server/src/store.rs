//! In-memory keyspace with v2 semantics.
//!
//! Keys are absolute paths. Directories are implicit parents or explicit
//! `dir=true` nodes; the root `/` always exists. Every mutation bumps the
//! global index and produces an [`Event`] whose body is the JSON envelope
//! the HTTP layer returns and broadcasts to watchers.

use std::collections::{BTreeMap, VecDeque};

use axum::http::StatusCode;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde_json::{json, Map, Value};

const HISTORY: usize = 1000;

#[derive(Debug, Clone)]
struct Record {
    value: Option<String>,
    dir: bool,
    created_index: u64,
    modified_index: u64,
    expiration: Option<DateTime<Utc>>,
}

/// A completed mutation.
#[derive(Debug, Clone)]
pub struct Event {
    pub key: String,
    pub index: u64,
    /// `true` if the mutation created the key.
    pub created: bool,
    pub body: Value,
}

/// A request the keyspace refused, with the service's code.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreError {
    pub code: u16,
    pub cause: String,
    pub index: u64,
}

impl StoreError {
    pub fn message(&self) -> &'static str {
        match self.code {
            100 => "Key not found",
            101 => "Compare failed",
            102 => "Not a file",
            104 => "Not a directory",
            105 => "Key already exists",
            107 => "Root is read only",
            108 => "Directory not empty",
            200 => "Value is Required in POST form",
            202 => "The given TTL in POST form is not a number",
            203 => "The given index in POST form is not a number",
            300 => "Raft Internal Error",
            401 => "The event in requested index is outdated and cleared",
            _ => "Unknown error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self.code {
            100 => StatusCode::NOT_FOUND,
            101 | 105 => StatusCode::PRECONDITION_FAILED,
            102 | 104 | 107 | 108 => StatusCode::FORBIDDEN,
            200..=299 | 401 => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn to_json(&self) -> Value {
        json!({
            "errorCode": self.code,
            "message": self.message(),
            "cause": self.cause,
            "index": self.index,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct SetArgs {
    pub value: Option<String>,
    pub dir: bool,
    pub ttl: Option<u64>,
    pub prev_exist: Option<bool>,
    pub prev_value: Option<String>,
    pub prev_index: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct DeleteArgs {
    pub recursive: bool,
    pub dir: bool,
    pub prev_value: Option<String>,
    pub prev_index: Option<u64>,
}

#[derive(Debug, Default)]
pub struct Store {
    nodes: BTreeMap<String, Record>,
    index: u64,
    history: VecDeque<Event>,
}

/// Normalise to `/a/b` form; `""` and `"/"` both mean the root.
pub fn clean_key(key: &str) -> String {
    let parts: Vec<&str> = key.split('/').filter(|p| !p.is_empty()).collect();
    format!("/{}", parts.join("/"))
}

fn child_prefix(key: &str) -> String {
    if key == "/" {
        "/".to_string()
    } else {
        format!("{key}/")
    }
}

fn ancestors(key: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = key;
    while let Some(pos) = current.rfind('/') {
        if pos == 0 {
            break;
        }
        current = &current[..pos];
        out.push(current.to_string());
    }
    out.reverse();
    out
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    fn fail(&self, code: u16, cause: impl Into<String>) -> StoreError {
        StoreError {
            code,
            cause: cause.into(),
            index: self.index,
        }
    }

    fn children(&self, key: &str) -> Vec<String> {
        let prefix = child_prefix(key);
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter(|(k, _)| !k[prefix.len()..].contains('/'))
            .map(|(k, _)| k.clone())
            .collect()
    }

    fn descendants(&self, key: &str) -> Vec<String> {
        let prefix = child_prefix(key);
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(k, _)| k.clone())
            .collect()
    }

    fn node_json(&self, key: &str, record: &Record, list: bool, recursive: bool, now: DateTime<Utc>) -> Value {
        let mut node = Map::new();
        node.insert("key".into(), json!(key));
        if record.dir {
            node.insert("dir".into(), json!(true));
        } else {
            node.insert("value".into(), json!(record.value.clone().unwrap_or_default()));
        }
        if let Some(expiration) = record.expiration {
            node.insert("expiration".into(), json!(timestamp(expiration)));
            let ttl = (expiration - now).num_milliseconds().max(0);
            node.insert("ttl".into(), json!((ttl + 999) / 1000));
        }
        node.insert("modifiedIndex".into(), json!(record.modified_index));
        node.insert("createdIndex".into(), json!(record.created_index));
        if record.dir && list {
            let children: Vec<Value> = self
                .children(key)
                .iter()
                .filter_map(|k| self.nodes.get(k).map(|r| (k, r)))
                .map(|(k, r)| self.node_json(k, r, recursive, recursive, now))
                .collect();
            if !children.is_empty() {
                node.insert("nodes".into(), Value::Array(children));
            }
        }
        Value::Object(node)
    }

    fn root_json(&self, recursive: bool, now: DateTime<Utc>) -> Value {
        let children: Vec<Value> = self
            .children("/")
            .iter()
            .filter_map(|k| self.nodes.get(k).map(|r| (k, r)))
            .map(|(k, r)| self.node_json(k, r, recursive, recursive, now))
            .collect();
        let mut node = json!({"key": "/", "dir": true});
        if !children.is_empty() {
            node["nodes"] = Value::Array(children);
        }
        node
    }

    fn record(&mut self, event: Event) -> Event {
        self.history.push_back(event.clone());
        if self.history.len() > HISTORY {
            self.history.pop_front();
        }
        event
    }

    /// Remove expired keys, returning one `expire` event per key.
    pub fn purge(&mut self, now: DateTime<Utc>) -> Vec<Event> {
        let expired: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, r)| r.expiration.is_some_and(|at| at <= now))
            .map(|(k, _)| k.clone())
            .collect();

        let mut events = Vec::new();
        for key in expired {
            let Some(record) = self.nodes.get(&key).cloned() else {
                // removed with an expired parent
                continue;
            };
            let prev = self.node_json(&key, &record, false, false, now);
            for child in self.descendants(&key) {
                self.nodes.remove(&child);
            }
            self.nodes.remove(&key);
            self.index += 1;
            let body = json!({
                "action": "expire",
                "node": {"key": key, "modifiedIndex": self.index, "createdIndex": record.created_index},
                "prevNode": prev,
            });
            let event = Event {
                key: key.clone(),
                index: self.index,
                created: false,
                body,
            };
            events.push(self.record(event));
        }
        events
    }

    pub fn get(&self, key: &str, recursive: bool, now: DateTime<Utc>) -> Result<Value, StoreError> {
        let node = if key == "/" {
            self.root_json(recursive, now)
        } else {
            let record = self.nodes.get(key).ok_or_else(|| self.fail(100, key))?;
            self.node_json(key, record, true, recursive, now)
        };
        Ok(json!({"action": "get", "node": node}))
    }

    pub fn set(&mut self, key: &str, args: SetArgs, now: DateTime<Utc>) -> Result<Event, StoreError> {
        if key == "/" {
            return Err(self.fail(107, "/"));
        }
        for ancestor in ancestors(key) {
            if let Some(record) = self.nodes.get(&ancestor) {
                if !record.dir {
                    return Err(self.fail(104, ancestor));
                }
            }
        }

        let existing = self.nodes.get(key).cloned();
        let compare = args.prev_value.is_some() || args.prev_index.is_some();
        let action = if compare {
            let current = existing.as_ref().ok_or_else(|| self.fail(100, key))?;
            if current.dir {
                return Err(self.fail(102, key));
            }
            let value_ok = args
                .prev_value
                .as_ref()
                .is_none_or(|pv| current.value.as_ref() == Some(pv));
            let index_ok = args.prev_index.is_none_or(|pi| current.modified_index == pi);
            if !value_ok || !index_ok {
                return Err(self.fail(101, compare_cause(&args.prev_value, args.prev_index, current)));
            }
            "compareAndSwap"
        } else {
            match args.prev_exist {
                Some(false) if existing.is_some() => return Err(self.fail(105, key)),
                Some(false) => "create",
                Some(true) if existing.is_none() => return Err(self.fail(100, key)),
                Some(true) => "update",
                None => "set",
            }
        };

        if let Some(current) = &existing {
            if current.dir && !(args.dir && action == "update") {
                return Err(self.fail(102, key));
            }
        }
        if !args.dir && args.value.is_none() {
            return Err(self.fail(200, "Set"));
        }

        self.index += 1;
        let index = self.index;
        for ancestor in ancestors(key) {
            self.nodes.entry(ancestor).or_insert(Record {
                value: None,
                dir: true,
                created_index: index,
                modified_index: index,
                expiration: None,
            });
        }

        let keep_created = matches!(action, "update" | "compareAndSwap");
        let record = Record {
            value: if args.dir { None } else { args.value },
            dir: args.dir,
            created_index: match &existing {
                Some(prev) if keep_created => prev.created_index,
                _ => index,
            },
            modified_index: index,
            expiration: args.ttl.map(|ttl| now + Duration::seconds(ttl as i64)),
        };
        let node = self.node_json(key, &record, false, false, now);
        self.nodes.insert(key.to_string(), record);

        let mut body = json!({"action": action, "node": node});
        if let Some(prev) = &existing {
            body["prevNode"] = self.node_json(key, prev, false, false, now);
        }
        let event = Event {
            key: key.to_string(),
            index,
            created: existing.is_none(),
            body,
        };
        Ok(self.record(event))
    }

    pub fn delete(&mut self, key: &str, args: DeleteArgs, now: DateTime<Utc>) -> Result<Event, StoreError> {
        if key == "/" {
            return Err(self.fail(107, "/"));
        }
        let existing = self.nodes.get(key).cloned().ok_or_else(|| self.fail(100, key))?;

        let compare = args.prev_value.is_some() || args.prev_index.is_some();
        if existing.dir {
            if compare {
                return Err(self.fail(102, key));
            }
            if !args.recursive && !args.dir {
                return Err(self.fail(102, key));
            }
            if !args.recursive && !self.children(key).is_empty() {
                return Err(self.fail(108, key));
            }
        } else if compare {
            let value_ok = args
                .prev_value
                .as_ref()
                .is_none_or(|pv| existing.value.as_ref() == Some(pv));
            let index_ok = args.prev_index.is_none_or(|pi| existing.modified_index == pi);
            if !value_ok || !index_ok {
                return Err(self.fail(101, compare_cause(&args.prev_value, args.prev_index, &existing)));
            }
        }

        let prev = self.node_json(key, &existing, false, false, now);
        for child in self.descendants(key) {
            self.nodes.remove(&child);
        }
        self.nodes.remove(key);
        self.index += 1;

        let mut node = json!({"key": key, "modifiedIndex": self.index, "createdIndex": existing.created_index});
        if existing.dir {
            node["dir"] = json!(true);
        }
        let action = if compare { "compareAndDelete" } else { "delete" };
        let event = Event {
            key: key.to_string(),
            index: self.index,
            created: false,
            body: json!({"action": action, "node": node, "prevNode": prev}),
        };
        Ok(self.record(event))
    }

    /// The first recorded event at or after `index` that a watcher on `key`
    /// would see.
    pub fn since(&self, key: &str, recursive: bool, index: u64) -> Result<Option<Event>, StoreError> {
        if let Some(oldest) = self.history.front() {
            if index < oldest.index && self.history.len() == HISTORY {
                return Err(self.fail(401, format!("the requested history has been cleared [{}/{index}]", oldest.index)));
            }
        }
        Ok(self
            .history
            .iter()
            .find(|e| e.index >= index && watches(key, recursive, &e.key))
            .cloned())
    }
}

/// Whether a watcher on `key` sees a change to `changed`.
pub fn watches(key: &str, recursive: bool, changed: &str) -> bool {
    changed == key || (recursive && changed.starts_with(&child_prefix(key)))
}

fn compare_cause(prev_value: &Option<String>, prev_index: Option<u64>, current: &Record) -> String {
    let mut parts = Vec::new();
    if let Some(pv) = prev_value {
        parts.push(format!(
            "[{pv} != {}]",
            current.value.clone().unwrap_or_default()
        ));
    }
    if let Some(pi) = prev_index {
        parts.push(format!("[{pi} != {}]", current.modified_index));
    }
    parts.join(" ")
}

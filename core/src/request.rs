//! Logical request descriptors.
//!
//! A [`Request`] names a method, a server-relative path, query parameters and
//! an optional form body. It says nothing about which server it goes to; the
//! dispatcher resolves that per attempt.

use std::time::Duration;

use url::form_urlencoded;

use crate::http::HttpMethod;

/// Ordered query or form parameters. Repeated keys are allowed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(Vec<(String, String)>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pair without touching existing entries for the same key.
    pub fn append(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.0.push((key.into(), value.to_string()));
        self
    }

    /// Set `key` to `value`, replacing every earlier entry for it.
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl ToString) {
        let key = key.into();
        let value = value.to_string();
        match self.0.iter().position(|(k, _)| *k == key) {
            Some(first) => {
                self.0[first].1 = value;
                let mut i = 0;
                self.0.retain(|(k, _)| {
                    let keep = i <= first || *k != key;
                    i += 1;
                    keep
                });
            }
            None => self.0.push((key, value)),
        }
    }

    /// Set `key` only if the caller has not already set it.
    pub fn or_insert(&mut self, key: impl Into<String>, value: impl ToString) {
        let key = key.into();
        if self.get(&key).is_none() {
            self.0.push((key, value.to_string()));
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn recursive(self, on: bool) -> Self {
        self.with("recursive", on)
    }

    pub fn wait(self, on: bool) -> Self {
        self.with("wait", on)
    }

    pub fn wait_index(self, index: u64) -> Self {
        self.with("waitIndex", index)
    }

    pub fn prev_exist(self, exists: bool) -> Self {
        self.with("prevExist", exists)
    }

    pub fn prev_value(self, value: impl ToString) -> Self {
        self.with("prevValue", value)
    }

    pub fn prev_index(self, index: u64) -> Self {
        self.with("prevIndex", index)
    }

    pub fn dir(self, on: bool) -> Self {
        self.with("dir", on)
    }

    pub fn ttl(self, seconds: u64) -> Self {
        self.with("ttl", seconds)
    }

    pub fn sorted(self, on: bool) -> Self {
        self.with("sorted", on)
    }

    /// `application/x-www-form-urlencoded` rendering, also used for queries.
    pub fn encode(&self) -> String {
        form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.iter())
            .finish()
    }
}

impl<K: Into<String>, V: ToString> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.to_string()))
                .collect(),
        )
    }
}

/// A form body: either explicit fields or a bare value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Form {
    Fields(Params),
    /// Sent as `value=<scalar>`.
    Scalar(String),
}

impl Form {
    pub fn value(value: impl Into<String>) -> Self {
        Form::Scalar(value.into())
    }

    pub fn into_fields(self) -> Params {
        match self {
            Form::Fields(params) => params,
            Form::Scalar(value) => Params::new().with("value", value),
        }
    }

    pub fn encode(&self) -> String {
        self.clone().into_fields().encode()
    }
}

impl From<&str> for Form {
    fn from(value: &str) -> Self {
        Form::Scalar(value.to_string())
    }
}

impl From<String> for Form {
    fn from(value: String) -> Self {
        Form::Scalar(value)
    }
}

impl From<Params> for Form {
    fn from(params: Params) -> Self {
        Form::Fields(params)
    }
}

/// Per-call transport options. Merged over the client defaults for one call
/// only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Extra headers. A header named here replaces the default of the same
    /// name.
    pub headers: Vec<(String, String)>,
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Defaults first, then overrides; later names win case-insensitively.
    pub(crate) fn merge_headers(&self, defaults: &[(String, String)]) -> Vec<(String, String)> {
        let mut merged: Vec<(String, String)> = defaults
            .iter()
            .filter(|(name, _)| {
                !self
                    .headers
                    .iter()
                    .any(|(own, _)| own.eq_ignore_ascii_case(name))
            })
            .cloned()
            .collect();
        merged.extend(self.headers.iter().cloned());
        merged
    }
}

/// One logical call against the keyspace service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: HttpMethod,
    /// Server-relative path, e.g. `/v2/keys/foo`.
    pub path: String,
    pub params: Params,
    pub form: Option<Form>,
    pub options: RequestOptions,
}

impl Request {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            params: Params::new(),
            form: None,
            options: RequestOptions::default(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Put, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, path)
    }

    pub fn params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    pub fn form(mut self, form: impl Into<Form>) -> Self {
        self.form = Some(form.into());
        self
    }

    pub fn options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    /// Path plus encoded query, relative to a server base URL.
    pub fn target(&self) -> String {
        if self.params.is_empty() {
            self.path.clone()
        } else {
            format!("{}?{}", self.path, self.params.encode())
        }
    }
}

//! Error types for the keyspace client.
//!
//! # Design
//! The service reports failures three ways: a JSON body carrying an
//! `errorCode`, a plain-text body under a 4xx/5xx status, or a connection
//! that never produced a response at all. The first two are folded into
//! [`ApiError`], classified by [`ErrorKind`]. The third stays a
//! [`TransportError`] and is never reclassified, so callers can tell
//! "the cluster said no" apart from "nobody answered".
//!
//! [`Error`] is the single root every client operation returns.

use std::fmt;

use serde::Deserialize;
use thiserror::Error;

use crate::http::HttpResponse;

/// Any failure produced by a client operation.
#[derive(Debug, Error)]
pub enum Error {
    /// The service answered and the answer was classified as an error.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// No HTTP response was obtained. Surfaced verbatim once failover is
    /// exhausted.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The client configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A request could not be turned into a URL.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl Error {
    /// The taxonomy kind, if the service produced this error.
    pub fn kind(&self) -> Option<ErrorKind> {
        self.api().map(ApiError::kind)
    }

    pub fn api(&self) -> Option<&ApiError> {
        match self {
            Error::Api(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}

// ---------------------------------------------------------------------------
// Taxonomy
// ---------------------------------------------------------------------------

/// Broad split between "the request was wrong" and "the service failed".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Client,
    Server,
    Generic,
}

/// The family a code belongs to. Code families are grouped by hundreds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorFamily {
    /// 1xx codes: the command referenced invalid keyspace state.
    Command,
    /// 2xx codes: the form body was incomplete or malformed.
    PostForm,
    /// 3xx codes: consensus-layer failure.
    Raft,
    /// 4xx codes: watcher/event history failure.
    Etcd,
    /// 4xx status with no recognisable body.
    HttpClient,
    /// 5xx status with no recognisable body.
    HttpServer,
    Generic,
}

impl ErrorFamily {
    pub fn category(self) -> ErrorCategory {
        match self {
            ErrorFamily::Command | ErrorFamily::PostForm | ErrorFamily::HttpClient => {
                ErrorCategory::Client
            }
            ErrorFamily::Raft | ErrorFamily::Etcd | ErrorFamily::HttpServer => {
                ErrorCategory::Server
            }
            ErrorFamily::Generic => ErrorCategory::Generic,
        }
    }
}

/// Semantic error kinds, one per service error code plus the kinds
/// synthesised from HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    KeyNotFound,
    TestFailed,
    NotFile,
    NoMorePeer,
    NotDir,
    NodeExist,
    KeyIsPreserved,
    ValueRequired,
    PrevValueRequired,
    TtlNotANumber,
    IndexNotANumber,
    RaftInternal,
    LeaderElect,
    WatcherCleared,
    EventIndexCleared,
    HttpClientError,
    HttpServerError,
    /// An unrecognised code, or a response that fits no other kind.
    Unclassified,
}

const CODES: [(i64, ErrorKind); 15] = [
    (100, ErrorKind::KeyNotFound),
    (101, ErrorKind::TestFailed),
    (102, ErrorKind::NotFile),
    (103, ErrorKind::NoMorePeer),
    (104, ErrorKind::NotDir),
    (105, ErrorKind::NodeExist),
    (106, ErrorKind::KeyIsPreserved),
    (200, ErrorKind::ValueRequired),
    (201, ErrorKind::PrevValueRequired),
    (202, ErrorKind::TtlNotANumber),
    (203, ErrorKind::IndexNotANumber),
    (300, ErrorKind::RaftInternal),
    (301, ErrorKind::LeaderElect),
    (400, ErrorKind::WatcherCleared),
    (401, ErrorKind::EventIndexCleared),
];

/// Map a service error code to its kind.
pub fn classify(code: i64) -> ErrorKind {
    CODES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, kind)| *kind)
        .unwrap_or(ErrorKind::Unclassified)
}

impl ErrorKind {
    /// The service code for this kind, if it has one.
    pub fn code(self) -> Option<i64> {
        CODES.iter().find(|(_, k)| *k == self).map(|(c, _)| *c)
    }

    pub fn family(self) -> ErrorFamily {
        match self {
            ErrorKind::KeyNotFound
            | ErrorKind::TestFailed
            | ErrorKind::NotFile
            | ErrorKind::NoMorePeer
            | ErrorKind::NotDir
            | ErrorKind::NodeExist
            | ErrorKind::KeyIsPreserved => ErrorFamily::Command,
            ErrorKind::ValueRequired
            | ErrorKind::PrevValueRequired
            | ErrorKind::TtlNotANumber
            | ErrorKind::IndexNotANumber => ErrorFamily::PostForm,
            ErrorKind::RaftInternal | ErrorKind::LeaderElect => ErrorFamily::Raft,
            ErrorKind::WatcherCleared | ErrorKind::EventIndexCleared => ErrorFamily::Etcd,
            ErrorKind::HttpClientError => ErrorFamily::HttpClient,
            ErrorKind::HttpServerError => ErrorFamily::HttpServer,
            ErrorKind::Unclassified => ErrorFamily::Generic,
        }
    }

    pub fn category(self) -> ErrorCategory {
        self.family().category()
    }

    fn name(self) -> &'static str {
        match self {
            ErrorKind::KeyNotFound => "KeyNotFound",
            ErrorKind::TestFailed => "TestFailed",
            ErrorKind::NotFile => "NotFile",
            ErrorKind::NoMorePeer => "NoMorePeer",
            ErrorKind::NotDir => "NotDir",
            ErrorKind::NodeExist => "NodeExist",
            ErrorKind::KeyIsPreserved => "KeyIsPreserved",
            ErrorKind::ValueRequired => "ValueRequired",
            ErrorKind::PrevValueRequired => "PrevValueRequired",
            ErrorKind::TtlNotANumber => "TTLNotANumber",
            ErrorKind::IndexNotANumber => "IndexNotANumber",
            ErrorKind::RaftInternal => "RaftInternal",
            ErrorKind::LeaderElect => "LeaderElect",
            ErrorKind::WatcherCleared => "WatcherCleared",
            ErrorKind::EventIndexCleared => "EventIndexCleared",
            ErrorKind::HttpClientError => "HttpClientError",
            ErrorKind::HttpServerError => "HttpServerError",
            ErrorKind::Unclassified => "Unclassified",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Typed service error
// ---------------------------------------------------------------------------

/// A classified error reported by (or inferred from) the service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct ApiError {
    kind: ErrorKind,
    code: Option<i64>,
    message: String,
    cause: Option<String>,
    index: Option<u64>,
    status: Option<u16>,
    body: Option<String>,
}

/// Wire shape of the service's JSON error body.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(rename = "errorCode")]
    code: i64,
    #[serde(default)]
    message: String,
    cause: Option<String>,
    index: Option<u64>,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: kind.code(),
            message: message.into(),
            cause: None,
            index: None,
            status: None,
            body: None,
        }
    }

    pub(crate) fn unclassified(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unclassified, message)
    }

    /// Build from a JSON body that carries an `errorCode` field.
    pub(crate) fn from_error_body(value: &serde_json::Value, response: &HttpResponse) -> Self {
        let err = match serde_json::from_value::<ErrorBody>(value.clone()) {
            Ok(body) => Self {
                kind: classify(body.code),
                code: Some(body.code),
                message: body.message,
                cause: body.cause,
                index: body.index,
                status: None,
                body: None,
            },
            Err(e) => Self::unclassified(format!("malformed error body: {e}")),
        };
        err.with_response(response)
    }

    /// Synthesise an error from a status code and an unparseable body.
    pub(crate) fn from_status(kind: ErrorKind, response: &HttpResponse) -> Self {
        Self::new(kind, format!("{}\n{}", response.reason(), response.body)).with_response(response)
    }

    pub(crate) fn with_response(mut self, response: &HttpResponse) -> Self {
        self.status = Some(response.status);
        self.body = Some(response.body.clone());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn family(&self) -> ErrorFamily {
        self.kind.family()
    }

    pub fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// The raw code reported by the service. Present for unrecognised codes
    /// too, unlike [`ErrorKind::code`].
    pub fn code(&self) -> Option<i64> {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// The key or comparison the service blamed, e.g. `/foo` or `[a != b]`.
    pub fn cause(&self) -> Option<&str> {
        self.cause.as_deref()
    }

    /// The service's raft index at the time of the error.
    pub fn index(&self) -> Option<u64> {
        self.index
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Connect,
    Dns,
    Timeout,
    Io,
    /// The status line arrived but the body could not be read.
    Body,
    Other,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransportErrorKind::Connect => "connect",
            TransportErrorKind::Dns => "dns",
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::Io => "io",
            TransportErrorKind::Body => "body",
            TransportErrorKind::Other => "transport",
        };
        f.write_str(s)
    }
}

/// A request that never produced a complete HTTP response.
#[derive(Debug, Error)]
#[error("{kind} error: {source}")]
pub struct TransportError {
    kind: TransportErrorKind,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
}

impl TransportError {
    pub fn new(
        kind: TransportErrorKind,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            kind,
            source: source.into(),
        }
    }

    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    /// Whether another server may be tried. A server that answered but whose
    /// body could not be read is not retried elsewhere.
    pub fn is_retryable(&self) -> bool {
        self.kind != TransportErrorKind::Body
    }

    /// The underlying error as reported by the transport.
    pub fn get_ref(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        &*self.source
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("at least one server is required")]
    NoServers,

    #[error("invalid server url {url:?}: {reason}")]
    InvalidServer { url: String, reason: String },

    #[error("invalid value {value:?} for {name}")]
    InvalidValue { name: String, value: String },
}

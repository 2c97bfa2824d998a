//! Blocking client for an etcd-v2-style coordination service.
//!
//! # Overview
//! Turns logical operations (get, set, create, update, delete, wait, lock,
//! leader election, stats) into HTTP calls against one of several equivalent
//! servers, fails over on connection errors, classifies the service's mixed
//! error signalling into [`ApiError`], and flattens successful envelopes into
//! a per-operation [`Reply`].
//!
//! # Design
//! - [`Client`] owns an [`EndpointPool`] and a [`Transport`]; every operation
//!   goes through [`Client::dispatch`].
//! - The exchange itself is plain data ([`HttpRequest`] / [`HttpResponse`]),
//!   so the dispatcher runs unchanged over `ureq` or a scripted transport.
//! - Transport failures stay [`TransportError`]s; everything the service
//!   says is an [`ApiError`]. Both sit under the one [`Error`] root.
//! - Envelope types are defined independently from the mock-server crate;
//!   integration tests catch schema drift.

pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod normalize;
pub mod paths;
pub mod pool;
pub mod request;
pub mod transport;
pub mod types;

pub use client::{parse_response, Client, Parsed};
pub use config::ClientConfig;
pub use error::{
    classify, ApiError, ConfigError, Error, ErrorCategory, ErrorFamily, ErrorKind, TransportError,
    TransportErrorKind,
};
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use normalize::{normalize, EnvelopeError};
pub use pool::EndpointPool;
pub use request::{Form, Params, Request, RequestOptions};
pub use transport::{Transport, UreqTransport};
pub use types::{Entry, Envelope, Node, Reply};

pub type Result<T> = std::result::Result<T, Error>;

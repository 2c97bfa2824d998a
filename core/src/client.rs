//! Request dispatcher and the keyspace, lock, leader and stats operations.
//!
//! # Design
//! Every operation funnels into [`Client::dispatch`], which
//! 1. resolves the [`Request`] against the pool's current server
//!    ([`Client::build_request`]),
//! 2. on transport failure rotates the pool and retries, at most
//!    `pool size - 1` times, sleeping a fixed backoff in between; a server
//!    that answered but whose body could not be read is not retried,
//! 3. classifies the response with [`parse_response`], following one
//!    redirect hop when the service forwards a follower request to the
//!    leader.
//!
//! Parsing is a single attempt with two outcomes: a structured JSON body
//! (error code or envelope) or a raw body whose meaning comes from the HTTP
//! status. A failed parse is an ordinary branch.
//!
//! Retries re-send the same method, POST included. A lock acquisition whose
//! response was lost in transit can therefore be applied twice.

use std::thread;

use serde_json::Value;
use tracing::{debug, trace, warn};
use url::Url;

use crate::config::ClientConfig;
use crate::error::{ApiError, Error, ErrorKind};
use crate::http::{HttpRequest, HttpResponse};
use crate::normalize::normalize;
use crate::paths;
use crate::pool::EndpointPool;
use crate::request::{Form, Params, Request, RequestOptions};
use crate::transport::{Transport, UreqTransport};
use crate::types::Reply;
use crate::Result;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Outcome of classifying one response.
#[derive(Debug, Clone, PartialEq)]
pub enum Parsed {
    Reply(Reply),
    /// The service forwarded the request; re-issue it at this location.
    Redirect(String),
}

/// The single parse attempt over a response body.
enum Body {
    Structured(Value),
    /// Not a JSON object or array; carries the reason for the error path.
    Raw(String),
}

impl Body {
    fn parse(text: &str) -> Self {
        match serde_json::from_str::<Value>(text) {
            Ok(value @ (Value::Object(_) | Value::Array(_))) => Body::Structured(value),
            Ok(_) => Body::Raw("body is a bare JSON scalar".to_string()),
            Err(e) => Body::Raw(e.to_string()),
        }
    }
}

/// Classify a response: service error, flattened envelope, raw text, or a
/// redirect to follow.
pub fn parse_response(response: &HttpResponse) -> std::result::Result<Parsed, ApiError> {
    match Body::parse(&response.body) {
        Body::Structured(value) => {
            if value.get("errorCode").is_some() {
                return Err(ApiError::from_error_body(&value, response));
            }
            normalize(value)
                .map(Parsed::Reply)
                .map_err(|e| ApiError::unclassified(e.to_string()).with_response(response))
        }
        Body::Raw(reason) => {
            trace!(status = response.status, %reason, "unstructured response body");
            match response.status {
                200..=299 => Ok(Parsed::Reply(Reply::Text(response.body.clone()))),
                300..=399 => match response.header("location") {
                    Some(location) => Ok(Parsed::Redirect(location.to_string())),
                    None => Err(ApiError::unclassified(format!(
                        "redirect without location: {reason}"
                    ))
                    .with_response(response)),
                },
                400..=499 => Err(ApiError::from_status(ErrorKind::HttpClientError, response)),
                500..=599 => Err(ApiError::from_status(ErrorKind::HttpServerError, response)),
                _ => Err(ApiError::unclassified(reason).with_response(response)),
            }
        }
    }
}

/// Blocking client for a cluster of equivalent servers.
///
/// `Client` is `Sync` whenever its transport is; concurrent calls share the
/// pool's failover state.
pub struct Client<T = UreqTransport> {
    config: ClientConfig,
    pool: EndpointPool,
    transport: T,
}

impl Client<UreqTransport> {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let transport = UreqTransport::new(&config);
        Self::with_transport(config, transport)
    }

    /// See [`ClientConfig::from_env`].
    pub fn from_env() -> Result<Self> {
        Self::new(ClientConfig::from_env()?)
    }
}

impl<T: Transport> Client<T> {
    pub fn with_transport(config: ClientConfig, transport: T) -> Result<Self> {
        config.validate()?;
        let pool = EndpointPool::new(&config.servers)?;
        Ok(Self {
            config,
            pool,
            transport,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Current server order, current server first.
    pub fn servers(&self) -> Vec<String> {
        self.pool.snapshot()
    }

    /// Resolve `request` against `server`, merging the client's default
    /// headers under the call's own.
    pub fn build_request(&self, server: &str, request: &Request) -> HttpRequest {
        let mut headers = request.options.merge_headers(&self.config.headers);
        let body = request.form.as_ref().map(Form::encode);
        if body.is_some()
            && !headers
                .iter()
                .any(|(name, _)| name.eq_ignore_ascii_case("content-type"))
        {
            headers.push(("Content-Type".to_string(), FORM_CONTENT_TYPE.to_string()));
        }
        HttpRequest {
            method: request.method,
            url: format!("{server}{}", request.target()),
            headers,
            body,
            timeout: request.options.timeout,
        }
    }

    /// Send `request`, failing over between servers on transport errors.
    pub fn dispatch(&self, request: &Request) -> Result<Reply> {
        let mut retries = self.pool.len().saturating_sub(1);
        let mut tried: Vec<String> = Vec::new();
        let mut server = self.pool.current();

        loop {
            let http = self.build_request(&server, request);
            debug!(method = %http.method, url = %http.url, "dispatching request");

            match self.transport.execute(&http) {
                Ok(response) => return self.complete(&http, response),
                Err(err) if retries < 1 => {
                    debug!(server = %server, error = %err, "transport failure, no servers left");
                    return Err(err.into());
                }
                Err(err) if !err.is_retryable() => {
                    debug!(server = %server, error = %err, "unreadable response, not failing over");
                    return Err(err.into());
                }
                Err(err) => {
                    tried.push(server.clone());
                    let next = self.pool.rotate_excluding(&server, &tried);
                    retries -= 1;
                    warn!(
                        failed = %server,
                        next = %next,
                        retries_left = retries,
                        error = %err,
                        "transport failure, failing over"
                    );
                    server = next;
                    thread::sleep(self.config.failover_backoff());
                }
            }
        }
    }

    fn complete(&self, sent: &HttpRequest, response: HttpResponse) -> Result<Reply> {
        match parse_response(&response)? {
            Parsed::Reply(reply) => Ok(reply),
            Parsed::Redirect(location) => self.follow(sent, &location),
        }
    }

    /// Re-issue `sent` at `location`. Only one hop is taken.
    fn follow(&self, sent: &HttpRequest, location: &str) -> Result<Reply> {
        let target = Url::parse(&sent.url)
            .and_then(|base| base.join(location))
            .map_err(|e| Error::InvalidRequest(format!("bad redirect location {location:?}: {e}")))?;
        let hop = HttpRequest {
            url: target.into(),
            ..sent.clone()
        };
        debug!(method = %hop.method, from = %sent.url, to = %hop.url, "following redirect");

        let response = self.transport.execute(&hop)?;
        match parse_response(&response)? {
            Parsed::Reply(reply) => Ok(reply),
            Parsed::Redirect(next) => Err(ApiError::unclassified(format!(
                "redirected again to {next}, not following"
            ))
            .with_response(&response)
            .into()),
        }
    }

    fn read_params(&self, mut params: Params) -> Params {
        if self.config.consistent {
            params.or_insert("consistent", true);
        }
        params
    }

    // -----------------------------------------------------------------------
    // Keyspace
    // -----------------------------------------------------------------------

    pub fn get(&self, key: &str, params: Params) -> Result<Reply> {
        self.get_with(key, params, RequestOptions::default())
    }

    /// [`get`](Self::get) with per-call headers or timeout.
    pub fn get_with(&self, key: &str, params: Params, options: RequestOptions) -> Result<Reply> {
        let params = self.read_params(params);
        self.dispatch(&Request::get(paths::keys(key)).params(params).options(options))
    }

    pub fn set(&self, key: &str, form: impl Into<Form>, params: Params) -> Result<Reply> {
        self.set_with(key, form, params, RequestOptions::default())
    }

    pub fn set_with(
        &self,
        key: &str,
        form: impl Into<Form>,
        params: Params,
        options: RequestOptions,
    ) -> Result<Reply> {
        self.dispatch(
            &Request::put(paths::keys(key))
                .form(form)
                .params(params)
                .options(options),
        )
    }

    pub fn delete(&self, key: &str, params: Params) -> Result<Reply> {
        self.dispatch(&Request::delete(paths::keys(key)).params(params))
    }

    /// Block until the service reports a change under `key`.
    pub fn wait(&self, key: &str, params: Params) -> Result<Reply> {
        self.wait_with(key, params, RequestOptions::default())
    }

    /// [`wait`](Self::wait) with per-call options; a `timeout` abandons the
    /// watch with a [`TransportErrorKind::Timeout`](crate::TransportErrorKind)
    /// error once it elapses.
    pub fn wait_with(&self, key: &str, params: Params, options: RequestOptions) -> Result<Reply> {
        self.dispatch(
            &Request::get(paths::keys(key))
                .params(params.wait(true))
                .options(options),
        )
    }

    /// [`wait`](Self::wait), then hand the outcome to `then` after the
    /// heartbeat interval.
    pub fn wait_then<R>(
        &self,
        key: &str,
        params: Params,
        then: impl FnOnce(Result<Reply>) -> R,
    ) -> R {
        let outcome = self.wait(key, params);
        thread::sleep(self.config.heartbeat_interval());
        then(outcome)
    }

    /// Set `key` only if it does not exist yet.
    pub fn create(&self, key: &str, form: impl Into<Form>, params: Params) -> Result<Reply> {
        self.set(key, form, params.prev_exist(false))
    }

    /// Set `key` only if it already exists.
    pub fn update(&self, key: &str, form: impl Into<Form>, params: Params) -> Result<Reply> {
        self.set(key, form, params.prev_exist(true))
    }

    /// Recursive listing of `dir`.
    pub fn dir(&self, dir: &str, params: Params) -> Result<Reply> {
        self.get(dir, params.recursive(true))
    }

    pub fn mkdir(&self, dir: &str, params: Params) -> Result<Reply> {
        self.dispatch(&Request::put(paths::keys(dir)).params(params.dir(true)))
    }

    /// Recursive delete of `dir`. An explicit `recursive` in `params` wins.
    pub fn rmdir(&self, dir: &str, mut params: Params) -> Result<Reply> {
        params.or_insert("recursive", true);
        self.delete(dir, params)
    }

    pub fn compare_and_swap(
        &self,
        key: &str,
        form: impl Into<Form>,
        prev_value: &str,
    ) -> Result<Reply> {
        self.set(key, form, Params::new().prev_value(prev_value))
    }

    pub fn compare_and_delete(&self, key: &str, prev_value: &str) -> Result<Reply> {
        self.delete(key, Params::new().prev_value(prev_value))
    }

    // -----------------------------------------------------------------------
    // Lock module
    // -----------------------------------------------------------------------

    /// Returns the lock index as [`Reply::Text`].
    pub fn acquire_lock(&self, name: &str, ttl: u64) -> Result<Reply> {
        self.dispatch(&Request::post(paths::lock(name)).form(Params::new().ttl(ttl)))
    }

    pub fn renew_lock(&self, name: &str, form: impl Into<Form>) -> Result<Reply> {
        self.dispatch(&Request::put(paths::lock(name)).form(form))
    }

    pub fn release_lock(&self, name: &str, form: impl Into<Form>) -> Result<Reply> {
        self.dispatch(&Request::delete(paths::lock(name)).form(form))
    }

    pub fn retrieve_lock(&self, name: &str, params: Params) -> Result<Reply> {
        self.dispatch(&Request::get(paths::lock(name)).params(params))
    }

    // -----------------------------------------------------------------------
    // Leader module
    // -----------------------------------------------------------------------

    pub fn set_leader(&self, cluster: &str, name: &str, ttl: u64) -> Result<Reply> {
        let form = Params::new().with("name", name).ttl(ttl);
        self.dispatch(&Request::put(paths::leader(cluster)).form(form))
    }

    pub fn get_leader(&self, cluster: &str, params: Params) -> Result<Reply> {
        self.dispatch(&Request::get(paths::leader(cluster)).params(params))
    }

    pub fn delete_leader(&self, cluster: &str, name: &str) -> Result<Reply> {
        let form = Params::new().with("name", name);
        self.dispatch(&Request::delete(paths::leader(cluster)).form(form))
    }

    // -----------------------------------------------------------------------
    // Stats
    // -----------------------------------------------------------------------

    /// `kind` is `leader`, `self` or `store`. Stats are returned raw.
    pub fn stats(&self, kind: &str) -> Result<Reply> {
        self.dispatch(&Request::get(paths::stats(kind)))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Mutex;

    use super::*;
    use crate::error::{ErrorFamily, TransportError, TransportErrorKind};
    use crate::http::HttpMethod;

    type Respond = Box<dyn Fn(&HttpRequest) -> std::result::Result<HttpResponse, TransportError> + Send + Sync>;

    /// Answers from a closure and records every request it was given.
    struct Scripted {
        respond: Respond,
        seen: Mutex<Vec<HttpRequest>>,
    }

    impl Scripted {
        fn new(
            respond: impl Fn(&HttpRequest) -> std::result::Result<HttpResponse, TransportError>
                + Send
                + Sync
                + 'static,
        ) -> Self {
            Self {
                respond: Box::new(respond),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn seen(&self) -> Vec<HttpRequest> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl Transport for Scripted {
        fn execute(&self, request: &HttpRequest) -> std::result::Result<HttpResponse, TransportError> {
            self.seen.lock().unwrap().push(request.clone());
            (self.respond)(request)
        }
    }

    fn refused(request: &HttpRequest) -> TransportError {
        TransportError::new(
            TransportErrorKind::Connect,
            format!("connection refused: {}", request.url),
        )
    }

    fn client(servers: &[&str], transport: Scripted) -> Client<Scripted> {
        let mut config = ClientConfig::new(servers.iter().copied());
        // keeps expected read URLs short; covered on its own below
        config.consistent = false;
        config.election_timeout_ms = 0;
        config.heartbeat_interval_ms = 0;
        Client::with_transport(config, transport).unwrap()
    }

    fn host(url: &str) -> String {
        Url::parse(url).unwrap().host_str().unwrap().to_string()
    }

    const GET_BAR: &str = r#"{"action":"get","node":{"key":"/foo","value":"bar"}}"#;

    // --- failover ---

    #[test]
    fn failover_never_repeats_a_server() {
        for _ in 0..50 {
            let c = client(
                &["http://a:4001", "http://b:4001", "http://c:4001"],
                Scripted::new(|req| Err(refused(req))),
            );
            let err = c.get("foo", Params::new()).unwrap_err();
            assert!(err.is_transport());

            let hosts: Vec<String> = c.transport().seen().iter().map(|r| host(&r.url)).collect();
            assert_eq!(hosts.len(), 3, "pool of 3 allows 2 retries");
            let distinct: HashSet<&String> = hosts.iter().collect();
            assert_eq!(distinct.len(), 3, "repeated server in {hosts:?}");
            assert_eq!(hosts[0], "a");
        }
    }

    #[test]
    fn first_rotation_never_targets_failed_server() {
        for _ in 0..50 {
            let c = client(
                &["http://a:4001", "http://b:4001", "http://c:4001"],
                Scripted::new(|req| {
                    if req.url.starts_with("http://a:") {
                        Err(refused(req))
                    } else {
                        Ok(HttpResponse::new(200, GET_BAR))
                    }
                }),
            );
            let reply = c.get("foo", Params::new()).unwrap();
            assert_eq!(reply, Reply::Value(Some("bar".to_string())));

            let seen = c.transport().seen();
            assert_eq!(seen.len(), 2);
            assert_ne!(host(&seen[1].url), "a");
            assert_eq!(c.servers()[0], seen[1].url.split("/v2").next().unwrap());
        }
    }

    #[test]
    fn single_server_fails_without_retry() {
        let c = client(&["http://a:4001"], Scripted::new(|req| Err(refused(req))));
        let err = c.get("foo", Params::new()).unwrap_err();
        assert!(err.is_transport());
        assert_eq!(c.transport().seen().len(), 1);
    }

    #[test]
    fn last_transport_error_is_surfaced_verbatim() {
        let c = client(
            &["http://a:4001", "http://b:4001"],
            Scripted::new(|req| Err(refused(req))),
        );
        let err = c.get("foo", Params::new()).unwrap_err();
        let seen = c.transport().seen();
        match err {
            Error::Transport(t) => {
                assert_eq!(t.kind(), TransportErrorKind::Connect);
                assert_eq!(
                    t.get_ref().to_string(),
                    format!("connection refused: {}", seen[1].url)
                );
            }
            other => panic!("expected transport error, got {other:?}"),
        }
    }

    #[test]
    fn unreadable_body_is_not_failed_over() {
        let c = client(
            &["http://a:4001", "http://b:4001"],
            Scripted::new(|_| {
                Err(TransportError::new(
                    TransportErrorKind::Body,
                    "body exceeds limit",
                ))
            }),
        );
        let err = c.dir("big", Params::new()).unwrap_err();
        assert!(err.is_transport());
        assert_eq!(c.transport().seen().len(), 1);
        assert_eq!(host(&c.servers()[0]), "a");
    }

    #[test]
    fn service_errors_are_not_retried() {
        let c = client(
            &["http://a:4001", "http://b:4001"],
            Scripted::new(|_| {
                Ok(HttpResponse::new(
                    404,
                    r#"{"errorCode":100,"message":"Key not found","cause":"/foo","index":3}"#,
                ))
            }),
        );
        let err = c.get("foo", Params::new()).unwrap_err();
        let api = err.api().unwrap();
        assert_eq!(api.kind(), ErrorKind::KeyNotFound);
        assert_eq!(api.message(), "Key not found");
        assert_eq!(api.cause(), Some("/foo"));
        assert_eq!(c.transport().seen().len(), 1);
    }

    // --- status classification ---

    #[test]
    fn plain_text_503_is_http_server_error() {
        let response = HttpResponse::new(503, "raft: proposal dropped");
        let err = parse_response(&response).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HttpServerError);
        assert_eq!(err.family(), ErrorFamily::HttpServer);
        assert_eq!(err.message(), "Service Unavailable\nraft: proposal dropped");
        assert_eq!(err.status(), Some(503));
        assert_eq!(err.body(), Some("raft: proposal dropped"));
    }

    #[test]
    fn plain_text_404_is_http_client_error() {
        let err = parse_response(&HttpResponse::new(404, "404 page not found\n")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HttpClientError);
        assert!(err.message().contains("404 page not found"));
    }

    #[test]
    fn error_code_wins_over_success_status() {
        let response = HttpResponse::new(200, r#"{"errorCode":105,"message":"Key already exists"}"#);
        let err = parse_response(&response).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NodeExist);
    }

    #[test]
    fn plain_text_success_is_returned_raw() {
        let parsed = parse_response(&HttpResponse::new(200, "2")).unwrap();
        assert_eq!(parsed, Parsed::Reply(Reply::Text("2".to_string())));
        let parsed = parse_response(&HttpResponse::new(200, "")).unwrap();
        assert_eq!(parsed, Parsed::Reply(Reply::Text(String::new())));
    }

    #[test]
    fn stats_json_passes_through() {
        let parsed = parse_response(&HttpResponse::new(200, r#"{"leader":"n1","followers":{}}"#)).unwrap();
        assert_eq!(
            parsed,
            Parsed::Reply(Reply::Raw(serde_json::json!({"leader": "n1", "followers": {}})))
        );
    }

    #[test]
    fn redirect_without_location_is_unclassified() {
        let err = parse_response(&HttpResponse::new(302, "moved")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unclassified);
    }

    #[test]
    fn unparseable_body_outside_known_ranges_is_unclassified() {
        let err = parse_response(&HttpResponse::new(600, "???")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unclassified);
        assert_eq!(err.status(), Some(600));
    }

    #[test]
    fn malformed_envelope_is_unclassified() {
        let err = parse_response(&HttpResponse::new(200, r#"{"action":"compareAndDelete","node":{"key":"/a"}}"#))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unclassified);
        assert!(err.message().contains("prevNode"));
    }

    // --- redirects ---

    #[test]
    fn redirect_is_followed_once_with_same_method_and_body() {
        for status in [301, 302, 307] {
            let c = client(
                &["http://follower:4001"],
                Scripted::new(move |req| {
                    if req.url.starts_with("http://follower:") {
                        Ok(HttpResponse::new(status, "")
                            .with_header("Location", "http://leader:4001/v2/keys/foo?prevExist=false"))
                    } else {
                        Ok(HttpResponse::new(
                            201,
                            r#"{"action":"create","node":{"key":"/foo","value":"bar"}}"#,
                        ))
                    }
                }),
            );
            let reply = c.create("foo", "bar", Params::new()).unwrap();
            assert_eq!(reply, Reply::Pair(Some("/foo".to_string()), Some("bar".to_string())));

            let seen = c.transport().seen();
            assert_eq!(seen.len(), 2, "status {status}");
            assert_eq!(seen[1].method, HttpMethod::Put);
            assert_eq!(seen[1].url, "http://leader:4001/v2/keys/foo?prevExist=false");
            assert_eq!(seen[1].body, seen[0].body);
        }
    }

    #[test]
    fn relative_location_resolves_against_request_url() {
        let c = client(
            &["http://follower:4001"],
            Scripted::new(|req| {
                if req.url.contains("/v2/keys/foo") {
                    Ok(HttpResponse::new(307, "").with_header("location", "/v2/keys/bar"))
                } else {
                    Ok(HttpResponse::new(200, GET_BAR))
                }
            }),
        );
        c.get("foo", Params::new()).unwrap();
        assert_eq!(c.transport().seen()[1].url, "http://follower:4001/v2/keys/bar");
    }

    #[test]
    fn second_redirect_is_not_followed() {
        let c = client(
            &["http://a:4001"],
            Scripted::new(|_| Ok(HttpResponse::new(307, "").with_header("Location", "http://b:4001/v2/keys/x"))),
        );
        let err = c.get("x", Params::new()).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Unclassified));
        assert_eq!(c.transport().seen().len(), 2);
    }

    // --- request building ---

    #[test]
    fn set_sends_scalar_form_as_value_field() {
        let c = client(&["http://a:4001"], Scripted::new(|_| Ok(HttpResponse::new(200, GET_BAR))));
        c.set("foo", "bar baz", Params::new().ttl(5)).unwrap();
        let req = &c.transport().seen()[0];
        assert_eq!(req.method, HttpMethod::Put);
        assert_eq!(req.url, "http://a:4001/v2/keys/foo?ttl=5");
        assert_eq!(req.body.as_deref(), Some("value=bar+baz"));
        assert_eq!(req.header("content-type"), Some(FORM_CONTENT_TYPE));
        assert_eq!(req.header("accept"), Some("application/json"));
    }

    #[test]
    fn forced_flags_override_caller_params() {
        let c = client(&["http://a:4001"], Scripted::new(|_| Ok(HttpResponse::new(200, GET_BAR))));
        c.wait("foo", Params::new().wait(false).wait_index(7)).unwrap();
        c.create("foo", "v", Params::new().prev_exist(true)).unwrap();
        c.update("foo", "v", Params::new()).unwrap();
        c.dir("d", Params::new().recursive(false)).unwrap();
        let urls: Vec<String> = c.transport().seen().into_iter().map(|r| r.url).collect();
        assert_eq!(
            urls,
            vec![
                "http://a:4001/v2/keys/foo?wait=true&waitIndex=7",
                "http://a:4001/v2/keys/foo?prevExist=false",
                "http://a:4001/v2/keys/foo?prevExist=true",
                "http://a:4001/v2/keys/d?recursive=true",
            ]
        );
    }

    #[test]
    fn rmdir_lets_caller_override_recursive() {
        let c = client(&["http://a:4001"], Scripted::new(|_| Ok(HttpResponse::new(200, GET_BAR))));
        c.rmdir("d", Params::new()).unwrap();
        c.rmdir("d", Params::new().recursive(false).dir(true)).unwrap();
        let seen = c.transport().seen();
        assert_eq!(seen[0].method, HttpMethod::Delete);
        assert_eq!(seen[0].url, "http://a:4001/v2/keys/d?recursive=true");
        assert_eq!(seen[1].url, "http://a:4001/v2/keys/d?recursive=false&dir=true");
    }

    #[test]
    fn consistent_reads_are_on_by_default_for_gets_only() {
        let config = ClientConfig::new(["http://a:4001"]);
        let c = Client::with_transport(config, Scripted::new(|_| Ok(HttpResponse::new(200, GET_BAR)))).unwrap();
        c.get("foo", Params::new()).unwrap();
        c.set("foo", "v", Params::new()).unwrap();
        let seen = c.transport().seen();
        assert_eq!(seen[0].url, "http://a:4001/v2/keys/foo?consistent=true");
        assert_eq!(seen[1].url, "http://a:4001/v2/keys/foo");
    }

    #[test]
    fn lock_and_leader_send_form_bodies() {
        let c = client(&["http://a:4001"], Scripted::new(|_| Ok(HttpResponse::new(200, "1"))));
        assert_eq!(c.acquire_lock("jobs", 30).unwrap(), Reply::Text("1".to_string()));
        c.release_lock("jobs", Params::new().with("index", 1)).unwrap();
        c.set_leader("cluster", "node1", 10).unwrap();
        c.delete_leader("cluster", "node1").unwrap();
        c.stats("store").unwrap();

        let seen = c.transport().seen();
        let summary: Vec<(HttpMethod, &str, Option<&str>)> = seen
            .iter()
            .map(|r| (r.method, r.url.as_str(), r.body.as_deref()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (HttpMethod::Post, "http://a:4001/mod/v2/lock/jobs", Some("ttl=30")),
                (HttpMethod::Delete, "http://a:4001/mod/v2/lock/jobs", Some("index=1")),
                (HttpMethod::Put, "http://a:4001/mod/v2/leader/cluster", Some("name=node1&ttl=10")),
                (HttpMethod::Delete, "http://a:4001/mod/v2/leader/cluster", Some("name=node1")),
                (HttpMethod::Get, "http://a:4001/v2/stats/store", None),
            ]
        );
    }

    #[test]
    fn per_call_options_override_defaults() {
        let c = client(&["http://a:4001"], Scripted::new(|_| Ok(HttpResponse::new(200, "ok"))));
        let options = RequestOptions::default()
            .header("Accept", "text/plain")
            .timeout(std::time::Duration::from_secs(3));
        let request = Request::get(paths::stats("self")).options(options);
        c.dispatch(&request).unwrap();

        let sent = &c.transport().seen()[0];
        assert_eq!(sent.header("accept"), Some("text/plain"));
        assert_eq!(sent.timeout, Some(std::time::Duration::from_secs(3)));
        assert_eq!(
            c.config().headers,
            vec![("Accept".to_string(), "application/json".to_string())]
        );
    }

    #[test]
    fn operations_accept_per_call_options() {
        let c = client(&["http://a:4001"], Scripted::new(|_| Ok(HttpResponse::new(200, GET_BAR))));
        let short = || RequestOptions::default().timeout(std::time::Duration::from_millis(250));
        c.wait_with("foo", Params::new(), short()).unwrap();
        c.get_with("foo", Params::new(), short().header("X-Trace", "1")).unwrap();
        c.set_with("foo", "v", Params::new(), short()).unwrap();

        let seen = c.transport().seen();
        assert_eq!(seen[0].url, "http://a:4001/v2/keys/foo?wait=true");
        assert!(seen
            .iter()
            .all(|r| r.timeout == Some(std::time::Duration::from_millis(250))));
        assert_eq!(seen[1].header("x-trace"), Some("1"));
        assert_eq!(seen[2].body.as_deref(), Some("value=v"));
        assert_eq!(c.config().request_timeout(), None);
    }

    #[test]
    fn wait_then_hands_outcome_to_continuation() {
        let c = client(&["http://a:4001"], Scripted::new(|_| Ok(HttpResponse::new(200, GET_BAR))));
        let value = c.wait_then("foo", Params::new(), |outcome| {
            outcome.map(|reply| reply.as_str().map(str::to_string))
        });
        assert_eq!(value.unwrap(), Some("bar".to_string()));
    }

    #[test]
    fn empty_server_list_is_rejected() {
        let result = Client::with_transport(
            ClientConfig::new(Vec::<String>::new()),
            Scripted::new(|_| Ok(HttpResponse::new(200, ""))),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }
}

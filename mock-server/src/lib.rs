//! A single-process stand-in for an etcd v2 cluster member.
//!
//! Serves the keyspace (`/v2/keys`), the lock and leader modules
//! (`/mod/v2/lock`, `/mod/v2/leader`) and stats (`/v2/stats`). A
//! [`follower`] router answers everything with a temporary redirect to the
//! leader, which is how a real cluster treats writes sent to a follower.

pub mod store;

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use axum::{
    extract::{Path, RawQuery, State},
    http::{Method, StatusCode, Uri},
    response::{IntoResponse, Redirect, Response},
    routing::{any, get},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::{
    net::TcpListener,
    sync::{broadcast, broadcast::error::RecvError, Mutex, Notify},
};
use tracing::{debug, info};
use url::form_urlencoded;
use uuid::Uuid;

use store::{clean_key, DeleteArgs, Event, SetArgs, Store, StoreError};

const INDEX_HEADER: &str = "X-Etcd-Index";

/// Counters served by `/v2/stats/store`.
#[derive(Debug, Default, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub gets_success: u64,
    pub gets_fail: u64,
    pub sets_success: u64,
    pub sets_fail: u64,
    pub delete_success: u64,
    pub delete_fail: u64,
    pub expire_count: u64,
}

#[derive(Debug, Default)]
struct Keyspace {
    store: Store,
    stats: StoreStats,
}

/// A held lock or leadership.
#[derive(Debug, Clone)]
struct Hold {
    index: u64,
    value: String,
    expires: DateTime<Utc>,
}

impl Hold {
    fn live(&self, now: DateTime<Utc>) -> bool {
        self.expires > now
    }

    fn matches(&self, params: &Params) -> bool {
        params.get("index") == Some(self.index.to_string().as_str())
            || params.get("value") == Some(self.value.as_str())
            || params.get("name") == Some(self.value.as_str())
    }
}

type Holds = Mutex<HashMap<String, Hold>>;

pub struct Cluster {
    id: Uuid,
    started: DateTime<Utc>,
    keyspace: Mutex<Keyspace>,
    events: broadcast::Sender<Event>,
    locks: Holds,
    leaders: Holds,
    released: Notify,
    hold_index: AtomicU64,
}

pub type Shared = Arc<Cluster>;

impl Default for Cluster {
    fn default() -> Self {
        Self::new()
    }
}

impl Cluster {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            id: Uuid::new_v4(),
            started: Utc::now(),
            keyspace: Mutex::new(Keyspace::default()),
            events,
            locks: Mutex::new(HashMap::new()),
            leaders: Mutex::new(HashMap::new()),
            released: Notify::new(),
            hold_index: AtomicU64::new(0),
        }
    }

    /// Expire TTL keys and wake their watchers.
    pub async fn reap(&self) {
        let mut keyspace = self.keyspace.lock().await;
        let events = keyspace.store.purge(Utc::now());
        keyspace.stats.expire_count += events.len() as u64;
        for event in events {
            debug!(key = %event.key, index = event.index, "expired");
            let _ = self.events.send(event);
        }
    }

    async fn read(&self, key: &str, params: &Params) -> Result<Reply, StoreError> {
        let mut keyspace = self.keyspace.lock().await;
        let result = keyspace.store.get(key, params.flag("recursive"), Utc::now());
        match result {
            Ok(_) => keyspace.stats.gets_success += 1,
            Err(_) => keyspace.stats.gets_fail += 1,
        }
        let index = keyspace.store.index();
        result.map(|body| Reply::new(StatusCode::OK, index, body))
    }

    async fn watch(&self, key: &str, params: &Params) -> Result<Reply, StoreError> {
        let recursive = params.flag("recursive");
        let (since, mut events) = {
            let keyspace = self.keyspace.lock().await;
            let since = params.number("waitIndex", 203, keyspace.store.index())?;
            if let Some(since) = since {
                if let Some(event) = keyspace.store.since(key, recursive, since)? {
                    return Ok(Reply::new(StatusCode::OK, event.index, event.body));
                }
            }
            // subscribed under the lock so no write slips between the
            // history check and the live stream
            (since.unwrap_or(0), self.events.subscribe())
        };

        loop {
            match events.recv().await {
                Ok(event) if event.index >= since && store::watches(key, recursive, &event.key) => {
                    return Ok(Reply::new(StatusCode::OK, event.index, event.body));
                }
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => {
                    return Err(StoreError {
                        code: 300,
                        cause: "watch stream closed".to_string(),
                        index: since,
                    })
                }
            }
        }
    }

    async fn write(&self, key: &str, params: &Params, in_order: bool) -> Result<Reply, StoreError> {
        let mut keyspace = self.keyspace.lock().await;
        let index = keyspace.store.index();
        let mut args = SetArgs {
            value: params.get("value").map(str::to_string),
            dir: params.flag("dir"),
            ttl: params.number("ttl", 202, index)?,
            prev_exist: params.get("prevExist").map(|v| v == "true"),
            prev_value: params.get("prevValue").map(str::to_string),
            prev_index: params.number("prevIndex", 203, index)?,
        };
        let key = if in_order {
            args.prev_exist = Some(false);
            format!("{}/{:020}", key.trim_end_matches('/'), index + 1)
        } else {
            key.to_string()
        };

        let result = keyspace.store.set(&key, args, Utc::now());
        match result {
            Ok(_) => keyspace.stats.sets_success += 1,
            Err(_) => keyspace.stats.sets_fail += 1,
        }
        let event = result?;
        info!(
            key = %event.key,
            action = event.body["action"].as_str().unwrap_or_default(),
            index = event.index,
            "write"
        );
        let _ = self.events.send(event.clone());
        let status = if event.created {
            StatusCode::CREATED
        } else {
            StatusCode::OK
        };
        Ok(Reply::new(status, event.index, event.body))
    }

    async fn remove(&self, key: &str, params: &Params) -> Result<Reply, StoreError> {
        let mut keyspace = self.keyspace.lock().await;
        let index = keyspace.store.index();
        let args = DeleteArgs {
            recursive: params.flag("recursive"),
            dir: params.flag("dir"),
            prev_value: params.get("prevValue").map(str::to_string),
            prev_index: params.number("prevIndex", 203, index)?,
        };

        let result = keyspace.store.delete(key, args, Utc::now());
        match result {
            Ok(_) => keyspace.stats.delete_success += 1,
            Err(_) => keyspace.stats.delete_fail += 1,
        }
        let event = result?;
        info!(key = %event.key, index = event.index, "delete");
        let _ = self.events.send(event.clone());
        Ok(Reply::new(StatusCode::OK, event.index, event.body))
    }

    /// Block until `name` is free in `holds` (or already held by `value`
    /// when `reentrant`), then take it for `ttl` seconds.
    async fn acquire(&self, holds: &Holds, name: &str, value: String, ttl: i64, reentrant: bool) -> Hold {
        loop {
            let released = self.released.notified();
            {
                let mut table = holds.lock().await;
                let now = Utc::now();
                let free = match table.get(name) {
                    None => true,
                    Some(hold) => !hold.live(now) || (reentrant && hold.value == value),
                };
                if free {
                    let index = self.hold_index.fetch_add(1, Ordering::SeqCst) + 1;
                    let hold = Hold {
                        index,
                        value,
                        expires: now + chrono::Duration::seconds(ttl),
                    };
                    table.insert(name.to_string(), hold.clone());
                    return hold;
                }
            }
            // expiry is not signalled, so poll as well
            let _ = tokio::time::timeout(Duration::from_millis(100), released).await;
        }
    }

    async fn holder(&self, holds: &Holds, name: &str) -> Option<Hold> {
        let table = holds.lock().await;
        table.get(name).filter(|h| h.live(Utc::now())).cloned()
    }

    async fn renew(&self, holds: &Holds, name: &str, params: &Params, ttl: i64) -> bool {
        let mut table = holds.lock().await;
        let now = Utc::now();
        match table.get_mut(name) {
            Some(hold) if hold.live(now) && hold.matches(params) => {
                hold.expires = now + chrono::Duration::seconds(ttl);
                true
            }
            _ => false,
        }
    }

    async fn release(&self, holds: &Holds, name: &str, params: &Params) -> bool {
        let mut table = holds.lock().await;
        let held = table.get(name).is_some_and(|h| h.matches(params));
        if held {
            table.remove(name);
            self.released.notify_waiters();
        }
        held
    }
}

/// Query string and form body fields; the body wins.
struct Params(HashMap<String, String>);

impl Params {
    fn parse(query: Option<&str>, body: &str) -> Self {
        let mut fields: HashMap<String, String> = form_urlencoded::parse(query.unwrap_or_default().as_bytes())
            .into_owned()
            .collect();
        fields.extend(form_urlencoded::parse(body.as_bytes()).into_owned());
        Self(fields)
    }

    fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    fn flag(&self, name: &str) -> bool {
        self.get(name) == Some("true")
    }

    fn number(&self, name: &str, code: u16, index: u64) -> Result<Option<u64>, StoreError> {
        match self.get(name) {
            None | Some("") => Ok(None),
            Some(raw) => raw.parse().map(Some).map_err(|_| StoreError {
                code,
                cause: raw.to_string(),
                index,
            }),
        }
    }

    fn ttl(&self) -> Option<i64> {
        self.get("ttl").and_then(|t| t.parse().ok())
    }
}

/// A keyspace answer: envelope plus the index it was produced at.
struct Reply {
    status: StatusCode,
    index: u64,
    body: Value,
}

impl Reply {
    fn new(status: StatusCode, index: u64, body: Value) -> Self {
        Self {
            status,
            index,
            body,
        }
    }
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        (
            self.status,
            [(INDEX_HEADER, self.index.to_string())],
            Json(self.body),
        )
            .into_response()
    }
}

impl IntoResponse for StoreError {
    fn into_response(self) -> Response {
        (
            self.status(),
            [(INDEX_HEADER, self.index.to_string())],
            Json(self.to_json()),
        )
            .into_response()
    }
}

pub fn router(cluster: Shared) -> Router {
    Router::new()
        .route("/v2/keys", any(keys_root))
        .route("/v2/keys/", any(keys_root))
        .route("/v2/keys/{*key}", any(keys))
        .route("/mod/v2/lock/{*name}", any(lock))
        .route("/mod/v2/leader/{*name}", any(leader))
        .route("/v2/stats/{kind}", get(stats))
        .fallback(not_found)
        .with_state(cluster)
}

pub fn app() -> Router {
    router(Arc::new(Cluster::new()))
}

/// Every request gets a 307 to the same path and query on `leader`.
pub fn follower(leader: impl Into<String>) -> Router {
    let leader = leader.into().trim_end_matches('/').to_string();
    Router::new().fallback(move |uri: Uri| {
        let target = format!(
            "{leader}{}",
            uri.path_and_query().map(|p| p.as_str()).unwrap_or("/")
        );
        async move { Redirect::temporary(&target) }
    })
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    let cluster: Shared = Arc::new(Cluster::new());
    let reaper = cluster.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_millis(100));
        loop {
            tick.tick().await;
            reaper.reap().await;
        }
    });
    info!(id = %cluster.id, addr = ?listener.local_addr().ok(), "member serving");
    axum::serve(listener, router(cluster)).await
}

pub async fn run_follower(listener: TcpListener, leader: String) -> Result<(), std::io::Error> {
    info!(%leader, addr = ?listener.local_addr().ok(), "follower serving");
    axum::serve(listener, follower(leader)).await
}

async fn keys_root(
    State(cluster): State<Shared>,
    method: Method,
    RawQuery(query): RawQuery,
    body: String,
) -> Response {
    handle_keys(&cluster, method, "/".to_string(), query, body).await
}

async fn keys(
    State(cluster): State<Shared>,
    Path(key): Path<String>,
    method: Method,
    RawQuery(query): RawQuery,
    body: String,
) -> Response {
    handle_keys(&cluster, method, clean_key(&key), query, body).await
}

async fn handle_keys(
    cluster: &Cluster,
    method: Method,
    key: String,
    query: Option<String>,
    body: String,
) -> Response {
    let params = Params::parse(query.as_deref(), &body);
    debug!(%method, %key, "keys");
    cluster.reap().await;
    let result = match method {
        Method::GET if params.flag("wait") => cluster.watch(&key, &params).await,
        Method::GET => cluster.read(&key, &params).await,
        Method::PUT => cluster.write(&key, &params, false).await,
        Method::POST => cluster.write(&key, &params, true).await,
        Method::DELETE => cluster.remove(&key, &params).await,
        _ => return StatusCode::METHOD_NOT_ALLOWED.into_response(),
    };
    match result {
        Ok(reply) => reply.into_response(),
        Err(err) => {
            debug!(code = err.code, cause = %err.cause, "keys rejected");
            err.into_response()
        }
    }
}

async fn lock(
    State(cluster): State<Shared>,
    Path(name): Path<String>,
    method: Method,
    RawQuery(query): RawQuery,
    body: String,
) -> Response {
    let params = Params::parse(query.as_deref(), &body);
    let name = clean_key(&name);
    let holds = &cluster.locks;
    match method {
        Method::POST => {
            let Some(ttl) = params.ttl() else {
                return (StatusCode::BAD_REQUEST, "invalid ttl\n").into_response();
            };
            let value = params.get("value").unwrap_or_default().to_string();
            let hold = cluster.acquire(holds, &name, value, ttl, false).await;
            info!(%name, index = hold.index, "lock acquired");
            hold.index.to_string().into_response()
        }
        Method::GET => match cluster.holder(holds, &name).await {
            Some(hold) if params.get("field") == Some("index") => hold.index.to_string().into_response(),
            Some(hold) => hold.value.into_response(),
            None => String::new().into_response(),
        },
        Method::PUT => {
            let Some(ttl) = params.ttl() else {
                return (StatusCode::BAD_REQUEST, "invalid ttl\n").into_response();
            };
            if cluster.renew(holds, &name, &params, ttl).await {
                StatusCode::OK.into_response()
            } else {
                (StatusCode::NOT_FOUND, "lock not held\n").into_response()
            }
        }
        Method::DELETE => {
            if cluster.release(holds, &name, &params).await {
                info!(%name, "lock released");
                StatusCode::OK.into_response()
            } else {
                (StatusCode::NOT_FOUND, "lock not held\n").into_response()
            }
        }
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}

async fn leader(
    State(cluster): State<Shared>,
    Path(name): Path<String>,
    method: Method,
    RawQuery(query): RawQuery,
    body: String,
) -> Response {
    let params = Params::parse(query.as_deref(), &body);
    let name = clean_key(&name);
    let holds = &cluster.leaders;
    match method {
        Method::PUT => {
            let (Some(candidate), Some(ttl)) = (params.get("name"), params.ttl()) else {
                return (StatusCode::BAD_REQUEST, "name and ttl required\n").into_response();
            };
            let hold = cluster.acquire(holds, &name, candidate.to_string(), ttl, true).await;
            info!(%name, leader = %hold.value, "leader set");
            StatusCode::OK.into_response()
        }
        Method::GET => cluster
            .holder(holds, &name)
            .await
            .map(|hold| hold.value)
            .unwrap_or_default()
            .into_response(),
        Method::DELETE => {
            if cluster.release(holds, &name, &params).await {
                StatusCode::OK.into_response()
            } else {
                (StatusCode::NOT_FOUND, "leader not found\n").into_response()
            }
        }
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}

async fn stats(State(cluster): State<Shared>, Path(kind): Path<String>) -> Response {
    let id = cluster.id.to_string();
    match kind.as_str() {
        "self" => Json(json!({
            "name": id,
            "id": id,
            "state": "StateLeader",
            "startTime": cluster.started.to_rfc3339(),
            "leaderInfo": {"leader": id, "startTime": cluster.started.to_rfc3339()},
        }))
        .into_response(),
        "leader" => Json(json!({"leader": id, "followers": {}})).into_response(),
        "store" => {
            let keyspace = cluster.keyspace.lock().await;
            Json(keyspace.stats.clone()).into_response()
        }
        _ => not_found().await.into_response(),
    }
}

async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "404 page not found\n")
}

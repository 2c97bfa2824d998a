//! Server-relative paths for each resource family.

pub const KEYS_PREFIX: &str = "/v2/keys/";
pub const LOCK_PREFIX: &str = "/mod/v2/lock/";
pub const LEADER_PREFIX: &str = "/mod/v2/leader/";
pub const STATS_PREFIX: &str = "/v2/stats/";

/// `/v2/keys/<key>`. A leading slash on `key` is optional.
pub fn keys(key: &str) -> String {
    format!("{KEYS_PREFIX}{}", key.trim_start_matches('/'))
}

pub fn lock(name: &str) -> String {
    format!("{LOCK_PREFIX}{}", name.trim_start_matches('/'))
}

pub fn leader(cluster: &str) -> String {
    format!("{LEADER_PREFIX}{}", cluster.trim_start_matches('/'))
}

/// `kind` is one of `leader`, `self` or `store`.
pub fn stats(kind: &str) -> String {
    format!("{STATS_PREFIX}{kind}")
}

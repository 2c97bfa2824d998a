//! Candidate servers and failover rotation.
//!
//! # Design
//! The pool is a fixed multiset of base URLs whose order is the only thing
//! that changes. Position 0 is the current server. On failover the failed
//! server trades places with a randomly chosen replacement, so the next
//! attempt (and every later call) starts from the replacement. Only a
//! failure of the current server rotates; a stale failure report leaves
//! the order alone.
//!
//! The order is shared by every call on a client and sits behind a mutex
//! that is held only while reading or swapping, never across I/O.

use std::sync::{Mutex, MutexGuard, PoisonError};

use rand::Rng;

use crate::error::ConfigError;

#[derive(Debug)]
pub struct EndpointPool {
    servers: Mutex<Vec<String>>,
}

impl EndpointPool {
    /// Fails if `servers` is empty. Trailing slashes are stripped.
    pub fn new<I, S>(servers: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let servers: Vec<String> = servers
            .into_iter()
            .map(|s| s.as_ref().trim_end_matches('/').to_string())
            .collect();
        if servers.is_empty() {
            return Err(ConfigError::NoServers);
        }
        Ok(Self {
            servers: Mutex::new(servers),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Vec<String>> {
        self.servers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn current(&self) -> String {
        self.lock()[0].clone()
    }

    /// The current order, current server first.
    pub fn snapshot(&self) -> Vec<String> {
        self.lock().clone()
    }

    /// Replace `failed` with a uniformly chosen other server and return the
    /// replacement.
    pub fn rotate(&self, failed: &str) -> String {
        self.rotate_excluding(failed, &[])
    }

    /// Like [`rotate`](Self::rotate), but prefers servers not in `tried` so
    /// one retry sequence never revisits a server while an untried one is
    /// left.
    pub fn rotate_excluding(&self, failed: &str, tried: &[String]) -> String {
        let mut servers = self.lock();
        // a concurrent caller already rotated it out of the current slot
        if servers[0] != failed {
            return servers[0].clone();
        }

        let others: Vec<usize> = (1..servers.len()).collect();
        let untried: Vec<usize> = others
            .iter()
            .copied()
            .filter(|&i| !tried.contains(&servers[i]))
            .collect();
        let candidates = if untried.is_empty() { others } else { untried };
        if candidates.is_empty() {
            return servers[0].clone();
        }

        let pick = candidates[rand::rng().random_range(0..candidates.len())];
        servers.swap(0, pick);
        servers[0].clone()
    }
}

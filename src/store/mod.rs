// Copyright 2025 dentsusoken
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Boundary to the replicated key-value store.
//!
//! The engine only needs four capabilities from the store: an atomic
//! one-key scripted transaction, a topology query, a synchronous
//! replication wait, and key deletion. Replies cross this boundary
//! undecoded so the locking layer owns every decision about reply shape.

pub mod memory;
pub mod redis;
pub mod script;

pub use self::memory::{MemoryStore, StoreOperation};
pub use self::redis::RedisStore;
pub use self::script::LockScript;

use crate::error::{ReplicaLockError, Result};
use log::debug;
use std::fmt;
use std::sync::Arc;

/// Raw reply returned by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreValue {
    Nil,
    Int(i64),
    Bulk(String),
    Status(String),
    Array(Vec<StoreValue>),
    Other(String),
}

impl StoreValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            StoreValue::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[StoreValue]> {
        match self {
            StoreValue::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, StoreValue::Nil)
    }

    /// Short shape description used in protocol error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            StoreValue::Nil => "nil",
            StoreValue::Int(_) => "integer",
            StoreValue::Bulk(_) => "bulk string",
            StoreValue::Status(_) => "status",
            StoreValue::Array(_) => "array",
            StoreValue::Other(_) => "unsupported value",
        }
    }
}

impl fmt::Display for StoreValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreValue::Nil => f.write_str("(nil)"),
            StoreValue::Int(value) => write!(f, "(integer) {value}"),
            StoreValue::Bulk(value) | StoreValue::Status(value) => write!(f, "\"{value}\""),
            StoreValue::Array(items) => write!(f, "(array of {})", items.len()),
            StoreValue::Other(value) => f.write_str(value),
        }
    }
}

/// Capabilities the lock engine requires from a replicated store.
pub trait ReplicaStore: Send + Sync {
    /// Runs one of the lock transactions atomically against `key`.
    fn run_script(
        &self,
        script: LockScript,
        key: &str,
        lease_ms: i64,
        token: &str,
    ) -> Result<StoreValue>;

    /// Topology query; element 2 of the reply lists the attached replicas.
    fn role(&self) -> Result<StoreValue>;

    /// Blocks until `replicas` replicas acknowledge prior writes or `timeout_ms` elapses.
    fn wait_replicas(&self, replicas: i64, timeout_ms: i64) -> Result<StoreValue>;

    fn delete(&self, key: &str) -> Result<StoreValue>;
}

/// Opens a store from a URL: `redis://`, `rediss://` or `memory://`.
pub fn open_store(url: &str) -> Result<Arc<dyn ReplicaStore>> {
    let scheme = url
        .split_once("://")
        .map(|(scheme, _)| scheme.to_ascii_lowercase())
        .ok_or_else(|| ReplicaLockError::UnsupportedStoreUrl(url.to_string()))?;

    match scheme.as_str() {
        "redis" | "rediss" => {
            debug!("Opening redis store at {url}");
            Ok(Arc::new(RedisStore::open(url)?))
        }
        "memory" => {
            debug!("Using in-process memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
        _ => Err(ReplicaLockError::UnsupportedStoreUrl(url.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_store_rejects_unknown_scheme() {
        let err = open_store("ftp://127.0.0.1/").err().unwrap();
        assert!(matches!(err, ReplicaLockError::UnsupportedStoreUrl(_)));

        let err = open_store("127.0.0.1:6379").err().unwrap();
        assert!(matches!(err, ReplicaLockError::UnsupportedStoreUrl(_)));
    }

    #[test]
    fn open_store_memory_scheme() {
        let store = open_store("memory://").unwrap();
        let role = store.role().unwrap();
        assert_eq!(role.as_array().map(|items| items.len()), Some(3));
    }

    #[test]
    fn store_value_accessors() {
        assert_eq!(StoreValue::Int(7).as_int(), Some(7));
        assert_eq!(StoreValue::Nil.as_int(), None);
        assert!(StoreValue::Nil.is_nil());
        assert_eq!(StoreValue::Bulk("x".to_string()).kind(), "bulk string");
        assert_eq!(StoreValue::Array(vec![]).to_string(), "(array of 0)");
    }
}

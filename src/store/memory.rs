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

//! In-process simulation of a replicated key-value store.
//!
//! `MemoryStore` interprets the lock transactions natively and lets callers
//! decide how many replicas are attached and how many of them acknowledge a
//! replication wait. Keys expire lazily on access.

use crate::error::{ReplicaLockError, Result};
use crate::store::{LockScript, ReplicaStore, StoreValue};
use log::trace;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Store operations that can be targeted by failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    Script(LockScript),
    Role,
    Wait,
    Delete,
}

impl StoreOperation {
    pub fn name(self) -> &'static str {
        match self {
            StoreOperation::Script(script) => script.name(),
            StoreOperation::Role => "ROLE",
            StoreOperation::Wait => "WAIT",
            StoreOperation::Delete => "DEL",
        }
    }
}

impl fmt::Display for StoreOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Default)]
struct MemoryEntry {
    fields: HashMap<String, i64>,
    expires_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct MemoryState {
    entries: HashMap<String, MemoryEntry>,
    replicas: usize,
    acknowledging: Option<usize>,
    failures: HashMap<StoreOperation, String>,
    calls: HashMap<StoreOperation, usize>,
}

impl MemoryState {
    fn live_entry(&mut self, key: &str) -> Option<&mut MemoryEntry> {
        let expired = self
            .entries
            .get(key)
            .and_then(|entry| entry.expires_at)
            .is_some_and(|deadline| Instant::now() >= deadline);
        if expired {
            trace!("memory store: '{key}' expired");
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }

    /// Mirrors PEXPIRE: a non-positive TTL deletes the key.
    fn pexpire(&mut self, key: &str, lease_ms: i64) {
        if lease_ms <= 0 {
            self.entries.remove(key);
            return;
        }
        if let Some(entry) = self.entries.get_mut(key) {
            let ttl = Duration::from_millis(lease_ms as u64);
            entry.expires_at = Instant::now().checked_add(ttl);
        }
    }

    /// Mirrors PTTL: -2 for a missing key, -1 when no TTL is set.
    fn pttl(&mut self, key: &str) -> i64 {
        match self.live_entry(key) {
            None => -2,
            Some(entry) => match entry.expires_at {
                None => -1,
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    i64::try_from(remaining.as_millis()).unwrap_or(i64::MAX)
                }
            },
        }
    }

    fn acquire(&mut self, key: &str, lease_ms: i64, token: &str) -> StoreValue {
        match self.live_entry(key) {
            None => {
                let mut entry = MemoryEntry::default();
                entry.fields.insert(token.to_string(), 1);
                self.entries.insert(key.to_string(), entry);
                self.pexpire(key, lease_ms);
                StoreValue::Nil
            }
            Some(entry) => {
                if let Some(count) = entry.fields.get_mut(token) {
                    *count += 1;
                    self.pexpire(key, lease_ms);
                    StoreValue::Nil
                } else {
                    StoreValue::Int(self.pttl(key))
                }
            }
        }
    }

    fn release(&mut self, key: &str, lease_ms: i64, token: &str) -> StoreValue {
        let Some(entry) = self.live_entry(key) else {
            return StoreValue::Nil;
        };
        let Some(count) = entry.fields.get_mut(token) else {
            return StoreValue::Nil;
        };
        *count -= 1;
        if *count > 0 {
            self.pexpire(key, lease_ms);
            StoreValue::Int(0)
        } else {
            self.entries.remove(key);
            StoreValue::Int(1)
        }
    }

    fn renew(&mut self, key: &str, lease_ms: i64, token: &str) -> StoreValue {
        let holds = self
            .live_entry(key)
            .is_some_and(|entry| entry.fields.contains_key(token));
        if holds {
            self.pexpire(key, lease_ms);
            StoreValue::Int(1)
        } else {
            StoreValue::Int(0)
        }
    }
}

/// Thread-safe in-memory store; see the module documentation.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    /// Store acting as a master with no attached replicas.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store acting as a master with `replicas` attached replicas that all acknowledge.
    pub fn with_replicas(replicas: usize) -> Self {
        let store = Self::new();
        store.set_replicas(replicas);
        store
    }

    pub fn set_replicas(&self, replicas: usize) {
        self.state().replicas = replicas;
    }

    /// Limits how many replicas acknowledge a replication wait; `None` means all of them.
    pub fn set_acknowledging(&self, acknowledging: Option<usize>) {
        self.state().acknowledging = acknowledging;
    }

    /// Makes the next call of `operation` fail with a store error.
    pub fn fail_next(&self, operation: StoreOperation, details: impl Into<String>) {
        self.state().failures.insert(operation, details.into());
    }

    /// Number of calls observed for `operation`, including failed ones.
    pub fn calls(&self, operation: StoreOperation) -> usize {
        self.state().calls.get(&operation).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.state().calls.values().sum()
    }

    pub fn exists(&self, key: &str) -> bool {
        self.state().live_entry(key).is_some()
    }

    /// Holder tokens and reentrancy counts stored under `key`.
    pub fn fields(&self, key: &str) -> HashMap<String, i64> {
        self.state()
            .live_entry(key)
            .map(|entry| entry.fields.clone())
            .unwrap_or_default()
    }

    /// Remaining TTL of `key` in milliseconds, `None` if the key is absent.
    pub fn ttl_ms(&self, key: &str) -> Option<i64> {
        match self.state().pttl(key) {
            -2 => None,
            ttl => Some(ttl),
        }
    }

    /// Inserts a mapping directly, bypassing the lock transactions.
    pub fn insert_holder(&self, key: &str, token: &str, count: i64, lease_ms: i64) {
        let mut state = self.state();
        let entry = state.entries.entry(key.to_string()).or_default();
        entry.fields.insert(token.to_string(), count);
        state.pexpire(key, lease_ms);
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        // A panic while holding the guard leaves the maps consistent; keep serving.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn begin(&self, operation: StoreOperation) -> Result<MutexGuard<'_, MemoryState>> {
        let mut state = self.state();
        *state.calls.entry(operation).or_insert(0) += 1;
        if let Some(details) = state.failures.remove(&operation) {
            return Err(ReplicaLockError::Store {
                operation: operation.name(),
                details,
            });
        }
        Ok(state)
    }
}

impl ReplicaStore for MemoryStore {
    fn run_script(
        &self,
        script: LockScript,
        key: &str,
        lease_ms: i64,
        token: &str,
    ) -> Result<StoreValue> {
        let mut state = self.begin(StoreOperation::Script(script))?;
        let reply = match script {
            LockScript::Acquire => state.acquire(key, lease_ms, token),
            LockScript::Release => state.release(key, lease_ms, token),
            LockScript::Renew => state.renew(key, lease_ms, token),
        };
        trace!("memory store: {script} {key} {token} -> {reply}");
        Ok(reply)
    }

    fn role(&self) -> Result<StoreValue> {
        let state = self.begin(StoreOperation::Role)?;
        let replicas = (0..state.replicas)
            .map(|index| {
                StoreValue::Array(vec![
                    StoreValue::Bulk("127.0.0.1".to_string()),
                    StoreValue::Bulk((6380 + index).to_string()),
                    StoreValue::Bulk("0".to_string()),
                ])
            })
            .collect();
        Ok(StoreValue::Array(vec![
            StoreValue::Bulk("master".to_string()),
            StoreValue::Int(0),
            StoreValue::Array(replicas),
        ]))
    }

    fn wait_replicas(&self, _replicas: i64, _timeout_ms: i64) -> Result<StoreValue> {
        let state = self.begin(StoreOperation::Wait)?;
        let acknowledged = state
            .acknowledging
            .unwrap_or(state.replicas)
            .min(state.replicas);
        Ok(StoreValue::Int(acknowledged as i64))
    }

    fn delete(&self, key: &str) -> Result<StoreValue> {
        let mut state = self.begin(StoreOperation::Delete)?;
        let existed = state.live_entry(key).is_some();
        state.entries.remove(key);
        Ok(StoreValue::Int(i64::from(existed)))
    }
}

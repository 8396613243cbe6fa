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

use crate::error::{ReplicaLockError, Result};
use crate::locking::key::HolderToken;
use crate::locking::quorum::unexpected;
use crate::locking::registry::HolderRegistry;
use crate::locking::watchdog::WatchdogHandle;
use crate::store::{LockScript, ReplicaStore, StoreValue};
use log::{debug, warn};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What the release transaction did to the mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The token was not present; the lock had expired or was force-released.
    NotHeld,
    /// The reentrancy count dropped but is still positive.
    StillHeld,
    /// The count reached zero and the mapping was deleted.
    Released,
}

impl ReleaseOutcome {
    pub(crate) fn decode(reply: &StoreValue) -> Result<Self> {
        match reply {
            StoreValue::Nil => Ok(ReleaseOutcome::NotHeld),
            StoreValue::Int(0) => Ok(ReleaseOutcome::StillHeld),
            StoreValue::Int(1) => Ok(ReleaseOutcome::Released),
            other => Err(unexpected("release", "nil or integer 0/1", other)),
        }
    }
}

impl fmt::Display for ReleaseOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ReleaseOutcome::NotHeld => "not held",
            ReleaseOutcome::StillHeld => "still held by a reentrant acquisition",
            ReleaseOutcome::Released => "released",
        };
        f.write_str(label)
    }
}

/// Proof of one confirmed acquisition. Pair every handle with one release;
/// dropping an unreleased handle releases it on a best-effort basis.
pub struct LockHandle {
    store: Arc<dyn ReplicaStore>,
    registry: Arc<HolderRegistry>,
    raw_name: String,
    token: HolderToken,
    lease_ms: i64,
    acquired_at: Instant,
    watchdog: Option<WatchdogHandle>,
    released: bool,
}

impl LockHandle {
    pub(crate) fn new(
        store: Arc<dyn ReplicaStore>,
        registry: Arc<HolderRegistry>,
        raw_name: String,
        token: HolderToken,
        lease_ms: i64,
    ) -> Self {
        registry.record_acquired(&raw_name, &token);
        Self {
            store,
            registry,
            raw_name,
            token,
            lease_ms,
            acquired_at: Instant::now(),
            watchdog: None,
            released: false,
        }
    }

    pub(crate) fn start_renewal(&mut self) -> Result<()> {
        let watchdog = WatchdogHandle::spawn(
            self.store.clone(),
            self.raw_name.clone(),
            self.token.clone(),
            self.lease_ms,
        )?;
        self.watchdog = Some(watchdog);
        Ok(())
    }

    pub fn raw_name(&self) -> &str {
        &self.raw_name
    }

    pub fn token(&self) -> &HolderToken {
        &self.token
    }

    pub fn lease_ms(&self) -> i64 {
        self.lease_ms
    }

    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    pub fn watchdog(&self) -> Option<&WatchdogHandle> {
        self.watchdog.as_ref()
    }

    /// Releases the hold. If the store call fails, the handle is dropped
    /// still holding and its drop retries the release once.
    pub fn release(mut self) -> Result<ReleaseOutcome> {
        self.release_inner()
    }

    /// Releases the hold, keeping the handle usable for another attempt
    /// when the store call fails. Later calls after a success return `NotHeld`.
    pub fn try_release(&mut self) -> Result<ReleaseOutcome> {
        self.release_inner()
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    fn release_inner(&mut self) -> Result<ReleaseOutcome> {
        if self.released {
            return Ok(ReleaseOutcome::NotHeld);
        }

        let reply = self
            .store
            .run_script(
                LockScript::Release,
                &self.raw_name,
                self.lease_ms,
                self.token.as_str(),
            )
            .map_err(|err| ReplicaLockError::Release {
                raw_name: self.raw_name.clone(),
                source: Box::new(err),
            })?;

        // The transaction ran; from here on the server count has moved.
        self.released = true;
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.stop();
        }
        self.registry.record_released(&self.raw_name, &self.token);
        let outcome = ReleaseOutcome::decode(&reply)?;
        if outcome != ReleaseOutcome::StillHeld {
            self.registry.clear(&self.raw_name, &self.token);
        }
        debug!(
            "Release of '{}' by {} after {:.3}s: {outcome}",
            self.raw_name,
            self.token,
            self.acquired_at.elapsed().as_secs_f64()
        );
        Ok(outcome)
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = self.release_inner() {
            warn!(
                "Failed to release lock '{}' during drop: {err}",
                self.raw_name
            );
        }
    }
}

impl fmt::Debug for LockHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockHandle")
            .field("raw_name", &self.raw_name)
            .field("token", &self.token)
            .field("lease_ms", &self.lease_ms)
            .field("watchdog", &self.watchdog)
            .field("released", &self.released)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locking::key::ExecutionContextId;
    use crate::store::{MemoryStore, StoreOperation};

    const KEY: &str = "AnyReplicaLock";

    fn held_handle(store: &Arc<MemoryStore>, count: i64) -> LockHandle {
        let token = HolderToken::new(ExecutionContextId::from_u64(9));
        store.insert_holder(KEY, token.as_str(), count, 10_000);
        LockHandle::new(
            store.clone(),
            Arc::new(HolderRegistry::default()),
            KEY.to_string(),
            token,
            10_000,
        )
    }

    #[test]
    fn decode_release_replies() {
        assert_eq!(
            ReleaseOutcome::decode(&StoreValue::Nil).unwrap(),
            ReleaseOutcome::NotHeld
        );
        assert_eq!(
            ReleaseOutcome::decode(&StoreValue::Int(0)).unwrap(),
            ReleaseOutcome::StillHeld
        );
        assert_eq!(
            ReleaseOutcome::decode(&StoreValue::Int(1)).unwrap(),
            ReleaseOutcome::Released
        );
        assert!(ReleaseOutcome::decode(&StoreValue::Int(7)).is_err());
        assert!(ReleaseOutcome::decode(&StoreValue::Status("OK".to_string())).is_err());
    }

    #[test]
    fn release_deletes_single_hold() {
        let store = Arc::new(MemoryStore::new());
        let handle = held_handle(&store, 1);
        assert_eq!(handle.release().unwrap(), ReleaseOutcome::Released);
        assert!(!store.exists(KEY));
    }

    #[test]
    fn drop_releases_best_effort() {
        let store = Arc::new(MemoryStore::new());
        {
            let _handle = held_handle(&store, 1);
        }
        assert!(!store.exists(KEY));
    }

    #[test]
    fn release_errors_are_surfaced() {
        let store = Arc::new(MemoryStore::new());
        let mut handle = held_handle(&store, 1);
        store.fail_next(StoreOperation::Script(LockScript::Release), "timeout");

        let err = handle.try_release().unwrap_err();
        match err {
            ReplicaLockError::Release { raw_name, source } => {
                assert_eq!(raw_name, KEY);
                assert!(source.to_string().contains("timeout"));
            }
            other => panic!("Expected release error, got {other:?}"),
        }
        assert!(store.exists(KEY));
        assert!(!handle.is_released());

        assert_eq!(handle.try_release().unwrap(), ReleaseOutcome::Released);
        assert!(handle.is_released());
        assert!(!store.exists(KEY));
        assert_eq!(handle.try_release().unwrap(), ReleaseOutcome::NotHeld);
    }

    #[test]
    fn failed_release_is_retried_on_drop() {
        let store = Arc::new(MemoryStore::new());
        let handle = held_handle(&store, 1);
        store.fail_next(StoreOperation::Script(LockScript::Release), "timeout");

        assert!(handle.release().is_err());
        assert!(!store.exists(KEY));
        assert_eq!(store.calls(StoreOperation::Script(LockScript::Release)), 2);
    }

    #[test]
    fn failed_release_keeps_registry_count() {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(HolderRegistry::default());
        let token = HolderToken::new(ExecutionContextId::from_u64(9));
        store.insert_holder(KEY, token.as_str(), 1, 10_000);
        let mut handle = LockHandle::new(
            store.clone(),
            registry.clone(),
            KEY.to_string(),
            token.clone(),
            10_000,
        );
        store.fail_next(StoreOperation::Script(LockScript::Release), "timeout");

        assert!(handle.try_release().is_err());
        assert_eq!(registry.held_count(KEY, token.context()), 1);
        handle.try_release().unwrap();
        assert_eq!(registry.held_count(KEY, token.context()), 0);
    }
}

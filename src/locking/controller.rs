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
use crate::locking::acquisition::{AcquireMode, AcquireRequest, POLL_INTERVAL, RoundOutcome};
use crate::locking::handle::{LockHandle, ReleaseOutcome};
use crate::locking::key::{ExecutionContextId, HolderToken, resolve_raw_name};
use crate::locking::quorum::{self, unexpected};
use crate::locking::registry::HolderRegistry;
use crate::locking::units::LockTimings;
use crate::locking::wait_observer::{LockWaitObserver, NoopLockWaitObserver};
use crate::store::{LockScript, ReplicaStore, StoreValue};
use log::{debug, trace, warn};
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

/// Reentrant lock engine whose acquisitions are confirmed by every attached replica.
///
/// One engine may be shared between threads. Each thread re-entering a raw
/// name it already holds through this engine reuses its holder token.
pub struct ReplicaLock {
    store: Arc<dyn ReplicaStore>,
    raw_name: Option<String>,
    renew_lease: bool,
    observer: Arc<dyn LockWaitObserver>,
    registry: Arc<HolderRegistry>,
}

impl ReplicaLock {
    pub fn new(store: Arc<dyn ReplicaStore>) -> Self {
        Self {
            store,
            raw_name: None,
            renew_lease: false,
            observer: Arc::new(NoopLockWaitObserver),
            registry: Arc::new(HolderRegistry::default()),
        }
    }

    pub fn with_raw_name(mut self, raw_name: impl Into<String>) -> Self {
        self.set_raw_name(raw_name);
        self
    }

    pub fn with_renewal(mut self, enabled: bool) -> Self {
        self.renew_lease = enabled;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn LockWaitObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Changes the raw name used by later acquisitions. Outstanding handles
    /// keep the name they were acquired under.
    pub fn set_raw_name(&mut self, raw_name: impl Into<String>) {
        let raw_name = raw_name.into();
        self.raw_name = (!raw_name.is_empty()).then_some(raw_name);
    }

    pub fn set_renewal(&mut self, enabled: bool) {
        self.renew_lease = enabled;
    }

    pub fn raw_name(&self) -> &str {
        resolve_raw_name(self.raw_name.as_deref())
    }

    pub fn renewal_enabled(&self) -> bool {
        self.renew_lease
    }

    pub fn store(&self) -> &Arc<dyn ReplicaStore> {
        &self.store
    }

    pub fn replica_count(&self) -> Result<i64> {
        quorum::replica_count(self.store.as_ref())
    }

    /// Reentrancy depth the calling thread holds through this engine.
    pub fn held_count(&self) -> usize {
        self.registry
            .held_count(self.raw_name(), ExecutionContextId::current())
    }

    /// Acquires the lock, retrying until every replica confirms it.
    pub fn lock(&self, timeout: i64, lease_time: i64, unit: &str) -> Result<LockHandle> {
        let timings = LockTimings::blocking(timeout, lease_time, unit)?;
        self.lock_with(timings)
    }

    pub fn lock_with(&self, timings: LockTimings) -> Result<LockHandle> {
        let started_at = Instant::now();
        let raw_name = self.raw_name().to_string();
        let token = self.token_for(&raw_name);
        self.acquire(raw_name, token, timings, AcquireMode::Blocking, started_at)
            .and_then(|handle| handle.ok_or_else(|| not_acquired(self.raw_name(), started_at)))
    }

    /// Acquires the lock within `wait_time`; `None` means it was not acquired.
    ///
    /// The first round always runs, so a zero wait is a single attempt.
    pub fn try_lock(
        &self,
        wait_time: i64,
        timeout: i64,
        lease_time: i64,
        unit: &str,
    ) -> Result<Option<LockHandle>> {
        let started_at = Instant::now();
        let timings = LockTimings::bounded(wait_time, timeout, lease_time, unit)?;
        self.try_lock_since(timings, started_at)
    }

    pub fn try_lock_with(&self, timings: LockTimings) -> Result<Option<LockHandle>> {
        self.try_lock_since(timings, Instant::now())
    }

    fn try_lock_since(&self, timings: LockTimings, started_at: Instant) -> Result<Option<LockHandle>> {
        let raw_name = self.raw_name().to_string();
        let token = self.token_for(&raw_name);
        self.acquire(raw_name, token, timings, AcquireMode::Bounded, started_at)
    }

    /// Re-enters the lock behind `handle` with its holder token, from any thread.
    pub fn reenter(
        &self,
        handle: &LockHandle,
        timeout: i64,
        lease_time: i64,
        unit: &str,
    ) -> Result<LockHandle> {
        let started_at = Instant::now();
        let timings = LockTimings::blocking(timeout, lease_time, unit)?;
        let raw_name = handle.raw_name().to_string();
        self.acquire(
            raw_name,
            handle.token().clone(),
            timings,
            AcquireMode::Blocking,
            started_at,
        )?
        .ok_or_else(|| not_acquired(handle.raw_name(), started_at))
    }

    pub fn release(&self, handle: LockHandle) -> Result<ReleaseOutcome> {
        handle.release()
    }

    /// Deletes the mapping for the current raw name regardless of holder.
    ///
    /// Returns whether a mapping existed. Live holders lose exclusion.
    pub fn force_release(&self) -> Result<bool> {
        let raw_name = self.raw_name();
        let reply = self.store.delete(raw_name)?;
        let removed = match reply {
            StoreValue::Int(count) if count >= 0 => count > 0,
            other => return Err(unexpected("DEL", "an integer", &other)),
        };
        self.registry.forget(raw_name);
        if removed {
            warn!("Force-released lock '{raw_name}'; any current holder lost exclusion");
        } else {
            debug!("Force-release found no mapping for lock '{raw_name}'");
        }
        Ok(removed)
    }

    fn token_for(&self, raw_name: &str) -> HolderToken {
        let context = ExecutionContextId::current();
        self.registry
            .token_for(raw_name, context)
            .unwrap_or_else(|| HolderToken::new(context))
    }

    fn acquire(
        &self,
        raw_name: String,
        token: HolderToken,
        timings: LockTimings,
        mode: AcquireMode,
        started_at: Instant,
    ) -> Result<Option<LockHandle>> {
        let mut request = AcquireRequest::new(
            raw_name,
            token,
            timings,
            mode,
            started_at,
            self.observer.as_ref(),
        );

        loop {
            match self.attempt_round(&request)? {
                RoundOutcome::Acquired => {
                    request.notify_acquired();
                    let (raw_name, token, timings) = request.into_parts();
                    return self.grant(raw_name, token, timings.lease_ms).map(Some);
                }
                RoundOutcome::Busy { ttl_ms } => {
                    trace!(
                        "Lock '{}' is held elsewhere for another {ttl_ms}ms",
                        request.raw_name()
                    );
                }
                RoundOutcome::QuorumShortfall(ack) => request.notify_shortfall(ack),
            }

            if !request.may_retry() {
                request.notify_timeout();
                return Ok(None);
            }
            request.record_wait_start();
            thread::sleep(POLL_INTERVAL);
            request.record_retry();
        }
    }

    fn attempt_round(&self, request: &AcquireRequest<'_>) -> Result<RoundOutcome> {
        let timings = request.timings();
        let replicas = quorum::replica_count(self.store.as_ref())?;

        let reply = self.store.run_script(
            LockScript::Acquire,
            request.raw_name(),
            timings.lease_ms,
            request.token().as_str(),
        )?;
        match reply {
            StoreValue::Nil => {}
            StoreValue::Int(ttl_ms) => return Ok(RoundOutcome::Busy { ttl_ms }),
            other => return Err(unexpected("acquire", "nil or a remaining TTL", &other)),
        }

        let ack = match quorum::await_replicas(self.store.as_ref(), replicas, timings.timeout_ms) {
            Ok(ack) => ack,
            Err(err) => {
                if let Err(rollback_err) = self.rollback(request) {
                    warn!(
                        "Failed to roll back unconfirmed acquisition of '{}': {rollback_err}",
                        request.raw_name()
                    );
                }
                return Err(err);
            }
        };
        if ack.is_satisfied() {
            return Ok(RoundOutcome::Acquired);
        }
        self.rollback(request)?;
        Ok(RoundOutcome::QuorumShortfall(ack))
    }

    /// Undoes the increment of a round that replicas did not confirm.
    fn rollback(&self, request: &AcquireRequest<'_>) -> Result<()> {
        let reply = self.store.run_script(
            LockScript::Release,
            request.raw_name(),
            request.timings().lease_ms,
            request.token().as_str(),
        )?;
        let outcome = ReleaseOutcome::decode(&reply)?;
        debug!(
            "Rolled back unconfirmed acquisition of '{}': {outcome}",
            request.raw_name()
        );
        Ok(())
    }

    fn grant(&self, raw_name: String, token: HolderToken, lease_ms: i64) -> Result<LockHandle> {
        let mut handle = LockHandle::new(
            self.store.clone(),
            self.registry.clone(),
            raw_name,
            token,
            lease_ms,
        );
        if self.renew_lease {
            handle.start_renewal()?;
        }
        Ok(handle)
    }
}

impl fmt::Debug for ReplicaLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicaLock")
            .field("raw_name", &self.raw_name())
            .field("renew_lease", &self.renew_lease)
            .finish_non_exhaustive()
    }
}

fn not_acquired(raw_name: &str, started_at: Instant) -> ReplicaLockError {
    ReplicaLockError::NotAcquired {
        raw_name: raw_name.to_string(),
        waited_ms: started_at.elapsed().as_millis(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use mockall::mock;

    mock! {
        Store {}

        impl ReplicaStore for Store {
            fn run_script(
                &self,
                script: LockScript,
                key: &str,
                lease_ms: i64,
                token: &str,
            ) -> Result<StoreValue>;
            fn role(&self) -> Result<StoreValue>;
            fn wait_replicas(&self, replicas: i64, timeout_ms: i64) -> Result<StoreValue>;
            fn delete(&self, key: &str) -> Result<StoreValue>;
        }
    }

    fn master_role(replicas: usize) -> StoreValue {
        StoreValue::Array(vec![
            StoreValue::Bulk("master".to_string()),
            StoreValue::Int(0),
            StoreValue::Array(vec![StoreValue::Array(Vec::new()); replicas]),
        ])
    }

    fn engine(store: MockStore) -> ReplicaLock {
        ReplicaLock::new(Arc::new(store))
    }

    #[test]
    fn raw_name_falls_back_to_default() {
        let mut lock = ReplicaLock::new(Arc::new(MemoryStore::new()));
        assert_eq!(lock.raw_name(), "AnyReplicaLock");
        lock.set_raw_name("orders");
        assert_eq!(lock.raw_name(), "orders");
        lock.set_raw_name("");
        assert_eq!(lock.raw_name(), "AnyReplicaLock");
    }

    #[test]
    fn invalid_unit_fails_before_store_access() {
        let mut store = MockStore::new();
        store.expect_role().never();
        store.expect_run_script().never();
        let lock = engine(store);

        assert!(matches!(
            lock.lock(1, 1, "min"),
            Err(ReplicaLockError::InvalidTimeUnit(_))
        ));
        assert!(matches!(
            lock.try_lock(1, 1, 1, "h"),
            Err(ReplicaLockError::InvalidTimeUnit(_))
        ));
    }

    #[test]
    fn unexpected_acquire_reply_is_protocol_error() {
        let mut store = MockStore::new();
        store.expect_role().returning(|| Ok(master_role(0)));
        store
            .expect_run_script()
            .times(1)
            .returning(|_, _, _, _| Ok(StoreValue::Status("OK".to_string())));
        store.expect_wait_replicas().never();
        let lock = engine(store);

        let err = lock.try_lock(1_000, 10, 1_000, "ms").unwrap_err();
        assert!(matches!(
            err,
            ReplicaLockError::Protocol {
                operation: "acquire",
                ..
            }
        ));
    }

    #[test]
    fn malformed_role_reply_aborts_acquisition() {
        let mut store = MockStore::new();
        store
            .expect_role()
            .times(1)
            .returning(|| Ok(StoreValue::Bulk("master".to_string())));
        store.expect_run_script().never();
        let lock = engine(store);

        let err = lock.lock(10, 1_000, "ms").unwrap_err();
        assert!(matches!(err, ReplicaLockError::Protocol { operation: "ROLE", .. }));
    }

    #[test]
    fn store_error_during_wait_is_not_retried() {
        let mut store = MockStore::new();
        store.expect_role().times(1).returning(|| Ok(master_role(1)));
        store
            .expect_run_script()
            .withf(|script, _, _, _| *script == LockScript::Acquire)
            .times(1)
            .returning(|_, _, _, _| Ok(StoreValue::Nil));
        store.expect_wait_replicas().times(1).returning(|_, _| {
            Err(ReplicaLockError::Store {
                operation: "WAIT",
                details: "connection reset".to_string(),
            })
        });
        store
            .expect_run_script()
            .withf(|script, _, _, _| *script == LockScript::Release)
            .times(1)
            .returning(|_, _, _, _| Ok(StoreValue::Int(1)));
        let lock = engine(store);

        let err = lock.lock(10, 1_000, "ms").unwrap_err();
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn non_integer_wait_reply_is_protocol_error() {
        let mut store = MockStore::new();
        store.expect_role().times(1).returning(|| Ok(master_role(1)));
        store
            .expect_run_script()
            .withf(|script, _, _, _| *script == LockScript::Acquire)
            .times(1)
            .returning(|_, _, _, _| Ok(StoreValue::Nil));
        store
            .expect_wait_replicas()
            .times(1)
            .returning(|_, _| Ok(StoreValue::Bulk("1".to_string())));
        store
            .expect_run_script()
            .withf(|script, _, _, _| *script == LockScript::Release)
            .times(1)
            .returning(|_, _, _, _| Ok(StoreValue::Int(1)));
        let lock = engine(store);

        let err = lock.try_lock(1_000, 10, 1_000, "ms").unwrap_err();
        assert!(matches!(err, ReplicaLockError::Protocol { operation: "WAIT", .. }));
    }

    #[test]
    fn malformed_rollback_reply_is_protocol_error() {
        let mut store = MockStore::new();
        store.expect_role().times(1).returning(|| Ok(master_role(1)));
        store
            .expect_run_script()
            .withf(|script, _, _, _| *script == LockScript::Acquire)
            .times(1)
            .returning(|_, _, _, _| Ok(StoreValue::Nil));
        store
            .expect_wait_replicas()
            .times(1)
            .returning(|_, _| Ok(StoreValue::Int(0)));
        store
            .expect_run_script()
            .withf(|script, _, _, _| *script == LockScript::Release)
            .times(1)
            .returning(|_, _, _, _| Ok(StoreValue::Status("QUEUED".to_string())));
        let lock = engine(store);

        let err = lock.try_lock(0, 10, 1_000, "ms").unwrap_err();
        assert!(matches!(err, ReplicaLockError::Protocol { operation: "release", .. }));
    }

    #[test]
    fn quorum_shortfall_rolls_back_and_gives_up_at_zero_wait() {
        let mut store = MockStore::new();
        store.expect_role().times(1).returning(|| Ok(master_role(2)));
        store
            .expect_run_script()
            .withf(|script, _, _, _| *script == LockScript::Acquire)
            .times(1)
            .returning(|_, _, _, _| Ok(StoreValue::Nil));
        store
            .expect_wait_replicas()
            .withf(|replicas, timeout_ms| *replicas == 2 && *timeout_ms == 10)
            .times(1)
            .returning(|_, _| Ok(StoreValue::Int(1)));
        store
            .expect_run_script()
            .withf(|script, _, _, _| *script == LockScript::Release)
            .times(1)
            .returning(|_, _, _, _| Ok(StoreValue::Int(1)));
        let lock = engine(store);

        assert!(lock.try_lock(0, 10, 1_000, "ms").unwrap().is_none());
        assert_eq!(lock.held_count(), 0);
    }

    #[test]
    fn seconds_are_normalized_before_reaching_the_store() {
        let mut store = MockStore::new();
        store.expect_role().returning(|| Ok(master_role(0)));
        store
            .expect_run_script()
            .withf(|script, key, lease_ms, _| {
                *script == LockScript::Acquire && key == "orders" && *lease_ms == 30_000
            })
            .times(1)
            .returning(|_, _, _, _| Ok(StoreValue::Int(12_000)));
        let lock = engine(store).with_raw_name("orders");

        assert!(lock.try_lock(0, 1, 30, "S").unwrap().is_none());
    }

    #[test]
    fn same_thread_reuses_token() {
        let store = Arc::new(MemoryStore::new());
        let lock = ReplicaLock::new(store.clone());

        let first = lock.lock(10, 1_000, "ms").unwrap();
        let second = lock.lock(10, 1_000, "ms").unwrap();
        assert_eq!(first.token(), second.token());
        assert_eq!(lock.held_count(), 2);
        assert_eq!(store.fields("AnyReplicaLock")[first.token().as_str()], 2);

        assert_eq!(second.release().unwrap(), ReleaseOutcome::StillHeld);
        assert_eq!(first.release().unwrap(), ReleaseOutcome::Released);
        assert_eq!(lock.held_count(), 0);
    }

    #[test]
    fn other_thread_contends_unless_it_reenters() {
        let store = Arc::new(MemoryStore::new());
        let lock = Arc::new(ReplicaLock::new(store.clone()));
        let handle = lock.lock(10, 5_000, "ms").unwrap();

        let contender = lock.clone();
        let blocked = thread::spawn(move || contender.try_lock(0, 10, 5_000, "ms").unwrap().is_none())
            .join()
            .unwrap();
        assert!(blocked);

        thread::scope(|scope| {
            scope.spawn(|| {
                let nested = lock.reenter(&handle, 10, 5_000, "ms").unwrap();
                assert_eq!(nested.token(), handle.token());
                assert_eq!(nested.release().unwrap(), ReleaseOutcome::StillHeld);
            });
        });

        assert_eq!(handle.release().unwrap(), ReleaseOutcome::Released);
        assert!(!store.exists("AnyReplicaLock"));
    }

    #[test]
    fn force_release_reports_presence() {
        let store = Arc::new(MemoryStore::new());
        let lock = ReplicaLock::new(store.clone()).with_raw_name("orders");
        let handle = lock.lock(10, 5_000, "ms").unwrap();

        assert!(lock.force_release().unwrap());
        assert!(!lock.force_release().unwrap());
        assert_eq!(lock.held_count(), 0);
        assert_eq!(handle.release().unwrap(), ReleaseOutcome::NotHeld);
    }

    #[test]
    fn renewal_starts_a_watchdog_per_handle() {
        let store = Arc::new(MemoryStore::new());
        let mut lock = ReplicaLock::new(store).with_renewal(true);
        let handle = lock.lock(10, 3_000, "ms").unwrap();
        assert!(handle.watchdog().is_some_and(|watchdog| watchdog.is_running()));
        handle.release().unwrap();

        lock.set_renewal(false);
        let handle = lock.lock(10, 3_000, "ms").unwrap();
        assert!(handle.watchdog().is_none());
        handle.release().unwrap();
    }
}

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

//! Lease renewal watchdog.
//!
//! One supervised thread per successful acquisition refreshes the mapping's
//! TTL every third of the lease. It stops when its handle is released, when
//! the holder token disappears from the mapping, or on the first store error.

use crate::error::Result;
use crate::locking::cancellation::CancellationToken;
use crate::locking::key::HolderToken;
use crate::locking::quorum::unexpected;
use crate::locking::units::millis;
use crate::store::{LockScript, ReplicaStore, StoreValue};
use log::{debug, error, trace, warn};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Delay between renewals: a third of the lease, at least one millisecond.
pub fn renewal_interval(lease_ms: i64) -> Duration {
    millis((lease_ms / 3).max(1))
}

/// Runs the renewal transaction once. `Ok(false)` means the token no longer holds the lock.
pub fn renew_once(
    store: &dyn ReplicaStore,
    raw_name: &str,
    token: &HolderToken,
    lease_ms: i64,
) -> Result<bool> {
    let reply = store.run_script(LockScript::Renew, raw_name, lease_ms, token.as_str())?;
    match reply {
        StoreValue::Int(1) => Ok(true),
        StoreValue::Int(0) => Ok(false),
        other => Err(unexpected("renew", "integer 0 or 1", &other)),
    }
}

/// Handle to a running renewal thread. Dropping it stops the thread.
pub struct WatchdogHandle {
    raw_name: String,
    cancellation: CancellationToken,
    renewals: Arc<AtomicUsize>,
    thread: Option<JoinHandle<()>>,
}

impl WatchdogHandle {
    pub(crate) fn spawn(
        store: Arc<dyn ReplicaStore>,
        raw_name: String,
        token: HolderToken,
        lease_ms: i64,
    ) -> Result<Self> {
        let cancellation = CancellationToken::new();
        let renewals = Arc::new(AtomicUsize::new(0));
        let worker = Watchdog {
            store,
            raw_name: raw_name.clone(),
            token,
            lease_ms,
            cancellation: cancellation.clone(),
            renewals: renewals.clone(),
        };
        let thread = thread::Builder::new()
            .name(format!("replica-lock-watchdog:{raw_name}"))
            .spawn(move || worker.run())?;
        debug!(
            "Started lease renewal for '{raw_name}' every {:?}",
            renewal_interval(lease_ms)
        );

        Ok(Self {
            raw_name,
            cancellation,
            renewals,
            thread: Some(thread),
        })
    }

    /// Number of successful renewals so far.
    pub fn renewals(&self) -> usize {
        self.renewals.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.thread
            .as_ref()
            .is_some_and(|thread| !thread.is_finished())
    }

    pub fn stop(mut self) {
        self.stop_inner();
    }

    fn stop_inner(&mut self) {
        self.cancellation.cancel();
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            warn!("Lease renewal thread for '{}' panicked", self.raw_name);
        }
    }
}

impl Drop for WatchdogHandle {
    fn drop(&mut self) {
        self.stop_inner();
    }
}

impl fmt::Debug for WatchdogHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchdogHandle")
            .field("raw_name", &self.raw_name)
            .field("renewals", &self.renewals())
            .field("running", &self.is_running())
            .finish()
    }
}

struct Watchdog {
    store: Arc<dyn ReplicaStore>,
    raw_name: String,
    token: HolderToken,
    lease_ms: i64,
    cancellation: CancellationToken,
    renewals: Arc<AtomicUsize>,
}

impl Watchdog {
    fn run(self) {
        let interval = renewal_interval(self.lease_ms);
        loop {
            if self.cancellation.wait_timeout(interval) {
                debug!("Lease renewal for '{}' cancelled", self.raw_name);
                return;
            }

            match renew_once(
                self.store.as_ref(),
                &self.raw_name,
                &self.token,
                self.lease_ms,
            ) {
                Ok(true) => {
                    let count = self.renewals.fetch_add(1, Ordering::SeqCst) + 1;
                    trace!("Renewed lease on '{}' ({count})", self.raw_name);
                }
                Ok(false) => {
                    debug!(
                        "Lock '{}' no longer held by {}; stopping renewal",
                        self.raw_name, self.token
                    );
                    return;
                }
                Err(err) => {
                    error!(
                        "Lease renewal for '{}' failed, watchdog stopped: {err}",
                        self.raw_name
                    );
                    return;
                }
            }
        }
    }
}

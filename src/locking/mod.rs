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

//! Replica-confirmed reentrant locking.
//!
//! A lock is a hash under its raw name mapping holder tokens to reentrancy
//! counts. Acquisition succeeds only once every replica attached when the
//! round started has acknowledged the write.

pub mod acquisition;
pub mod cancellation;
pub mod controller;
pub mod handle;
pub mod key;
pub mod quorum;
mod registry;
pub mod units;
pub mod wait_observer;
pub mod watchdog;

pub use acquisition::{AcquireMode, AcquireRequest, POLL_INTERVAL, RoundOutcome, WaitBudget};
pub use cancellation::{CancellationToken, global_token};
pub use controller::ReplicaLock;
pub use handle::{LockHandle, ReleaseOutcome};
pub use key::{DEFAULT_RAW_NAME, ExecutionContextId, HOLDER_PREFIX, HolderToken, resolve_raw_name};
pub use quorum::{QuorumAck, await_replicas, replica_count};
pub use units::{LockTimings, TimeUnit, normalize};
pub use wait_observer::{LockWaitObserver, LoggingObserver, NoopLockWaitObserver};
pub use watchdog::{WatchdogHandle, renew_once, renewal_interval};

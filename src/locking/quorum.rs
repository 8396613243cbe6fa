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

//! Replica quorum confirmation.
//!
//! A write is trusted only once every replica attached at the start of the
//! round has acknowledged it, so the lock survives a failover to any replica.

use crate::error::{ReplicaLockError, Result};
use crate::store::{ReplicaStore, StoreValue};
use log::trace;

/// Result of a replication wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuorumAck {
    pub required: i64,
    pub acknowledged: i64,
}

impl QuorumAck {
    pub fn is_satisfied(&self) -> bool {
        self.acknowledged == self.required
    }
}

/// Number of replicas currently attached to the store.
pub fn replica_count(store: &dyn ReplicaStore) -> Result<i64> {
    let reply = store.role()?;
    let fields = reply
        .as_array()
        .ok_or_else(|| unexpected("ROLE", "an array", &reply))?;
    let replicas = fields.get(2).ok_or_else(|| {
        ReplicaLockError::protocol(
            "ROLE",
            format!("expected at least 3 elements, got {}", fields.len()),
        )
    })?;
    let replicas = replicas
        .as_array()
        .ok_or_else(|| unexpected("ROLE", "a replica list at index 2", replicas))?;
    Ok(replicas.len() as i64)
}

/// Waits for `required` replicas to acknowledge prior writes within `timeout_ms`.
pub fn await_replicas(store: &dyn ReplicaStore, required: i64, timeout_ms: i64) -> Result<QuorumAck> {
    let reply = store.wait_replicas(required, timeout_ms)?;
    let acknowledged = reply
        .as_int()
        .ok_or_else(|| unexpected("WAIT", "an integer", &reply))?;
    trace!("{acknowledged}/{required} replicas acknowledged");
    Ok(QuorumAck {
        required,
        acknowledged,
    })
}

pub(crate) fn unexpected(operation: &'static str, expected: &str, reply: &StoreValue) -> ReplicaLockError {
    ReplicaLockError::protocol(operation, format!("expected {expected}, got {}", reply.kind()))
}

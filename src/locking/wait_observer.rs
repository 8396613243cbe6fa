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

//! Observer interfaces for lock wait instrumentation.
//!
//! Lock wait observers decouple the `ReplicaLock` engine from user-facing
//! feedback so callers can surface contention and replication lag without
//! duplicating polling logic.

use crate::locking::quorum::QuorumAck;
use log::{debug, info, warn};
use std::time::Duration;

/// Observer hooks for lock wait events.
pub trait LockWaitObserver: Send + Sync {
    fn on_wait_start(&self, _raw_name: &str, _budget: Option<Duration>) {}

    fn on_retry(
        &self,
        _raw_name: &str,
        _attempt: usize,
        _elapsed: Duration,
        _remaining: Option<Duration>,
    ) {
    }

    fn on_quorum_shortfall(&self, _raw_name: &str, _ack: QuorumAck) {}

    fn on_acquired(&self, _raw_name: &str, _waited: Duration) {}

    fn on_timeout(&self, _raw_name: &str, _waited: Duration) {}
}

/// Observer implementation that performs no work.
#[derive(Debug, Default)]
pub struct NoopLockWaitObserver;

impl LockWaitObserver for NoopLockWaitObserver {}

/// Observer that reports wait progress through the `log` facade.
#[derive(Debug, Default)]
pub struct LoggingObserver;

/// Retries are polled every millisecond; report one line per this many.
const RETRY_REPORT_EVERY: usize = 1000;

impl LockWaitObserver for LoggingObserver {
    fn on_wait_start(&self, raw_name: &str, budget: Option<Duration>) {
        match budget {
            Some(budget) => info!(
                "Waiting up to {} for lock '{raw_name}'",
                format_duration(budget)
            ),
            None => info!("Waiting for lock '{raw_name}'"),
        }
    }

    fn on_retry(
        &self,
        raw_name: &str,
        attempt: usize,
        elapsed: Duration,
        remaining: Option<Duration>,
    ) {
        if attempt % RETRY_REPORT_EVERY != 0 {
            return;
        }
        let remaining_text = remaining
            .map(format_duration)
            .map(|value| format!(" (~{value} remaining)"))
            .unwrap_or_default();
        debug!(
            "Still waiting for lock '{raw_name}' after {attempt} attempts, elapsed {}{remaining_text}",
            format_duration(elapsed)
        );
    }

    fn on_quorum_shortfall(&self, raw_name: &str, ack: QuorumAck) {
        warn!(
            "Lock '{raw_name}' written but only {}/{} replicas acknowledged; retrying",
            ack.acknowledged, ack.required
        );
    }

    fn on_acquired(&self, raw_name: &str, waited: Duration) {
        info!(
            "Lock '{raw_name}' acquired after {}",
            format_duration(waited)
        );
    }

    fn on_timeout(&self, raw_name: &str, waited: Duration) {
        info!(
            "Gave up on lock '{raw_name}' after {}",
            format_duration(waited)
        );
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.1}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_subsecond_and_seconds() {
        assert_eq!(format_duration(Duration::from_millis(15)), "15ms");
        assert_eq!(format_duration(Duration::from_millis(2500)), "2.5s");
    }

    #[test]
    fn default_hooks_are_noops() {
        let observer = NoopLockWaitObserver;
        observer.on_wait_start("orders", None);
        observer.on_quorum_shortfall(
            "orders",
            QuorumAck {
                required: 2,
                acknowledged: 1,
            },
        );
        observer.on_timeout("orders", Duration::ZERO);
    }
}

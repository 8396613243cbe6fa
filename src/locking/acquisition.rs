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

use crate::locking::key::HolderToken;
use crate::locking::quorum::QuorumAck;
use crate::locking::units::LockTimings;
use crate::locking::wait_observer::LockWaitObserver;
use std::time::{Duration, Instant};

/// Fixed delay between acquisition rounds.
pub const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Indicates whether a lock request may wait indefinitely or only within a budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireMode {
    Blocking,
    Bounded,
}

impl AcquireMode {
    pub fn is_blocking(self) -> bool {
        matches!(self, AcquireMode::Blocking)
    }
}

/// Tracks elapsed and remaining time for an acquisition wait budget.
#[derive(Debug, Clone)]
pub struct WaitBudget {
    limit: Option<Duration>,
    started_at: Instant,
}

impl WaitBudget {
    pub fn unbounded(started_at: Instant) -> Self {
        Self {
            limit: None,
            started_at,
        }
    }

    pub fn bounded(limit: Duration, started_at: Instant) -> Self {
        Self {
            limit: Some(limit),
            started_at,
        }
    }

    pub fn limit(&self) -> Option<Duration> {
        self.limit
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.limit.map(|limit| limit.saturating_sub(self.elapsed()))
    }

    pub fn is_expired(&self) -> bool {
        matches!(self.limit, Some(limit) if self.elapsed() >= limit)
    }
}

/// What a single acquisition round observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundOutcome {
    Acquired,
    /// Another holder owns the mapping; carries its remaining TTL.
    Busy { ttl_ms: i64 },
    /// The transaction committed on the master but not every replica confirmed it.
    QuorumShortfall(QuorumAck),
}

/// Per-call state of one logical acquisition.
pub struct AcquireRequest<'a> {
    raw_name: String,
    token: HolderToken,
    timings: LockTimings,
    mode: AcquireMode,
    budget: WaitBudget,
    observer: &'a dyn LockWaitObserver,
    retries: usize,
    wait_started: bool,
}

impl<'a> AcquireRequest<'a> {
    pub fn new(
        raw_name: String,
        token: HolderToken,
        timings: LockTimings,
        mode: AcquireMode,
        started_at: Instant,
        observer: &'a dyn LockWaitObserver,
    ) -> Self {
        let budget = match mode {
            AcquireMode::Blocking => WaitBudget::unbounded(started_at),
            AcquireMode::Bounded => WaitBudget::bounded(timings.wait(), started_at),
        };
        Self {
            raw_name,
            token,
            timings,
            mode,
            budget,
            observer,
            retries: 0,
            wait_started: false,
        }
    }

    pub fn raw_name(&self) -> &str {
        &self.raw_name
    }

    pub fn token(&self) -> &HolderToken {
        &self.token
    }

    pub fn timings(&self) -> LockTimings {
        self.timings
    }

    pub fn budget(&self) -> &WaitBudget {
        &self.budget
    }

    pub fn retries(&self) -> usize {
        self.retries
    }

    /// Whether another round may run after a failed one.
    pub fn may_retry(&self) -> bool {
        self.mode.is_blocking() || !self.budget.is_expired()
    }

    pub fn into_parts(self) -> (String, HolderToken, LockTimings) {
        (self.raw_name, self.token, self.timings)
    }

    pub fn record_wait_start(&mut self) {
        if !self.wait_started {
            self.observer
                .on_wait_start(&self.raw_name, self.budget.limit());
            self.wait_started = true;
        }
    }

    pub fn record_retry(&mut self) {
        self.retries = self.retries.saturating_add(1);
        self.observer.on_retry(
            &self.raw_name,
            self.retries,
            self.budget.elapsed(),
            self.budget.remaining(),
        );
    }

    pub fn notify_shortfall(&self, ack: QuorumAck) {
        self.observer.on_quorum_shortfall(&self.raw_name, ack);
    }

    pub fn notify_acquired(&self) {
        self.observer
            .on_acquired(&self.raw_name, self.budget.elapsed());
    }

    pub fn notify_timeout(&self) {
        self.observer
            .on_timeout(&self.raw_name, self.budget.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locking::key::ExecutionContextId;
    use crate::locking::wait_observer::NoopLockWaitObserver;
    use std::sync::Mutex;

    fn timings(wait_ms: i64) -> LockTimings {
        LockTimings {
            wait_ms,
            timeout_ms: 10,
            lease_ms: 1_000,
        }
    }

    fn token() -> HolderToken {
        HolderToken::new(ExecutionContextId::from_u64(7))
    }

    #[test]
    fn bounded_budget_expires() {
        let started = Instant::now();
        let budget = WaitBudget::bounded(Duration::ZERO, started);
        assert!(budget.is_expired());
        assert_eq!(budget.remaining(), Some(Duration::ZERO));

        let unbounded = WaitBudget::unbounded(started);
        assert!(!unbounded.is_expired());
        assert_eq!(unbounded.remaining(), None);
    }

    #[test]
    fn zero_wait_never_retries() {
        let observer = NoopLockWaitObserver;
        let request = AcquireRequest::new(
            "orders".to_string(),
            token(),
            timings(0),
            AcquireMode::Bounded,
            Instant::now(),
            &observer,
        );
        assert!(!request.may_retry());
    }

    #[test]
    fn blocking_always_retries() {
        let observer = NoopLockWaitObserver;
        let request = AcquireRequest::new(
            "orders".to_string(),
            token(),
            timings(0),
            AcquireMode::Blocking,
            Instant::now(),
            &observer,
        );
        assert!(request.may_retry());
        assert_eq!(request.budget().limit(), None);
    }

    #[derive(Default)]
    struct RecordingObserver {
        events: Mutex<Vec<String>>,
    }

    impl LockWaitObserver for RecordingObserver {
        fn on_wait_start(&self, raw_name: &str, _budget: Option<Duration>) {
            self.events.lock().unwrap().push(format!("start:{raw_name}"));
        }

        fn on_retry(
            &self,
            _raw_name: &str,
            attempt: usize,
            _elapsed: Duration,
            _remaining: Option<Duration>,
        ) {
            self.events.lock().unwrap().push(format!("retry:{attempt}"));
        }

        fn on_quorum_shortfall(&self, _raw_name: &str, ack: QuorumAck) {
            self.events
                .lock()
                .unwrap()
                .push(format!("shortfall:{}/{}", ack.acknowledged, ack.required));
        }

        fn on_timeout(&self, raw_name: &str, _waited: Duration) {
            self.events.lock().unwrap().push(format!("timeout:{raw_name}"));
        }
    }

    #[test]
    fn request_notifies_observer_once_per_wait() {
        let observer = RecordingObserver::default();
        let mut request = AcquireRequest::new(
            "orders".to_string(),
            token(),
            timings(5),
            AcquireMode::Bounded,
            Instant::now(),
            &observer,
        );

        request.record_wait_start();
        request.notify_shortfall(QuorumAck {
            required: 2,
            acknowledged: 1,
        });
        request.record_wait_start();
        request.record_retry();
        request.notify_timeout();

        let events = observer.events.lock().unwrap();
        assert_eq!(
            events.as_slice(),
            ["start:orders", "shortfall:1/2", "retry:1", "timeout:orders"]
        );
        assert_eq!(request.retries(), 1);
    }
}

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
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Unit designator accepted alongside every caller-supplied duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Seconds,
    Milliseconds,
}

impl TimeUnit {
    /// Converts `value` to milliseconds. Negative values clamp to zero and
    /// seconds saturate at `i64::MAX`.
    pub fn to_millis(self, value: i64) -> i64 {
        let value = value.max(0);
        match self {
            TimeUnit::Seconds => value.saturating_mul(1000),
            TimeUnit::Milliseconds => value,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TimeUnit::Seconds => "s",
            TimeUnit::Milliseconds => "ms",
        }
    }
}

impl FromStr for TimeUnit {
    type Err = ReplicaLockError;

    fn from_str(value: &str) -> Result<Self> {
        if value.eq_ignore_ascii_case("s") {
            Ok(TimeUnit::Seconds)
        } else if value.eq_ignore_ascii_case("ms") {
            Ok(TimeUnit::Milliseconds)
        } else {
            Err(ReplicaLockError::InvalidTimeUnit(value.to_string()))
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn normalize(value: i64, unit: TimeUnit) -> i64 {
    unit.to_millis(value)
}

/// Millisecond timings for one acquisition call.
///
/// `wait_ms` bounds the whole bounded acquisition, `timeout_ms` bounds each
/// replication wait, `lease_ms` is the TTL applied to the mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockTimings {
    pub wait_ms: i64,
    pub timeout_ms: i64,
    pub lease_ms: i64,
}

impl LockTimings {
    pub fn blocking(timeout: i64, lease_time: i64, unit: &str) -> Result<Self> {
        let unit = unit.parse::<TimeUnit>()?;
        Ok(Self {
            wait_ms: 0,
            timeout_ms: unit.to_millis(timeout),
            lease_ms: unit.to_millis(lease_time),
        })
    }

    pub fn bounded(wait_time: i64, timeout: i64, lease_time: i64, unit: &str) -> Result<Self> {
        let unit = unit.parse::<TimeUnit>()?;
        Ok(Self {
            wait_ms: unit.to_millis(wait_time),
            timeout_ms: unit.to_millis(timeout),
            lease_ms: unit.to_millis(lease_time),
        })
    }

    pub fn wait(&self) -> Duration {
        millis(self.wait_ms)
    }

    pub fn lease(&self) -> Duration {
        millis(self.lease_ms)
    }
}

pub(crate) fn millis(value: i64) -> Duration {
    Duration::from_millis(u64::try_from(value).unwrap_or(0))
}

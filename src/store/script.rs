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

use std::fmt;

/// `KEYS[1]` is the raw name, `ARGV[1]` the lease in milliseconds and
/// `ARGV[2]` the holder token. Returns nil when acquired, otherwise the
/// remaining TTL of the current holder.
pub const ACQUIRE_SCRIPT: &str = "if (redis.call('exists', KEYS[1]) == 0) then \
     redis.call('hincrby', KEYS[1], ARGV[2], 1); \
     redis.call('pexpire', KEYS[1], ARGV[1]); \
     return nil; \
     end; \
     if (redis.call('hexists', KEYS[1], ARGV[2]) == 1) then \
     redis.call('hincrby', KEYS[1], ARGV[2], 1); \
     redis.call('pexpire', KEYS[1], ARGV[1]); \
     return nil; \
     end; \
     return redis.call('pttl', KEYS[1]);";

/// Returns nil if the token does not hold the lock, 0 if it still holds it
/// after the decrement, 1 once the mapping was deleted.
pub const RELEASE_SCRIPT: &str = "if (redis.call('hexists', KEYS[1], ARGV[2]) == 0) then \
     return nil;\
     end; \
     local counter = redis.call('hincrby', KEYS[1], ARGV[2], -1); \
     if (counter > 0) then \
     redis.call('pexpire', KEYS[1], ARGV[1]); \
     return 0; \
     else \
     redis.call('del', KEYS[1]); \
     return 1; \
     end; \
     return nil;";

/// Returns 1 when the TTL was refreshed, 0 when the token no longer holds the lock.
pub const RENEW_SCRIPT: &str = "if (redis.call('hexists', KEYS[1], ARGV[2]) == 1) then \
     redis.call('pexpire', KEYS[1], ARGV[1]); \
     return 1; \
     end; \
     return 0;";

/// Server-side transactions run against the lock mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockScript {
    Acquire,
    Release,
    Renew,
}

impl LockScript {
    pub fn source(self) -> &'static str {
        match self {
            LockScript::Acquire => ACQUIRE_SCRIPT,
            LockScript::Release => RELEASE_SCRIPT,
            LockScript::Renew => RENEW_SCRIPT,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            LockScript::Acquire => "acquire",
            LockScript::Release => "release",
            LockScript::Renew => "renew",
        }
    }
}

impl fmt::Display for LockScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

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

//! Naming of the server-side lock mapping and of the holder tokens stored in it.

use crate::error::{ReplicaLockError, Result};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::thread;
use uuid::Uuid;

/// Raw name used when an engine is not given one.
pub const DEFAULT_RAW_NAME: &str = "AnyReplicaLock";

/// Prefix of every holder token.
pub const HOLDER_PREFIX: &str = "ReplicaLock:";

/// Returns the configured raw name, or the default when unset or empty.
pub fn resolve_raw_name(configured: Option<&str>) -> &str {
    match configured {
        Some(name) if !name.is_empty() => name,
        _ => DEFAULT_RAW_NAME,
    }
}

/// Identity of the logical execution context (thread) issuing lock calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExecutionContextId(u64);

impl ExecutionContextId {
    pub fn current() -> Self {
        let mut hasher = DefaultHasher::new();
        thread::current().id().hash(&mut hasher);
        Self(hasher.finish())
    }

    pub const fn from_u64(value: u64) -> Self {
        Self(value)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ExecutionContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Field key identifying one acquisition context inside the lock mapping.
///
/// Format: `ReplicaLock:<uuid>:<execution context id>`. A token is minted once
/// per logical acquisition and reused for its retries, reentries and release.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HolderToken {
    value: String,
    context: ExecutionContextId,
}

impl HolderToken {
    pub fn new(context: ExecutionContextId) -> Self {
        let value = format!("{HOLDER_PREFIX}{}:{context}", Uuid::new_v4());
        Self { value, context }
    }

    pub fn for_current_context() -> Self {
        Self::new(ExecutionContextId::current())
    }

    pub fn parse(value: &str) -> Result<Self> {
        let invalid = || ReplicaLockError::InvalidHolderToken(value.to_string());
        let rest = value.strip_prefix(HOLDER_PREFIX).ok_or_else(invalid)?;
        let (uuid, context) = rest.rsplit_once(':').ok_or_else(invalid)?;
        Uuid::parse_str(uuid).map_err(|_| invalid())?;
        let context = context.parse::<u64>().map_err(|_| invalid())?;
        Ok(Self {
            value: value.to_string(),
            context: ExecutionContextId(context),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn context(&self) -> ExecutionContextId {
        self.context
    }
}

impl fmt::Display for HolderToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

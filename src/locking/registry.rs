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

use crate::locking::key::{ExecutionContextId, HolderToken};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
struct LocalHold {
    token: HolderToken,
    count: usize,
}

/// Per-engine record of which execution contexts currently hold which raw names.
///
/// Lets a thread that already holds a lock re-enter it with the same holder
/// token instead of contending against itself.
#[derive(Debug, Default)]
pub(crate) struct HolderRegistry {
    holds: Mutex<HashMap<(String, ExecutionContextId), LocalHold>>,
}

impl HolderRegistry {
    fn holds(&self) -> MutexGuard<'_, HashMap<(String, ExecutionContextId), LocalHold>> {
        self.holds.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn token_for(
        &self,
        raw_name: &str,
        context: ExecutionContextId,
    ) -> Option<HolderToken> {
        self.holds()
            .get(&(raw_name.to_string(), context))
            .map(|hold| hold.token.clone())
    }

    pub(crate) fn held_count(&self, raw_name: &str, context: ExecutionContextId) -> usize {
        self.holds()
            .get(&(raw_name.to_string(), context))
            .map_or(0, |hold| hold.count)
    }

    pub(crate) fn record_acquired(&self, raw_name: &str, token: &HolderToken) {
        let mut holds = self.holds();
        let hold = holds
            .entry((raw_name.to_string(), token.context()))
            .or_insert_with(|| LocalHold {
                token: token.clone(),
                count: 0,
            });
        if hold.token != *token {
            // The previous hold was forgotten by the server; the new token wins.
            hold.token = token.clone();
            hold.count = 0;
        }
        hold.count += 1;
    }

    pub(crate) fn record_released(&self, raw_name: &str, token: &HolderToken) {
        let mut holds = self.holds();
        let key = (raw_name.to_string(), token.context());
        let drained = match holds.get_mut(&key) {
            Some(hold) if hold.token == *token => {
                hold.count = hold.count.saturating_sub(1);
                hold.count == 0
            }
            _ => false,
        };
        if drained {
            holds.remove(&key);
        }
    }

    /// Drops the hold of `token` once the server reports no remaining count.
    pub(crate) fn clear(&self, raw_name: &str, token: &HolderToken) {
        let mut holds = self.holds();
        let key = (raw_name.to_string(), token.context());
        if holds.get(&key).is_some_and(|hold| hold.token == *token) {
            holds.remove(&key);
        }
    }

    pub(crate) fn forget(&self, raw_name: &str) {
        self.holds().retain(|(name, _), _| name != raw_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_reentries_per_context() {
        let registry = HolderRegistry::default();
        let context = ExecutionContextId::from_u64(3);
        let token = HolderToken::new(context);

        registry.record_acquired("orders", &token);
        registry.record_acquired("orders", &token);
        assert_eq!(registry.held_count("orders", context), 2);
        assert_eq!(registry.token_for("orders", context), Some(token.clone()));
        assert_eq!(registry.token_for("billing", context), None);

        registry.record_released("orders", &token);
        assert_eq!(registry.held_count("orders", context), 1);
        registry.record_released("orders", &token);
        assert_eq!(registry.token_for("orders", context), None);
    }

    #[test]
    fn release_of_stale_token_is_ignored() {
        let registry = HolderRegistry::default();
        let context = ExecutionContextId::from_u64(3);
        let current = HolderToken::new(context);
        let stale = HolderToken::new(context);

        registry.record_acquired("orders", &current);
        registry.record_released("orders", &stale);
        assert_eq!(registry.held_count("orders", context), 1);
    }

    #[test]
    fn clear_drops_outstanding_count() {
        let registry = HolderRegistry::default();
        let context = ExecutionContextId::from_u64(4);
        let token = HolderToken::new(context);
        registry.record_acquired("orders", &token);
        registry.record_acquired("orders", &token);

        registry.clear("orders", &HolderToken::new(context));
        assert_eq!(registry.held_count("orders", context), 2);
        registry.clear("orders", &token);
        assert_eq!(registry.held_count("orders", context), 0);
    }

    #[test]
    fn forget_drops_every_context_for_a_name() {
        let registry = HolderRegistry::default();
        let first = HolderToken::new(ExecutionContextId::from_u64(1));
        let second = HolderToken::new(ExecutionContextId::from_u64(2));
        registry.record_acquired("orders", &first);
        registry.record_acquired("orders", &second);
        registry.record_acquired("billing", &first);

        registry.forget("orders");
        assert_eq!(registry.held_count("orders", first.context()), 0);
        assert_eq!(registry.held_count("orders", second.context()), 0);
        assert_eq!(registry.held_count("billing", first.context()), 1);
    }
}

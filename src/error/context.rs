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

use crate::error::ReplicaLockError;
use std::fmt;

pub struct ErrorContext<'a> {
    pub error: &'a ReplicaLockError,
    pub suggestion: Option<String>,
    pub details: Option<String>,
}

impl<'a> ErrorContext<'a> {
    pub fn new(error: &'a ReplicaLockError) -> Self {
        let (suggestion, details) = match error {
            ReplicaLockError::InvalidTimeUnit(unit) => {
                let suggestion =
                    Some("Pass the time unit as 's' (seconds) or 'ms' (milliseconds).".to_string());
                let details = Some(format!("Received unit designator '{unit}'."));
                (suggestion, details)
            }
            ReplicaLockError::InvalidConfig(msg) | ReplicaLockError::ConfigError(msg) => {
                let suggestion = Some(
                    "Check replica-lock.toml and any REPLICA_LOCK__* environment variables."
                        .to_string(),
                );
                let details = Some(msg.clone());
                (suggestion, details)
            }
            ReplicaLockError::UnsupportedStoreUrl(url) => {
                let suggestion = Some(
                    "Use a redis://host:port/ (or rediss://) URL, or memory:// for an in-process \
                     store."
                        .to_string(),
                );
                let details = Some(format!("Could not open a store for '{url}'."));
                (suggestion, details)
            }
            ReplicaLockError::Redis(err) => {
                let suggestion = Some(
                    "Verify the store is reachable and that it is the replication master."
                        .to_string(),
                );
                let details = Some(format!("Store reported: {err}"));
                (suggestion, details)
            }
            ReplicaLockError::Store { operation, details } => {
                let suggestion = Some(
                    "Verify the store is reachable and that it is the replication master."
                        .to_string(),
                );
                let details = Some(format!("{operation}: {details}"));
                (suggestion, details)
            }
            ReplicaLockError::Protocol { operation, .. } => {
                let suggestion = Some(
                    "The store replied with an unexpected shape. Make sure the URL points at a \
                     master node of a compatible key-value store."
                        .to_string(),
                );
                let details = Some(format!("Decoding the reply of '{operation}' failed."));
                (suggestion, details)
            }
            ReplicaLockError::NotAcquired { raw_name, .. } => {
                let suggestion = Some(format!(
                    "Another holder owns '{raw_name}'. Retry with a longer --wait, or use \
                     'replica-lock force-release' if the holder is known to be gone."
                ));
                (suggestion, None)
            }
            ReplicaLockError::Release { raw_name, .. } => {
                let suggestion = Some(format!(
                    "The lease on '{raw_name}' will expire on its own; 'replica-lock \
                     force-release' removes it immediately."
                ));
                (suggestion, None)
            }
            _ => (None, None),
        };

        ErrorContext {
            error,
            suggestion,
            details,
        }
    }

    pub fn with_suggestion(mut self, suggestion: String) -> Self {
        self.suggestion = Some(suggestion);
        self
    }

    pub fn with_details(mut self, details: String) -> Self {
        self.details = Some(details);
        self
    }
}

impl<'a> fmt::Display for ErrorContext<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error: {}", self.error)?;

        if let Some(details) = &self.details {
            write!(f, "\n\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\n\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}

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
use crate::store::{LockScript, ReplicaStore, StoreValue};
use log::trace;
use redis::{Connection, RedisResult, Script, Value};
use std::sync::Mutex;

/// Store backed by a single synchronous redis connection.
///
/// Every call goes through the same connection so that `WAIT` covers the
/// write issued by the preceding script.
pub struct RedisStore {
    connection: Mutex<Connection>,
    acquire: Script,
    release: Script,
    renew: Script,
}

impl RedisStore {
    pub fn open(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let connection = client.get_connection()?;
        Ok(Self::with_connection(connection))
    }

    pub fn with_connection(connection: Connection) -> Self {
        Self {
            connection: Mutex::new(connection),
            acquire: Script::new(LockScript::Acquire.source()),
            release: Script::new(LockScript::Release.source()),
            renew: Script::new(LockScript::Renew.source()),
        }
    }

    fn script(&self, script: LockScript) -> &Script {
        match script {
            LockScript::Acquire => &self.acquire,
            LockScript::Release => &self.release,
            LockScript::Renew => &self.renew,
        }
    }

    fn execute<F>(&self, operation: &'static str, f: F) -> Result<StoreValue>
    where
        F: FnOnce(&mut Connection) -> RedisResult<Value>,
    {
        let mut connection = self
            .connection
            .lock()
            .map_err(|_| ReplicaLockError::Store {
                operation,
                details: "connection mutex poisoned".to_string(),
            })?;
        let value = f(&mut *connection)?;
        trace!("{operation} -> {value:?}");
        Ok(convert_value(value))
    }
}

impl ReplicaStore for RedisStore {
    fn run_script(
        &self,
        script: LockScript,
        key: &str,
        lease_ms: i64,
        token: &str,
    ) -> Result<StoreValue> {
        let invocation = self.script(script);
        self.execute(script.name(), |connection| {
            invocation
                .key(key)
                .arg(lease_ms)
                .arg(token)
                .invoke::<Value>(connection)
        })
    }

    fn role(&self) -> Result<StoreValue> {
        self.execute("ROLE", |connection| {
            redis::cmd("ROLE").query::<Value>(connection)
        })
    }

    fn wait_replicas(&self, replicas: i64, timeout_ms: i64) -> Result<StoreValue> {
        self.execute("WAIT", |connection| {
            redis::cmd("WAIT")
                .arg(replicas)
                .arg(timeout_ms)
                .query::<Value>(connection)
        })
    }

    fn delete(&self, key: &str) -> Result<StoreValue> {
        self.execute("DEL", |connection| {
            redis::cmd("DEL").arg(key).query::<Value>(connection)
        })
    }
}

fn convert_value(value: Value) -> StoreValue {
    match value {
        Value::Nil => StoreValue::Nil,
        Value::Int(value) => StoreValue::Int(value),
        Value::BulkString(bytes) => StoreValue::Bulk(String::from_utf8_lossy(&bytes).into_owned()),
        Value::SimpleString(status) => StoreValue::Status(status),
        Value::Okay => StoreValue::Status("OK".to_string()),
        Value::Array(items) | Value::Set(items) => {
            StoreValue::Array(items.into_iter().map(convert_value).collect())
        }
        other => StoreValue::Other(format!("{other:?}")),
    }
}

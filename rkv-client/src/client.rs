//! # Command Facade
//!
//! Purpose: Expose typed, auto-serializing and auto-retrying operations over
//! strings, hashes, lists, sets and sorted sets.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: One call is encode, build, execute with retry,
//!    decode. Callers never see connections or raw replies.
//! 2. **Encode Before Retry**: Values are serialized once, before the first
//!    attempt; a serialization error is never retried.
//! 3. **Availability First**: Read-style calls return the safe default from
//!    `crate::policy` once retries are spent, unless the policy propagates.
//! 4. **Explicit Options**: Flags like NX/XX travel in small option structs
//!    instead of positional booleans.
//!
//! ## Call Flow
//!
//! ```text
//! set("user:1", &user, SetOptions::expiring(Expiry::Seconds(60)))
//!   -> Codec::encode(user)              (fails fast)
//!   -> commands::set(...)               (SET user:1 {...} EX 60)
//!   -> RetryExecutor::execute           (connection per attempt)
//!   -> reply Nil / OK                   -> false / true
//! ```

use std::collections::HashMap;
use std::time::Duration;

use redis::{Cmd, FromRedisValue};
use rkv_common::{Codec, RedisSettings, Value};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::commands;
use crate::error::{ClientError, ClientResult};
use crate::policy::FailurePolicy;
use crate::retry::{RetryExecutor, RetryPolicy};
use crate::topology::{ConnectionProvider, TopologyManager, TopologyMode};

/// Key lifetime for `set` and `expire`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// Whole seconds (`EX` / `EXPIRE`).
    Seconds(i64),
    /// Millisecond precision (`PX` / `PEXPIRE`).
    After(Duration),
}

impl Expiry {
    pub(crate) fn validate(&self) -> ClientResult<()> {
        match self {
            Expiry::Seconds(secs) if *secs <= 0 => Err(ClientError::invalid(format!(
                "ttl must be positive, got {secs}"
            ))),
            Expiry::After(duration) if duration.as_millis() == 0 => Err(ClientError::invalid(
                "ttl must be at least one millisecond",
            )),
            _ => Ok(()),
        }
    }
}

/// Flags for `set`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    pub expire: Option<Expiry>,
    /// Only set when the key does not exist.
    pub nx: bool,
    /// Only set when the key already exists.
    pub xx: bool,
    /// Keep the key's current TTL.
    pub keep_ttl: bool,
}

impl SetOptions {
    pub fn expiring(expiry: Expiry) -> Self {
        SetOptions {
            expire: Some(expiry),
            ..SetOptions::default()
        }
    }

    pub fn if_absent() -> Self {
        SetOptions {
            nx: true,
            ..SetOptions::default()
        }
    }

    pub(crate) fn validate(&self) -> ClientResult<()> {
        if self.nx && self.xx {
            return Err(ClientError::invalid("nx and xx are mutually exclusive"));
        }
        if self.keep_ttl && self.expire.is_some() {
            return Err(ClientError::invalid("keep_ttl cannot be combined with an expiry"));
        }
        match self.expire {
            Some(expiry) => expiry.validate(),
            None => Ok(()),
        }
    }
}

/// Condition for `expire`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpireCondition {
    /// Only when the key has no TTL.
    Nx,
    /// Only when the key already has a TTL.
    Xx,
    /// Only when the new TTL is greater.
    Gt,
    /// Only when the new TTL is smaller.
    Lt,
}

impl ExpireCondition {
    pub(crate) fn as_arg(&self) -> &'static str {
        match self {
            ExpireCondition::Nx => "NX",
            ExpireCondition::Xx => "XX",
            ExpireCondition::Gt => "GT",
            ExpireCondition::Lt => "LT",
        }
    }
}

/// Where `linsert` puts the value relative to the pivot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPosition {
    Before,
    After,
}

impl InsertPosition {
    pub(crate) fn as_arg(&self) -> &'static str {
        match self {
            InsertPosition::Before => "BEFORE",
            InsertPosition::After => "AFTER",
        }
    }
}

/// Existence condition for `zadd`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZAddCondition {
    /// Only add new members.
    Nx,
    /// Only update existing members.
    Xx,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ZAddOptions {
    pub condition: Option<ZAddCondition>,
    /// Count changed members, not only added ones.
    pub changed: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ZRangeOptions {
    /// Highest score first.
    pub desc: bool,
    pub with_scores: bool,
}

/// One element of a `zrange` result.
#[derive(Debug, Clone, PartialEq)]
pub enum RangeEntry {
    Member(Value),
    Scored(Value, f64),
}

impl RangeEntry {
    pub fn member(&self) -> &Value {
        match self {
            RangeEntry::Member(member) | RangeEntry::Scored(member, _) => member,
        }
    }

    pub fn score(&self) -> Option<f64> {
        match self {
            RangeEntry::Member(_) => None,
            RangeEntry::Scored(_, score) => Some(*score),
        }
    }
}

/// Input for `hset`: a single field or a whole mapping.
#[derive(Debug, Clone, Copy)]
pub enum HashWrite<'a, V> {
    Field(&'a str, &'a V),
    Mapping(&'a [(&'a str, V)]),
}

/// One page of `hscan`. A cursor of 0 means the scan is complete.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HashScan {
    pub cursor: u64,
    pub entries: Vec<(String, Value)>,
}

/// Asynchronous client facade.
///
/// Each call checks out a pooled connection per attempt, runs one command
/// and returns the connection to the pool. Cloning is not needed to share a
/// client: wrap it in an `Arc`.
pub struct KVClient<P: ConnectionProvider = TopologyManager> {
    provider: P,
    codec: Codec,
    retry: RetryExecutor,
    failure: FailurePolicy,
}

impl KVClient<TopologyManager> {
    /// Builds the pool for `settings` and returns a ready client.
    ///
    /// # Errors
    /// Propagates invalid settings and pool construction failures.
    pub fn connect(settings: RedisSettings) -> ClientResult<Self> {
        let manager = TopologyManager::new(settings.clone())?;
        Ok(Self::with_provider(manager, &settings))
    }

    /// Reads `RedisSettings::from_env` and connects.
    pub fn from_env() -> ClientResult<Self> {
        let settings = RedisSettings::from_env()?;
        Self::connect(settings)
    }
}

impl<P: ConnectionProvider> KVClient<P> {
    /// Creates a client over any connection provider.
    pub fn with_provider(provider: P, settings: &RedisSettings) -> Self {
        KVClient {
            provider,
            codec: Codec::new(settings.decode_responses),
            retry: RetryExecutor::new(RetryPolicy::from_settings(settings)),
            failure: FailurePolicy::from_settings(settings),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = RetryExecutor::new(policy);
        self
    }

    pub fn with_failure_policy(mut self, failure: FailurePolicy) -> Self {
        self.failure = failure;
        self
    }

    pub fn mode(&self) -> TopologyMode {
        self.provider.mode()
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        self.retry.policy()
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure
    }

    pub(crate) fn provider(&self) -> &P {
        &self.provider
    }

    /// Releases pooled connections. The next call rebuilds the pool.
    pub fn close(&self) {
        self.provider.close();
        info!(mode = self.provider.mode().as_str(), "client closed");
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    pub(crate) fn encode<V: Serialize + ?Sized>(&self, value: &V) -> ClientResult<String> {
        Ok(self.codec.encode(value)?)
    }

    pub(crate) fn encode_all<V: Serialize>(&self, values: &[V]) -> ClientResult<Vec<String>> {
        values.iter().map(|value| self.encode(value)).collect()
    }

    pub(crate) fn encode_hash_write<'a, V: Serialize>(
        &self,
        write: HashWrite<'a, V>,
    ) -> ClientResult<Vec<(&'a str, String)>> {
        match write {
            HashWrite::Field(field, value) => Ok(vec![(field, self.encode(value)?)]),
            HashWrite::Mapping(mapping) if mapping.is_empty() => {
                Err(ClientError::invalid("hset mapping must not be empty"))
            }
            HashWrite::Mapping(mapping) => mapping
                .iter()
                .map(|(field, value)| self.encode(value).map(|encoded| (*field, encoded)))
                .collect(),
        }
    }

    pub(crate) fn encode_scored<V: Serialize>(
        &self,
        members: &[(V, f64)],
    ) -> ClientResult<Vec<(String, f64)>> {
        if members.is_empty() {
            return Err(ClientError::invalid("zadd needs at least one member"));
        }
        members
            .iter()
            .map(|(member, score)| self.encode(member).map(|encoded| (encoded, *score)))
            .collect()
    }

    fn decode(&self, raw: Option<Vec<u8>>) -> Value {
        self.codec.decode(raw.as_deref())
    }

    fn decode_all(&self, raw: Vec<Vec<u8>>) -> Vec<Value> {
        raw.iter().map(|item| self.codec.decode(Some(item.as_slice()))).collect()
    }

    async fn query<T: FromRedisValue>(
        &self,
        op: &'static str,
        key: &str,
        command: Cmd,
    ) -> ClientResult<T> {
        let deadline = self.retry.policy().attempt_timeout;
        self.query_within(op, key, deadline, command).await
    }

    /// Runs `command` through the retry executor, one connection per attempt.
    async fn query_within<T: FromRedisValue>(
        &self,
        op: &'static str,
        key: &str,
        deadline: Option<Duration>,
        command: Cmd,
    ) -> ClientResult<T> {
        let provider = &self.provider;
        let command = &command;
        let result = self
            .retry
            .execute_within(op, key, deadline, || async move {
                let mut conn = provider.connection().await?;
                let reply: T = command.query_async(&mut conn).await?;
                Ok(reply)
            })
            .await;

        if let Err(err) = &result {
            error!(op, key, error = %err, "redis operation failed");
        }
        result
    }

    /// Runs the local checks of one call (validation, encoding) and logs a
    /// failure with the same fields as a remote one.
    fn prepare<T>(
        &self,
        op: &'static str,
        key: &str,
        build: impl FnOnce() -> ClientResult<T>,
    ) -> ClientResult<T> {
        let result = build();
        if let Err(err) = &result {
            error!(op, key, error = %err, "rejected before sending");
        }
        result
    }

    fn or_default<T>(
        &self,
        op: &'static str,
        key: &str,
        result: ClientResult<T>,
        default: impl FnOnce() -> T,
    ) -> ClientResult<T> {
        match result {
            Err(err) if self.failure.covers(&err) => {
                warn!(op, key, error = %err, "returning safe default");
                Ok(default())
            }
            other => other,
        }
    }

    /// Blocking commands get the server timeout plus the socket timeout as
    /// their per-attempt deadline; timeout 0 waits forever.
    fn blocking_deadline(&self, timeout: u64) -> Option<Duration> {
        if timeout == 0 {
            return None;
        }
        self.retry
            .policy()
            .attempt_timeout
            .map(|slack| Duration::from_secs(timeout).saturating_add(slack))
    }

    // ---------------------------------------------------------------------
    // Strings
    // ---------------------------------------------------------------------

    /// Stores `value` under `key`. Returns false when an NX/XX condition
    /// prevented the write.
    ///
    /// # Errors
    /// Invalid options, serialization failures and read-only replicas always
    /// propagate.
    pub async fn set<V: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &V,
        options: SetOptions,
    ) -> ClientResult<bool> {
        let encoded = self.prepare("set", key, || {
            options.validate()?;
            self.encode(value)
        })?;
        let result = self
            .query::<redis::Value>("set", key, commands::set(key, &encoded, &options))
            .await
            .map(|reply| !matches!(reply, redis::Value::Nil));
        self.or_default("set", key, result, || false)
    }

    /// Returns the decoded value, or `null` when the key is missing.
    pub async fn get(&self, key: &str) -> ClientResult<Value> {
        let result = self
            .query::<Option<Vec<u8>>>("get", key, commands::get(key))
            .await
            .map(|raw| self.decode(raw));
        self.or_default("get", key, result, || Value::Null)
    }

    /// Removes keys and returns how many existed.
    pub async fn delete(&self, keys: &[&str]) -> ClientResult<i64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let joined = keys.join(",");
        let result = self.query("delete", &joined, commands::del(keys)).await;
        self.or_default("delete", &joined, result, || 0)
    }

    /// Counts how many of `keys` exist.
    pub async fn exists(&self, keys: &[&str]) -> ClientResult<i64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let joined = keys.join(",");
        let result = self.query("exists", &joined, commands::exists(keys)).await;
        self.or_default("exists", &joined, result, || 0)
    }

    /// Increments by one. An absent key counts as 0.
    pub async fn incr(&self, key: &str) -> ClientResult<i64> {
        self.query("incr", key, commands::incr(key)).await
    }

    pub async fn decr(&self, key: &str) -> ClientResult<i64> {
        self.query("decr", key, commands::decr(key)).await
    }

    pub async fn incrby(&self, key: &str, amount: i64) -> ClientResult<i64> {
        self.query("incrby", key, commands::incrby(key, amount)).await
    }

    pub async fn decrby(&self, key: &str, amount: i64) -> ClientResult<i64> {
        self.query("decrby", key, commands::decrby(key, amount)).await
    }

    pub async fn strlen(&self, key: &str) -> ClientResult<i64> {
        let result = self.query("strlen", key, commands::strlen(key)).await;
        self.or_default("strlen", key, result, || 0)
    }

    /// Substring of the stored text, inclusive on both ends.
    pub async fn getrange(&self, key: &str, start: i64, end: i64) -> ClientResult<String> {
        let result = self
            .query::<Vec<u8>>("getrange", key, commands::getrange(key, start, end))
            .await
            .map(|raw| String::from_utf8_lossy(&raw).into_owned());
        self.or_default("getrange", key, result, String::new)
    }

    /// Overwrites part of the stored text and returns the new length.
    pub async fn setrange<V: Serialize + ?Sized>(
        &self,
        key: &str,
        offset: u64,
        value: &V,
    ) -> ClientResult<i64> {
        let encoded = self.prepare("setrange", key, || self.encode(value))?;
        self.query("setrange", key, commands::setrange(key, offset, &encoded))
            .await
    }

    /// Sets a TTL. Returns false when the key is missing or the condition
    /// did not hold.
    pub async fn expire(
        &self,
        key: &str,
        expiry: Expiry,
        condition: Option<ExpireCondition>,
    ) -> ClientResult<bool> {
        self.prepare("expire", key, || expiry.validate())?;
        let result = self
            .query::<i64>("expire", key, commands::expire(key, expiry, condition))
            .await
            .map(|applied| applied == 1);
        self.or_default("expire", key, result, || false)
    }

    /// Remaining TTL in seconds: -1 without expiry, -2 when missing.
    pub async fn ttl(&self, key: &str) -> ClientResult<i64> {
        let result = self.query("ttl", key, commands::ttl(key)).await;
        self.or_default("ttl", key, result, || -2)
    }

    // ---------------------------------------------------------------------
    // Hashes
    // ---------------------------------------------------------------------

    /// Writes one field or a mapping. Returns the number of new fields.
    pub async fn hset<V: Serialize>(&self, name: &str, write: HashWrite<'_, V>) -> ClientResult<i64> {
        let pairs = self.prepare("hset", name, || self.encode_hash_write(write))?;
        let result = self.query("hset", name, commands::hset(name, &pairs)).await;
        self.or_default("hset", name, result, || 0)
    }

    pub async fn hget(&self, name: &str, field: &str) -> ClientResult<Value> {
        let result = self
            .query::<Option<Vec<u8>>>("hget", name, commands::hget(name, field))
            .await
            .map(|raw| self.decode(raw));
        self.or_default("hget", name, result, || Value::Null)
    }

    pub async fn hgetall(&self, name: &str) -> ClientResult<HashMap<String, Value>> {
        let result = self
            .query::<HashMap<String, Vec<u8>>>("hgetall", name, commands::hgetall(name))
            .await
            .map(|raw| {
                raw.into_iter()
                    .map(|(field, value)| (field, self.codec.decode(Some(value.as_slice()))))
                    .collect()
            });
        self.or_default("hgetall", name, result, HashMap::new)
    }

    pub async fn hdel(&self, name: &str, fields: &[&str]) -> ClientResult<i64> {
        if fields.is_empty() {
            return Ok(0);
        }
        let result = self.query("hdel", name, commands::hdel(name, fields)).await;
        self.or_default("hdel", name, result, || 0)
    }

    pub async fn hexists(&self, name: &str, field: &str) -> ClientResult<bool> {
        let result = self
            .query("hexists", name, commands::hexists(name, field))
            .await;
        self.or_default("hexists", name, result, || false)
    }

    pub async fn hlen(&self, name: &str) -> ClientResult<i64> {
        let result = self.query("hlen", name, commands::hlen(name)).await;
        self.or_default("hlen", name, result, || 0)
    }

    pub async fn hkeys(&self, name: &str) -> ClientResult<Vec<String>> {
        let result = self.query("hkeys", name, commands::hkeys(name)).await;
        self.or_default("hkeys", name, result, Vec::new)
    }

    pub async fn hvals(&self, name: &str) -> ClientResult<Vec<Value>> {
        let result = self
            .query::<Vec<Vec<u8>>>("hvals", name, commands::hvals(name))
            .await
            .map(|raw| self.decode_all(raw));
        self.or_default("hvals", name, result, Vec::new)
    }

    /// Increments a numeric field. Never defaulted.
    pub async fn hincrby(&self, name: &str, field: &str, amount: i64) -> ClientResult<i64> {
        self.query("hincrby", name, commands::hincrby(name, field, amount))
            .await
    }

    /// Fetches several fields; missing fields map to `null`.
    pub async fn hmget(&self, name: &str, fields: &[&str]) -> ClientResult<HashMap<String, Value>> {
        if fields.is_empty() {
            return Ok(HashMap::new());
        }
        let result = self
            .query::<Vec<Option<Vec<u8>>>>("hmget", name, commands::hmget(name, fields))
            .await
            .map(|raw| {
                fields
                    .iter()
                    .zip(raw)
                    .map(|(field, value)| (field.to_string(), self.decode(value)))
                    .collect()
            });
        self.or_default("hmget", name, result, HashMap::new)
    }

    /// Sets a field only when it is absent.
    pub async fn hsetnx<V: Serialize + ?Sized>(
        &self,
        name: &str,
        field: &str,
        value: &V,
    ) -> ClientResult<bool> {
        let encoded = self.prepare("hsetnx", name, || self.encode(value))?;
        let result = self
            .query("hsetnx", name, commands::hsetnx(name, field, &encoded))
            .await;
        self.or_default("hsetnx", name, result, || false)
    }

    /// One page of fields; feed the returned cursor back until it is 0.
    pub async fn hscan(
        &self,
        name: &str,
        cursor: u64,
        pattern: Option<&str>,
        count: Option<usize>,
    ) -> ClientResult<HashScan> {
        let result = self
            .query::<(u64, Vec<(String, Vec<u8>)>)>(
                "hscan",
                name,
                commands::hscan(name, cursor, pattern, count),
            )
            .await
            .map(|(cursor, raw)| HashScan {
                cursor,
                entries: raw
                    .into_iter()
                    .map(|(field, value)| (field, self.codec.decode(Some(value.as_slice()))))
                    .collect(),
            });
        self.or_default("hscan", name, result, HashScan::default)
    }

    // ---------------------------------------------------------------------
    // Lists
    // ---------------------------------------------------------------------

    /// Prepends values (the last value ends up first). Returns the length.
    pub async fn lpush<V: Serialize>(&self, name: &str, values: &[V]) -> ClientResult<i64> {
        let encoded = self.prepare("lpush", name, || {
            if values.is_empty() {
                return Err(ClientError::invalid("lpush needs at least one value"));
            }
            self.encode_all(values)
        })?;
        let result = self.query("lpush", name, commands::lpush(name, &encoded)).await;
        self.or_default("lpush", name, result, || 0)
    }

    /// Appends values. Returns the length.
    pub async fn rpush<V: Serialize>(&self, name: &str, values: &[V]) -> ClientResult<i64> {
        let encoded = self.prepare("rpush", name, || {
            if values.is_empty() {
                return Err(ClientError::invalid("rpush needs at least one value"));
            }
            self.encode_all(values)
        })?;
        let result = self.query("rpush", name, commands::rpush(name, &encoded)).await;
        self.or_default("rpush", name, result, || 0)
    }

    pub async fn lpop(&self, name: &str) -> ClientResult<Value> {
        let result = self
            .query::<Option<Vec<u8>>>("lpop", name, commands::lpop(name, None))
            .await
            .map(|raw| self.decode(raw));
        self.or_default("lpop", name, result, || Value::Null)
    }

    pub async fn rpop(&self, name: &str) -> ClientResult<Value> {
        let result = self
            .query::<Option<Vec<u8>>>("rpop", name, commands::rpop(name, None))
            .await
            .map(|raw| self.decode(raw));
        self.or_default("rpop", name, result, || Value::Null)
    }

    /// Pops up to `count` values from the head.
    pub async fn lpop_count(&self, name: &str, count: usize) -> ClientResult<Vec<Value>> {
        let result = self
            .query::<Option<Vec<Vec<u8>>>>("lpop", name, commands::lpop(name, Some(count)))
            .await
            .map(|raw| self.decode_all(raw.unwrap_or_default()));
        self.or_default("lpop", name, result, Vec::new)
    }

    /// Pops up to `count` values from the tail.
    pub async fn rpop_count(&self, name: &str, count: usize) -> ClientResult<Vec<Value>> {
        let result = self
            .query::<Option<Vec<Vec<u8>>>>("rpop", name, commands::rpop(name, Some(count)))
            .await
            .map(|raw| self.decode_all(raw.unwrap_or_default()));
        self.or_default("rpop", name, result, Vec::new)
    }

    pub async fn llen(&self, name: &str) -> ClientResult<i64> {
        let result = self.query("llen", name, commands::llen(name)).await;
        self.or_default("llen", name, result, || 0)
    }

    pub async fn lindex(&self, name: &str, index: i64) -> ClientResult<Value> {
        let result = self
            .query::<Option<Vec<u8>>>("lindex", name, commands::lindex(name, index))
            .await
            .map(|raw| self.decode(raw));
        self.or_default("lindex", name, result, || Value::Null)
    }

    pub async fn lset<V: Serialize + ?Sized>(
        &self,
        name: &str,
        index: i64,
        value: &V,
    ) -> ClientResult<bool> {
        let encoded = self.prepare("lset", name, || self.encode(value))?;
        let result = self
            .query::<()>("lset", name, commands::lset(name, index, &encoded))
            .await
            .map(|()| true);
        self.or_default("lset", name, result, || false)
    }

    /// Values between `start` and `end`, inclusive; negative indexes count
    /// from the tail.
    pub async fn lrange(&self, name: &str, start: i64, end: i64) -> ClientResult<Vec<Value>> {
        let result = self
            .query::<Vec<Vec<u8>>>("lrange", name, commands::lrange(name, start, end))
            .await
            .map(|raw| self.decode_all(raw));
        self.or_default("lrange", name, result, Vec::new)
    }

    /// Inserts next to `pivot`. Returns the new length, or -1 when the pivot
    /// is not found.
    pub async fn linsert<T, V>(
        &self,
        name: &str,
        position: InsertPosition,
        pivot: &T,
        value: &V,
    ) -> ClientResult<i64>
    where
        T: Serialize + ?Sized,
        V: Serialize + ?Sized,
    {
        let (pivot, value) =
            self.prepare("linsert", name, || Ok((self.encode(pivot)?, self.encode(value)?)))?;
        let result = self
            .query("linsert", name, commands::linsert(name, position, &pivot, &value))
            .await;
        self.or_default("linsert", name, result, || -1)
    }

    /// Removes occurrences of `value`: `count > 0` from the head, `< 0` from
    /// the tail, `0` all of them.
    pub async fn lrem<V: Serialize + ?Sized>(
        &self,
        name: &str,
        count: i64,
        value: &V,
    ) -> ClientResult<i64> {
        let encoded = self.prepare("lrem", name, || self.encode(value))?;
        let result = self
            .query("lrem", name, commands::lrem(name, count, &encoded))
            .await;
        self.or_default("lrem", name, result, || 0)
    }

    pub async fn ltrim(&self, name: &str, start: i64, end: i64) -> ClientResult<bool> {
        let result = self
            .query::<()>("ltrim", name, commands::ltrim(name, start, end))
            .await
            .map(|()| true);
        self.or_default("ltrim", name, result, || false)
    }

    /// Blocks until one of `keys` has a value. Returns `(key, value)` or
    /// `None` after `timeout` seconds; 0 waits indefinitely.
    pub async fn blpop(&self, keys: &[&str], timeout: u64) -> ClientResult<Option<(String, Value)>> {
        self.blocking_pop("blpop", commands::blpop(keys, timeout), keys, timeout)
            .await
    }

    pub async fn brpop(&self, keys: &[&str], timeout: u64) -> ClientResult<Option<(String, Value)>> {
        self.blocking_pop("brpop", commands::brpop(keys, timeout), keys, timeout)
            .await
    }

    async fn blocking_pop(
        &self,
        op: &'static str,
        command: Cmd,
        keys: &[&str],
        timeout: u64,
    ) -> ClientResult<Option<(String, Value)>> {
        let joined = keys.join(",");
        self.prepare(op, &joined, || {
            if keys.is_empty() {
                return Err(ClientError::invalid(format!("{op} needs at least one key")));
            }
            Ok(())
        })?;
        let deadline = self.blocking_deadline(timeout);
        let result = self
            .query_within::<Option<(String, Vec<u8>)>>(op, &joined, deadline, command)
            .await
            .map(|popped| popped.map(|(key, raw)| (key, self.codec.decode(Some(raw.as_slice())))));
        self.or_default(op, &joined, result, || None)
    }

    /// Moves the tail of `source` to the head of `destination`, blocking up
    /// to `timeout` seconds.
    pub async fn brpoplpush(
        &self,
        source: &str,
        destination: &str,
        timeout: u64,
    ) -> ClientResult<Option<Value>> {
        let deadline = self.blocking_deadline(timeout);
        let result = self
            .query_within::<Option<Vec<u8>>>(
                "brpoplpush",
                source,
                deadline,
                commands::brpoplpush(source, destination, timeout),
            )
            .await
            .map(|moved| moved.map(|raw| self.codec.decode(Some(raw.as_slice()))));
        self.or_default("brpoplpush", source, result, || None)
    }

    // ---------------------------------------------------------------------
    // Sets
    // ---------------------------------------------------------------------

    pub async fn sadd<V: Serialize>(&self, name: &str, members: &[V]) -> ClientResult<i64> {
        let encoded = self.prepare("sadd", name, || {
            if members.is_empty() {
                return Err(ClientError::invalid("sadd needs at least one member"));
            }
            self.encode_all(members)
        })?;
        let result = self.query("sadd", name, commands::sadd(name, &encoded)).await;
        self.or_default("sadd", name, result, || 0)
    }

    pub async fn srem<V: Serialize>(&self, name: &str, members: &[V]) -> ClientResult<i64> {
        if members.is_empty() {
            return Ok(0);
        }
        let encoded = self.prepare("srem", name, || self.encode_all(members))?;
        let result = self.query("srem", name, commands::srem(name, &encoded)).await;
        self.or_default("srem", name, result, || 0)
    }

    /// All members, in no particular order.
    pub async fn smembers(&self, name: &str) -> ClientResult<Vec<Value>> {
        let result = self
            .query::<Vec<Vec<u8>>>("smembers", name, commands::smembers(name))
            .await
            .map(|raw| self.decode_all(raw));
        self.or_default("smembers", name, result, Vec::new)
    }

    pub async fn sismember<V: Serialize + ?Sized>(&self, name: &str, member: &V) -> ClientResult<bool> {
        let encoded = self.prepare("sismember", name, || self.encode(member))?;
        let result = self
            .query("sismember", name, commands::sismember(name, &encoded))
            .await;
        self.or_default("sismember", name, result, || false)
    }

    // ---------------------------------------------------------------------
    // Sorted sets
    // ---------------------------------------------------------------------

    /// Adds `(member, score)` pairs. Returns the added count, or the changed
    /// count with `ZAddOptions::changed`.
    pub async fn zadd<V: Serialize>(
        &self,
        name: &str,
        members: &[(V, f64)],
        options: ZAddOptions,
    ) -> ClientResult<i64> {
        let encoded = self.prepare("zadd", name, || self.encode_scored(members))?;
        let result = self
            .query("zadd", name, commands::zadd(name, &encoded, &options, false))
            .await;
        self.or_default("zadd", name, result, || 0)
    }

    /// Adds `delta` to a member's score. `None` when an NX/XX condition
    /// blocked the update.
    pub async fn zadd_incr<V: Serialize + ?Sized>(
        &self,
        name: &str,
        member: &V,
        delta: f64,
        options: ZAddOptions,
    ) -> ClientResult<Option<f64>> {
        let encoded = self.prepare("zadd", name, || Ok(vec![(self.encode(member)?, delta)]))?;
        let result = self
            .query("zadd", name, commands::zadd(name, &encoded, &options, true))
            .await;
        self.or_default("zadd", name, result, || None)
    }

    /// Members by rank, ascending unless `options.desc`.
    pub async fn zrange(
        &self,
        name: &str,
        start: i64,
        end: i64,
        options: ZRangeOptions,
    ) -> ClientResult<Vec<RangeEntry>> {
        let command = commands::zrange(name, start, end, options.desc, options.with_scores);
        let result = if options.with_scores {
            self.query::<Vec<(Vec<u8>, f64)>>("zrange", name, command)
                .await
                .map(|raw| {
                    raw.into_iter()
                        .map(|(member, score)| RangeEntry::Scored(self.codec.decode(Some(member.as_slice())), score))
                        .collect()
                })
        } else {
            self.query::<Vec<Vec<u8>>>("zrange", name, command)
                .await
                .map(|raw| self.decode_all(raw).into_iter().map(RangeEntry::Member).collect())
        };
        self.or_default("zrange", name, result, Vec::new)
    }

    pub async fn zrem<V: Serialize>(&self, name: &str, members: &[V]) -> ClientResult<i64> {
        if members.is_empty() {
            return Ok(0);
        }
        let encoded = self.prepare("zrem", name, || self.encode_all(members))?;
        let result = self.query("zrem", name, commands::zrem(name, &encoded)).await;
        self.or_default("zrem", name, result, || 0)
    }

    // ---------------------------------------------------------------------
    // Connection
    // ---------------------------------------------------------------------

    /// Returns true when the store answers `PONG`.
    pub async fn ping(&self) -> ClientResult<bool> {
        let result = self
            .query::<String>("ping", "-", commands::ping())
            .await
            .map(|reply| reply.eq_ignore_ascii_case("PONG"));
        self.or_default("ping", "-", result, || false)
    }
}

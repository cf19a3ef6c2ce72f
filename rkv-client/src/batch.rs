//! # Batch Coordinator
//!
//! Purpose: Queue several commands and send them in one round trip, either
//! as a MULTI/EXEC transaction or as a plain pipeline.
//!
//! ## Design Principles
//! 1. **Builder Pattern**: Commands are queued on a handle borrowed from the
//!    client; nothing is sent until `execute`.
//! 2. **Single Checkout**: One pooled connection serves the whole batch.
//! 3. **No Retry**: A batch may have partly applied, so failures surface as
//!    `ClientError::Batch` and are never defaulted.
//! 4. **Ordered Results**: One decoded value per queued command, in
//!    submission order.
//! 5. **Facade Parity**: Empty `delete`/`srem`/`zrem` inputs answer 0 locally,
//!    as the single-command calls do, and send nothing.
//!
//! ## Cluster Note
//!
//! A transaction on a cluster only works when every key hashes to the same
//! slot. The client logs a warning when one is started and lets the server
//! reject cross-slot batches.

use redis::{Cmd, Pipeline};
use rkv_common::Value;
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::client::{Expiry, ExpireCondition, HashWrite, KVClient, SetOptions, ZAddOptions};
use crate::commands;
use crate::error::{BatchKind, ClientError, ClientResult};
use crate::reply::decode_reply;
use crate::topology::{ConnectionProvider, TopologyMode};

impl<P: ConnectionProvider> KVClient<P> {
    /// Starts a MULTI/EXEC transaction.
    pub fn begin(&self) -> Batch<'_, P> {
        if self.mode() == TopologyMode::Cluster {
            warn!("transaction started in cluster mode, all keys must share one hash slot");
        }
        Batch::new(self, BatchKind::Transaction)
    }

    /// Starts a non-atomic pipeline.
    pub fn pipeline(&self) -> Batch<'_, P> {
        Batch::new(self, BatchKind::Pipeline)
    }
}

/// Queued commands awaiting `execute`.
pub struct Batch<'a, P: ConnectionProvider> {
    client: &'a KVClient<P>,
    kind: BatchKind,
    pipe: Pipeline,
    /// One entry per queued command: `None` awaits a server reply, `Some`
    /// is already answered locally.
    slots: Vec<Option<Value>>,
}

impl<'a, P: ConnectionProvider> Batch<'a, P> {
    fn new(client: &'a KVClient<P>, kind: BatchKind) -> Self {
        let mut pipe = redis::pipe();
        if kind == BatchKind::Transaction {
            pipe.atomic();
        }
        Batch {
            client,
            kind,
            pipe,
            slots: Vec::new(),
        }
    }

    pub fn kind(&self) -> BatchKind {
        self.kind
    }

    /// Number of queued commands.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Queues an arbitrary command. Its reply is decoded like any other.
    pub fn command(&mut self, command: Cmd) -> &mut Self {
        self.pipe.add_command(command);
        self.slots.push(None);
        self
    }

    fn answered(&mut self, value: Value) -> &mut Self {
        self.slots.push(Some(value));
        self
    }

    fn sent(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_none()).count()
    }

    pub fn set<V: Serialize + ?Sized>(
        &mut self,
        key: &str,
        value: &V,
        options: SetOptions,
    ) -> ClientResult<&mut Self> {
        options.validate()?;
        let encoded = self.client.encode(value)?;
        Ok(self.command(commands::set(key, &encoded, &options)))
    }

    pub fn get(&mut self, key: &str) -> &mut Self {
        self.command(commands::get(key))
    }

    pub fn delete(&mut self, keys: &[&str]) -> &mut Self {
        if keys.is_empty() {
            return self.answered(Value::from(0));
        }
        self.command(commands::del(keys))
    }

    pub fn incr(&mut self, key: &str) -> &mut Self {
        self.command(commands::incr(key))
    }

    pub fn incrby(&mut self, key: &str, amount: i64) -> &mut Self {
        self.command(commands::incrby(key, amount))
    }

    pub fn expire(
        &mut self,
        key: &str,
        expiry: Expiry,
        condition: Option<ExpireCondition>,
    ) -> ClientResult<&mut Self> {
        expiry.validate()?;
        Ok(self.command(commands::expire(key, expiry, condition)))
    }

    pub fn hset<V: Serialize>(&mut self, name: &str, write: HashWrite<'_, V>) -> ClientResult<&mut Self> {
        let pairs = self.client.encode_hash_write(write)?;
        Ok(self.command(commands::hset(name, &pairs)))
    }

    pub fn hget(&mut self, name: &str, field: &str) -> &mut Self {
        self.command(commands::hget(name, field))
    }

    pub fn lpush<V: Serialize>(&mut self, name: &str, values: &[V]) -> ClientResult<&mut Self> {
        let encoded = self.non_empty("lpush", values)?;
        Ok(self.command(commands::lpush(name, &encoded)))
    }

    pub fn rpush<V: Serialize>(&mut self, name: &str, values: &[V]) -> ClientResult<&mut Self> {
        let encoded = self.non_empty("rpush", values)?;
        Ok(self.command(commands::rpush(name, &encoded)))
    }

    pub fn lrange(&mut self, name: &str, start: i64, end: i64) -> &mut Self {
        self.command(commands::lrange(name, start, end))
    }

    pub fn sadd<V: Serialize>(&mut self, name: &str, members: &[V]) -> ClientResult<&mut Self> {
        let encoded = self.non_empty("sadd", members)?;
        Ok(self.command(commands::sadd(name, &encoded)))
    }

    pub fn srem<V: Serialize>(&mut self, name: &str, members: &[V]) -> ClientResult<&mut Self> {
        if members.is_empty() {
            return Ok(self.answered(Value::from(0)));
        }
        let encoded = self.client.encode_all(members)?;
        Ok(self.command(commands::srem(name, &encoded)))
    }

    pub fn zadd<V: Serialize>(
        &mut self,
        name: &str,
        members: &[(V, f64)],
        options: ZAddOptions,
    ) -> ClientResult<&mut Self> {
        let encoded = self.client.encode_scored(members)?;
        Ok(self.command(commands::zadd(name, &encoded, &options, false)))
    }

    pub fn zrem<V: Serialize>(&mut self, name: &str, members: &[V]) -> ClientResult<&mut Self> {
        if members.is_empty() {
            return Ok(self.answered(Value::from(0)));
        }
        let encoded = self.client.encode_all(members)?;
        Ok(self.command(commands::zrem(name, &encoded)))
    }

    fn non_empty<V: Serialize>(&self, op: &str, values: &[V]) -> ClientResult<Vec<String>> {
        if values.is_empty() {
            return Err(ClientError::invalid(format!("{op} needs at least one value")));
        }
        self.client.encode_all(values)
    }

    /// Sends every queued command in one round trip.
    ///
    /// **Output**: one decoded value per queued command, in order.
    ///
    /// **Logic**:
    /// 0. Skip the round trip when every entry was answered locally.
    /// 1. Check out one connection, bounded by the socket timeout.
    /// 2. Send the pipeline (wrapped in MULTI/EXEC for transactions).
    /// 3. Treat a missing EXEC result as an aborted transaction.
    /// 4. Decode each reply; an embedded server error fails the batch.
    ///
    /// # Errors
    /// Any failure is returned as `ClientError::Batch`; nothing is retried.
    pub async fn execute(self) -> ClientResult<Vec<Value>> {
        let sent = self.sent();
        if sent == 0 {
            return Ok(self.slots.into_iter().flatten().collect());
        }

        let client = self.client;
        let pipe = &self.pipe;
        let run = async move {
            let mut conn = client.provider().connection().await?;
            let replies: Vec<redis::Value> = pipe.query_async(&mut conn).await?;
            Ok::<_, ClientError>(replies)
        };
        let outcome = match client.retry_policy().attempt_timeout {
            Some(limit) => tokio::time::timeout(limit, run)
                .await
                .unwrap_or(Err(ClientError::Timeout(limit))),
            None => run.await,
        };

        let replies = outcome.map_err(|err| self.fail(err.to_string()))?;
        if replies.len() != sent {
            let message = match self.kind {
                BatchKind::Transaction => "transaction aborted by the server".to_string(),
                BatchKind::Pipeline => format!("expected {sent} replies, got {}", replies.len()),
            };
            return Err(self.fail(message));
        }

        let mut decoded = replies
            .into_iter()
            .map(|reply| decode_reply(client.codec(), reply))
            .collect::<ClientResult<Vec<_>>>()
            .map_err(|err| self.fail(err.to_string()))?
            .into_iter();
        let values: Vec<Value> = self
            .slots
            .iter()
            .map(|slot| match slot {
                Some(local) => local.clone(),
                None => decoded.next().unwrap_or(Value::Null),
            })
            .collect();
        debug!(kind = %self.kind, commands = sent, "batch executed");
        Ok(values)
    }

    fn fail(&self, message: String) -> ClientError {
        error!(kind = %self.kind, commands = self.sent(), error = %message, "batch execution failed");
        ClientError::Batch {
            kind: self.kind,
            message,
        }
    }
}

//! # Failure Policy
//!
//! Purpose: Decide what a read-style call returns once its retries are spent.
//!
//! The client favours availability: under `FailurePolicy::SafeDefault` the
//! calls below log the failure and hand back a neutral value instead of an
//! error. Under `FailurePolicy::Propagate` every error reaches the caller.
//!
//! ## Default Table
//!
//! ```text
//! operation                         default on failure
//! --------------------------------  ------------------
//! set / hsetnx / lset / ltrim       false
//! expire / hexists / sismember      false
//! get / hget / lindex / lpop / rpop null
//! brpoplpush / blpop / brpop        None
//! delete / exists / strlen / hlen   0
//! hset / hdel / lpush / rpush       0
//! llen / lrem / sadd / srem         0
//! zadd / zrem                       0
//! zadd_incr                         None
//! ttl                               -2
//! linsert                           -1
//! getrange                          ""
//! hgetall / hmget                   {}
//! hkeys / hvals / lrange            []
//! lpop_count / rpop_count           []
//! smembers / zrange                 []
//! hscan                             cursor 0, no entries
//! ping                              false
//! ```
//!
//! Never defaulted, whatever the policy: serialization failures, invalid
//! arguments, read-only replica rejections, `incr`, `decr`, `incrby`,
//! `decrby`, `hincrby`, `setrange`, and transaction/pipeline execution.

use rkv_common::RedisSettings;

use crate::error::ClientError;

/// What read-style calls do with an exhausted failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Log and return the operation's safe default.
    SafeDefault,
    /// Return the error.
    Propagate,
}

impl FailurePolicy {
    pub fn from_settings(settings: &RedisSettings) -> Self {
        if settings.default_on_failure {
            FailurePolicy::SafeDefault
        } else {
            FailurePolicy::Propagate
        }
    }

    /// Returns true when `err` should be replaced by the default.
    pub fn covers(&self, err: &ClientError) -> bool {
        *self == FailurePolicy::SafeDefault && err.is_defaultable()
    }
}

impl Default for FailurePolicy {
    fn default() -> Self {
        FailurePolicy::SafeDefault
    }
}

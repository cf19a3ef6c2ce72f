//! Command builders shared by the facade and batches.
//!
//! Every builder takes already-encoded arguments and returns a `redis::Cmd`;
//! nothing here touches the network.

use std::time::Duration;

use redis::{cmd, Cmd};

use crate::client::{
    ExpireCondition, Expiry, InsertPosition, SetOptions, ZAddCondition, ZAddOptions,
};

fn keyed(name: &str, key: &str) -> Cmd {
    let mut command = cmd(name);
    command.arg(key);
    command
}

/// Whole milliseconds, saturating at `u64::MAX`.
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn push_expiry(command: &mut Cmd, expiry: Expiry) {
    match expiry {
        Expiry::Seconds(secs) => command.arg("EX").arg(secs),
        Expiry::After(duration) => command.arg("PX").arg(millis(duration)),
    };
}

// String family

pub(crate) fn set(key: &str, value: &str, options: &SetOptions) -> Cmd {
    let mut command = keyed("SET", key);
    command.arg(value);
    if let Some(expiry) = options.expire {
        push_expiry(&mut command, expiry);
    }
    if options.nx {
        command.arg("NX");
    }
    if options.xx {
        command.arg("XX");
    }
    if options.keep_ttl {
        command.arg("KEEPTTL");
    }
    command
}

pub(crate) fn get(key: &str) -> Cmd {
    keyed("GET", key)
}

pub(crate) fn del(keys: &[&str]) -> Cmd {
    let mut command = cmd("DEL");
    command.arg(keys);
    command
}

pub(crate) fn exists(keys: &[&str]) -> Cmd {
    let mut command = cmd("EXISTS");
    command.arg(keys);
    command
}

pub(crate) fn incr(key: &str) -> Cmd {
    keyed("INCR", key)
}

pub(crate) fn decr(key: &str) -> Cmd {
    keyed("DECR", key)
}

pub(crate) fn incrby(key: &str, amount: i64) -> Cmd {
    let mut command = keyed("INCRBY", key);
    command.arg(amount);
    command
}

pub(crate) fn decrby(key: &str, amount: i64) -> Cmd {
    let mut command = keyed("DECRBY", key);
    command.arg(amount);
    command
}

pub(crate) fn strlen(key: &str) -> Cmd {
    keyed("STRLEN", key)
}

pub(crate) fn getrange(key: &str, start: i64, end: i64) -> Cmd {
    let mut command = keyed("GETRANGE", key);
    command.arg(start).arg(end);
    command
}

pub(crate) fn setrange(key: &str, offset: u64, value: &str) -> Cmd {
    let mut command = keyed("SETRANGE", key);
    command.arg(offset).arg(value);
    command
}

/// `EXPIRE` for whole seconds, `PEXPIRE` for sub-second precision.
pub(crate) fn expire(key: &str, expiry: Expiry, condition: Option<ExpireCondition>) -> Cmd {
    let mut command = match expiry {
        Expiry::Seconds(secs) => {
            let mut command = keyed("EXPIRE", key);
            command.arg(secs);
            command
        }
        Expiry::After(duration) => {
            let mut command = keyed("PEXPIRE", key);
            command.arg(millis(duration));
            command
        }
    };
    if let Some(condition) = condition {
        command.arg(condition.as_arg());
    }
    command
}

pub(crate) fn ttl(key: &str) -> Cmd {
    keyed("TTL", key)
}

// Hash family

pub(crate) fn hset(name: &str, pairs: &[(&str, String)]) -> Cmd {
    let mut command = keyed("HSET", name);
    for (field, value) in pairs {
        command.arg(*field).arg(value.as_str());
    }
    command
}

pub(crate) fn hget(name: &str, field: &str) -> Cmd {
    let mut command = keyed("HGET", name);
    command.arg(field);
    command
}

pub(crate) fn hgetall(name: &str) -> Cmd {
    keyed("HGETALL", name)
}

pub(crate) fn hdel(name: &str, fields: &[&str]) -> Cmd {
    let mut command = keyed("HDEL", name);
    command.arg(fields);
    command
}

pub(crate) fn hexists(name: &str, field: &str) -> Cmd {
    let mut command = keyed("HEXISTS", name);
    command.arg(field);
    command
}

pub(crate) fn hlen(name: &str) -> Cmd {
    keyed("HLEN", name)
}

pub(crate) fn hkeys(name: &str) -> Cmd {
    keyed("HKEYS", name)
}

pub(crate) fn hvals(name: &str) -> Cmd {
    keyed("HVALS", name)
}

pub(crate) fn hincrby(name: &str, field: &str, amount: i64) -> Cmd {
    let mut command = keyed("HINCRBY", name);
    command.arg(field).arg(amount);
    command
}

pub(crate) fn hmget(name: &str, fields: &[&str]) -> Cmd {
    let mut command = keyed("HMGET", name);
    command.arg(fields);
    command
}

pub(crate) fn hsetnx(name: &str, field: &str, value: &str) -> Cmd {
    let mut command = keyed("HSETNX", name);
    command.arg(field).arg(value);
    command
}

pub(crate) fn hscan(name: &str, cursor: u64, pattern: Option<&str>, count: Option<usize>) -> Cmd {
    let mut command = keyed("HSCAN", name);
    command.arg(cursor);
    if let Some(pattern) = pattern {
        command.arg("MATCH").arg(pattern);
    }
    if let Some(count) = count {
        command.arg("COUNT").arg(count);
    }
    command
}

// List family

pub(crate) fn lpush(name: &str, values: &[String]) -> Cmd {
    let mut command = keyed("LPUSH", name);
    command.arg(values);
    command
}

pub(crate) fn rpush(name: &str, values: &[String]) -> Cmd {
    let mut command = keyed("RPUSH", name);
    command.arg(values);
    command
}

pub(crate) fn lpop(name: &str, count: Option<usize>) -> Cmd {
    let mut command = keyed("LPOP", name);
    if let Some(count) = count {
        command.arg(count);
    }
    command
}

pub(crate) fn rpop(name: &str, count: Option<usize>) -> Cmd {
    let mut command = keyed("RPOP", name);
    if let Some(count) = count {
        command.arg(count);
    }
    command
}

pub(crate) fn llen(name: &str) -> Cmd {
    keyed("LLEN", name)
}

pub(crate) fn lindex(name: &str, index: i64) -> Cmd {
    let mut command = keyed("LINDEX", name);
    command.arg(index);
    command
}

pub(crate) fn lset(name: &str, index: i64, value: &str) -> Cmd {
    let mut command = keyed("LSET", name);
    command.arg(index).arg(value);
    command
}

pub(crate) fn lrange(name: &str, start: i64, end: i64) -> Cmd {
    let mut command = keyed("LRANGE", name);
    command.arg(start).arg(end);
    command
}

pub(crate) fn linsert(name: &str, position: InsertPosition, pivot: &str, value: &str) -> Cmd {
    let mut command = keyed("LINSERT", name);
    command.arg(position.as_arg()).arg(pivot).arg(value);
    command
}

pub(crate) fn lrem(name: &str, count: i64, value: &str) -> Cmd {
    let mut command = keyed("LREM", name);
    command.arg(count).arg(value);
    command
}

pub(crate) fn ltrim(name: &str, start: i64, end: i64) -> Cmd {
    let mut command = keyed("LTRIM", name);
    command.arg(start).arg(end);
    command
}

pub(crate) fn blpop(keys: &[&str], timeout: u64) -> Cmd {
    let mut command = cmd("BLPOP");
    command.arg(keys).arg(timeout);
    command
}

pub(crate) fn brpop(keys: &[&str], timeout: u64) -> Cmd {
    let mut command = cmd("BRPOP");
    command.arg(keys).arg(timeout);
    command
}

pub(crate) fn brpoplpush(source: &str, destination: &str, timeout: u64) -> Cmd {
    let mut command = keyed("BRPOPLPUSH", source);
    command.arg(destination).arg(timeout);
    command
}

// Set family

pub(crate) fn sadd(name: &str, members: &[String]) -> Cmd {
    let mut command = keyed("SADD", name);
    command.arg(members);
    command
}

pub(crate) fn srem(name: &str, members: &[String]) -> Cmd {
    let mut command = keyed("SREM", name);
    command.arg(members);
    command
}

pub(crate) fn smembers(name: &str) -> Cmd {
    keyed("SMEMBERS", name)
}

pub(crate) fn sismember(name: &str, member: &str) -> Cmd {
    let mut command = keyed("SISMEMBER", name);
    command.arg(member);
    command
}

// Sorted-set family

/// `ZADD name [NX|XX] [CH] [INCR] score member ...`
pub(crate) fn zadd(name: &str, members: &[(String, f64)], options: &ZAddOptions, incr: bool) -> Cmd {
    let mut command = keyed("ZADD", name);
    match options.condition {
        Some(ZAddCondition::Nx) => {
            command.arg("NX");
        }
        Some(ZAddCondition::Xx) => {
            command.arg("XX");
        }
        None => {}
    }
    if options.changed {
        command.arg("CH");
    }
    if incr {
        command.arg("INCR");
    }
    for (member, score) in members {
        command.arg(score.to_string()).arg(member.as_str());
    }
    command
}

/// Descending ranges use `ZREVRANGE` so older servers work too.
pub(crate) fn zrange(name: &str, start: i64, end: i64, desc: bool, with_scores: bool) -> Cmd {
    let mut command = keyed(if desc { "ZREVRANGE" } else { "ZRANGE" }, name);
    command.arg(start).arg(end);
    if with_scores {
        command.arg("WITHSCORES");
    }
    command
}

pub(crate) fn zrem(name: &str, members: &[String]) -> Cmd {
    let mut command = keyed("ZREM", name);
    command.arg(members);
    command
}

pub(crate) fn ping() -> Cmd {
    cmd("PING")
}

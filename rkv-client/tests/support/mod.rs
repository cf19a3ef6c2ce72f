#![allow(dead_code)]

//! In-memory store behind `ConnectionProvider`, plus RESP helpers shared by
//! the integration tests.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::io::{self, BufRead, Cursor};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::ConnectionLike;
use redis::{Cmd, ErrorKind, Pipeline, RedisError, RedisFuture, RedisResult, Value};
use rkv_client::{ClientResult, ConnectionProvider, KVClient, RedisSettings, TopologyMode};

// ---------------------------------------------------------------------------
// RESP framing
// ---------------------------------------------------------------------------

/// Reads one `*N` array of bulk strings. `Ok(None)` on clean EOF.
pub fn read_command<R: BufRead>(reader: &mut R) -> io::Result<Option<Vec<Vec<u8>>>> {
    let mut line = Vec::new();
    if read_line(reader, &mut line)?.is_none() {
        return Ok(None);
    }
    if line.first() != Some(&b'*') {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "expected array"));
    }
    let count = parse_usize(&line[1..])?;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        read_line(reader, &mut line)?
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "eof"))?;
        if line.first() != Some(&b'$') {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "expected bulk"));
        }
        let len = parse_usize(&line[1..])?;
        let mut data = vec![0u8; len];
        reader.read_exact(&mut data)?;
        let mut crlf = [0u8; 2];
        reader.read_exact(&mut crlf)?;
        if crlf != [b'\r', b'\n'] {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "missing crlf"));
        }
        args.push(data);
    }
    Ok(Some(args))
}

fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<Option<()>> {
    buf.clear();
    let bytes = reader.read_until(b'\n', buf)?;
    if bytes == 0 {
        return Ok(None);
    }
    if buf.len() < 2 || buf[buf.len() - 2] != b'\r' {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "invalid line"));
    }
    buf.truncate(buf.len() - 2);
    Ok(Some(()))
}

fn parse_usize(data: &[u8]) -> io::Result<usize> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "digit"))
}

/// Splits a packed command or pipeline into argument lists.
pub fn parse_packed(bytes: &[u8]) -> io::Result<Vec<Vec<Vec<u8>>>> {
    let mut cursor = Cursor::new(bytes);
    let mut commands = Vec::new();
    while let Some(args) = read_command(&mut cursor)? {
        commands.push(args);
    }
    Ok(commands)
}

pub fn upper(arg: &[u8]) -> String {
    String::from_utf8_lossy(arg).to_ascii_uppercase()
}

// ---------------------------------------------------------------------------
// Keyspace
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Entry {
    Str(Vec<u8>),
    List(VecDeque<Vec<u8>>),
    Hash(BTreeMap<Vec<u8>, Vec<u8>>),
    Set(BTreeSet<Vec<u8>>),
    ZSet(Vec<(Vec<u8>, f64)>),
}

impl Entry {
    fn is_empty(&self) -> bool {
        match self {
            Entry::Str(_) => false,
            Entry::List(items) => items.is_empty(),
            Entry::Hash(fields) => fields.is_empty(),
            Entry::Set(members) => members.is_empty(),
            Entry::ZSet(members) => members.is_empty(),
        }
    }
}

fn wrong_type() -> RedisError {
    RedisError::from((
        ErrorKind::TypeError,
        "WRONGTYPE",
        "Operation against a key holding the wrong kind of value".to_string(),
    ))
}

fn err(message: impl Into<String>) -> RedisError {
    RedisError::from((ErrorKind::ResponseError, "ERR", message.into()))
}

fn int(arg: &[u8]) -> RedisResult<i64> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| err("value is not an integer or out of range"))
}

fn float(arg: &[u8]) -> RedisResult<f64> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| err("value is not a valid float"))
}

fn bulk(data: &[u8]) -> Value {
    Value::BulkString(data.to_vec())
}

fn score_bytes(score: f64) -> Vec<u8> {
    score.to_string().into_bytes()
}

/// Inclusive `[start, stop]` with negative indexes counted from the end.
fn range_bounds(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len || stop < 0 {
        None
    } else {
        Some((start as usize, stop as usize))
    }
}

fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    match pattern.strip_suffix(b"*") {
        Some(prefix) => text.starts_with(prefix),
        None => pattern == text,
    }
}

#[derive(Default)]
struct Keyspace {
    entries: HashMap<Vec<u8>, Entry>,
    expiries: HashMap<Vec<u8>, Instant>,
}

macro_rules! typed {
    ($name:ident, $name_mut:ident, $variant:ident, $ty:ty) => {
        fn $name(&self, key: &[u8]) -> RedisResult<Option<&$ty>> {
            match self.entries.get(key) {
                None => Ok(None),
                Some(Entry::$variant(value)) => Ok(Some(value)),
                Some(_) => Err(wrong_type()),
            }
        }

        fn $name_mut(&mut self, key: &[u8]) -> RedisResult<&mut $ty> {
            match self
                .entries
                .entry(key.to_vec())
                .or_insert_with(|| Entry::$variant(Default::default()))
            {
                Entry::$variant(value) => Ok(value),
                _ => Err(wrong_type()),
            }
        }
    };
}

impl Keyspace {
    typed!(list, list_mut, List, VecDeque<Vec<u8>>);
    typed!(hash, hash_mut, Hash, BTreeMap<Vec<u8>, Vec<u8>>);
    typed!(set, set_mut, Set, BTreeSet<Vec<u8>>);
    typed!(zset, zset_mut, ZSet, Vec<(Vec<u8>, f64)>);

    fn purge_expired(&mut self) {
        let now = Instant::now();
        let expired: Vec<Vec<u8>> = self
            .expiries
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in expired {
            self.entries.remove(&key);
            self.expiries.remove(&key);
        }
    }

    fn drop_if_empty(&mut self, key: &[u8]) {
        if self.entries.get(key).map_or(false, Entry::is_empty) {
            self.entries.remove(key);
            self.expiries.remove(key);
        }
    }

    fn string(&self, key: &[u8]) -> RedisResult<Option<&Vec<u8>>> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(Entry::Str(value)) => Ok(Some(value)),
            Some(_) => Err(wrong_type()),
        }
    }

    fn incr_by(&mut self, key: &[u8], delta: i64) -> RedisResult<Value> {
        let current = match self.string(key)? {
            Some(raw) => int(raw)?,
            None => 0,
        };
        let next = current
            .checked_add(delta)
            .ok_or_else(|| err("increment or decrement would overflow"))?;
        self.entries
            .insert(key.to_vec(), Entry::Str(next.to_string().into_bytes()));
        Ok(Value::Int(next))
    }

    fn sorted(&self, key: &[u8]) -> RedisResult<Vec<(Vec<u8>, f64)>> {
        let mut members = self.zset(key)?.cloned().unwrap_or_default();
        members.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        Ok(members)
    }

    fn pop(&mut self, key: &[u8], front: bool) -> RedisResult<Option<Vec<u8>>> {
        if self.list(key)?.is_none() {
            return Ok(None);
        }
        let list = self.list_mut(key)?;
        let popped = if front { list.pop_front() } else { list.pop_back() };
        self.drop_if_empty(key);
        Ok(popped)
    }

    fn set_expiry(&mut self, key: &[u8], ttl: Duration, condition: Option<&str>) -> i64 {
        if !self.entries.contains_key(key) {
            return 0;
        }
        let deadline = Instant::now() + ttl;
        let current = self.expiries.get(key).copied();
        let allowed = match condition {
            Some("NX") => current.is_none(),
            Some("XX") => current.is_some(),
            Some("GT") => current.map_or(false, |existing| deadline > existing),
            Some("LT") => current.map_or(true, |existing| deadline < existing),
            _ => true,
        };
        if allowed {
            self.expiries.insert(key.to_vec(), deadline);
        }
        i64::from(allowed)
    }

    fn apply(&mut self, name: &str, args: &[Vec<u8>]) -> RedisResult<Value> {
        self.purge_expired();
        let arg = |index: usize| {
            args.get(index)
                .map(Vec::as_slice)
                .ok_or_else(|| err(format!("wrong number of arguments for '{name}'")))
        };

        match name {
            "PING" => match args.first() {
                Some(payload) => Ok(bulk(payload)),
                None => Ok(Value::SimpleString("PONG".to_string())),
            },

            // Strings
            "SET" => {
                let (key, value) = (arg(0)?, arg(1)?);
                let (mut nx, mut xx, mut keep_ttl, mut ttl) = (false, false, false, None);
                let mut index = 2;
                while index < args.len() {
                    match upper(&args[index]).as_str() {
                        "EX" => {
                            ttl = Some(Duration::from_secs(int(arg(index + 1)?)? as u64));
                            index += 1;
                        }
                        "PX" => {
                            ttl = Some(Duration::from_millis(int(arg(index + 1)?)? as u64));
                            index += 1;
                        }
                        "NX" => nx = true,
                        "XX" => xx = true,
                        "KEEPTTL" => keep_ttl = true,
                        other => return Err(err(format!("syntax error near {other}"))),
                    }
                    index += 1;
                }
                let exists = self.entries.contains_key(key);
                if (nx && exists) || (xx && !exists) {
                    return Ok(Value::Nil);
                }
                self.entries.insert(key.to_vec(), Entry::Str(value.to_vec()));
                match ttl {
                    Some(ttl) => {
                        self.expiries.insert(key.to_vec(), Instant::now() + ttl);
                    }
                    None if !keep_ttl => {
                        self.expiries.remove(key);
                    }
                    None => {}
                }
                Ok(Value::Okay)
            }
            "GET" => Ok(self.string(arg(0)?)?.map_or(Value::Nil, |value| bulk(value))),
            "DEL" => {
                let mut removed = 0;
                for key in args {
                    if self.entries.remove(key).is_some() {
                        removed += 1;
                    }
                    self.expiries.remove(key);
                }
                Ok(Value::Int(removed))
            }
            "EXISTS" => Ok(Value::Int(
                args.iter().filter(|key| self.entries.contains_key(*key)).count() as i64,
            )),
            "INCR" => self.incr_by(arg(0)?, 1),
            "DECR" => self.incr_by(arg(0)?, -1),
            "INCRBY" => self.incr_by(arg(0)?, int(arg(1)?)?),
            "DECRBY" => self.incr_by(arg(0)?, -int(arg(1)?)?),
            "STRLEN" => Ok(Value::Int(
                self.string(arg(0)?)?.map_or(0, |value| value.len() as i64),
            )),
            "GETRANGE" => {
                let value = self.string(arg(0)?)?.cloned().unwrap_or_default();
                let slice = range_bounds(value.len(), int(arg(1)?)?, int(arg(2)?)?)
                    .map(|(start, stop)| value[start..=stop].to_vec())
                    .unwrap_or_default();
                Ok(Value::BulkString(slice))
            }
            "SETRANGE" => {
                let (key, offset, patch) = (arg(0)?, int(arg(1)?)? as usize, arg(2)?);
                let mut value = self.string(key)?.cloned().unwrap_or_default();
                if value.len() < offset + patch.len() {
                    value.resize(offset + patch.len(), 0);
                }
                value[offset..offset + patch.len()].copy_from_slice(patch);
                let len = value.len() as i64;
                self.entries.insert(key.to_vec(), Entry::Str(value));
                Ok(Value::Int(len))
            }
            "EXPIRE" | "PEXPIRE" => {
                let amount = int(arg(1)?)?.max(0) as u64;
                let ttl = if name == "EXPIRE" {
                    Duration::from_secs(amount)
                } else {
                    Duration::from_millis(amount)
                };
                let condition = args.get(2).map(|raw| upper(raw));
                Ok(Value::Int(self.set_expiry(arg(0)?, ttl, condition.as_deref())))
            }
            "TTL" => {
                let key = arg(0)?;
                if !self.entries.contains_key(key) {
                    return Ok(Value::Int(-2));
                }
                Ok(Value::Int(match self.expiries.get(key) {
                    None => -1,
                    Some(deadline) => {
                        let left = deadline.saturating_duration_since(Instant::now());
                        ((left.as_millis() + 500) / 1000) as i64
                    }
                }))
            }

            // Hashes
            "HSET" => {
                let key = arg(0)?;
                if args.len() < 3 || args.len() % 2 == 0 {
                    return Err(err("wrong number of arguments for 'hset'"));
                }
                let hash = self.hash_mut(key)?;
                let added = args[1..]
                    .chunks(2)
                    .filter(|pair| hash.insert(pair[0].clone(), pair[1].clone()).is_none())
                    .count();
                Ok(Value::Int(added as i64))
            }
            "HGET" => Ok(self
                .hash(arg(0)?)?
                .and_then(|hash| hash.get(args[1].as_slice()))
                .map_or(Value::Nil, |value| bulk(value))),
            "HGETALL" => Ok(Value::Array(
                self.hash(arg(0)?)?
                    .map(|hash| {
                        hash.iter()
                            .flat_map(|(field, value)| [bulk(field), bulk(value)])
                            .collect()
                    })
                    .unwrap_or_default(),
            )),
            "HDEL" => {
                let key = arg(0)?;
                if self.hash(key)?.is_none() {
                    return Ok(Value::Int(0));
                }
                let hash = self.hash_mut(key)?;
                let removed = args[1..].iter().filter(|field| hash.remove(*field).is_some()).count();
                self.drop_if_empty(key);
                Ok(Value::Int(removed as i64))
            }
            "HEXISTS" => Ok(Value::Int(i64::from(
                self.hash(arg(0)?)?
                    .map_or(false, |hash| hash.contains_key(args[1].as_slice())),
            ))),
            "HLEN" => Ok(Value::Int(self.hash(arg(0)?)?.map_or(0, |hash| hash.len() as i64))),
            "HKEYS" | "HVALS" => Ok(Value::Array(
                self.hash(arg(0)?)?
                    .map(|hash| {
                        hash.iter()
                            .map(|(field, value)| bulk(if name == "HKEYS" { field } else { value }))
                            .collect()
                    })
                    .unwrap_or_default(),
            )),
            "HINCRBY" => {
                let (key, field, delta) = (arg(0)?, arg(1)?, int(arg(2)?)?);
                let hash = self.hash_mut(key)?;
                let current = match hash.get(field) {
                    Some(raw) => int(raw).map_err(|_| err("hash value is not an integer"))?,
                    None => 0,
                };
                let next = current + delta;
                hash.insert(field.to_vec(), next.to_string().into_bytes());
                Ok(Value::Int(next))
            }
            "HMGET" => {
                let hash = self.hash(arg(0)?)?;
                Ok(Value::Array(
                    args[1..]
                        .iter()
                        .map(|field| {
                            hash.and_then(|hash| hash.get(field))
                                .map_or(Value::Nil, |value| bulk(value))
                        })
                        .collect(),
                ))
            }
            "HSETNX" => {
                let (key, field, value) = (arg(0)?, arg(1)?, arg(2)?);
                let hash = self.hash_mut(key)?;
                if hash.contains_key(field) {
                    return Ok(Value::Int(0));
                }
                hash.insert(field.to_vec(), value.to_vec());
                Ok(Value::Int(1))
            }
            "HSCAN" => {
                let key = arg(0)?;
                let pattern = match args.iter().position(|raw| upper(raw) == "MATCH") {
                    Some(index) => arg(index + 1)?.to_vec(),
                    None => b"*".to_vec(),
                };
                let entries = self
                    .hash(key)?
                    .map(|hash| {
                        hash.iter()
                            .filter(|(field, _)| glob_match(&pattern, field))
                            .flat_map(|(field, value)| [bulk(field), bulk(value)])
                            .collect()
                    })
                    .unwrap_or_default();
                Ok(Value::Array(vec![bulk(b"0"), Value::Array(entries)]))
            }

            // Lists
            "LPUSH" | "RPUSH" => {
                let key = arg(0)?;
                arg(1)?;
                let list = self.list_mut(key)?;
                for value in &args[1..] {
                    if name == "LPUSH" {
                        list.push_front(value.clone());
                    } else {
                        list.push_back(value.clone());
                    }
                }
                Ok(Value::Int(list.len() as i64))
            }
            "LPOP" | "RPOP" => {
                let key = arg(0)?;
                let front = name == "LPOP";
                match args.get(1) {
                    None => Ok(self.pop(key, front)?.map_or(Value::Nil, Value::BulkString)),
                    Some(raw) => {
                        if self.list(key)?.is_none() {
                            return Ok(Value::Nil);
                        }
                        let mut popped = Vec::new();
                        for _ in 0..int(raw)?.max(0) {
                            match self.pop(key, front)? {
                                Some(value) => popped.push(Value::BulkString(value)),
                                None => break,
                            }
                        }
                        Ok(Value::Array(popped))
                    }
                }
            }
            "LLEN" => Ok(Value::Int(self.list(arg(0)?)?.map_or(0, |list| list.len() as i64))),
            "LINDEX" => {
                let index = int(arg(1)?)?;
                Ok(self
                    .list(arg(0)?)?
                    .and_then(|list| {
                        let len = list.len() as i64;
                        let index = if index < 0 { len + index } else { index };
                        usize::try_from(index).ok().and_then(|index| list.get(index))
                    })
                    .map_or(Value::Nil, |value| bulk(value)))
            }
            "LSET" => {
                let (key, index, value) = (arg(0)?, int(arg(1)?)?, arg(2)?);
                if self.list(key)?.is_none() {
                    return Err(err("no such key"));
                }
                let list = self.list_mut(key)?;
                let len = list.len() as i64;
                let index = if index < 0 { len + index } else { index };
                match usize::try_from(index).ok().and_then(|index| list.get_mut(index)) {
                    Some(slot) => {
                        *slot = value.to_vec();
                        Ok(Value::Okay)
                    }
                    None => Err(err("index out of range")),
                }
            }
            "LRANGE" => {
                let (start, stop) = (int(arg(1)?)?, int(arg(2)?)?);
                Ok(Value::Array(
                    self.list(arg(0)?)?
                        .and_then(|list| {
                            range_bounds(list.len(), start, stop).map(|(start, stop)| {
                                list.range(start..=stop).map(|value| bulk(value)).collect()
                            })
                        })
                        .unwrap_or_default(),
                ))
            }
            "LINSERT" => {
                let (key, position, pivot, value) = (arg(0)?, upper(arg(1)?), arg(2)?, arg(3)?);
                if self.list(key)?.is_none() {
                    return Ok(Value::Int(0));
                }
                let list = self.list_mut(key)?;
                match list.iter().position(|item| item.as_slice() == pivot) {
                    Some(at) => {
                        let at = if position == "AFTER" { at + 1 } else { at };
                        list.insert(at, value.to_vec());
                        Ok(Value::Int(list.len() as i64))
                    }
                    None => Ok(Value::Int(-1)),
                }
            }
            "LREM" => {
                let (key, count, value) = (arg(0)?, int(arg(1)?)?, arg(2)?);
                if self.list(key)?.is_none() {
                    return Ok(Value::Int(0));
                }
                let list = self.list_mut(key)?;
                let limit = if count == 0 { usize::MAX } else { count.unsigned_abs() as usize };
                let mut removed = 0;
                let mut kept: VecDeque<Vec<u8>> = VecDeque::with_capacity(list.len());
                if count >= 0 {
                    for item in list.drain(..) {
                        if removed < limit && item.as_slice() == value {
                            removed += 1;
                        } else {
                            kept.push_back(item);
                        }
                    }
                } else {
                    for item in list.drain(..).rev() {
                        if removed < limit && item.as_slice() == value {
                            removed += 1;
                        } else {
                            kept.push_front(item);
                        }
                    }
                }
                *list = kept;
                self.drop_if_empty(key);
                Ok(Value::Int(removed as i64))
            }
            "LTRIM" => {
                let (key, start, stop) = (arg(0)?, int(arg(1)?)?, int(arg(2)?)?);
                if self.list(key)?.is_none() {
                    return Ok(Value::Okay);
                }
                let list = self.list_mut(key)?;
                *list = match range_bounds(list.len(), start, stop) {
                    Some((start, stop)) => list.range(start..=stop).cloned().collect(),
                    None => VecDeque::new(),
                };
                self.drop_if_empty(key);
                Ok(Value::Okay)
            }

            // Sets
            "SADD" => {
                let key = arg(0)?;
                arg(1)?;
                let set = self.set_mut(key)?;
                let added = args[1..].iter().filter(|member| set.insert(member.to_vec())).count();
                Ok(Value::Int(added as i64))
            }
            "SREM" => {
                let key = arg(0)?;
                if self.set(key)?.is_none() {
                    return Ok(Value::Int(0));
                }
                let set = self.set_mut(key)?;
                let removed = args[1..].iter().filter(|member| set.remove(*member)).count();
                self.drop_if_empty(key);
                Ok(Value::Int(removed as i64))
            }
            "SMEMBERS" => Ok(Value::Array(
                self.set(arg(0)?)?
                    .map(|set| set.iter().map(|member| bulk(member)).collect())
                    .unwrap_or_default(),
            )),
            "SISMEMBER" => Ok(Value::Int(i64::from(
                self.set(arg(0)?)?
                    .map_or(false, |set| set.contains(args[1].as_slice())),
            ))),

            // Sorted sets
            "ZADD" => {
                let key = arg(0)?;
                let (mut nx, mut xx, mut changed, mut incr) = (false, false, false, false);
                let mut index = 1;
                while let Some(flag) = args.get(index) {
                    match upper(flag).as_str() {
                        "NX" => nx = true,
                        "XX" => xx = true,
                        "CH" => changed = true,
                        "INCR" => incr = true,
                        _ => break,
                    }
                    index += 1;
                }
                let pairs = &args[index..];
                if pairs.is_empty() || pairs.len() % 2 != 0 {
                    return Err(err("syntax error"));
                }
                let zset = self.zset_mut(key)?;
                let mut counted = 0;
                let mut last_score = None;
                for pair in pairs.chunks(2) {
                    let (score, member) = (float(&pair[0])?, &pair[1]);
                    let position = zset.iter().position(|(existing, _)| existing == member);
                    match position {
                        Some(at) if !nx => {
                            let current = zset[at].1;
                            let next = if incr { current + score } else { score };
                            if next != current && changed {
                                counted += 1;
                            }
                            zset[at].1 = next;
                            last_score = Some(next);
                        }
                        None if !xx => {
                            zset.push((member.clone(), score));
                            counted += 1;
                            last_score = Some(score);
                        }
                        _ => {}
                    }
                }
                self.drop_if_empty(key);
                if incr {
                    Ok(last_score.map_or(Value::Nil, |score| Value::BulkString(score_bytes(score))))
                } else {
                    Ok(Value::Int(counted))
                }
            }
            "ZRANGE" | "ZREVRANGE" => {
                let (start, stop) = (int(arg(1)?)?, int(arg(2)?)?);
                let with_scores = args.get(3).map_or(false, |raw| upper(raw) == "WITHSCORES");
                let mut members = self.sorted(arg(0)?)?;
                if name == "ZREVRANGE" {
                    members.reverse();
                }
                let mut out = Vec::new();
                if let Some((start, stop)) = range_bounds(members.len(), start, stop) {
                    for (member, score) in &members[start..=stop] {
                        out.push(bulk(member));
                        if with_scores {
                            out.push(Value::BulkString(score_bytes(*score)));
                        }
                    }
                }
                Ok(Value::Array(out))
            }
            "ZREM" => {
                let key = arg(0)?;
                if self.zset(key)?.is_none() {
                    return Ok(Value::Int(0));
                }
                let zset = self.zset_mut(key)?;
                let before = zset.len();
                zset.retain(|(member, _)| !args[1..].contains(member));
                let removed = before - zset.len();
                self.drop_if_empty(key);
                Ok(Value::Int(removed as i64))
            }

            other => Err(err(format!("unknown command '{other}'"))),
        }
    }

    /// One non-blocking attempt of a blocking pop.
    fn try_blocking_pop(&mut self, name: &str, args: &[Vec<u8>]) -> RedisResult<Option<Value>> {
        self.purge_expired();
        if name == "BRPOPLPUSH" {
            let (source, destination) = (&args[0], &args[1]);
            return match self.pop(source, false)? {
                Some(value) => {
                    self.list_mut(destination)?.push_front(value.clone());
                    Ok(Some(Value::BulkString(value)))
                }
                None => Ok(None),
            };
        }

        let keys = &args[..args.len() - 1];
        for key in keys {
            if let Some(value) = self.pop(key, name == "BLPOP")? {
                return Ok(Some(Value::Array(vec![bulk(key), Value::BulkString(value)])));
            }
        }
        Ok(None)
    }
}

// ---------------------------------------------------------------------------
// Store, connection and provider
// ---------------------------------------------------------------------------

/// Shared state behind every mock connection.
#[derive(Default)]
pub struct MockStore {
    keyspace: Mutex<Keyspace>,
    log: Mutex<Vec<String>>,
    pending_failures: AtomicU32,
    abort_exec: AtomicBool,
    closed: AtomicBool,
    rebuilds: AtomicU32,
}

impl MockStore {
    /// The next `count` commands fail with a connection reset.
    pub fn fail_next(&self, count: u32) {
        self.pending_failures.store(count, Ordering::SeqCst);
    }

    /// The next transaction's EXEC returns nil, as after a failed WATCH.
    pub fn abort_next_exec(&self) {
        self.abort_exec.store(true, Ordering::SeqCst);
    }

    /// How many times `name` reached the store, failed attempts included.
    pub fn calls(&self, name: &str) -> usize {
        self.log.lock().iter().filter(|logged| logged.as_str() == name).count()
    }

    pub fn total_calls(&self) -> usize {
        self.log.lock().len()
    }

    pub fn rebuilds(&self) -> u32 {
        self.rebuilds.load(Ordering::SeqCst)
    }

    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        match self.keyspace.lock().entries.get(key.as_bytes()) {
            Some(Entry::Str(value)) => Some(value.clone()),
            _ => None,
        }
    }

    fn record(&self, name: &str) {
        self.log.lock().push(name.to_string());
    }

    fn take_failure(&self) -> bool {
        self.pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }

    fn apply(&self, name: &str, args: &[Vec<u8>]) -> RedisResult<Value> {
        self.keyspace.lock().apply(name, args)
    }

    fn try_blocking_pop(&self, name: &str, args: &[Vec<u8>]) -> RedisResult<Option<Value>> {
        self.keyspace.lock().try_blocking_pop(name, args)
    }

    async fn dispatch(&self, args: Vec<Vec<u8>>) -> RedisResult<Value> {
        let name = upper(&args[0]);
        self.record(&name);
        if self.take_failure() {
            return Err(RedisError::from(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "injected connection reset",
            )));
        }
        match name.as_str() {
            "BLPOP" | "BRPOP" | "BRPOPLPUSH" => self.blocking(&name, &args[1..]).await,
            _ => self.apply(&name, &args[1..]),
        }
    }

    /// Polls until a value shows up or the server-side timeout passes.
    async fn blocking(&self, name: &str, args: &[Vec<u8>]) -> RedisResult<Value> {
        let timeout = args.last().map(|raw| int(raw)).transpose()?.unwrap_or(0);
        let started = Instant::now();
        loop {
            let popped = self.try_blocking_pop(name, args)?;
            if let Some(value) = popped {
                return Ok(value);
            }
            if timeout > 0 && started.elapsed() >= Duration::from_secs(timeout as u64) {
                return Ok(Value::Nil);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

pub struct MockConnection {
    store: Arc<MockStore>,
}

impl ConnectionLike for MockConnection {
    fn req_packed_command<'a>(&'a mut self, cmd: &'a Cmd) -> RedisFuture<'a, Value> {
        Box::pin(async move {
            let args = parse_packed(&cmd.get_packed_command())?
                .into_iter()
                .next()
                .ok_or_else(|| err("empty command"))?;
            self.store.dispatch(args).await
        })
    }

    fn req_packed_commands<'a>(
        &'a mut self,
        cmd: &'a Pipeline,
        offset: usize,
        count: usize,
    ) -> RedisFuture<'a, Vec<Value>> {
        Box::pin(async move {
            let mut replies = Vec::new();
            let mut queued: Option<Vec<Value>> = None;
            let mut aborting = false;
            for args in parse_packed(&cmd.get_packed_pipeline())? {
                match upper(&args[0]).as_str() {
                    "MULTI" => {
                        self.store.record("MULTI");
                        aborting = self.store.abort_exec.swap(false, Ordering::SeqCst);
                        queued = Some(Vec::new());
                        replies.push(Value::Okay);
                    }
                    "EXEC" => {
                        self.store.record("EXEC");
                        let results = queued.take().unwrap_or_default();
                        replies.push(if aborting { Value::Nil } else { Value::Array(results) });
                    }
                    _ if aborting => replies.push(Value::SimpleString("QUEUED".to_string())),
                    _ => {
                        let reply = self.store.dispatch(args).await?;
                        match queued.as_mut() {
                            Some(results) => {
                                results.push(reply);
                                replies.push(Value::SimpleString("QUEUED".to_string()));
                            }
                            None => replies.push(reply),
                        }
                    }
                }
            }
            Ok(replies.into_iter().skip(offset).take(count).collect())
        })
    }

    fn get_db(&self) -> i64 {
        0
    }
}

/// `ConnectionProvider` over a shared `MockStore`.
pub struct MockProvider {
    store: Arc<MockStore>,
    mode: TopologyMode,
}

impl MockProvider {
    pub fn new(mode: TopologyMode) -> (Self, Arc<MockStore>) {
        let store = Arc::new(MockStore::default());
        (
            MockProvider {
                store: Arc::clone(&store),
                mode,
            },
            store,
        )
    }
}

#[async_trait]
impl ConnectionProvider for MockProvider {
    type Connection = MockConnection;

    async fn connection(&self) -> ClientResult<MockConnection> {
        if self.store.closed.swap(false, Ordering::SeqCst) {
            self.store.rebuilds.fetch_add(1, Ordering::SeqCst);
        }
        Ok(MockConnection {
            store: Arc::clone(&self.store),
        })
    }

    fn mode(&self) -> TopologyMode {
        self.mode
    }

    fn close(&self) {
        self.store.closed.store(true, Ordering::SeqCst);
    }
}

/// Three attempts, millisecond backoff, two second socket timeout.
pub fn fast_settings() -> RedisSettings {
    RedisSettings {
        retry_attempts: 3,
        retry_delay: 0.001,
        retry_max_delay: 0.01,
        socket_timeout: Some(Duration::from_secs(2)),
        ..RedisSettings::default()
    }
}

pub fn mock_client() -> (KVClient<MockProvider>, Arc<MockStore>) {
    mock_client_with(fast_settings())
}

pub fn mock_client_with(settings: RedisSettings) -> (KVClient<MockProvider>, Arc<MockStore>) {
    let (provider, store) = MockProvider::new(TopologyMode::select(&settings));
    (KVClient::with_provider(provider, &settings), store)
}

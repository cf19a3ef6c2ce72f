//! # Client Configuration
//!
//! Purpose: Describe how the client reaches the store (single node or
//! cluster), how large its pool is, and how hard it retries.
//!
//! ## Sources
//! - `RedisSettings::default()` for local development.
//! - `RedisSettings::from_env()` reads `REDIS_*` variables, after loading
//!   `.env.{ENV}` when such a file exists.
//! - `RedisSettings::from_lookup()` takes any key lookup; tests use it to avoid
//!   touching the process environment.

use std::env;
use std::fmt;
use std::io;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RkvError, RkvResult};

/// Address of one cluster seed node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "NodeEntry")]
pub struct ClusterNode {
    pub host: String,
    pub port: u16,
}

impl ClusterNode {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        ClusterNode {
            host: host.into(),
            port,
        }
    }

    /// Parses a `host:port` pair.
    pub fn parse(addr: &str) -> Result<Self, String> {
        let addr = addr.trim();
        let (host, port) = addr
            .rsplit_once(':')
            .ok_or_else(|| format!("expected host:port, got {addr:?}"))?;
        if host.is_empty() {
            return Err(format!("missing host in {addr:?}"));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| format!("invalid port in {addr:?}"))?;
        Ok(ClusterNode::new(host, port))
    }
}

impl fmt::Display for ClusterNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Accepted spellings of a node descriptor in JSON.
#[derive(Deserialize)]
#[serde(untagged)]
enum NodeEntry {
    Addr(String),
    Object { host: String, port: u16 },
}

impl TryFrom<NodeEntry> for ClusterNode {
    type Error = String;

    fn try_from(entry: NodeEntry) -> Result<Self, Self::Error> {
        match entry {
            NodeEntry::Addr(addr) => ClusterNode::parse(&addr),
            NodeEntry::Object { host, port } => Ok(ClusterNode::new(host, port)),
        }
    }
}

/// Connection, pooling and retry settings for the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisSettings {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    /// Logical database index (single-node mode only).
    pub db: i64,
    pub decode_responses: bool,
    /// Pool size; also the bound on concurrently in-flight commands.
    pub max_connections: usize,
    /// Per-attempt deadline and pool wait limit. `None` waits forever.
    pub socket_timeout: Option<Duration>,
    pub retry_on_timeout: bool,
    /// Total attempts per call, including the first one.
    pub retry_attempts: u32,
    /// Backoff factor in seconds.
    pub retry_delay: f64,
    /// Upper bound on a single backoff sleep, in seconds.
    pub retry_max_delay: f64,
    pub is_cluster: bool,
    pub cluster_nodes: Vec<ClusterNode>,
    /// Return safe defaults from read-style calls once retries are exhausted.
    pub default_on_failure: bool,
}

impl Default for RedisSettings {
    fn default() -> Self {
        RedisSettings {
            host: "127.0.0.1".to_string(),
            port: 6379,
            password: None,
            db: 0,
            decode_responses: true,
            max_connections: 10,
            socket_timeout: Some(Duration::from_secs(5)),
            retry_on_timeout: true,
            retry_attempts: 3,
            retry_delay: 0.1,
            retry_max_delay: 10.0,
            is_cluster: false,
            cluster_nodes: Vec::new(),
            default_on_failure: true,
        }
    }
}

impl RedisSettings {
    /// Loads settings from the process environment.
    ///
    /// `.env.{ENV}` (with `ENV` defaulting to `production`) is loaded first
    /// when present; variables already set in the environment win. A dotenv
    /// file that exists but cannot be read or parsed is an error.
    pub fn from_env() -> RkvResult<Self> {
        let profile = env::var("ENV").unwrap_or_else(|_| "production".to_string());
        load_env_file(format!(".env.{profile}"))?;
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds settings from an arbitrary key lookup, falling back to defaults
    /// for absent keys.
    ///
    /// **Input**: `lookup` mapping an env-style key to its raw value.
    /// **Output**: validated settings or the first invalid entry.
    pub fn from_lookup<F>(lookup: F) -> RkvResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = RedisSettings::default();
        let read = |key: &str| {
            lookup(key)
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
        };

        let settings = RedisSettings {
            host: read("REDIS_HOST").unwrap_or(defaults.host),
            port: parse_or("REDIS_PORT", read("REDIS_PORT"), defaults.port)?,
            password: read("REDIS_PASSWORD").or(defaults.password),
            db: parse_or("REDIS_DB", read("REDIS_DB"), defaults.db)?,
            decode_responses: bool_or(
                "REDIS_DECODE_RESPONSES",
                read("REDIS_DECODE_RESPONSES"),
                defaults.decode_responses,
            )?,
            max_connections: parse_or(
                "REDIS_MAX_CONNECTIONS",
                read("REDIS_MAX_CONNECTIONS"),
                defaults.max_connections,
            )?,
            socket_timeout: match read("REDIS_SOCKET_TIMEOUT") {
                None => defaults.socket_timeout,
                Some(raw) if raw.eq_ignore_ascii_case("none") => None,
                Some(raw) => Some(seconds("REDIS_SOCKET_TIMEOUT", &raw)?),
            },
            retry_on_timeout: bool_or(
                "REDIS_RETRY_ON_TIMEOUT",
                read("REDIS_RETRY_ON_TIMEOUT"),
                defaults.retry_on_timeout,
            )?,
            retry_attempts: parse_or(
                "REDIS_RETRY_ATTEMPTS",
                read("REDIS_RETRY_ATTEMPTS"),
                defaults.retry_attempts,
            )?,
            retry_delay: parse_or("REDIS_RETRY_DELAY", read("REDIS_RETRY_DELAY"), defaults.retry_delay)?,
            retry_max_delay: parse_or(
                "REDIS_RETRY_MAX_DELAY",
                read("REDIS_RETRY_MAX_DELAY"),
                defaults.retry_max_delay,
            )?,
            is_cluster: bool_or("REDIS_IS_CLUSTER", read("REDIS_IS_CLUSTER"), defaults.is_cluster)?,
            cluster_nodes: match read("REDIS_CLUSTER_NODES") {
                Some(raw) => parse_cluster_nodes(&raw)?,
                None => defaults.cluster_nodes,
            },
            default_on_failure: bool_or(
                "REDIS_DEFAULT_ON_FAILURE",
                read("REDIS_DEFAULT_ON_FAILURE"),
                defaults.default_on_failure,
            )?,
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Checks value ranges that the type system does not express.
    pub fn validate(&self) -> RkvResult<()> {
        if self.max_connections == 0 {
            return Err(invalid("REDIS_MAX_CONNECTIONS", "must be at least 1"));
        }
        if self.retry_attempts == 0 {
            return Err(invalid("REDIS_RETRY_ATTEMPTS", "must be at least 1"));
        }
        check_delay("REDIS_RETRY_DELAY", self.retry_delay)?;
        check_delay("REDIS_RETRY_MAX_DELAY", self.retry_max_delay)?;
        if self.db < 0 {
            return Err(invalid("REDIS_DB", "must not be negative"));
        }
        Ok(())
    }

    /// Returns true when the cluster client will be used.
    ///
    /// The flag alone is not enough: an empty node list keeps single-node mode.
    pub fn cluster_enabled(&self) -> bool {
        self.is_cluster && !self.cluster_nodes.is_empty()
    }
}

/// Parses `REDIS_CLUSTER_NODES`: either `host:port,host:port` or a JSON list
/// of `"host:port"` strings / `{"host": .., "port": ..}` objects.
pub fn parse_cluster_nodes(raw: &str) -> RkvResult<Vec<ClusterNode>> {
    let raw = raw.trim();
    if raw.starts_with('[') {
        return serde_json::from_str(raw)
            .map_err(|err| invalid("REDIS_CLUSTER_NODES", err.to_string()));
    }

    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| ClusterNode::parse(part).map_err(|reason| invalid("REDIS_CLUSTER_NODES", reason)))
        .collect()
}

/// Converts seconds to a `Duration`, clamping instead of panicking.
///
/// NaN and non-positive inputs give zero; values past `Duration::MAX` give
/// `Duration::MAX`.
pub fn saturating_secs(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

/// Loads a dotenv file into the process environment.
///
/// A missing file is not an error.
fn load_env_file(path: impl AsRef<Path>) -> RkvResult<()> {
    let path = path.as_ref();
    match dotenvy::from_path(path) {
        Ok(()) => Ok(()),
        Err(dotenvy::Error::Io(err)) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(invalid("ENV", format!("cannot load {}: {err}", path.display()))),
    }
}

fn check_delay(key: &'static str, secs: f64) -> RkvResult<()> {
    if secs < 0.0 || Duration::try_from_secs_f64(secs).is_err() {
        return Err(invalid(key, "must be a non-negative number of seconds within duration range"));
    }
    Ok(())
}

fn invalid(key: &'static str, reason: impl Into<String>) -> RkvError {
    RkvError::InvalidConfig {
        key,
        reason: reason.into(),
    }
}

fn parse_or<T: std::str::FromStr>(key: &'static str, raw: Option<String>, default: T) -> RkvResult<T> {
    match raw {
        Some(raw) => raw
            .parse()
            .map_err(|_| invalid(key, format!("cannot parse {raw:?}"))),
        None => Ok(default),
    }
}

fn bool_or(key: &'static str, raw: Option<String>, default: bool) -> RkvResult<bool> {
    let raw = match raw {
        Some(raw) => raw,
        None => return Ok(default),
    };
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, format!("expected a boolean, got {raw:?}"))),
    }
}

fn seconds(key: &'static str, raw: &str) -> RkvResult<Duration> {
    let secs: f64 = raw
        .parse()
        .map_err(|_| invalid(key, format!("cannot parse {raw:?}")))?;
    if !secs.is_finite() || secs <= 0.0 {
        return Err(invalid(key, "must be a positive number of seconds"));
    }
    Duration::try_from_secs_f64(secs).map_err(|_| invalid(key, format!("{raw:?} is out of range")))
}

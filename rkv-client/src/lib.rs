//! # Resilient Key-Value Client
//!
//! Purpose: Turn a pooled Redis connection into a typed, auto-serializing,
//! auto-retrying API over strings, hashes, lists, sets, sorted sets,
//! blocking pops, transactions and pipelines, on one node or a cluster.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: `TopologyManager` owns a deadpool pool and
//!    rebuilds it on demand; no call opens its own connection.
//! 2. **Facade Pattern**: `KVClient` hides encoding, retry and decoding
//!    behind one method per command.
//! 3. **Explicit Retry**: `RetryExecutor` is a plain higher-order wrapper
//!    with exponential backoff and full jitter.
//! 4. **Documented Defaults**: What a failing read returns is decided by
//!    `FailurePolicy`, not scattered through call sites.
//!
//! ## Example
//!
//! ```no_run
//! use rkv_client::{KVClient, RedisSettings, SetOptions};
//!
//! # async fn run() -> rkv_client::ClientResult<()> {
//! let client = KVClient::connect(RedisSettings::default())?;
//! client.set("greeting", "hello", SetOptions::default()).await?;
//! let value = client.get("greeting").await?;
//! assert_eq!(value, "hello");
//! client.close();
//! # Ok(())
//! # }
//! ```

mod batch;
mod client;
mod commands;
mod error;
mod policy;
mod reply;
mod retry;
mod topology;

pub use batch::Batch;
pub use client::{
    ExpireCondition, Expiry, HashScan, HashWrite, InsertPosition, KVClient, RangeEntry,
    SetOptions, ZAddCondition, ZAddOptions, ZRangeOptions,
};
pub use error::{BatchKind, ClientError, ClientResult};
pub use policy::FailurePolicy;
pub use reply::decode_reply;
pub use retry::{RetryExecutor, RetryPolicy, DEFAULT_BACKOFF_BASE};
pub use topology::{ConnectionProvider, LiveConnection, TopologyManager, TopologyMode};

pub use rkv_common::{ClusterNode, Codec, RedisSettings, Value};

//! # Topology Manager
//!
//! Purpose: Own the pooled connection to the store, either one node or a
//! cluster, and hand out live connections to the facade.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Connections come from a bounded deadpool pool;
//!    callers beyond `max_connections` wait up to `socket_timeout`.
//! 2. **Strategy Pattern**: The facade only sees `ConnectionProvider`, so tests
//!    and alternative backends plug in without touching command code.
//! 3. **Guarded Rebuild**: A missing or closed pool is rebuilt under the write
//!    lock with a double check; concurrent callers never build twice.
//! 4. **Fail Fast at Startup**: A pool that cannot be built is a setup error,
//!    not something to retry.
//!
//! ## Structure Overview
//!
//! ```text
//! TopologyManager
//!   ├── settings: RedisSettings
//!   ├── mode: Standalone | Cluster
//!   └── backend: RwLock<Option<Backend>>
//!         ├── Standalone(deadpool_redis::Pool)
//!         └── Cluster(deadpool_redis::cluster::Pool)
//! ```

use async_trait::async_trait;
use deadpool_redis::{cluster, PoolConfig, Runtime};
use parking_lot::RwLock;
use redis::aio::ConnectionLike;
use redis::{Cmd, Pipeline, RedisFuture, Value};
use rkv_common::{ClusterNode, RedisSettings};
use tracing::{info, warn};

use crate::error::{ClientError, ClientResult};

/// Deployment shape the client talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyMode {
    Standalone,
    Cluster,
}

impl TopologyMode {
    /// Cluster mode requires both the flag and at least one seed node.
    pub fn select(settings: &RedisSettings) -> Self {
        if settings.cluster_enabled() {
            TopologyMode::Cluster
        } else {
            TopologyMode::Standalone
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TopologyMode::Standalone => "standalone",
            TopologyMode::Cluster => "cluster",
        }
    }
}

/// Source of live connections for the facade.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    type Connection: ConnectionLike + Send;

    /// Checks out a connection, building the backend first if needed.
    async fn connection(&self) -> ClientResult<Self::Connection>;

    fn mode(&self) -> TopologyMode;

    /// Releases pooled connections. Safe to call more than once.
    fn close(&self);
}

#[derive(Clone)]
enum Backend {
    Standalone(deadpool_redis::Pool),
    Cluster(cluster::Pool),
}

impl Backend {
    fn is_closed(&self) -> bool {
        match self {
            Backend::Standalone(pool) => pool.is_closed(),
            Backend::Cluster(pool) => pool.is_closed(),
        }
    }

    fn close(&self) {
        match self {
            Backend::Standalone(pool) => pool.close(),
            Backend::Cluster(pool) => pool.close(),
        }
    }
}

/// A connection checked out of either pool; returned to it on drop.
pub enum LiveConnection {
    Standalone(deadpool_redis::Connection),
    Cluster(cluster::Connection),
}

impl ConnectionLike for LiveConnection {
    fn req_packed_command<'a>(&'a mut self, cmd: &'a Cmd) -> RedisFuture<'a, Value> {
        match self {
            LiveConnection::Standalone(conn) => conn.req_packed_command(cmd),
            LiveConnection::Cluster(conn) => conn.req_packed_command(cmd),
        }
    }

    fn req_packed_commands<'a>(
        &'a mut self,
        cmd: &'a Pipeline,
        offset: usize,
        count: usize,
    ) -> RedisFuture<'a, Vec<Value>> {
        match self {
            LiveConnection::Standalone(conn) => conn.req_packed_commands(cmd, offset, count),
            LiveConnection::Cluster(conn) => conn.req_packed_commands(cmd, offset, count),
        }
    }

    fn get_db(&self) -> i64 {
        match self {
            LiveConnection::Standalone(conn) => conn.get_db(),
            LiveConnection::Cluster(conn) => conn.get_db(),
        }
    }
}

/// Owns the pool (or cluster pool) and rebuilds it when it goes away.
pub struct TopologyManager {
    settings: RedisSettings,
    mode: TopologyMode,
    backend: RwLock<Option<Backend>>,
}

impl TopologyManager {
    /// Validates `settings` and builds the pool for the selected mode.
    ///
    /// # Errors
    /// `ClientError::Config` for invalid settings, `ClientError::Setup` when
    /// the driver rejects the connection parameters.
    pub fn new(settings: RedisSettings) -> ClientResult<Self> {
        settings.validate()?;
        let mode = TopologyMode::select(&settings);
        if settings.is_cluster && mode == TopologyMode::Standalone {
            warn!("cluster mode requested without cluster nodes, using a single node");
        }

        let backend = build_backend(&settings, mode)?;
        Ok(TopologyManager {
            settings,
            mode,
            backend: RwLock::new(Some(backend)),
        })
    }

    pub fn settings(&self) -> &RedisSettings {
        &self.settings
    }

    /// Returns true while a usable pool is cached.
    pub fn is_connected(&self) -> bool {
        self.backend
            .read()
            .as_ref()
            .map_or(false, |backend| !backend.is_closed())
    }

    fn current_backend(&self) -> ClientResult<Backend> {
        if let Some(backend) = self.backend.read().as_ref() {
            if !backend.is_closed() {
                return Ok(backend.clone());
            }
        }

        let mut slot = self.backend.write();
        // Another caller may have rebuilt while we waited for the lock.
        if let Some(backend) = slot.as_ref() {
            if !backend.is_closed() {
                return Ok(backend.clone());
            }
        }

        warn!(mode = self.mode.as_str(), "client not connected, rebuilding connection pool");
        let backend = build_backend(&self.settings, self.mode)?;
        *slot = Some(backend.clone());
        Ok(backend)
    }
}

#[async_trait]
impl ConnectionProvider for TopologyManager {
    type Connection = LiveConnection;

    async fn connection(&self) -> ClientResult<LiveConnection> {
        match self.current_backend()? {
            Backend::Standalone(pool) => Ok(LiveConnection::Standalone(pool.get().await?)),
            Backend::Cluster(pool) => Ok(LiveConnection::Cluster(pool.get().await?)),
        }
    }

    fn mode(&self) -> TopologyMode {
        self.mode
    }

    fn close(&self) {
        if let Some(backend) = self.backend.write().take() {
            backend.close();
            info!(mode = self.mode.as_str(), "connection pool closed");
        }
    }
}

fn build_backend(settings: &RedisSettings, mode: TopologyMode) -> ClientResult<Backend> {
    let mut pool_config = PoolConfig::new(settings.max_connections);
    pool_config.timeouts.wait = settings.socket_timeout;
    pool_config.timeouts.create = settings.socket_timeout;
    pool_config.timeouts.recycle = settings.socket_timeout;

    match mode {
        TopologyMode::Standalone => {
            let mut config = deadpool_redis::Config::from_url(standalone_url(settings));
            config.pool = Some(pool_config);
            let pool = config
                .create_pool(Some(Runtime::Tokio1))
                .map_err(|err| ClientError::Setup(err.to_string()))?;
            info!(
                mode = mode.as_str(),
                host = %settings.host,
                port = settings.port,
                db = settings.db,
                max_connections = settings.max_connections,
                "standalone connection pool initialized"
            );
            Ok(Backend::Standalone(pool))
        }
        TopologyMode::Cluster => {
            let urls: Vec<String> = settings
                .cluster_nodes
                .iter()
                .map(|node| node_url(settings, node))
                .collect();
            let mut config = cluster::Config::from_urls(urls);
            config.pool = Some(pool_config);
            let pool = config
                .create_pool(Some(Runtime::Tokio1))
                .map_err(|err| ClientError::Setup(err.to_string()))?;
            let nodes: Vec<String> = settings.cluster_nodes.iter().map(ToString::to_string).collect();
            info!(
                mode = mode.as_str(),
                nodes = %nodes.join(","),
                max_connections = settings.max_connections,
                "cluster connection pool initialized"
            );
            Ok(Backend::Cluster(pool))
        }
    }
}

fn credentials(settings: &RedisSettings) -> String {
    match settings.password.as_deref() {
        Some(password) if !password.is_empty() => format!(":{}@", urlencoding::encode(password)),
        _ => String::new(),
    }
}

/// `redis://[:password@]host:port/db`
pub(crate) fn standalone_url(settings: &RedisSettings) -> String {
    format!(
        "redis://{}{}:{}/{}",
        credentials(settings),
        settings.host,
        settings.port,
        settings.db
    )
}

/// Cluster nodes share the credential; there is no database index.
pub(crate) fn node_url(settings: &RedisSettings, node: &ClusterNode) -> String {
    format!("redis://{}{}:{}", credentials(settings), node.host, node.port)
}

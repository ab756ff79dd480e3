//! Unix Socket Server
//!
//! Serves the gateway over a Unix socket with newline-delimited JSON:
//! - Accepts connections and spawns one handler task per connection
//! - Spawns one task per request line, so a slow ensemble query does not
//!   hold up a quick cache hit on the same connection
//! - Tracks active connections in a registry
//! - Drains in-flight requests on shutdown, then removes the socket file
//!
//! # Wire format
//!
//! ```text
//! → {"caller":"alice","query":"what is a monad","importance":"normal"}
//! ← {"ok":true,"request_id":"5f0c...","response":"...","decision":{...}}
//! → {"caller":"alice","query":"...","importance":"critical"}
//! ← {"ok":false,"error":"request from 'alice' to 'route' rejected by rate limiter","kind":"admission_rejected"}
//! ```
//!
//! Replies on one connection are written in completion order, not request
//! order.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn, Instrument};

use gateway_core::{CacheSource, Gateway, GatewayError, GatewayRequest, RouteDecision};

/// Connection identifier, unique for the lifetime of the server
pub type ConnectionId = u64;

/// Connection state tracking
struct ConnectionState {
    /// When the connection was established
    connected_at: Instant,
    /// Remote peer UID
    peer_uid: Option<u32>,
    /// Requests received so far
    requests: Arc<AtomicU64>,
    /// Handle to abort the connection task
    abort_handle: tokio::task::AbortHandle,
}

/// Configuration for the socket server
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Maximum number of concurrent connections
    pub max_connections: usize,
    /// Per-connection reply queue capacity
    pub reply_capacity: usize,
    /// How long shutdown waits for in-flight requests
    pub drain_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_connections: 100,
            reply_capacity: 64,
            drain_timeout: Duration::from_secs(5),
        }
    }
}

/// A request line that never reached the gateway
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The line was not a valid request object
    #[error("malformed request: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The query was empty or whitespace
    #[error("query must not be empty")]
    EmptyQuery,
}

impl ProtocolError {
    fn kind(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "bad_request",
            Self::EmptyQuery => "empty_query",
        }
    }
}

/// One reply line
#[derive(Debug, Serialize)]
pub struct Reply {
    /// Whether the gateway produced a response
    pub ok: bool,
    /// Gateway request id, for matching replies to log lines
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Answer text; empty when every model call failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    /// Cache tier that answered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached: Option<CacheSource>,
    /// Routing decision for non-cached answers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<RouteDecision>,
    /// Error message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Machine-readable error kind
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
}

impl Reply {
    fn failure(error: String, kind: &'static str) -> Self {
        Self {
            ok: false,
            request_id: None,
            response: None,
            cached: None,
            decision: None,
            error: Some(error),
            kind: Some(kind),
        }
    }

    fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"ok":false,"error":"failed to encode reply: {e}","kind":"internal"}}"#)
        })
    }
}

impl From<ProtocolError> for Reply {
    fn from(err: ProtocolError) -> Self {
        Self::failure(err.to_string(), err.kind())
    }
}

impl From<GatewayError> for Reply {
    fn from(err: GatewayError) -> Self {
        Self::failure(err.to_string(), err.kind())
    }
}

fn parse_request(line: &str) -> Result<GatewayRequest, ProtocolError> {
    let request: GatewayRequest = serde_json::from_str(line)?;
    if request.query.trim().is_empty() {
        return Err(ProtocolError::EmptyQuery);
    }
    Ok(request)
}

/// Answer one request line
pub async fn handle_line(gateway: &Gateway, line: &str) -> Reply {
    let request = match parse_request(line) {
        Ok(request) => request,
        Err(e) => {
            debug!(error = %e, "Rejecting request line");
            return e.into();
        }
    };

    match gateway.route(&request).await {
        Ok(answer) => Reply {
            ok: true,
            request_id: Some(answer.request_id.to_string()),
            response: Some(answer.response),
            cached: answer.cached,
            decision: answer.decision,
            error: None,
            kind: None,
        },
        Err(e) => {
            debug!(caller = %request.caller, kind = e.kind(), error = %e, "Request failed");
            e.into()
        }
    }
}

/// The socket server
pub struct GatewayServer {
    /// Path to the Unix socket
    socket_path: PathBuf,
    /// Shared gateway context
    gateway: Arc<Gateway>,
    /// Server configuration
    server_config: ServerConfig,
    /// Active connections
    connection_states: Arc<DashMap<ConnectionId, ConnectionState>>,
    next_connection_id: AtomicU64,
}

impl GatewayServer {
    /// Create a server with default limits
    pub fn new(socket_path: PathBuf, gateway: Arc<Gateway>) -> Self {
        Self::with_config(socket_path, gateway, ServerConfig::default())
    }

    /// Create a server with explicit limits
    pub fn with_config(
        socket_path: PathBuf,
        gateway: Arc<Gateway>,
        server_config: ServerConfig,
    ) -> Self {
        Self {
            socket_path,
            gateway,
            server_config,
            connection_states: Arc::new(DashMap::new()),
            next_connection_id: AtomicU64::new(1),
        }
    }

    /// Prepare the socket path (create directory, remove stale socket)
    async fn prepare_socket(&self) -> Result<()> {
        if let Some(parent) = self.socket_path.parent() {
            if !tokio::fs::try_exists(parent).await.unwrap_or(false) {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create socket directory: {parent:?}"))?;
                info!(path = ?parent, "Created socket directory");
            }
        }

        if tokio::fs::try_exists(&self.socket_path).await.unwrap_or(false) {
            warn!(path = ?self.socket_path, "Removing stale socket file");
            tokio::fs::remove_file(&self.socket_path)
                .await
                .with_context(|| format!("Failed to remove stale socket: {:?}", self.socket_path))?;
        }

        Ok(())
    }

    /// Accept connections until `shutdown` turns true
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        self.prepare_socket().await?;

        let listener = UnixListener::bind(&self.socket_path)
            .with_context(|| format!("Failed to bind to {:?}", self.socket_path))?;

        // Owner-only
        tokio::fs::set_permissions(
            &self.socket_path,
            std::os::unix::fs::PermissionsExt::from_mode(0o600),
        )
        .await
        .with_context(|| format!("Failed to restrict {:?}", self.socket_path))?;

        info!(path = ?self.socket_path, "Listening for connections");

        // SAFETY: getuid has no preconditions and cannot fail
        let our_uid = unsafe { libc::getuid() };
        let mut tasks = JoinSet::new();

        loop {
            // Reap finished handlers so the set does not grow without bound
            while tasks.try_join_next().is_some() {}

            if *shutdown.borrow() {
                info!("Shutdown requested, stopping accept loop");
                break;
            }

            let accepted = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        info!("Shutdown channel closed, stopping accept loop");
                        break;
                    }
                    None
                }
                accepted = listener.accept() => Some(accepted),
            };

            let stream = match accepted {
                Some(Ok((stream, _addr))) => stream,
                Some(Err(e)) => {
                    error!(error = %e, "Accept failed");
                    continue;
                }
                None => continue,
            };

            if self.connection_states.len() >= self.server_config.max_connections {
                warn!("Connection limit reached, rejecting new connection");
                drop(stream);
                continue;
            }

            let peer_uid = stream.peer_cred().ok().map(|cred| cred.uid());
            if let Some(uid) = peer_uid {
                if uid != our_uid && uid != 0 {
                    warn!(
                        peer_uid = uid,
                        our_uid = our_uid,
                        "Rejecting connection from different user"
                    );
                    drop(stream);
                    continue;
                }
            }

            let conn_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
            let requests = Arc::new(AtomicU64::new(0));

            info!(
                conn_id,
                peer_uid = ?peer_uid,
                active_connections = self.connection_states.len() + 1,
                "New connection accepted"
            );

            // The handler waits for `registered` so its final remove always
            // follows this insert
            let (registered_tx, registered_rx) = oneshot::channel();
            let abort_handle = tasks.spawn(
                Self::handle_connection(
                    conn_id,
                    stream,
                    registered_rx,
                    Arc::clone(&self.gateway),
                    Arc::clone(&requests),
                    self.server_config.reply_capacity,
                    Arc::clone(&self.connection_states),
                )
                .instrument(tracing::info_span!("connection", conn_id)),
            );

            self.connection_states.insert(
                conn_id,
                ConnectionState {
                    connected_at: Instant::now(),
                    peer_uid,
                    requests,
                    abort_handle,
                },
            );
            if registered_tx.send(()).is_err() {
                debug!(conn_id, "Connection task ended before registration");
                self.connection_states.remove(&conn_id);
            }
        }

        drop(listener);
        self.shutdown(tasks).await
    }

    /// Handle a single client connection
    ///
    /// Request lines are answered by spawned tasks that push replies into a
    /// per-connection queue; a single writer task owns the write half.
    async fn handle_connection(
        conn_id: ConnectionId,
        stream: UnixStream,
        registered: oneshot::Receiver<()>,
        gateway: Arc<Gateway>,
        requests: Arc<AtomicU64>,
        reply_capacity: usize,
        connection_states: Arc<DashMap<ConnectionId, ConnectionState>>,
    ) {
        if registered.await.is_err() {
            return;
        }
        debug!("Connection handler started");

        let (read_half, mut write_half) = stream.into_split();
        let (reply_tx, mut reply_rx) = mpsc::channel::<String>(reply_capacity);

        let writer = tokio::spawn(
            async move {
                while let Some(line) = reply_rx.recv().await {
                    if let Err(e) = write_half.write_all(line.as_bytes()).await {
                        warn!(error = %e, "Write error");
                        break;
                    }
                    if let Err(e) = write_half.write_all(b"\n").await {
                        warn!(error = %e, "Write error");
                        break;
                    }
                }
            }
            .in_current_span(),
        );

        let mut lines = BufReader::new(read_half).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    requests.fetch_add(1, Ordering::Relaxed);

                    let gateway = Arc::clone(&gateway);
                    let reply_tx = reply_tx.clone();
                    tokio::spawn(
                        async move {
                            let reply = handle_line(&gateway, &line).await;
                            if reply_tx.send(reply.to_line()).await.is_err() {
                                debug!("Connection closed before reply was written");
                            }
                        }
                        .in_current_span(),
                    );
                }
                Ok(None) => {
                    debug!("Client disconnected (EOF)");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Read error");
                    break;
                }
            }
        }

        // The writer exits once every in-flight request has replied
        drop(reply_tx);
        if let Err(e) = writer.await {
            warn!(error = %e, "Writer task failed");
        }

        connection_states.remove(&conn_id);
        info!(
            active_connections = connection_states.len(),
            "Connection handler finished"
        );
    }

    /// Graceful shutdown
    async fn shutdown(&self, mut tasks: JoinSet<()>) -> Result<()> {
        info!(
            active_connections = self.connection_states.len(),
            "Initiating graceful shutdown"
        );

        let drained = tokio::time::timeout(self.server_config.drain_timeout, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            for stats in self.connection_stats() {
                if let Some((_, state)) = self.connection_states.remove(&stats.id) {
                    warn!(
                        conn_id = stats.id,
                        peer_uid = ?stats.peer_uid,
                        requests = stats.requests,
                        uptime_secs = stats.uptime_secs,
                        "Aborting connection that did not drain"
                    );
                    state.abort_handle.abort();
                }
            }
            tasks.shutdown().await;
        }

        if tokio::fs::try_exists(&self.socket_path).await.unwrap_or(false) {
            tokio::fs::remove_file(&self.socket_path)
                .await
                .with_context(|| format!("Failed to remove socket: {:?}", self.socket_path))?;
            info!(path = ?self.socket_path, "Socket file removed");
        }

        info!("Shutdown complete");
        Ok(())
    }

    /// Get number of active connections
    pub fn connection_count(&self) -> usize {
        self.connection_states.len()
    }

    /// Get connection statistics
    pub fn connection_stats(&self) -> Vec<ConnectionStats> {
        self.connection_states
            .iter()
            .map(|r| {
                let state = r.value();
                ConnectionStats {
                    id: *r.key(),
                    peer_uid: state.peer_uid,
                    requests: state.requests.load(Ordering::Relaxed),
                    uptime_secs: state.connected_at.elapsed().as_secs(),
                }
            })
            .collect()
    }
}

/// Statistics for a single connection
#[derive(Debug, Clone)]
pub struct ConnectionStats {
    /// Connection id
    pub id: ConnectionId,
    /// Peer UID
    pub peer_uid: Option<u32>,
    /// Requests received
    pub requests: u64,
    /// Connection uptime in seconds
    pub uptime_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::GatewayConfig;

    fn offline_gateway() -> Arc<Gateway> {
        let mut config = GatewayConfig::default();
        config.rate_limit.enabled = false;
        Arc::new(Gateway::from_config(&config).unwrap())
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.max_connections, 100);
        assert_eq!(config.reply_capacity, 64);
        assert_eq!(config.drain_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_parse_request_applies_defaults() {
        let request = parse_request(r#"{"query":"hello"}"#).unwrap();
        assert_eq!(request.caller, "anonymous");
        assert_eq!(request.query, "hello");
    }

    #[test]
    fn test_parse_request_rejects_blank_query() {
        let err = parse_request(r#"{"caller":"a","query":"   "}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::EmptyQuery));
        assert_eq!(err.kind(), "empty_query");
    }

    #[test]
    fn test_failure_reply_omits_success_fields() {
        let reply: Reply = ProtocolError::EmptyQuery.into();
        let value: serde_json::Value = serde_json::from_str(&reply.to_line()).unwrap();
        assert_eq!(value["ok"], false);
        assert_eq!(value["kind"], "empty_query");
        assert!(value.get("response").is_none());
    }

    #[tokio::test]
    async fn test_malformed_line_gets_bad_request() {
        let gateway = offline_gateway();
        let reply = handle_line(&gateway, "not json").await;
        assert!(!reply.ok);
        assert_eq!(reply.kind, Some("bad_request"));
    }

    #[tokio::test]
    async fn test_round_trip_and_socket_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("nested").join("gateway.sock");

        let server = Arc::new(GatewayServer::new(socket_path.clone(), offline_gateway()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let run = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.run(shutdown_rx).await })
        };

        let stream = loop {
            match UnixStream::connect(&socket_path).await {
                Ok(stream) => break stream,
                Err(_) => tokio::task::yield_now().await,
            }
        };

        let (read_half, mut write_half) = stream.into_split();
        write_half
            .write_all(b"{\"query\":\"\"}\n\n{oops\n")
            .await
            .unwrap();

        let mut lines = BufReader::new(read_half).lines();
        let mut kinds = Vec::new();
        for _ in 0..2 {
            let line = lines.next_line().await.unwrap().unwrap();
            let value: serde_json::Value = serde_json::from_str(&line).unwrap();
            assert_eq!(value["ok"], false);
            kinds.push(value["kind"].as_str().unwrap().to_string());
        }
        kinds.sort();
        assert_eq!(kinds, vec!["bad_request", "empty_query"]);

        drop(write_half);
        assert!(lines.next_line().await.unwrap().is_none());

        shutdown_tx.send(true).unwrap();
        run.await.unwrap().unwrap();
        assert!(!socket_path.exists());
        assert_eq!(server.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_instant_disconnects_leave_no_stale_connections() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("gateway.sock");

        let server = Arc::new(GatewayServer::new(socket_path.clone(), offline_gateway()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let run = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.run(shutdown_rx).await })
        };

        let first = loop {
            match UnixStream::connect(&socket_path).await {
                Ok(stream) => break stream,
                Err(_) => tokio::task::yield_now().await,
            }
        };
        drop(first);
        for _ in 0..20 {
            drop(UnixStream::connect(&socket_path).await.unwrap());
        }

        // Connections are accepted in order, so a reply here means every
        // earlier one has been registered
        let witness = UnixStream::connect(&socket_path).await.unwrap();
        let (read_half, mut write_half) = witness.into_split();
        write_half.write_all(b"{oops\n").await.unwrap();
        let mut lines = BufReader::new(read_half).lines();
        assert!(lines.next_line().await.unwrap().is_some());
        drop(write_half);
        assert!(lines.next_line().await.unwrap().is_none());

        tokio::time::timeout(Duration::from_secs(5), async {
            while server.connection_count() > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        shutdown_tx.send(true).unwrap();
        run.await.unwrap().unwrap();
        assert_eq!(server.connection_count(), 0);
    }
}

//! WebSocket relay server.
//!
//! Accepts connections, gates them (id validation, token, origin, rate
//! limits) before any session state exists, and relays wire messages
//! between the other members of the same vault. The relay never inspects
//! document payloads beyond the routing envelope; CRDT state lives on the
//! clients.

use crate::config::RelayConfig;
use crate::connection::{ClientConnection, ConnectionEvent, IncomingMessage};
use crate::rate_limit::{RateLimitCategory, RateLimiter};
use crate::registry::{ServerSessionRegistry, SESSION_TIMEOUT};
use crate::validate::{token_matches, valid_user_id, valid_vault_id, DEFAULT_USER_ID};
use anyhow::Result;
use collab_core::protocol::WireMessage;
use collab_core::session::now_millis;
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tracing::{debug, error, info, warn};

/// Parameters presented by a connecting client.
#[derive(Debug, Default, Clone)]
pub struct ConnectParams {
    pub vault_id: Option<String>,
    pub user_id: Option<String>,
    pub token: Option<String>,
    pub origin: Option<String>,
}

impl ConnectParams {
    /// Extract from a request's query string and headers.
    fn from_request(request: &Request) -> Self {
        let mut params = Self::default();

        if let Some(query) = request.uri().query() {
            for pair in query.split('&') {
                let (key, value) = match pair.split_once('=') {
                    Some(kv) => kv,
                    None => continue,
                };
                if value.is_empty() {
                    continue;
                }
                match key {
                    "vaultId" => params.vault_id = Some(value.to_string()),
                    "userId" => params.user_id = Some(value.to_string()),
                    "token" => params.token = Some(value.to_string()),
                    _ => {}
                }
            }
        }

        params.origin = request
            .headers()
            .get("origin")
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        params
    }
}

/// Why the gate refused a connection. All map to close code 1008.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateRejection {
    InvalidVaultId,
    InvalidUserId,
    RateLimited,
    BadToken,
    InvalidOrigin,
    TooManyConnections,
}

impl GateRejection {
    pub fn reason(self) -> &'static str {
        match self {
            GateRejection::InvalidVaultId => "invalid vault id",
            GateRejection::InvalidUserId => "invalid user id",
            GateRejection::RateLimited => "rate limit exceeded",
            GateRejection::BadToken => "invalid token",
            GateRejection::InvalidOrigin => "invalid origin",
            GateRejection::TooManyConnections => "too many connections",
        }
    }
}

/// Run the full admission gate. Nothing here mutates the registry; session
/// state is created only after the gate passes.
pub fn gate(
    config: &RelayConfig,
    limiter: &mut RateLimiter,
    registry: &ServerSessionRegistry,
    params: &ConnectParams,
    ip: &str,
    now_ms: u64,
) -> Result<(String, String), GateRejection> {
    let vault_id = params
        .vault_id
        .as_deref()
        .filter(|v| valid_vault_id(v))
        .ok_or(GateRejection::InvalidVaultId)?;

    let user_id = params.user_id.as_deref().unwrap_or(DEFAULT_USER_ID);
    if !valid_user_id(user_id) {
        return Err(GateRejection::InvalidUserId);
    }

    if !limiter
        .check(ip, RateLimitCategory::Connection, now_ms)
        .allowed
    {
        return Err(GateRejection::RateLimited);
    }

    if let Some(expected) = &config.auth_token {
        if !limiter.check(ip, RateLimitCategory::Auth, now_ms).allowed {
            return Err(GateRejection::RateLimited);
        }
        let presented = params.token.as_deref().unwrap_or("");
        if !token_matches(expected, presented) {
            return Err(GateRejection::BadToken);
        }
    }

    if !config.origin_allowed(params.origin.as_deref()) {
        return Err(GateRejection::InvalidOrigin);
    }

    if registry.connections_for_ip(ip) >= config.max_connections_per_ip {
        return Err(GateRejection::TooManyConnections);
    }

    Ok((vault_id.to_string(), user_id.to_string()))
}

/// Event surfaced to the main loop after internal routing is done.
#[derive(Debug)]
pub enum RelayEvent {
    ClientLeft { connection_id: u64 },
}

/// The relay server state.
pub struct RelayServer {
    config: RelayConfig,
    registry: ServerSessionRegistry,
    limiter: RateLimiter,
    connections: HashMap<u64, ClientConnection>,
    /// Awareness client id last announced per connection, for `PeerGone`
    awareness_ids: HashMap<u64, u64>,
    next_conn_id: u64,
    event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    event_rx: mpsc::UnboundedReceiver<ConnectionEvent>,
}

impl RelayServer {
    pub fn new(config: RelayConfig) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            config,
            registry: ServerSessionRegistry::new(),
            limiter: RateLimiter::new(),
            connections: HashMap::new(),
            awareness_ids: HashMap::new(),
            next_conn_id: 1,
            event_tx,
            event_rx,
        }
    }

    pub fn registry(&self) -> &ServerSessionRegistry {
        &self.registry
    }

    /// Bind the listen socket.
    pub async fn bind(port: u16) -> Result<TcpListener> {
        let addr = format!("0.0.0.0:{}", port);
        let listener = TcpListener::bind(&addr).await?;
        info!("Relay listening on {}", addr);
        Ok(listener)
    }

    /// Handle a new incoming TCP connection: upgrade, gate, register.
    pub async fn accept_connection(&mut self, stream: TcpStream, addr: SocketAddr) {
        let mut params = ConnectParams::default();
        let ws_stream = match accept_hdr_async(stream, |request: &Request, response: Response| {
            params = ConnectParams::from_request(request);
            Ok(response)
        })
        .await
        {
            Ok(ws) => ws,
            Err(e) => {
                // Health checks connect and immediately close without a
                // WebSocket handshake; keep those quiet.
                debug!("WebSocket upgrade failed for {}: {}", addr, e);
                return;
            }
        };

        let ip = addr.ip().to_string();
        let now_ms = now_millis();

        let (vault_id, user_id) =
            match gate(&self.config, &mut self.limiter, &self.registry, &params, &ip, now_ms) {
                Ok(accepted) => accepted,
                Err(rejection) => {
                    warn!("Rejected connection from {}: {}", ip, rejection.reason());
                    let mut ws_stream = ws_stream;
                    let _ = ws_stream
                        .close(Some(CloseFrame {
                            code: CloseCode::Policy,
                            reason: rejection.reason().into(),
                        }))
                        .await;
                    return;
                }
            };

        let connection_id = self.next_conn_id;
        self.next_conn_id += 1;

        let conn = ClientConnection::new(connection_id, ws_stream, self.event_tx.clone());
        self.registry
            .register_session(connection_id, &vault_id, &user_id, &ip, now_ms);
        self.connections.insert(connection_id, conn);

        info!(
            "Client conn-{} joined vault {} as {} (from {})",
            connection_id, vault_id, user_id, ip
        );
    }

    /// Wait for the next relay event, routing messages internally.
    pub async fn poll_event(&mut self) -> Option<RelayEvent> {
        loop {
            let event = self.event_rx.recv().await?;
            match event {
                ConnectionEvent::Message(msg) => {
                    self.handle_message(msg).await;
                }
                ConnectionEvent::Closed { connection_id } => {
                    if self.handle_closed(connection_id).await {
                        return Some(RelayEvent::ClientLeft { connection_id });
                    }
                    // Already-removed connection (policy close); keep looping
                }
            }
        }
    }

    async fn handle_message(&mut self, msg: IncomingMessage) {
        let connection_id = msg.connection_id;
        let now_ms = now_millis();

        if self.registry.session(connection_id).is_none() {
            debug!("Dropping message from unknown conn-{}", connection_id);
            return;
        }

        let conn_key = format!("conn-{}", connection_id);
        if !self
            .limiter
            .check(&conn_key, RateLimitCategory::Message, now_ms)
            .allowed
        {
            warn!("conn-{} exceeded message rate limit, closing", connection_id);
            self.drop_connection(connection_id, "rate limit exceeded").await;
            return;
        }

        self.registry.touch(connection_id, now_ms);

        // Decode only the envelope; payload bytes stay opaque.
        let wire = match WireMessage::decode(&msg.data) {
            Ok(wire) => wire,
            Err(e) => {
                warn!("Undecodable message from conn-{}: {}", connection_id, e);
                return;
            }
        };

        if let WireMessage::Awareness(update) = &wire {
            self.awareness_ids.insert(connection_id, update.client_id);
        }

        debug!(
            "Relaying {} byte(s) from conn-{} ({:?})",
            msg.data.len(),
            connection_id,
            wire.doc_name()
        );
        self.broadcast_to_vault_peers(connection_id, &msg.data).await;
    }

    /// Handle a closed connection. Returns false when the connection was
    /// already cleaned up (e.g. a policy close).
    async fn handle_closed(&mut self, connection_id: u64) -> bool {
        if self.connections.remove(&connection_id).is_none() {
            return false;
        }

        // Tell the vault's remaining members to drop this peer's presence
        if let Some(client_id) = self.awareness_ids.remove(&connection_id) {
            if let Ok(bytes) = (WireMessage::PeerGone { client_id }).encode() {
                self.broadcast_to_vault_peers(connection_id, &bytes).await;
            }
        }

        if let Some(session) = self.registry.cleanup(connection_id) {
            info!(
                "Client conn-{} left vault {} ({})",
                connection_id, session.vault_id, session.user_id
            );
        }
        true
    }

    async fn broadcast_to_vault_peers(&self, connection_id: u64, data: &[u8]) {
        for peer_id in self.registry.vault_peers(connection_id) {
            let Some(conn) = self.connections.get(&peer_id) else {
                continue;
            };
            if let Err(e) = conn.send(data).await {
                warn!("Failed to relay to conn-{}: {}", peer_id, e);
            }
        }
    }

    /// Forcefully close a connection with 1008 and clean up its state.
    async fn drop_connection(&mut self, connection_id: u64, reason: &'static str) {
        if let Some(mut conn) = self.connections.remove(&connection_id) {
            conn.close_policy_violation(reason).await;
        }
        if let Some(client_id) = self.awareness_ids.remove(&connection_id) {
            if let Ok(bytes) = (WireMessage::PeerGone { client_id }).encode() {
                self.broadcast_to_vault_peers(connection_id, &bytes).await;
            }
        }
        self.registry.cleanup(connection_id);
    }

    /// Background sweep: evict inactive sessions and stale rate-limit
    /// records, closing the evicted sockets.
    pub async fn sweep(&mut self) {
        let now_ms = now_millis();
        for connection_id in self.registry.sweep_inactive(now_ms, SESSION_TIMEOUT) {
            if let Some(mut conn) = self.connections.remove(&connection_id) {
                conn.close_policy_violation("session timed out").await;
            }
            self.awareness_ids.remove(&connection_id);
        }
        self.limiter.sweep(now_ms);
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

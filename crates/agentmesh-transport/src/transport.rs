//! Peer transport: connection management, frame loop, and the sweeper

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex, RwLock};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, connect_async, WebSocketStream};
use tracing::{debug, info, warn};

use agentmesh_codec::{decode_frame, decode_response_payload, encode_frame};
use agentmesh_retry::backoff_delay;
use agentmesh_types::{LinkStatus, Packet, PendingPacket, Prepare, WireCode};

use crate::link::PeerLink;
use crate::pending::PendingTable;
use crate::TransportError;

/// Transport configuration; reconnection follows the shared backoff
/// primitive (1 s base, 30 s cap).
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub reconnect_base_ms: u64,
    pub reconnect_cap_ms: u64,
    /// Reconnection attempts before the link parks in `error`
    pub max_reconnect_attempts: u32,
    /// Sweep interval for expired pendings
    pub sweep_interval_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            reconnect_base_ms: 1_000,
            reconnect_cap_ms: 30_000,
            max_reconnect_attempts: 10,
            sweep_interval_ms: 1_000,
        }
    }
}

/// The node side of the transport: handles inbound prepares.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    /// Process one inbound prepare and produce the response frame.
    async fn on_prepare(&self, peer_id: &str, prepare: Prepare) -> Packet;
}

/// Manages every peer link plus the pending-packet table.
pub struct PeerTransport {
    config: TransportConfig,
    links: RwLock<HashMap<String, Arc<PeerLink>>>,
    pending: PendingTable,
    handler: RwLock<Option<Arc<dyn InboundHandler>>>,
}

impl PeerTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            links: RwLock::new(HashMap::new()),
            pending: PendingTable::new(),
            handler: RwLock::new(None),
        }
    }

    /// Wire the node in; must happen before any link is served.
    pub async fn set_handler(&self, handler: Arc<dyn InboundHandler>) {
        *self.handler.write().await = Some(handler);
    }

    pub fn pending(&self) -> &PendingTable {
        &self.pending
    }

    pub async fn link(&self, peer_id: &str) -> Option<Arc<PeerLink>> {
        self.links.read().await.get(peer_id).cloned()
    }

    pub async fn link_status(&self, peer_id: &str) -> Option<LinkStatus> {
        self.link(peer_id).await.map(|link| link.status())
    }

    /// Dial an outbound link; the task keeps it alive with backoff.
    pub async fn connect(
        self: &Arc<Self>,
        peer_id: &str,
        url: &str,
    ) -> Result<Arc<PeerLink>, TransportError> {
        let (tx, rx) = mpsc::channel(64);
        let link = Arc::new(PeerLink::new(peer_id, Some(url.to_string()), tx));
        self.links
            .write()
            .await
            .insert(peer_id.to_string(), link.clone());
        let transport = self.clone();
        let task_link = link.clone();
        tokio::spawn(async move {
            transport
                .run_outbound(task_link, Arc::new(AsyncMutex::new(rx)))
                .await;
        });
        Ok(link)
    }

    async fn run_outbound(
        self: Arc<Self>,
        link: Arc<PeerLink>,
        rx: Arc<AsyncMutex<mpsc::Receiver<String>>>,
    ) {
        let mut attempts: u32 = 0;
        loop {
            if link.is_shutdown() {
                break;
            }
            link.set_status(LinkStatus::Connecting);
            let url = match link.url() {
                Some(url) => url.to_string(),
                None => break,
            };
            match connect_async(url.as_str()).await {
                Ok((socket, _)) => {
                    info!(peer_id = %link.peer_id(), %url, "peer link connected");
                    link.set_status(LinkStatus::Connected);
                    // a successful open resets the attempt counter
                    attempts = 0;
                    let mut rx_guard = rx.lock().await;
                    self.drive_socket(&link, socket, &mut rx_guard).await;
                    link.set_status(LinkStatus::Disconnected);
                    info!(peer_id = %link.peer_id(), "peer link disconnected");
                }
                Err(error) => {
                    warn!(peer_id = %link.peer_id(), %error, "peer connect failed");
                }
            }
            if link.is_shutdown() {
                break;
            }
            attempts += 1;
            if attempts > self.config.max_reconnect_attempts {
                warn!(peer_id = %link.peer_id(), "reconnect attempts exhausted");
                link.set_status(LinkStatus::Error);
                link.wait_reconnect().await;
                if link.is_shutdown() {
                    break;
                }
                attempts = 0;
                continue;
            }
            let delay = backoff_delay(
                attempts - 1,
                self.config.reconnect_base_ms,
                self.config.reconnect_cap_ms,
            );
            tokio::time::sleep(delay).await;
        }
        link.set_status(LinkStatus::Disconnected);
    }

    /// Shared frame loop for outbound and inbound sockets.
    async fn drive_socket<S>(
        &self,
        link: &Arc<PeerLink>,
        socket: WebSocketStream<S>,
        rx: &mut mpsc::Receiver<String>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut sink, mut stream) = socket.split();
        loop {
            tokio::select! {
                frame = rx.recv() => match frame {
                    Some(text) => {
                        if sink.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        // link closed: drain politely
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                },
                message = stream.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(response) = self.handle_frame(link.peer_id(), &text).await {
                            if sink.send(Message::Text(response)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = sink.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        warn!(peer_id = %link.peer_id(), %error, "peer link read error");
                        break;
                    }
                },
            }
        }
    }

    /// Decode one frame and route it: prepares go to the handler, responses
    /// complete pendings. A parse error becomes an `F01` reject; the link
    /// is not torn down.
    async fn handle_frame(&self, peer_id: &str, text: &str) -> Option<String> {
        let packet = match decode_frame(text) {
            Ok(packet) => packet,
            Err(error) => {
                debug!(peer_id, %error, "unparseable frame");
                return encode_frame(&Packet::reject_code(WireCode::F01)).ok();
            }
        };
        match packet {
            Packet::Prepare(prepare) => {
                let handler = self.handler.read().await.clone();
                let response = match handler {
                    Some(handler) => handler.on_prepare(peer_id, prepare).await,
                    None => Packet::reject_code(WireCode::F99),
                };
                encode_frame(&response).ok()
            }
            response @ (Packet::Fulfill(_) | Packet::Reject(_)) => {
                let event_id = match &response {
                    Packet::Fulfill(fulfill) => fulfill.data.as_deref(),
                    Packet::Reject(reject) => reject.data.as_deref(),
                    Packet::Prepare(_) => None,
                }
                .and_then(|data| decode_response_payload(data).ok())
                .map(|payload| payload.event_id);
                if self
                    .pending
                    .complete(peer_id, event_id.as_deref(), response)
                    .is_none()
                {
                    debug!(peer_id, "uncorrelated response dropped");
                }
                None
            }
        }
    }

    /// Send a prepare and register its pending record.
    ///
    /// The record is created before the frame is written; the returned
    /// receiver resolves with the fulfill, the reject, or the sweeper's
    /// `R02`.
    pub async fn send_prepare(
        &self,
        peer_id: &str,
        event_id: &str,
        prepare: Prepare,
    ) -> Result<oneshot::Receiver<Packet>, TransportError> {
        let link = self
            .link(peer_id)
            .await
            .ok_or_else(|| TransportError::NotConnected {
                peer_id: peer_id.to_string(),
            })?;
        let record = PendingPacket {
            peer_id: peer_id.to_string(),
            event_id: event_id.to_string(),
            destination: prepare.destination.clone(),
            amount: prepare.amount,
            sent_at: Utc::now(),
            expires_at: prepare.expires_at,
        };
        let receiver = self
            .pending
            .insert(record)
            .ok_or_else(|| TransportError::DuplicatePending {
                peer_id: peer_id.to_string(),
                event_id: event_id.to_string(),
            })?;
        let frame = encode_frame(&Packet::Prepare(prepare))?;
        if let Err(error) = link.send_frame(frame).await {
            // undo the pending so the sweeper never sees a phantom
            self.pending
                .complete(peer_id, Some(event_id), Packet::reject_code(WireCode::F02));
            return Err(error);
        }
        Ok(receiver)
    }

    /// Accept inbound links on `bind_addr`; returns the bound address.
    pub async fn listen(self: &Arc<Self>, bind_addr: &str) -> Result<SocketAddr, TransportError> {
        let listener = TcpListener::bind(bind_addr).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "peer listener started");
        let transport = self.clone();
        tokio::spawn(async move {
            loop {
                let (tcp, remote) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(error) => {
                        warn!(%error, "accept failed");
                        continue;
                    }
                };
                let transport = transport.clone();
                tokio::spawn(async move {
                    let socket = match accept_async(tcp).await {
                        Ok(socket) => socket,
                        Err(error) => {
                            warn!(%remote, %error, "websocket handshake failed");
                            return;
                        }
                    };
                    let peer_id = format!("in:{remote}");
                    let (tx, mut rx) = mpsc::channel(64);
                    let link = Arc::new(PeerLink::new(peer_id.clone(), None, tx));
                    link.set_status(LinkStatus::Connected);
                    transport
                        .links
                        .write()
                        .await
                        .insert(peer_id.clone(), link.clone());
                    info!(peer_id = %peer_id, "inbound peer link accepted");
                    transport.drive_socket(&link, socket, &mut rx).await;
                    link.set_status(LinkStatus::Disconnected);
                    transport.links.write().await.remove(&peer_id);
                });
            }
        });
        Ok(local_addr)
    }

    /// Spawn the timeout sweeper.
    pub fn spawn_sweeper(self: &Arc<Self>) {
        let transport = self.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_millis(transport.config.sweep_interval_ms));
            loop {
                interval.tick().await;
                let swept = transport.pending.sweep_expired(Utc::now());
                if !swept.is_empty() {
                    warn!(count = swept.len(), "expired pending prepares rejected");
                }
            }
        });
    }

    /// Close every link: send close frames, drain, and forget.
    pub async fn shutdown(&self) {
        let links: Vec<_> = self.links.write().await.drain().collect();
        for (_, link) in links {
            link.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentmesh_codec::{encode_response_payload, ResponsePayload};
    use agentmesh_types::Fulfill;

    struct EchoHandler;

    #[async_trait]
    impl InboundHandler for EchoHandler {
        async fn on_prepare(&self, _peer_id: &str, prepare: Prepare) -> Packet {
            // echo the correlation id back, the way the node does
            let payload = ResponsePayload {
                event_id: prepare.data.clone(),
                events: Vec::new(),
            };
            Packet::Fulfill(Fulfill {
                fulfillment: "ZnVsZmlsbG1lbnQ=".into(),
                data: encode_response_payload(&payload).ok(),
            })
        }
    }

    fn prepare(event_id: &str, expires_in_secs: i64) -> Prepare {
        Prepare {
            amount: 10,
            destination: "g.agent.b".into(),
            execution_condition: "Y29uZA==".into(),
            expires_at: Utc::now() + chrono::Duration::seconds(expires_in_secs),
            // tests smuggle the correlation id through the data field
            data: event_id.to_string(),
        }
    }

    #[tokio::test]
    async fn test_round_trip_over_loopback() {
        let server = Arc::new(PeerTransport::new(TransportConfig::default()));
        server.set_handler(Arc::new(EchoHandler)).await;
        let addr = server.listen("127.0.0.1:0").await.unwrap();

        let client = Arc::new(PeerTransport::new(TransportConfig::default()));
        client.set_handler(Arc::new(EchoHandler)).await;
        let link = client
            .connect("peer-b", &format!("ws://{addr}"))
            .await
            .unwrap();

        // wait for the link to come up
        for _ in 0..100 {
            if link.status() == LinkStatus::Connected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(link.status(), LinkStatus::Connected);

        let receiver = client
            .send_prepare("peer-b", "ev1", prepare("ev1", 30))
            .await
            .unwrap();
        let response = tokio::time::timeout(Duration::from_secs(5), receiver)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(response, Packet::Fulfill(_)));
        assert!(client.pending().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_in_flight_prepare_is_refused() {
        let server = Arc::new(PeerTransport::new(TransportConfig::default()));
        server.set_handler(Arc::new(EchoHandler)).await;
        let addr = server.listen("127.0.0.1:0").await.unwrap();

        let client = Arc::new(PeerTransport::new(TransportConfig::default()));
        let _link = client
            .connect("peer-b", &format!("ws://{addr}"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let _rx = client
            .send_prepare("peer-b", "ev1", prepare("ev1", 300))
            .await
            .unwrap();
        let second = client
            .send_prepare("peer-b", "ev1", prepare("ev1", 300))
            .await;
        assert!(matches!(
            second,
            Err(TransportError::DuplicatePending { .. })
        ));
    }

    #[tokio::test]
    async fn test_send_to_unknown_peer_fails() {
        let transport = Arc::new(PeerTransport::new(TransportConfig::default()));
        let result = transport
            .send_prepare("ghost", "ev1", prepare("ev1", 30))
            .await;
        assert!(matches!(result, Err(TransportError::NotConnected { .. })));
    }

    #[tokio::test]
    async fn test_exhausted_reconnects_park_in_error() {
        let config = TransportConfig {
            reconnect_base_ms: 1,
            reconnect_cap_ms: 2,
            max_reconnect_attempts: 1,
            ..Default::default()
        };
        let transport = Arc::new(PeerTransport::new(config));
        // nothing listens here
        let link = transport
            .connect("peer-b", "ws://127.0.0.1:1")
            .await
            .unwrap();
        for _ in 0..200 {
            if link.status() == LinkStatus::Error {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(link.status(), LinkStatus::Error);
    }
}

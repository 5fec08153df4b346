//! Per-peer link handle

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};

use agentmesh_types::LinkStatus;

use crate::TransportError;

/// Handle to one peer link.
///
/// The socket task lives elsewhere; this handle carries the outbound
/// queue, the status flag, and the manual-reconnect trigger.
pub struct PeerLink {
    peer_id: String,
    /// Dial URL; inbound links have none
    url: Option<String>,
    status: Mutex<LinkStatus>,
    outbound: Mutex<Option<mpsc::Sender<String>>>,
    reconnect: Notify,
    shutdown: AtomicBool,
}

impl PeerLink {
    pub(crate) fn new(
        peer_id: impl Into<String>,
        url: Option<String>,
        outbound: mpsc::Sender<String>,
    ) -> Self {
        Self {
            peer_id: peer_id.into(),
            url,
            status: Mutex::new(LinkStatus::Connecting),
            outbound: Mutex::new(Some(outbound)),
            reconnect: Notify::new(),
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn status(&self) -> LinkStatus {
        *self.status.lock()
    }

    pub(crate) fn set_status(&self, status: LinkStatus) {
        *self.status.lock() = status;
    }

    /// Queue an encoded frame for the socket task.
    pub async fn send_frame(&self, frame: String) -> Result<(), TransportError> {
        let sender = self
            .outbound
            .lock()
            .clone()
            .ok_or_else(|| TransportError::LinkClosed {
                peer_id: self.peer_id.clone(),
            })?;
        sender
            .send(frame)
            .await
            .map_err(|_| TransportError::LinkClosed {
                peer_id: self.peer_id.clone(),
            })
    }

    /// Manually restart reconnection after the attempt budget ran out.
    pub fn reconnect(&self) {
        self.reconnect.notify_one();
    }

    pub(crate) async fn wait_reconnect(&self) {
        self.reconnect.notified().await;
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Stop the link: the socket task sends a close frame and exits.
    pub fn close(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        // dropping the sender ends the writer side of the socket loop
        self.outbound.lock().take();
        self.reconnect.notify_one();
    }
}

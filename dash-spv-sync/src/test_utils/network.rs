use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dashcore::network::message::NetworkMessage;
use tokio::sync::Notify;

use crate::network::{Peer, PeerHandle, PeerManager};
use crate::types::PeerId;

/// Peer that records everything queued to it.
#[derive(Debug)]
pub struct MockPeer {
    id: PeerId,
    height: AtomicI32,
    sent: Mutex<Vec<NetworkMessage>>,
    disconnected: AtomicBool,
}

impl MockPeer {
    /// Create a peer advertising `height`.
    pub fn new(id: u64, height: i32) -> Arc<Self> {
        Arc::new(Self {
            id: PeerId(id),
            height: AtomicI32::new(height),
            sent: Mutex::new(Vec::new()),
            disconnected: AtomicBool::new(false),
        })
    }

    pub fn set_height(&self, height: i32) {
        self.height.store(height, Ordering::SeqCst);
    }

    /// Every message queued so far, oldest first.
    pub fn sent_messages(&self) -> Vec<NetworkMessage> {
        self.sent.lock().unwrap().clone()
    }

    /// Number of queued messages with command `cmd`.
    pub fn sent_count(&self, cmd: &str) -> usize {
        self.sent.lock().unwrap().iter().filter(|m| m.cmd() == cmd).count()
    }

    pub fn clear_sent(&self) {
        self.sent.lock().unwrap().clear();
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }
}

impl Peer for MockPeer {
    fn id(&self) -> PeerId {
        self.id
    }

    fn last_advertised_height(&self) -> i32 {
        self.height.load(Ordering::SeqCst)
    }

    fn queue_message(&self, message: NetworkMessage) {
        self.sent.lock().unwrap().push(message);
    }

    fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }
}

/// Peer manager with a settable download peer.
#[derive(Default)]
pub struct MockPeerManager {
    download_peer: Mutex<Option<PeerHandle>>,
    connected: Mutex<Vec<PeerHandle>>,
    more_blocks: AtomicBool,
    checked_heights: Mutex<Vec<u32>>,
    download_checks: AtomicUsize,
    download_check_gate: Mutex<Option<Arc<Notify>>>,
}

impl MockPeerManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect `peer`, making it the download peer if `download` is set.
    pub fn add_peer(&self, peer: PeerHandle, download: bool) {
        if download {
            *self.download_peer.lock().unwrap() = Some(peer.clone());
        }
        self.connected.lock().unwrap().push(peer);
    }

    pub fn set_download_peer(&self, peer: Option<PeerHandle>) {
        *self.download_peer.lock().unwrap() = peer;
    }

    /// Answer for subsequent `check_for_more_blocks` calls.
    pub fn set_more_blocks(&self, more: bool) {
        self.more_blocks.store(more, Ordering::SeqCst);
    }

    /// Heights passed to `check_for_more_blocks` so far.
    pub fn checked_heights(&self) -> Vec<u32> {
        self.checked_heights.lock().unwrap().clone()
    }

    /// Make the next `is_download_peer` call wait until the returned handle
    /// is notified.
    pub fn hold_next_download_check(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.download_check_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Number of `is_download_peer` calls started so far.
    pub fn download_checks(&self) -> usize {
        self.download_checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerManager for MockPeerManager {
    async fn check_for_more_blocks(&self, height: u32) -> bool {
        self.checked_heights.lock().unwrap().push(height);
        self.more_blocks.load(Ordering::SeqCst)
    }

    async fn download_peer(&self) -> Option<PeerHandle> {
        self.download_peer.lock().unwrap().clone()
    }

    async fn connected_peers(&self) -> Vec<PeerHandle> {
        self.connected.lock().unwrap().clone()
    }

    async fn is_download_peer(&self, peer: &dyn Peer) -> bool {
        self.download_checks.fetch_add(1, Ordering::SeqCst);
        let gate = self.download_check_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.download_peer().await.is_some_and(|p| p.id() == peer.id())
    }
}

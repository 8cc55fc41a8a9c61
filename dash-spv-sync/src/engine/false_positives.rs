//! Per-peer false positive tracking.

use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

use super::SyncEngine;
use crate::network::{PeerHandle, PeerManager};
use crate::storage::{HeaderStore, TxStore};

impl<H, T, P> SyncEngine<H, T, P>
where
    H: HeaderStore + 'static,
    T: TxStore + 'static,
    P: PeerManager + 'static,
{
    /// Consume false positive events until `quit` is cancelled.
    pub(crate) async fn track_false_positives(
        &self,
        mut events: UnboundedReceiver<PeerHandle>,
        quit: CancellationToken,
    ) {
        tracing::debug!("False positive tracker started");
        loop {
            tokio::select! {
                biased;
                _ = quit.cancelled() => break,
                event = events.recv() => match event {
                    Some(peer) => self.on_false_positive(peer).await,
                    None => break,
                },
            }
        }
        tracing::debug!("False positive tracker stopped");
    }

    /// Count a false positive for `peer`, refreshing its filter once the
    /// count exceeds the configured threshold.
    async fn on_false_positive(&self, peer: PeerHandle) {
        let threshold = self.config.false_positive_threshold;
        let refresh = self.state.lock().await.record_false_positive(peer.id(), threshold);

        if refresh {
            self.send_filter(peer.as_ref()).await;
            tracing::debug!("Reset false positives for {} after {}", peer.id(), threshold + 1);
        }
    }
}

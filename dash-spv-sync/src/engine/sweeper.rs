//! Stale transaction sweeping.

use std::time::Instant;

use chrono::{DateTime, Utc};

use super::SyncEngine;
use crate::network::PeerManager;
use crate::storage::{HeaderStore, TxStore};
use crate::types::TxRecord;

impl<H, T, P> SyncEngine<H, T, P>
where
    H: HeaderStore + 'static,
    T: TxStore + 'static,
    P: PeerManager + 'static,
{
    /// Mark every unconfirmed transaction older than the configured maximum
    /// age as dead. Returns how many transactions were marked.
    pub async fn sweep_stale_transactions(&self) -> usize {
        self.sweep_stale_transactions_at(Utc::now()).await
    }

    /// Sweep as if the current time were `now`.
    pub async fn sweep_stale_transactions_at(&self, now: DateTime<Utc>) -> usize {
        if let Some(ttl) = self.config.pending_index_ttl {
            let evicted = self.state.lock().await.evict_older_than(ttl, Instant::now());
            if evicted > 0 {
                tracing::debug!("Evicted {} expired pending height entries", evicted);
            }
        }

        let records = match self.txs.all_transactions(false).await {
            Ok(records) => records,
            Err(e) => {
                tracing::error!("Error loading transactions for sweep: {}", e);
                return 0;
            }
        };

        let mut marked = 0;
        // Newest first.
        for record in records.iter().rev() {
            if !self.is_stale(record, now) {
                continue;
            }
            match self.txs.mark_dead(&record.txid).await {
                Ok(()) => {
                    tracing::info!(
                        "Marking tx {} as dead, unconfirmed since {}",
                        record.txid,
                        record.timestamp
                    );
                    marked += 1;
                }
                Err(e) => tracing::error!("Error marking tx {} as dead: {}", record.txid, e),
            }
        }

        if marked > 0 {
            self.state.lock().await.stats_mut().transactions_marked_dead += marked as u64;
        }
        marked
    }

    fn is_stale(&self, record: &TxRecord, now: DateTime<Utc>) -> bool {
        record.is_unconfirmed()
            && (now - record.timestamp)
                .to_std()
                .is_ok_and(|age| age > self.config.max_unconfirmed_age)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;

    use crate::config::SyncConfig;
    use crate::test_utils::{pay_to, test_script, TestHarness};

    #[tokio::test]
    async fn test_old_unconfirmed_transactions_are_marked_dead() {
        let harness = TestHarness::new(SyncConfig::default(), 0).await;
        let now = Utc::now();
        let old = pay_to(test_script(1), 1);
        let young = pay_to(test_script(2), 2);
        let confirmed = pay_to(test_script(3), 3);
        harness.txs.insert(old.clone(), 0, now - chrono::Duration::days(8)).await;
        harness.txs.insert(young.clone(), 0, now - chrono::Duration::days(2)).await;
        harness.txs.insert(confirmed.clone(), 5, now - chrono::Duration::days(30)).await;

        assert_eq!(harness.engine.sweep_stale_transactions_at(now).await, 1);

        assert!(harness.txs.record(&old.txid()).await.unwrap().dead);
        assert!(!harness.txs.record(&young.txid()).await.unwrap().dead);
        assert!(!harness.txs.record(&confirmed.txid()).await.unwrap().dead);
        assert_eq!(harness.engine.stats().await.transactions_marked_dead, 1);
    }

    #[tokio::test]
    async fn test_sweep_continues_past_a_failed_mark() {
        let harness = TestHarness::new(SyncConfig::default(), 0).await;
        let now = Utc::now();
        let txs: Vec<_> = (1..=3u8).map(|n| pay_to(test_script(n), u64::from(n))).collect();
        for tx in &txs {
            harness.txs.insert(tx.clone(), 0, now - chrono::Duration::days(10)).await;
        }
        // Swept newest first, so the failure comes before the other two.
        harness.txs.set_fail_mark_dead(txs[2].txid());

        assert_eq!(harness.engine.sweep_stale_transactions_at(now).await, 2);

        assert!(harness.txs.record(&txs[0].txid()).await.unwrap().dead);
        assert!(harness.txs.record(&txs[1].txid()).await.unwrap().dead);
        assert!(!harness.txs.record(&txs[2].txid()).await.unwrap().dead);
        assert_eq!(harness.engine.stats().await.transactions_marked_dead, 2);
    }

    #[tokio::test]
    async fn test_sweep_is_idempotent() {
        let harness = TestHarness::new(SyncConfig::default(), 0).await;
        let now = Utc::now();
        harness.txs.insert(pay_to(test_script(1), 1), 0, now - chrono::Duration::days(10)).await;

        assert_eq!(harness.engine.sweep_stale_transactions_at(now).await, 1);
        assert_eq!(harness.engine.sweep_stale_transactions_at(now).await, 0);
    }

    #[tokio::test]
    async fn test_future_timestamps_are_not_stale() {
        let harness = TestHarness::new(SyncConfig::default(), 0).await;
        let now = Utc::now();
        harness.txs.insert(pay_to(test_script(1), 1), 0, now + chrono::Duration::days(10)).await;

        assert_eq!(harness.engine.sweep_stale_transactions_at(now).await, 0);
    }

    #[tokio::test]
    async fn test_sweep_evicts_expired_pending_heights() {
        let config = SyncConfig::default().with_pending_index_ttl(Duration::from_millis(10));
        let harness = TestHarness::new(config, 0).await;
        let txid = pay_to(test_script(1), 1).txid();
        harness.engine.state.lock().await.record_pending(txid, 1, std::time::Instant::now());

        tokio::time::sleep(Duration::from_millis(50)).await;
        harness.engine.sweep_stale_transactions().await;

        assert_eq!(harness.engine.pending_height(&txid).await, None);
    }

    #[tokio::test]
    async fn test_pending_heights_kept_without_ttl() {
        let harness = TestHarness::new(SyncConfig::default(), 0).await;
        let txid = pay_to(test_script(1), 1).txid();
        harness.engine.state.lock().await.record_pending(txid, 1, std::time::Instant::now());

        harness.engine.sweep_stale_transactions().await;

        assert_eq!(harness.engine.pending_height(&txid).await, Some(1));
    }
}

//! Per-worker telemetry fan-out
//!
//! Every activated worker gets one owned, bounded mailbox and one dedicated
//! consumer task. `process_heartbeat` never blocks the RPC handler: a full
//! mailbox drops the heartbeat and logs a warning (heartbeats are periodic
//! and idempotent, so a drop is harmless). The consumer republishes each
//! processed sample on a shared broadcast channel for external subscribers.

use shared::telemetry::{HeartbeatSample, TelemetryRecord, TelemetryUpdate};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

struct WorkerMailbox {
    sender: mpsc::Sender<HeartbeatSample>,
    consumer: JoinHandle<()>,
}

/// Owns one mailbox + consumer per active worker, plus the deep-copyable
/// telemetry records the consumers write into.
pub struct TelemetryManager {
    mailbox_capacity: usize,
    mailboxes: StdMutex<HashMap<String, WorkerMailbox>>,
    records: Arc<RwLock<HashMap<String, TelemetryRecord>>>,
    updates_tx: broadcast::Sender<TelemetryUpdate>,
}

impl TelemetryManager {
    pub fn new(mailbox_capacity: usize) -> Self {
        let (updates_tx, _) = broadcast::channel(256);
        TelemetryManager {
            mailbox_capacity,
            mailboxes: StdMutex::new(HashMap::new()),
            records: Arc::new(RwLock::new(HashMap::new())),
            updates_tx,
        }
    }

    /// Subscribes to the broadcast of processed telemetry updates (e.g. for
    /// an admin dashboard or a test harness).
    pub fn subscribe(&self) -> broadcast::Receiver<TelemetryUpdate> {
        self.updates_tx.subscribe()
    }

    /// Creates the mailbox and consumer task for a newly-activated worker.
    /// Idempotent: re-registering an already-known worker tears down and
    /// replaces its old mailbox/consumer.
    pub fn register_worker(&self, worker_id: &str) {
        self.unregister_worker(worker_id);

        let (tx, mut rx) = mpsc::channel::<HeartbeatSample>(self.mailbox_capacity);
        let records = Arc::clone(&self.records);
        let updates_tx = self.updates_tx.clone();
        let worker_id_owned = worker_id.to_string();

        records
            .write()
            .unwrap()
            .insert(worker_id.to_string(), TelemetryRecord::empty(worker_id));

        let consumer = tokio::spawn(async move {
            while let Some(sample) = rx.recv().await {
                {
                    let mut records = records.write().unwrap();
                    let record = records
                        .entry(worker_id_owned.clone())
                        .or_insert_with(|| TelemetryRecord::empty(worker_id_owned.clone()));
                    record.last_heartbeat = sample.received_at;
                    record.latest_sample = Some(sample.clone());
                }
                // Closed-channel sends (no subscribers yet) are expected and harmless.
                let _ = updates_tx.send(TelemetryUpdate {
                    worker_id: worker_id_owned.clone(),
                    sample,
                });
            }
            debug!(worker_id = %worker_id_owned, "telemetry consumer exiting");
        });

        self.mailboxes
            .lock()
            .unwrap()
            .insert(worker_id.to_string(), WorkerMailbox { sender: tx, consumer });
    }

    /// Hands a heartbeat off to the worker's mailbox without blocking. Drops
    /// and logs a warning if the mailbox is full or the worker is unknown.
    pub fn process_heartbeat(&self, worker_id: &str, sample: HeartbeatSample) {
        let sender = {
            let mailboxes = self.mailboxes.lock().unwrap();
            mailboxes.get(worker_id).map(|m| m.sender.clone())
        };
        let Some(sender) = sender else {
            warn!(worker_id = %worker_id, "heartbeat for worker with no telemetry mailbox, dropping");
            return;
        };
        if let Err(mpsc::error::TrySendError::Full(_)) = sender.try_send(sample) {
            warn!(worker_id = %worker_id, "telemetry mailbox full, dropping heartbeat");
        }
    }

    /// Returns a deep copy of the worker's telemetry record; callers never
    /// observe torn state.
    pub fn get_worker_telemetry(&self, worker_id: &str) -> Option<TelemetryRecord> {
        self.records.read().unwrap().get(worker_id).cloned()
    }

    /// Closes the mailbox, signaling the consumer to exit once it drains
    /// what's already queued. The consumer is not aborted: it runs to
    /// completion on whatever is already in flight, same as `shutdown`.
    pub fn unregister_worker(&self, worker_id: &str) {
        if let Some(mailbox) = self.mailboxes.lock().unwrap().remove(worker_id) {
            drop(mailbox.sender);
            drop(mailbox.consumer);
        }
        self.records.write().unwrap().remove(worker_id);
    }

    /// Shutdown: closes every mailbox and joins every consumer within the
    /// given grace period.
    pub async fn shutdown(&self, grace: std::time::Duration) {
        let handles: Vec<JoinHandle<()>> = {
            let mut mailboxes = self.mailboxes.lock().unwrap();
            mailboxes.drain().map(|(_, m)| m.consumer).collect()
        };
        let joined = futures_util::future::join_all(
            handles.into_iter().map(|h| tokio::time::timeout(grace, h)),
        );
        for result in joined.await {
            if result.is_err() {
                warn!("telemetry consumer did not exit within grace period");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(t: f64) -> HeartbeatSample {
        HeartbeatSample {
            cpu_usage: 0.5,
            mem_usage: 0.5,
            gpu_usage: 0.0,
            running_tasks: vec![],
            received_at: t,
        }
    }

    #[tokio::test]
    async fn test_process_heartbeat_updates_record() {
        let manager = TelemetryManager::new(10);
        manager.register_worker("w1");
        manager.process_heartbeat("w1", sample(100.0));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let record = manager.get_worker_telemetry("w1").unwrap();
        assert_eq!(record.last_heartbeat, 100.0);
    }

    #[tokio::test]
    async fn test_unregister_worker_clears_record() {
        let manager = TelemetryManager::new(10);
        manager.register_worker("w1");
        manager.process_heartbeat("w1", sample(1.0));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        manager.unregister_worker("w1");
        assert!(manager.get_worker_telemetry("w1").is_none());
    }

    #[tokio::test]
    async fn test_heartbeat_for_unknown_worker_is_dropped_not_panicking() {
        let manager = TelemetryManager::new(10);
        manager.process_heartbeat("ghost", sample(1.0));
    }

    #[tokio::test]
    async fn test_full_mailbox_drops_without_blocking() {
        let manager = TelemetryManager::new(1);
        manager.register_worker("w1");
        // Fire more heartbeats than capacity in a tight loop; none should panic
        // or block the caller.
        for i in 0..20 {
            manager.process_heartbeat("w1", sample(i as f64));
        }
    }

    #[tokio::test]
    async fn test_subscribe_receives_broadcast_updates() {
        let manager = TelemetryManager::new(10);
        manager.register_worker("w1");
        let mut rx = manager.subscribe();
        manager.process_heartbeat("w1", sample(42.0));
        let update = rx.recv().await.unwrap();
        assert_eq!(update.worker_id, "w1");
        assert_eq!(update.sample.received_at, 42.0);
    }
}

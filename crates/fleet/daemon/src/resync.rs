//! Periodic resync of every registered cluster.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use fleet_controller::Enqueuer;
use fleet_types::WorkspaceKey;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Enqueue every cluster in `clusters` each `period`, starting immediately,
/// until `cancel` fires.
pub async fn run_resync(
    enqueuer: Arc<dyn Enqueuer>,
    clusters: Arc<DashSet<WorkspaceKey>>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(period_secs = period.as_secs(), "Resync started");

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let keys: Vec<WorkspaceKey> = clusters.iter().map(|key| key.key().clone()).collect();
                debug!(clusters = keys.len(), "Resyncing clusters");

                for key in keys {
                    if let Err(e) = enqueuer.enqueue_key(key.as_str()) {
                        warn!(cluster = %key, error = %e, "Failed to enqueue cluster for resync");
                    }
                }
            }
        }
    }

    info!("Resync stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_controller::{ControllerResult, WorkspaceScoped};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingEnqueuer {
        keys: Mutex<Vec<String>>,
    }

    impl Enqueuer for RecordingEnqueuer {
        fn enqueue_key(&self, key: &str) -> ControllerResult<()> {
            self.keys.lock().unwrap().push(key.to_string());
            Ok(())
        }

        fn enqueue_after(&self, key: &str, _delay: Duration) -> ControllerResult<()> {
            self.enqueue_key(key)
        }

        fn enqueue_object(&self, object: &dyn WorkspaceScoped) -> bool {
            object
                .workspace_key()
                .map(|key| self.enqueue_key(key.as_str()).is_ok())
                .unwrap_or(false)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_resync_enqueues_every_cluster_each_period() {
        let enqueuer = Arc::new(RecordingEnqueuer::default());
        let clusters = Arc::new(DashSet::new());
        clusters.insert(WorkspaceKey::parse("team-a|clusters/east").unwrap());
        clusters.insert(WorkspaceKey::parse("team-b|clusters/west").unwrap());
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(run_resync(
            enqueuer.clone(),
            clusters.clone(),
            Duration::from_secs(30),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(enqueuer.keys.lock().unwrap().len(), 2);

        clusters.insert(WorkspaceKey::parse("team-a|clusters/north").unwrap());
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(enqueuer.keys.lock().unwrap().len(), 5);

        cancel.cancel();
        handle.await.unwrap();
    }
}

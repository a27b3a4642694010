use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::store::ConversationStore;

/// Background task that periodically expires idle conversations.
///
/// Owned by whoever starts it; dropped tasks keep running until the token
/// is cancelled.
pub struct SessionJanitor {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl SessionJanitor {
    pub fn start(
        store: Arc<ConversationStore>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            info!("Session janitor started (every {:?})", interval);
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        info!("Session janitor cancelled");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = store.expire_idle(chrono::Utc::now()).await {
                            warn!("Session cleanup failed: {}", e);
                        }
                    }
                }
            }
        });

        Self { cancel, handle }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Cancel the task and wait for it to exit.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!("Session janitor task failed: {}", e);
        }
    }
}

//! Background task that periodically sweeps expired sessions.

use crate::store::AuthStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Shortest period the sweeper will tick at.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Handle to a running sweeper task.
pub struct Sweeper {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Sweeper {
    /// Spawn a sweeper on the current tokio runtime.
    ///
    /// Every `interval` it runs [`AuthStore::sweep_expired_until`] on the
    /// blocking pool, then flushes the store if anything was removed.
    /// Intervals shorter than a millisecond are raised to one.
    pub fn spawn(store: Arc<AuthStore>, interval: Duration) -> Self {
        if interval < MIN_INTERVAL {
            warn!(
                "Sweep interval {:?} too short, using {:?}",
                interval, MIN_INTERVAL
            );
        }
        let interval = interval.max(MIN_INTERVAL);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(store, interval, cancel.clone()));
        Self { cancel, handle }
    }

    /// Stop the sweeper and wait for it to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!("Sweeper task ended abnormally: {}", e);
        }
    }
}

async fn run(store: Arc<AuthStore>, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!("Session sweeper started (interval: {:?})", interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let store = store.clone();
        let token = cancel.clone();
        let result = tokio::task::spawn_blocking(move || {
            let removed = store.sweep_expired_until(&token);
            if removed > 0 {
                store.flush()?;
            }
            Ok::<_, crate::error::StoreError>(removed)
        })
        .await;

        match result {
            Ok(Ok(0)) => debug!("Sweep found no expired sessions"),
            Ok(Ok(removed)) => info!("Swept {} expired sessions", removed),
            Ok(Err(e)) => warn!("Sweep flush failed: {}", e),
            Err(e) => warn!("Sweep task failed: {}", e),
        }
    }

    info!("Session sweeper stopped");
}

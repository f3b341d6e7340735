use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{info, warn};
use serde::Serialize;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::metrics::{MetricsStore, ProximitySample};

use super::link::{ProximityError, ProximityEvent, ProximityLink};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum MonitorState {
    Idle,
    Connecting,
    Connected,
}

/// Maintains the short-range radio link to the companion wearable and
/// samples its signal strength on a fixed interval, publishing each
/// successful reading into the metrics store.
///
/// Cheap to clone; clones share the same link and state.
pub struct ProximityMonitor {
    inner: Arc<MonitorInner>,
}

struct MonitorInner {
    link: Arc<dyn ProximityLink>,
    store: MetricsStore,
    poll_interval: Duration,
    state_tx: watch::Sender<MonitorState>,
    run: Mutex<Option<MonitorRun>>,
}

struct MonitorRun {
    cancel: CancellationToken,
    poll_task: JoinHandle<()>,
    watch_task: JoinHandle<()>,
}

impl ProximityMonitor {
    pub fn new(link: Arc<dyn ProximityLink>, store: MetricsStore, poll_interval: Duration) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                link,
                store,
                poll_interval,
                state_tx: watch::channel(MonitorState::Idle).0,
                run: Mutex::new(None),
            }),
        }
    }

    pub fn watch_state(&self) -> watch::Receiver<MonitorState> {
        self.inner.state_tx.subscribe()
    }

    pub fn current_state(&self) -> MonitorState {
        *self.inner.state_tx.borrow()
    }

    /// Tears down any prior link, connects to `address`, and starts the
    /// periodic signal-strength poll.
    pub async fn start_monitoring(&self, address: &str) -> Result<(), ProximityError> {
        self.stop_monitoring().await;

        self.inner.state_tx.send_replace(MonitorState::Connecting);
        if let Err(err) = self.inner.link.connect(address).await {
            warn!("proximity connect to {address} failed: {err}");
            self.inner.state_tx.send_replace(MonitorState::Idle);
            return Err(err);
        }
        info!("proximity link established to {address}");

        let cancel = CancellationToken::new();
        let poll_task = tokio::spawn(run_poll_loop(Arc::clone(&self.inner), cancel.clone()));
        let watch_task = tokio::spawn(run_link_watch(
            Arc::clone(&self.inner),
            self.inner.link.subscribe(),
            cancel.clone(),
        ));

        *self.inner.run.lock().await = Some(MonitorRun {
            cancel,
            poll_task,
            watch_task,
        });
        self.inner.state_tx.send_replace(MonitorState::Connected);
        Ok(())
    }

    /// Cancels the poll timer, closes the link unconditionally, and clears
    /// the published reading to unknown. Idempotent.
    pub async fn stop_monitoring(&self) {
        let run = self.inner.run.lock().await.take();
        if let Some(run) = run {
            run.cancel.cancel();
            let _ = run.poll_task.await;
            let _ = run.watch_task.await;
        }
        self.inner.link.disconnect().await;
        self.inner.store.clear_signal_strength();
        self.inner.state_tx.send_replace(MonitorState::Idle);
    }
}

impl Clone for ProximityMonitor {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

async fn run_poll_loop(inner: Arc<MonitorInner>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(inner.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match inner.link.read_signal_strength().await {
                    Ok(rssi_dbm) => {
                        inner.store.publish_signal_strength(ProximitySample {
                            rssi_dbm,
                            observed_at_ms: Utc::now().timestamp_millis(),
                        });
                    }
                    // The previous reading stays published; consumers
                    // tolerate staleness.
                    Err(err) => warn!("signal-strength read failed: {err}"),
                }
            }
            _ = cancel.cancelled() => {
                info!("proximity poll loop shutting down");
                break;
            }
        }
    }
}

/// Reacts to an asynchronous link loss the same way an explicit stop does:
/// cancel the poll timer and clear the published value, so nothing keeps
/// polling a dead link.
async fn run_link_watch(
    inner: Arc<MonitorInner>,
    mut events: broadcast::Receiver<ProximityEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Ok(ProximityEvent::Disconnected { reason }) => {
                    warn!(
                        "proximity link lost: {}",
                        reason.as_deref().unwrap_or("no reason given")
                    );
                    // Shared with the poll loop, so this stops the polling
                    // even when the run handle is not installed yet.
                    cancel.cancel();
                    inner.run.lock().await.take();
                    inner.store.clear_signal_strength();
                    inner.state_tx.send_replace(MonitorState::Idle);
                    break;
                }
                Ok(ProximityEvent::Connected) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

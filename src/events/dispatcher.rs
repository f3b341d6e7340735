use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::types::{InboundEvent, TimerConfig, TimerPhase};

/// Per-event-kind hooks invoked by the dispatcher, one event at a time in
/// arrival order. Defaults are no-ops so implementers pick the variants
/// they care about; the taxonomy itself is fixed by the wire protocol.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn on_status_update(&self, _connection_counts: &HashMap<String, u32>) {}
    async fn on_timer_start(&self, _config: TimerConfig, _origin_id: &str) {}
    async fn on_timer_extend(&self, _seconds: u64, _origin_id: &str) {}
    async fn on_timer_phase_end(
        &self,
        _phase: TimerPhase,
        _next_cycle: u32,
        _is_last_cycle: bool,
        _continue_as: Option<TimerPhase>,
    ) {
    }
    async fn on_timer_session_end(&self, _origin_id: &str) {}
    async fn on_hello(&self, _client_id: &str) {}
    async fn on_unknown(&self, _raw: &str) {}

    /// Fired when the watched channel's remote-peer count drops to zero.
    /// Fires once per zero streak, not once per status message.
    async fn on_peer_lost(&self) {}
}

/// Decodes inbound frames and routes each to exactly one handler hook on a
/// single worker task, so no two handlers run concurrently for the same
/// connection. A malformed frame degrades to `Unknown` and never stops the
/// loop.
pub struct EventDispatcher {
    handler: Arc<dyn EventHandler>,
    watched_channel: String,
    peer_lost_latched: bool,
}

impl EventDispatcher {
    /// `watched_channel` names the connection-count entry whose drop to
    /// zero triggers `on_peer_lost`.
    pub fn new(handler: Arc<dyn EventHandler>, watched_channel: impl Into<String>) -> Self {
        Self {
            handler,
            watched_channel: watched_channel.into(),
            peer_lost_latched: false,
        }
    }

    /// Consumes the inbound broadcast until cancellation or channel close.
    pub fn spawn(
        mut self,
        mut inbound: broadcast::Receiver<String>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("event dispatcher shutting down");
                        break;
                    }
                    received = inbound.recv() => match received {
                        Ok(raw) => self.dispatch(&raw).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("event dispatcher lagged; {skipped} frames dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!("inbound channel closed; event dispatcher exiting");
                            break;
                        }
                    }
                }
            }
        })
    }

    async fn dispatch(&mut self, raw: &str) {
        match InboundEvent::decode(raw) {
            InboundEvent::StatusUpdate { connection_counts } => {
                // A channel absent from the report counts as empty.
                let watched = connection_counts
                    .get(&self.watched_channel)
                    .copied()
                    .unwrap_or(0);
                if watched == 0 {
                    if !self.peer_lost_latched {
                        self.peer_lost_latched = true;
                        info!("watched channel '{}' has no peers", self.watched_channel);
                        self.handler.on_peer_lost().await;
                    }
                } else {
                    self.peer_lost_latched = false;
                }
                self.handler.on_status_update(&connection_counts).await;
            }
            InboundEvent::TimerStart { config, origin_id } => {
                self.handler.on_timer_start(config, &origin_id).await;
            }
            InboundEvent::TimerExtend { seconds, origin_id } => {
                self.handler.on_timer_extend(seconds, &origin_id).await;
            }
            InboundEvent::TimerPhaseEnd {
                phase,
                next_cycle,
                is_last_cycle,
                continue_as,
            } => {
                self.handler
                    .on_timer_phase_end(phase, next_cycle, is_last_cycle, continue_as)
                    .await;
            }
            InboundEvent::TimerSessionEnd { origin_id } => {
                self.handler.on_timer_session_end(&origin_id).await;
            }
            InboundEvent::Hello { client_id } => {
                self.handler.on_hello(&client_id).await;
            }
            InboundEvent::Unknown { raw } => {
                self.handler.on_unknown(&raw).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;

    #[derive(Default)]
    struct RecordingHandler {
        calls: Mutex<Vec<String>>,
        peer_lost: AtomicUsize,
    }

    impl RecordingHandler {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }
    }

    #[async_trait]
    impl EventHandler for RecordingHandler {
        async fn on_status_update(&self, counts: &HashMap<String, u32>) {
            self.record(format!("status:{}", counts.len()));
        }
        async fn on_timer_start(&self, config: TimerConfig, origin_id: &str) {
            self.record(format!("timerStart:{}:{origin_id}", config.work_secs));
        }
        async fn on_hello(&self, client_id: &str) {
            self.record(format!("hello:{client_id}"));
        }
        async fn on_unknown(&self, _raw: &str) {
            self.record("unknown");
        }
        async fn on_peer_lost(&self) {
            self.peer_lost.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn status_frame(count: u32) -> String {
        format!(r#"{{"type":"statusUpdate","connectionCounts":{{"hosts":{count}}}}}"#)
    }

    #[tokio::test]
    async fn malformed_frames_do_not_halt_dispatch() {
        let handler = Arc::new(RecordingHandler::default());
        let mut dispatcher = EventDispatcher::new(handler.clone(), "hosts");

        dispatcher.dispatch("{broken").await;
        dispatcher
            .dispatch(r#"{"type":"hello","clientId":"c-9"}"#)
            .await;

        assert_eq!(handler.calls(), vec!["unknown", "hello:c-9"]);
    }

    #[tokio::test]
    async fn peer_lost_fires_once_per_zero_streak() {
        let handler = Arc::new(RecordingHandler::default());
        let mut dispatcher = EventDispatcher::new(handler.clone(), "hosts");

        dispatcher.dispatch(&status_frame(0)).await;
        dispatcher.dispatch(&status_frame(0)).await;
        dispatcher.dispatch(&status_frame(2)).await;
        dispatcher.dispatch(&status_frame(0)).await;

        assert_eq!(handler.peer_lost.load(Ordering::SeqCst), 2);
        // Every status update still reaches the hook.
        assert_eq!(handler.calls().len(), 4);
    }

    #[tokio::test]
    async fn missing_watched_channel_counts_as_zero() {
        let handler = Arc::new(RecordingHandler::default());
        let mut dispatcher = EventDispatcher::new(handler.clone(), "hosts");

        dispatcher
            .dispatch(r#"{"type":"statusUpdate","connectionCounts":{"participants":5}}"#)
            .await;

        assert_eq!(handler.peer_lost.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn events_are_dispatched_in_arrival_order() {
        let handler = Arc::new(RecordingHandler::default());
        let mut dispatcher = EventDispatcher::new(handler.clone(), "hosts");

        dispatcher
            .dispatch(r#"{"type":"timerStart","config":{"workSecs":1500,"breakSecs":300,"cycles":4},"originId":"h-1"}"#)
            .await;
        dispatcher
            .dispatch(r#"{"type":"hello","clientId":"c-1"}"#)
            .await;

        assert_eq!(handler.calls(), vec!["timerStart:1500:h-1", "hello:c-1"]);
    }

    #[tokio::test]
    async fn worker_drains_broadcast_until_cancelled() {
        let handler = Arc::new(RecordingHandler::default());
        let dispatcher = EventDispatcher::new(handler.clone(), "hosts");
        let (tx, rx) = broadcast::channel(16);
        let cancel = CancellationToken::new();
        let worker = dispatcher.spawn(rx, cancel.clone());

        tx.send("{bad".to_string()).unwrap();
        tx.send(r#"{"type":"hello","clientId":"c-2"}"#.to_string()).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        cancel.cancel();
        worker.await.unwrap();
        assert_eq!(handler.calls(), vec!["unknown", "hello:c-2"]);
    }
}

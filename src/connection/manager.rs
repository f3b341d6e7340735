use std::sync::Arc;

use chrono::Utc;
use log::{debug, info, warn};
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::events::OutboundEvent;

use super::state::{ConnectionInfo, ConnectionState, RetryPolicy, SessionTarget};
use super::transport::{LinkEvent, SessionLink, SessionTransport};

const INBOUND_CHANNEL_CAPACITY: usize = 64;

/// Owns the single logical connection to the remote session endpoint.
///
/// All connection failures surface through the observable state value
/// rather than as returned errors; callers watch the state and decide.
/// Cheap to clone; clones share the same connection.
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    transport: Arc<dyn SessionTransport>,
    retry: RetryPolicy,
    state_tx: watch::Sender<ConnectionState>,
    inbound_tx: broadcast::Sender<String>,
    active: Mutex<Option<ActiveLink>>,
    target: Mutex<SessionTarget>,
    // Serializes connect/disconnect so only one lifecycle change runs at a time.
    lifecycle: Mutex<()>,
}

struct ActiveLink {
    outbound: mpsc::Sender<String>,
    receive_loop: JoinHandle<()>,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn SessionTransport>, retry: RetryPolicy) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                transport,
                retry,
                state_tx: watch::channel(ConnectionState::Idle).0,
                inbound_tx: broadcast::channel(INBOUND_CHANNEL_CAPACITY).0,
                active: Mutex::new(None),
                target: Mutex::new(SessionTarget::UNSET),
                lifecycle: Mutex::new(()),
            }),
        }
    }

    /// Last-value, multi-subscriber view of the connection state.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn current_state(&self) -> ConnectionState {
        self.inner.state_tx.borrow().clone()
    }

    /// Live broadcast of inbound text frames. A subscriber that joins late
    /// does not see frames delivered before it subscribed.
    pub fn subscribe_inbound(&self) -> broadcast::Receiver<String> {
        self.inner.inbound_tx.subscribe()
    }

    pub async fn current_target(&self) -> SessionTarget {
        *self.inner.target.lock().await
    }

    /// Attaches to `target`, retrying with bounded exponential backoff.
    ///
    /// No-op when already connected to `target`. When connected to a
    /// different, non-sentinel target this transitions to `Disconnected`
    /// and returns without switching; the caller re-invokes to attach to
    /// the new target. The sentinel target fails fast with an `Error`
    /// state and never touches the network.
    pub async fn connect(&self, target: SessionTarget) {
        let _lifecycle = self.inner.lifecycle.lock().await;

        if target.is_unset() {
            warn!("refusing to connect: session target is unset");
            self.set_state(ConnectionState::error("cannot connect: session target is unset"));
            return;
        }

        let remembered = *self.inner.target.lock().await;
        if self.current_state().is_connected() {
            if remembered == target {
                debug!("already connected to session {target}");
                return;
            }
            if !remembered.is_unset() {
                info!("connected to session {remembered}, not {target}; disconnecting first");
                self.teardown_link().await;
                self.set_state(ConnectionState::Disconnected);
                return;
            }
        }

        self.connect_with_retry(target).await;
    }

    async fn connect_with_retry(&self, target: SessionTarget) {
        // A fresh connect always replaces whatever link was left behind.
        self.teardown_link().await;
        self.set_state(ConnectionState::Connecting);

        let retry = self.inner.retry;
        let mut last_error: Option<String> = None;

        for attempt in 0..retry.max_attempts {
            match self.inner.transport.open(target).await {
                Ok(link) => {
                    self.install_link(target, link).await;
                    info!("connected to session {target} (attempt {})", attempt + 1);
                    return;
                }
                Err(err) => {
                    warn!(
                        "connect attempt {}/{} to session {target} failed: {err}",
                        attempt + 1,
                        retry.max_attempts
                    );
                    last_error = Some(err.to_string());
                    if attempt + 1 < retry.max_attempts {
                        tokio::time::sleep(retry.delay_after(attempt)).await;
                    }
                }
            }
        }

        self.set_state(ConnectionState::Error {
            message: format!(
                "connection to session {target} failed after {} attempts",
                retry.max_attempts
            ),
            cause: last_error,
        });
    }

    async fn install_link(&self, target: SessionTarget, link: SessionLink) {
        let receive_loop = tokio::spawn(run_receive_loop(Arc::clone(&self.inner), link.events));
        *self.inner.active.lock().await = Some(ActiveLink {
            outbound: link.outbound,
            receive_loop,
        });
        *self.inner.target.lock().await = target;
        self.set_state(ConnectionState::Connected(ConnectionInfo {
            target,
            connected_at: Utc::now(),
        }));
    }

    /// Serializes and sends one outbound event over the active link.
    ///
    /// Failures surface as `Error` state; sends are never retried here.
    /// Retry is a caller decision.
    pub async fn send(&self, event: &OutboundEvent) {
        let frame = match serde_json::to_string(event) {
            Ok(frame) => frame,
            Err(err) => {
                warn!("dropping unserializable outbound event: {err}");
                return;
            }
        };

        let guard = self.inner.active.lock().await;
        match guard.as_ref() {
            None => {
                self.set_state(ConnectionState::error("cannot send: not connected"));
            }
            Some(link) => {
                if link.outbound.send(frame).await.is_err() {
                    self.set_state(ConnectionState::error("send failed: session link is gone"));
                }
            }
        }
    }

    /// Best-effort graceful close. Always clears the active link and resets
    /// the remembered target to the sentinel so a later `connect` is never
    /// short-circuited by stale target matching.
    pub async fn disconnect(&self) {
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.teardown_link().await;
        *self.inner.target.lock().await = SessionTarget::UNSET;
        self.set_state(ConnectionState::Disconnected);
    }

    async fn teardown_link(&self) {
        if let Some(link) = self.inner.active.lock().await.take() {
            link.receive_loop.abort();
            // Dropping the outbound sender lets the transport send its close
            // frame from its own task.
            drop(link.outbound);
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.inner.state_tx.send_replace(state);
    }
}

impl Clone for ConnectionManager {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Pumps link events into the shared inbound broadcast until the link ends.
/// Exactly one receive loop is active per successful connect.
async fn run_receive_loop(inner: Arc<ManagerInner>, mut events: mpsc::Receiver<LinkEvent>) {
    loop {
        match events.recv().await {
            Some(LinkEvent::Frame(text)) => {
                // No subscribers is fine; frames are simply not retained.
                let _ = inner.inbound_tx.send(text);
            }
            Some(LinkEvent::Closed) => {
                info!("session link closed by remote");
                inner.state_tx.send_replace(ConnectionState::Disconnected);
                break;
            }
            Some(LinkEvent::Failed(reason)) => {
                warn!("session link failed: {reason}");
                inner
                    .state_tx
                    .send_replace(ConnectionState::error_caused_by("session link failed", reason));
                break;
            }
            None => {
                inner.state_tx.send_replace(ConnectionState::Disconnected);
                break;
            }
        }
    }
    inner.active.lock().await.take();
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::Instant;

    use crate::events::OutboundEvent;
    use crate::testing::MockTransport;

    use super::*;

    fn quick_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sentinel_target_fails_fast_without_network() {
        let transport = Arc::new(MockTransport::new());
        let manager = ConnectionManager::new(transport.clone(), quick_retry());

        let before = Instant::now();
        manager.connect(SessionTarget::UNSET).await;

        assert!(matches!(manager.current_state(), ConnectionState::Error { .. }));
        assert_eq!(transport.open_count(), 0);
        assert_eq!(before.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_with_exponential_backoff_until_success() {
        let transport = Arc::new(MockTransport::new());
        transport.plan_failure("no route to host");
        transport.plan_failure("no route to host");
        transport.plan_success();
        let manager = ConnectionManager::new(transport.clone(), quick_retry());

        let before = Instant::now();
        manager.connect(SessionTarget(7)).await;

        assert!(manager.current_state().is_connected());
        assert_eq!(transport.open_count(), 3);
        // 500ms after the first failure, 1000ms after the second.
        assert_eq!(before.elapsed(), Duration::from_millis(1500));
        assert_eq!(manager.current_target().await, SessionTarget(7));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_attempts_surface_error_with_cause() {
        let transport = Arc::new(MockTransport::new());
        for _ in 0..3 {
            transport.plan_failure("connection refused");
        }
        let manager = ConnectionManager::new(transport.clone(), quick_retry());

        let before = Instant::now();
        manager.connect(SessionTarget(7)).await;

        match manager.current_state() {
            ConnectionState::Error { cause, .. } => {
                assert!(cause.unwrap().contains("connection refused"));
            }
            other => panic!("expected error state, got {other:?}"),
        }
        assert_eq!(transport.open_count(), 3);
        // No sleep after the final failed attempt.
        assert_eq!(before.elapsed(), Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn connecting_to_same_target_is_a_noop() {
        let transport = Arc::new(MockTransport::new());
        transport.plan_success();
        let manager = ConnectionManager::new(transport.clone(), quick_retry());

        manager.connect(SessionTarget(3)).await;
        manager.connect(SessionTarget(3)).await;

        assert!(manager.current_state().is_connected());
        assert_eq!(transport.open_count(), 1);
    }

    #[tokio::test]
    async fn switching_targets_disconnects_without_migrating() {
        let transport = Arc::new(MockTransport::new());
        transport.plan_success();
        let manager = ConnectionManager::new(transport.clone(), quick_retry());

        manager.connect(SessionTarget(3)).await;
        manager.connect(SessionTarget(4)).await;

        assert_eq!(manager.current_state(), ConnectionState::Disconnected);
        assert_eq!(transport.open_count(), 1);

        transport.plan_success();
        manager.connect(SessionTarget(4)).await;
        assert!(manager.current_state().is_connected());
        assert_eq!(manager.current_target().await, SessionTarget(4));
    }

    #[tokio::test]
    async fn send_without_link_sets_error_state() {
        let transport = Arc::new(MockTransport::new());
        let manager = ConnectionManager::new(transport, quick_retry());

        manager.send(&OutboundEvent::WearableOff { at: 1 }).await;

        match manager.current_state() {
            ConnectionState::Error { message, .. } => assert!(message.contains("not connected")),
            other => panic!("expected error state, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn send_writes_tagged_frame_to_link() {
        let transport = Arc::new(MockTransport::new());
        transport.plan_success();
        let manager = ConnectionManager::new(transport.clone(), quick_retry());
        manager.connect(SessionTarget(3)).await;
        let mut link = transport.take_link();

        manager.send(&OutboundEvent::WeakSignal { rssi: -94 }).await;

        let frame = link.outbound.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["type"], "weakSignal");
        assert_eq!(value["rssi"], -94);
    }

    #[tokio::test]
    async fn inbound_frames_reach_subscribers_and_close_disconnects() {
        let transport = Arc::new(MockTransport::new());
        transport.plan_success();
        let manager = ConnectionManager::new(transport.clone(), quick_retry());

        let mut inbound = manager.subscribe_inbound();
        manager.connect(SessionTarget(3)).await;
        let link = transport.take_link();

        link.events.send(LinkEvent::Frame("{\"type\":\"hello\"}".into())).await.unwrap();
        assert_eq!(inbound.recv().await.unwrap(), "{\"type\":\"hello\"}");

        let mut state = manager.watch_state();
        link.events.send(LinkEvent::Closed).await.unwrap();
        state
            .wait_for(|s| *s == ConnectionState::Disconnected)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn receive_failure_surfaces_error_state() {
        let transport = Arc::new(MockTransport::new());
        transport.plan_success();
        let manager = ConnectionManager::new(transport.clone(), quick_retry());
        manager.connect(SessionTarget(3)).await;
        let link = transport.take_link();

        let mut state = manager.watch_state();
        link.events
            .send(LinkEvent::Failed("broken pipe".into()))
            .await
            .unwrap();
        state
            .wait_for(|s| matches!(s, ConnectionState::Error { .. }))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn disconnect_resets_target_so_reconnect_hits_network() {
        let transport = Arc::new(MockTransport::new());
        transport.plan_success();
        let manager = ConnectionManager::new(transport.clone(), quick_retry());

        manager.connect(SessionTarget(3)).await;
        manager.disconnect().await;
        assert_eq!(manager.current_state(), ConnectionState::Disconnected);
        assert_eq!(manager.current_target().await, SessionTarget::UNSET);

        transport.plan_success();
        manager.connect(SessionTarget(3)).await;
        assert!(manager.current_state().is_connected());
        assert_eq!(transport.open_count(), 2);
    }
}

use std::sync::Arc;

use chrono::Utc;
use log::{debug, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::connection::ConnectionManager;
use crate::events::OutboundEvent;
use crate::report::{
    resolve_report_context, ReportBody, ReportRecord, ReportSink, SessionDirectory,
    WearableLifecycleKind,
};

use super::store::MetricsStore;
use super::types::{HeartRateSample, MovementSample, ProximitySample, ScreenLock};
use super::window::SampleWindow;

#[derive(Debug, Clone, Copy)]
pub struct AggregatorConfig {
    pub heart_rate_window: usize,
    pub movement_window: usize,
    pub signal_window: usize,
    pub weak_signal_threshold_dbm: i32,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            heart_rate_window: 10,
            movement_window: 10,
            signal_window: 5,
            weak_signal_threshold_dbm: -90,
        }
    }
}

/// Weak-signal latch for the signal-strength lane. Suppresses duplicate
/// events while consecutive window means stay on the same side of the
/// threshold.
#[derive(Debug, Default)]
struct SignalLane {
    weak_latched: bool,
}

/// Turns raw signal samples into tumbling-window aggregates and
/// edge-triggered events: outbound events go through the connection
/// manager, report records go to the report sink.
///
/// Each signal runs as its own task under the pipeline's cancellation
/// scope; there is no cross-signal ordering guarantee.
pub struct MetricsAggregator {
    store: MetricsStore,
    connection: ConnectionManager,
    sink: Arc<dyn ReportSink>,
    directory: Arc<dyn SessionDirectory>,
    device: String,
    config: AggregatorConfig,
}

impl MetricsAggregator {
    pub fn new(
        store: MetricsStore,
        connection: ConnectionManager,
        sink: Arc<dyn ReportSink>,
        directory: Arc<dyn SessionDirectory>,
        device: String,
        config: AggregatorConfig,
    ) -> Self {
        Self {
            store,
            connection,
            sink,
            directory,
            device,
            config,
        }
    }

    /// Spawns one task per signal lane. All lanes stop when `cancel` fires.
    pub fn spawn(self: Arc<Self>, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        vec![
            tokio::spawn(Arc::clone(&self).run_heart_rate(cancel.child_token())),
            tokio::spawn(Arc::clone(&self).run_movement(cancel.child_token())),
            tokio::spawn(Arc::clone(&self).run_signal_strength(cancel.child_token())),
            tokio::spawn(Arc::clone(&self).run_screen_lock(cancel.child_token())),
            tokio::spawn(Arc::clone(&self).run_wearable_link(cancel.child_token())),
            tokio::spawn(Arc::clone(&self).run_wrist(cancel.child_token())),
        ]
    }

    async fn run_heart_rate(self: Arc<Self>, cancel: CancellationToken) {
        let mut rx = self.store.watch_heart_rate();
        let mut window = SampleWindow::new(self.config.heart_rate_window);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = rx.changed() => {
                    if changed.is_err() { break; }
                    let sample = *rx.borrow_and_update();
                    if let Some(sample) = sample {
                        self.observe_heart_rate(&mut window, sample).await;
                    }
                }
            }
        }
    }

    async fn run_movement(self: Arc<Self>, cancel: CancellationToken) {
        let mut rx = self.store.watch_movement();
        let mut window = SampleWindow::new(self.config.movement_window);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = rx.changed() => {
                    if changed.is_err() { break; }
                    let sample = *rx.borrow_and_update();
                    if let Some(sample) = sample {
                        self.observe_movement(&mut window, sample).await;
                    }
                }
            }
        }
    }

    async fn run_signal_strength(self: Arc<Self>, cancel: CancellationToken) {
        let mut rx = self.store.watch_signal_strength();
        let mut window = SampleWindow::new(self.config.signal_window);
        let mut lane = SignalLane::default();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = rx.changed() => {
                    if changed.is_err() { break; }
                    let sample = *rx.borrow_and_update();
                    if let Some(sample) = sample {
                        self.observe_signal_strength(&mut window, &mut lane, sample).await;
                    }
                }
            }
        }
    }

    async fn run_screen_lock(self: Arc<Self>, cancel: CancellationToken) {
        let mut rx = self.store.watch_screen_lock();
        let mut last: Option<ScreenLock> = None;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = rx.changed() => {
                    if changed.is_err() { break; }
                    let state = *rx.borrow_and_update();
                    if let Some(state) = state {
                        self.observe_screen_lock(&mut last, state).await;
                    }
                }
            }
        }
    }

    async fn run_wearable_link(self: Arc<Self>, cancel: CancellationToken) {
        let mut rx = self.store.watch_wearable_link();
        let mut last: Option<bool> = None;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = rx.changed() => {
                    if changed.is_err() { break; }
                    let connected = *rx.borrow_and_update();
                    if let Some(connected) = connected {
                        self.observe_wearable_link(&mut last, connected).await;
                    }
                }
            }
        }
    }

    async fn run_wrist(self: Arc<Self>, cancel: CancellationToken) {
        let mut rx = self.store.watch_on_wrist();
        // The wearable reports on-wrist at pairing time; the latch starts
        // there so a worn device produces no spurious transition.
        let mut last_on_wrist = true;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = rx.changed() => {
                    if changed.is_err() { break; }
                    let on_wrist = *rx.borrow_and_update();
                    if let Some(on_wrist) = on_wrist {
                        self.observe_wrist(&mut last_on_wrist, on_wrist).await;
                    }
                }
            }
        }
    }

    async fn observe_heart_rate(
        &self,
        window: &mut SampleWindow<HeartRateSample>,
        sample: HeartRateSample,
    ) {
        if let Some(batch) = window.push(sample) {
            let count = batch.len();
            let mean = batch.iter().map(|s| s.bpm).sum::<f64>() / count as f64;
            // The earliest value in the window is reported as the reading.
            let value = batch[0].bpm;
            self.emit_report(ReportBody::HeartRate { value, mean, count })
                .await;
        }
    }

    async fn observe_movement(
        &self,
        window: &mut SampleWindow<MovementSample>,
        sample: MovementSample,
    ) {
        if let Some(batch) = window.push(sample) {
            let speed = batch.iter().map(|s| s.intensity).sum::<f64>() / batch.len() as f64;
            self.emit_report(ReportBody::PhysicalActivity { speed }).await;
        }
    }

    async fn observe_signal_strength(
        &self,
        window: &mut SampleWindow<ProximitySample>,
        lane: &mut SignalLane,
        sample: ProximitySample,
    ) {
        let Some(batch) = window.push(sample) else {
            return;
        };
        let mean = batch.iter().map(|s| f64::from(s.rssi_dbm)).sum::<f64>() / batch.len() as f64;
        let rssi = mean as i32;
        if rssi < self.config.weak_signal_threshold_dbm {
            if !lane.weak_latched {
                lane.weak_latched = true;
                self.emit_event(OutboundEvent::WeakSignal { rssi }).await;
                self.emit_report(ReportBody::SignalStrength { rssi }).await;
            }
        } else if lane.weak_latched {
            lane.weak_latched = false;
            self.emit_event(OutboundEvent::StrongSignal { rssi }).await;
        }
    }

    async fn observe_screen_lock(&self, last: &mut Option<ScreenLock>, state: ScreenLock) {
        if *last == Some(state) {
            return;
        }
        *last = Some(state);
        match state {
            ScreenLock::Unpinned => {
                self.emit_event(OutboundEvent::LockReleased { at: now_ms() }).await;
                self.emit_report(ReportBody::ScreenPin { pinned: false }).await;
            }
            ScreenLock::Pinned => {
                self.emit_event(OutboundEvent::LockEngaged { at: now_ms() }).await;
            }
        }
    }

    async fn observe_wearable_link(&self, last: &mut Option<bool>, connected: bool) {
        if *last == Some(connected) {
            return;
        }
        *last = Some(connected);
        if connected {
            self.emit_event(OutboundEvent::WearableReconnected { at: now_ms() })
                .await;
        } else {
            self.emit_event(OutboundEvent::WearableDisconnected { at: now_ms() })
                .await;
            self.emit_report(ReportBody::WearableLifecycle {
                event: WearableLifecycleKind::Disconnected,
            })
            .await;
        }
    }

    async fn observe_wrist(&self, last_on_wrist: &mut bool, on_wrist: bool) {
        if on_wrist == *last_on_wrist {
            return;
        }
        *last_on_wrist = on_wrist;
        if on_wrist {
            self.emit_event(OutboundEvent::WearableOn { at: now_ms() }).await;
        } else {
            self.emit_event(OutboundEvent::WearableOff { at: now_ms() }).await;
            self.emit_report(ReportBody::WearableLifecycle {
                event: WearableLifecycleKind::OffWrist,
            })
            .await;
        }
    }

    async fn emit_event(&self, event: OutboundEvent) {
        self.connection.send(&event).await;
    }

    /// Builds and submits one report record. Without an active session the
    /// record is dropped on purpose; sink failures are logged, never
    /// retried.
    async fn emit_report(&self, body: ReportBody) {
        let context = match resolve_report_context(self.directory.as_ref()).await {
            Ok(Some(context)) => context,
            Ok(None) => {
                debug!("no active session; dropping {:?} report", body.kind());
                return;
            }
            Err(err) => {
                warn!("report context unavailable; dropping {:?} report: {err:#}", body.kind());
                return;
            }
        };

        let record = ReportRecord {
            user_id: context.user_id,
            session_id: Some(context.session_id),
            course_id: context.course_id,
            kind: body.kind(),
            device: self.device.clone(),
            captured_at_ms: context.captured_at_ms,
            body,
        };
        if let Err(err) = self.sink.submit(record).await {
            warn!("{:?} report submission failed: {err}", body.kind());
        }
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

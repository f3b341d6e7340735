use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::connection::{ConnectionManager, ConnectionState, SessionTarget, SessionTransport};
use crate::events::{EventDispatcher, EventHandler, TimerConfig, TimerPhase};
use crate::metrics::{MetricsAggregator, MetricsStore, ProximitySample, ScreenLock};
use crate::proximity::{ProximityLink, ProximityMonitor};
use crate::report::{device_descriptor, ReportSink, SessionDirectory};
use crate::settings::PipelineSettings;

/// External collaborators the pipeline consumes but does not own.
pub struct PipelineDeps {
    pub transport: Arc<dyn SessionTransport>,
    pub sink: Arc<dyn ReportSink>,
    pub directory: Arc<dyn SessionDirectory>,
    /// Absent when the host has no radio backend; proximity monitoring is
    /// then disabled for the run.
    pub proximity: Option<Arc<dyn ProximityLink>>,
}

/// Serializable view of the pipeline for a host shell.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSnapshot {
    pub running: bool,
    pub run_id: Option<Uuid>,
    pub connection: Option<ConnectionState>,
    pub last_signal: Option<ProximitySample>,
}

/// One run's worth of live state. Discarded wholesale on stop; nothing
/// survives into the next run.
struct PipelineRun {
    run_id: Uuid,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    connection: ConnectionManager,
    store: MetricsStore,
    monitor: Option<ProximityMonitor>,
}

/// Supervising controller for the telemetry pipeline: creates fresh
/// component instances per run, wires them together, and owns the single
/// cancellation scope that tears everything down.
pub struct TelemetryPipeline {
    settings: PipelineSettings,
    deps: PipelineDeps,
    run: Mutex<Option<PipelineRun>>,
}

impl TelemetryPipeline {
    pub fn new(settings: PipelineSettings, deps: PipelineDeps) -> Self {
        Self {
            settings,
            deps,
            run: Mutex::new(None),
        }
    }

    /// Starts one pipeline run and attaches to the configured session
    /// target. Connection failures surface through the observable
    /// connection state, not as an error here.
    pub async fn start(&self) -> Result<()> {
        let mut run_guard = self.run.lock().await;
        if run_guard.is_some() {
            bail!("pipeline already running");
        }

        let run_id = Uuid::new_v4();
        info!("starting telemetry pipeline run {run_id}");

        let store = MetricsStore::new();
        let connection =
            ConnectionManager::new(Arc::clone(&self.deps.transport), self.settings.retry_policy());
        let cancel = CancellationToken::new();

        let handlers = Arc::new(PipelineHandlers {
            store: store.clone(),
            connection: connection.clone(),
        });
        let dispatcher = EventDispatcher::new(
            handlers,
            self.settings.connection.watched_channel.clone(),
        );
        // Subscribe before connecting so the dispatcher sees the first frames.
        let mut tasks = vec![dispatcher.spawn(connection.subscribe_inbound(), cancel.child_token())];

        let aggregator = Arc::new(MetricsAggregator::new(
            store.clone(),
            connection.clone(),
            Arc::clone(&self.deps.sink),
            Arc::clone(&self.deps.directory),
            device_descriptor(),
            self.settings.aggregator_config(),
        ));
        tasks.extend(aggregator.spawn(&cancel));

        connection
            .connect(SessionTarget(self.settings.connection.target))
            .await;

        let monitor = match (&self.deps.proximity, &self.settings.proximity.wearable_address) {
            (Some(link), Some(address)) => {
                let monitor = ProximityMonitor::new(
                    Arc::clone(link),
                    store.clone(),
                    self.settings.poll_interval(),
                );
                if let Err(err) = monitor.start_monitoring(address).await {
                    warn!("proximity monitoring unavailable for run {run_id}: {err}");
                }
                Some(monitor)
            }
            _ => {
                info!("proximity monitoring disabled: no radio backend or paired wearable");
                None
            }
        };

        *run_guard = Some(PipelineRun {
            run_id,
            cancel,
            tasks,
            connection,
            store,
            monitor,
        });
        Ok(())
    }

    /// Stops the current run, cancelling every child task and closing the
    /// session and proximity links before returning. Idempotent.
    pub async fn stop(&self) {
        let run = self.run.lock().await.take();
        let Some(run) = run else {
            debug!("pipeline stop: nothing running");
            return;
        };
        info!("stopping telemetry pipeline run {}", run.run_id);

        if let Some(monitor) = &run.monitor {
            monitor.stop_monitoring().await;
        }
        run.connection.disconnect().await;
        run.cancel.cancel();
        for task in run.tasks {
            if let Err(err) = task.await {
                if !err.is_cancelled() {
                    error!("pipeline task failed to join: {err}");
                }
            }
        }
    }

    /// The current run's connection manager, for hosts that switch targets
    /// or send their own events mid-run.
    pub async fn connection(&self) -> Option<ConnectionManager> {
        self.run.lock().await.as_ref().map(|run| run.connection.clone())
    }

    pub async fn snapshot(&self) -> PipelineSnapshot {
        match self.run.lock().await.as_ref() {
            Some(run) => PipelineSnapshot {
                running: true,
                run_id: Some(run.run_id),
                connection: Some(run.connection.current_state()),
                last_signal: run.store.latest_signal_strength(),
            },
            None => PipelineSnapshot {
                running: false,
                run_id: None,
                connection: None,
                last_signal: None,
            },
        }
    }
}

/// Default inbound-event handling for a pipeline run. Timer lifecycle
/// frames toggle the screen-lock signal the aggregator observes; a host
/// count of zero tears the connection down.
struct PipelineHandlers {
    store: MetricsStore,
    connection: ConnectionManager,
}

#[async_trait]
impl EventHandler for PipelineHandlers {
    async fn on_timer_start(&self, config: TimerConfig, origin_id: &str) {
        info!(
            "timer started by {origin_id}: {}s work / {}s break x{}",
            config.work_secs, config.break_secs, config.cycles
        );
        self.store.publish_screen_lock(ScreenLock::Pinned);
    }

    async fn on_timer_extend(&self, seconds: u64, origin_id: &str) {
        info!("timer extended by {seconds}s ({origin_id})");
    }

    async fn on_timer_phase_end(
        &self,
        phase: TimerPhase,
        next_cycle: u32,
        is_last_cycle: bool,
        continue_as: Option<TimerPhase>,
    ) {
        info!(
            "timer phase {phase:?} ended; next cycle {next_cycle}{}{}",
            if is_last_cycle { " (last)" } else { "" },
            match continue_as {
                Some(next) => format!(", continuing as {next:?}"),
                None => String::new(),
            }
        );
    }

    async fn on_timer_session_end(&self, origin_id: &str) {
        info!("timer session ended by {origin_id}");
        self.store.publish_screen_lock(ScreenLock::Unpinned);
    }

    async fn on_hello(&self, client_id: &str) {
        debug!("hello from {client_id}");
    }

    async fn on_unknown(&self, raw: &str) {
        debug!("ignoring unknown frame: {raw}");
    }

    async fn on_peer_lost(&self) {
        warn!("session host left; disconnecting");
        self.connection.disconnect().await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::connection::LinkEvent;
    use crate::report::StaticSessionDirectory;
    use crate::testing::{MockProximityLink, MockTransport, RecordingSink};

    use super::*;

    fn test_settings(target: i64) -> PipelineSettings {
        let mut settings = PipelineSettings::default();
        settings.connection.target = target;
        settings
    }

    fn pipeline_with(
        transport: Arc<MockTransport>,
        settings: PipelineSettings,
        proximity: Option<Arc<MockProximityLink>>,
    ) -> TelemetryPipeline {
        TelemetryPipeline::new(
            settings,
            PipelineDeps {
                transport,
                sink: Arc::new(RecordingSink::default()),
                directory: Arc::new(StaticSessionDirectory {
                    user_id: "u-1".into(),
                    session_id: Some("s-1".into()),
                    course_id: "course-7".into(),
                }),
                proximity: proximity.map(|link| link as Arc<dyn ProximityLink>),
            },
        )
    }

    #[tokio::test]
    async fn start_connects_and_stop_is_idempotent() {
        let transport = Arc::new(MockTransport::new());
        transport.plan_success();
        let pipeline = pipeline_with(transport.clone(), test_settings(5), None);

        pipeline.start().await.unwrap();
        let snapshot = pipeline.snapshot().await;
        assert!(snapshot.running);
        assert!(matches!(snapshot.connection, Some(ConnectionState::Connected(_))));

        pipeline.stop().await;
        pipeline.stop().await;
        assert!(!pipeline.snapshot().await.running);
    }

    #[tokio::test]
    async fn second_start_while_running_is_rejected() {
        let transport = Arc::new(MockTransport::new());
        transport.plan_success();
        let pipeline = pipeline_with(transport.clone(), test_settings(5), None);

        pipeline.start().await.unwrap();
        assert!(pipeline.start().await.is_err());
        pipeline.stop().await;
    }

    #[tokio::test]
    async fn restart_creates_fresh_instances() {
        let transport = Arc::new(MockTransport::new());
        transport.plan_success();
        let pipeline = pipeline_with(transport.clone(), test_settings(5), None);

        pipeline.start().await.unwrap();
        let first_run = pipeline.snapshot().await.run_id;
        pipeline.stop().await;

        transport.plan_success();
        pipeline.start().await.unwrap();
        let second_run = pipeline.snapshot().await.run_id;
        pipeline.stop().await;

        assert_ne!(first_run, second_run);
        assert_eq!(transport.open_count(), 2);
    }

    #[tokio::test]
    async fn unset_target_fails_fast_into_error_state() {
        let transport = Arc::new(MockTransport::new());
        let pipeline = pipeline_with(transport.clone(), test_settings(-1), None);

        pipeline.start().await.unwrap();
        let snapshot = pipeline.snapshot().await;
        assert!(matches!(snapshot.connection, Some(ConnectionState::Error { .. })));
        assert_eq!(transport.open_count(), 0);
        pipeline.stop().await;
    }

    #[tokio::test]
    async fn timer_frames_toggle_the_screen_lock_signal() {
        let transport = Arc::new(MockTransport::new());
        transport.plan_success();
        let pipeline = pipeline_with(transport.clone(), test_settings(5), None);
        pipeline.start().await.unwrap();
        let link = transport.take_link();

        let store = pipeline
            .run
            .lock()
            .await
            .as_ref()
            .unwrap()
            .store
            .clone();
        let mut lock_rx = store.watch_screen_lock();

        link.events
            .send(LinkEvent::Frame(
                r#"{"type":"timerStart","config":{"workSecs":1500,"breakSecs":300,"cycles":4},"originId":"h-1"}"#.into(),
            ))
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(1), lock_rx.changed())
            .await
            .expect("lock signal not updated")
            .unwrap();
        assert_eq!(*lock_rx.borrow_and_update(), Some(ScreenLock::Pinned));

        link.events
            .send(LinkEvent::Frame(
                r#"{"type":"timerSessionEnd","originId":"h-1"}"#.into(),
            ))
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(1), lock_rx.changed())
            .await
            .expect("lock signal not updated")
            .unwrap();
        assert_eq!(*lock_rx.borrow_and_update(), Some(ScreenLock::Unpinned));

        pipeline.stop().await;
    }

    #[tokio::test]
    async fn zero_host_count_disconnects_the_session() {
        let transport = Arc::new(MockTransport::new());
        transport.plan_success();
        let pipeline = pipeline_with(transport.clone(), test_settings(5), None);
        pipeline.start().await.unwrap();
        let link = transport.take_link();

        let connection = pipeline.connection().await.unwrap();
        let mut state = connection.watch_state();
        link.events
            .send(LinkEvent::Frame(
                r#"{"type":"statusUpdate","connectionCounts":{"hosts":0}}"#.into(),
            ))
            .await
            .unwrap();
        tokio::time::timeout(
            Duration::from_secs(1),
            state.wait_for(|s| *s == ConnectionState::Disconnected),
        )
        .await
        .expect("connection did not disconnect")
        .unwrap();

        pipeline.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn proximity_monitoring_runs_when_backend_and_address_exist() {
        let transport = Arc::new(MockTransport::new());
        transport.plan_success();
        let radio = Arc::new(MockProximityLink::new());
        radio.plan_reading(-64);

        let mut settings = test_settings(5);
        settings.proximity.wearable_address = Some("aa:bb:cc:dd:ee:ff".into());
        let pipeline = pipeline_with(transport.clone(), settings, Some(radio.clone()));

        pipeline.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let snapshot = pipeline.snapshot().await;
        assert_eq!(snapshot.last_signal.unwrap().rssi_dbm, -64);

        pipeline.stop().await;
        assert_eq!(pipeline.snapshot().await.last_signal, None);
    }
}

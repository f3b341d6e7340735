//! Channel-backed fakes shared by the module tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use crate::connection::{ConnectError, LinkEvent, SessionLink, SessionTarget, SessionTransport};
use crate::proximity::{ProximityError, ProximityEvent, ProximityLink};
use crate::report::{ReportError, ReportRecord, ReportSink};

/// Scripted transport: each `open` consumes the next planned outcome.
/// Successful opens hand the test side of the link back through
/// `take_link`.
pub(crate) struct MockTransport {
    plan: Mutex<VecDeque<Result<(), String>>>,
    opens: AtomicU32,
    links: Mutex<VecDeque<MockLink>>,
}

/// Test-side handles of one established mock link.
pub(crate) struct MockLink {
    /// Push link events (frames, close, failure) into the manager.
    pub events: mpsc::Sender<LinkEvent>,
    /// Frames the manager wrote to the wire.
    pub outbound: mpsc::Receiver<String>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            plan: Mutex::new(VecDeque::new()),
            opens: AtomicU32::new(0),
            links: Mutex::new(VecDeque::new()),
        }
    }

    pub fn plan_success(&self) {
        self.plan.lock().unwrap().push_back(Ok(()));
    }

    pub fn plan_failure(&self, reason: &str) {
        self.plan.lock().unwrap().push_back(Err(reason.to_string()));
    }

    pub fn open_count(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }

    /// Takes the oldest established link not yet claimed by the test.
    pub fn take_link(&self) -> MockLink {
        self.links
            .lock()
            .unwrap()
            .pop_front()
            .expect("no established mock link to take")
    }
}

#[async_trait]
impl SessionTransport for MockTransport {
    async fn open(&self, _target: SessionTarget) -> Result<SessionLink, ConnectError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let outcome = self
            .plan
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err("unplanned open".to_string()));
        match outcome {
            Ok(()) => {
                let (outbound_tx, outbound_rx) = mpsc::channel(32);
                let (event_tx, event_rx) = mpsc::channel(32);
                self.links.lock().unwrap().push_back(MockLink {
                    events: event_tx,
                    outbound: outbound_rx,
                });
                Ok(SessionLink {
                    outbound: outbound_tx,
                    events: event_rx,
                })
            }
            Err(reason) => Err(ConnectError::Unreachable(reason)),
        }
    }
}

/// Report sink that remembers everything submitted to it.
#[derive(Default)]
pub(crate) struct RecordingSink {
    records: Mutex<Vec<ReportRecord>>,
}

impl RecordingSink {
    pub fn records(&self) -> Vec<ReportRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReportSink for RecordingSink {
    async fn submit(&self, record: ReportRecord) -> Result<(), ReportError> {
        self.records.lock().unwrap().push(record);
        Ok(())
    }
}

/// Proximity link with scripted signal-strength readings and a steerable
/// link-event stream.
pub(crate) struct MockProximityLink {
    readings: Mutex<VecDeque<Result<i16, String>>>,
    pub events: broadcast::Sender<ProximityEvent>,
    connects: AtomicU32,
    disconnects: AtomicU32,
    refuse_connect: Mutex<Option<String>>,
}

impl MockProximityLink {
    pub fn new() -> Self {
        Self {
            readings: Mutex::new(VecDeque::new()),
            events: broadcast::channel(16).0,
            connects: AtomicU32::new(0),
            disconnects: AtomicU32::new(0),
            refuse_connect: Mutex::new(None),
        }
    }

    pub fn plan_reading(&self, rssi: i16) {
        self.readings.lock().unwrap().push_back(Ok(rssi));
    }

    pub fn plan_read_failure(&self, reason: &str) {
        self.readings.lock().unwrap().push_back(Err(reason.to_string()));
    }

    pub fn refuse_next_connect(&self, reason: &str) {
        *self.refuse_connect.lock().unwrap() = Some(reason.to_string());
    }

    pub fn connect_count(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> u32 {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProximityLink for MockProximityLink {
    async fn connect(&self, address: &str) -> Result<(), ProximityError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = self.refuse_connect.lock().unwrap().take() {
            return Err(ProximityError::ConnectFailed {
                address: address.to_string(),
                reason,
            });
        }
        Ok(())
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    async fn read_signal_strength(&self) -> Result<i16, ProximityError> {
        match self.readings.lock().unwrap().pop_front() {
            Some(Ok(rssi)) => Ok(rssi),
            Some(Err(reason)) => Err(ProximityError::ReadFailed(reason)),
            None => Err(ProximityError::ReadFailed("no reading planned".into())),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<ProximityEvent> {
        self.events.subscribe()
    }
}

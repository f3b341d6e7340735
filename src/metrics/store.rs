use std::sync::Arc;

use tokio::sync::watch;

use super::types::{HeartRateSample, MovementSample, ProximitySample, ScreenLock};

/// Latest-value broadcast store for the raw device signals.
///
/// Each field is a single-writer, multi-reader cell: producers replace the
/// latest value, consumers subscribe to a live sequence of updates. A slow
/// consumer observes the newest value, not every intermediate one. `None`
/// means the signal has not been observed yet (or was cleared).
pub struct MetricsStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    heart_rate: watch::Sender<Option<HeartRateSample>>,
    movement: watch::Sender<Option<MovementSample>>,
    signal_strength: watch::Sender<Option<ProximitySample>>,
    on_wrist: watch::Sender<Option<bool>>,
    screen_lock: watch::Sender<Option<ScreenLock>>,
    wearable_link: watch::Sender<Option<bool>>,
}

impl MetricsStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StoreInner {
                heart_rate: watch::channel(None).0,
                movement: watch::channel(None).0,
                signal_strength: watch::channel(None).0,
                on_wrist: watch::channel(None).0,
                screen_lock: watch::channel(None).0,
                wearable_link: watch::channel(None).0,
            }),
        }
    }

    pub fn publish_heart_rate(&self, sample: HeartRateSample) {
        self.inner.heart_rate.send_replace(Some(sample));
    }

    pub fn publish_movement(&self, sample: MovementSample) {
        self.inner.movement.send_replace(Some(sample));
    }

    pub fn publish_signal_strength(&self, sample: ProximitySample) {
        self.inner.signal_strength.send_replace(Some(sample));
    }

    /// Resets the proximity reading to unknown. Used when monitoring stops
    /// or the link is lost, so consumers never act on a dead link's value.
    pub fn clear_signal_strength(&self) {
        self.inner.signal_strength.send_replace(None);
    }

    pub fn publish_on_wrist(&self, on_wrist: bool) {
        self.inner.on_wrist.send_replace(Some(on_wrist));
    }

    pub fn publish_screen_lock(&self, state: ScreenLock) {
        self.inner.screen_lock.send_replace(Some(state));
    }

    pub fn publish_wearable_link(&self, connected: bool) {
        self.inner.wearable_link.send_replace(Some(connected));
    }

    pub fn watch_heart_rate(&self) -> watch::Receiver<Option<HeartRateSample>> {
        self.inner.heart_rate.subscribe()
    }

    pub fn watch_movement(&self) -> watch::Receiver<Option<MovementSample>> {
        self.inner.movement.subscribe()
    }

    pub fn watch_signal_strength(&self) -> watch::Receiver<Option<ProximitySample>> {
        self.inner.signal_strength.subscribe()
    }

    pub fn watch_on_wrist(&self) -> watch::Receiver<Option<bool>> {
        self.inner.on_wrist.subscribe()
    }

    pub fn watch_screen_lock(&self) -> watch::Receiver<Option<ScreenLock>> {
        self.inner.screen_lock.subscribe()
    }

    pub fn watch_wearable_link(&self) -> watch::Receiver<Option<bool>> {
        self.inner.wearable_link.subscribe()
    }

    pub fn latest_signal_strength(&self) -> Option<ProximitySample> {
        *self.inner.signal_strength.subscribe().borrow()
    }
}

impl Default for MetricsStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MetricsStore {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publishes_latest_value_to_subscribers() {
        let store = MetricsStore::new();
        let mut rx = store.watch_signal_strength();
        assert_eq!(*rx.borrow(), None);

        store.publish_signal_strength(ProximitySample {
            rssi_dbm: -70,
            observed_at_ms: 1,
        });
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().unwrap().rssi_dbm, -70);
    }

    #[tokio::test]
    async fn slow_subscriber_sees_newest_value_only() {
        let store = MetricsStore::new();
        let mut rx = store.watch_on_wrist();

        store.publish_on_wrist(true);
        store.publish_on_wrist(false);

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), Some(false));
    }

    #[tokio::test]
    async fn clearing_signal_strength_resets_to_unknown() {
        let store = MetricsStore::new();
        store.publish_signal_strength(ProximitySample {
            rssi_dbm: -55,
            observed_at_ms: 2,
        });
        assert!(store.latest_signal_strength().is_some());

        store.clear_signal_strength();
        assert_eq!(store.latest_signal_strength(), None);
    }
}

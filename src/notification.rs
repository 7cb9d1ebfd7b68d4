use crate::models::EnrichedEvent;
use std::{
    fmt,
    sync::{Arc, RwLock},
};

/// Why events were rejected before reaching the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    /// Event name or type failed validation.
    InvalidEvent,
    /// A single event was larger than the maximum request size.
    SizeLimitExceeded,
    /// The collector turned off sending for the event's tenant.
    KillSwitch,
}

/// Why events were dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// The inbound queues were full and nothing could be evicted.
    QueueFull,
    /// The collector answered with a status that must not be retried.
    NonRetryableStatus,
    /// The event was sent the maximum number of times.
    MaxRetryLimit,
    /// Transmission was paused on a pipeline that drops events on pause.
    Paused,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RejectReason::InvalidEvent => "invalid_event",
            RejectReason::SizeLimitExceeded => "size_limit_exceeded",
            RejectReason::KillSwitch => "kill_switch",
        })
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DropReason::QueueFull => "queue_full",
            DropReason::NonRetryableStatus => "non_retryable_status",
            DropReason::MaxRetryLimit => "max_retry_limit",
            DropReason::Paused => "paused",
        })
    }
}

/// Receives the outcome of logged events.
///
/// Listeners are called from the pipeline's scheduler task (and from the logging thread for
/// [`RejectReason::InvalidEvent`]), so they should return quickly.
pub trait NotificationListener: Send + Sync {
    /// The collector accepted the events.
    fn events_sent(&self, _events: &[EnrichedEvent]) {}

    /// The events were dropped.
    fn events_dropped(&self, _events: &[EnrichedEvent], _reason: DropReason) {}

    /// The events were rejected.
    fn events_rejected(&self, _events: &[EnrichedEvent], _reason: RejectReason) {}

    /// A send failed and will be retried.
    fn events_retrying(&self, _events: &[EnrichedEvent]) {}
}

/// Broadcasts event outcomes to every registered listener of a pipeline.
#[derive(Default)]
pub(crate) struct NotificationManager {
    listeners: RwLock<Vec<Arc<dyn NotificationListener>>>,
}

impl fmt::Debug for NotificationManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationManager")
            .field("listeners", &self.snapshot().len())
            .finish()
    }
}

impl NotificationManager {
    pub(crate) fn add_listener(&self, listener: Arc<dyn NotificationListener>) {
        if let Ok(mut listeners) = self.listeners.write() {
            listeners.push(listener);
        }
    }

    pub(crate) fn remove_listener(&self, listener: &Arc<dyn NotificationListener>) {
        if let Ok(mut listeners) = self.listeners.write() {
            listeners.retain(|l| !Arc::ptr_eq(l, listener));
        }
    }

    pub(crate) fn events_sent(&self, events: &[EnrichedEvent]) {
        if events.is_empty() {
            return;
        }
        for listener in self.snapshot() {
            listener.events_sent(events);
        }
    }

    pub(crate) fn events_dropped(&self, events: &[EnrichedEvent], reason: DropReason) {
        if events.is_empty() {
            return;
        }
        for listener in self.snapshot() {
            listener.events_dropped(events, reason);
        }
    }

    pub(crate) fn events_rejected(&self, events: &[EnrichedEvent], reason: RejectReason) {
        if events.is_empty() {
            return;
        }
        for listener in self.snapshot() {
            listener.events_rejected(events, reason);
        }
    }

    pub(crate) fn events_retrying(&self, events: &[EnrichedEvent]) {
        if events.is_empty() {
            return;
        }
        for listener in self.snapshot() {
            listener.events_retrying(events);
        }
    }

    /// Listeners are cloned out so a listener may register others without deadlocking.
    fn snapshot(&self) -> Vec<Arc<dyn NotificationListener>> {
        self.listeners
            .read()
            .map(|listeners| listeners.clone())
            .unwrap_or_default()
    }
}


#[cfg(test)]
mod tests {
    use super::recording::{Outcome, RecordingListener};
    use super::*;
    use crate::models::{test_event, Priority};

    #[test]
    fn broadcasts_to_all_listeners() {
        let manager = NotificationManager::default();
        let a = Arc::new(RecordingListener::default());
        let b = Arc::new(RecordingListener::default());
        manager.add_listener(a.clone());
        manager.add_listener(b.clone());
        manager.events_dropped(
            &[test_event("t", "event_a", Priority::Low)],
            DropReason::QueueFull,
        );
        let expected = vec![Outcome::Dropped("event_a".into(), DropReason::QueueFull)];
        assert_eq!(expected, a.take());
        assert_eq!(expected, b.take());
    }

    #[test]
    fn removed_listener_is_not_called() {
        let manager = NotificationManager::default();
        let listener = Arc::new(RecordingListener::default());
        let dyn_listener: Arc<dyn NotificationListener> = listener.clone();
        manager.add_listener(dyn_listener.clone());
        manager.remove_listener(&dyn_listener);
        manager.events_sent(&[test_event("t", "event_a", Priority::Low)]);
        assert!(listener.take().is_empty());
    }

    #[test]
    fn empty_slices_are_not_broadcast() {
        let manager = NotificationManager::default();
        let listener = Arc::new(RecordingListener::default());
        manager.add_listener(listener.clone());
        manager.events_retrying(&[]);
        assert!(listener.take().is_empty());
    }
}

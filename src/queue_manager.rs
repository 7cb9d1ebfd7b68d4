use crate::{
    models::{EnrichedEvent, Priority, Request},
    notification::{DropReason, NotificationManager},
    record_batcher::RecordBatcher,
};
use std::{collections::VecDeque, sync::Arc};

/// Events are dropped once they were handed to the network this many times.
pub(crate) const MAX_SEND_ATTEMPTS: u32 = 6;

/// Default bound on the number of queued events across all priorities.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 10_000;

/// Invoked when an explicit upload completed.
pub type FlushCallback = Box<dyn FnOnce() + Send + 'static>;

type Generation = VecDeque<EnrichedEvent>;

/// Inbound queues, one per queued priority, each a queue of generations.
///
/// New events always go to the newest generation, drains always take the oldest one. An upload
/// opens a new generation first so it only covers events logged before it started.
pub(crate) struct QueueManager {
    queues: [VecDeque<Generation>; 3],
    queue_size: usize,
    max_queue_size: usize,
    batcher: RecordBatcher,
    /// The first entry belongs to the upload in progress, if any.
    upload_callbacks: VecDeque<FlushCallback>,
    uploading: bool,
    notifications: Arc<NotificationManager>,
}

impl std::fmt::Debug for QueueManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueManager")
            .field("queue_size", &self.queue_size)
            .field("max_queue_size", &self.max_queue_size)
            .field("uploading", &self.uploading)
            .field("pending_uploads", &self.upload_callbacks.len())
            .finish()
    }
}

/// What to do after an upload finished.
pub(crate) struct UploadCompletion {
    pub(crate) callback: FlushCallback,
    /// Requests of the next queued upload, which started right away.
    pub(crate) next_requests: Option<Vec<Request>>,
}

impl QueueManager {
    pub(crate) fn new(max_queue_size: usize, notifications: Arc<NotificationManager>) -> Self {
        QueueManager {
            queues: std::array::from_fn(|_| VecDeque::from([Generation::new()])),
            queue_size: 0,
            max_queue_size,
            batcher: RecordBatcher::new(),
            upload_callbacks: VecDeque::new(),
            uploading: false,
            notifications,
        }
    }

    /// Queue an event. Immediate events are returned as a request to send right away.
    pub(crate) fn add_event(&mut self, event: EnrichedEvent) -> Option<Request> {
        let Some(index) = event.priority.queue_index() else {
            return Some(Request::single(event));
        };

        if self.queue_size >= self.max_queue_size {
            match self.evict(event.priority) {
                Some(evicted) => {
                    tracing::debug!(name = %evicted.name, "queue full, evicting oldest event");
                    self.notifications
                        .events_dropped(&[evicted], DropReason::QueueFull);
                }
                None => {
                    tracing::debug!(name = %event.name, "queue full, dropping event");
                    self.notifications
                        .events_dropped(&[event], DropReason::QueueFull);
                    return None;
                }
            }
        }

        if let Some(newest) = self.queues[index].back_mut() {
            newest.push_back(event);
            self.queue_size += 1;
        }
        None
    }

    /// Remove the oldest event of the lowest priority not above `priority`.
    fn evict(&mut self, priority: Priority) -> Option<EnrichedEvent> {
        for candidate in Priority::QUEUED.iter().rev().filter(|p| **p <= priority) {
            let index = candidate.queue_index()?;
            let evicted = self.queues[index]
                .iter_mut()
                .find(|generation| !generation.is_empty())
                .and_then(VecDeque::pop_front);
            if evicted.is_some() {
                self.queue_size -= 1;
                return evicted;
            }
        }
        None
    }

    /// Drain the oldest generation of `priority` and every higher priority, High first, into
    /// requests.
    pub(crate) fn send_events_for_priority_and_above(&mut self, priority: Priority) -> Vec<Request> {
        for queued in Priority::QUEUED.iter().filter(|p| **p >= priority) {
            let Some(index) = queued.queue_index() else {
                continue;
            };
            let drained = self.queues[index]
                .front_mut()
                .map(std::mem::take)
                .unwrap_or_default();
            self.queue_size -= drained.len();
            for event in drained {
                // Queued events are never immediate, so the batcher keeps all of them.
                let _ = self.batcher.add_event_to_batch(event);
            }
        }
        self.batcher.flush_batch()
    }

    /// Start an upload of everything queued so far.
    ///
    /// Returns the requests to send, or `None` if another upload is in progress. In that case
    /// the callback waits for its turn.
    pub(crate) fn upload_now(&mut self, callback: FlushCallback) -> Option<Vec<Request>> {
        self.upload_callbacks.push_back(callback);
        if self.uploading {
            return None;
        }
        Some(self.start_upload())
    }

    fn start_upload(&mut self) -> Vec<Request> {
        self.uploading = true;
        for queue in &mut self.queues {
            queue.push_back(Generation::new());
        }
        self.send_events_for_priority_and_above(Priority::Low)
    }

    pub(crate) fn is_uploading(&self) -> bool {
        self.uploading
    }

    /// Finish the upload in progress once nothing is in flight anymore.
    ///
    /// Leftovers of the retired generation, such as re-queued events, move to the next one.
    pub(crate) fn complete_upload(&mut self) -> Option<UploadCompletion> {
        if !self.uploading {
            return None;
        }
        for queue in &mut self.queues {
            if queue.len() > 1 {
                if let Some(mut retired) = queue.pop_front() {
                    if let Some(next) = queue.front_mut() {
                        retired.append(next);
                        *next = retired;
                    }
                }
            }
        }
        self.uploading = false;
        let callback = self.upload_callbacks.pop_front()?;
        let next_requests = if self.upload_callbacks.is_empty() {
            None
        } else {
            Some(self.start_upload())
        };
        Some(UploadCompletion {
            callback,
            next_requests,
        })
    }

    /// Put the events of a failed send back at the front of their queues.
    pub(crate) fn add_back_request(&mut self, request: Request) {
        let mut exhausted = Vec::new();
        for mut event in request.into_events().into_iter().rev() {
            if event.send_attempt >= MAX_SEND_ATTEMPTS {
                exhausted.push(event);
                continue;
            }
            if event.priority == Priority::ImmediateSync {
                event.priority = Priority::High;
            }
            let Some(index) = event.priority.queue_index() else {
                continue;
            };
            if let Some(oldest) = self.queues[index].front_mut() {
                oldest.push_front(event);
                self.queue_size += 1;
            }
        }
        if !exhausted.is_empty() {
            exhausted.reverse();
            tracing::debug!(count = exhausted.len(), "dropping events after too many attempts");
            self.notifications
                .events_dropped(&exhausted, DropReason::MaxRetryLimit);
        }
    }

    /// Take every queued event, High first, oldest first.
    pub(crate) fn remove_all_events(&mut self) -> Vec<EnrichedEvent> {
        let mut events = Vec::with_capacity(self.queue_size);
        for queued in Priority::QUEUED {
            let Some(index) = queued.queue_index() else {
                continue;
            };
            for generation in &mut self.queues[index] {
                events.extend(generation.drain(..));
            }
        }
        self.queue_size = 0;
        events
    }

    /// Empty every queue, reporting the events as dropped.
    pub(crate) fn drop_all_events(&mut self, reason: DropReason) {
        let dropped = self.remove_all_events();
        if !dropped.is_empty() {
            tracing::debug!(count = dropped.len(), %reason, "dropping queued events");
            self.notifications.events_dropped(&dropped, reason);
        }
    }

    pub(crate) fn has_events(&self) -> bool {
        self.queue_size > 0
    }

    pub(crate) fn queue_size(&self) -> usize {
        self.queue_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_event;
    use crate::notification::recording::{Outcome, RecordingListener};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn manager(max_queue_size: usize) -> (QueueManager, Arc<RecordingListener>) {
        let notifications = Arc::new(NotificationManager::default());
        let listener = Arc::new(RecordingListener::default());
        notifications.add_listener(listener.clone());
        (QueueManager::new(max_queue_size, notifications), listener)
    }

    fn names(requests: &[Request]) -> Vec<String> {
        requests
            .iter()
            .flat_map(|r| r.events().map(|e| e.name.clone()))
            .collect()
    }

    #[test]
    fn immediate_events_are_never_queued() {
        let (mut queues, _) = manager(10);
        let request = queues.add_event(test_event("t", "event_sync", Priority::ImmediateSync));
        assert_eq!(1, request.map(|r| r.event_count()).unwrap_or_default());
        assert!(!queues.has_events());
    }

    #[test]
    fn drains_high_before_normal_before_low() {
        let (mut queues, _) = manager(10);
        queues.add_event(test_event("t", "event_low", Priority::Low));
        queues.add_event(test_event("t", "event_normal", Priority::Normal));
        queues.add_event(test_event("t", "event_high", Priority::High));

        let requests = queues.send_events_for_priority_and_above(Priority::Normal);
        assert_eq!(vec!["event_high", "event_normal"], names(&requests));
        assert_eq!(1, queues.queue_size());

        let requests = queues.send_events_for_priority_and_above(Priority::Low);
        assert_eq!(vec!["event_low"], names(&requests));
        assert!(!queues.has_events());
    }

    #[test]
    fn full_queue_evicts_oldest_lowest() {
        let (mut queues, listener) = manager(3);
        queues.add_event(test_event("t", "event_normal", Priority::Normal));
        queues.add_event(test_event("t", "event_low_1", Priority::Low));
        queues.add_event(test_event("t", "event_low_2", Priority::Low));
        queues.add_event(test_event("t", "event_high", Priority::High));

        assert_eq!(
            vec![Outcome::Dropped("event_low_1".into(), DropReason::QueueFull)],
            listener.take()
        );
        assert_eq!(3, queues.queue_size());
    }

    #[test]
    fn full_queue_drops_new_event_if_nothing_lower() {
        let (mut queues, listener) = manager(2);
        queues.add_event(test_event("t", "event_high_1", Priority::High));
        queues.add_event(test_event("t", "event_high_2", Priority::High));
        queues.add_event(test_event("t", "event_low", Priority::Low));

        assert_eq!(
            vec![Outcome::Dropped("event_low".into(), DropReason::QueueFull)],
            listener.take()
        );
        let requests = queues.send_events_for_priority_and_above(Priority::Low);
        assert_eq!(vec!["event_high_1", "event_high_2"], names(&requests));
    }

    #[test]
    fn queue_size_never_exceeds_capacity() {
        let (mut queues, listener) = manager(50);
        let priorities = [Priority::Low, Priority::High, Priority::Normal];
        for i in 0..200 {
            let priority = priorities[i % 3];
            queues.add_event(test_event("t", &format!("event_{}", i), priority));
            assert!(queues.queue_size() <= 50);
        }
        assert_eq!(150, listener.take().len());
    }

    #[test]
    fn upload_covers_only_earlier_events() {
        let (mut queues, _) = manager(10);
        queues.add_event(test_event("t", "event_before", Priority::Normal));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let requests = queues
            .upload_now(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .expect("upload started");
        assert_eq!(vec!["event_before"], names(&requests));

        queues.add_event(test_event("t", "event_after", Priority::Normal));
        // A regular drain during the upload still only sees the oldest generation.
        assert!(queues
            .send_events_for_priority_and_above(Priority::Low)
            .is_empty());

        let second = queues.upload_now(Box::new(|| {}));
        assert!(second.is_none());

        let completion = queues.complete_upload().expect("upload in progress");
        (completion.callback)();
        assert_eq!(1, calls.load(Ordering::SeqCst));
        let next = completion.next_requests.expect("queued upload started");
        assert_eq!(vec!["event_after"], names(&next));
        assert!(queues.is_uploading());
    }

    #[test]
    fn add_back_request_requeues_and_drops_exhausted() {
        let (mut queues, listener) = manager(10);
        queues.add_event(test_event("t", "event_new", Priority::High));

        let mut request = Request::new();
        let mut retry = test_event("t", "event_retry", Priority::ImmediateSync);
        retry.send_attempt = 1;
        let mut exhausted = test_event("t", "event_exhausted", Priority::Normal);
        exhausted.send_attempt = MAX_SEND_ATTEMPTS;
        request.add_batch("t".into(), vec![retry, exhausted]);
        queues.add_back_request(request);

        assert_eq!(
            vec![Outcome::Dropped(
                "event_exhausted".into(),
                DropReason::MaxRetryLimit
            )],
            listener.take()
        );
        let requests = queues.send_events_for_priority_and_above(Priority::High);
        assert_eq!(vec!["event_retry", "event_new"], names(&requests));
        assert_eq!(
            Priority::High,
            requests[0].events().next().map(|e| e.priority).unwrap()
        );
    }

    #[test]
    fn remove_all_events_empties_every_generation() {
        let (mut queues, _) = manager(10);
        queues.add_event(test_event("t", "event_low", Priority::Low));
        queues.upload_now(Box::new(|| {}));
        queues.add_event(test_event("t", "event_high", Priority::High));
        let events = queues.remove_all_events();
        assert_eq!(1, events.len());
        assert!(!queues.has_events());
    }

    #[test]
    fn drop_all_events_notifies() {
        let (mut queues, listener) = manager(10);
        queues.add_event(test_event("t", "event_low", Priority::Low));
        queues.add_event(test_event("t", "event_high", Priority::High));
        queues.drop_all_events(DropReason::Paused);
        assert_eq!(
            vec![
                Outcome::Dropped("event_high".into(), DropReason::Paused),
                Outcome::Dropped("event_low".into(), DropReason::Paused),
            ],
            listener.take()
        );
        assert!(!queues.has_events());
        assert_eq!(0, queues.queue_size());
    }
}

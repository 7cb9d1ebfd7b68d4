use crate::{
    http_manager::{HttpManager, ResponseAction, SendOutcome},
    models::EnrichedEvent,
    notification::DropReason,
    queue_manager::{FlushCallback, QueueManager},
    record_batcher::RecordBatcher,
    transmit_profile::TransmitProfiles,
    Error,
};
use futures_util::{
    future::{Fuse, FusedFuture as _},
    pin_mut, select_biased, FutureExt as _,
};
use std::{
    collections::BTreeMap,
    time::{Duration, Instant},
};
use tokio::sync::{mpsc, oneshot};

/// Highest power of two the timer interval is multiplied with while backing off.
pub(crate) const MAX_BACKOFF_COUNT: u32 = 4;

/// Explicit flushes closer together than this are ignored.
pub(crate) const FLUSH_DEBOUNCE: Duration = Duration::from_secs(30);

/// Commands and results handled by the scheduler task.
pub(crate) enum Message {
    Event(EnrichedEvent),
    /// Upload everything logged so far. The sender learns whether the flush was accepted.
    Flush(FlushCallback, oneshot::Sender<bool>),
    Pause,
    Resume,
    SetProfile(String, oneshot::Sender<bool>),
    LoadProfiles(BTreeMap<String, [i64; 3]>, oneshot::Sender<Result<(), Error>>),
    LoadProfilesJson(String, oneshot::Sender<Result<(), Error>>),
    ResetProfiles,
    ResetClockSkew,
    Response(SendOutcome),
    Retry(u64),
    Teardown(oneshot::Sender<()>),
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Message::Event(_) => "Event",
            Message::Flush(..) => "Flush",
            Message::Pause => "Pause",
            Message::Resume => "Resume",
            Message::SetProfile(..) => "SetProfile",
            Message::LoadProfiles(..) => "LoadProfiles",
            Message::LoadProfilesJson(..) => "LoadProfilesJson",
            Message::ResetProfiles => "ResetProfiles",
            Message::ResetClockSkew => "ResetClockSkew",
            Message::Response(_) => "Response",
            Message::Retry(_) => "Retry",
            Message::Teardown(_) => "Teardown",
        };
        f.write_str(name)
    }
}

/// Owns the queues and the connections and decides when to send.
#[derive(Debug)]
pub(crate) struct TransmissionScheduler {
    queues: QueueManager,
    http: HttpManager,
    profiles: TransmitProfiles,
    backoff_count: u32,
    tick: u64,
    paused: bool,
    drop_on_pause: bool,
    last_flush: Option<Instant>,
    /// The running timer must be replaced because its interval changed.
    cancel_timer: bool,
}

enum Wakeup {
    Message(Option<Message>),
    Timer,
}

fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

impl TransmissionScheduler {
    pub(crate) fn new(queues: QueueManager, http: HttpManager, drop_on_pause: bool) -> Self {
        TransmissionScheduler {
            queues,
            http,
            profiles: TransmitProfiles::default(),
            backoff_count: 0,
            tick: 0,
            paused: false,
            drop_on_pause,
            last_flush: None,
            cancel_timer: false,
        }
    }

    /// Run until torn down or until every sender is gone.
    pub(crate) async fn run(mut self, receiver: mpsc::UnboundedReceiver<Message>) {
        let mut receiver = receiver;
        let timer = Fuse::terminated();
        pin_mut!(timer);

        loop {
            let wakeup = select_biased! {
                msg = receiver.recv().fuse() => Wakeup::Message(msg),
                _ = timer => Wakeup::Timer,
            };
            match wakeup {
                Wakeup::Message(None) => break,
                Wakeup::Message(Some(Message::Teardown(done))) => {
                    self.teardown().await;
                    let _ = done.send(());
                    break;
                }
                Wakeup::Message(Some(msg)) => self.handle_message(msg),
                Wakeup::Timer => self.on_timer(),
            }

            if std::mem::take(&mut self.cancel_timer) {
                timer.set(Fuse::terminated());
            }
            if timer.is_terminated() {
                if let Some(interval) = self.next_timer_interval() {
                    timer.set(tokio::time::sleep(interval).fuse());
                }
            }
        }
        tracing::debug!("transmission scheduler stopped");
    }

    fn handle_message(&mut self, msg: Message) {
        match msg {
            Message::Event(event) => self.add_event(event),
            Message::Flush(callback, accepted) => {
                let _ = accepted.send(self.flush(callback));
            }
            Message::Pause => self.pause(),
            Message::Resume => self.resume(),
            Message::SetProfile(name, result) => {
                let _ = result.send(self.set_transmit_profile(&name));
            }
            Message::LoadProfiles(profiles, result) => {
                let _ = result.send(self.profiles.load(profiles));
            }
            Message::LoadProfilesJson(json, result) => {
                let _ = result.send(self.profiles.load_json(&json));
            }
            Message::ResetProfiles => {
                self.profiles.reset();
                self.restart_timer();
            }
            Message::ResetClockSkew => self.http.reset_clock_skew(),
            Message::Response(outcome) => {
                match self.http.handle_response(outcome, now()) {
                    ResponseAction::None => {}
                    ResponseAction::ClearBackOff => self.clear_back_off(),
                    ResponseAction::BackOffAndRequeue(request) => {
                        self.queues.add_back_request(request);
                        self.back_off_transmission();
                    }
                    ResponseAction::Requeue(request) => self.queues.add_back_request(request),
                }
                self.http.send_queued_requests(now());
                self.complete_uploads();
            }
            Message::Retry(id) => {
                self.http.handle_retry(id);
                self.http.send_queued_requests(now());
                self.complete_uploads();
            }
            Message::Teardown(done) => {
                let _ = done.send(());
            }
        }
    }

    fn add_event(&mut self, event: EnrichedEvent) {
        if let Some(request) = self.queues.add_event(event) {
            self.http.add_sync_request(request);
            self.http.send_queued_requests(now());
        }
    }

    /// Interval of the next timer, if one should run.
    fn next_timer_interval(&self) -> Option<Duration> {
        if self.paused || !self.queues.has_events() {
            return None;
        }
        let high = self.profiles.current().high_interval()?;
        Some(high * 2u32.pow(self.backoff_count))
    }

    fn on_timer(&mut self) {
        if self.paused {
            return;
        }
        self.tick += 1;
        let Some((priority, restart)) = self.profiles.current().priority_for_tick(self.tick) else {
            return;
        };
        if restart {
            self.tick = 0;
        }
        tracing::debug!(?priority, "transmit timer fired");
        let requests = self.queues.send_events_for_priority_and_above(priority);
        self.http.add_requests(requests);
        self.http.send_queued_requests(now());
    }

    fn restart_timer(&mut self) {
        self.tick = 0;
        self.cancel_timer = true;
    }

    pub(crate) fn back_off_transmission(&mut self) {
        if self.backoff_count < MAX_BACKOFF_COUNT {
            self.backoff_count += 1;
        }
        tracing::debug!(backoff_count = self.backoff_count, "backing off transmission");
        self.cancel_timer = true;
    }

    pub(crate) fn clear_back_off(&mut self) {
        if self.backoff_count != 0 {
            self.backoff_count = 0;
            self.cancel_timer = true;
        }
    }

    fn set_transmit_profile(&mut self, name: &str) -> bool {
        if !self.profiles.set(name) {
            tracing::debug!(profile = name, "unknown transmit profile");
            return false;
        }
        self.restart_timer();
        true
    }

    /// Start an upload unless paused or flushed recently. Returns whether it started.
    fn flush(&mut self, callback: FlushCallback) -> bool {
        let now = now();
        let recent = self
            .last_flush
            .is_some_and(|last| now.duration_since(last) < FLUSH_DEBOUNCE);
        if self.paused || recent {
            tracing::debug!(paused = self.paused, "ignoring flush");
            return false;
        }
        self.last_flush = Some(now);
        if let Some(requests) = self.queues.upload_now(callback) {
            self.http.add_requests(requests);
            self.http.send_queued_requests(now);
        }
        self.complete_uploads();
        true
    }

    /// Finish uploads as long as nothing is left on the wire.
    fn complete_uploads(&mut self) {
        while self.queues.is_uploading() && self.http.is_idle() {
            let Some(completion) = self.queues.complete_upload() else {
                break;
            };
            (completion.callback)();
            if let Some(requests) = completion.next_requests {
                self.http.add_requests(requests);
                self.http.send_queued_requests(now());
            }
        }
    }

    fn pause(&mut self) {
        self.paused = true;
        self.http.pause();
        self.cancel_timer = true;
        if self.drop_on_pause {
            self.queues.drop_all_events(DropReason::Paused);
            self.http.clear_outbound();
            self.complete_uploads();
        }
    }

    fn resume(&mut self) {
        self.paused = false;
        self.http.resume(now());
    }

    async fn teardown(&mut self) {
        self.paused = true;
        let mut batcher = RecordBatcher::new();
        let mut sync_requests = Vec::new();
        for event in self.queues.remove_all_events() {
            if let Some(request) = batcher.add_event_to_batch(event) {
                sync_requests.push(request);
            }
        }
        let mut requests = batcher.flush_batch();
        requests.extend(sync_requests);
        tracing::debug!(requests = requests.len(), "tearing down");
        self.http.teardown(requests, now()).await;
    }

    #[cfg(test)]
    pub(crate) fn backoff_count(&self) -> u32 {
        self.backoff_count
    }
}

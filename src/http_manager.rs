use crate::{
    clock_skew::ClockSkewManager,
    convert::now_millis,
    http_client::{BeaconSender, HttpClient, HttpError},
    kill_switch::{KillDuration, KillSwitch},
    models::Request,
    notification::{DropReason, NotificationManager, RejectReason},
    retry_policy::RetryPolicy,
    serializer::{PayloadEncoding, Serializer},
    transmission::Message,
    Error, SDK_VERSION,
};
use bytes::Bytes;
use http::Uri;
use std::{
    collections::{BTreeMap, VecDeque},
    convert::TryFrom,
    future::Future,
    sync::Arc,
    time::Instant,
};
use tokio::sync::mpsc::WeakUnboundedSender;

/// Maximum number of immediate resends of a failed request.
pub(crate) const MAX_RETRIES: u32 = 1;

/// Default number of requests in flight at the same time.
pub const DEFAULT_MAX_CONNECTIONS: usize = 2;

const STATUS_OK: u16 = 200;
const CONTENT_TYPE_BOND: &str = "application/bond-compact-binary";
const CLIENT_ID: &str = "NO_AUTH";

const HEADER_KILL_TOKENS: &str = "kill-tokens";
const HEADER_KILL_DURATION: &str = "kill-duration-seconds";
const HEADER_TIME_DELTA: &str = "time-delta-millis";

/// A request waiting for a connection.
#[derive(Debug)]
pub(crate) struct PendingRequest {
    pub(crate) request: Request,
    pub(crate) retry_count: u32,
    pub(crate) is_sync: bool,
}

/// What the collector answered. Status 0 means no answer at all.
#[derive(Debug, Default)]
pub(crate) struct CollectorResponse {
    pub(crate) status: u16,
    pub(crate) kill_tokens: Option<String>,
    pub(crate) kill_duration: Option<String>,
    pub(crate) time_delta: Option<String>,
}

impl CollectorResponse {
    fn from_result(result: Result<http::Response<Bytes>, HttpError>) -> Self {
        match result {
            Ok(response) => {
                let header = |name: &str| {
                    response
                        .headers()
                        .get(name)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string)
                };
                CollectorResponse {
                    status: response.status().as_u16(),
                    kill_tokens: header(HEADER_KILL_TOKENS),
                    kill_duration: header(HEADER_KILL_DURATION),
                    time_delta: header(HEADER_TIME_DELTA),
                }
            }
            Err(err) => {
                let err = Error::UploadConnection(err);
                tracing::warn!(error = %err, "no response from collector");
                CollectorResponse::default()
            }
        }
    }
}

/// Result of a send, reported back to the scheduler.
#[derive(Debug)]
pub(crate) struct SendOutcome {
    pub(crate) pending: PendingRequest,
    pub(crate) response: CollectorResponse,
}

/// Follow-up work for the scheduler after a response was handled.
#[derive(Debug, PartialEq)]
pub(crate) enum ResponseAction {
    None,
    ClearBackOff,
    /// Retries are exhausted. Put the events back and slow down.
    BackOffAndRequeue(Request),
    /// A synchronous send failed. Put the events back as High priority.
    Requeue(Request),
}

/// Sends requests to the collector over a bounded number of connections.
pub(crate) struct HttpManager {
    client: Arc<dyn HttpClient>,
    beacon: Option<Arc<dyn BeaconSender>>,
    endpoint: Uri,
    serializer: Serializer,
    retry_policy: RetryPolicy,
    outbound: VecDeque<PendingRequest>,
    active_connections: usize,
    max_connections: usize,
    retrying: BTreeMap<u64, PendingRequest>,
    next_retry_id: u64,
    paused: bool,
    kill_switch: KillSwitch,
    clock_skew: ClockSkewManager,
    notifications: Arc<NotificationManager>,
    messages: WeakUnboundedSender<Message>,
}

impl std::fmt::Debug for HttpManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpManager")
            .field("endpoint", &self.endpoint)
            .field("outbound", &self.outbound.len())
            .field("active_connections", &self.active_connections)
            .field("retrying", &self.retrying.len())
            .field("paused", &self.paused)
            .finish()
    }
}

/// Settings of an [`HttpManager`].
#[derive(Debug, Clone)]
pub(crate) struct HttpSettings {
    pub(crate) endpoint: Uri,
    pub(crate) max_connections: usize,
    pub(crate) encoding: PayloadEncoding,
    pub(crate) retry_policy: RetryPolicy,
}

impl HttpManager {
    pub(crate) fn new(
        client: Arc<dyn HttpClient>,
        beacon: Option<Arc<dyn BeaconSender>>,
        settings: HttpSettings,
        notifications: Arc<NotificationManager>,
        messages: WeakUnboundedSender<Message>,
    ) -> Self {
        HttpManager {
            client,
            beacon,
            endpoint: settings.endpoint,
            serializer: Serializer::new(settings.encoding),
            retry_policy: settings.retry_policy,
            outbound: VecDeque::new(),
            active_connections: 0,
            max_connections: settings.max_connections.max(1),
            retrying: BTreeMap::new(),
            next_retry_id: 0,
            paused: false,
            kill_switch: KillSwitch::default(),
            clock_skew: ClockSkewManager::new(),
            notifications,
            messages,
        }
    }

    /// Queue requests at the back of the outbound queue.
    pub(crate) fn add_requests(&mut self, requests: Vec<Request>) {
        self.outbound
            .extend(requests.into_iter().map(|request| PendingRequest {
                request,
                retry_count: 0,
                is_sync: false,
            }));
    }

    /// Queue a synchronous request ahead of everything else.
    pub(crate) fn add_sync_request(&mut self, request: Request) {
        self.outbound.push_front(PendingRequest {
            request,
            retry_count: 0,
            is_sync: true,
        });
    }

    /// Send queued requests while connections are free.
    pub(crate) fn send_queued_requests(&mut self, now: Instant) {
        while self.active_connections < self.max_connections && !self.paused {
            let Some(pending) = self.outbound.pop_front() else {
                break;
            };
            if let Some(pending) = self.send_request(pending, now) {
                // Sending is gated until the first response arrives.
                self.outbound.push_front(pending);
                break;
            }
        }
    }

    /// Encode and send a request. Returns the request if the clock skew gate is closed.
    fn send_request(&mut self, pending: PendingRequest, now: Instant) -> Option<PendingRequest> {
        let PendingRequest {
            request,
            retry_count,
            is_sync,
        } = pending;
        let request = self.remove_killed_tenants(request, now)?;

        let encoded = self.serializer.encode(request);
        if !encoded.oversized.is_empty() {
            tracing::warn!(
                count = encoded.oversized.len(),
                "rejecting events larger than the maximum request size"
            );
            self.notifications
                .events_rejected(&encoded.oversized, RejectReason::SizeLimitExceeded);
        }
        if let Some(remaining) = encoded.remaining {
            self.outbound.push_front(PendingRequest {
                request: remaining,
                retry_count: 0,
                is_sync,
            });
        }
        let mut sent = encoded.sent;
        if sent.is_empty() {
            return None;
        }
        if !self.clock_skew.allow_request_sending() {
            return Some(PendingRequest {
                request: sent,
                retry_count,
                is_sync,
            });
        }

        let http_request = match self.build_http_request(&sent, encoded.body) {
            Ok(http_request) => http_request,
            Err(err) => {
                tracing::warn!(error = %err, "could not build upload request");
                self.clock_skew.request_failed();
                self.notifications
                    .events_dropped(&sent.into_events(), DropReason::NonRetryableStatus);
                return None;
            }
        };
        for event in sent.events_mut() {
            event.send_attempt += 1;
        }
        tracing::debug!(
            events = sent.event_count(),
            retry_count,
            is_sync,
            "sending upload request"
        );

        self.active_connections += 1;
        let client = Arc::clone(&self.client);
        let messages = self.messages.clone();
        let pending = PendingRequest {
            request: sent,
            retry_count,
            is_sync,
        };
        tokio::spawn(async move {
            let response = CollectorResponse::from_result(client.send_bytes(http_request).await);
            if let Some(messages) = messages.upgrade() {
                let _ = messages.send(Message::Response(SendOutcome { pending, response }));
            }
        });
        None
    }

    fn remove_killed_tenants(&mut self, mut request: Request, now: Instant) -> Option<Request> {
        let kill_switch = &mut self.kill_switch;
        let killed: Vec<String> = request
            .tenant_tokens()
            .filter(|token| kill_switch.is_tenant_killed(token, now))
            .map(str::to_string)
            .collect();
        self.reject_tenants(&mut request, &killed);
        Some(request).filter(|r| !r.is_empty())
    }

    fn reject_tenants(&self, request: &mut Request, tokens: &[String]) {
        for token in tokens {
            if let Some(batches) = request.remove_tenant(token) {
                let events: Vec<_> = batches.into_iter().flatten().collect();
                tracing::debug!(tenant = %token, count = events.len(), "tenant is killed");
                self.notifications
                    .events_rejected(&events, RejectReason::KillSwitch);
            }
        }
    }

    fn build_http_request(
        &self,
        request: &Request,
        body: Bytes,
    ) -> Result<http::Request<Bytes>, http::Error> {
        let mut uri = format!(
            "{}?qsp=true&content-type={}&client-id={}&sdk-version={}&x-apikey={}&client-time-epoch-millis={}",
            self.endpoint,
            CONTENT_TYPE_BOND,
            CLIENT_ID,
            SDK_VERSION,
            request.tenant_tokens().collect::<Vec<_>>().join(","),
            now_millis(),
        );
        if let Some(delta) = self.clock_skew.clock_skew_value() {
            uri.push_str("&time-delta-to-apply-millis=");
            uri.push_str(delta);
        }
        if self.serializer.encoding() == PayloadEncoding::Base64 {
            uri.push_str("&content-encoding=base64");
        }
        http::Request::post(Uri::try_from(uri)?)
            .header(http::header::CONTENT_TYPE, CONTENT_TYPE_BOND)
            .body(body)
    }

    /// Interpret the collector's answer to a request sent earlier.
    pub(crate) fn handle_response(&mut self, outcome: SendOutcome, now: Instant) -> ResponseAction {
        let SendOutcome { pending, response } = outcome;
        let PendingRequest {
            mut request,
            retry_count,
            is_sync,
        } = pending;
        self.active_connections = self.active_connections.saturating_sub(1);

        if response.status == 0 {
            self.clock_skew.request_failed();
        } else {
            self.clock_skew
                .set_clock_skew(response.time_delta.as_deref());
        }

        if let Some(tokens) = &response.kill_tokens {
            let duration = response
                .kill_duration
                .as_deref()
                .and_then(KillDuration::parse);
            if let Some(duration) = duration {
                let this_request_only =
                    self.kill_switch
                        .set_kill_switch_tenants(tokens, duration, now);
                self.reject_tenants(&mut request, &this_request_only);
            }
        }
        let Some(request) = self.remove_killed_tenants(request, now) else {
            return ResponseAction::None;
        };

        let status = response.status;
        if status == STATUS_OK {
            self.notifications
                .events_sent(&request.events().cloned().collect::<Vec<_>>());
            return ResponseAction::ClearBackOff;
        }

        if !RetryPolicy::should_retry_for_status(status) {
            tracing::warn!(status, "collector rejected request, dropping events");
            self.notifications
                .events_dropped(&request.into_events(), DropReason::NonRetryableStatus);
            return ResponseAction::None;
        }

        if is_sync {
            tracing::debug!(status, "synchronous send failed, queueing events");
            return ResponseAction::Requeue(request);
        }

        if retry_count < MAX_RETRIES {
            tracing::debug!(status, retry_count, "retrying upload request");
            self.notifications
                .events_retrying(&request.events().cloned().collect::<Vec<_>>());
            self.schedule_retry(PendingRequest {
                request,
                retry_count: retry_count + 1,
                is_sync,
            });
            return ResponseAction::None;
        }

        tracing::debug!(status, "retries exhausted, backing off");
        ResponseAction::BackOffAndRequeue(request)
    }

    /// Park `pending` until its backoff elapsed. Only the id travels through the timer task.
    fn schedule_retry(&mut self, pending: PendingRequest) {
        let delay = self.retry_policy.backoff(pending.retry_count - 1);
        let id = self.next_retry_id;
        self.next_retry_id += 1;
        self.retrying.insert(id, pending);
        let messages = self.messages.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(messages) = messages.upgrade() {
                let _ = messages.send(Message::Retry(id));
            }
        });
    }

    /// A delayed retry is due. It goes ahead of everything queued.
    ///
    /// Unknown ids belong to retries already sent by a teardown.
    pub(crate) fn handle_retry(&mut self, id: u64) {
        if let Some(pending) = self.retrying.remove(&id) {
            self.outbound.push_front(pending);
        }
    }

    /// Nothing queued, in flight or waiting for a retry.
    pub(crate) fn is_idle(&self) -> bool {
        self.outbound.is_empty() && self.active_connections == 0 && self.retrying.is_empty()
    }

    pub(crate) fn pause(&mut self) {
        self.paused = true;
    }

    pub(crate) fn resume(&mut self, now: Instant) {
        self.paused = false;
        self.send_queued_requests(now);
    }

    /// Drop every queued request. In-flight sends and pending retries are kept.
    pub(crate) fn clear_outbound(&mut self) {
        let dropped: Vec<_> = self
            .outbound
            .drain(..)
            .flat_map(|p| p.request.into_events())
            .collect();
        if !dropped.is_empty() {
            tracing::debug!(count = dropped.len(), "dropping queued requests on pause");
            self.notifications
                .events_dropped(&dropped, DropReason::Paused);
        }
    }

    pub(crate) fn reset_clock_skew(&mut self) {
        self.clock_skew.reset();
    }

    /// Send the requests waiting for a retry, the queued requests and `requests` once, without
    /// further retries.
    ///
    /// Uses the beacon transport when there is one. The returned future completes when every
    /// send finished. Failures are ignored.
    pub(crate) fn teardown(
        &mut self,
        requests: Vec<Request>,
        now: Instant,
    ) -> impl Future<Output = ()> + Send + 'static {
        let retrying = std::mem::take(&mut self.retrying);
        let mut all: Vec<Request> = retrying
            .into_values()
            .chain(self.outbound.drain(..))
            .map(|p| p.request)
            .collect();
        all.extend(requests);

        let mut sends = Vec::new();
        for request in all {
            let mut next = self.remove_killed_tenants(request, now);
            while let Some(request) = next.take() {
                let encoded = self.serializer.encode(request);
                self.notifications
                    .events_rejected(&encoded.oversized, RejectReason::SizeLimitExceeded);
                next = encoded.remaining;
                let mut sent = encoded.sent;
                if sent.is_empty() {
                    continue;
                }
                let http_request = match self.build_http_request(&sent, encoded.body) {
                    Ok(http_request) => http_request,
                    Err(err) => {
                        tracing::debug!(error = %err, "could not build teardown request");
                        continue;
                    }
                };
                for event in sent.events_mut() {
                    event.send_attempt += 1;
                }
                let client = Arc::clone(&self.client);
                let beacon = self.beacon.clone();
                let notifications = Arc::clone(&self.notifications);
                sends.push(async move {
                    let delivered = match beacon {
                        Some(beacon) => beacon.send_beacon(http_request).await.is_ok(),
                        None => matches!(
                            client.send_bytes(http_request).await,
                            Ok(response) if response.status().as_u16() == STATUS_OK
                        ),
                    };
                    if delivered {
                        notifications.events_sent(&sent.into_events());
                    } else {
                        tracing::debug!("teardown request failed");
                    }
                });
            }
        }

        async move {
            futures_util::future::join_all(sends).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{test_event, Priority},
        notification::recording::{Outcome, RecordingListener},
    };
    use async_trait::async_trait;
    use std::{str::FromStr, sync::Mutex, time::Duration};
    use tokio::sync::mpsc;

    #[derive(Debug, Default)]
    struct NoopClient {
        requests: Mutex<Vec<http::Request<Bytes>>>,
    }

    #[async_trait]
    impl HttpClient for NoopClient {
        async fn send_bytes(
            &self,
            request: http::Request<Bytes>,
        ) -> Result<http::Response<Bytes>, HttpError> {
            self.requests.lock().unwrap().push(request);
            Ok(http::Response::builder().status(200).body(Bytes::new())?)
        }
    }

    fn manager() -> (
        HttpManager,
        Arc<RecordingListener>,
        mpsc::UnboundedSender<Message>,
    ) {
        let notifications = Arc::new(NotificationManager::default());
        let listener = Arc::new(RecordingListener::default());
        notifications.add_listener(listener.clone());
        let (sender, _receiver) = mpsc::unbounded_channel();
        let manager = HttpManager::new(
            Arc::new(NoopClient::default()),
            None,
            HttpSettings {
                endpoint: Uri::from_str("https://collector/path").unwrap(),
                max_connections: DEFAULT_MAX_CONNECTIONS,
                encoding: PayloadEncoding::Binary,
                retry_policy: RetryPolicy::default(),
            },
            notifications,
            sender.downgrade(),
        );
        (manager, listener, sender)
    }

    fn outcome(names: &[&str], retry_count: u32, response: CollectorResponse) -> SendOutcome {
        let mut request = Request::new();
        let events = names
            .iter()
            .map(|name| {
                let tenant = if name.ends_with("_t2") { "t2" } else { "t1" };
                test_event(tenant, name, Priority::Normal)
            })
            .collect::<Vec<_>>();
        for event in events {
            request.add_batch(event.tenant_token.clone(), vec![event]);
        }
        SendOutcome {
            pending: PendingRequest {
                request,
                retry_count,
                is_sync: false,
            },
            response,
        }
    }

    fn status(status: u16) -> CollectorResponse {
        CollectorResponse {
            status,
            ..Default::default()
        }
    }

    #[test]
    fn uri_carries_query_parameters() {
        let (manager, _, _sender) = manager();
        let request = Request::single(test_event("t1", "event_a", Priority::Normal));
        let http_request = manager.build_http_request(&request, Bytes::new()).unwrap();
        let query = http_request.uri().query().unwrap();
        for expected in [
            "qsp=true",
            "content-type=application/bond-compact-binary",
            "client-id=NO_AUTH",
            "x-apikey=t1",
            "client-time-epoch-millis=",
        ] {
            assert!(query.contains(expected), "{} missing in {}", expected, query);
        }
        assert!(!query.contains("time-delta-to-apply-millis"));
        assert!(!query.contains("content-encoding"));
    }

    #[tokio::test]
    async fn ok_clears_backoff_and_notifies_sent() {
        let (mut manager, listener, _sender) = manager();
        manager.active_connections = 1;
        let action = manager.handle_response(outcome(&["event_a"], 0, status(200)), Instant::now());
        assert_eq!(ResponseAction::ClearBackOff, action);
        assert_eq!(vec![Outcome::Sent("event_a".into())], listener.take());
        assert!(manager.is_idle());
    }

    #[tokio::test]
    async fn retryable_status_is_retried_once() {
        let (mut manager, listener, _sender) = manager();
        manager.active_connections = 1;
        let action = manager.handle_response(outcome(&["event_a"], 0, status(503)), Instant::now());
        assert_eq!(ResponseAction::None, action);
        assert_eq!(vec![Outcome::Retrying("event_a".into())], listener.take());
        assert!(!manager.is_idle());

        manager.active_connections = 1;
        let action = manager.handle_response(outcome(&["event_a"], 1, status(0)), Instant::now());
        assert!(matches!(action, ResponseAction::BackOffAndRequeue(_)));
    }

    #[tokio::test]
    async fn non_retryable_status_drops() {
        let (mut manager, listener, _sender) = manager();
        manager.active_connections = 1;
        let action = manager.handle_response(outcome(&["event_a"], 0, status(400)), Instant::now());
        assert_eq!(ResponseAction::None, action);
        assert_eq!(
            vec![Outcome::Dropped(
                "event_a".into(),
                DropReason::NonRetryableStatus
            )],
            listener.take()
        );
    }

    #[tokio::test]
    async fn kill_switch_applies_before_retry() {
        let (mut manager, listener, _sender) = manager();
        manager.active_connections = 1;
        let now = Instant::now();
        let action = manager.handle_response(
            outcome(
                &["event_a", "event_b_t2"],
                0,
                CollectorResponse {
                    status: 503,
                    kill_tokens: Some("t1".into()),
                    kill_duration: Some("60".into()),
                    time_delta: None,
                },
            ),
            now,
        );
        assert_eq!(ResponseAction::None, action);
        assert_eq!(
            vec![
                Outcome::Rejected("event_a".into(), RejectReason::KillSwitch),
                Outcome::Retrying("event_b_t2".into()),
            ],
            listener.take()
        );

        manager.add_requests(vec![Request::single(test_event(
            "t1",
            "event_c",
            Priority::High,
        ))]);
        manager.send_queued_requests(now + Duration::from_secs(30));
        assert_eq!(
            vec![Outcome::Rejected("event_c".into(), RejectReason::KillSwitch)],
            listener.take()
        );
        assert_eq!(0, manager.active_connections);
    }

    #[tokio::test]
    async fn this_request_only_kills_without_remembering() {
        let (mut manager, listener, _sender) = manager();
        manager.active_connections = 1;
        let now = Instant::now();
        let action = manager.handle_response(
            outcome(
                &["event_a"],
                0,
                CollectorResponse {
                    status: 200,
                    kill_tokens: Some("t1".into()),
                    kill_duration: Some("this-request-only".into()),
                    time_delta: None,
                },
            ),
            now,
        );
        assert_eq!(ResponseAction::None, action);
        assert_eq!(
            vec![Outcome::Rejected("event_a".into(), RejectReason::KillSwitch)],
            listener.take()
        );
        assert!(!manager.kill_switch.is_tenant_killed("t1", now));
    }

    #[tokio::test]
    async fn first_request_gates_sending() {
        let (mut manager, _, _sender) = manager();
        let now = Instant::now();
        manager.add_requests(vec![
            Request::single(test_event("t1", "event_a", Priority::Normal)),
            Request::single(test_event("t1", "event_b", Priority::Normal)),
        ]);
        manager.send_queued_requests(now);
        assert_eq!(1, manager.active_connections);
        assert_eq!(1, manager.outbound.len());

        let action = manager.handle_response(
            outcome(
                &["event_a"],
                0,
                CollectorResponse {
                    status: 200,
                    time_delta: Some("-42".into()),
                    ..Default::default()
                },
            ),
            now,
        );
        assert_eq!(ResponseAction::ClearBackOff, action);
        let request = Request::single(test_event("t1", "event_b", Priority::Normal));
        let http_request = manager.build_http_request(&request, Bytes::new()).unwrap();
        assert!(http_request
            .uri()
            .query()
            .unwrap()
            .contains("time-delta-to-apply-millis=-42"));
    }

    #[tokio::test]
    async fn paused_manager_does_not_send() {
        let (mut manager, listener, _sender) = manager();
        manager.pause();
        manager.add_requests(vec![Request::single(test_event(
            "t1",
            "event_a",
            Priority::Normal,
        ))]);
        manager.send_queued_requests(Instant::now());
        assert_eq!(0, manager.active_connections);
        manager.clear_outbound();
        assert!(manager.is_idle());
        assert_eq!(
            vec![Outcome::Dropped("event_a".into(), DropReason::Paused)],
            listener.take()
        );
    }

    #[tokio::test]
    async fn teardown_sends_requests_waiting_for_retry() {
        let (mut manager, listener, _sender) = manager();
        manager.active_connections = 1;
        manager.handle_response(outcome(&["event_a"], 0, status(503)), Instant::now());
        assert_eq!(vec![Outcome::Retrying("event_a".into())], listener.take());
        assert!(!manager.is_idle());

        manager.teardown(Vec::new(), Instant::now()).await;
        assert_eq!(vec![Outcome::Sent("event_a".into())], listener.take());
        assert!(manager.is_idle());

        // The retry timer firing afterwards finds nothing left to resend.
        manager.handle_retry(0);
        assert!(manager.outbound.is_empty());
    }
}

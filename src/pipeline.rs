use crate::{
    config::Config,
    endpoint::{parse_collector_url, COLLECTOR_URL_ENV},
    http_client::{BeaconSender, HttpClient},
    http_manager::{HttpManager, HttpSettings},
    logger::{Logger, LoggerShared, TenantState},
    notification::{NotificationListener, NotificationManager},
    queue_manager::QueueManager,
    retry_policy::RetryPolicy,
    serializer::PayloadEncoding,
    stats::StatsManager,
    storage::{device_id, InMemoryStorage, KeyValueStorage},
    transmission::{Message, TransmissionScheduler},
    Error,
};
use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

type Tenants = Arc<Mutex<HashMap<String, Arc<TenantState>>>>;

/// Create a new pipeline builder sending through `client`.
///
/// ```no_run
/// # async fn run(client: impl tenant_telemetry::HttpClient + 'static) -> Result<(), tenant_telemetry::Error> {
/// let pipeline = tenant_telemetry::new_pipeline(client)
///     .with_max_queue_size(1_000)
///     .build()?;
/// pipeline.logger("tenant-token").log_event("app_started");
/// pipeline.flush_and_teardown().await;
/// # Ok(())
/// # }
/// ```
pub fn new_pipeline<C: HttpClient + 'static>(client: C) -> PipelineBuilder {
    PipelineBuilder {
        client: Arc::new(client),
        config: Config::default(),
        beacon: None,
        storage: Arc::new(InMemoryStorage::default()),
        listeners: Vec::new(),
    }
}

/// Create a new pipeline builder with the collector URL read from the
/// `TELEMETRY_COLLECTOR_URL` environment variable.
pub fn new_pipeline_from_env<C: HttpClient + 'static>(client: C) -> Result<PipelineBuilder, Error> {
    let url = std::env::var(COLLECTOR_URL_ENV).map_err(|source| Error::Environment {
        name: COLLECTOR_URL_ENV,
        source,
    })?;
    parse_collector_url(&url)?;
    Ok(new_pipeline(client).with_collector_url(url))
}

/// Builder of a [`Pipeline`].
pub struct PipelineBuilder {
    client: Arc<dyn HttpClient>,
    config: Config,
    beacon: Option<Arc<dyn BeaconSender>>,
    storage: Arc<dyn KeyValueStorage>,
    listeners: Vec<Arc<dyn NotificationListener>>,
}

impl fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("client", &self.client)
            .field("config", &self.config)
            .field("beacon", &self.beacon)
            .field("storage", &self.storage)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl PipelineBuilder {
    /// Replace all settings.
    pub fn with_config(self, config: Config) -> Self {
        Self { config, ..self }
    }

    /// Set the collector endpoint.
    pub fn with_collector_url(mut self, url: impl Into<String>) -> Self {
        self.config.collector_url = url.into();
        self
    }

    /// Set the maximum number of queued events.
    pub fn with_max_queue_size(mut self, max_queue_size: usize) -> Self {
        self.config.max_queue_size = max_queue_size;
        self
    }

    /// Set the maximum number of requests in flight.
    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.config.max_connections = max_connections;
        self
    }

    /// Drop queued events when transmission is paused.
    pub fn with_drop_on_pause(mut self, drop_on_pause: bool) -> Self {
        self.config.drop_on_pause = drop_on_pause;
        self
    }

    /// Set how request bodies are encoded.
    pub fn with_payload_encoding(mut self, encoding: PayloadEncoding) -> Self {
        self.config.payload_encoding = encoding;
        self
    }

    /// Enable or disable `stats` events.
    pub fn with_stats(mut self, enabled: bool) -> Self {
        self.config.stats_enabled = enabled;
        self
    }

    /// Set the interval of `stats` events. Rounded down to whole seconds.
    pub fn with_stats_interval(mut self, interval: Duration) -> Self {
        self.config.stats_interval_secs = interval.as_secs();
        self
    }

    /// Let the collector correct the clock skew again after this interval.
    pub fn with_clock_skew_refresh_interval(mut self, interval: Duration) -> Self {
        self.config.clock_skew_refresh_interval_secs = Some(interval.as_secs());
        self
    }

    /// Randomize retry delays.
    pub fn with_retry_jitter(mut self, jitter: bool) -> Self {
        self.config.retry_jitter = jitter;
        self
    }

    /// Set the `EventInfo.Source` property of every event.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.config.source = source.into();
        self
    }

    /// Send the final requests at teardown through `beacon` instead of the HTTP client.
    pub fn with_beacon<B: BeaconSender + 'static>(self, beacon: B) -> Self {
        Self {
            beacon: Some(Arc::new(beacon)),
            ..self
        }
    }

    /// Persist the device id in `storage`.
    pub fn with_storage<S: KeyValueStorage + 'static>(self, storage: S) -> Self {
        Self {
            storage: Arc::new(storage),
            ..self
        }
    }

    /// Register a listener before any event is logged.
    pub fn with_listener(mut self, listener: Arc<dyn NotificationListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Start the pipeline. Must be called from within a tokio runtime.
    pub fn build(self) -> Result<Pipeline, Error> {
        let endpoint = parse_collector_url(&self.config.collector_url)?;
        let config = self.config;

        let notifications = Arc::new(NotificationManager::default());
        for listener in self.listeners {
            notifications.add_listener(listener);
        }
        let stats = config.stats_enabled.then(|| {
            let stats = Arc::new(StatsManager::default());
            notifications.add_listener(stats.clone());
            stats
        });

        let (messages, receiver) = mpsc::unbounded_channel();
        let http = HttpManager::new(
            self.client,
            self.beacon,
            HttpSettings {
                endpoint,
                max_connections: config.max_connections,
                encoding: config.payload_encoding,
                retry_policy: RetryPolicy::with_jitter(config.retry_jitter),
            },
            Arc::clone(&notifications),
            messages.downgrade(),
        );
        let queues = QueueManager::new(config.max_queue_size, Arc::clone(&notifications));
        let scheduler = TransmissionScheduler::new(queues, http, config.drop_on_pause);

        let shared = Arc::new(LoggerShared {
            source: config.source.clone(),
            device_id: device_id(self.storage.as_ref()),
            notifications,
            messages: messages.clone(),
        });
        let tenants = Tenants::default();

        let mut background = vec![tokio::spawn(scheduler.run(receiver))];
        if let Some(stats) = &stats {
            let stats = Arc::clone(stats);
            let shared = Arc::clone(&shared);
            let tenants = Arc::clone(&tenants);
            let period = config.stats_interval();
            background.push(tokio::spawn(async move {
                let mut interval =
                    tokio::time::interval_at(tokio::time::Instant::now() + period, period);
                loop {
                    interval.tick().await;
                    emit_stats(&stats, &shared, &tenants);
                }
            }));
        }
        if let Some(period) = config.clock_skew_refresh_interval() {
            let messages = messages.downgrade();
            background.push(tokio::spawn(async move {
                let mut interval =
                    tokio::time::interval_at(tokio::time::Instant::now() + period, period);
                loop {
                    interval.tick().await;
                    match messages.upgrade() {
                        Some(messages) if messages.send(Message::ResetClockSkew).is_ok() => {}
                        _ => break,
                    }
                }
            }));
        }
        tracing::debug!(collector = %config.collector_url, "telemetry pipeline started");

        Ok(Pipeline {
            shared,
            tenants,
            stats,
            background,
        })
    }
}

fn logger_for(shared: &Arc<LoggerShared>, tenants: &Tenants, tenant_token: &str) -> Logger {
    let tenant = match tenants.lock() {
        Ok(mut tenants) => Arc::clone(tenants.entry(tenant_token.to_string()).or_default()),
        Err(_) => Arc::default(),
    };
    Logger::new(tenant_token.to_string(), tenant, Arc::clone(shared))
}

fn emit_stats(stats: &StatsManager, shared: &Arc<LoggerShared>, tenants: &Tenants) {
    for (tenant_token, event) in stats.take_stats_events() {
        logger_for(shared, tenants, &tenant_token).log_event(event);
    }
}

/// A running telemetry pipeline.
///
/// Dropping the pipeline stops its background tasks once every [`Logger`] is gone as well.
/// Queued events are only sent on drop if [`flush_and_teardown`](Self::flush_and_teardown)
/// was awaited first.
pub struct Pipeline {
    shared: Arc<LoggerShared>,
    tenants: Tenants,
    stats: Option<Arc<StatsManager>>,
    background: Vec<JoinHandle<()>>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("source", &self.shared.source)
            .field("stats", &self.stats.is_some())
            .finish()
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        for task in self.background.iter().skip(1) {
            task.abort();
        }
    }
}

impl Pipeline {
    /// Logger for a tenant. Loggers of the same tenant share sequence numbers and context.
    pub fn logger(&self, tenant_token: &str) -> Logger {
        logger_for(&self.shared, &self.tenants, tenant_token)
    }

    /// Register a listener for event outcomes.
    pub fn add_listener(&self, listener: Arc<dyn NotificationListener>) {
        self.shared.notifications.add_listener(listener);
    }

    /// Unregister a listener added before.
    pub fn remove_listener(&self, listener: &Arc<dyn NotificationListener>) {
        self.shared.notifications.remove_listener(listener);
    }

    /// Upload everything logged so far and call `callback` once all of it was handled.
    ///
    /// Ignored, and `callback` never called, while paused or within 30 seconds of the previous
    /// flush.
    pub fn flush(&self, callback: impl FnOnce() + Send + 'static) {
        let (accepted, _) = oneshot::channel();
        self.send(Message::Flush(Box::new(callback), accepted));
    }

    /// Same as [`flush`](Self::flush). Resolves to `true` once the upload finished, or to
    /// `false` if the flush was ignored.
    pub async fn flush_async(&self) -> bool {
        let (done_tx, done_rx) = oneshot::channel();
        let (accepted_tx, accepted_rx) = oneshot::channel();
        let callback = Box::new(move || {
            let _ = done_tx.send(());
        });
        if !self.send(Message::Flush(callback, accepted_tx)) {
            return false;
        }
        if !accepted_rx.await.unwrap_or(false) {
            return false;
        }
        done_rx.await.is_ok()
    }

    /// Send everything still queued once, then stop. Events logged afterwards are dropped.
    pub async fn flush_and_teardown(&self) {
        if let Some(stats) = &self.stats {
            emit_stats(stats, &self.shared, &self.tenants);
        }
        let (done_tx, done_rx) = oneshot::channel();
        if self.send(Message::Teardown(done_tx)) {
            let _ = done_rx.await;
        }
        for task in &self.background {
            task.abort();
        }
    }

    /// Stop sending. Events are still queued unless the pipeline drops them on pause.
    pub fn pause_transmission(&self) {
        self.send(Message::Pause);
    }

    /// Continue sending after [`pause_transmission`](Self::pause_transmission).
    pub fn resume_transmission(&self) {
        self.send(Message::Resume);
    }

    /// Activate a transmit profile. Returns `false` for unknown names.
    pub async fn set_transmit_profile(&self, name: &str) -> bool {
        let (tx, rx) = oneshot::channel();
        self.send(Message::SetProfile(name.to_string(), tx)) && rx.await.unwrap_or(false)
    }

    /// Add custom transmit profiles of `[low, normal, high]` seconds.
    ///
    /// Valid profiles are added even if the result is an error listing the invalid ones.
    pub async fn load_transmit_profiles(
        &self,
        profiles: BTreeMap<String, [i64; 3]>,
    ) -> Result<(), Error> {
        let (tx, rx) = oneshot::channel();
        if !self.send(Message::LoadProfiles(profiles, tx)) {
            return Err(Error::TornDown);
        }
        rx.await.unwrap_or(Err(Error::TornDown))
    }

    /// Same as [`load_transmit_profiles`](Self::load_transmit_profiles) with profiles given as
    /// a JSON object, for example `{"SLOW": [120, 60, 30]}`.
    pub async fn load_transmit_profiles_json(&self, json: &str) -> Result<(), Error> {
        let (tx, rx) = oneshot::channel();
        if !self.send(Message::LoadProfilesJson(json.to_string(), tx)) {
            return Err(Error::TornDown);
        }
        rx.await.unwrap_or(Err(Error::TornDown))
    }

    /// Remove custom transmit profiles and activate the default one.
    pub fn reset_transmit_profiles(&self) {
        self.send(Message::ResetProfiles);
    }

    fn send(&self, message: Message) -> bool {
        let sent = self.shared.messages.send(message).is_ok();
        if !sent {
            tracing::debug!("pipeline is torn down");
        }
        sent
    }
}

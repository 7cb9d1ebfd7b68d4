//! Public ingestion surface: validation and enrichment of events.

use crate::{
    convert::{millis_to_string, now_millis},
    models::{
        is_valid_event_name_or_type, is_valid_property, normalize_event_name, EnrichedEvent,
        EventProperties, PiiKind, Property, PropertyValue,
    },
    notification::{NotificationManager, RejectReason},
    transmission::Message,
    SDK_VERSION,
};
use std::{
    collections::BTreeMap,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};
use tokio::{sync::mpsc::UnboundedSender, time::Instant};

const DEFAULT_EVENT_TYPE: &str = "custom";

/// Pipeline wide state shared by all loggers.
pub(crate) struct LoggerShared {
    pub(crate) source: String,
    pub(crate) device_id: String,
    pub(crate) notifications: Arc<NotificationManager>,
    pub(crate) messages: UnboundedSender<Message>,
}

/// Per-tenant state shared by all loggers of the same tenant.
#[derive(Debug)]
pub(crate) struct TenantState {
    init_id: String,
    sequence: AtomicU64,
    context: Mutex<BTreeMap<String, Property>>,
    session: Mutex<Option<Session>>,
}

impl Default for TenantState {
    fn default() -> Self {
        TenantState {
            init_id: uuid::Uuid::new_v4().to_string(),
            sequence: AtomicU64::new(0),
            context: Mutex::new(BTreeMap::new()),
            session: Mutex::new(None),
        }
    }
}

#[derive(Debug)]
struct Session {
    id: String,
    started: Instant,
}

/// Whether a session starts or ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// The session started.
    Started,
    /// The session ended.
    Ended,
}

/// Severity of a trace event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceLevel {
    /// Error.
    Error,
    /// Warning.
    Warning,
    /// Information.
    Information,
    /// Verbose.
    Verbose,
}

impl fmt::Display for TraceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TraceLevel::Error => "Error",
            TraceLevel::Warning => "Warning",
            TraceLevel::Information => "Information",
            TraceLevel::Verbose => "Verbose",
        })
    }
}

/// Logs events for one tenant.
///
/// Loggers are cheap to clone. Logging never blocks and never fails: invalid events are
/// reported to the pipeline's [`NotificationListener`](crate::NotificationListener)s as
/// rejected.
#[derive(Clone)]
pub struct Logger {
    tenant_token: String,
    tenant: Arc<TenantState>,
    shared: Arc<LoggerShared>,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("tenant_token", &self.tenant_token)
            .field("init_id", &self.tenant.init_id)
            .finish()
    }
}

impl Logger {
    pub(crate) fn new(
        tenant_token: String,
        tenant: Arc<TenantState>,
        shared: Arc<LoggerShared>,
    ) -> Self {
        Logger {
            tenant_token,
            tenant,
            shared,
        }
    }

    /// Tenant token events of this logger are sent with.
    pub fn tenant_token(&self) -> &str {
        &self.tenant_token
    }

    /// Log an event.
    pub fn log_event(&self, event: impl Into<EventProperties>) {
        let event = self.enrich(event.into());
        if !is_valid_event_name_or_type(&event.name)
            || !is_valid_event_name_or_type(&event.base_type)
        {
            tracing::debug!(name = %event.name, base_type = %event.base_type, "rejecting invalid event");
            self.reject(event);
            return;
        }
        self.submit(event);
    }

    /// Log the start or end of a session.
    ///
    /// Starting a session twice, or ending one that never started, does nothing.
    pub fn log_session(&self, state: SessionState, mut properties: EventProperties) {
        let Ok(mut session) = self.tenant.session.lock() else {
            return;
        };
        match (state, session.take()) {
            (SessionState::Started, None) => {
                let id = uuid::Uuid::new_v4().to_string();
                properties
                    .set_property("Session.State", "Started")
                    .set_property("Session.Id", id.as_str());
                *session = Some(Session {
                    id,
                    started: Instant::now(),
                });
            }
            (SessionState::Ended, Some(ended)) => {
                let seconds = ended.started.elapsed().as_secs();
                properties
                    .set_property("Session.State", "Ended")
                    .set_property("Session.Id", ended.id.as_str())
                    .set_property("Session.Duration", session_duration_bucket(seconds))
                    .set_property(
                        "Session.DurationSeconds",
                        i64::try_from(seconds).unwrap_or(i64::MAX),
                    );
            }
            (state, current) => {
                *session = current;
                tracing::debug!(?state, "ignoring session state change");
                return;
            }
        }
        drop(session);
        properties.set_name("session");
        self.log_event(properties);
    }

    /// Log a failure. Events without signature or detail are rejected.
    pub fn log_failure(
        &self,
        signature: &str,
        detail: &str,
        category: Option<&str>,
        id: Option<&str>,
        mut properties: EventProperties,
    ) {
        properties.set_name("failure");
        if signature.is_empty() || detail.is_empty() {
            self.reject(self.enrich(properties));
            return;
        }
        properties
            .set_property("Failure.Signature", signature)
            .set_property("Failure.Detail", detail);
        if let Some(category) = category {
            properties.set_property("Failure.Category", category);
        }
        if let Some(id) = id {
            properties.set_property("Failure.Id", id);
        }
        self.log_event(properties);
    }

    /// Log a page view. Events without id or page name are rejected.
    pub fn log_page_view(
        &self,
        id: &str,
        page_name: &str,
        category: Option<&str>,
        uri: Option<&str>,
        referrer_uri: Option<&str>,
        mut properties: EventProperties,
    ) {
        properties.set_name("pageview");
        if id.is_empty() || page_name.is_empty() {
            self.reject(self.enrich(properties));
            return;
        }
        properties
            .set_property("PageView.Id", id)
            .set_property("PageView.Name", page_name);
        let optional = [
            ("PageView.Category", category),
            ("PageView.Uri", uri),
            ("PageView.ReferrerUri", referrer_uri),
        ];
        for (name, value) in optional {
            if let Some(value) = value {
                properties.set_property(name, value);
            }
        }
        self.log_event(properties);
    }

    /// Log a diagnostic trace message.
    pub fn log_trace(&self, level: TraceLevel, message: &str, mut properties: EventProperties) {
        properties
            .set_name("trace")
            .set_property("Trace.Level", level.to_string())
            .set_property("Trace.Message", message);
        self.log_event(properties);
    }

    /// Add a property to every event logged for this tenant from now on. Properties set on an
    /// event take precedence.
    pub fn set_context(&self, name: &str, value: impl Into<PropertyValue>) {
        self.set_context_property(name, Property::new(value));
    }

    /// Same as [`set_context`](Self::set_context) for personally identifiable information.
    pub fn set_context_with_pii(&self, name: &str, value: impl Into<PropertyValue>, kind: PiiKind) {
        self.set_context_property(name, Property::pii(value, kind));
    }

    /// Setters for well-known context properties.
    pub fn semantic_context(&self) -> SemanticContext<'_> {
        SemanticContext { logger: self }
    }

    fn set_context_property(&self, name: &str, property: Property) {
        if !is_valid_property(name, &property) {
            return;
        }
        if let Ok(mut context) = self.tenant.context.lock() {
            context.insert(name.to_string(), property);
        }
    }

    fn enrich(&self, event: EventProperties) -> EnrichedEvent {
        let EventProperties {
            name,
            base_type,
            timestamp,
            priority,
            properties: own,
        } = event;
        let name = normalize_event_name(&name);
        let base_type = base_type
            .map(|t| t.to_lowercase())
            .unwrap_or_else(|| DEFAULT_EVENT_TYPE.to_string());
        let timestamp = timestamp.filter(|t| *t >= 0).unwrap_or_else(now_millis);

        let mut properties = self
            .tenant
            .context
            .lock()
            .map(|context| context.clone())
            .unwrap_or_default();
        properties.extend(own);
        properties.insert(
            "DeviceInfo.Id".into(),
            Property::new(self.shared.device_id.as_str()),
        );
        properties.insert(
            "EventInfo.Source".into(),
            Property::new(self.shared.source.as_str()),
        );
        properties.insert(
            "EventInfo.InitId".into(),
            Property::new(self.tenant.init_id.as_str()),
        );
        properties.insert("EventInfo.Name".into(), Property::new(name.as_str()));
        properties.insert(
            "EventInfo.Time".into(),
            Property::new(millis_to_string(timestamp)),
        );
        properties.insert("EventInfo.SdkVersion".into(), Property::new(SDK_VERSION));

        EnrichedEvent {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_token: self.tenant_token.clone(),
            name,
            base_type,
            timestamp,
            priority: priority.unwrap_or_default(),
            sequence: 0,
            init_id: self.tenant.init_id.clone(),
            send_attempt: 0,
            properties,
        }
    }

    fn reject(&self, event: EnrichedEvent) {
        self.shared
            .notifications
            .events_rejected(&[event], RejectReason::InvalidEvent);
    }

    fn submit(&self, mut event: EnrichedEvent) {
        event.sequence = self.tenant.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        event.properties.insert(
            "EventInfo.Sequence".into(),
            Property::new(i64::try_from(event.sequence).unwrap_or(i64::MAX)),
        );
        if self.shared.messages.send(Message::Event(event)).is_err() {
            tracing::debug!("pipeline is torn down, dropping event");
        }
    }
}

/// Well-known context properties of a tenant, added to every event.
#[derive(Debug)]
pub struct SemanticContext<'a> {
    logger: &'a Logger,
}

impl SemanticContext<'_> {
    /// Application id.
    pub fn set_app_id(&self, value: &str) -> &Self {
        self.set("AppInfo.Id", value)
    }

    /// Application version.
    pub fn set_app_version(&self, value: &str) -> &Self {
        self.set("AppInfo.Version", value)
    }

    /// User id. Sent as personally identifiable information.
    pub fn set_user_id(&self, value: &str) -> &Self {
        self.logger
            .set_context_with_pii("UserInfo.Id", value, PiiKind::Identity);
        self
    }

    /// Device manufacturer.
    pub fn set_device_make(&self, value: &str) -> &Self {
        self.set("DeviceInfo.Make", value)
    }

    /// Device model.
    pub fn set_device_model(&self, value: &str) -> &Self {
        self.set("DeviceInfo.Model", value)
    }

    /// Operating system name.
    pub fn set_os_name(&self, value: &str) -> &Self {
        self.set("DeviceInfo.OsName", value)
    }

    /// Operating system version.
    pub fn set_os_version(&self, value: &str) -> &Self {
        self.set("DeviceInfo.OsVersion", value)
    }

    fn set(&self, name: &str, value: &str) -> &Self {
        self.logger.set_context(name, value);
        self
    }
}

fn session_duration_bucket(seconds: u64) -> &'static str {
    match seconds {
        0..=3 => "UpTo3Sec",
        4..=10 => "UpTo10Sec",
        11..=30 => "UpTo30Sec",
        31..=60 => "UpTo60Sec",
        61..=180 => "UpTo3Min",
        181..=600 => "UpTo10Min",
        601..=1800 => "UpTo30Min",
        _ => "Above30Min",
    }
}

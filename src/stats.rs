use crate::{
    models::{EnrichedEvent, EventProperties, Priority},
    notification::{DropReason, NotificationListener, RejectReason},
};
use std::{
    collections::{BTreeMap, HashMap},
    sync::Mutex,
};

/// Name of the events carrying aggregated statistics. They are never counted themselves.
pub const STATS_EVENT_NAME: &str = "stats";

const SENT: &str = "records_sent_count";
const RETRIED: &str = "records_retried_count";
const DROPPED: &str = "records_dropped_count";
const REJECTED: &str = "records_rejected_count";

/// Counts event outcomes per tenant so they can be reported back to the collector.
#[derive(Debug, Default)]
pub(crate) struct StatsManager {
    counters: Mutex<HashMap<String, BTreeMap<String, i64>>>,
}

impl StatsManager {
    fn count(&self, events: &[EnrichedEvent], counter: &str, reason: Option<String>) {
        let Ok(mut counters) = self.counters.lock() else {
            return;
        };
        for event in events.iter().filter(|e| e.name != STATS_EVENT_NAME) {
            let tenant = counters.entry(event.tenant_token.clone()).or_default();
            *tenant.entry(counter.to_string()).or_default() += 1;
            if let Some(reason) = &reason {
                *tenant.entry(reason.clone()).or_default() += 1;
            }
        }
    }

    /// Take the counters accumulated since the last call and turn them into one stats event per
    /// tenant.
    pub(crate) fn take_stats_events(&self) -> Vec<(String, EventProperties)> {
        let counters = match self.counters.lock() {
            Ok(mut counters) => std::mem::take(&mut *counters),
            Err(_) => return Vec::new(),
        };
        let mut events: Vec<_> = counters
            .into_iter()
            .map(|(tenant, counters)| {
                let mut event = EventProperties::new(STATS_EVENT_NAME);
                event
                    .set_priority(Priority::High)
                    .set_property("TenantId", tenant.as_str());
                for (name, count) in counters {
                    event.set_property(&name, count);
                }
                (tenant, event)
            })
            .collect();
        events.sort_by(|a, b| a.0.cmp(&b.0));
        events
    }
}

impl NotificationListener for StatsManager {
    fn events_sent(&self, events: &[EnrichedEvent]) {
        self.count(events, SENT, None);
    }

    fn events_dropped(&self, events: &[EnrichedEvent], reason: DropReason) {
        self.count(events, DROPPED, Some(format!("d_{}", reason)));
    }

    fn events_rejected(&self, events: &[EnrichedEvent], reason: RejectReason) {
        self.count(events, REJECTED, Some(format!("r_{}", reason)));
    }

    fn events_retrying(&self, events: &[EnrichedEvent]) {
        self.count(events, RETRIED, None);
    }
}

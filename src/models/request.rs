use crate::models::EnrichedEvent;
use std::collections::BTreeMap;

/// Events of one tenant, in send order.
pub(crate) type Batch = Vec<EnrichedEvent>;

/// Batches grouped by tenant token, sent with a single network call.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Request {
    batches: BTreeMap<String, Vec<Batch>>,
}

impl Request {
    pub(crate) fn new() -> Self {
        Request::default()
    }

    /// A request holding a single event.
    pub(crate) fn single(event: EnrichedEvent) -> Self {
        let mut request = Request::new();
        request.add_batch(event.tenant_token.clone(), vec![event]);
        request
    }

    pub(crate) fn add_batch(&mut self, tenant_token: String, batch: Batch) {
        if !batch.is_empty() {
            self.batches.entry(tenant_token).or_default().push(batch);
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.batches.values().all(|batches| batches.iter().all(Vec::is_empty))
    }

    pub(crate) fn event_count(&self) -> usize {
        self.events().count()
    }

    pub(crate) fn tenant_tokens(&self) -> impl Iterator<Item = &str> {
        self.batches.keys().map(String::as_str)
    }

    pub(crate) fn remove_tenant(&mut self, tenant_token: &str) -> Option<Vec<Batch>> {
        self.batches.remove(tenant_token)
    }

    pub(crate) fn events(&self) -> impl Iterator<Item = &EnrichedEvent> {
        self.batches.values().flatten().flatten()
    }

    pub(crate) fn events_mut(&mut self) -> impl Iterator<Item = &mut EnrichedEvent> {
        self.batches.values_mut().flatten().flatten()
    }

    pub(crate) fn into_events(self) -> Vec<EnrichedEvent> {
        self.batches.into_values().flatten().flatten().collect()
    }

    pub(crate) fn into_batches(self) -> impl Iterator<Item = (String, Vec<Batch>)> {
        self.batches.into_iter()
    }
}

use crate::models::{Batch, EnrichedEvent, Priority, Request};

/// Maximum number of events in one batch.
pub(crate) const MAX_BATCH_SIZE: usize = 500;

/// Groups events into per-tenant batches and collects finished batches into requests.
#[derive(Debug, Default)]
pub(crate) struct RecordBatcher {
    current: Option<(String, Batch)>,
    request: Request,
    requests: Vec<Request>,
}

impl RecordBatcher {
    pub(crate) fn new() -> Self {
        RecordBatcher::default()
    }

    /// Add an event to the current batch.
    ///
    /// Immediate events are not batched, they are returned right away as a request of their own.
    pub(crate) fn add_event_to_batch(&mut self, event: EnrichedEvent) -> Option<Request> {
        if event.priority == Priority::ImmediateSync {
            return Some(Request::single(event));
        }

        let same_tenant = matches!(
            &self.current,
            Some((token, batch)) if *token == event.tenant_token && batch.len() < MAX_BATCH_SIZE
        );
        if !same_tenant {
            self.close_batch();
            let full = self.request.event_count() >= MAX_BATCH_SIZE;
            if full {
                self.close_request();
            }
            self.current = Some((event.tenant_token.clone(), Vec::new()));
        }
        if let Some((_, batch)) = &mut self.current {
            batch.push(event);
        }
        None
    }

    /// Move everything batched so far to the outbound list and return it.
    pub(crate) fn flush_batch(&mut self) -> Vec<Request> {
        self.close_batch();
        self.close_request();
        std::mem::take(&mut self.requests)
    }

    fn close_batch(&mut self) {
        if let Some((token, batch)) = self.current.take() {
            self.request.add_batch(token, batch);
        }
    }

    fn close_request(&mut self) {
        let request = std::mem::take(&mut self.request);
        if !request.is_empty() {
            self.requests.push(request);
        }
    }
}

/// Transmission priority of an event.
///
/// `ImmediateSync` is not a queueing priority. Events with it bypass the inbound queues and are
/// sent on their own as soon as a connection is available.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    /// Sent on the slowest cadence of the active transmit profile.
    Low = 1,
    /// Default priority.
    #[default]
    Normal = 2,
    /// Sent on every timer tick.
    High = 3,
    /// Sent standalone, right away.
    ImmediateSync = 5,
}

impl Priority {
    /// Queueing priorities, highest first.
    pub(crate) const QUEUED: [Priority; 3] = [Priority::High, Priority::Normal, Priority::Low];

    /// Convert a raw priority value. Unknown values return `None`.
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            1 => Some(Priority::Low),
            2 => Some(Priority::Normal),
            3 => Some(Priority::High),
            5 => Some(Priority::ImmediateSync),
            _ => None,
        }
    }

    /// Index into the per-priority inbound queues. `None` for `ImmediateSync`.
    pub(crate) fn queue_index(self) -> Option<usize> {
        match self {
            Priority::Low => Some(0),
            Priority::Normal => Some(1),
            Priority::High => Some(2),
            Priority::ImmediateSync => None,
        }
    }
}

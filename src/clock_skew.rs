/// Tracks the collector-reported clock delta and gates sending until it is known.
///
/// The first request goes out without a correction. Until its response arrives no other request
/// may be sent, so the collector is not flooded with uncorrected timestamps.
#[derive(Debug, Default)]
pub(crate) struct ClockSkewManager {
    state: State,
    delta: Option<String>,
    /// Whether a response may still set the delta.
    accepting: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum State {
    #[default]
    NotSent,
    AwaitingFirstResponse,
    Corrected,
}

impl ClockSkewManager {
    pub(crate) fn new() -> Self {
        ClockSkewManager {
            accepting: true,
            ..Default::default()
        }
    }

    /// Whether the next request may be sent. Letting the first request through moves to the
    /// awaiting state.
    pub(crate) fn allow_request_sending(&mut self) -> bool {
        match self.state {
            State::NotSent => {
                self.state = State::AwaitingFirstResponse;
                true
            }
            State::AwaitingFirstResponse => false,
            State::Corrected => true,
        }
    }

    /// Value of the correction query parameter, if requests should carry one.
    pub(crate) fn clock_skew_value(&self) -> Option<&str> {
        match self.state {
            State::Corrected => self.delta.as_deref(),
            _ => None,
        }
    }

    /// Apply the `time-delta-millis` response header. Only the first call after construction or
    /// a [`reset`](Self::reset) has an effect.
    pub(crate) fn set_clock_skew(&mut self, time_delta_millis: Option<&str>) {
        if self.accepting {
            self.delta = time_delta_millis
                .map(str::trim)
                .filter(|d| d.parse::<i64>().is_ok())
                .map(str::to_string);
            self.accepting = false;
        }
        self.state = State::Corrected;
    }

    /// The first request never got a response. Let the next one try again.
    pub(crate) fn request_failed(&mut self) {
        if self.state == State::AwaitingFirstResponse {
            self.state = State::NotSent;
        }
    }

    /// Allow the next response to update the delta again.
    pub(crate) fn reset(&mut self) {
        self.accepting = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_request_gates_others() {
        let mut clock_skew = ClockSkewManager::new();
        assert!(clock_skew.allow_request_sending());
        assert_eq!(None, clock_skew.clock_skew_value());
        assert!(!clock_skew.allow_request_sending());
        clock_skew.set_clock_skew(Some("-1200"));
        assert!(clock_skew.allow_request_sending());
        assert_eq!(Some("-1200"), clock_skew.clock_skew_value());
    }

    #[test]
    fn later_values_ignored_until_reset() {
        let mut clock_skew = ClockSkewManager::new();
        clock_skew.allow_request_sending();
        clock_skew.set_clock_skew(Some("10"));
        clock_skew.set_clock_skew(Some("20"));
        assert_eq!(Some("10"), clock_skew.clock_skew_value());
        clock_skew.reset();
        clock_skew.set_clock_skew(Some("30"));
        assert_eq!(Some("30"), clock_skew.clock_skew_value());
    }

    #[test]
    fn missing_header_disables_correction() {
        let mut clock_skew = ClockSkewManager::new();
        clock_skew.allow_request_sending();
        clock_skew.set_clock_skew(None);
        assert!(clock_skew.allow_request_sending());
        assert_eq!(None, clock_skew.clock_skew_value());
    }

    #[test]
    fn failed_first_request_reopens_the_gate() {
        let mut clock_skew = ClockSkewManager::new();
        assert!(clock_skew.allow_request_sending());
        clock_skew.request_failed();
        assert!(clock_skew.allow_request_sending());
        assert!(!clock_skew.allow_request_sending());
    }

    #[test]
    fn invalid_header_is_ignored() {
        let mut clock_skew = ClockSkewManager::new();
        clock_skew.allow_request_sending();
        clock_skew.set_clock_skew(Some("later"));
        assert_eq!(None, clock_skew.clock_skew_value());
    }
}

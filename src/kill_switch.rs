use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

/// Value of the `kill-duration-seconds` header that kills tokens for the current request only.
pub(crate) const KILL_THIS_REQUEST_ONLY: &str = "this-request-only";

/// Longest kill honored. Larger `kill-duration-seconds` values are capped.
const MAX_KILL_DURATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// How long the collector asked to stop sending for a set of tenants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KillDuration {
    /// Drop the tenants' events of the request that got the response. Nothing is remembered.
    ThisRequestOnly,
    /// Stop sending for this long.
    For(Duration),
}

impl KillDuration {
    pub(crate) fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value == KILL_THIS_REQUEST_ONLY {
            return Some(KillDuration::ThisRequestOnly);
        }
        value
            .parse::<u64>()
            .ok()
            .map(|seconds| KillDuration::For(Duration::from_secs(seconds)))
    }
}

/// Tenant tokens the collector told us to stop sending for.
#[derive(Debug, Default)]
pub(crate) struct KillSwitch {
    killed_until: HashMap<String, Instant>,
}

impl KillSwitch {
    /// Record killed tokens from a comma separated list.
    ///
    /// Returns the tokens killed for the current request only. Those are not stored.
    pub(crate) fn set_kill_switch_tenants(
        &mut self,
        tokens: &str,
        duration: KillDuration,
        now: Instant,
    ) -> Vec<String> {
        let tokens = tokens
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);
        match duration {
            KillDuration::ThisRequestOnly => tokens.collect(),
            KillDuration::For(duration) => {
                let Some(until) = now.checked_add(duration.min(MAX_KILL_DURATION)) else {
                    tracing::warn!(?duration, "ignoring kill duration out of range");
                    return Vec::new();
                };
                for token in tokens {
                    self.killed_until.insert(token, until);
                }
                Vec::new()
            }
        }
    }

    pub(crate) fn is_tenant_killed(&mut self, token: &str, now: Instant) -> bool {
        match self.killed_until.get(token) {
            Some(until) if *until > now => true,
            Some(_) => {
                self.killed_until.remove(token);
                false
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("60", Some(KillDuration::For(Duration::from_secs(60))) ; "seconds")]
    #[test_case(" 5 ", Some(KillDuration::For(Duration::from_secs(5))) ; "whitespace")]
    #[test_case("this-request-only", Some(KillDuration::ThisRequestOnly) ; "sentinel")]
    #[test_case("soon", None ; "garbage")]
    #[test_case("-1", None ; "negative")]
    fn parse_duration(value: &str, expected: Option<KillDuration>) {
        assert_eq!(expected, KillDuration::parse(value));
    }

    #[test]
    fn killed_until_expiry() {
        let now = Instant::now();
        let mut kill_switch = KillSwitch::default();
        let immediate = kill_switch.set_kill_switch_tenants(
            "T1, T2",
            KillDuration::For(Duration::from_secs(60)),
            now,
        );
        assert!(immediate.is_empty());
        assert!(kill_switch.is_tenant_killed("T1", now + Duration::from_secs(59)));
        assert!(kill_switch.is_tenant_killed("T2", now));
        assert!(!kill_switch.is_tenant_killed("T3", now));
        assert!(!kill_switch.is_tenant_killed("T1", now + Duration::from_secs(60)));
        assert!(kill_switch.killed_until.get("T1").is_none());
    }

    #[test]
    fn huge_duration_is_capped() {
        let now = Instant::now();
        let mut kill_switch = KillSwitch::default();
        kill_switch.set_kill_switch_tenants(
            "T1",
            KillDuration::For(Duration::from_secs(u64::MAX)),
            now,
        );
        assert!(kill_switch.is_tenant_killed("T1", now + Duration::from_secs(24 * 60 * 60)));
        assert!(!kill_switch.is_tenant_killed("T1", now + MAX_KILL_DURATION));
    }

    #[test]
    fn this_request_only_is_not_stored() {
        let now = Instant::now();
        let mut kill_switch = KillSwitch::default();
        let immediate =
            kill_switch.set_kill_switch_tenants("T1,,T2", KillDuration::ThisRequestOnly, now);
        assert_eq!(vec!["T1".to_string(), "T2".to_string()], immediate);
        assert!(!kill_switch.is_tenant_killed("T1", now));
    }
}

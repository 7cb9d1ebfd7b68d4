use crate::{
    endpoint::DEFAULT_COLLECTOR_URL, http_manager::DEFAULT_MAX_CONNECTIONS,
    queue_manager::DEFAULT_MAX_QUEUE_SIZE, serializer::PayloadEncoding, Error,
};
use serde::Deserialize;
use std::time::Duration;

/// Default value of [`Config::source`].
pub const DEFAULT_SOURCE: &str = "rust_default_source";

const DEFAULT_STATS_INTERVAL_SECS: u64 = 60;

/// Pipeline settings.
///
/// Every field has a default, so a partial JSON document is enough:
///
/// ```
/// let config = tenant_telemetry::Config::from_json(r#"{ "max_queue_size": 500 }"#).unwrap();
/// assert_eq!(500, config.max_queue_size);
/// assert_eq!(2, config.max_connections);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct Config {
    /// Collector endpoint events are posted to.
    pub collector_url: String,
    /// Maximum number of queued events across all priorities.
    pub max_queue_size: usize,
    /// Maximum number of requests in flight.
    pub max_connections: usize,
    /// Drop queued events when transmission is paused.
    pub drop_on_pause: bool,
    /// Representation of request bodies.
    pub payload_encoding: PayloadEncoding,
    /// Send per-tenant `stats` events with event outcome counters.
    pub stats_enabled: bool,
    /// Seconds between two `stats` events of a tenant.
    pub stats_interval_secs: u64,
    /// Seconds after which the collector may correct the clock skew again. Never by default.
    pub clock_skew_refresh_interval_secs: Option<u64>,
    /// Randomize retry delays.
    pub retry_jitter: bool,
    /// Value of the `EventInfo.Source` property.
    pub source: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            collector_url: DEFAULT_COLLECTOR_URL.to_string(),
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            drop_on_pause: false,
            payload_encoding: PayloadEncoding::Binary,
            stats_enabled: true,
            stats_interval_secs: DEFAULT_STATS_INTERVAL_SECS,
            clock_skew_refresh_interval_secs: None,
            retry_jitter: false,
            source: DEFAULT_SOURCE.to_string(),
        }
    }
}

impl Config {
    /// Read settings from a JSON object. Missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        serde_json::from_str(json).map_err(Error::DeserializeConfig)
    }

    pub(crate) fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs.max(1))
    }

    pub(crate) fn clock_skew_refresh_interval(&self) -> Option<Duration> {
        self.clock_skew_refresh_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(DEFAULT_COLLECTOR_URL, config.collector_url);
        assert_eq!(10_000, config.max_queue_size);
        assert_eq!(2, config.max_connections);
        assert!(config.stats_enabled);
        assert_eq!(Duration::from_secs(60), config.stats_interval());
        assert_eq!(None, config.clock_skew_refresh_interval());
    }

    #[test]
    fn partial_json() {
        let config = Config::from_json(
            r#"{
                "drop_on_pause": true,
                "payload_encoding": "base64",
                "clock_skew_refresh_interval_secs": 300
            }"#,
        )
        .unwrap();
        assert!(config.drop_on_pause);
        assert_eq!(PayloadEncoding::Base64, config.payload_encoding);
        assert_eq!(
            Some(Duration::from_secs(300)),
            config.clock_skew_refresh_interval()
        );
        assert_eq!(DEFAULT_MAX_QUEUE_SIZE, config.max_queue_size);
    }

    #[test]
    fn invalid_json() {
        assert!(matches!(
            Config::from_json(r#"{ "max_queue_size": "many" }"#),
            Err(Error::DeserializeConfig(_))
        ));
    }
}

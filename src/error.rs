use std::{error::Error as StdError, fmt::Debug};

/// Errors returned while configuring a pipeline.
///
/// Logging events never fails. Problems with individual events are reported through
/// [`NotificationListener`](crate::NotificationListener)s instead.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The collector URL could not be parsed.
    #[error("invalid collector endpoint: {0}")]
    InvalidEndpoint(http::uri::InvalidUri),

    /// The collector URL has no scheme or host.
    #[error("collector endpoint {0:?} has no scheme or host")]
    MissingEndpointHost(String),

    /// The collector URL environment variable is not set.
    #[error("reading {name} failed with {source}")]
    Environment {
        /// Variable name.
        name: &'static str,
        /// Underlying error.
        source: std::env::VarError,
    },

    /// Some transmit profiles were invalid and have not been loaded.
    #[error("invalid transmit profiles: {}", .0.join(", "))]
    InvalidTransmitProfiles(Vec<String>),

    /// Transmit profiles could not be read from JSON.
    #[error("deserializing transmit profiles failed with {0}")]
    DeserializeTransmitProfiles(serde_json::Error),

    /// Configuration could not be read from JSON.
    #[error("deserializing configuration failed with {0}")]
    DeserializeConfig(serde_json::Error),

    /// Could not complete the HTTP request to the collector.
    #[error("sending upload request failed with {0}")]
    UploadConnection(Box<dyn StdError + Send + Sync + 'static>),

    /// The pipeline was torn down and no longer accepts commands.
    #[error("pipeline has been torn down")]
    TornDown,
}

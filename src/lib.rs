//! A client-side pipeline for sending telemetry events to a collector on behalf of one or more
//! tenants.
//!
//! Events are enriched, queued by [`Priority`], batched per tenant and encoded in a compact binary
//! format. A background task sends them on a timer cadence given by the active transmit profile,
//! retrying and backing off on failures and honoring kill-switch and clock-skew instructions from
//! the collector.
//!
//! # Usage
//!
//! Sending requires an HTTP client implementing [`HttpClient`]. With the `reqwest-client` feature,
//! `reqwest::Client` is one.
//!
//! ```no_run
//! # #[cfg(feature = "reqwest-client")]
//! # async fn run() -> Result<(), tenant_telemetry::Error> {
//! use tenant_telemetry::{EventProperties, PiiKind, Priority};
//!
//! let pipeline = tenant_telemetry::new_pipeline(reqwest::Client::new())
//!     .with_collector_url("https://collector.example.com/OneCollector/1.0")
//!     .build()?;
//!
//! let logger = pipeline.logger("tenant-token");
//! logger.set_context("build", "2024.1");
//! let mut event = EventProperties::new("checkout");
//! event
//!     .set_priority(Priority::High)
//!     .set_property("items", 3)
//!     .set_property_with_pii("email", "user@example.com", PiiKind::Identity);
//! logger.log_event(event);
//!
//! pipeline.flush_and_teardown().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Transmit profiles
//!
//! Profiles set how often events of each priority are sent, as `[low, normal, high]` seconds. A
//! value of `-1` disables sending on the timer for that priority. The built-in profiles are:
//!
//! | Name                            | Low  | Normal | High |
//! | ------------------------------- | ---- | ------ | ---- |
//! | [`REAL_TIME`] (default)         | 4    | 2      | 1    |
//! | [`NEAR_REAL_TIME`]              | 12   | 6      | 3    |
//! | [`BEST_EFFORT`]                 | 36   | 18     | 9    |
//!
//! Events with [`Priority::ImmediateSync`] skip the queues and are sent right away.
//!
//! # Event outcomes
//!
//! Logging never fails. Register a [`NotificationListener`] to learn whether events were sent,
//! dropped or rejected. Unless disabled, the pipeline also sends a [`STATS_EVENT_NAME`] event per
//! tenant with these counters.
#![warn(missing_docs, missing_debug_implementations)]

mod clock_skew;
mod config;
mod convert;
mod endpoint;
mod error;
mod http_client;
mod http_manager;
mod kill_switch;
mod logger;
mod models;
mod notification;
mod pipeline;
mod queue_manager;
mod record_batcher;
mod retry_policy;
mod serializer;
mod stats;
mod storage;
mod transmission;
mod transmit_profile;

pub use config::{Config, DEFAULT_SOURCE};
pub use endpoint::{COLLECTOR_URL_ENV, DEFAULT_COLLECTOR_URL};
pub use error::Error;
pub use http_client::{BeaconSender, HttpClient, HttpError};
pub use http_manager::DEFAULT_MAX_CONNECTIONS;
pub use logger::{Logger, SemanticContext, SessionState, TraceLevel};
pub use models::{
    CustomerContentKind, EnrichedEvent, EventProperties, PiiKind, Priority, Property,
    PropertyClass, PropertyValue,
};
pub use notification::{DropReason, NotificationListener, RejectReason};
pub use pipeline::{new_pipeline, new_pipeline_from_env, Pipeline, PipelineBuilder};
pub use queue_manager::{FlushCallback, DEFAULT_MAX_QUEUE_SIZE};
pub use serializer::{PayloadEncoding, MAX_REQUEST_SIZE};
pub use stats::STATS_EVENT_NAME;
pub use storage::{InMemoryStorage, KeyValueStorage, DEVICE_ID_KEY};
pub use transmit_profile::{BEST_EFFORT, NEAR_REAL_TIME, REAL_TIME};

/// SDK version sent to the collector with every request.
pub const SDK_VERSION: &str = concat!("tenant-telemetry-rust-", env!("CARGO_PKG_VERSION"));

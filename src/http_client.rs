use async_trait::async_trait;
use bytes::Bytes;
use http::Request;
pub use opentelemetry_http::{HttpClient, HttpError};
use std::fmt::Debug;

/// Transport for the last requests sent while the pipeline tears down.
///
/// The response is not awaited or interpreted, so implementations may hand the request to the
/// host (for example a browser's `sendBeacon`) and return right away.
#[async_trait]
pub trait BeaconSender: Debug + Send + Sync {
    /// Send the request. An `Ok` result counts the events as sent.
    async fn send_beacon(&self, request: Request<Bytes>) -> Result<(), HttpError>;
}

#[cfg(any(feature = "reqwest-client", feature = "reqwest-client-rustls"))]
mod reqwest {
    use super::{async_trait, BeaconSender, Bytes, HttpError, Request};
    use std::convert::TryInto;

    #[async_trait]
    impl BeaconSender for reqwest::Client {
        async fn send_beacon(&self, request: Request<Bytes>) -> Result<(), HttpError> {
            let request: reqwest::Request = request.try_into()?;
            self.execute(request).await?;
            Ok(())
        }
    }
}

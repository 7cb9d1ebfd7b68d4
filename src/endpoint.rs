use crate::Error;
use std::{borrow::Cow, convert::TryInto};

/// Collector used when none is configured.
pub const DEFAULT_COLLECTOR_URL: &str = "https://browser.pipe.aria.microsoft.com/Collector/3.0";

/// Environment variable read by [`new_pipeline_from_env`](crate::new_pipeline_from_env).
pub const COLLECTOR_URL_ENV: &str = "TELEMETRY_COLLECTOR_URL";

/// Parse a collector URL.
///
/// Whitespace and trailing slashes are removed and `http://` is upgraded to `https://`.
pub(crate) fn parse_collector_url(url: &str) -> Result<http::Uri, Error> {
    let mut new_url: Cow<str> = url.trim().into();
    if !new_url.starts_with("https://") {
        new_url = new_url.replace("http://", "https://").into();
    }

    let uri: http::Uri = new_url
        .trim_end_matches('/')
        .try_into()
        .map_err(Error::InvalidEndpoint)?;
    if uri.scheme().is_none() || uri.authority().is_none() {
        return Err(Error::MissingEndpointHost(url.to_string()));
    }
    Ok(uri)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::TryFrom;
    use test_case::test_case;

    #[test_case("https://collector/path", "https://collector/path" ; "unchanged")]
    #[test_case(" http://collector/path/  ", "https://collector/path" ; "sanitize url")]
    #[test_case(DEFAULT_COLLECTOR_URL, DEFAULT_COLLECTOR_URL ; "default")]
    fn parse_succeeds(url: &'static str, expected: &'static str) {
        assert_eq!(
            http::Uri::try_from(expected).unwrap(),
            parse_collector_url(url).unwrap()
        );
    }

    #[test_case("ftp:/foo" ; "invalid uri")]
    #[test_case("/only/a/path" ; "no host")]
    #[test_case("" ; "empty")]
    fn parse_fails(url: &'static str) {
        parse_collector_url(url).unwrap_err();
    }
}

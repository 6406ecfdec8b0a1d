//! HTTP client with rate limiting, used to probe stream sizes.
//!
//! This module provides a wrapper around `reqwest::Client` that adds:
//! * Request rate limiting to respect stream host quotas
//! * Consistent timeouts and user agent
//! * Content length discovery for stream URLs
//!
//! # Content length discovery
//!
//! Stream hosts do not reliably answer `HEAD`. The probe therefore:
//! 1. Sends `HEAD` and reads `Content-Length`
//! 2. Falls back to `GET` with `Range: bytes=0-0` and reads the total from
//!    `Content-Range`
//! 3. Uses `Content-Length` of that response when the host ignored the range
//!
//! Custom headers of third-party streams are forwarded with every request.

use std::{future::Future, num::NonZeroU32, time::Duration};

use async_trait::async_trait;
use futures_util::{FutureExt, TryFutureExt};
use governor::{DefaultDirectRateLimiter, Quota};
use http::{
    header::{CONTENT_LENGTH, CONTENT_RANGE, RANGE},
    HeaderMap, HeaderValue, StatusCode,
};
use reqwest::{Method, Url};

use crate::{
    config::Config,
    error::{Error, Result},
};

/// Discovers the size of a stream without downloading it.
#[async_trait]
pub trait ContentLength: Send + Sync {
    /// Returns the stream size in bytes, or `None` if the host does not
    /// disclose it.
    async fn content_length(&self, url: &Url, headers: &HeaderMap) -> Result<Option<u64>>;
}

/// HTTP client with built-in rate limiting.
pub struct Client {
    /// Direct access to the underlying client without rate limiting.
    pub unlimited: reqwest::Client,

    rate_limiter: DefaultDirectRateLimiter,
}

impl Client {
    /// Duration to keep idle connections alive.
    const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Duration to wait for individual network reads.
    const READ_TIMEOUT: Duration = Duration::from_secs(2);

    /// Creates a new client.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// * HTTP client creation fails
    /// * Rate limit parameters are zero
    pub fn new(config: &Config) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .tcp_keepalive(Self::KEEPALIVE_TIMEOUT)
            .read_timeout(Self::READ_TIMEOUT)
            .user_agent(&config.user_agent);

        let calls = NonZeroU32::new(config.rate_limit_calls)
            .ok_or_else(|| Error::invalid_argument("rate limit calls is zero"))?;
        let replenish_interval = config.rate_limit_interval / calls.get();
        let quota = Quota::with_period(replenish_interval)
            .ok_or_else(|| Error::invalid_argument("rate limit interval is zero"))?
            .allow_burst(calls);

        Ok(Self {
            unlimited: http_client.build()?,
            rate_limiter: governor::RateLimiter::direct(quota),
        })
    }

    /// Builds a request with the given headers and no body.
    pub fn request(&self, method: Method, url: Url, headers: &HeaderMap) -> reqwest::Request {
        let mut request = reqwest::Request::new(method, url);
        request.headers_mut().extend(headers.clone());
        request
    }

    /// Executes a request with rate limiting.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the host answers with an error
    /// status.
    pub fn execute(
        &self,
        request: reqwest::Request,
    ) -> impl Future<Output = Result<reqwest::Response>> + '_ {
        let throttle = self.rate_limiter.until_ready();
        throttle.then(|()| {
            self.unlimited
                .execute(request)
                .map_ok(reqwest::Response::error_for_status)
                .map(|result| result.and_then(|response| response).map_err(Error::from))
        })
    }

    async fn head_length(&self, url: &Url, headers: &HeaderMap) -> Result<Option<u64>> {
        let request = self.request(Method::HEAD, url.clone(), headers);
        let response = self.execute(request).await?;
        Ok(header_u64(response.headers(), CONTENT_LENGTH))
    }

    async fn range_length(&self, url: &Url, headers: &HeaderMap) -> Result<Option<u64>> {
        let mut request = self.request(Method::GET, url.clone(), headers);
        request
            .headers_mut()
            .insert(RANGE, HeaderValue::from_static("bytes=0-0"));

        let response = self.execute(request).await?;
        let length = if response.status() == StatusCode::PARTIAL_CONTENT {
            response
                .headers()
                .get(CONTENT_RANGE)
                .and_then(|value| value.to_str().ok())
                .and_then(parse_content_range_total)
        } else {
            header_u64(response.headers(), CONTENT_LENGTH)
        };

        Ok(length)
    }
}

#[async_trait]
impl ContentLength for Client {
    async fn content_length(&self, url: &Url, headers: &HeaderMap) -> Result<Option<u64>> {
        match self.head_length(url, headers).await {
            Ok(Some(length)) if length > 0 => return Ok(Some(length)),
            Ok(_) => trace!("no content length in head response of {url}"),
            Err(e) => debug!("head request to {url} failed: {e}"),
        }

        self.range_length(url, headers)
            .await
            .map(|length| length.filter(|length| *length > 0))
    }
}

fn header_u64(headers: &HeaderMap, name: http::header::HeaderName) -> Option<u64> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}

/// Parses the complete length out of a `Content-Range` value such as
/// `bytes 0-0/1234567`.
fn parse_content_range_total(value: &str) -> Option<u64> {
    let (_, total) = value.trim().rsplit_once('/')?;
    total.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_content_range() {
        assert_eq!(parse_content_range_total("bytes 0-0/1234567"), Some(1_234_567));
        assert_eq!(parse_content_range_total("bytes 0-0/*"), None);
        assert_eq!(parse_content_range_total("garbage"), None);
    }

    #[test]
    fn reads_numeric_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("4096"));
        assert_eq!(header_u64(&headers, CONTENT_LENGTH), Some(4096));
        assert_eq!(header_u64(&headers, CONTENT_RANGE), None);
    }

    #[test]
    fn rejects_zero_rate_limit() {
        let config = Config {
            rate_limit_calls: 0,
            ..Config::default()
        };
        assert!(Client::new(&config).is_err());
    }
}

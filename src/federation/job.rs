//! Delivery jobs
//!
//! A job is one fully formed outbound HTTP request: destination, method,
//! headers (signature material already attached) and a serialized body.
//! Jobs are immutable and consumed by exactly one delivery attempt.

use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, header};
use url::Url;

use crate::error::AppError;

use super::domain::domain_of;

/// One outbound request addressed to a single remote inbox.
#[derive(Debug, Clone)]
pub struct DeliveryJob {
    /// Job ID (ULID) used to correlate log lines
    id: String,
    url: Url,
    domain: String,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
}

impl DeliveryJob {
    /// Build a job from its parts.
    ///
    /// # Errors
    /// Returns `AppError::Validation` if the URL is not absolute http(s)
    /// with a host.
    pub fn new(
        method: Method,
        url: &str,
        headers: HeaderMap,
        body: impl Into<Bytes>,
    ) -> Result<Self, AppError> {
        let url = Url::parse(url)
            .map_err(|e| AppError::Validation(format!("Invalid delivery URL {}: {}", url, e)))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(AppError::Validation(format!(
                "Unsupported delivery scheme: {}",
                url.scheme()
            )));
        }

        let domain = domain_of(&url);
        if domain.is_empty() {
            return Err(AppError::Validation(format!(
                "Delivery URL has no host: {}",
                url
            )));
        }

        Ok(Self {
            id: ulid::Ulid::new().to_string(),
            url,
            domain,
            method,
            headers,
            body: body.into(),
        })
    }

    /// POST an ActivityStreams document to an inbox.
    ///
    /// `headers` carries whatever a signer attached (Date, Digest,
    /// Signature); the content type is set here unless already present.
    pub fn activity(
        inbox_uri: &str,
        mut headers: HeaderMap,
        body: impl Into<Bytes>,
    ) -> Result<Self, AppError> {
        headers
            .entry(header::CONTENT_TYPE)
            .or_insert(HeaderValue::from_static("application/activity+json"));
        Self::new(Method::POST, inbox_uri, headers, body)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Destination domain key used by the circuit breaker
    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }
}

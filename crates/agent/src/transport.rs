//! The transport seam: anything that turns a request into a response.

use std::{sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    bytes::Bytes,
    http::{Request, Response},
    tracing::debug,
};

use crate::{Error, Result};

/// Takes a fully buffered request and returns a fully buffered response.
///
/// [`crate::Agent`] implements this trait too, so an agent can stand in
/// wherever a transport is expected.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn round_trip(&self, request: Request<Bytes>) -> Result<Response<Bytes>>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn round_trip(&self, request: Request<Bytes>) -> Result<Response<Bytes>> {
        (**self).round_trip(request).await
    }
}

/// Request extension bounding how long the upstream call may take.
///
/// ```
/// # use {bearer_agent::RequestTimeout, std::time::Duration};
/// let mut request = http::Request::new(bytes::Bytes::new());
/// request.extensions_mut().insert(RequestTimeout(Duration::from_secs(5)));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestTimeout(pub Duration);

/// Default transport backed by a `reqwest::Client`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn round_trip(&self, request: Request<Bytes>) -> Result<Response<Bytes>> {
        let request = reqwest::Request::try_from(request)
            .map_err(|e| Error::transport("invalid upstream request", e))?;
        debug!(method = %request.method(), url = %request.url(), "upstream request");

        let resp = self
            .client
            .execute(request)
            .await
            .map_err(|e| Error::transport("upstream request", e))?;

        let status = resp.status();
        let version = resp.version();
        let headers = resp.headers().clone();
        let body = resp
            .bytes()
            .await
            .map_err(|e| Error::transport("upstream body", e))?;

        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.version_mut() = version;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

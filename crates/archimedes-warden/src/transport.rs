//! HTTP transport for decision requests.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use reqwest::Client;

use crate::config::ClientConfig;
use crate::error::{WardenError, WardenResult};

/// A boxed future returned by transports.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Executes HTTP requests.
///
/// Implementations read the whole response body before resolving, so the
/// connection can go back to the pool whatever the caller does with the
/// response. Dropping the returned future abandons the request.
pub trait HttpTransport: Send + Sync + std::fmt::Debug {
    /// Send `request` and return the buffered response.
    fn execute(
        &self,
        request: http::Request<Bytes>,
    ) -> BoxFuture<'_, WardenResult<http::Response<Bytes>>>;
}

/// [`HttpTransport`] backed by a pooled `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    /// HTTP client.
    client: Client,
}

impl ReqwestTransport {
    /// Create a transport from client settings.
    pub fn new(config: &ClientConfig) -> WardenResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.connect_timeout())
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .build()
            .map_err(|e| WardenError::transport(format!("failed to create client: {e}")))?;

        Ok(Self { client })
    }

    /// Wrap an existing client.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

fn transport_error(context: &str, err: &reqwest::Error) -> WardenError {
    if err.is_timeout() {
        WardenError::timeout(format!("{context}: {err}"))
    } else {
        WardenError::transport(format!("{context}: {err}"))
    }
}

impl HttpTransport for ReqwestTransport {
    fn execute(
        &self,
        request: http::Request<Bytes>,
    ) -> BoxFuture<'_, WardenResult<http::Response<Bytes>>> {
        Box::pin(async move {
            let request = reqwest::Request::try_from(request)
                .map_err(|e| transport_error("invalid request", &e))?;

            let response = self
                .client
                .execute(request)
                .await
                .map_err(|e| transport_error("request failed", &e))?;

            let status = response.status();
            let headers = response.headers().clone();
            let body = response
                .bytes()
                .await
                .map_err(|e| transport_error("failed to read body", &e))?;

            let mut buffered = http::Response::new(body);
            *buffered.status_mut() = status;
            *buffered.headers_mut() = headers;
            Ok(buffered)
        })
    }
}

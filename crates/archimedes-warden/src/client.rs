//! Decision endpoint client.
//!
//! Interprets the endpoint's answer, in order:
//!
//! 1. transport failure: [`WardenError::Transport`]
//! 2. `403 Forbidden`: [`Decision::Denied`], whatever the body says
//! 3. any status other than `200 OK`: [`WardenError::UnexpectedStatus`]
//! 4. `200 OK`: the `allowed` field of the JSON body, `false` when absent

use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::error::{WardenError, WardenResult};
use crate::transport::HttpTransport;

/// Outcome of a decision request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The request is allowed.
    Allowed,
    /// The request is denied.
    Denied(DenialSource),
}

/// Why a request was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialSource {
    /// The endpoint answered `403 Forbidden`.
    Forbidden,
    /// The endpoint answered `200 OK` without `"allowed": true`.
    NotAllowed,
}

impl Decision {
    /// Whether the request is allowed.
    pub const fn is_allowed(self) -> bool {
        matches!(self, Self::Allowed)
    }

    /// Turn a denial into [`WardenError::Forbidden`].
    pub fn into_result(self) -> WardenResult<()> {
        match self {
            Self::Allowed => Ok(()),
            Self::Denied(DenialSource::Forbidden) => Err(WardenError::forbidden(
                "decision endpoint responded with 403 Forbidden",
            )),
            Self::Denied(DenialSource::NotAllowed) => Err(WardenError::forbidden(
                "decision endpoint did not allow the request",
            )),
        }
    }
}

/// Response body of the decision endpoint. Unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DecisionResponse {
    /// Whether the request is allowed.
    #[serde(default)]
    pub allowed: bool,
}

/// Sends decision requests and interprets the responses.
#[derive(Debug, Clone)]
pub struct DecisionClient {
    transport: Arc<dyn HttpTransport>,
}

impl DecisionClient {
    /// Create a client using `transport`.
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }

    /// Execute a decision request.
    #[instrument(skip_all, fields(uri = %request.uri()))]
    pub async fn decide(&self, request: http::Request<Bytes>) -> WardenResult<Decision> {
        let response = self.transport.execute(request).await?;
        let decision = interpret(response.status(), response.body())?;
        debug!(allowed = decision.is_allowed(), "received decision");
        Ok(decision)
    }
}

/// Map a buffered decision response to a [`Decision`].
pub fn interpret(status: StatusCode, body: &[u8]) -> WardenResult<Decision> {
    if status == StatusCode::FORBIDDEN {
        return Ok(Decision::Denied(DenialSource::Forbidden));
    }
    if status != StatusCode::OK {
        warn!(status = status.as_u16(), "unexpected decision endpoint status");
        return Err(WardenError::UnexpectedStatus {
            status: status.as_u16(),
        });
    }

    let response: DecisionResponse =
        serde_json::from_slice(body).map_err(|e| WardenError::Decode(e.to_string()))?;

    Ok(if response.allowed {
        Decision::Allowed
    } else {
        Decision::Denied(DenialSource::NotAllowed)
    })
}

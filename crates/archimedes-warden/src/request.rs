//! Decision request construction.

use std::net::{IpAddr, SocketAddr};

use bytes::Bytes;
use chrono::{SecondsFormat, Utc};
use http::header::CONTENT_TYPE;
use http::{HeaderMap, Method, Uri};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

use crate::error::{WardenError, WardenResult};
use crate::resolver::ResolvedParameters;

/// Path of the decision endpoint, relative to the base URL.
pub const DECISION_PATH: &str = "/warden/allowed";

/// The inbound request being authorized.
#[derive(Debug, Clone, Default)]
pub struct InboundRequest {
    /// HTTP method.
    pub method: Method,
    /// Request URI.
    pub uri: Uri,
    /// Request headers.
    pub headers: HeaderMap,
    /// Address of the connected peer.
    pub remote_addr: Option<SocketAddr>,
}

impl InboundRequest {
    /// Create a new inbound request.
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            remote_addr: None,
        }
    }

    /// Set the request headers.
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Set the peer address.
    #[must_use]
    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    fn header(&self, name: &str) -> &str {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map_or("", str::trim)
    }
}

/// Supplies the `context` object of a decision request.
pub trait ContextSupplier: Send + Sync {
    /// Build the context for `request`.
    fn context(&self, request: &InboundRequest) -> Map<String, Value>;
}

impl<F> ContextSupplier for F
where
    F: Fn(&InboundRequest) -> Map<String, Value> + Send + Sync,
{
    fn context(&self, request: &InboundRequest) -> Map<String, Value> {
        self(request)
    }
}

/// Default context: the client address and the current UTC time.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoteContextSupplier;

impl ContextSupplier for RemoteContextSupplier {
    fn context(&self, request: &InboundRequest) -> Map<String, Value> {
        let mut context = Map::new();
        context.insert("remoteIpAddress".to_string(), Value::String(real_ip(request)));
        context.insert(
            "requestedAt".to_string(),
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        );
        context
    }
}

/// Best guess at the address of the client behind any proxies.
///
/// Without `X-Real-Ip` and `X-Forwarded-For` this is the peer address.
/// Otherwise it is the first public address in `X-Forwarded-For`, falling back
/// to `X-Real-Ip`.
pub fn real_ip(request: &InboundRequest) -> String {
    let real_ip = request.header("x-real-ip");
    let forwarded_for = request.header("x-forwarded-for");

    if real_ip.is_empty() && forwarded_for.is_empty() {
        return request
            .remote_addr
            .map(|addr| addr.ip().to_string())
            .unwrap_or_default();
    }

    forwarded_for
        .split(',')
        .map(str::trim)
        .find(|addr| addr.parse::<IpAddr>().is_ok_and(|ip| !is_private(ip)))
        .unwrap_or(real_ip)
        .to_string()
}

fn is_private(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private() || v4.is_link_local(),
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            v6.is_loopback() || (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80
        }
    }
}

/// JSON body sent to the decision endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRequestBody {
    /// The required action.
    pub action: String,
    /// Request context.
    pub context: Map<String, Value>,
    /// The required resource.
    pub resource: String,
    /// The subject.
    pub subject: String,
}

/// URL of the decision endpoint under `base_url`.
///
/// Any query string on the base URL is kept.
pub fn decision_url(base_url: &Url) -> Url {
    let mut url = base_url.clone();
    let path = format!("{}{DECISION_PATH}", base_url.path().trim_end_matches('/'));
    url.set_path(&path);
    url
}

/// Build the `POST {base_url}/warden/allowed` request for resolved parameters.
pub fn build_decision_request(
    base_url: &Url,
    parameters: &ResolvedParameters,
    supplier: &dyn ContextSupplier,
    inbound: &InboundRequest,
) -> WardenResult<http::Request<Bytes>> {
    let body = DecisionRequestBody {
        action: parameters.action.clone(),
        context: supplier.context(inbound),
        resource: parameters.resource.clone(),
        subject: parameters.subject.clone(),
    };
    let payload = serde_json::to_vec(&body)?;

    http::Request::builder()
        .method(Method::POST)
        .uri(decision_url(base_url).as_str())
        .header(CONTENT_TYPE, "application/json")
        .body(Bytes::from(payload))
        .map_err(|e| WardenError::misconfigured("warden", format!("invalid decision request: {e}")))
}

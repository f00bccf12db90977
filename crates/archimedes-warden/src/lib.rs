//! Archimedes Warden - Remote Authorization Adapter
//!
//! This crate authorizes already-authenticated requests by asking a remote
//! warden decision endpoint whether a subject may perform an action on a
//! resource.
//!
//! # Overview
//!
//! For every matched rule the adapter:
//! - Validates the rule configuration and checks the authorizer is enabled
//! - Renders subject, action and resource from per-rule templates evaluated
//!   against the authentication session, reusing compiled templates
//! - Posts the decision request to `{base_url}/warden/allowed`
//! - Translates the response into allow, [`WardenError::Forbidden`] or an error
//!
//! # Architecture
//!
//! ```text
//!     ┌────────────┐  request, session, rule config
//!     │ Archimedes │──────────────────┐
//!     │  Pipeline  │                  │
//!     └────────────┘       ┌──────────▼─────────────────┐
//!                          │   WardenAuthorizer         │
//!                          │   (WardenConfig)           │
//!                          └──────────┬─────────────────┘
//!                                     │ templates
//!                          ┌──────────▼─────────────────┐
//!                          │   ParameterResolver        │
//!                          │   (TemplateCache)          │
//!                          └──────────┬─────────────────┘
//!                                     │ subject/action/resource
//!                          ┌──────────▼─────────────────┐
//!                          │   DecisionClient           │
//!                          │   POST /warden/allowed     │
//!                          └──────────┬─────────────────┘
//!                                     │
//!                          ┌──────────▼─────────────────┐
//!                          │   Warden endpoint          │
//!                          └────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use archimedes_warden::{
//!     Authorizer, AuthorizersConfig, AuthenticationSession, InboundRequest, WardenAuthorizer,
//! };
//!
//! let config = AuthorizersConfig::from_file("authorizers.toml")?.with_env_overrides();
//! let client = config.warden.client.clone();
//! let warden = WardenAuthorizer::with_reqwest(Arc::new(config), &client)?;
//!
//! let rule = serde_json::json!({
//!     "required_action": "read",
//!     "required_resource": "rn:{{.Extra.tenant}}:documents",
//!     "base_url": "http://keto:4466"
//! });
//! let session = AuthenticationSession::new("alice").with_extra("tenant", "acme");
//!
//! match warden.authorize(&InboundRequest::default(), &session, &rule).await {
//!     Ok(()) => { /* allowed */ }
//!     Err(err) if err.is_forbidden() => { /* respond 403 */ }
//!     Err(err) => return Err(err.into()),
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod authorizer;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod request;
pub mod resolver;
pub mod session;
pub mod template;
pub mod transport;

// Re-exports for convenience
pub use authorizer::{
    AllowAuthorizer, Authorizer, AuthorizerRegistry, DenyAuthorizer, WardenAuthorizer,
};
pub use cache::{CacheStats, TemplateCache, TemplateFingerprint};
pub use client::{Decision, DecisionClient, DecisionResponse, DenialSource};
pub use config::{
    AuthorizersConfig, ClientConfig, ConfigurationProvider, RawWardenConfig, WardenConfig,
};
pub use error::{Parameter, WardenError, WardenResult};
pub use request::{
    ContextSupplier, DecisionRequestBody, InboundRequest, RemoteContextSupplier,
};
pub use resolver::{ParameterResolver, ResolvedParameters};
pub use session::{AuthenticationSession, MatchContext};
pub use template::{Template, TemplateError};
pub use transport::{HttpTransport, ReqwestTransport};

//! Authorizer strategies.
//!
//! Every authorizer exposes a stable identifier used for enablement checks and
//! configuration lookup. The pipeline picks one per matched rule through the
//! [`AuthorizerRegistry`].
//!
//! A warden decision runs straight through:
//!
//! ```text
//! validate config → resolve subject/action/resource → build request → decide
//! ```
//!
//! Any failing step ends the call with its error. Nothing is retried and no
//! decision outlives the call.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, instrument};

use crate::cache::TemplateCache;
use crate::client::DecisionClient;
use crate::config::{ClientConfig, ConfigurationProvider, WardenConfig};
use crate::error::{WardenError, WardenResult};
use crate::request::{
    build_decision_request, ContextSupplier, InboundRequest, RemoteContextSupplier,
};
use crate::resolver::ParameterResolver;
use crate::session::AuthenticationSession;
use crate::transport::{BoxFuture, HttpTransport, ReqwestTransport};

/// An interchangeable authorization strategy.
pub trait Authorizer: Send + Sync + std::fmt::Debug {
    /// Stable identifier of the strategy.
    fn id(&self) -> &'static str;

    /// Check that the strategy is enabled and `config` is valid for it.
    fn validate(&self, config: &Value) -> WardenResult<()>;

    /// Authorize one request. A denial is [`WardenError::Forbidden`].
    fn authorize<'a>(
        &'a self,
        request: &'a InboundRequest,
        session: &'a AuthenticationSession,
        config: &'a Value,
    ) -> BoxFuture<'a, WardenResult<()>>;
}

/// Delegates decisions to a remote warden endpoint.
pub struct WardenAuthorizer {
    provider: Arc<dyn ConfigurationProvider>,
    resolver: ParameterResolver,
    client: DecisionClient,
    context: Arc<dyn ContextSupplier>,
}

impl std::fmt::Debug for WardenAuthorizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WardenAuthorizer")
            .field("provider", &self.provider)
            .field("resolver", &self.resolver)
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}

impl WardenAuthorizer {
    /// Identifier of the warden authorizer.
    pub const ID: &'static str = "warden";

    /// Create a warden authorizer using `transport` for decision requests.
    pub fn new(
        provider: Arc<dyn ConfigurationProvider>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            provider,
            resolver: ParameterResolver::new(Arc::new(TemplateCache::new())),
            client: DecisionClient::new(transport),
            context: Arc::new(RemoteContextSupplier),
        }
    }

    /// Create a warden authorizer with a pooled HTTP client.
    pub fn with_reqwest(
        provider: Arc<dyn ConfigurationProvider>,
        client: &ClientConfig,
    ) -> WardenResult<Self> {
        let transport = ReqwestTransport::new(client)?;
        Ok(Self::new(provider, Arc::new(transport)))
    }

    /// Replace the request context supplier.
    #[must_use]
    pub fn with_context_supplier(mut self, supplier: impl ContextSupplier + 'static) -> Self {
        self.context = Arc::new(supplier);
        self
    }

    /// Share a template cache with other authorizers.
    #[must_use]
    pub fn with_template_cache(mut self, cache: Arc<TemplateCache>) -> Self {
        self.resolver = ParameterResolver::new(cache);
        self
    }

    /// The template cache.
    pub fn template_cache(&self) -> &Arc<TemplateCache> {
        self.resolver.cache()
    }

    /// Decode and normalize the rule configuration.
    pub fn config(&self, config: &Value) -> WardenResult<WardenConfig> {
        let merged = self.provider.authorizer_config(Self::ID, config)?;
        WardenConfig::from_value(Self::ID, merged)
    }

    fn ensure_enabled(&self) -> WardenResult<()> {
        if self.provider.is_enabled(Self::ID) {
            Ok(())
        } else {
            Err(WardenError::not_enabled(Self::ID))
        }
    }

    #[instrument(skip_all, fields(authorizer = "warden", subject = %session.subject))]
    async fn run(
        &self,
        request: &InboundRequest,
        session: &AuthenticationSession,
        config: &Value,
    ) -> WardenResult<()> {
        self.ensure_enabled()?;
        let config = self.config(config)?;
        let parameters = self.resolver.resolve_all(session, &config)?;
        debug!(
            action = %parameters.action,
            resource = %parameters.resource,
            "resolved warden parameters"
        );

        let outbound =
            build_decision_request(&config.base_url, &parameters, self.context.as_ref(), request)?;
        let decision = self.client.decide(outbound).await?;
        decision.into_result()
    }
}

impl Authorizer for WardenAuthorizer {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn validate(&self, config: &Value) -> WardenResult<()> {
        self.ensure_enabled()?;
        self.config(config).map(|_| ())
    }

    fn authorize<'a>(
        &'a self,
        request: &'a InboundRequest,
        session: &'a AuthenticationSession,
        config: &'a Value,
    ) -> BoxFuture<'a, WardenResult<()>> {
        Box::pin(self.run(request, session, config))
    }
}

/// Allows every request.
#[derive(Debug)]
pub struct AllowAuthorizer {
    provider: Arc<dyn ConfigurationProvider>,
}

impl AllowAuthorizer {
    /// Identifier of the allow authorizer.
    pub const ID: &'static str = "allow";

    /// Create an allow authorizer.
    pub fn new(provider: Arc<dyn ConfigurationProvider>) -> Self {
        Self { provider }
    }
}

impl Authorizer for AllowAuthorizer {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn validate(&self, _config: &Value) -> WardenResult<()> {
        if self.provider.is_enabled(Self::ID) {
            Ok(())
        } else {
            Err(WardenError::not_enabled(Self::ID))
        }
    }

    fn authorize<'a>(
        &'a self,
        _request: &'a InboundRequest,
        _session: &'a AuthenticationSession,
        config: &'a Value,
    ) -> BoxFuture<'a, WardenResult<()>> {
        Box::pin(async move { self.validate(config) })
    }
}

/// Denies every request.
#[derive(Debug)]
pub struct DenyAuthorizer {
    provider: Arc<dyn ConfigurationProvider>,
}

impl DenyAuthorizer {
    /// Identifier of the deny authorizer.
    pub const ID: &'static str = "deny";

    /// Create a deny authorizer.
    pub fn new(provider: Arc<dyn ConfigurationProvider>) -> Self {
        Self { provider }
    }
}

impl Authorizer for DenyAuthorizer {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn validate(&self, _config: &Value) -> WardenResult<()> {
        if self.provider.is_enabled(Self::ID) {
            Ok(())
        } else {
            Err(WardenError::not_enabled(Self::ID))
        }
    }

    fn authorize<'a>(
        &'a self,
        _request: &'a InboundRequest,
        _session: &'a AuthenticationSession,
        config: &'a Value,
    ) -> BoxFuture<'a, WardenResult<()>> {
        Box::pin(async move {
            self.validate(config)?;
            Err(WardenError::forbidden("access denied by the deny authorizer"))
        })
    }
}

/// Authorizers by identifier.
#[derive(Debug, Default, Clone)]
pub struct AuthorizerRegistry {
    authorizers: BTreeMap<&'static str, Arc<dyn Authorizer>>,
}

impl AuthorizerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the warden, allow and deny authorizers.
    pub fn with_defaults(
        provider: Arc<dyn ConfigurationProvider>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        let mut registry = Self::new();
        registry.register(WardenAuthorizer::new(Arc::clone(&provider), transport));
        registry.register(AllowAuthorizer::new(Arc::clone(&provider)));
        registry.register(DenyAuthorizer::new(provider));
        registry
    }

    /// Add an authorizer, replacing any with the same identifier.
    pub fn register(&mut self, authorizer: impl Authorizer + 'static) {
        self.authorizers.insert(authorizer.id(), Arc::new(authorizer));
    }

    /// Look up an authorizer.
    pub fn get(&self, id: &str) -> WardenResult<Arc<dyn Authorizer>> {
        self.authorizers
            .get(id)
            .cloned()
            .ok_or_else(|| WardenError::misconfigured(id, "no authorizer with this id is registered"))
    }

    /// Registered identifiers, sorted.
    pub fn ids(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.authorizers.keys().copied()
    }
}

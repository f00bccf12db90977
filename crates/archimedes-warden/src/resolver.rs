//! Rule parameter resolution.

use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::cache::{TemplateCache, TemplateFingerprint};
use crate::config::WardenConfig;
use crate::error::{Parameter, WardenError, WardenResult};
use crate::session::AuthenticationSession;
use crate::template::TemplateError;

/// Subject, action and resource rendered for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedParameters {
    /// The subject.
    pub subject: String,
    /// The required action.
    pub action: String,
    /// The required resource.
    pub resource: String,
}

/// Renders rule templates against session data using a shared cache.
#[derive(Debug, Clone, Default)]
pub struct ParameterResolver {
    cache: Arc<TemplateCache>,
}

impl ParameterResolver {
    /// Create a resolver backed by `cache`.
    pub fn new(cache: Arc<TemplateCache>) -> Self {
        Self { cache }
    }

    /// The template cache.
    pub fn cache(&self) -> &Arc<TemplateCache> {
        &self.cache
    }

    /// Render `source` against `data`, compiling it on first use.
    pub fn resolve(
        &self,
        data: &Value,
        fingerprint: &TemplateFingerprint,
        source: &str,
    ) -> Result<String, TemplateError> {
        self.cache.get_or_compile(fingerprint, source)?.render(data)
    }

    /// Resolve the subject, action and resource of a rule.
    ///
    /// All three are attempted. Every failure is logged and the first one, in
    /// subject/action/resource order, is returned.
    pub fn resolve_all(
        &self,
        session: &AuthenticationSession,
        config: &WardenConfig,
    ) -> WardenResult<ResolvedParameters> {
        let data = session.to_template_data();

        let subject = match &config.subject {
            Some(source) => self.resolve_parameter(&data, Parameter::Subject, source),
            None => Ok(session.subject.clone()),
        };
        let action = self.resolve_parameter(&data, Parameter::Action, &config.required_action);
        let resource =
            self.resolve_parameter(&data, Parameter::Resource, &config.required_resource);

        Ok(ResolvedParameters {
            subject: subject?,
            action: action?,
            resource: resource?,
        })
    }

    fn resolve_parameter(
        &self,
        data: &Value,
        parameter: Parameter,
        source: &str,
    ) -> WardenResult<String> {
        let fingerprint = TemplateFingerprint::of(source);
        self.resolve(data, &fingerprint, source).map_err(|source| {
            warn!(parameter = %parameter, error = %source, "failed to resolve parameter");
            WardenError::template(parameter, source)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn config(subject: Option<&str>, action: &str, resource: &str) -> WardenConfig {
        WardenConfig {
            required_action: action.to_string(),
            required_resource: resource.to_string(),
            subject: subject.map(str::to_string),
            base_url: Url::parse("http://policy.local").unwrap(),
        }
    }

    #[test]
    fn test_native_subject_when_template_unset() {
        let resolver = ParameterResolver::default();
        let session = AuthenticationSession::new("{{.Subject}}");

        let resolved = resolver
            .resolve_all(&session, &config(None, "read", "docs"))
            .unwrap();

        assert_eq!(resolved.subject, "{{.Subject}}");
        assert_eq!(resolved.action, "read");
        assert_eq!(resolved.resource, "docs");
    }

    #[test]
    fn test_rendered_parameters() {
        let resolver = ParameterResolver::default();
        let session = AuthenticationSession::new("alice").with_extra("tenant", "acme");

        let resolved = resolver
            .resolve_all(
                &session,
                &config(
                    Some("user:{{.Subject}}"),
                    "docs:read",
                    "rn:{{.Extra.tenant}}:docs",
                ),
            )
            .unwrap();

        assert_eq!(resolved.subject, "user:alice");
        assert_eq!(resolved.resource, "rn:acme:docs");
    }

    #[test]
    fn test_each_parameter_attempted() {
        let resolver = ParameterResolver::default();
        let session = AuthenticationSession::new("alice");

        let err = resolver
            .resolve_all(
                &session,
                &config(Some("{{.Extra.a}}"), "{{.Extra.b}}", "{{.Extra.c"),
            )
            .unwrap_err();

        assert!(matches!(
            err,
            WardenError::Template {
                parameter: Parameter::Subject,
                ..
            }
        ));
        // the malformed resource template was still compiled (and rejected)
        assert_eq!(resolver.cache().stats().misses, 3);
    }

    #[test]
    fn test_action_failure_reported() {
        let resolver = ParameterResolver::default();
        let session = AuthenticationSession::new("alice");

        let err = resolver
            .resolve_all(&session, &config(None, "{{.Missing}}", "docs"))
            .unwrap_err();

        assert!(matches!(
            err,
            WardenError::Template {
                parameter: Parameter::Action,
                ..
            }
        ));
    }

    #[test]
    fn test_shared_template_reused_across_requests() {
        let resolver = ParameterResolver::default();
        let cfg = config(Some("{{.Subject}}"), "read", "docs");

        for subject in ["alice", "bob", "carol"] {
            let resolved = resolver
                .resolve_all(&AuthenticationSession::new(subject), &cfg)
                .unwrap();
            assert_eq!(resolved.subject, subject);
        }

        let stats = resolver.cache().stats();
        assert_eq!(stats.size, 3);
        assert_eq!(stats.compilations, 3);
        assert_eq!(stats.hits, 6);
    }
}

//! Authentication session data exposed to parameter templates.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An already-authenticated request session.
///
/// Produced upstream by the authentication stage and only read here. Field
/// names are serialized the way templates refer to them: `.Subject`,
/// `.Extra`, `.Header`, `.MatchContext`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthenticationSession {
    /// The authenticated subject.
    #[serde(rename = "Subject")]
    pub subject: String,
    /// Arbitrary claims attached by the authenticator.
    #[serde(rename = "Extra", default)]
    pub extra: Map<String, Value>,
    /// Headers set by the authenticator, by name.
    #[serde(rename = "Header", default)]
    pub header: BTreeMap<String, Vec<String>>,
    /// Data captured while matching the rule.
    #[serde(rename = "MatchContext", default)]
    pub match_context: MatchContext,
}

/// Data captured while matching a rule against the request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchContext {
    /// Capture groups of the rule's URL pattern.
    #[serde(rename = "RegexpCaptureGroups", default)]
    pub regexp_capture_groups: Vec<String>,
    /// The matched request URL.
    #[serde(rename = "URL", default)]
    pub url: Option<String>,
}

impl AuthenticationSession {
    /// Create a session for `subject`.
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            ..Self::default()
        }
    }

    /// Attach a claim.
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Attach a header value.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.header.entry(name.into()).or_default().push(value.into());
        self
    }

    /// Set the match context.
    #[must_use]
    pub fn with_match_context(mut self, match_context: MatchContext) -> Self {
        self.match_context = match_context;
        self
    }

    /// The session as template data.
    pub fn to_template_data(&self) -> Value {
        let mut header = Map::new();
        for (name, values) in &self.header {
            header.insert(
                name.clone(),
                Value::Array(values.iter().cloned().map(Value::String).collect()),
            );
        }

        let mut match_context = Map::new();
        match_context.insert(
            "RegexpCaptureGroups".to_string(),
            Value::Array(
                self.match_context
                    .regexp_capture_groups
                    .iter()
                    .cloned()
                    .map(Value::String)
                    .collect(),
            ),
        );
        if let Some(url) = &self.match_context.url {
            match_context.insert("URL".to_string(), Value::String(url.clone()));
        }

        let mut data = Map::new();
        data.insert("Subject".to_string(), Value::String(self.subject.clone()));
        data.insert("Extra".to_string(), Value::Object(self.extra.clone()));
        data.insert("Header".to_string(), Value::Object(header));
        data.insert("MatchContext".to_string(), Value::Object(match_context));
        Value::Object(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_template_data_shape() {
        let session = AuthenticationSession::new("alice")
            .with_extra("tenant", "acme")
            .with_header("X-Org", "eng")
            .with_match_context(MatchContext {
                regexp_capture_groups: vec!["42".to_string()],
                url: Some("https://api.local/users/42".to_string()),
            });

        assert_eq!(
            session.to_template_data(),
            json!({
                "Subject": "alice",
                "Extra": {"tenant": "acme"},
                "Header": {"X-Org": ["eng"]},
                "MatchContext": {
                    "RegexpCaptureGroups": ["42"],
                    "URL": "https://api.local/users/42"
                }
            })
        );
    }

    #[test]
    fn test_url_absent_when_unset() {
        let data = AuthenticationSession::new("bob").to_template_data();
        assert!(data["MatchContext"].get("URL").is_none());
    }

    #[test]
    fn test_deserialize_from_upstream_json() {
        let session: AuthenticationSession =
            serde_json::from_value(json!({"Subject": "carol", "Extra": {"admin": true}}))
                .unwrap();
        assert_eq!(session.subject, "carol");
        assert_eq!(session.extra["admin"], json!(true));
        assert!(session.header.is_empty());
    }
}

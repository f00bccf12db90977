//! Configuration for the authorizers.
//!
//! Two layers are involved:
//!
//! - [`AuthorizersConfig`] is process-level: which authorizers are enabled,
//!   the warden defaults shared by every rule, and HTTP client settings. It is
//!   loaded from TOML or JSON and acts as the [`ConfigurationProvider`].
//! - [`WardenConfig`] is per-rule: the rule's JSON merged over the defaults,
//!   decoded strictly and normalized once.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};
use url::Url;

use crate::error::{WardenError, WardenResult};

/// Value substituted for an empty required action or resource.
pub const UNSET: &str = "unset";

/// Answers enablement and configuration questions for authorizers.
pub trait ConfigurationProvider: Send + Sync + std::fmt::Debug {
    /// Whether the authorizer `id` is administratively enabled.
    fn is_enabled(&self, id: &str) -> bool;

    /// The effective raw configuration of authorizer `id` for one rule.
    fn authorizer_config(&self, id: &str, overrides: &Value) -> WardenResult<Value>;
}

/// Per-rule warden configuration as written by rule authors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RawWardenConfig {
    /// Action template.
    pub required_action: String,
    /// Resource template.
    pub required_resource: String,
    /// Subject template; empty means the session subject.
    pub subject: String,
    /// Decision endpoint base URL.
    pub base_url: String,
}

/// Normalized per-rule warden configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WardenConfig {
    /// Action template, never empty.
    pub required_action: String,
    /// Resource template, never empty.
    pub required_resource: String,
    /// Subject template, `None` to use the session subject unrendered.
    pub subject: Option<String>,
    /// Validated absolute base URL.
    pub base_url: Url,
}

impl WardenConfig {
    /// Decode and normalize a rule's raw configuration.
    pub fn from_value(authorizer: &str, raw: Value) -> WardenResult<Self> {
        let raw: RawWardenConfig = serde_json::from_value(raw)
            .map_err(|e| WardenError::misconfigured(authorizer, e.to_string()))?;
        Self::from_raw(authorizer, raw)
    }

    /// Normalize an already decoded configuration.
    pub fn from_raw(authorizer: &str, raw: RawWardenConfig) -> WardenResult<Self> {
        let base_url = parse_base_url(&raw.base_url)
            .map_err(|reason| WardenError::misconfigured(authorizer, reason))?;

        Ok(Self {
            required_action: or_unset(raw.required_action),
            required_resource: or_unset(raw.required_resource),
            subject: Some(raw.subject).filter(|s| !s.is_empty()),
            base_url,
        })
    }
}

fn or_unset(value: String) -> String {
    if value.is_empty() {
        UNSET.to_string()
    } else {
        value
    }
}

fn parse_base_url(value: &str) -> Result<Url, String> {
    if value.is_empty() {
        return Err("base_url is required".to_string());
    }
    let url = Url::parse(value).map_err(|e| format!("base_url '{value}' is not a valid URL: {e}"))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("base_url '{value}' must use http or https"));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(format!("base_url '{value}' has no host"));
    }
    Ok(url)
}

/// HTTP client settings for the decision endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    /// Total request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Maximum idle connections kept per host.
    pub pool_max_idle_per_host: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            connect_timeout_ms: 1_000,
            pool_max_idle_per_host: 32,
        }
    }
}

impl ClientConfig {
    /// Total request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Connect timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Settings of the warden authorizer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WardenSettings {
    /// Whether the authorizer may be used.
    pub enabled: bool,
    /// Defaults merged under every rule's configuration.
    pub config: Value,
    /// HTTP client settings.
    pub client: ClientConfig,
}

/// Settings of an authorizer without configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToggleSettings {
    /// Whether the authorizer may be used.
    pub enabled: bool,
}

/// Process-level authorizer configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthorizersConfig {
    /// The warden authorizer.
    pub warden: WardenSettings,
    /// The allow-everything authorizer.
    pub allow: ToggleSettings,
    /// The deny-everything authorizer.
    pub deny: ToggleSettings,
}

impl AuthorizersConfig {
    /// Load configuration from a `.toml` or `.json` file.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn from_file(path: impl AsRef<Path>) -> WardenResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            WardenError::misconfigured("authorizers", format!("failed to read config file: {e}"))
        })?;

        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");
        let config = match extension {
            "toml" => Self::from_toml_str(&content)?,
            "json" => Self::from_json_str(&content)?,
            _ => {
                return Err(WardenError::misconfigured(
                    "authorizers",
                    format!("unsupported config format: {extension}"),
                ))
            }
        };
        debug!(warden_enabled = config.warden.enabled, "loaded authorizer configuration");
        Ok(config)
    }

    /// Parse TOML configuration.
    pub fn from_toml_str(content: &str) -> WardenResult<Self> {
        toml::from_str(content)
            .map_err(|e| WardenError::misconfigured("authorizers", format!("invalid TOML: {e}")))
    }

    /// Parse JSON configuration.
    pub fn from_json_str(content: &str) -> WardenResult<Self> {
        serde_json::from_str(content)
            .map_err(|e| WardenError::misconfigured("authorizers", format!("invalid JSON: {e}")))
    }

    /// Apply environment variable overrides.
    ///
    /// Reads `ARCHIMEDES_WARDEN_ENABLED`, `ARCHIMEDES_WARDEN_BASE_URL` and
    /// `ARCHIMEDES_WARDEN_TIMEOUT_MS`. Unparsable values are ignored.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(enabled) = lookup("ARCHIMEDES_WARDEN_ENABLED") {
            if let Ok(enabled) = enabled.parse() {
                self.warden.enabled = enabled;
            }
        }

        if let Some(base_url) = lookup("ARCHIMEDES_WARDEN_BASE_URL") {
            if !self.warden.config.is_object() {
                self.warden.config = Value::Object(serde_json::Map::new());
            }
            if let Value::Object(map) = &mut self.warden.config {
                map.insert("base_url".to_string(), Value::String(base_url));
            }
        }

        if let Some(timeout) = lookup("ARCHIMEDES_WARDEN_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse() {
                self.warden.client.timeout_ms = ms;
            }
        }

        self
    }

    fn defaults_for(&self, id: &str) -> Value {
        match id {
            "warden" => self.warden.config.clone(),
            _ => Value::Null,
        }
    }
}

impl ConfigurationProvider for AuthorizersConfig {
    fn is_enabled(&self, id: &str) -> bool {
        match id {
            "warden" => self.warden.enabled,
            "allow" => self.allow.enabled,
            "deny" => self.deny.enabled,
            _ => false,
        }
    }

    fn authorizer_config(&self, id: &str, overrides: &Value) -> WardenResult<Value> {
        let mut merged = self.defaults_for(id);
        merge(&mut merged, overrides);
        if merged.is_null() {
            merged = Value::Object(serde_json::Map::new());
        }
        if !merged.is_object() {
            return Err(WardenError::misconfigured(
                id,
                "configuration must be a JSON object",
            ));
        }
        Ok(merged)
    }
}

/// Merge `overrides` into `base`: objects merge key by key, `null` keeps the
/// base value and anything else replaces it.
fn merge(base: &mut Value, overrides: &Value) {
    match (base, overrides) {
        (_, Value::Null) => {}
        (Value::Object(base), Value::Object(overrides)) => {
            for (key, value) in overrides.iter().filter(|(_, v)| !v.is_null()) {
                merge(base.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
        (base, value) => *base = value.clone(),
    }
}

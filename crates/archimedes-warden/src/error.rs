//! Error types for the warden authorizer.

use thiserror::Error;

use crate::template::TemplateError;

/// Result type for warden operations.
pub type WardenResult<T> = Result<T, WardenError>;

/// The rule parameter a template was rendered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parameter {
    /// The subject sent to the decision endpoint.
    Subject,
    /// The required action.
    Action,
    /// The required resource.
    Resource,
}

impl Parameter {
    /// Name of the parameter as used in logs and error messages.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Subject => "subject",
            Self::Action => "action",
            Self::Resource => "resource",
        }
    }
}

impl std::fmt::Display for Parameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur while authorizing a request.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WardenError {
    /// The authorizer is administratively disabled.
    #[error("authorizer '{authorizer}' is not enabled")]
    NotEnabled {
        /// Authorizer identifier.
        authorizer: String,
    },

    /// The rule configuration is invalid.
    #[error("authorizer '{authorizer}' is misconfigured: {reason}")]
    Misconfigured {
        /// Authorizer identifier.
        authorizer: String,
        /// What is wrong with the configuration.
        reason: String,
    },

    /// A parameter template failed to compile or render.
    #[error("failed to resolve {parameter}: {source}")]
    Template {
        /// The parameter being resolved.
        parameter: Parameter,
        /// Underlying template failure.
        #[source]
        source: TemplateError,
    },

    /// The decision endpoint could not be reached.
    #[error("decision endpoint unreachable: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the failure was a timeout.
        timed_out: bool,
    },

    /// The decision endpoint answered with a status outside {200, 403}.
    #[error("expected status code 200 but got {status}")]
    UnexpectedStatus {
        /// Observed HTTP status code.
        status: u16,
    },

    /// The decision response body did not match the expected schema.
    #[error("invalid decision response: {0}")]
    Decode(String),

    /// The decision request body could not be serialized.
    #[error("failed to encode decision request: {0}")]
    Encode(#[from] serde_json::Error),

    /// Access was denied.
    #[error("access denied: {reason}")]
    Forbidden {
        /// Reason for denial.
        reason: String,
    },
}

impl WardenError {
    /// Create a not-enabled error.
    pub fn not_enabled(authorizer: impl Into<String>) -> Self {
        Self::NotEnabled {
            authorizer: authorizer.into(),
        }
    }

    /// Create a misconfiguration error.
    pub fn misconfigured(authorizer: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Misconfigured {
            authorizer: authorizer.into(),
            reason: reason.into(),
        }
    }

    /// Create a template error for the given parameter.
    pub fn template(parameter: Parameter, source: TemplateError) -> Self {
        Self::Template { parameter, source }
    }

    /// Create a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            timed_out: false,
        }
    }

    /// Create a transport error caused by a timeout.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            timed_out: true,
        }
    }

    /// Create a forbidden outcome.
    pub fn forbidden(reason: impl Into<String>) -> Self {
        Self::Forbidden {
            reason: reason.into(),
        }
    }

    /// Check if this is an explicit denial.
    pub const fn is_forbidden(&self) -> bool {
        matches!(self, Self::Forbidden { .. })
    }

    /// Check if the caller may retry the call.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// Check if this error points at a deployment or rule problem.
    pub const fn is_configuration(&self) -> bool {
        matches!(self, Self::NotEnabled { .. } | Self::Misconfigured { .. })
    }

    /// Get the error category for log fields.
    pub const fn category(&self) -> &'static str {
        match self {
            Self::NotEnabled { .. } => "not_enabled",
            Self::Misconfigured { .. } => "misconfigured",
            Self::Template { .. } => "template",
            Self::Transport { .. } => "transport",
            Self::UnexpectedStatus { .. } => "unexpected_status",
            Self::Decode(_) => "decode",
            Self::Encode(_) => "encode",
            Self::Forbidden { .. } => "forbidden",
        }
    }

    /// Get the HTTP status code a pipeline should answer with.
    #[allow(clippy::match_same_arms)]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::Forbidden { .. } => 403,
            Self::NotEnabled { .. } | Self::Misconfigured { .. } => 500,
            Self::Template { .. } | Self::Encode(_) => 500,
            Self::Transport { timed_out: true, .. } => 504,
            Self::Transport { .. } | Self::UnexpectedStatus { .. } | Self::Decode(_) => 502,
        }
    }
}

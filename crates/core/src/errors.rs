use thiserror::Error;

use crate::domain::overrides::InvalidOverride;

/// Transport-agnostic error taxonomy for the dispatch path. Every variant
/// carries a short stable code and a user-safe sentence; internal detail
/// (storage errors, provider messages) is logged at the point of failure
/// and never surfaced through here.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("caller is not entitled to this template tier")]
    AuthorizationDenied,
    #[error("customization not found")]
    CustomizationNotFound,
    #[error("template is not available for purchase")]
    TemplateUnavailable,
    #[error("model `{0}` is not permitted by the template")]
    ModelNotPermitted(String),
    #[error("no adapter is available for model `{0}`")]
    ModelUnavailable(String),
    #[error(transparent)]
    InvalidOverride(#[from] InvalidOverride),
    #[error("monthly quota exceeded")]
    QuotaExceeded { remaining: u32 },
    #[error("upstream provider rate limited the request")]
    UpstreamRateLimited,
    #[error("upstream provider returned an error")]
    UpstreamError,
    #[error("upstream provider timed out")]
    UpstreamTimeout,
    #[error("upstream provider returned an empty reply")]
    UpstreamEmpty,
    #[error("internal error")]
    Internal,
}

impl DispatchError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::AuthorizationDenied => "authorization_denied",
            Self::CustomizationNotFound => "customization_not_found",
            Self::TemplateUnavailable => "template_unavailable",
            Self::ModelNotPermitted(_) => "model_not_permitted",
            Self::ModelUnavailable(_) => "model_unavailable",
            Self::InvalidOverride(_) => "invalid_override",
            Self::QuotaExceeded { .. } => "quota_exceeded",
            Self::UpstreamRateLimited => "upstream_rate_limited",
            Self::UpstreamError => "upstream_error",
            Self::UpstreamTimeout => "upstream_timeout",
            Self::UpstreamEmpty => "upstream_empty",
            Self::Internal => "internal_error",
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidRequest(message) => format!("The request is invalid: {message}."),
            Self::AuthorizationDenied => {
                "Your plan does not include this agent. Upgrade to access it.".to_string()
            }
            Self::CustomizationNotFound => "No agent matches that id or key.".to_string(),
            Self::TemplateUnavailable => {
                "This agent is not currently available for purchase.".to_string()
            }
            Self::ModelNotPermitted(model) => {
                format!("Model `{model}` is not offered by this agent.")
            }
            Self::ModelUnavailable(model) => {
                format!("Model `{model}` is temporarily unavailable. Try again later.")
            }
            Self::InvalidOverride(invalid) => {
                format!("Unsupported value `{}` for `{}`.", invalid.value, invalid.field)
            }
            Self::QuotaExceeded { .. } => {
                "You have used all chats included in your plan this month.".to_string()
            }
            Self::UpstreamRateLimited => {
                "The model provider is rate limiting requests. Try again shortly.".to_string()
            }
            Self::UpstreamError => {
                "The model provider returned an error. Try again shortly.".to_string()
            }
            Self::UpstreamTimeout => "The model did not answer in time.".to_string(),
            Self::UpstreamEmpty => "The model returned no content.".to_string(),
            Self::Internal => "An unexpected internal error occurred.".to_string(),
        }
    }
}

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::analytics::AnalyticsError;
use crate::mailgun::{EventParseError, VerifyError};

/// Where in the analytics hand-off a delivery failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStage {
    Connect,
    Enqueue,
    Close,
}

impl DeliveryStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStage::Connect => "connect",
            DeliveryStage::Enqueue => "enqueue",
            DeliveryStage::Close => "close",
        }
    }
}

/// Every way a webhook request can fail. Each maps to one response.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("malformed payload: {0}")]
    MalformedPayload(#[source] serde_json::Error),

    /// Carries the verifier error when verification could not run at all.
    #[error("invalid signature{}", signature_detail(.0))]
    InvalidSignature(Option<VerifyError>),

    #[error("unparsable event data: {0}")]
    UnparsableEvent(#[from] EventParseError),

    #[error("unsupported event: {0}")]
    UnsupportedEventKind(String),

    #[error("could not resolve a distinct id")]
    ActorResolutionFailure,

    #[error("analytics {} failed: {source}", .stage.as_str())]
    DeliveryFailure {
        stage: DeliveryStage,
        #[source]
        source: AnalyticsError,
    },
}

impl WebhookError {
    pub fn delivery(stage: DeliveryStage) -> impl FnOnce(AnalyticsError) -> Self {
        move |source| WebhookError::DeliveryFailure { stage, source }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            WebhookError::MalformedPayload(_)
            | WebhookError::InvalidSignature(_)
            | WebhookError::UnparsableEvent(_)
            | WebhookError::UnsupportedEventKind(_) => StatusCode::NOT_ACCEPTABLE,
            WebhookError::ActorResolutionFailure | WebhookError::DeliveryFailure { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Plain-text body returned to the provider. Never includes internal detail.
    pub fn body(&self) -> &'static str {
        match self {
            WebhookError::MalformedPayload(_) | WebhookError::InvalidSignature(_) => {
                "invalid request"
            }
            WebhookError::UnparsableEvent(_) => "failed to parse event data",
            WebhookError::UnsupportedEventKind(_) => "unsupported event",
            WebhookError::ActorResolutionFailure => "failed to get distinct id",
            WebhookError::DeliveryFailure { stage, .. } => match stage {
                DeliveryStage::Connect => "failed to initialise posthog client",
                DeliveryStage::Enqueue => "failed to enqueue posthog event",
                DeliveryStage::Close => "failed to close posthog client",
            },
        }
    }

    fn log(&self) {
        match self {
            WebhookError::MalformedPayload(_) | WebhookError::InvalidSignature(None) => {
                tracing::info!(error = %self, "rejected webhook");
            }
            WebhookError::UnsupportedEventKind(event) => {
                tracing::warn!(event = %event, "unsupported event");
            }
            WebhookError::InvalidSignature(Some(_)) | WebhookError::UnparsableEvent(_) => {
                tracing::warn!(error = %self, "rejected webhook");
            }
            WebhookError::ActorResolutionFailure | WebhookError::DeliveryFailure { .. } => {
                tracing::error!(error = %self, "webhook processing failed");
            }
        }
    }
}

fn signature_detail(err: &Option<VerifyError>) -> String {
    err.as_ref().map(|err| format!(": {err}")).unwrap_or_default()
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        self.log();
        (self.status(), self.body()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_map_to_not_acceptable() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let cases = [
            WebhookError::MalformedPayload(parse_err),
            WebhookError::InvalidSignature(None),
            WebhookError::InvalidSignature(Some(VerifyError::EmptyKey)),
            WebhookError::UnparsableEvent(EventParseError::MissingEventType),
            WebhookError::UnsupportedEventKind("failed".to_string()),
        ];
        for err in cases {
            assert_eq!(err.status(), StatusCode::NOT_ACCEPTABLE, "{err}");
        }
    }

    #[test]
    fn signature_message_includes_verifier_error() {
        assert_eq!(
            WebhookError::InvalidSignature(None).to_string(),
            "invalid signature"
        );
        assert_eq!(
            WebhookError::InvalidSignature(Some(VerifyError::EmptyKey)).to_string(),
            "invalid signature: signing key is empty"
        );
    }

    #[test]
    fn delivery_failure_body_names_the_stage() {
        let err = WebhookError::delivery(DeliveryStage::Close)(AnalyticsError::Closed);
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.body(), "failed to close posthog client");
        assert_eq!(
            err.to_string(),
            "analytics close failed: analytics client already closed"
        );
    }
}

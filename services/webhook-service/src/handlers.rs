use axum::{body::Bytes, extract::State, http::StatusCode};

use crate::analytics::{AnalyticsConnector, Capture};
use crate::error::{DeliveryStage, WebhookError};
use crate::logic::build_capture;
use crate::mailgun::parse_event;
use crate::models::WebhookPayload;
use crate::state::AppState;

pub async fn healthz() -> StatusCode {
    StatusCode::OK
}

pub async fn readyz() -> StatusCode {
    StatusCode::OK
}

/// Receives one Mailgun webhook and forwards it to PostHog.
///
/// The body is decoded by hand rather than through `Json` so that every
/// rejection, including bad JSON, answers 406 the way Mailgun expects.
pub async fn handle_webhook(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, &'static str), WebhookError> {
    let payload: WebhookPayload =
        serde_json::from_slice(&body).map_err(WebhookError::MalformedPayload)?;

    match state.verifier.verify(&payload.signature) {
        Ok(true) => {}
        Ok(false) => return Err(WebhookError::InvalidSignature(None)),
        Err(err) => return Err(WebhookError::InvalidSignature(Some(err))),
    }

    let event = parse_event(payload.event_data)?;
    let kind = event.kind().to_string();
    let capture = build_capture(event, &state.config)?;

    tracing::debug!(
        event = %kind,
        distinct_id = %capture.distinct_id,
        properties = capture.properties.len(),
        "mapped mailgun event"
    );

    let event_name = capture.event.clone();
    deliver(state.analytics.as_ref(), capture).await?;

    tracing::info!(event = %kind, capture = %event_name, "forwarded mailgun event");
    Ok((StatusCode::OK, "OK"))
}

/// Submits one capture on a fresh session and waits for it to be flushed.
async fn deliver(connector: &dyn AnalyticsConnector, capture: Capture) -> Result<(), WebhookError> {
    let mut client = connector
        .connect()
        .map_err(WebhookError::delivery(DeliveryStage::Connect))?;
    client
        .enqueue(capture)
        .map_err(WebhookError::delivery(DeliveryStage::Enqueue))?;
    client
        .close()
        .await
        .map_err(WebhookError::delivery(DeliveryStage::Close))
}

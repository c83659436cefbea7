use sha1::{Digest, Sha1};

use crate::analytics::{Capture, Properties};
use crate::config::HandlerConfig;
use crate::error::WebhookError;
use crate::models::{Engagement, EventCommon, UserVariables, VerifiedEvent};

pub const DELIVERED_EVENT: &str = "mailgun message delivered";
pub const OPENED_EVENT: &str = "mailgun message opened";
pub const CLICKED_EVENT: &str = "mailgun message link clicked";

/// Stable anonymous id for a recipient: SHA-1 hex of the lowercased address.
pub fn recipient_hash(email: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(email.to_lowercase().as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn resolve_distinct_id(
    recipient: &str,
    user_variables: &UserVariables,
    user_id_key: &str,
) -> Result<String, WebhookError> {
    let distinct_id = match user_variables.string_var(user_id_key) {
        Some(user_id) => user_id.to_string(),
        None => recipient_hash(recipient),
    };
    if distinct_id.is_empty() {
        return Err(WebhookError::ActorResolutionFailure);
    }
    Ok(distinct_id)
}

/// Copies configured user variables into `properties`, skipping any that are
/// absent, empty, or not strings.
pub fn with_user_variables(
    mut properties: Properties,
    user_variables: &UserVariables,
    keys: &[String],
) -> Properties {
    for key in keys {
        if let Some(value) = user_variables.string_var(key) {
            properties = properties.set(key.as_str(), value);
        }
    }
    properties
}

fn message_properties(common: &EventCommon) -> Properties {
    Properties::new()
        .set("mailgun_id", &common.id)
        .set("mailgun_tags", &common.tags)
        .set("mailgun_message_headers", &common.message.headers)
}

fn engagement_properties(properties: Properties, engagement: &Engagement) -> Properties {
    properties
        .set("mailgun_client_info", &engagement.client_info)
        .set("mailgun_geolocation", &engagement.geolocation)
        .set("$ip", &engagement.ip)
}

/// Maps a verified event onto the capture sent to PostHog.
pub fn build_capture(
    event: VerifiedEvent,
    config: &HandlerConfig,
) -> Result<Capture, WebhookError> {
    let (event_name, common, properties) = match event {
        VerifiedEvent::Delivered(delivered) => {
            let properties = message_properties(&delivered.common)
                .set("mailgun_envelope", &delivered.envelope);
            (DELIVERED_EVENT, delivered.common, properties)
        }
        VerifiedEvent::Opened(opened) => {
            let properties =
                engagement_properties(message_properties(&opened.common), &opened.engagement);
            (OPENED_EVENT, opened.common, properties)
        }
        VerifiedEvent::Clicked(clicked) => {
            let properties = message_properties(&clicked.common).set("mailgun_url", &clicked.url);
            let properties = engagement_properties(properties, &clicked.engagement);
            (CLICKED_EVENT, clicked.common, properties)
        }
        VerifiedEvent::Unsupported { event } => {
            return Err(WebhookError::UnsupportedEventKind(event));
        }
    };

    let distinct_id = resolve_distinct_id(
        &common.recipient,
        &common.user_variables,
        &config.user_id_variable_key,
    )?;
    let properties = with_user_variables(
        properties,
        &common.user_variables,
        &config.additional_user_variables,
    );

    Ok(Capture {
        distinct_id,
        event: event_name.to_string(),
        timestamp: common.timestamp,
        properties,
    })
}

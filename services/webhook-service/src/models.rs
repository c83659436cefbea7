use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Body Mailgun posts to the webhook URL.
#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    pub signature: Signature,
    #[serde(rename = "event-data", default)]
    pub event_data: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Signature {
    pub timestamp: String,
    pub token: String,
    pub signature: String,
}

/// Event data after the payload signature has been checked.
#[derive(Debug, Clone)]
pub enum VerifiedEvent {
    Delivered(Delivered),
    Opened(Opened),
    Clicked(Clicked),
    Unsupported { event: String },
}

impl VerifiedEvent {
    pub fn kind(&self) -> &str {
        match self {
            VerifiedEvent::Delivered(_) => "delivered",
            VerifiedEvent::Opened(_) => "opened",
            VerifiedEvent::Clicked(_) => "clicked",
            VerifiedEvent::Unsupported { event } => event.as_str(),
        }
    }
}

/// Fields shared by every message event Mailgun emits.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EventCommon {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(deserialize_with = "epoch_seconds")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub recipient: String,
    #[serde(default, deserialize_with = "nullable_strings")]
    pub tags: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub message: Message,
    #[serde(default)]
    pub user_variables: UserVariables,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Delivered {
    #[serde(flatten)]
    pub common: EventCommon,
    #[serde(default, deserialize_with = "null_as_default")]
    pub envelope: Envelope,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Opened {
    #[serde(flatten)]
    pub common: EventCommon,
    #[serde(flatten)]
    pub engagement: Engagement,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Clicked {
    #[serde(flatten)]
    pub common: EventCommon,
    #[serde(flatten)]
    pub engagement: Engagement,
    #[serde(default, deserialize_with = "null_as_default")]
    pub url: String,
}

/// Recipient-side details attached to opens and clicks.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Engagement {
    #[serde(default, deserialize_with = "null_as_default")]
    pub client_info: ClientInfo,
    #[serde(default, deserialize_with = "null_as_default")]
    pub geolocation: GeoLocation,
    #[serde(default, deserialize_with = "null_as_default")]
    pub ip: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Message {
    #[serde(deserialize_with = "null_as_default")]
    pub headers: MessageHeaders,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct MessageHeaders {
    #[serde(deserialize_with = "null_as_default")]
    pub to: String,
    #[serde(deserialize_with = "null_as_default")]
    pub message_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub from: String,
    #[serde(deserialize_with = "null_as_default")]
    pub subject: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Envelope {
    #[serde(deserialize_with = "null_as_default")]
    pub mail_from: String,
    #[serde(deserialize_with = "null_as_default")]
    pub sender: String,
    #[serde(deserialize_with = "null_as_default")]
    pub transport: String,
    #[serde(deserialize_with = "null_as_default")]
    pub targets: String,
    #[serde(deserialize_with = "null_as_default")]
    pub sending_host: String,
    #[serde(deserialize_with = "null_as_default")]
    pub sending_ip: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ClientInfo {
    #[serde(deserialize_with = "null_as_default")]
    pub accept_language: String,
    #[serde(deserialize_with = "null_as_default")]
    pub client_name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub client_os: String,
    #[serde(deserialize_with = "null_as_default")]
    pub client_type: String,
    #[serde(deserialize_with = "null_as_default")]
    pub device_type: String,
    #[serde(deserialize_with = "null_as_default")]
    pub user_agent: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct GeoLocation {
    #[serde(deserialize_with = "null_as_default")]
    pub city: String,
    #[serde(deserialize_with = "null_as_default")]
    pub country: String,
    #[serde(deserialize_with = "null_as_default")]
    pub region: String,
}

/// Free-form metadata attached at send time and echoed back in events.
///
/// Mailgun does not constrain the shape, so the raw JSON is kept and every
/// lookup tolerates a missing map or a non-string value.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct UserVariables(serde_json::Value);

impl UserVariables {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    /// Non-empty string stored under `key`, if any.
    pub fn string_var(&self, key: &str) -> Option<&str> {
        self.0
            .as_object()?
            .get(key)?
            .as_str()
            .filter(|value| !value.is_empty())
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// Null list entries decode as empty strings, matching how nested fields
/// treat null.
fn nullable_strings<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let entries = Option::<Vec<Option<String>>>::deserialize(deserializer)?;
    Ok(entries
        .unwrap_or_default()
        .into_iter()
        .map(Option::unwrap_or_default)
        .collect())
}

fn epoch_seconds<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let seconds = f64::deserialize(deserializer)?;
    timestamp_from_epoch(seconds)
        .ok_or_else(|| serde::de::Error::custom(format!("timestamp out of range: {seconds}")))
}

pub(crate) fn timestamp_from_epoch(seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() {
        return None;
    }
    let whole = seconds.floor();
    let nanos = ((seconds - whole) * 1_000_000_000.0).round().min(999_999_999.0) as u32;
    if whole < i64::MIN as f64 || whole > i64::MAX as f64 {
        return None;
    }
    DateTime::from_timestamp(whole as i64, nanos)
}

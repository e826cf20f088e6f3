use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Telegram,
    #[serde(alias = "yandex_mail")]
    Mail,
    #[serde(alias = "yandex_forms")]
    Form,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Telegram => "telegram",
            Channel::Mail => "mail",
            Channel::Form => "form",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "telegram" => Ok(Channel::Telegram),
            "mail" | "yandex_mail" => Ok(Channel::Mail),
            "form" | "yandex_forms" => Ok(Channel::Form),
            other => Err(format!("unknown channel '{other}'")),
        }
    }
}

/// Raw message as pushed by a channel adapter. Only `channel` is required;
/// unknown fields are preserved so dead letters keep the full payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub channel: String,
    #[serde(default, deserialize_with = "string_or_number", skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, deserialize_with = "string_or_number", skip_serializing_if = "Option::is_none")]
    pub submission_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telegram_user_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl QueueMessage {
    pub fn telegram(text: impl Into<String>) -> Self {
        Self {
            channel: Channel::Telegram.as_str().to_string(),
            message: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn channel(&self) -> Option<Channel> {
        self.channel.parse().ok()
    }

    /// Identifier used for retry bookkeeping. Falls back to the sender
    /// address and finally to a hash of the payload.
    pub fn correlation_id(&self) -> String {
        if let Some(key) = self.dedup_key() {
            return key.to_string();
        }
        if let Some(email) = self.email.as_deref().filter(|email| !email.is_empty()) {
            return format!("mail:{email}");
        }

        let mut hasher = DefaultHasher::new();
        serde_json::to_string(self).unwrap_or_default().hash(&mut hasher);
        format!("anon:{:016x}", hasher.finish())
    }

    /// Explicit upstream identifier, the only key eligible for dedup guards.
    pub fn dedup_key(&self) -> Option<&str> {
        self.message_id
            .as_deref()
            .or(self.submission_id.as_deref())
            .filter(|id| !id.is_empty())
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(text)) => Some(text),
        Some(Value::Number(number)) => Some(number.to_string()),
        _ => None,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub original_message: Value,
    pub error: String,
    pub timestamp: DateTime<Utc>,
    pub retries: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_aliases_resolve() {
        assert_eq!("yandex_mail".parse::<Channel>(), Ok(Channel::Mail));
        assert_eq!("yandex_forms".parse::<Channel>(), Ok(Channel::Form));
        assert!("whatsapp".parse::<Channel>().is_err());
    }

    #[test]
    fn numeric_message_id_is_kept_as_text() {
        let message: QueueMessage =
            serde_json::from_str(r#"{"channel":"telegram","message_id":42,"message":"hi"}"#).unwrap();

        assert_eq!(message.message_id.as_deref(), Some("42"));
        assert_eq!(message.correlation_id(), "42");
        assert_eq!(message.channel(), Some(Channel::Telegram));
    }

    #[test]
    fn correlation_falls_back_to_sender_then_hash() {
        let mail: QueueMessage =
            serde_json::from_str(r#"{"channel":"mail","email":"a@b.ru","body":"x"}"#).unwrap();
        assert_eq!(mail.correlation_id(), "mail:a@b.ru");
        assert!(mail.dedup_key().is_none());

        let anonymous = QueueMessage::telegram("hello");
        let id = anonymous.correlation_id();
        assert!(id.starts_with("anon:"));
        assert_eq!(id, anonymous.clone().correlation_id());
    }

    #[test]
    fn unknown_fields_survive_round_trip() {
        let raw = r#"{"channel":"form","submission_id":"s-1","utm":"ads"}"#;
        let message: QueueMessage = serde_json::from_str(raw).unwrap();
        let value = serde_json::to_value(&message).unwrap();

        assert_eq!(value["utm"], "ads");
        assert_eq!(value["submission_id"], "s-1");
    }
}

use serde_json::Value;
use smartorder_core::{Channel, QueueMessage};

use crate::error::ParseError;

/// Customer-authored text for a message: the chat message, the mail body
/// (subject when the body is empty), or `field: value` pairs of a form.
pub fn customer_text(message: &QueueMessage) -> Result<String, ParseError> {
    let channel = message
        .channel()
        .ok_or_else(|| ParseError::UnsupportedChannel(message.channel.clone()))?;

    let text = match channel {
        Channel::Telegram => message.message.clone().unwrap_or_default(),
        Channel::Mail => non_blank(message.body.as_deref())
            .or_else(|| non_blank(message.subject.as_deref()))
            .unwrap_or_default()
            .to_string(),
        Channel::Form => message
            .data
            .iter()
            .flatten()
            .map(|(field, value)| format!("{field}: {}", plain(value)))
            .collect::<Vec<_>>()
            .join(" "),
    };

    let text = text.trim();
    if text.is_empty() {
        return Err(ParseError::EmptyMessage);
    }
    Ok(text.to_string())
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|text| !text.trim().is_empty())
}

fn plain(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

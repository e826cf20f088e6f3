use smartorder_core::CatalogError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("message has no customer text")]
    EmptyMessage,

    #[error("unsupported channel '{0}'")]
    UnsupportedChannel(String),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("language model request failed: {0}")]
    Transport(String),

    #[error("language model returned status {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("language model response is not a valid order draft: {0}")]
    MalformedResponse(String),
}

impl ParseError {
    /// The message itself is unusable, so retrying it cannot succeed.
    pub fn is_malformed_input(&self) -> bool {
        matches!(self, ParseError::EmptyMessage | ParseError::UnsupportedChannel(_))
    }
}

impl From<reqwest::Error> for ParseError {
    fn from(err: reqwest::Error) -> Self {
        ParseError::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_message_defects_are_malformed_input() {
        assert!(ParseError::EmptyMessage.is_malformed_input());
        assert!(ParseError::UnsupportedChannel("whatsapp".to_string()).is_malformed_input());
        assert!(!ParseError::Transport("timeout".to_string()).is_malformed_input());
        assert!(!ParseError::Catalog(CatalogError::Empty).is_malformed_input());
    }
}

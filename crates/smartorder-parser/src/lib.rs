pub mod error;
pub mod fallback;
pub mod llm;
pub mod pipeline;
pub mod prompt;
pub mod response;
pub mod text;
pub mod validate;

pub use error::ParseError;
pub use fallback::{extract_address, extract_phone, fallback_parse};
pub use llm::{LanguageModel, LanguageModelConfig, OpenAiChatClient, SYSTEM_INSTRUCTION};
pub use pipeline::OrderParser;
pub use prompt::{build_prompt, format_catalog};
pub use response::parse_draft;
pub use text::customer_text;
pub use validate::{KnownCustomer, is_address_complete, validate_draft};

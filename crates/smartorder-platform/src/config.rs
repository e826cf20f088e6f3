use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use smartorder_parser::llm::LanguageModelConfig;
use smartorder_parser::pipeline::DEFAULT_PROMPT_LIMIT;
use smartorder_triggers::InvoiceEndpointConfig;

#[derive(Clone, Debug)]
pub struct QueueConfig {
    pub queue_key: String,
    pub dead_letter_key: String,
    pub max_retries: u32,
    pub concurrency: usize,
}

#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub database_url: String,
    pub redis_url: String,
    pub health_addr: String,
    pub queue: QueueConfig,
    /// `None` when no API key is configured; parsing then relies on the
    /// deterministic fallback alone.
    pub language_model: Option<LanguageModelConfig>,
    pub invoicing: InvoiceEndpointConfig,
    pub catalog_prompt_limit: usize,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let database_url = var("DATABASE_URL").context("DATABASE_URL is required")?;
        let redis_url = var("REDIS_URL").context("REDIS_URL is required")?;
        let health_addr = var("HEALTH_ADDR").unwrap_or_else(|| "0.0.0.0:8027".to_string());

        let queue = QueueConfig {
            queue_key: var("REDIS_QUEUE_KEY").unwrap_or_else(|| "orders:queue".to_string()),
            dead_letter_key: var("REDIS_DEAD_LETTER_QUEUE_KEY").unwrap_or_else(|| "orders:dead_letter".to_string()),
            max_retries: parsed(&var, "QUEUE_MAX_RETRIES", 3)?,
            concurrency: parsed::<usize>(&var, "WORKER_CONCURRENCY", 5)?.max(1),
        };

        let model_defaults = LanguageModelConfig::default();
        let language_model = var("OPENAI_API_KEY").map(|api_key| LanguageModelConfig {
            api_key,
            model: var("OPENAI_MODEL").unwrap_or(model_defaults.model.clone()),
            base_url: var("OPENAI_BASE_URL").unwrap_or(model_defaults.base_url.clone()),
            timeout: model_defaults.timeout,
        });

        let invoice_defaults = InvoiceEndpointConfig::default();
        let invoicing = InvoiceEndpointConfig {
            base_url: var("ONEC_BASE_URL").unwrap_or_default(),
            username: var("ONEC_USERNAME").unwrap_or_default(),
            password: var("ONEC_PASSWORD").unwrap_or_default(),
            invoices_endpoint: var("ONEC_INVOICES_ENDPOINT").unwrap_or(invoice_defaults.invoices_endpoint),
            timeout: Duration::from_secs(parsed(&var, "ONEC_TIMEOUT_SECS", invoice_defaults.timeout.as_secs())?),
        };

        Ok(Self {
            database_url,
            redis_url,
            health_addr,
            queue,
            language_model,
            invoicing,
            catalog_prompt_limit: parsed(&var, "CATALOG_PROMPT_LIMIT", DEFAULT_PROMPT_LIMIT)?,
        })
    }
}

fn parsed<T>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} must be a number, got '{raw}'")),
        None => Ok(default),
    }
}

use std::sync::Arc;

use smartorder_catalog::CatalogCache;
use smartorder_core::{
    BreakerConfig, CatalogProduct, CircuitBreaker, CircuitError, DraftSource, OrderResult, ParsedOrderDraft,
    QueueMessage, RetryPolicy,
};
use tracing::{info, warn};

use crate::error::ParseError;
use crate::fallback::fallback_parse;
use crate::llm::{LanguageModel, SYSTEM_INSTRUCTION};
use crate::prompt::{build_prompt, format_catalog};
use crate::response::parse_draft;
use crate::text::customer_text;
use crate::validate::{KnownCustomer, validate_draft};

pub const DEFAULT_PROMPT_LIMIT: usize = 100;

/// Turns a raw channel message into a validated order draft. The language
/// model is tried first; any failure there falls back to deterministic
/// matching, so only an unusable message or catalog is an error.
pub struct OrderParser {
    catalog: Arc<CatalogCache>,
    model: Option<Arc<dyn LanguageModel>>,
    retry: RetryPolicy,
    breaker: Arc<CircuitBreaker>,
    prompt_limit: usize,
}

impl OrderParser {
    pub fn new(catalog: Arc<CatalogCache>, model: Option<Arc<dyn LanguageModel>>) -> Self {
        Self {
            catalog,
            model,
            retry: RetryPolicy::language_model(),
            breaker: Arc::new(CircuitBreaker::new("language_model", BreakerConfig::language_model())),
            prompt_limit: DEFAULT_PROMPT_LIMIT,
        }
    }

    pub fn with_prompt_limit(mut self, prompt_limit: usize) -> Self {
        self.prompt_limit = prompt_limit.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = breaker;
        self
    }

    pub async fn parse(&self, message: &QueueMessage) -> Result<OrderResult, ParseError> {
        let text = customer_text(message)?;
        let catalog = self.catalog.get_catalog(false).await?;
        let known = KnownCustomer {
            name: message.customer_name.clone().filter(|name| !name.trim().is_empty()),
            phone: message.phone.clone().filter(|phone| !phone.trim().is_empty()),
        };

        let (draft, source) = match self.ask_model(&text, &catalog, &known).await {
            Some(draft) => (draft, DraftSource::LanguageModel),
            None => (fallback_parse(&text, &catalog), DraftSource::Fallback),
        };

        let result = validate_draft(&draft, &catalog, &known, source);
        info!(
            channel = %message.channel,
            status = ?result.status,
            source = ?result.source,
            products = result.products.len(),
            missing = ?result.missing_data,
            "order message parsed"
        );
        Ok(result)
    }

    async fn ask_model(
        &self,
        text: &str,
        catalog: &[CatalogProduct],
        known: &KnownCustomer,
    ) -> Option<ParsedOrderDraft> {
        let model = self.model.as_ref()?;
        let prompt = build_prompt(&format_catalog(catalog, self.prompt_limit), text, known);

        let attempt = self
            .breaker
            .call(|| self.retry.run(|_| model.complete(SYSTEM_INSTRUCTION, &prompt), |_| true))
            .await;
        let response = match attempt {
            Ok(response) => response,
            Err(CircuitError::Open { retry_in, .. }) => {
                warn!(retry_in_secs = retry_in.as_secs(), "language model circuit open, using fallback parser");
                return None;
            }
            Err(CircuitError::Failed(err)) => {
                warn!(error = %err, "language model unavailable, using fallback parser");
                return None;
            }
        };

        match parse_draft(&response) {
            Ok(draft) => Some(draft),
            Err(err) => {
                warn!(error = %err, "language model response rejected, using fallback parser");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use smartorder_core::{CatalogSource, ResultStatus};
    use smartorder_store::InMemoryCatalogSource;
    use tokio::sync::Mutex;
    use tokio::time::Instant;

    use super::*;

    struct ScriptedModel {
        replies: Mutex<VecDeque<Result<String, ParseError>>>,
        calls: AtomicU32,
    }

    impl ScriptedModel {
        fn new(replies: Vec<Result<String, ParseError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn complete(&self, system: &str, _prompt: &str) -> Result<String, ParseError> {
            assert_eq!(system, SYSTEM_INSTRUCTION);
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.replies
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| Err(ParseError::Transport("no scripted reply".to_string())))
        }
    }

    fn catalog() -> Vec<CatalogProduct> {
        [
            ("ФР-00000001", "Варочная панель Bosch PKE611BB2E", 5),
            ("ФР-00000002", "Духовой шкаф Electrolux EOF5C50BX", 2),
            ("ФР-00000003", "Посудомоечная машина Siemens SN23HI60AR", 0),
            ("ФР-00000004", "Холодильник Samsung RB37A5200SA", 1),
        ]
        .into_iter()
        .map(|(articul, name, stock)| CatalogProduct {
            articul: articul.to_string(),
            name: name.to_string(),
            price: Decimal::from(120_000),
            stock,
        })
        .collect()
    }

    fn parser(model: Option<Arc<dyn LanguageModel>>) -> OrderParser {
        let source: Arc<dyn CatalogSource> = Arc::new(InMemoryCatalogSource::new(catalog()));
        OrderParser::new(Arc::new(CatalogCache::new(source)), model)
    }

    fn telegram(text: &str) -> QueueMessage {
        let mut message = QueueMessage::telegram(text);
        message.customer_name = Some("Иван Петров".to_string());
        message
    }

    #[tokio::test]
    async fn fallback_handles_hob_request() {
        let result = parser(None)
            .parse(&telegram("Хочу 2 варочные панели по 120 тысяч"))
            .await
            .unwrap();

        assert_eq!(result.source, DraftSource::Fallback);
        assert_eq!(result.products.len(), 1);
        assert_eq!(result.products[0].quantity, 2);
        assert!(result.products[0].available);
        assert_eq!(result.status, ResultStatus::NeedsClarification);
        assert_eq!(
            result.clarification_questions,
            vec![
                "Укажите, пожалуйста, ваш номер телефона",
                "Укажите полный адрес доставки (город, улица, дом, квартира)",
            ]
        );
    }

    #[tokio::test]
    async fn model_draft_is_validated() {
        let reply = r#"Готово: {"products":[{"articul":"ФР-00000001","name":"Варочная панель Bosch PKE611BB2E","quantity":2,"price_mentioned":120000}],
            "customer":{"name":null,"phone":null,"address":null},"missing_data":["name","phone","address"],"unfound_products":[]}"#;
        let model = ScriptedModel::new(vec![Ok(reply.to_string())]);

        let result = parser(Some(model.clone() as Arc<dyn LanguageModel>)).parse(&telegram("Хочу 2 варочные панели по 120 тысяч")).await.unwrap();

        assert_eq!(result.source, DraftSource::LanguageModel);
        assert_eq!(result.products[0].quantity, 2);
        assert_eq!(result.missing_data, vec!["phone", "address"]);
        assert_eq!(result.clarification_questions.len(), 2);
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn model_outage_retries_then_falls_back() {
        let model = ScriptedModel::new(Vec::new());
        let started = Instant::now();

        let result = parser(Some(model.clone() as Arc<dyn LanguageModel>))
            .parse(&telegram("холодильник 1 шт, телефон +79991234567, адрес: Москва, ул. Тверская, д. 1"))
            .await
            .unwrap();

        assert_eq!(model.calls.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(3));
        assert_eq!(result.source, DraftSource::Fallback);
        assert_eq!(result.status, ResultStatus::Validated);
        assert_eq!(result.customer.phone.as_deref(), Some("+79991234567"));
    }

    #[tokio::test(start_paused = true)]
    async fn open_circuit_skips_the_model() {
        let model = ScriptedModel::new(Vec::new());
        let breaker = Arc::new(CircuitBreaker::new(
            "language_model",
            BreakerConfig {
                failure_threshold: 1,
                recovery_timeout: Duration::from_secs(60),
            },
        ));
        let parser = parser(Some(model.clone() as Arc<dyn LanguageModel>)).with_breaker(breaker.clone());

        parser.parse(&telegram("духовой шкаф")).await.unwrap();
        let started = Instant::now();
        let result = parser.parse(&telegram("духовой шкаф")).await.unwrap();

        assert_eq!(model.calls.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(breaker.state(), smartorder_core::CircuitState::Open);
        assert_eq!(result.source, DraftSource::Fallback);
        assert_eq!(result.products[0].articul, "ФР-00000002");
    }

    #[tokio::test]
    async fn malformed_reply_falls_back_without_retry() {
        let model = ScriptedModel::new(vec![Ok("извините, не понял".to_string())]);

        let result = parser(Some(model.clone() as Arc<dyn LanguageModel>)).parse(&telegram("духовой шкаф")).await.unwrap();

        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.source, DraftSource::Fallback);
        assert_eq!(result.products[0].articul, "ФР-00000002");
    }

    #[tokio::test]
    async fn empty_catalog_fails_the_message() {
        let source: Arc<dyn CatalogSource> = Arc::new(InMemoryCatalogSource::new(Vec::new()));
        let parser = OrderParser::new(Arc::new(CatalogCache::new(source)), None);

        let err = parser.parse(&telegram("духовой шкаф")).await.unwrap_err();

        assert!(matches!(err, ParseError::Catalog(_)));
    }
}

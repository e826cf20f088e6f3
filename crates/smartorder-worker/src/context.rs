use std::sync::Arc;

use anyhow::{Context, Result};
use smartorder_catalog::CatalogCache;
use smartorder_core::{CatalogSource, OrderRepository};
use smartorder_orders::{CityRateTable, OrderService};
use smartorder_parser::{LanguageModel, OpenAiChatClient, OrderParser};
use smartorder_platform::ServiceConfig;
use smartorder_triggers::{InvoiceExporter, OneCInvoiceClient, PaymentProcessor, TrackingGenerator};
use tracing::warn;

use crate::processor::OrderProcessor;

/// Services built once at startup and shared by the workers and any
/// caller of the order triggers.
#[derive(Clone)]
pub struct AppContext {
    pub catalog: Arc<CatalogCache>,
    pub orders: Arc<OrderService>,
    pub parser: Arc<OrderParser>,
    pub invoices: Arc<InvoiceExporter>,
    pub tracking: Arc<TrackingGenerator>,
    pub payments: Arc<PaymentProcessor>,
}

impl AppContext {
    pub fn new(
        config: &ServiceConfig,
        repository: Arc<dyn OrderRepository>,
        catalog_source: Arc<dyn CatalogSource>,
    ) -> Result<Self> {
        let catalog = Arc::new(CatalogCache::new(catalog_source));

        let model: Option<Arc<dyn LanguageModel>> = match &config.language_model {
            Some(model_config) => Some(Arc::new(
                OpenAiChatClient::new(model_config.clone()).context("failed to build language model client")?,
            )),
            None => {
                warn!("OPENAI_API_KEY is not set, orders will be parsed by the fallback parser only");
                None
            }
        };
        let parser = Arc::new(OrderParser::new(catalog.clone(), model).with_prompt_limit(config.catalog_prompt_limit));

        let orders = Arc::new(OrderService::new(repository).with_delivery(Arc::new(CityRateTable::default())));

        let sink = OneCInvoiceClient::new(config.invoicing.clone()).context("failed to build invoicing client")?;
        let invoices = Arc::new(InvoiceExporter::new(orders.clone(), Arc::new(sink)));
        let tracking = Arc::new(TrackingGenerator::new(orders.clone()));
        let payments = Arc::new(
            PaymentProcessor::new(orders.clone())
                .with_exporter(invoices.clone())
                .with_tracking(tracking.clone()),
        );

        Ok(Self {
            catalog,
            orders,
            parser,
            invoices,
            tracking,
            payments,
        })
    }

    pub fn processor(&self) -> OrderProcessor {
        OrderProcessor::new(self.parser.clone(), self.orders.clone())
    }
}

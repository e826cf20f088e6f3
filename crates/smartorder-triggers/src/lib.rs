//! Actions that run on an existing order: payment capture, invoice export
//! to the accounting system and shipment tracking.

pub mod error;
pub mod invoice;
pub mod payment;
pub mod tracking;

pub use error::{SubmitError, TriggerError};
pub use invoice::{
    ExportOutcome, InvoiceCustomer, InvoiceEndpointConfig, InvoiceExporter, InvoiceLine, InvoicePayload,
    InvoiceSink, OneCInvoiceClient,
};
pub use payment::{CardDetails, PaymentProcessor, PaymentReceipt, validate_card};
pub use tracking::{TrackingGenerator, TrackingOutcome};

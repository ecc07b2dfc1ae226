pub mod delivery;
pub mod receipts;

pub use delivery::{
    DeliveryItemError, DeliveryOutcome, DeliveryOutcomeStatus, DeliverySummary, DeliveryWorker,
};
pub use receipts::{IngestOutcome, ReceiptIngestor};

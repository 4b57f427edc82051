pub mod confrontation;
pub use confrontation::{ConfrontationService, TreatmentOutcome};
pub mod ingestion;
pub use ingestion::{ParsedSheet, SpreadsheetIngestion, StockMapBuilder};
pub mod orchestrator;
pub use orchestrator::{
    BatchOrchestrator, BulkSummary, CommandOutcome, Outcome, PurchaseRequest, ReceiveRequest,
};
pub mod reconciliation;
pub use reconciliation::ReconcileAction;

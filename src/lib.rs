// src/lib.rs
//
// Núcleo de conciliação de quantidades do fluxo de suprimentos:
// lista de materiais → análise de estoque → compra → recebimento →
// empenho → confrontação da lista final → separação para produção.
//
// Não há superfície HTTP: a interface é a própria fronteira de chamada
// dos serviços (a UI e o banco de documentos são colaboradores externos).

pub mod common;
pub mod config;
pub mod db;
pub mod models;
pub mod services;

pub use common::error::AppError;
pub use db::materials_repo::{ItemFilter, ItemPatch, ItemUpdate, MaterialsRepository};
pub use db::memory_repo::InMemoryMaterialsRepository;
pub use db::pg_repo::PgMaterialsRepository;
pub use models::confrontation::{ConfrontationRow, FinalListEntry, Scenario, SuggestedAction};
pub use models::item::{
    EarmarkSource, HistoryEntry, HistoryKind, ItemRecord, ItemStatus, QuantityLedger, Stage,
    TOLERANCE,
};
pub use models::stock::StockMap;
pub use services::confrontation::{ConfrontationService, TreatmentOutcome};
pub use services::ingestion::{ParsedSheet, SpreadsheetIngestion, StockMapBuilder};
pub use services::orchestrator::{
    BatchOrchestrator, BulkSummary, CommandOutcome, Outcome, PurchaseRequest, ReceiveRequest,
};
pub use services::reconciliation::ReconcileAction;

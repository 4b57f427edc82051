pub mod confrontation;
pub mod item;
pub mod stock;

pub use confrontation::{ConfrontationRow, FinalListEntry, Scenario, SuggestedAction};
pub use item::{
    EarmarkSource, HistoryEntry, HistoryKind, ItemRecord, ItemStatus, QuantityLedger, Stage,
    TOLERANCE,
};
pub use stock::StockMap;

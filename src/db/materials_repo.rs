// src/db/materials_repo.rs
//
// Contrato do repositório de materiais. O registro é propriedade exclusiva
// do repositório: o motor recebe snapshots e devolve snapshots; quem grava
// é sempre o repositório, via patch de mesclagem (nunca substituição) e
// append atômico de histórico (nunca read-modify-write do array inteiro).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::{
    common::error::AppError,
    models::item::{HistoryEntry, ItemRecord, ItemStatus, QuantityLedger, Stage},
};

/// Filtro das consultas; campos ausentes não restringem.
#[derive(Debug, Clone, Default)]
pub struct ItemFilter {
    pub order_id: Option<String>,
    pub material_list_name: Option<String>,
    pub status: Option<ItemStatus>,
    pub code: Option<String>,
}

/// Patch de mesclagem: só os campos presentes são gravados, o resto do
/// documento é preservado. O motor sempre envia o conjunto derivado
/// completo (status, cache de completude) junto da razão, para que um
/// cache velho nunca sobreviva a uma mutação.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_quantity_final: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ledger: Option<QuantityLedger>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ItemStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis_final_realizada: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hidden_from_analysis: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ItemPatch {
    /// Patch completo de um snapshot pós-ação do motor.
    pub fn from_record(next: &ItemRecord) -> Self {
        Self {
            required_quantity_final: next.required_quantity_final,
            ledger: Some(next.ledger.clone()),
            stage: Some(next.stage),
            status: Some(next.status),
            analysis_final_realizada: Some(next.analysis_final_realizada),
            hidden_from_analysis: Some(next.hidden_from_analysis),
            updated_at: Some(next.updated_at),
        }
    }
}

/// Uma unidade de um lote atômico: patch + eventos novos de histórico,
/// condicionados à versão em que o snapshot foi lido (lock otimista).
#[derive(Debug, Clone)]
pub struct ItemUpdate {
    pub id: Uuid,
    pub expected_version: i64,
    pub patch: ItemPatch,
    pub new_history: Vec<HistoryEntry>,
}

#[async_trait]
pub trait MaterialsRepository: Send + Sync {
    async fn query_items(&self, filter: &ItemFilter) -> Result<Vec<ItemRecord>, AppError>;

    async fn get_item(&self, id: Uuid) -> Result<ItemRecord, AppError>;

    async fn create_item(&self, record: &ItemRecord) -> Result<(), AppError>;

    /// Mesclagem: campos não informados são preservados.
    async fn update_item(&self, id: Uuid, patch: &ItemPatch) -> Result<(), AppError>;

    /// Atômico entre todos os ids listados: ou tudo grava, ou nada.
    /// Conflito de versão em qualquer id aborta o lote inteiro com
    /// `PersistenceFailure` e nada fica durável.
    async fn batch_update(&self, updates: &[ItemUpdate]) -> Result<(), AppError>;

    /// Append atômico de uma entrada de histórico.
    async fn append_history(&self, id: Uuid, entry: &HistoryEntry) -> Result<(), AppError>;
}

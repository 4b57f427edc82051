// src/db/memory_repo.rs

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    common::error::AppError,
    db::materials_repo::{ItemFilter, ItemPatch, ItemUpdate, MaterialsRepository},
    models::item::{HistoryEntry, ItemRecord},
};

/// Implementação em memória do contrato, com a mesma semântica da
/// implementação Postgres (mesclagem, lote tudo-ou-nada, checagem de
/// versão). Usada pelos testes e por sessões de conferência avulsas.
#[derive(Debug, Default)]
pub struct InMemoryMaterialsRepository {
    items: RwLock<HashMap<Uuid, ItemRecord>>,
}

impl InMemoryMaterialsRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn apply_patch(record: &mut ItemRecord, patch: &ItemPatch) {
        if let Some(v) = patch.required_quantity_final {
            record.required_quantity_final = Some(v);
        }
        if let Some(ledger) = &patch.ledger {
            record.ledger = ledger.clone();
        }
        if let Some(stage) = patch.stage {
            record.stage = stage;
        }
        if let Some(status) = patch.status {
            record.status = status;
        }
        if let Some(flag) = patch.analysis_final_realizada {
            record.analysis_final_realizada = flag;
        }
        if let Some(flag) = patch.hidden_from_analysis {
            record.hidden_from_analysis = flag;
        }
        if let Some(ts) = patch.updated_at {
            record.updated_at = ts;
        }
    }
}

#[async_trait]
impl MaterialsRepository for InMemoryMaterialsRepository {
    async fn query_items(&self, filter: &ItemFilter) -> Result<Vec<ItemRecord>, AppError> {
        let items = self.items.read().await;
        let mut found: Vec<ItemRecord> = items
            .values()
            .filter(|r| {
                filter
                    .order_id
                    .as_ref()
                    .is_none_or(|v| r.order_id.as_deref() == Some(v.as_str()))
                    && filter
                        .material_list_name
                        .as_ref()
                        .is_none_or(|v| r.material_list_name.as_deref() == Some(v.as_str()))
                    && filter.status.is_none_or(|v| r.status == v)
                    && filter
                        .code
                        .as_ref()
                        .is_none_or(|v| r.code.eq_ignore_ascii_case(v))
            })
            .cloned()
            .collect();
        found.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(found)
    }

    async fn get_item(&self, id: Uuid) -> Result<ItemRecord, AppError> {
        self.items
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(AppError::NotFound)
    }

    async fn create_item(&self, record: &ItemRecord) -> Result<(), AppError> {
        let mut items = self.items.write().await;
        if items.contains_key(&record.id) {
            return Err(AppError::PersistenceFailure(format!(
                "Item {} já existe",
                record.id
            )));
        }
        items.insert(record.id, record.clone());
        Ok(())
    }

    async fn update_item(&self, id: Uuid, patch: &ItemPatch) -> Result<(), AppError> {
        let mut items = self.items.write().await;
        let record = items.get_mut(&id).ok_or(AppError::NotFound)?;
        Self::apply_patch(record, patch);
        record.version += 1;
        Ok(())
    }

    async fn batch_update(&self, updates: &[ItemUpdate]) -> Result<(), AppError> {
        let mut items = self.items.write().await;
        // Primeiro valida tudo (existência + versão), só depois aplica:
        // o lote é tudo-ou-nada.
        for update in updates {
            let record = items.get(&update.id).ok_or(AppError::NotFound)?;
            if record.version != update.expected_version {
                return Err(AppError::PersistenceFailure(format!(
                    "Conflito de versão no item {} (esperada {}, atual {})",
                    update.id, update.expected_version, record.version
                )));
            }
        }
        for update in updates {
            if let Some(record) = items.get_mut(&update.id) {
                Self::apply_patch(record, &update.patch);
                record.history.extend(update.new_history.iter().cloned());
                record.version += 1;
            }
        }
        Ok(())
    }

    async fn append_history(&self, id: Uuid, entry: &HistoryEntry) -> Result<(), AppError> {
        let mut items = self.items.write().await;
        let record = items.get_mut(&id).ok_or(AppError::NotFound)?;
        record.history.push(entry.clone());
        record.version += 1;
        Ok(())
    }
}

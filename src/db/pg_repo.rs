// src/db/pg_repo.rs
//
// Implementação Postgres do repositório: documento JSONB por item, como o
// banco de documentos do sistema de origem. A mesclagem usa `doc || patch`
// e o histórico é appendado com jsonb_set + concatenação de arrays, ambos
// atômicos no servidor; um read-modify-write de snapshot velho nunca
// acontece aqui.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    common::error::AppError,
    db::materials_repo::{ItemFilter, ItemPatch, ItemUpdate, MaterialsRepository},
    models::item::{normalize_code, HistoryEntry, ItemRecord, ItemStatus},
};

#[derive(Clone)]
pub struct PgMaterialsRepository {
    pool: PgPool,
}

impl PgMaterialsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Cria a tabela de documentos se ainda não existir.
    pub async fn ensure_schema(&self) -> Result<(), AppError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS material_items (
                id      UUID PRIMARY KEY,
                version BIGINT NOT NULL DEFAULT 0,
                doc     JSONB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_material_items_code ON material_items ((doc->>'code'))",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn decode(id: Uuid, version: i64, doc: serde_json::Value) -> Result<ItemRecord, AppError> {
        let mut record: ItemRecord = serde_json::from_value(doc)
            .map_err(|e| AppError::PersistenceFailure(format!("Documento {id} inválido: {e}")))?;
        record.version = version;
        Ok(record)
    }

    // O status é gravado como a string camelCase do serde; o filtro precisa
    // da mesma representação.
    fn status_str(status: ItemStatus) -> Result<String, AppError> {
        match serde_json::to_value(status) {
            Ok(serde_json::Value::String(s)) => Ok(s),
            _ => Err(AppError::InvalidInput("Status não serializável".into())),
        }
    }

    fn encode_doc(record: &ItemRecord) -> Result<serde_json::Value, AppError> {
        serde_json::to_value(record)
            .map_err(|e| AppError::PersistenceFailure(format!("Falha ao serializar item: {e}")))
    }

    fn encode_patch(patch: &ItemPatch) -> Result<serde_json::Value, AppError> {
        serde_json::to_value(patch)
            .map_err(|e| AppError::PersistenceFailure(format!("Falha ao serializar patch: {e}")))
    }

    fn encode_entries(entries: &[HistoryEntry]) -> Result<serde_json::Value, AppError> {
        serde_json::to_value(entries)
            .map_err(|e| AppError::PersistenceFailure(format!("Falha ao serializar histórico: {e}")))
    }
}

#[async_trait]
impl MaterialsRepository for PgMaterialsRepository {
    async fn query_items(&self, filter: &ItemFilter) -> Result<Vec<ItemRecord>, AppError> {
        let status = filter.status.map(Self::status_str).transpose()?;
        let code = filter.code.as_deref().map(normalize_code);

        let rows = sqlx::query_as::<_, (Uuid, i64, serde_json::Value)>(
            r#"
            SELECT id, version, doc
              FROM material_items
             WHERE ($1::text IS NULL OR doc->>'orderId' = $1)
               AND ($2::text IS NULL OR doc->>'materialListName' = $2)
               AND ($3::text IS NULL OR doc->>'status' = $3)
               AND ($4::text IS NULL OR doc->>'code' = $4)
             ORDER BY doc->>'code'
            "#,
        )
        .bind(filter.order_id.as_deref())
        .bind(filter.material_list_name.as_deref())
        .bind(status.as_deref())
        .bind(code.as_deref())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(id, version, doc)| Self::decode(id, version, doc))
            .collect()
    }

    async fn get_item(&self, id: Uuid) -> Result<ItemRecord, AppError> {
        let row = sqlx::query_as::<_, (i64, serde_json::Value)>(
            "SELECT version, doc FROM material_items WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some((version, doc)) => Self::decode(id, version, doc),
            None => Err(AppError::NotFound),
        }
    }

    async fn create_item(&self, record: &ItemRecord) -> Result<(), AppError> {
        sqlx::query("INSERT INTO material_items (id, version, doc) VALUES ($1, 0, $2)")
            .bind(record.id)
            .bind(Self::encode_doc(record)?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_item(&self, id: Uuid, patch: &ItemPatch) -> Result<(), AppError> {
        let done = sqlx::query(
            "UPDATE material_items SET doc = doc || $2, version = version + 1 WHERE id = $1",
        )
        .bind(id)
        .bind(Self::encode_patch(patch)?)
        .execute(&self.pool)
        .await?;
        if done.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }
        Ok(())
    }

    async fn batch_update(&self, updates: &[ItemUpdate]) -> Result<(), AppError> {
        if updates.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for update in updates {
            let done = sqlx::query(
                r#"
                UPDATE material_items
                   SET doc = jsonb_set(
                           doc || $3,
                           '{history}',
                           coalesce(doc->'history', '[]'::jsonb) || $4
                       ),
                       version = version + 1
                 WHERE id = $1 AND version = $2
                "#,
            )
            .bind(update.id)
            .bind(update.expected_version)
            .bind(Self::encode_patch(&update.patch)?)
            .bind(Self::encode_entries(&update.new_history)?)
            .execute(&mut *tx)
            .await?;
            if done.rows_affected() == 0 {
                // Item sumiu ou a versão andou: aborta o lote inteiro.
                tx.rollback().await.ok();
                return Err(AppError::PersistenceFailure(format!(
                    "Conflito de versão no item {} (esperada {})",
                    update.id, update.expected_version
                )));
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn append_history(&self, id: Uuid, entry: &HistoryEntry) -> Result<(), AppError> {
        let entries = Self::encode_entries(std::slice::from_ref(entry))?;
        let done = sqlx::query(
            r#"
            UPDATE material_items
               SET doc = jsonb_set(doc, '{history}', coalesce(doc->'history', '[]'::jsonb) || $2),
                   version = version + 1
             WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(entries)
        .execute(&self.pool)
        .await?;
        if done.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }
        Ok(())
    }
}

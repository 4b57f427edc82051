// src/services/orchestrator.rs
//
// Orquestra o motor de conciliação sobre conjuntos de itens: filtra os
// inaplicáveis, aplica o motor um a um, e grava os sucessos num único
// lote atômico. Se o lote falhar, nada do que foi calculado em memória
// é considerado durável: o chamador recarrega da fonte de verdade.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;
use validator::Validate;

use crate::{
    common::error::AppError,
    db::materials_repo::{ItemFilter, ItemPatch, ItemUpdate, MaterialsRepository},
    models::item::{EarmarkSource, HistoryKind, ItemRecord},
    models::stock::StockMap,
    services::reconciliation::{self, ReconcileAction},
};

// --- Resultado dos comandos vindos da UI ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Outcome {
    Success,
    Rejected,
}

/// O objeto `{outcome, reason?}` devolvido para a UI renderizar.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutcome {
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl CommandOutcome {
    pub fn success() -> Self {
        Self {
            outcome: Outcome::Success,
            reason: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Rejected,
            reason: Some(reason.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }
}

/// Resumo de um lote para a notificação da UI.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkSummary {
    pub success_count: usize,
    pub skipped_count: usize,
    /// Itens pulados por inaplicabilidade (já terminais, inexistentes).
    pub skipped_reasons: Vec<(Uuid, String)>,
    /// Rejeições de validação/regra por item.
    pub failed: Vec<(Uuid, String)>,
}

// --- Requisições em lote (validadas na borda, como os DTOs do restante) ---

#[derive(Debug, Validate)]
pub struct PurchaseRequest {
    /// Pares (item, quantidade pedida); a quantidade pode exceder o
    /// pendente — sobre-compra é decisão do operador.
    #[validate(length(min = 1, message = "Nenhum item selecionado"))]
    pub items: Vec<(Uuid, Decimal)>,
}

#[derive(Debug, Validate)]
pub struct ReceiveRequest {
    #[validate(length(min = 1, message = "Nenhum item selecionado"))]
    pub items: Vec<(Uuid, Decimal)>,
    #[validate(length(min = 1, message = "Nota fiscal obrigatória"))]
    pub invoice_ref: String,
    /// Data informada pelo operador; ausente usa o relógio.
    pub received_at: Option<DateTime<Utc>>,
}

pub struct BatchOrchestrator<R: MaterialsRepository> {
    repo: Arc<R>,
}

// Clone manual: só o Arc é clonado, o repositório em si não precisa ser Clone.
impl<R: MaterialsRepository> Clone for BatchOrchestrator<R> {
    fn clone(&self) -> Self {
        Self {
            repo: Arc::clone(&self.repo),
        }
    }
}

impl<R: MaterialsRepository> BatchOrchestrator<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }

    pub fn repository(&self) -> Arc<R> {
        Arc::clone(&self.repo)
    }

    // --- Comandos expostos para a UI ---

    pub async fn allocate(
        &self,
        item_id: Uuid,
        quantity: Decimal,
        stock: &StockMap,
    ) -> Result<CommandOutcome, AppError> {
        self.apply_one(item_id, ReconcileAction::Allocate { quantity, stock })
            .await
    }

    pub async fn request_purchase(&self, req: PurchaseRequest) -> Result<BulkSummary, AppError> {
        req.validate()?;
        let commands: Vec<_> = req
            .items
            .into_iter()
            .map(|(id, quantity)| (id, ReconcileAction::RequestPurchase { quantity }))
            .collect();
        self.apply_bulk(commands, Utc::now()).await
    }

    pub async fn earmark(
        &self,
        item_id: Uuid,
        quantity: Decimal,
        source: EarmarkSource,
    ) -> Result<CommandOutcome, AppError> {
        self.apply_one(item_id, ReconcileAction::Earmark { quantity, source })
            .await
    }

    pub async fn receive(&self, req: ReceiveRequest) -> Result<BulkSummary, AppError> {
        req.validate()?;
        let at = req.received_at.unwrap_or_else(Utc::now);
        let invoice_ref = req.invoice_ref;
        let commands: Vec<_> = req
            .items
            .into_iter()
            .map(|(id, quantity)| {
                (
                    id,
                    ReconcileAction::ReceiveShipment {
                        quantity,
                        invoice_ref: invoice_ref.clone(),
                    },
                )
            })
            .collect();
        self.apply_bulk(commands, at).await
    }

    /// Separa para produção o saldo pendente inteiro de cada item.
    pub async fn separate_for_production(&self, ids: &[Uuid]) -> Result<BulkSummary, AppError> {
        let commands: Vec<_> = ids
            .iter()
            .map(|id| {
                (
                    *id,
                    // O motor limita ao pendente da etapa.
                    ReconcileAction::SendToProduction {
                        quantity: Decimal::MAX,
                    },
                )
            })
            .collect();
        self.apply_bulk(commands, Utc::now()).await
    }

    /// Devolve ao estoque toda a sobra de empenho de cada item.
    pub async fn return_to_stock(&self, ids: &[Uuid]) -> Result<BulkSummary, AppError> {
        let commands: Vec<_> = ids
            .iter()
            .map(|id| {
                (
                    *id,
                    ReconcileAction::ReturnToStock {
                        quantity: Decimal::MAX,
                    },
                )
            })
            .collect();
        self.apply_bulk(commands, Utc::now()).await
    }

    /// Rebase direto de um item pela lista final. O fluxo normal passa
    /// pelo serviço de confrontação; este comando cobre o ajuste avulso.
    pub async fn confront_final_list(
        &self,
        item_id: Uuid,
        final_quantity: Decimal,
    ) -> Result<CommandOutcome, AppError> {
        self.apply_one(item_id, ReconcileAction::ConfrontFinalList { final_quantity })
            .await
    }

    pub async fn undo(
        &self,
        item_id: Uuid,
        kind: HistoryKind,
    ) -> Result<CommandOutcome, AppError> {
        self.apply_one(item_id, ReconcileAction::UndoLast { kind }).await
    }

    /// Fila de trabalho da separação: itens confrontados que ainda têm
    /// alguma das duas corretivas (separar, devolver) em aberto. Um item
    /// que precisa das duas não some da fila com só uma concluída.
    pub async fn production_worklist(
        &self,
        filter: &ItemFilter,
    ) -> Result<Vec<ItemRecord>, AppError> {
        let items = self.repo.query_items(filter).await?;
        Ok(items
            .into_iter()
            .filter(|r| r.analysis_final_realizada && r.has_pending_production_actions())
            .collect())
    }

    // --- Núcleo ---

    pub async fn apply_one(
        &self,
        item_id: Uuid,
        action: ReconcileAction<'_>,
    ) -> Result<CommandOutcome, AppError> {
        let record = match self.repo.get_item(item_id).await {
            Ok(record) => record,
            Err(AppError::NotFound) => {
                return Ok(CommandOutcome::rejected("Item não encontrado"));
            }
            Err(e) => return Err(e),
        };
        match reconciliation::apply(&record, &action, Utc::now()) {
            Ok(next) => {
                self.commit(vec![plan(&record, &next)]).await?;
                Ok(CommandOutcome::success())
            }
            Err(e) if e.is_rejection() => Ok(CommandOutcome::rejected(e.to_string())),
            Err(e) => Err(e),
        }
    }

    /// Aplica um comando por item e grava tudo num lote atômico único.
    /// Nunca comita parcialmente: se a persistência falhar (já com o
    /// retry único), nenhuma mutação em memória é durável.
    pub async fn apply_bulk(
        &self,
        commands: Vec<(Uuid, ReconcileAction<'_>)>,
        at: DateTime<Utc>,
    ) -> Result<BulkSummary, AppError> {
        let mut summary = BulkSummary::default();
        let mut updates = Vec::new();

        for (id, action) in &commands {
            let record = match self.repo.get_item(*id).await {
                Ok(record) => record,
                Err(AppError::NotFound) => {
                    summary.skipped_count += 1;
                    summary
                        .skipped_reasons
                        .push((*id, "Item não encontrado".into()));
                    continue;
                }
                Err(e) => return Err(e),
            };
            match reconciliation::apply(&record, action, at) {
                Ok(next) => {
                    updates.push(plan(&record, &next));
                    summary.success_count += 1;
                }
                Err(AppError::AlreadyFinalized) => {
                    summary.skipped_count += 1;
                    summary
                        .skipped_reasons
                        .push((*id, AppError::AlreadyFinalized.to_string()));
                }
                Err(e) if e.is_rejection() => {
                    summary.failed.push((*id, e.to_string()));
                }
                Err(e) => return Err(e),
            }
        }

        self.commit(updates).await?;
        tracing::info!(
            sucesso = summary.success_count,
            pulados = summary.skipped_count,
            rejeitados = summary.failed.len(),
            "Lote de conciliação aplicado"
        );
        Ok(summary)
    }

    /// Política de retry do orquestrador: no máximo UMA nova tentativa,
    /// sem backoff, e só para falha de persistência (a escrita é
    /// idempotente por id). O motor nunca faz retry.
    pub(crate) async fn commit(&self, updates: Vec<ItemUpdate>) -> Result<(), AppError> {
        if updates.is_empty() {
            return Ok(());
        }
        match self.repo.batch_update(&updates).await {
            Err(e) if e.is_retryable() => {
                tracing::warn!(erro = %e, "Falha de persistência no lote; tentando mais uma vez");
                self.repo.batch_update(&updates).await.inspect_err(|e| {
                    tracing::error!(erro = %e, "Lote de conciliação perdido; recarregue os itens");
                })
            }
            other => other,
        }
    }
}

/// Monta a unidade de gravação: patch derivado completo + só as entradas
/// novas de histórico, condicionado à versão lida.
pub(crate) fn plan(prev: &ItemRecord, next: &ItemRecord) -> ItemUpdate {
    ItemUpdate {
        id: prev.id,
        expected_version: prev.version,
        patch: ItemPatch::from_record(next),
        new_history: next.history[prev.history.len()..].to_vec(),
    }
}

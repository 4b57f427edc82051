// src/services/confrontation.rs
//
// Confrontação da lista final: junta por código o que foi empenhado com a
// lista recém-importada, classifica cada par num dos cinco cenários e
// executa (ou difere) a corretiva sugerida. A idempotência é do chamador:
// cada linha carrega sua flag `processada`; o motor aplica uma ação lógica
// por chamada e não guarda estado de rodada.

use std::collections::BTreeMap;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::{
    common::error::AppError,
    db::materials_repo::{ItemUpdate, MaterialsRepository},
    models::confrontation::{ConfrontationRow, FinalListEntry, Scenario, SuggestedAction},
    models::item::{normalize_code, ItemRecord, TOLERANCE},
    services::orchestrator::{plan, BatchOrchestrator, CommandOutcome},
    services::reconciliation::{self, ReconcileAction},
};

/// Resultado do fechamento de uma rodada de confrontação.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TreatmentOutcome {
    /// Há linhas pendentes e o operador ainda não confirmou: nada gravado.
    ConfirmationRequired { pending_count: usize },
    /// Rodada fechada; o rebase das linhas pendentes foi persistido mesmo
    /// com a corretiva diferida (a baseline nunca se perde).
    Committed {
        baselines_persisted: usize,
        pending_rows: usize,
    },
}

pub struct ConfrontationService<R: MaterialsRepository> {
    orchestrator: BatchOrchestrator<R>,
}

impl<R: MaterialsRepository> ConfrontationService<R> {
    pub fn new(orchestrator: BatchOrchestrator<R>) -> Self {
        Self { orchestrator }
    }

    /// Junção pura: cada código de E∪F aparece em exatamente uma linha.
    pub fn resolve(items: &[ItemRecord], final_list: &[FinalListEntry]) -> Vec<ConfrontationRow> {
        // BTreeMap para as linhas de cenário 4 saírem em ordem estável.
        let mut final_map: BTreeMap<String, Decimal> = BTreeMap::new();
        for entry in final_list {
            *final_map
                .entry(normalize_code(&entry.code))
                .or_insert(Decimal::ZERO) += entry.quantity.max(Decimal::ZERO);
        }

        let mut rows = Vec::with_capacity(items.len() + final_map.len());
        for item in items {
            let earmarked = item.ledger.total_earmarked();
            let final_qty = final_map.remove(&item.code).unwrap_or(Decimal::ZERO);
            let difference = earmarked - final_qty;

            let (scenario, suggested_action) = if final_qty <= TOLERANCE {
                if earmarked <= TOLERANCE {
                    (Scenario::Match, SuggestedAction::None)
                } else {
                    (Scenario::AbsentFromFinal, SuggestedAction::FullReturn(earmarked))
                }
            } else if difference > TOLERANCE {
                (Scenario::EarmarkedExcess, SuggestedAction::PartialReturn(difference))
            } else if difference < -TOLERANCE {
                (
                    Scenario::EarmarkedShortfall,
                    SuggestedAction::FinalPurchase(-difference),
                )
            } else {
                (Scenario::Match, SuggestedAction::None)
            };

            rows.push(ConfrontationRow {
                code: item.code.clone(),
                earmarked_qty: earmarked,
                final_required_qty: final_qty,
                difference,
                scenario,
                suggested_action,
                item_id: Some(item.id),
                processada: false,
            });
        }

        // Códigos da lista final sem item empenhado: cenário 4.
        for (code, quantity) in final_map {
            rows.push(ConfrontationRow {
                code,
                earmarked_qty: Decimal::ZERO,
                final_required_qty: quantity,
                difference: -quantity,
                scenario: Scenario::NewFromFinal,
                suggested_action: SuggestedAction::CreateItemAndPurchase(quantity),
                item_id: None,
                processada: false,
            });
        }
        rows
    }

    /// Executa a corretiva sugerida de UMA linha: rebase + corretiva numa
    /// única gravação atômica. Linha já processada é rejeitada aqui, não
    /// no motor.
    pub async fn execute_row(
        &self,
        row: &mut ConfrontationRow,
    ) -> Result<CommandOutcome, AppError> {
        if row.processada {
            return Ok(CommandOutcome::rejected("Linha já processada nesta rodada"));
        }

        let outcome = match row.scenario {
            Scenario::NewFromFinal => {
                let id = self.create_from_final(row, true).await?;
                row.item_id = Some(id);
                CommandOutcome::success()
            }
            _ => {
                let repo = self.orchestrator.repository();
                let id = row.item_id.ok_or(AppError::NotFound)?;
                let record = repo.get_item(id).await?;

                let mut actions = vec![ReconcileAction::ConfrontFinalList {
                    final_quantity: row.final_required_qty,
                }];
                match &row.suggested_action {
                    SuggestedAction::FullReturn(qty) | SuggestedAction::PartialReturn(qty) => {
                        actions.push(ReconcileAction::ReturnToStock { quantity: *qty });
                    }
                    SuggestedAction::FinalPurchase(qty) => {
                        actions.push(ReconcileAction::RequestPurchase { quantity: *qty });
                    }
                    SuggestedAction::None | SuggestedAction::CreateItemAndPurchase(_) => {}
                }

                match chain(&record, &actions) {
                    Ok(next) => {
                        self.orchestrator.commit(vec![plan(&record, &next)]).await?;
                        CommandOutcome::success()
                    }
                    Err(e) if e.is_rejection() => CommandOutcome::rejected(e.to_string()),
                    Err(e) => return Err(e),
                }
            }
        };

        if outcome.is_success() {
            row.processada = true;
        }
        Ok(outcome)
    }

    /// Fecha a rodada. Com linhas pendentes exige a confirmação explícita
    /// do operador; confirmado, o `requiredQuantityFinal` das pendentes é
    /// persistido mesmo sem a corretiva executada.
    pub async fn confirm_treatment(
        &self,
        rows: &[ConfrontationRow],
        operator_confirmed_pending: bool,
    ) -> Result<TreatmentOutcome, AppError> {
        let pending: Vec<&ConfrontationRow> = rows.iter().filter(|r| !r.processada).collect();
        if !pending.is_empty() && !operator_confirmed_pending {
            return Ok(TreatmentOutcome::ConfirmationRequired {
                pending_count: pending.len(),
            });
        }

        let repo = self.orchestrator.repository();
        let mut updates: Vec<ItemUpdate> = Vec::new();
        let mut baselines = 0usize;

        for row in &pending {
            match row.item_id {
                Some(id) => {
                    let record = repo.get_item(id).await?;
                    // Rebase já gravado com o mesmo valor (rodada anterior):
                    // não reaplica nada.
                    if record.analysis_final_realizada
                        && record.required_quantity_final == Some(row.final_required_qty)
                    {
                        continue;
                    }
                    let next = reconciliation::apply(
                        &record,
                        &ReconcileAction::ConfrontFinalList {
                            final_quantity: row.final_required_qty,
                        },
                        Utc::now(),
                    )?;
                    updates.push(plan(&record, &next));
                    baselines += 1;
                }
                // Cenário 4 pendente: cria o item só com a baseline,
                // a compra fica diferida.
                None => {
                    self.create_from_final(row, false).await?;
                    baselines += 1;
                }
            }
        }

        self.orchestrator.commit(updates).await?;
        tracing::info!(
            baselines,
            pendentes = pending.len(),
            "Rodada de confrontação fechada"
        );
        Ok(TreatmentOutcome::Committed {
            baselines_persisted: baselines,
            pending_rows: pending.len(),
        })
    }

    /// Cenário 4: monta o item novo em memória (demanda = lista final,
    /// rebase aplicado, compra opcional) e grava de uma vez.
    async fn create_from_final(
        &self,
        row: &ConfrontationRow,
        with_purchase: bool,
    ) -> Result<Uuid, AppError> {
        let now = Utc::now();
        let mut record = ItemRecord::new(&row.code, row.final_required_qty, now);
        record.created_by_analysis = true;

        let mut actions = vec![ReconcileAction::ConfrontFinalList {
            final_quantity: row.final_required_qty,
        }];
        if with_purchase {
            actions.push(ReconcileAction::RequestPurchase {
                quantity: row.final_required_qty,
            });
        }
        record = chain(&record, &actions)?;

        self.orchestrator.repository().create_item(&record).await?;
        Ok(record.id)
    }
}

/// Aplica uma sequência de ações sobre o mesmo snapshot, em memória;
/// qualquer rejeição aborta a cadeia sem efeito algum.
fn chain(record: &ItemRecord, actions: &[ReconcileAction<'_>]) -> Result<ItemRecord, AppError> {
    let now = Utc::now();
    let mut current = record.clone();
    for action in actions {
        current = reconciliation::apply(&current, action, now)?;
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    use crate::{
        db::memory_repo::InMemoryMaterialsRepository,
        models::item::{EarmarkSource, ItemStatus},
        models::stock::StockMap,
        services::orchestrator::Outcome,
    };

    fn dec(v: &str) -> Decimal {
        v.parse().unwrap()
    }

    fn entry(code: &str, qty: &str) -> FinalListEntry {
        FinalListEntry {
            code: code.into(),
            quantity: dec(qty),
        }
    }

    /// Item com `qty` já empenhado (fluxo alocação → empenho completo).
    fn earmarked(code: &str, qty: &str) -> ItemRecord {
        let record = ItemRecord::new(code, dec(qty), Utc::now());
        let map = StockMap::from_entries([(code.to_string(), dec(qty))]);
        let allocated = reconciliation::apply(
            &record,
            &ReconcileAction::Allocate {
                quantity: dec(qty),
                stock: &map,
            },
            Utc::now(),
        )
        .unwrap();
        reconciliation::apply(
            &allocated,
            &ReconcileAction::Earmark {
                quantity: dec(qty),
                source: EarmarkSource::Stock,
            },
            Utc::now(),
        )
        .unwrap()
    }

    async fn service_with(
        items: &[ItemRecord],
    ) -> (
        Arc<InMemoryMaterialsRepository>,
        ConfrontationService<InMemoryMaterialsRepository>,
    ) {
        let repo = Arc::new(InMemoryMaterialsRepository::new());
        for item in items {
            repo.create_item(item).await.unwrap();
        }
        let service = ConfrontationService::new(BatchOrchestrator::new(Arc::clone(&repo)));
        (repo, service)
    }

    type Svc = ConfrontationService<InMemoryMaterialsRepository>;

    // Cobertura total da união empenhados ∪ lista final, um código por linha.
    #[test]
    fn resolve_covers_every_code_exactly_once() {
        let items = vec![
            earmarked("EQ1", "5"),  // igual → 0
            earmarked("EX2", "8"),  // sobra → 2
            earmarked("SH3", "3"),  // falta → 3
            earmarked("AB4", "6"),  // ausente da final → 1
        ];
        let final_list = vec![
            entry("EQ1", "5"),
            entry("EX2", "5"),
            entry("SH3", "7"),
            entry("NV5", "9"), // sem item → 4
        ];

        let rows = Svc::resolve(&items, &final_list);
        assert_eq!(rows.len(), 5);

        let codes: HashSet<&str> = rows.iter().map(|r| r.code.as_str()).collect();
        assert_eq!(codes.len(), 5);

        let by_code = |c: &str| rows.iter().find(|r| r.code == c).unwrap();
        assert_eq!(by_code("EQ1").scenario, Scenario::Match);
        assert_eq!(by_code("EX2").scenario, Scenario::EarmarkedExcess);
        assert_eq!(by_code("SH3").scenario, Scenario::EarmarkedShortfall);
        assert_eq!(by_code("AB4").scenario, Scenario::AbsentFromFinal);
        assert_eq!(by_code("NV5").scenario, Scenario::NewFromFinal);

        assert_eq!(
            by_code("EX2").suggested_action,
            SuggestedAction::PartialReturn(dec("3"))
        );
        assert_eq!(
            by_code("SH3").suggested_action,
            SuggestedAction::FinalPurchase(dec("4"))
        );
        assert_eq!(
            by_code("AB4").suggested_action,
            SuggestedAction::FullReturn(dec("6"))
        );
    }

    #[test]
    fn explicit_zero_in_final_list_is_scenario_one() {
        let items = vec![earmarked("Z1", "4")];
        let rows = Svc::resolve(&items, &[entry("Z1", "0")]);
        assert_eq!(rows[0].scenario, Scenario::AbsentFromFinal);
        assert_eq!(rows[0].suggested_action, SuggestedAction::FullReturn(dec("4")));
    }

    #[test]
    fn duplicate_final_entries_accumulate_before_joining() {
        let items = vec![earmarked("D1", "10")];
        let rows = Svc::resolve(&items, &[entry("D1", "4"), entry("d1", "6")]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].scenario, Scenario::Match);
    }

    // Sobra de 3: o rebase persiste mesmo com a devolução adiada.
    #[tokio::test]
    async fn excess_rebases_even_when_return_is_deferred() {
        let item = earmarked("CODE1", "8");
        let (repo, service) = service_with(std::slice::from_ref(&item)).await;

        let rows = Svc::resolve(&[item.clone()], &[entry("CODE1", "5")]);
        assert_eq!(rows[0].scenario, Scenario::EarmarkedExcess);
        assert_eq!(rows[0].suggested_action, SuggestedAction::PartialReturn(dec("3")));

        // Fecha a rodada SEM executar a devolução, com confirmação.
        let outcome = service.confirm_treatment(&rows, true).await.unwrap();
        assert_eq!(
            outcome,
            TreatmentOutcome::Committed {
                baselines_persisted: 1,
                pending_rows: 1
            }
        );

        let loaded = repo.get_item(item.id).await.unwrap();
        assert_eq!(loaded.required_quantity_final, Some(dec("5")));
        assert!(loaded.analysis_final_realizada);
        // A devolução continua em aberto na fila de produção.
        assert_eq!(loaded.pending_return(), dec("3"));
    }

    #[tokio::test]
    async fn execute_row_applies_rebase_and_return_atomically() {
        let item = earmarked("CODE1", "8");
        let (repo, service) = service_with(std::slice::from_ref(&item)).await;

        let mut rows = Svc::resolve(&[item.clone()], &[entry("CODE1", "5")]);
        let outcome = service.execute_row(&mut rows[0]).await.unwrap();
        assert!(outcome.is_success());
        assert!(rows[0].processada);

        let loaded = repo.get_item(item.id).await.unwrap();
        assert_eq!(loaded.required_quantity_final, Some(dec("5")));
        assert_eq!(loaded.ledger.returned_to_stock, dec("3"));
        assert!(!loaded.has_pending_production_actions());

        // Reexecutar a mesma linha é barrado pelo chamador, não pelo motor.
        let again = service.execute_row(&mut rows[0]).await.unwrap();
        assert_eq!(again.outcome, Outcome::Rejected);
        let reloaded = repo.get_item(item.id).await.unwrap();
        assert_eq!(reloaded.ledger.returned_to_stock, dec("3"));
    }

    // Entrada da final sem item empenhado: criação com baseline e compra.
    #[tokio::test]
    async fn new_from_final_creates_item_with_purchase() {
        let (repo, service) = service_with(&[]).await;

        let mut rows = Svc::resolve(&[], &[entry("CODE9", "7")]);
        assert_eq!(rows[0].scenario, Scenario::NewFromFinal);
        assert_eq!(
            rows[0].suggested_action,
            SuggestedAction::CreateItemAndPurchase(dec("7"))
        );

        let outcome = service.execute_row(&mut rows[0]).await.unwrap();
        assert!(outcome.is_success());

        let created = repo.get_item(rows[0].item_id.unwrap()).await.unwrap();
        assert_eq!(created.code, "CODE9");
        assert!(created.created_by_analysis);
        assert_eq!(created.required_quantity_final, Some(dec("7")));
        assert_eq!(created.ledger.purchased, dec("7"));
        // Abastecido pela compra corretiva: pronto para produção.
        assert_eq!(created.status, ItemStatus::ReadyForProduction);
    }

    #[tokio::test]
    async fn deferred_new_item_awaits_supply() {
        let (repo, service) = service_with(&[]).await;
        let rows = Svc::resolve(&[], &[entry("CODE9", "7")]);

        // Fecha sem executar: item criado só com a baseline.
        service.confirm_treatment(&rows, true).await.unwrap();

        let filter = crate::db::materials_repo::ItemFilter {
            code: Some("CODE9".into()),
            ..Default::default()
        };
        let found = repo.query_items(&filter).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].ledger.purchased, Decimal::ZERO);
        assert_eq!(found[0].status, ItemStatus::AwaitingFinalConfrontation);
    }

    #[tokio::test]
    async fn pending_rows_require_explicit_confirmation() {
        let item = earmarked("CODE1", "8");
        let (repo, service) = service_with(std::slice::from_ref(&item)).await;
        let rows = Svc::resolve(&[item.clone()], &[entry("CODE1", "5")]);

        let outcome = service.confirm_treatment(&rows, false).await.unwrap();
        assert_eq!(
            outcome,
            TreatmentOutcome::ConfirmationRequired { pending_count: 1 }
        );
        // Nada foi gravado.
        let loaded = repo.get_item(item.id).await.unwrap();
        assert_eq!(loaded.required_quantity_final, None);
    }

    #[tokio::test]
    async fn reconfirming_same_baseline_does_not_reapply() {
        let item = earmarked("CODE1", "8");
        let (repo, service) = service_with(std::slice::from_ref(&item)).await;
        let rows = Svc::resolve(&[item.clone()], &[entry("CODE1", "5")]);

        service.confirm_treatment(&rows, true).await.unwrap();
        let first = repo.get_item(item.id).await.unwrap();

        // Rodada seguinte com a mesma lista: rebase idêntico não duplica nada.
        let rows2 = Svc::resolve(&[first.clone()], &[entry("CODE1", "5")]);
        let outcome = service.confirm_treatment(&rows2, true).await.unwrap();
        assert_eq!(
            outcome,
            TreatmentOutcome::Committed {
                baselines_persisted: 0,
                pending_rows: 1
            }
        );
        let second = repo.get_item(item.id).await.unwrap();
        assert_eq!(second.history.len(), first.history.len());
    }
}

// src/services/reconciliation.rs
//
// O motor de conciliação: uma máquina de estados pura, sem nenhum estado
// próprio. Recebe um snapshot do ItemRecord e uma ação proposta, valida
// contra a razão atual e devolve o próximo snapshot (ou a rejeição tipada).
// Em rejeição o registro de entrada fica intocado: nenhuma mutação parcial.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::{
    common::error::AppError,
    models::item::{
        EarmarkSource, HistoryEntry, HistoryKind, ItemRecord, ItemStatus, Stage, TOLERANCE,
    },
    models::stock::StockMap,
};

/// Ações aceitas pelo motor. O mapa de estoque entra por referência:
/// é recurso limitado da sessão, nunca estado do motor.
#[derive(Debug, Clone)]
pub enum ReconcileAction<'a> {
    Allocate {
        quantity: Decimal,
        stock: &'a StockMap,
    },
    RequestPurchase {
        quantity: Decimal,
    },
    Earmark {
        quantity: Decimal,
        source: EarmarkSource,
    },
    ReceiveShipment {
        quantity: Decimal,
        invoice_ref: String,
    },
    ConfrontFinalList {
        final_quantity: Decimal,
    },
    ReturnToStock {
        quantity: Decimal,
    },
    SendToProduction {
        quantity: Decimal,
    },
    UndoLast {
        kind: HistoryKind,
    },
}

/// Aplica uma ação a um snapshot e devolve o próximo estado.
/// Ordem de verificação: status terminal da etapa, depois quantidade,
/// depois recurso disponível. Só então a razão é mutada e o evento
/// entra no histórico (uma entrada por ação aplicada, nenhuma por rejeição).
pub fn apply(
    record: &ItemRecord,
    action: &ReconcileAction<'_>,
    now: DateTime<Utc>,
) -> Result<ItemRecord, AppError> {
    match action {
        ReconcileAction::Allocate { quantity, stock } => allocate(record, *quantity, stock, now),
        ReconcileAction::RequestPurchase { quantity } => request_purchase(record, *quantity, now),
        ReconcileAction::Earmark { quantity, source } => earmark(record, *quantity, *source, now),
        ReconcileAction::ReceiveShipment {
            quantity,
            invoice_ref,
        } => receive_shipment(record, *quantity, invoice_ref, now),
        ReconcileAction::ConfrontFinalList { final_quantity } => {
            confront_final_list(record, *final_quantity, now)
        }
        ReconcileAction::ReturnToStock { quantity } => return_to_stock(record, *quantity, now),
        ReconcileAction::SendToProduction { quantity } => send_to_production(record, *quantity, now),
        ReconcileAction::UndoLast { kind } => undo_last(record, *kind, now),
    }
}

fn ensure_not_terminal(record: &ItemRecord, stage: Stage) -> Result<(), AppError> {
    if record.status.is_terminal_for(stage) {
        return Err(AppError::AlreadyFinalized);
    }
    Ok(())
}

fn ensure_positive(quantity: Decimal) -> Result<(), AppError> {
    if quantity <= Decimal::ZERO {
        return Err(AppError::InvalidInput(format!(
            "Quantidade deve ser maior que zero (recebido: {quantity})"
        )));
    }
    Ok(())
}

fn allocate(
    record: &ItemRecord,
    quantity: Decimal,
    stock: &StockMap,
    now: DateTime<Utc>,
) -> Result<ItemRecord, AppError> {
    ensure_not_terminal(record, Stage::StockAnalysis)?;
    ensure_positive(quantity)?;

    let outstanding_before = record.outstanding(Stage::StockAnalysis);
    if outstanding_before <= TOLERANCE {
        return Err(AppError::AlreadyFinalized);
    }

    // Nunca aloca além do saldo pendente, mesmo que o operador peça mais.
    let applied = quantity.min(outstanding_before);
    let available = stock.available(&record.code);
    if available < applied {
        return Err(AppError::InsufficientStock {
            shortfall: applied - available,
        });
    }

    let mut next = record.clone();
    next.ledger.allocated_from_stock += applied;
    next.history
        .push(HistoryEntry::new(HistoryKind::Allocated, applied, now));
    finish(&mut next, now);
    Ok(next)
}

fn request_purchase(
    record: &ItemRecord,
    quantity: Decimal,
    now: DateTime<Utc>,
) -> Result<ItemRecord, AppError> {
    ensure_not_terminal(record, Stage::StockAnalysis)?;
    ensure_positive(quantity)?;

    let outstanding = record.outstanding(Stage::StockAnalysis);
    let mut entry = HistoryEntry::new(HistoryKind::Purchased, quantity, now);
    if quantity > outstanding + TOLERANCE {
        // Compra acima do pendente é decisão do operador: aviso, nunca bloqueio.
        tracing::warn!(
            code = %record.code,
            pedido = %quantity,
            pendente = %outstanding,
            "Compra solicitada acima do saldo pendente"
        );
        entry = entry.with_note(format!(
            "Quantidade comprada ({quantity}) excede o saldo pendente ({outstanding})"
        ));
    }

    let mut next = record.clone();
    next.ledger.purchased += quantity;
    next.history.push(entry);
    finish(&mut next, now);
    Ok(next)
}

fn earmark(
    record: &ItemRecord,
    quantity: Decimal,
    source: EarmarkSource,
    now: DateTime<Utc>,
) -> Result<ItemRecord, AppError> {
    ensure_not_terminal(record, Stage::Earmarking)?;
    ensure_positive(quantity)?;

    let outstanding_before = record.outstanding(Stage::Earmarking);
    if outstanding_before <= TOLERANCE {
        return Err(AppError::AlreadyFinalized);
    }

    let applied = quantity.min(outstanding_before);
    // O empenho consome de uma fonte concreta: o que já foi alocado do
    // estoque geral ou o que já foi recebido, cada um descontado do que
    // esse canal já empenhou.
    let available = match source {
        EarmarkSource::Stock => {
            record.ledger.allocated_from_stock - record.ledger.earmarked_from_stock
        }
        EarmarkSource::Received => record.ledger.received - record.ledger.earmarked_from_received,
    };
    if available < applied {
        return Err(AppError::InsufficientStock {
            shortfall: applied - available.max(Decimal::ZERO),
        });
    }

    let mut next = record.clone();
    match source {
        EarmarkSource::Stock => next.ledger.earmarked_from_stock += applied,
        EarmarkSource::Received => next.ledger.earmarked_from_received += applied,
    }
    let mut entry = HistoryEntry::new(HistoryKind::Earmarked, applied, now);
    entry.source = Some(source);
    next.history.push(entry);
    next.stage = Stage::Earmarking;
    finish(&mut next, now);
    Ok(next)
}

fn receive_shipment(
    record: &ItemRecord,
    quantity: Decimal,
    invoice_ref: &str,
    now: DateTime<Utc>,
) -> Result<ItemRecord, AppError> {
    ensure_not_terminal(record, Stage::Receiving)?;
    ensure_positive(quantity)?;
    if invoice_ref.trim().is_empty() {
        return Err(AppError::InvalidInput(
            "Nota fiscal do recebimento não informada".into(),
        ));
    }

    // `purchased` é o total pedido e nunca é decrementado: o saldo a
    // receber é sempre derivado (purchased − received). Receber a maior
    // é permitido e vira divergência explícita no status.
    let mut next = record.clone();
    next.ledger.received += quantity;
    let mut entry = HistoryEntry::new(HistoryKind::Received, quantity, now);
    entry.invoice_ref = Some(invoice_ref.trim().to_string());
    if next.ledger.receipt_overrun() > TOLERANCE {
        entry = entry.with_note(format!(
            "Recebido ({}) acima do total pedido ({})",
            next.ledger.received, next.ledger.purchased
        ));
    }
    next.history.push(entry);
    next.stage = Stage::Receiving;
    finish(&mut next, now);
    Ok(next)
}

fn confront_final_list(
    record: &ItemRecord,
    final_quantity: Decimal,
    now: DateTime<Utc>,
) -> Result<ItemRecord, AppError> {
    if record.status == ItemStatus::SeparatedForProduction {
        return Err(AppError::AlreadyFinalized);
    }
    // Zero é válido aqui: a lista final pode rebasear a demanda para nada.
    if final_quantity < Decimal::ZERO {
        return Err(AppError::InvalidInput(format!(
            "Quantidade da lista final não pode ser negativa (recebido: {final_quantity})"
        )));
    }

    let mut next = record.clone();
    next.required_quantity_final = Some(final_quantity);
    next.analysis_final_realizada = true;
    next.stage = Stage::Separation;
    next.history.push(HistoryEntry::new(
        HistoryKind::FinalConfronted,
        final_quantity,
        now,
    ));
    finish(&mut next, now);
    Ok(next)
}

fn return_to_stock(
    record: &ItemRecord,
    quantity: Decimal,
    now: DateTime<Utc>,
) -> Result<ItemRecord, AppError> {
    ensure_not_terminal(record, Stage::Separation)?;
    ensure_positive(quantity)?;
    if !record.analysis_final_realizada {
        return Err(AppError::InvalidInput(
            "Análise final ainda não realizada para este item".into(),
        ));
    }

    let pending = record.pending_return();
    if pending <= TOLERANCE {
        return Err(AppError::AlreadyFinalized);
    }

    let applied = quantity.min(pending);
    let mut next = record.clone();
    next.ledger.returned_to_stock += applied;
    next.history
        .push(HistoryEntry::new(HistoryKind::Returned, applied, now));
    finish(&mut next, now);
    Ok(next)
}

fn send_to_production(
    record: &ItemRecord,
    quantity: Decimal,
    now: DateTime<Utc>,
) -> Result<ItemRecord, AppError> {
    ensure_not_terminal(record, Stage::Separation)?;
    ensure_positive(quantity)?;
    if !record.analysis_final_realizada {
        return Err(AppError::InvalidInput(
            "Análise final ainda não realizada para este item".into(),
        ));
    }

    let outstanding = record.outstanding(Stage::Separation);
    if outstanding <= TOLERANCE {
        return Err(AppError::AlreadyFinalized);
    }

    let applied = quantity.min(outstanding);
    let mut next = record.clone();
    next.ledger.sent_to_production += applied;
    next.history
        .push(HistoryEntry::new(HistoryKind::SentToProduction, applied, now));
    finish(&mut next, now);
    Ok(next)
}

/// Reversão por entrada compensatória: a entrada original permanece no
/// histórico, a quantidade volta para o canal e um evento `Undone` marca
/// a compensação. Nada é apagado nem editado.
fn undo_last(
    record: &ItemRecord,
    kind: HistoryKind,
    now: DateTime<Utc>,
) -> Result<ItemRecord, AppError> {
    if matches!(
        kind,
        HistoryKind::Created | HistoryKind::FinalConfronted | HistoryKind::Undone
    ) {
        return Err(AppError::InvalidInput(format!(
            "Evento {kind:?} não é reversível"
        )));
    }

    // Entradas já compensadas são puladas: cada `Undone` consome a
    // entrada correspondente mais recente do mesmo tipo.
    let mut compensated = 0usize;
    let mut target: Option<&HistoryEntry> = None;
    for entry in record.history.iter().rev() {
        if entry.kind == HistoryKind::Undone && entry.undone_kind == Some(kind) {
            compensated += 1;
            continue;
        }
        if entry.kind == kind {
            if compensated > 0 {
                compensated -= 1;
                continue;
            }
            target = Some(entry);
            break;
        }
    }
    let target = target.ok_or_else(|| {
        AppError::InvalidInput(format!("Nenhuma ação {kind:?} para desfazer"))
    })?;

    let mut next = record.clone();
    let qty = target.quantity;
    match kind {
        HistoryKind::Allocated => next.ledger.allocated_from_stock -= qty,
        HistoryKind::Purchased => next.ledger.purchased -= qty,
        HistoryKind::Received => next.ledger.received -= qty,
        HistoryKind::Earmarked => match target.source {
            Some(EarmarkSource::Received) => next.ledger.earmarked_from_received -= qty,
            _ => next.ledger.earmarked_from_stock -= qty,
        },
        HistoryKind::Returned => next.ledger.returned_to_stock -= qty,
        HistoryKind::SentToProduction => next.ledger.sent_to_production -= qty,
        HistoryKind::Created | HistoryKind::FinalConfronted | HistoryKind::Undone => {
            unreachable!("tipos não reversíveis rejeitados acima")
        }
    }

    let mut entry = HistoryEntry::new(HistoryKind::Undone, qty, now);
    entry.undone_kind = Some(kind);
    entry.source = target.source;
    next.history.push(entry);
    finish(&mut next, now);
    Ok(next)
}

/// Fecho comum de toda ação aplicada: status e cache de completude são
/// sempre recalculados da razão, nunca editados à mão.
fn finish(next: &mut ItemRecord, now: DateTime<Utc>) {
    next.recompute_status();
    next.updated_at = now;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::stock::StockMap;

    fn dec(v: &str) -> Decimal {
        v.parse().unwrap()
    }

    fn item(code: &str, required: &str) -> ItemRecord {
        ItemRecord::new(code, dec(required), Utc::now())
    }

    fn stock(entries: &[(&str, &str)]) -> StockMap {
        StockMap::from_entries(
            entries
                .iter()
                .map(|(c, q)| (c.to_string(), dec(q))),
        )
    }

    fn apply_ok(record: &ItemRecord, action: ReconcileAction<'_>) -> ItemRecord {
        apply(record, &action, Utc::now()).unwrap()
    }

    // Fluxo feliz: estoque parcial + compra do restante fecham a análise.
    #[test]
    fn allocate_full_coverage_goes_in_stock() {
        let record = item("CODE1", "10");
        let map = stock(&[("CODE1", "10")]);

        let next = apply_ok(
            &record,
            ReconcileAction::Allocate {
                quantity: dec("10"),
                stock: &map,
            },
        );
        assert_eq!(next.ledger.allocated_from_stock, dec("10"));
        assert_eq!(next.status, ItemStatus::InStock);
        assert!(next.hidden_from_analysis);
    }

    // Estoque insuficiente: rejeição com o déficit calculado, depois alocação parcial.
    #[test]
    fn allocate_insufficient_stock_reports_shortfall() {
        let record = item("CODE1", "10");
        let map = stock(&[("CODE1", "4")]);

        let err = apply(
            &record,
            &ReconcileAction::Allocate {
                quantity: dec("10"),
                stock: &map,
            },
            Utc::now(),
        )
        .unwrap_err();
        match err {
            AppError::InsufficientStock { shortfall } => assert_eq!(shortfall, dec("6")),
            other => panic!("esperava InsufficientStock, veio {other:?}"),
        }

        let next = apply_ok(
            &record,
            ReconcileAction::Allocate {
                quantity: dec("4"),
                stock: &map,
            },
        );
        assert_eq!(next.status, ItemStatus::PartiallyProcessed);
        assert_eq!(next.outstanding(Stage::StockAnalysis), dec("6"));
    }

    // Item terminado na etapa rejeita qualquer nova ação da etapa.
    #[test]
    fn terminal_item_rejects_further_actions_unchanged() {
        let record = item("CODE1", "10");
        let map = stock(&[("CODE1", "10")]);
        let done = apply_ok(
            &record,
            ReconcileAction::Allocate {
                quantity: dec("10"),
                stock: &map,
            },
        );
        assert_eq!(done.status, ItemStatus::InStock);

        for action in [
            ReconcileAction::Allocate {
                quantity: dec("1"),
                stock: &map,
            },
            ReconcileAction::RequestPurchase { quantity: dec("1") },
        ] {
            let err = apply(&done, &action, Utc::now()).unwrap_err();
            assert!(matches!(err, AppError::AlreadyFinalized));
        }
        // A rejeição não toca a razão nem o histórico.
        assert_eq!(done.ledger.allocated_from_stock, dec("10"));
        assert_eq!(done.history.len(), 2); // Created + Allocated
    }

    // O incremento nunca passa de min(pedido, pendente, disponível).
    #[test]
    fn allocate_clamps_to_outstanding() {
        let mut record = item("CODE1", "10");
        record.ledger.allocated_from_stock = dec("7");
        record.recompute_status();
        let map = stock(&[("CODE1", "50")]);

        let next = apply_ok(
            &record,
            ReconcileAction::Allocate {
                quantity: dec("30"),
                stock: &map,
            },
        );
        assert_eq!(next.ledger.allocated_from_stock, dec("10"));
        assert_eq!(next.status, ItemStatus::InStock);
    }

    #[test]
    fn non_positive_quantity_is_rejected_before_any_mutation() {
        let record = item("CODE1", "10");
        let map = stock(&[("CODE1", "10")]);
        for qty in ["0", "-3"] {
            let err = apply(
                &record,
                &ReconcileAction::Allocate {
                    quantity: dec(qty),
                    stock: &map,
                },
                Utc::now(),
            )
            .unwrap_err();
            assert!(matches!(err, AppError::InvalidInput(_)));
        }
        assert_eq!(record.history.len(), 1);
    }

    #[test]
    fn over_purchase_is_allowed_with_warning_note() {
        let record = item("CODE1", "10");
        let next = apply_ok(&record, ReconcileAction::RequestPurchase { quantity: dec("15") });
        assert_eq!(next.ledger.purchased, dec("15"));
        assert_eq!(next.status, ItemStatus::ForPurchase);
        let last = next.history.last().unwrap();
        assert_eq!(last.kind, HistoryKind::Purchased);
        assert!(last.note.as_deref().unwrap().contains("excede"));
    }

    #[test]
    fn mixed_stock_and_purchase_completes_as_for_purchase() {
        let record = item("CODE1", "10");
        let map = stock(&[("CODE1", "6")]);
        let partial = apply_ok(
            &record,
            ReconcileAction::Allocate {
                quantity: dec("6"),
                stock: &map,
            },
        );
        let next = apply_ok(&partial, ReconcileAction::RequestPurchase { quantity: dec("4") });
        assert_eq!(next.status, ItemStatus::ForPurchase);
        assert!(next.is_complete(Stage::StockAnalysis));
    }

    #[test]
    fn receive_tracks_partial_full_and_discrepancy() {
        let record = item("CODE1", "10");
        let bought = apply_ok(&record, ReconcileAction::RequestPurchase { quantity: dec("10") });

        let partial = apply_ok(
            &bought,
            ReconcileAction::ReceiveShipment {
                quantity: dec("4"),
                invoice_ref: "NF-123".into(),
            },
        );
        assert_eq!(partial.status, ItemStatus::PartialReceipt);
        assert_eq!(partial.ledger.pending_receipt(), dec("6"));
        assert_eq!(partial.ledger.purchased, dec("10"));

        let full = apply_ok(
            &partial,
            ReconcileAction::ReceiveShipment {
                quantity: dec("6"),
                invoice_ref: "NF-124".into(),
            },
        );
        assert_eq!(full.status, ItemStatus::Received);

        let over = apply_ok(
            &full,
            ReconcileAction::ReceiveShipment {
                quantity: dec("2"),
                invoice_ref: "NF-125".into(),
            },
        );
        assert_eq!(over.status, ItemStatus::ReceivedWithDiscrepancy);
        assert!(over.history.last().unwrap().note.is_some());
    }

    #[test]
    fn earmark_consumes_concrete_source() {
        let record = item("CODE1", "10");
        let map = stock(&[("CODE1", "10")]);
        let allocated = apply_ok(
            &record,
            ReconcileAction::Allocate {
                quantity: dec("10"),
                stock: &map,
            },
        );

        let partial = apply_ok(
            &allocated,
            ReconcileAction::Earmark {
                quantity: dec("4"),
                source: EarmarkSource::Stock,
            },
        );
        assert_eq!(partial.status, ItemStatus::PartiallyEarmarked);
        assert_eq!(partial.ledger.earmarked_from_stock, dec("4"));

        let full = apply_ok(
            &partial,
            ReconcileAction::Earmark {
                quantity: dec("6"),
                source: EarmarkSource::Stock,
            },
        );
        assert_eq!(full.status, ItemStatus::Earmarked);

        // Empenho além da fonte disponível é rejeitado.
        let err = apply(
            &partial,
            &ReconcileAction::Earmark {
                quantity: dec("6"),
                source: EarmarkSource::Received,
            },
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, AppError::InsufficientStock { .. }));
    }

    #[test]
    fn confront_rebases_demand_and_moves_to_separation() {
        let record = earmarked_item("8");
        let next = apply_ok(&record, ReconcileAction::ConfrontFinalList { final_quantity: dec("5") });
        assert_eq!(next.required_quantity_final, Some(dec("5")));
        assert!(next.analysis_final_realizada);
        assert_eq!(next.stage, Stage::Separation);
        // Sobra de 3 a devolver: fica aguardando a corretiva.
        assert_eq!(next.status, ItemStatus::AwaitingFinalConfrontation);
        assert_eq!(next.pending_return(), dec("3"));
    }

    #[test]
    fn separation_completes_only_after_both_corrective_actions() {
        let record = earmarked_item("8");
        let confronted =
            apply_ok(&record, ReconcileAction::ConfrontFinalList { final_quantity: dec("5") });

        let separated = apply_ok(
            &confronted,
            ReconcileAction::SendToProduction { quantity: dec("5") },
        );
        // Separou tudo mas ainda deve devolver 3: não é terminal.
        assert!(separated.has_pending_production_actions());
        assert_ne!(separated.status, ItemStatus::SeparatedForProduction);

        let done = apply_ok(&separated, ReconcileAction::ReturnToStock { quantity: dec("3") });
        assert!(!done.has_pending_production_actions());
        assert_eq!(done.status, ItemStatus::SeparatedForProduction);

        // Terminal da etapa rejeita repetição sem alterar nada.
        let err = apply(
            &done,
            &ReconcileAction::SendToProduction { quantity: dec("1") },
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, AppError::AlreadyFinalized));
    }

    #[test]
    fn full_return_after_zero_rebase() {
        let record = earmarked_item("8");
        let confronted =
            apply_ok(&record, ReconcileAction::ConfrontFinalList { final_quantity: dec("0") });
        assert_eq!(confronted.status, ItemStatus::AwaitingFinalConfrontation);

        let returned = apply_ok(
            &confronted,
            ReconcileAction::ReturnToStock { quantity: dec("8") },
        );
        assert_eq!(returned.status, ItemStatus::ReturnedToStock);
        assert_eq!(returned.ledger.returned_to_stock, dec("8"));
    }

    #[test]
    fn undo_appends_compensating_entry() {
        let record = item("CODE1", "10");
        let map = stock(&[("CODE1", "10")]);
        let allocated = apply_ok(
            &record,
            ReconcileAction::Allocate {
                quantity: dec("10"),
                stock: &map,
            },
        );
        let len_before = allocated.history.len();

        let undone = apply_ok(&allocated, ReconcileAction::UndoLast { kind: HistoryKind::Allocated });
        assert_eq!(undone.ledger.allocated_from_stock, Decimal::ZERO);
        assert_eq!(undone.status, ItemStatus::Pending);
        // Entrada original preservada + entrada compensatória nova.
        assert_eq!(undone.history.len(), len_before + 1);
        let last = undone.history.last().unwrap();
        assert_eq!(last.kind, HistoryKind::Undone);
        assert_eq!(last.undone_kind, Some(HistoryKind::Allocated));

        // Segundo undo do mesmo tipo: não há mais nada para desfazer.
        let err = apply(
            &undone,
            &ReconcileAction::UndoLast { kind: HistoryKind::Allocated },
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[test]
    fn undo_skips_already_compensated_entries() {
        let record = item("CODE1", "10");
        let a = apply_ok(&record, ReconcileAction::RequestPurchase { quantity: dec("3") });
        let b = apply_ok(&a, ReconcileAction::RequestPurchase { quantity: dec("5") });
        // Desfaz a de 5, depois a de 3.
        let u1 = apply_ok(&b, ReconcileAction::UndoLast { kind: HistoryKind::Purchased });
        assert_eq!(u1.ledger.purchased, dec("3"));
        let u2 = apply_ok(&u1, ReconcileAction::UndoLast { kind: HistoryKind::Purchased });
        assert_eq!(u2.ledger.purchased, Decimal::ZERO);
    }

    // O histórico cresce exatamente uma entrada por ação aplicada.
    #[test]
    fn history_grows_once_per_applied_action() {
        let record = item("CODE1", "10");
        let map = stock(&[("CODE1", "4")]);
        let mut current = record.clone();
        let mut applied = 0usize;

        let attempts: Vec<ReconcileAction<'_>> = vec![
            ReconcileAction::Allocate { quantity: dec("10"), stock: &map }, // rejeita
            ReconcileAction::Allocate { quantity: dec("4"), stock: &map },  // aplica
            ReconcileAction::RequestPurchase { quantity: dec("0") },        // rejeita
            ReconcileAction::RequestPurchase { quantity: dec("6") },        // aplica
            ReconcileAction::RequestPurchase { quantity: dec("1") },        // rejeita (terminal)
        ];
        for action in &attempts {
            if let Ok(next) = apply(&current, action, Utc::now()) {
                current = next;
                applied += 1;
            }
        }
        assert_eq!(applied, 2);
        // 1 entrada Created + uma por ação aplicada.
        assert_eq!(current.history.len(), 1 + applied);
    }

    // O pendente nunca fica negativo, mesmo com compra a maior.
    #[test]
    fn outstanding_is_never_negative() {
        let record = item("CODE1", "10");
        let next = apply_ok(&record, ReconcileAction::RequestPurchase { quantity: dec("25") });
        assert_eq!(next.outstanding(Stage::StockAnalysis), Decimal::ZERO);
    }

    /// Item com todo o fluxo até o empenho concluído, pronto para confrontar.
    fn earmarked_item(earmarked: &str) -> ItemRecord {
        let record = item("CODE1", earmarked);
        let map = stock(&[("CODE1", earmarked)]);
        let allocated = apply_ok(
            &record,
            ReconcileAction::Allocate {
                quantity: dec(earmarked),
                stock: &map,
            },
        );
        apply_ok(
            &allocated,
            ReconcileAction::Earmark {
                quantity: dec(earmarked),
                source: EarmarkSource::Stock,
            },
        )
    }
}

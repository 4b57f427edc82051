// src/models/confrontation.rs

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Entrada normalizada de uma lista importada (planilha da lista final
/// ou do mapa de estoque): só código e quantidade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalListEntry {
    pub code: String,
    pub quantity: Decimal,
}

/// Cenários da confrontação entre o empenhado e a lista final.
/// Os números são os mesmos usados pelos operadores do sistema de origem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Scenario {
    /// 0: empenhado == lista final, nada a fazer.
    Match,
    /// 1: item empenhado ausente da lista final (ou com quantidade zero).
    AbsentFromFinal,
    /// 2: empenhado a maior, devolução parcial da diferença.
    EarmarkedExcess,
    /// 3: empenhado a menor, compra final do saldo.
    EarmarkedShortfall,
    /// 4: código da lista final sem item empenhado correspondente.
    NewFromFinal,
}

impl Scenario {
    pub fn number(&self) -> u8 {
        match self {
            Scenario::Match => 0,
            Scenario::AbsentFromFinal => 1,
            Scenario::EarmarkedExcess => 2,
            Scenario::EarmarkedShortfall => 3,
            Scenario::NewFromFinal => 4,
        }
    }
}

/// Ação corretiva sugerida para cada cenário.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "action", content = "quantity")]
pub enum SuggestedAction {
    None,
    /// Devolver todo o empenhado ao estoque.
    FullReturn(Decimal),
    /// Devolver só a diferença.
    PartialReturn(Decimal),
    /// Gerar compra final do saldo faltante.
    FinalPurchase(Decimal),
    /// Criar item novo + pedido de compra pela quantidade integral.
    CreateItemAndPurchase(Decimal),
}

/// Linha derivada de uma rodada de confrontação. Vive só durante a rodada:
/// criada no `resolve`, descartada depois que as ações forem confirmadas.
/// `processada` é o controle de idempotência DO CHAMADOR: o motor aplica
/// uma ação lógica por chamada, quem garante "uma vez só" é esta flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfrontationRow {
    pub code: String,
    pub earmarked_qty: Decimal,
    pub final_required_qty: Decimal,
    /// empenhado − lista final (positivo = sobra, negativo = falta).
    pub difference: Decimal,
    pub scenario: Scenario,
    pub suggested_action: SuggestedAction,
    /// Ausente nas linhas de cenário 4 (ainda não existe registro).
    pub item_id: Option<Uuid>,
    pub processada: bool,
}

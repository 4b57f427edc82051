// src/models/item.rs

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tolerância fixa para comparações de completude.
/// O sistema de origem trabalhava com quantidades fracionárias e
/// considerava "zerado" qualquer saldo até 1e-3.
pub const TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 3);

// --- 1. Etapas do ciclo de vida ---
// Cada etapa tem seu próprio subconjunto de canais de atendimento
// e seus próprios status terminais.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    StockAnalysis,
    Receiving,
    Earmarking,
    FinalConfrontation,
    Separation,
}

// --- 2. Status ---
// Enumeração fechada no lugar das strings dinâmicas do sistema de origem
// ("Em Estoque", "Para Compra", ...): um typo não pode mais deixar um item
// fora tanto da fila de pendentes quanto da de concluídos.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ItemStatus {
    Pending,
    PartiallyProcessed,
    InStock,
    ForPurchase,
    PartialReceipt,
    Received,
    ReceivedWithDiscrepancy,
    PartiallyEarmarked,
    Earmarked,
    AwaitingFinalConfrontation,
    ReadyForProduction,
    ReturnedToStock,
    SeparatedForProduction,
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Rótulos exibidos na UI, os mesmos do sistema de origem.
        let label = match self {
            ItemStatus::Pending => "Pendente",
            ItemStatus::PartiallyProcessed => "Parcialmente Processado",
            ItemStatus::InStock => "Em Estoque",
            ItemStatus::ForPurchase => "Para Compra",
            ItemStatus::PartialReceipt => "Recebimento Parcial",
            ItemStatus::Received => "Recebido",
            ItemStatus::ReceivedWithDiscrepancy => "Recebido com Divergência",
            ItemStatus::PartiallyEarmarked => "Parcialmente Empenhado",
            ItemStatus::Earmarked => "Empenhado",
            ItemStatus::AwaitingFinalConfrontation => "Aguardando Análise Final",
            ItemStatus::ReadyForProduction => "Pronto para Produção",
            ItemStatus::ReturnedToStock => "Devolvido ao Estoque",
            ItemStatus::SeparatedForProduction => "Separado para Produção",
        };
        write!(f, "{label}")
    }
}

impl ItemStatus {
    /// Status que encerram a etapa informada: ações dessa etapa sobre um
    /// item já encerrado são rejeitadas com `AlreadyFinalized`.
    pub fn is_terminal_for(&self, stage: Stage) -> bool {
        if *self == ItemStatus::SeparatedForProduction {
            return true;
        }
        match stage {
            Stage::StockAnalysis => {
                matches!(self, ItemStatus::InStock | ItemStatus::ForPurchase)
            }
            Stage::Earmarking => matches!(self, ItemStatus::Earmarked),
            Stage::Separation => matches!(self, ItemStatus::ReturnedToStock),
            // Recebimento a maior é permitido (vira divergência), e a
            // confrontação final é re-entrável por definição.
            Stage::Receiving | Stage::FinalConfrontation => false,
        }
    }
}

// --- 3. Origem do empenho ---
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EarmarkSource {
    Stock,
    Received,
}

// --- 4. Histórico (log de eventos, só cresce) ---
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HistoryKind {
    Created,
    Allocated,
    Purchased,
    Received,
    Earmarked,
    FinalConfronted,
    Returned,
    SentToProduction,
    Undone,
}

/// Entrada heterogênea do histórico: `{type, quantity, timestamp, note}`
/// mais os campos específicos de cada tipo de evento.
/// Nunca é editada nem removida; reversões entram como evento `Undone`
/// compensatório (estratégia única, ver DESIGN.md).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    #[serde(rename = "type")]
    pub kind: HistoryKind,
    pub quantity: Decimal,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoice_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<EarmarkSource>,
    /// Presente só em eventos `Undone`: qual tipo de evento foi compensado.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub undone_kind: Option<HistoryKind>,
}

impl HistoryEntry {
    pub fn new(kind: HistoryKind, quantity: Decimal, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind,
            quantity,
            timestamp,
            note: None,
            invoice_ref: None,
            source: None,
            undone_kind: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

// --- 5. Razão de quantidades ---
// Um canal por fonte de atendimento. Todos os campos começam em zero;
// o motor de conciliação é o único escritor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QuantityLedger {
    pub allocated_from_stock: Decimal,
    pub purchased: Decimal,
    pub received: Decimal,
    pub earmarked_from_stock: Decimal,
    pub earmarked_from_received: Decimal,
    pub returned_to_stock: Decimal,
    pub sent_to_production: Decimal,
}

impl QuantityLedger {
    /// Soma dos canais que contam como atendimento na etapa informada.
    pub fn consumed(&self, stage: Stage) -> Decimal {
        match stage {
            Stage::StockAnalysis => self.allocated_from_stock + self.purchased,
            Stage::Receiving => self.received,
            Stage::Earmarking | Stage::FinalConfrontation => self.total_earmarked(),
            Stage::Separation => self.sent_to_production,
        }
    }

    pub fn total_earmarked(&self) -> Decimal {
        self.earmarked_from_stock + self.earmarked_from_received
    }

    /// Saldo a receber: `purchased` é o total pedido e nunca é decrementado;
    /// o pendente é sempre derivado.
    pub fn pending_receipt(&self) -> Decimal {
        (self.purchased - self.received).max(Decimal::ZERO)
    }

    /// Diferença bruta recebido − pedido (positiva = divergência a maior).
    pub fn receipt_overrun(&self) -> Decimal {
        self.received - self.purchased
    }
}

// --- 6. O registro persistido ---
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemRecord {
    pub id: Uuid,
    /// Código usado nos cruzamentos entre etapas; normalizado para maiúsculas.
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub material_list_name: Option<String>,

    /// Demanda original; só a confrontação final pode rebaseá-la
    /// (uma única vez), via `required_quantity_final`.
    pub required_quantity: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_quantity_final: Option<Decimal>,

    #[serde(default)]
    pub ledger: QuantityLedger,
    pub stage: Stage,
    pub status: ItemStatus,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,

    #[serde(default)]
    pub analysis_final_realizada: bool,
    /// Item criado pela própria análise final (cenário 4 da confrontação).
    #[serde(default)]
    pub created_by_analysis: bool,
    /// Cache de `is_complete(StockAnalysis)`, recalculado a cada mutação
    /// pelo motor; nunca confiar numa leitura antiga dele.
    #[serde(default)]
    pub hidden_from_analysis: bool,

    /// Contador de lock otimista; gerido pelo repositório, fora do documento.
    #[serde(skip)]
    pub version: i64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

impl ItemRecord {
    pub fn new(code: &str, required_quantity: Decimal, now: DateTime<Utc>) -> Self {
        let mut record = Self {
            id: Uuid::new_v4(),
            code: normalize_code(code),
            description: None,
            order_id: None,
            material_list_name: None,
            required_quantity,
            required_quantity_final: None,
            ledger: QuantityLedger::default(),
            stage: Stage::StockAnalysis,
            status: ItemStatus::Pending,
            history: vec![HistoryEntry::new(HistoryKind::Created, required_quantity, now)],
            analysis_final_realizada: false,
            created_by_analysis: false,
            hidden_from_analysis: false,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        record.recompute_status();
        record
    }

    /// Demanda vigente na etapa: a separação usa a demanda rebaseada
    /// pela análise final, as demais usam a demanda original.
    pub fn demand(&self, stage: Stage) -> Decimal {
        match stage {
            Stage::Separation => self
                .required_quantity_final
                .unwrap_or(self.required_quantity),
            _ => self.required_quantity,
        }
    }

    /// Saldo pendente da etapa, nunca negativo.
    pub fn outstanding(&self, stage: Stage) -> Decimal {
        (self.demand(stage) - self.ledger.consumed(stage)).max(Decimal::ZERO)
    }

    pub fn is_complete(&self, stage: Stage) -> bool {
        self.outstanding(stage) <= TOLERANCE
    }

    /// Quanto ainda precisa ser devolvido ao estoque depois da análise final
    /// (empenhado além da demanda rebaseada, descontado o já devolvido).
    pub fn pending_return(&self) -> Decimal {
        if !self.analysis_final_realizada {
            return Decimal::ZERO;
        }
        let final_qty = self.demand(Stage::Separation);
        (self.ledger.total_earmarked() - final_qty - self.ledger.returned_to_stock)
            .max(Decimal::ZERO)
    }

    /// Quanto ainda precisa ser separado para produção.
    pub fn pending_separation(&self) -> Decimal {
        if !self.analysis_final_realizada {
            return Decimal::ZERO;
        }
        self.outstanding(Stage::Separation)
    }

    /// Um item só sai da fila de trabalho da separação quando as DUAS
    /// ações corretivas aplicáveis (separar E devolver) foram concluídas.
    pub fn has_pending_production_actions(&self) -> bool {
        self.pending_return() > TOLERANCE || self.pending_separation() > TOLERANCE
    }

    /// Recalcula o status a partir da razão e da etapa atual. O status nunca
    /// é atribuído diretamente por chamadores: é sempre derivado, para que
    /// status e razão não possam divergir.
    pub fn recompute_status(&mut self) {
        self.status = self.derive_status();
        self.hidden_from_analysis = self.is_complete(Stage::StockAnalysis);
    }

    fn derive_status(&self) -> ItemStatus {
        match self.stage {
            Stage::StockAnalysis | Stage::FinalConfrontation => self.stock_analysis_status(),
            Stage::Receiving => {
                if self.ledger.received <= Decimal::ZERO {
                    // Recebimento totalmente desfeito: volta à leitura da análise.
                    self.stock_analysis_status()
                } else if self.ledger.receipt_overrun() > TOLERANCE {
                    ItemStatus::ReceivedWithDiscrepancy
                } else if self.ledger.pending_receipt() <= TOLERANCE {
                    ItemStatus::Received
                } else {
                    ItemStatus::PartialReceipt
                }
            }
            Stage::Earmarking => {
                if self.is_complete(Stage::Earmarking) {
                    ItemStatus::Earmarked
                } else if self.ledger.total_earmarked() > Decimal::ZERO {
                    ItemStatus::PartiallyEarmarked
                } else {
                    self.stock_analysis_status()
                }
            }
            Stage::Separation => self.separation_status(),
        }
    }

    fn stock_analysis_status(&self) -> ItemStatus {
        if self.is_complete(Stage::StockAnalysis) {
            if self.ledger.purchased > Decimal::ZERO {
                // Atendimento misto (estoque + compra) também fica "Para Compra".
                ItemStatus::ForPurchase
            } else {
                ItemStatus::InStock
            }
        } else if self.ledger.consumed(Stage::StockAnalysis) > Decimal::ZERO {
            ItemStatus::PartiallyProcessed
        } else {
            ItemStatus::Pending
        }
    }

    fn separation_status(&self) -> ItemStatus {
        let final_qty = self.demand(Stage::Separation);
        let needs_return = self.pending_return() > TOLERANCE;
        // Item criado pela análise final nasce sem empenho: a compra
        // corretiva é o que o abastece, e enquanto ela não sai ele
        // continua aguardando.
        let needs_supply =
            self.created_by_analysis && self.ledger.purchased + TOLERANCE < final_qty;

        if needs_return || needs_supply {
            ItemStatus::AwaitingFinalConfrontation
        } else if final_qty <= TOLERANCE {
            ItemStatus::ReturnedToStock
        } else if self.is_complete(Stage::Separation) {
            ItemStatus::SeparatedForProduction
        } else {
            ItemStatus::ReadyForProduction
        }
    }
}

// src/models/stock.rs

use std::collections::HashMap;

use rust_decimal::Decimal;

use crate::models::item::normalize_code;

/// Mapa `código → quantidade disponível` montado a partir de UMA planilha.
/// É reconstruído por inteiro a cada novo upload (nunca mesclado com o
/// anterior) e serve só como recurso limitado de uma sessão de conciliação:
/// não é inventário autoritativo e nunca é persistido.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StockMap {
    entries: HashMap<String, Decimal>,
}

impl StockMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Códigos repetidos na planilha somam suas quantidades.
    pub fn add(&mut self, code: &str, quantity: Decimal) {
        let qty = quantity.max(Decimal::ZERO);
        *self
            .entries
            .entry(normalize_code(code))
            .or_insert(Decimal::ZERO) += qty;
    }

    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, Decimal)>,
    {
        let mut map = Self::new();
        for (code, quantity) in entries {
            map.add(&code, quantity);
        }
        map
    }

    /// Disponibilidade do código (zero quando ausente).
    pub fn available(&self, code: &str) -> Decimal {
        self.entries
            .get(&normalize_code(code))
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

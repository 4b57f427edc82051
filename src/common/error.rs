// src/common/error.rs

use rust_decimal::Decimal;
use thiserror::Error;

// Nosso tipo de erro, com `thiserror` para melhor ergonomia.
// A taxonomia segue as classes de falha do motor de conciliação:
// validações locais nunca tocam o registro; só `PersistenceFailure`
// é elegível para retry (na camada de orquestração, nunca no motor).
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Erro de validação")]
    ValidationError(#[from] validator::ValidationErrors),

    // Quantidade não positiva, não numérica, ou comando inválido para o estado atual.
    #[error("Entrada inválida: {0}")]
    InvalidInput(String),

    // Rejeição de regra de negócio, não é bug: o operador ajusta a quantidade.
    #[error("Estoque insuficiente: faltam {shortfall} unidades")]
    InsufficientStock { shortfall: Decimal },

    #[error("Item já finalizado para esta etapa")]
    AlreadyFinalized,

    #[error("Item não encontrado")]
    NotFound,

    // Escrita rejeitada pelo repositório (rede, contenção, conflito de versão).
    #[error("Falha de persistência: {0}")]
    PersistenceFailure(String),

    // Variante genérica para qualquer outro erro inesperado.
    #[error("Erro interno: {0}")]
    InternalServerError(#[from] anyhow::Error),
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        AppError::PersistenceFailure(e.to_string())
    }
}

impl AppError {
    /// Só falhas de persistência podem ser reenviadas (a escrita é
    /// idempotente por id); todo o resto é rejeição local definitiva.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::PersistenceFailure(_))
    }

    /// Rejeições de negócio viram mensagem para a UI; o restante sobe como erro.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            AppError::InvalidInput(_)
                | AppError::InsufficientStock { .. }
                | AppError::AlreadyFinalized
                | AppError::NotFound
                | AppError::ValidationError(_)
        )
    }
}

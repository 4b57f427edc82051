// src/services/ingestion.rs
//
// Ingestão das planilhas enviadas (mapa de estoque, lista final): acha as
// colunas de código e quantidade por correspondência tolerante de cabeçalho
// e normaliza as quantidades nos dois formatos de separador decimal que os
// fornecedores mandam. A flag de arquivo-em-processamento reproduz a trava
// de reentrância da tela de upload.

use std::sync::atomic::{AtomicBool, Ordering};

use rust_decimal::Decimal;

use crate::{
    common::error::AppError,
    models::confrontation::FinalListEntry,
    models::item::normalize_code,
    models::stock::StockMap,
};

// Apelidos conhecidos das colunas, já normalizados (sem acento, sem
// pontuação, minúsculos). A correspondência é por substring parcial.
const CODE_ALIASES: &[&str] = &["codigo", "cod", "code", "item", "referencia", "ref", "sku"];
const QUANTITY_ALIASES: &[&str] = &["quantidade", "qtde", "qtd", "quant", "quantity", "qty"];

/// Resultado da ingestão: entradas normalizadas + problemas não fatais
/// linha a linha (código vazio, quantidade ilegível coerciada para zero).
#[derive(Debug, Clone, Default)]
pub struct ParsedSheet {
    pub entries: Vec<FinalListEntry>,
    pub errors: Vec<String>,
}

#[derive(Debug, Default)]
pub struct SpreadsheetIngestion {
    is_processing_file: AtomicBool,
}

impl SpreadsheetIngestion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Processa um CSV enviado. Um segundo arquivo enquanto o primeiro
    /// ainda está sendo processado é rejeitado (trava de reentrância).
    pub fn parse_csv(&self, data: &[u8]) -> Result<ParsedSheet, AppError> {
        if self.is_processing_file.swap(true, Ordering::SeqCst) {
            return Err(AppError::InvalidInput(
                "Já existe um arquivo em processamento".into(),
            ));
        }
        let result = Self::parse_inner(data);
        self.is_processing_file.store(false, Ordering::SeqCst);
        result
    }

    fn parse_inner(data: &[u8]) -> Result<ParsedSheet, AppError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(sniff_delimiter(data))
            .from_reader(data);

        let mut records = reader.records();
        let header = match records.next() {
            Some(Ok(row)) => row,
            Some(Err(e)) => {
                return Err(AppError::InvalidInput(format!("Arquivo ilegível: {e}")));
            }
            None => return Err(AppError::InvalidInput("Arquivo vazio".into())),
        };

        let code_col = find_column(&header, CODE_ALIASES);
        let qty_col = find_column(&header, QUANTITY_ALIASES);
        let (code_col, qty_col) = match (code_col, qty_col) {
            (Some(c), Some(q)) if c != q => (c, q),
            _ => {
                return Err(AppError::InvalidInput(
                    "Não foi possível identificar as colunas de código e quantidade".into(),
                ));
            }
        };

        let mut sheet = ParsedSheet::default();
        for (idx, record) in records.enumerate() {
            let line = idx + 2; // 1-based, depois do cabeçalho
            let record = match record {
                Ok(r) => r,
                Err(e) => {
                    sheet.errors.push(format!("Linha {line}: ilegível ({e})"));
                    continue;
                }
            };
            let code = record.get(code_col).unwrap_or("").trim();
            if code.is_empty() {
                sheet.errors.push(format!("Linha {line}: código vazio"));
                continue;
            }
            let raw_qty = record.get(qty_col).unwrap_or("");
            let quantity = parse_quantity(raw_qty);
            if quantity.is_none() && !raw_qty.trim().is_empty() {
                sheet
                    .errors
                    .push(format!("Linha {line}: quantidade ilegível ({raw_qty:?})"));
            }
            sheet.entries.push(FinalListEntry {
                code: normalize_code(code),
                // Ilegível ou vazio vira zero, nunca negativo.
                quantity: quantity.unwrap_or(Decimal::ZERO).max(Decimal::ZERO),
            });
        }
        tracing::debug!(
            entradas = sheet.entries.len(),
            problemas = sheet.errors.len(),
            "Planilha processada"
        );
        Ok(sheet)
    }
}

/// Monta o mapa `código → disponível` de UMA planilha. Sempre do zero:
/// um novo upload substitui o mapa anterior por inteiro.
pub struct StockMapBuilder;

impl StockMapBuilder {
    pub fn build(sheet: &ParsedSheet) -> StockMap {
        StockMap::from_entries(
            sheet
                .entries
                .iter()
                .map(|e| (e.code.clone(), e.quantity)),
        )
    }
}

/// Planilhas exportadas em pt-BR costumam vir com ponto-e-vírgula.
/// Decide pelo que aparece na linha de cabeçalho.
fn sniff_delimiter(data: &[u8]) -> u8 {
    let first_line = data.split(|b| *b == b'\n').next().unwrap_or(b"");
    let semicolons = first_line.iter().filter(|b| **b == b';').count();
    let commas = first_line.iter().filter(|b| **b == b',').count();
    if semicolons > commas { b';' } else { b',' }
}

/// Normaliza um cabeçalho para comparação: minúsculas, sem acentos
/// (alfabeto português), só letras e dígitos.
fn normalize_header(raw: &str) -> String {
    raw.chars()
        .flat_map(|c| c.to_lowercase())
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ã' => 'a',
            'é' | 'ê' => 'e',
            'í' => 'i',
            'ó' | 'ô' | 'õ' => 'o',
            'ú' | 'ü' => 'u',
            'ç' => 'c',
            other => other,
        })
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

/// Acha a coluna cujo cabeçalho bate com algum apelido, por substring
/// nos dois sentidos ("Cód. do Material" ⊇ "cod", "qtd" ⊆ "quantidade").
fn find_column(header: &csv::StringRecord, aliases: &[&str]) -> Option<usize> {
    for (idx, cell) in header.iter().enumerate() {
        let normalized = normalize_header(cell);
        if normalized.is_empty() {
            continue;
        }
        for alias in aliases {
            if normalized.contains(alias) || alias.contains(normalized.as_str()) {
                return Some(idx);
            }
        }
    }
    None
}

/// Converte uma quantidade textual aceitando vírgula ou ponto como
/// separador decimal e separadores de milhar de ambos os tipos.
/// Devolve `None` para texto sem número algum.
fn parse_quantity(raw: &str) -> Option<Decimal> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, ',' | '.' | '-'))
        .collect();
    if !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let commas = cleaned.matches(',').count();
    let dots = cleaned.matches('.').count();
    let normalized = match (commas, dots) {
        (0, 0) => cleaned,
        // Os dois presentes: o separador mais à direita é o decimal.
        (_, _) if commas > 0 && dots > 0 => {
            if cleaned.rfind(',') > cleaned.rfind('.') {
                cleaned.replace('.', "").replace(',', ".")
            } else {
                cleaned.replace(',', "")
            }
        }
        // Só vírgulas: uma é decimal, várias são milhar.
        (1, 0) => cleaned.replace(',', "."),
        (_, 0) => cleaned.replace(',', ""),
        // Só pontos: um é decimal, vários são milhar.
        (0, 1) => cleaned,
        (0, _) => {
            let last = cleaned.rfind('.').unwrap();
            let mut s = String::with_capacity(cleaned.len());
            for (i, c) in cleaned.char_indices() {
                if c == '.' && i != last {
                    continue;
                }
                s.push(c);
            }
            s
        }
        _ => cleaned,
    };
    normalized.parse().ok()
}

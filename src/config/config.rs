// src/config/config.rs

use std::{env, sync::Arc, time::Duration};

use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::{
    db::pg_repo::PgMaterialsRepository,
    services::confrontation::ConfrontationService,
    services::ingestion::SpreadsheetIngestion,
    services::orchestrator::BatchOrchestrator,
};

/// Inicializa o logger. Chamar uma vez, na borda da aplicação.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();
}

// O estado compartilhado da aplicação: pool + gráfico de serviços montado.
#[derive(Clone)]
pub struct AppState {
    pub db_pool: PgPool,
    pub orchestrator: BatchOrchestrator<PgMaterialsRepository>,
    pub ingestion: Arc<SpreadsheetIngestion>,
}

impl AppState {
    pub async fn new() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = env::var("DATABASE_URL")?;

        let db_pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(3))
            .connect(&database_url)
            .await?;
        tracing::info!("✅ Conexão com o banco de dados estabelecida com sucesso!");

        // --- Monta o gráfico de dependências ---
        let repo = PgMaterialsRepository::new(db_pool.clone());
        repo.ensure_schema().await?;
        let orchestrator = BatchOrchestrator::new(Arc::new(repo));

        Ok(Self {
            db_pool,
            orchestrator,
            ingestion: Arc::new(SpreadsheetIngestion::new()),
        })
    }

    pub fn confrontation(&self) -> ConfrontationService<PgMaterialsRepository> {
        ConfrontationService::new(self.orchestrator.clone())
    }
}

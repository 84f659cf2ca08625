use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{FromRow, QueryBuilder, Sqlite};
use std::path::Path;
use tracing::{debug, error, warn};

use super::{QueueError, ReadingQueue};
use crate::types::{QueueRecord, Reading, parse_timestamp};

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS cache(
        id INTEGER PRIMARY KEY NOT NULL,
        timestamp DATE,
        co2 REAL,
        temp REAL,
        humidity REAL,
        temp2 REAL)
"#;

// INSERT OR REPLACE passa a ser "por timestamp" com este índice
const CREATE_INDEX: &str = "CREATE UNIQUE INDEX IF NOT EXISTS cache_timestamp ON cache(timestamp)";

#[derive(Debug, FromRow)]
struct CacheRow {
    id: i64,
    timestamp: String,
    co2: Option<f64>,
    temp: Option<f64>,
    humidity: Option<f64>,
    temp2: Option<f64>,
}

/// Cache durável em SQLite.
pub struct SqliteQueue {
    pool: SqlitePool,
    /// ids do último lote lido, apagados no próximo `acknowledge`
    pending: Vec<i64>,
}

impl SqliteQueue {
    /// Abre (ou cria) o arquivo de cache.
    pub async fn open(path: &Path) -> Result<Self, QueueError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        Self::connect(options).await
    }

    /// Banco em memória, útil para testes.
    pub async fn open_in_memory() -> Result<Self, QueueError> {
        let options = SqliteConnectOptions::new().in_memory(true);
        Self::connect(options).await
    }

    async fn connect(options: SqliteConnectOptions) -> Result<Self, QueueError> {
        // Uma única conexão, nunca reciclada: só o ciclo de upload usa o cache
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        sqlx::query(CREATE_TABLE).execute(&pool).await?;
        if let Err(e) = sqlx::query(CREATE_INDEX).execute(&pool).await {
            warn!("Índice único de timestamp não criado (duplicatas antigas?): {e}");
        }

        Ok(Self {
            pool,
            pending: Vec::new(),
        })
    }

    async fn try_append(&self, reading: &Reading) -> Result<(), QueueError> {
        sqlx::query(
            "INSERT OR REPLACE INTO cache(timestamp, co2, temp, humidity, temp2) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(reading.created_at())
        .bind(reading.co2.map(f64::from))
        .bind(reading.temp)
        .bind(reading.humidity)
        .bind(reading.temp2)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn try_get_batch(&self, limit: usize) -> Result<Vec<CacheRow>, QueueError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query_as::<_, CacheRow>(
            "SELECT id, CAST(timestamp AS TEXT) AS timestamp, co2, temp, humidity, temp2 \
             FROM cache ORDER BY datetime(timestamp) DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn try_delete_pending(&self) -> Result<u64, QueueError> {
        let mut query = QueryBuilder::<Sqlite>::new("DELETE FROM cache WHERE id IN (");
        let mut ids = query.separated(", ");
        for id in &self.pending {
            ids.push_bind(*id);
        }
        ids.push_unseparated(")");

        let result = query.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn try_count(&self) -> Result<i64, QueueError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM cache")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl ReadingQueue for SqliteQueue {
    fn kind(&self) -> &'static str {
        "sqlite"
    }

    async fn append(&mut self, reading: &Reading) {
        if let Err(e) = self.try_append(reading).await {
            error!("Erro ao gravar no cache: {e}");
        }
    }

    async fn get_batch(&mut self, limit: usize) -> Vec<QueueRecord> {
        self.pending.clear();

        let rows = match self.try_get_batch(limit).await {
            Ok(rows) => rows,
            Err(e) => {
                error!("Erro ao ler o cache: {e}");
                return Vec::new();
            }
        };

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let Some(timestamp) = parse_timestamp(&row.timestamp) else {
                warn!("Registro {} com timestamp inválido: {:?}", row.id, row.timestamp);
                continue;
            };
            self.pending.push(row.id);
            records.push(QueueRecord {
                id: row.id,
                reading: Reading {
                    timestamp,
                    co2: row.co2.map(|v| v as u16),
                    temp: row.temp,
                    humidity: row.humidity,
                    temp2: row.temp2,
                },
            });
        }
        records
    }

    async fn acknowledge(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        match self.try_delete_pending().await {
            Ok(deleted) => {
                debug!("{deleted} registros removidos do cache");
                self.pending.clear();
            }
            // Mantém os ids: o próximo lote substitui a lista de qualquer forma
            Err(e) => error!("Erro ao limpar o cache: {e}"),
        }
    }

    async fn backlog(&mut self) -> usize {
        match self.try_count().await {
            Ok(count) => usize::try_from(count).unwrap_or(0),
            Err(e) => {
                error!("Erro ao contar o cache: {e}");
                0
            }
        }
    }

    async fn close(&mut self) {
        self.pool.close().await;
    }
}

//! Fila store-and-forward de leituras completas.
//!
//! Dois backends com a mesma interface, escolhidos uma vez na partida:
//!
//! - [`SqliteQueue`] – durável, sobrevive a reinícios, sem limite na escrita
//! - [`MemoryQueue`] – fallback em memória com limite FIFO, usado só se o
//!   SQLite não puder ser aberto
//!
//! Atenção: os backends devolvem lotes em ordens opostas (SQLite: mais
//! recente primeiro; memória: mais antigo primeiro). A divergência é
//! mantida de propósito, porque muda a ordem de entrega observável.
//!
//! Erros de armazenamento são logados dentro da fila e nunca sobem para o
//! ciclo de upload: cada chamada degrada individualmente.

mod memory;
mod sqlite;

pub use memory::MemoryQueue;
pub use sqlite::SqliteQueue;

use async_trait::async_trait;
use tracing::{error, info};

use crate::config::CacheConfig;
use crate::types::{QueueRecord, Reading};

/// Erros do cache durável.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("erro do SQLite: {0}")]
    Sqlite(#[from] sqlx::Error),
}

/// Interface comum dos backends.
#[async_trait]
pub trait ReadingQueue: Send {
    /// Nome do backend para logs.
    fn kind(&self) -> &'static str;

    /// Insere (ou substitui, mesma timestamp) uma leitura.
    async fn append(&mut self, reading: &Reading);

    /// Lê até `limit` registros e os marca como pendentes de confirmação.
    async fn get_batch(&mut self, limit: usize) -> Vec<QueueRecord>;

    /// Remove o que foi entregue desde o último [`get_batch`](Self::get_batch).
    async fn acknowledge(&mut self);

    /// Registros aguardando envio.
    async fn backlog(&mut self) -> usize;

    /// Fecha o armazenamento.
    async fn close(&mut self);
}

/// Abre o cache durável; se falhar, cai para o buffer em memória.
pub async fn open_queue(config: &CacheConfig) -> Box<dyn ReadingQueue> {
    let path = config.resolved_path();
    match SqliteQueue::open(&path).await {
        Ok(queue) => {
            info!("Cache inicializado em {}", path.display());
            Box::new(queue)
        }
        Err(e) => {
            error!(
                "Erro ao abrir cache {}: {e}. Usando buffer em memória ({} registros)",
                path.display(),
                config.limit()
            );
            Box::new(MemoryQueue::new(config.limit()))
        }
    }
}

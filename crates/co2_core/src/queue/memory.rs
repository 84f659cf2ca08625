use async_trait::async_trait;
use std::collections::VecDeque;

use super::ReadingQueue;
use crate::types::{QueueRecord, Reading};

/// Buffer FIFO em memória com limite rígido na escrita.
///
/// Perde o conteúdo num reinício; usado só quando o SQLite não abre.
#[derive(Debug)]
pub struct MemoryQueue {
    buffer: VecDeque<QueueRecord>,
    limit: usize,
    next_id: i64,
}

impl MemoryQueue {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            buffer: VecDeque::with_capacity(limit),
            limit,
            next_id: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

#[async_trait]
impl ReadingQueue for MemoryQueue {
    fn kind(&self) -> &'static str {
        "memória"
    }

    async fn append(&mut self, reading: &Reading) {
        let id = self.next_id;
        self.next_id += 1;

        if let Some(existing) = self
            .buffer
            .iter_mut()
            .find(|r| r.reading.timestamp == reading.timestamp)
        {
            *existing = QueueRecord { id, reading: *reading };
            return;
        }

        if self.buffer.len() >= self.limit {
            self.buffer.pop_front();
        }
        self.buffer.push_back(QueueRecord { id, reading: *reading });
    }

    /// Devolve o buffer inteiro, mais antigo primeiro. O limite já foi
    /// aplicado na escrita.
    async fn get_batch(&mut self, _limit: usize) -> Vec<QueueRecord> {
        self.buffer.iter().cloned().collect()
    }

    async fn acknowledge(&mut self) {
        self.buffer.clear();
    }

    async fn backlog(&mut self) -> usize {
        self.buffer.len()
    }

    async fn close(&mut self) {}
}

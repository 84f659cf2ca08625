//! Ciclo de envio periódico para o ThingSpeak.
//!
//! A cada `pause` o ciclo monta uma leitura com as duas mailboxes. Leituras
//! incompletas são descartadas. Completas entram na fila (modo lote) e o
//! lote mais recente é enviado; só um 2xx confirma a fila.
//!
//! Falhas consecutivas (HTTP, rede, IP de origem) incrementam um contador
//! zerado a cada sucesso. Ao chegar em `error_limit` o ciclo devolve
//! [`ExitReason::ThresholdReached`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::net::IpAddr;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{CacheConfig, CloudConfig};
use crate::history::ReadingsLog;
use crate::lifecycle::{ExitReason, Shutdown};
use crate::mailbox::{GasMailbox, HumidityMailbox};
use crate::queue::ReadingQueue;
use crate::types::{Reading, Update};

/// Forma de envio, fixada pela configuração.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadMode {
    /// JSON com o lote da fila
    Bulk,
    /// Um registro form-encoded, sem fila
    Single,
}

/// Motivo de uma tentativa de envio não ter sido confirmada.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("IP de origem indisponível")]
    NoRoute,

    #[error("resposta HTTP {0}")]
    Status(u16),

    #[error("erro de rede: {0}")]
    Transport(String),

    #[error("erro ao codificar o corpo: {0}")]
    Encode(String),
}

/// Destino remoto das leituras.
#[async_trait]
pub trait CloudSink: Send + Sync {
    async fn send_single(&self, update: &Update) -> Result<(), DeliveryError>;

    async fn send_bulk(&self, updates: &[Update]) -> Result<(), DeliveryError>;
}

/// Descobre o IP local usado para sair à internet.
#[async_trait]
pub trait AddressResolver: Send + Sync {
    async fn resolve(&self) -> Result<IpAddr, DeliveryError>;
}

/// Resultado de um tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Leitura incompleta: nada foi feito
    Skipped,
    /// Fila vazia, nada a enviar
    Idle,
    /// Registros confirmados pelo servidor
    Delivered(usize),
    /// Tentativa falhou, abaixo do limite
    Failed,
    /// Falhas consecutivas chegaram ao limite
    ThresholdReached,
}

/// Parâmetros do ciclo.
#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub mode: UploadMode,
    pub batch_limit: usize,
    pub pause: Duration,
    pub error_limit: u32,
}

impl UploadSettings {
    /// `None` quando nenhum endpoint está configurado.
    pub fn from_config(cloud: &CloudConfig, cache: &CacheConfig) -> Option<Self> {
        let endpoint = cloud.endpoint()?;
        Some(Self {
            mode: endpoint.mode(),
            batch_limit: cache.limit(),
            pause: Duration::from_secs(cloud.pause_secs.max(1)),
            error_limit: cloud.error_limit.max(1),
        })
    }
}

pub struct UploadCycle {
    settings: UploadSettings,
    queue: Box<dyn ReadingQueue>,
    sink: Box<dyn CloudSink>,
    resolver: Box<dyn AddressResolver>,
    readings_log: Option<ReadingsLog>,
    failures: u32,
}

impl UploadCycle {
    pub fn new(
        settings: UploadSettings,
        queue: Box<dyn ReadingQueue>,
        sink: Box<dyn CloudSink>,
        resolver: Box<dyn AddressResolver>,
    ) -> Self {
        Self {
            settings,
            queue,
            sink,
            resolver,
            readings_log: None,
            failures: 0,
        }
    }

    pub fn with_readings_log(mut self, log: ReadingsLog) -> Self {
        self.readings_log = Some(log);
        self
    }

    /// Falhas consecutivas até agora.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn queue_mut(&mut self) -> &mut dyn ReadingQueue {
        self.queue.as_mut()
    }

    /// Fecha a fila. Parte da sequência de parada.
    pub async fn close_store(&mut self) {
        self.queue.close().await;
        debug!("Cache ({}) fechado", self.queue.kind());
    }

    /// Executa um ciclo completo de amostragem e envio.
    pub async fn tick(
        &mut self,
        gas: &GasMailbox,
        humidity: &HumidityMailbox,
        now: DateTime<Utc>,
    ) -> TickOutcome {
        let reading = Reading::from_snapshots(now, gas.get(), humidity.get());
        debug!(
            "Leitura {}: co2={:?} temp={:?} umidade={:?} temp2={:?}",
            reading.created_at(),
            reading.co2,
            reading.temp,
            reading.humidity,
            reading.temp2
        );

        if let Some(log) = self.readings_log.as_mut() {
            if let Err(e) = log.append(&reading) {
                warn!("Erro ao gravar histórico em {}: {e}", log.path().display());
            }
        }

        if !reading.is_complete() {
            debug!("Leitura incompleta, ciclo ignorado");
            return TickOutcome::Skipped;
        }

        let result = match self.settings.mode {
            UploadMode::Bulk => self.deliver_bulk(&reading).await,
            UploadMode::Single => self.deliver_single(&reading).await,
        };

        match result {
            Ok(0) => TickOutcome::Idle,
            Ok(delivered) => {
                if self.failures > 0 {
                    info!(failures = self.failures, "Envio restabelecido");
                }
                self.failures = 0;
                info!(records = delivered, "Enviado ao ThingSpeak");
                TickOutcome::Delivered(delivered)
            }
            Err(e) => self.record_failure(e).await,
        }
    }

    async fn deliver_bulk(&mut self, reading: &Reading) -> Result<usize, DeliveryError> {
        // Entra na fila antes de qualquer chamada de rede
        self.queue.append(reading).await;

        let ip = self.resolver.resolve().await?;
        let status = ip.to_string();

        let batch = self.queue.get_batch(self.settings.batch_limit).await;
        if batch.is_empty() {
            return Ok(0);
        }

        let updates: Vec<Update> = batch.iter().map(|r| r.reading.to_update(&status)).collect();
        self.sink.send_bulk(&updates).await?;
        self.queue.acknowledge().await;
        Ok(updates.len())
    }

    async fn deliver_single(&mut self, reading: &Reading) -> Result<usize, DeliveryError> {
        let ip = self.resolver.resolve().await?;
        let update = reading.to_update(&ip.to_string());
        self.sink.send_single(&update).await?;
        Ok(1)
    }

    async fn record_failure(&mut self, error: DeliveryError) -> TickOutcome {
        self.failures += 1;
        let backlog = match self.settings.mode {
            UploadMode::Bulk => self.queue.backlog().await,
            UploadMode::Single => 0,
        };
        warn!(
            failures = self.failures,
            limit = self.settings.error_limit,
            backlog,
            "Falha no envio: {error}"
        );

        if self.failures >= self.settings.error_limit {
            TickOutcome::ThresholdReached
        } else {
            TickOutcome::Failed
        }
    }

    /// Loop de período fixo até o limite de falhas ou um pedido de parada.
    ///
    /// O tempo gasto no tick é descontado da pausa, então o intervalo entre
    /// inícios de ciclo fica próximo de `pause`.
    pub async fn run(
        &mut self,
        gas: &GasMailbox,
        humidity: &HumidityMailbox,
        shutdown: &Shutdown,
    ) -> ExitReason {
        info!(
            "Ciclo de envio iniciado ({:?}, a cada {}s, limite de {} falhas, cache {})",
            self.settings.mode,
            self.settings.pause.as_secs(),
            self.settings.error_limit,
            self.queue.kind()
        );

        loop {
            if let Some(reason) = shutdown.reason() {
                return reason;
            }

            let start = Instant::now();
            if self.tick(gas, humidity, Utc::now()).await == TickOutcome::ThresholdReached {
                shutdown.request(ExitReason::ThresholdReached);
                return ExitReason::ThresholdReached;
            }

            let remaining = self.settings.pause.saturating_sub(start.elapsed());
            tokio::select! {
                reason = shutdown.wait() => return reason,
                _ = tokio::time::sleep(remaining) => {}
            }
        }
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{MemoryQueue, SqliteQueue};
    use chrono::TimeZone;
    use std::collections::VecDeque;
    use std::net::Ipv4Addr;
    use std::sync::{Arc, Mutex};

    type Calls = Arc<Mutex<Vec<Vec<Update>>>>;

    /// Responde com a próxima resposta roteirizada; 200 quando acabam.
    #[derive(Default)]
    struct FakeSink {
        statuses: Mutex<VecDeque<u16>>,
        calls: Calls,
        /// Tempo "gasto" em cada envio
        latency: Duration,
        /// Instante de cada chamada
        started: Arc<Mutex<Vec<Instant>>>,
        /// Pede parada depois de N chamadas
        stop_after: Option<(usize, Shutdown)>,
    }

    impl FakeSink {
        fn scripted(statuses: &[u16]) -> Self {
            Self {
                statuses: Mutex::new(statuses.iter().copied().collect()),
                ..Default::default()
            }
        }

        async fn respond(&self, updates: Vec<Update>) -> Result<(), DeliveryError> {
            self.started.lock().unwrap().push(Instant::now());
            let count = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(updates);
                calls.len()
            };
            if let Some((limit, shutdown)) = &self.stop_after {
                if count >= *limit {
                    shutdown.request(ExitReason::Interrupted);
                }
            }
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }

            let status = self.statuses.lock().unwrap().pop_front().unwrap_or(200);
            if (200..300).contains(&status) {
                Ok(())
            } else {
                Err(DeliveryError::Status(status))
            }
        }
    }

    #[async_trait]
    impl CloudSink for FakeSink {
        async fn send_single(&self, update: &Update) -> Result<(), DeliveryError> {
            self.respond(vec![update.clone()]).await
        }

        async fn send_bulk(&self, updates: &[Update]) -> Result<(), DeliveryError> {
            self.respond(updates.to_vec()).await
        }
    }

    struct FixedResolver(Option<IpAddr>);

    #[async_trait]
    impl AddressResolver for FixedResolver {
        async fn resolve(&self) -> Result<IpAddr, DeliveryError> {
            self.0.ok_or(DeliveryError::NoRoute)
        }
    }

    fn lan_ip() -> FixedResolver {
        FixedResolver(Some(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20))))
    }

    fn settings(mode: UploadMode, error_limit: u32) -> UploadSettings {
        UploadSettings {
            mode,
            batch_limit: 960,
            pause: Duration::from_secs(30),
            error_limit,
        }
    }

    fn cycle(mode: UploadMode, error_limit: u32, sink: FakeSink) -> UploadCycle {
        UploadCycle::new(
            settings(mode, error_limit),
            Box::new(MemoryQueue::new(960)),
            Box::new(sink),
            Box::new(lan_ip()),
        )
    }

    fn filled() -> (GasMailbox, HumidityMailbox) {
        let gas = GasMailbox::new();
        gas.set(Some(800), Some(21.0));
        let humidity = HumidityMailbox::new();
        humidity.set(Some(45.0), Some(20.5));
        (gas, humidity)
    }

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, 12, minute, 0).unwrap()
    }

    #[tokio::test]
    async fn incomplete_reading_is_skipped() {
        let sink = FakeSink::scripted(&[500]);
        let calls = Arc::clone(&sink.calls);
        let mut cycle = cycle(UploadMode::Bulk, 10, sink);
        let (gas, humidity) = filled();

        assert_eq!(cycle.tick(&gas, &humidity, at(0)).await, TickOutcome::Failed);
        assert_eq!(cycle.failures(), 1);

        let no_humidity = HumidityMailbox::new();
        no_humidity.set(None, Some(20.5));
        assert_eq!(cycle.tick(&gas, &no_humidity, at(1)).await, TickOutcome::Skipped);

        assert_eq!(cycle.failures(), 1);
        assert_eq!(calls.lock().unwrap().len(), 1);
        assert_eq!(cycle.queue_mut().backlog().await, 1);
    }

    #[tokio::test]
    async fn retries_until_accepted() {
        let sink = FakeSink::scripted(&[500, 500, 200]);
        let calls = Arc::clone(&sink.calls);
        let mut cycle = cycle(UploadMode::Bulk, 120, sink);
        let (gas, humidity) = filled();

        assert_eq!(cycle.tick(&gas, &humidity, at(0)).await, TickOutcome::Failed);
        assert_eq!(cycle.tick(&gas, &humidity, at(1)).await, TickOutcome::Failed);
        assert_eq!(cycle.failures(), 2);
        assert_eq!(cycle.queue_mut().backlog().await, 2);

        assert_eq!(cycle.tick(&gas, &humidity, at(2)).await, TickOutcome::Delivered(3));
        assert_eq!(cycle.failures(), 0);
        assert_eq!(cycle.queue_mut().backlog().await, 0);

        let calls = calls.lock().unwrap();
        let sizes: Vec<_> = calls.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![1, 2, 3]);
        let last = &calls[2];
        assert_eq!(last[0].created_at, "2024-03-09 12:00:00");
        assert_eq!(last[2].created_at, "2024-03-09 12:02:00");
        assert!(last.iter().all(|u| u.status == "192.168.1.20"));
        assert_eq!(last[0].field1, Some(800));
        assert_eq!(last[0].field3, Some(45.0));
    }

    #[tokio::test]
    async fn threshold_on_nth_consecutive_failure() {
        let sink = FakeSink::scripted(&[500, 503, 500]);
        let mut cycle = cycle(UploadMode::Bulk, 3, sink);
        let (gas, humidity) = filled();

        assert_eq!(cycle.tick(&gas, &humidity, at(0)).await, TickOutcome::Failed);
        assert_eq!(cycle.tick(&gas, &humidity, at(1)).await, TickOutcome::Failed);
        assert_eq!(
            cycle.tick(&gas, &humidity, at(2)).await,
            TickOutcome::ThresholdReached
        );
        assert_eq!(cycle.failures(), 3);
    }

    #[tokio::test]
    async fn success_resets_the_counter() {
        let sink = FakeSink::scripted(&[500, 500, 200, 500, 500]);
        let mut cycle = cycle(UploadMode::Bulk, 3, sink);
        let (gas, humidity) = filled();

        let mut outcomes = Vec::new();
        for minute in 0..5 {
            outcomes.push(cycle.tick(&gas, &humidity, at(minute)).await);
        }
        assert_eq!(
            outcomes,
            vec![
                TickOutcome::Failed,
                TickOutcome::Failed,
                TickOutcome::Delivered(3),
                TickOutcome::Failed,
                TickOutcome::Failed,
            ]
        );
        assert_eq!(cycle.failures(), 2);
    }

    #[tokio::test]
    async fn missing_ip_counts_without_network_call() {
        let sink = FakeSink::default();
        let calls = Arc::clone(&sink.calls);
        let mut cycle = UploadCycle::new(
            settings(UploadMode::Bulk, 10),
            Box::new(MemoryQueue::new(960)),
            Box::new(sink),
            Box::new(FixedResolver(None)),
        );
        let (gas, humidity) = filled();

        assert_eq!(cycle.tick(&gas, &humidity, at(0)).await, TickOutcome::Failed);
        assert_eq!(cycle.failures(), 1);
        assert!(calls.lock().unwrap().is_empty());
        // A leitura ficou na fila para o próximo ciclo
        assert_eq!(cycle.queue_mut().backlog().await, 1);
    }

    #[tokio::test]
    async fn empty_batch_is_idle() {
        let mut queue = SqliteQueue::open_in_memory().await.unwrap();
        queue.close().await;

        let sink = FakeSink::default();
        let calls = Arc::clone(&sink.calls);
        let mut cycle = UploadCycle::new(
            settings(UploadMode::Bulk, 10),
            Box::new(queue),
            Box::new(sink),
            Box::new(lan_ip()),
        );
        let (gas, humidity) = filled();

        assert_eq!(cycle.tick(&gas, &humidity, at(0)).await, TickOutcome::Idle);
        assert_eq!(cycle.failures(), 0);
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn single_mode_skips_the_queue() {
        let sink = FakeSink::scripted(&[500, 200]);
        let calls = Arc::clone(&sink.calls);
        let mut cycle = cycle(UploadMode::Single, 10, sink);
        let (gas, humidity) = filled();

        assert_eq!(cycle.tick(&gas, &humidity, at(0)).await, TickOutcome::Failed);
        assert_eq!(cycle.queue_mut().backlog().await, 0);
        assert_eq!(cycle.tick(&gas, &humidity, at(1)).await, TickOutcome::Delivered(1));
        assert_eq!(cycle.failures(), 0);

        let calls = calls.lock().unwrap();
        assert_eq!(calls[1].len(), 1);
        assert_eq!(calls[1][0].created_at, "2024-03-09 12:01:00");
    }

    #[tokio::test(start_paused = true)]
    async fn pause_discounts_tick_duration() {
        let shutdown = Shutdown::new();
        let sink = FakeSink {
            latency: Duration::from_secs(10),
            stop_after: Some((3, shutdown.clone())),
            ..Default::default()
        };
        let started = Arc::clone(&sink.started);
        let mut cycle = cycle(UploadMode::Bulk, 10, sink);
        let (gas, humidity) = filled();

        let reason = cycle.run(&gas, &humidity, &shutdown).await;
        assert_eq!(reason, ExitReason::Interrupted);

        let started = started.lock().unwrap();
        assert_eq!(started.len(), 3);
        for pair in started.windows(2) {
            assert_eq!(pair[1] - pair[0], Duration::from_secs(30));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_at_threshold() {
        let shutdown = Shutdown::new();
        let sink = FakeSink::scripted(&[500, 500]);
        let mut cycle = cycle(UploadMode::Bulk, 2, sink);
        let (gas, humidity) = filled();

        let reason = cycle.run(&gas, &humidity, &shutdown).await;
        assert_eq!(reason, ExitReason::ThresholdReached);
        assert_eq!(shutdown.reason(), Some(ExitReason::ThresholdReached));
    }

    #[tokio::test]
    async fn run_returns_pending_request_immediately() {
        let shutdown = Shutdown::new();
        shutdown.request(ExitReason::WorkerAborted);
        let sink = FakeSink::default();
        let calls = Arc::clone(&sink.calls);
        let mut cycle = cycle(UploadMode::Bulk, 2, sink);
        let (gas, humidity) = filled();

        assert_eq!(
            cycle.run(&gas, &humidity, &shutdown).await,
            ExitReason::WorkerAborted
        );
        assert!(calls.lock().unwrap().is_empty());
    }
}

//! Workers de aquisição – uma thread por sensor.
//!
//! Cada worker é dono do seu recurso de hardware durante toda a vida da
//! thread e publica o último valor válido na sua [`Mailbox`](crate::mailbox::Mailbox).
//!
//! O hardware fica atrás de traits ([`GasDevice`], [`HumidityDriver`]) e
//! é mantido dentro de uma [`Claim`], que devolve o recurso exatamente uma
//! vez em qualquer caminho de saída: parada normal, aborto por política,
//! erro ou pânico.
//!
//! Limitação conhecida: um worker bloqueado numa leitura só observa o
//! pedido de parada quando a chamada retorna.

use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::lifecycle::{ExitReason, Shutdown};
use crate::mailbox::{GasMailbox, HumidityMailbox};
use crate::protocol::{self, DecodedMetric, RawFrame};

/// Granularidade com que um worker em pausa observa o pedido de parada.
const STOP_CHECK: Duration = Duration::from_millis(50);

/// Erros de hardware.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("dispositivo não encontrado: {0}")]
    NotFound(String),

    #[error("falha ao preparar o dispositivo: {0}")]
    Setup(String),

    #[error("falha ao armar o dispositivo: {0}")]
    Arm(String),

    #[error("falha de leitura: {0}")]
    Read(String),

    #[error("sensor não configurado")]
    NotConfigured,
}

// ──────────────────────────────────────────────
// Aquisição com escopo
// ──────────────────────────────────────────────

/// Recurso que precisa ser devolvido ao sistema ao fim do uso.
pub trait Release {
    fn release(&mut self);
}

/// Dispositivo adquirido. `Drop` chama [`Release::release`] uma única vez.
pub struct Claim<D: Release> {
    device: D,
}

impl<D: Release> Claim<D> {
    pub fn new(device: D) -> Self {
        Self { device }
    }
}

impl<D: Release> Deref for Claim<D> {
    type Target = D;

    fn deref(&self) -> &D {
        &self.device
    }
}

impl<D: Release> DerefMut for Claim<D> {
    fn deref_mut(&mut self) -> &mut D {
        &mut self.device
    }
}

impl<D: Release> Drop for Claim<D> {
    fn drop(&mut self) {
        self.device.release();
    }
}

// ──────────────────────────────────────────────
// Hardware
// ──────────────────────────────────────────────

/// Sensor de gás USB (MT8057).
pub trait GasDevice: Release + Send {
    /// Escrita única da sequência de armação.
    fn arm(&mut self) -> Result<(), DeviceError>;

    /// Leitura bloqueante de um frame. `Ok(None)` = timeout sem dados.
    fn read_frame(&mut self) -> Result<Option<RawFrame>, DeviceError>;
}

/// Driver do sensor de umidade com retry interno.
pub trait HumidityDriver: Release + Send {
    /// `(umidade %, temperatura °C)`; qualquer um pode vir ausente.
    fn read_retry(&mut self) -> Result<(Option<f64>, Option<f64>), DeviceError>;
}

/// O que fazer quando a leitura do sensor de gás falha.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadFailurePolicy {
    /// Loga e continua lendo
    Continue,
    /// Loga, encerra o worker e pede o desligamento do processo
    #[default]
    Abort,
}

// ──────────────────────────────────────────────
// Workers
// ──────────────────────────────────────────────

/// Handle de um worker em execução.
pub struct WorkerHandle {
    name: String,
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl WorkerHandle {
    fn spawn<F>(name: &str, body: F) -> std::io::Result<Self>
    where
        F: FnOnce(&AtomicBool) + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let thread = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(flag.as_ref()))?;

        Ok(Self {
            name: name.to_string(),
            stop,
            thread,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pede a parada cooperativa (checada antes de cada iteração).
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Aguarda a thread terminar (e liberar o hardware).
    pub fn join(self) {
        if self.thread.join().is_err() {
            error!("Worker {} terminou em pânico", self.name);
        }
    }
}

/// Inicia o worker do MT8057.
///
/// Arma o dispositivo uma vez e lê frames até o pedido de parada.
pub fn spawn_gas_worker<D>(
    device: Claim<D>,
    mailbox: Arc<GasMailbox>,
    policy: ReadFailurePolicy,
    shutdown: Shutdown,
) -> std::io::Result<WorkerHandle>
where
    D: GasDevice + 'static,
{
    WorkerHandle::spawn("mt8057", move |stop| {
        let mut device = device;
        gas_loop(&mut device, &mailbox, policy, &shutdown, stop);
        drop(device);
        info!("MT8057 parado");
    })
}

fn gas_loop<D: GasDevice>(
    device: &mut Claim<D>,
    mailbox: &GasMailbox,
    policy: ReadFailurePolicy,
    shutdown: &Shutdown,
    stop: &AtomicBool,
) {
    if let Err(e) = device.arm() {
        error!("MT8057: {e}");
        shutdown.request(ExitReason::WorkerAborted);
        return;
    }

    while !stop.load(Ordering::SeqCst) {
        match device.read_frame() {
            Ok(Some(frame)) => match protocol::decode(&frame) {
                Some(DecodedMetric::Concentration(ppm)) => {
                    debug!("CO2 {ppm} ppm");
                    mailbox.set_first(ppm);
                }
                Some(DecodedMetric::Temperature(celsius)) => {
                    debug!("Temperatura {celsius:.2}°C");
                    mailbox.set_second(celsius);
                }
                None => {}
            },
            Ok(None) => {}
            Err(e) => match policy {
                ReadFailurePolicy::Continue => warn!("Erro de leitura USB: {e}"),
                ReadFailurePolicy::Abort => {
                    error!("Erro de leitura USB: {e}");
                    shutdown.request(ExitReason::WorkerAborted);
                    return;
                }
            },
        }
    }
}

/// Inicia o worker do sensor de umidade. Falhas nunca derrubam o processo.
///
/// Cada leitura começa no mínimo `poll` depois da anterior.
pub fn spawn_humidity_worker<D>(
    driver: Claim<D>,
    mailbox: Arc<HumidityMailbox>,
    poll: Duration,
) -> std::io::Result<WorkerHandle>
where
    D: HumidityDriver + 'static,
{
    WorkerHandle::spawn("dht", move |stop| {
        let mut driver = driver;
        while !stop.load(Ordering::SeqCst) {
            let started = Instant::now();
            match driver.read_retry() {
                Ok((Some(humidity), Some(temperature))) if (0.0..=100.0).contains(&humidity) => {
                    debug!("Umidade {humidity:.1}% {temperature:.1}°C");
                    mailbox.set(Some(humidity), Some(temperature));
                }
                Ok(values) => debug!("Leitura de umidade descartada: {values:?}"),
                Err(e) => warn!("Erro de leitura de umidade: {e}"),
            }
            sleep_until_next(stop, started, poll);
        }
        drop(driver);
        info!("Sensor de umidade parado");
    })
}

/// Dorme até `started + period` em fatias curtas, saindo cedo na parada.
fn sleep_until_next(stop: &AtomicBool, started: Instant, period: Duration) {
    loop {
        if stop.load(Ordering::SeqCst) {
            return;
        }
        let elapsed = started.elapsed();
        if elapsed >= period {
            return;
        }
        std::thread::sleep((period - elapsed).min(STOP_CHECK));
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

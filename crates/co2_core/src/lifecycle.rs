//! Ciclo de vida do processo: token de desligamento e sequência de parada.
//!
//! Ordem obrigatória ao encerrar (sinal, worker abortado ou limite de
//! falhas atingido):
//!
//! 1. sinalizar todos os workers
//! 2. aguardar todos (liberação da interface USB / driver do kernel)
//! 3. fechar o cache durável
//! 4. só então, se for o caso, pedir o restart do host

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::sensor::WorkerHandle;

/// Motivo pelo qual o loop principal terminou.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// SIGINT / SIGTERM
    Interrupted,
    /// Um worker abortou por política de falha de leitura
    WorkerAborted,
    /// Falhas de envio consecutivas chegaram ao limite
    ThresholdReached,
}

impl ExitReason {
    /// Só o limite de falhas leva ao restart do host.
    pub fn requires_restart(self) -> bool {
        matches!(self, ExitReason::ThresholdReached)
    }
}

/// Pedido de desligamento compartilhado entre threads e tasks.
///
/// Guarda apenas o primeiro motivo recebido.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<Option<ExitReason>>>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Registra o pedido. Pedidos posteriores não sobrescrevem o primeiro.
    pub fn request(&self, reason: ExitReason) {
        self.tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        });
    }

    pub fn reason(&self) -> Option<ExitReason> {
        *self.tx.borrow()
    }

    /// Aguarda até que algum pedido seja registrado.
    pub async fn wait(&self) -> ExitReason {
        let mut rx = self.tx.subscribe();
        let reason = match rx.wait_for(Option::is_some).await {
            Ok(current) => *current,
            // O sender vive em `self`, não fecha enquanto aguardamos
            Err(_) => None,
        };
        reason.unwrap_or(ExitReason::Interrupted)
    }
}

/// Erro ao executar a ação terminal.
#[derive(Debug, thiserror::Error)]
pub enum SystemError {
    #[error("comando de restart vazio")]
    EmptyCommand,

    #[error("falha ao executar {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} terminou com {status}")]
    Failed { command: String, status: String },
}

/// Colaborador de sistema: a ação terminal de recuperação.
pub trait SystemControl {
    /// Pede o restart completo do host.
    fn request_restart(&self) -> Result<(), SystemError>;
}

/// Encerra o processo na ordem segura e executa a ação terminal se preciso.
pub fn shut_down<F>(
    reason: ExitReason,
    workers: Vec<WorkerHandle>,
    close_store: F,
    system: &dyn SystemControl,
) -> Result<(), SystemError>
where
    F: FnOnce(),
{
    info!("Encerrando ({reason:?})");

    for worker in &workers {
        info!("{} parando...", worker.name());
        worker.stop();
    }
    for worker in workers {
        worker.join();
    }

    close_store();
    info!("Daemon CO2 parado");

    if reason.requires_restart() {
        warn!("Limite de falhas atingido – reiniciando o sistema...");
        if let Err(e) = system.request_restart() {
            error!("Falha ao pedir restart: {e}");
            return Err(e);
        }
    }

    Ok(())
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::HumidityMailbox;
    use crate::sensor::tests::{Events, ScriptedHumidity};
    use crate::sensor::{Claim, spawn_humidity_worker};
    use std::sync::Mutex;

    struct RecordingSystem {
        events: Events,
    }

    impl SystemControl for RecordingSystem {
        fn request_restart(&self) -> Result<(), SystemError> {
            self.events.lock().unwrap().push("restart".into());
            Ok(())
        }
    }

    fn spawn_worker(events: &Events, name: &str) -> WorkerHandle {
        let driver = ScriptedHumidity::endless(name, Arc::clone(events));
        spawn_humidity_worker(
            Claim::new(driver),
            Arc::new(HumidityMailbox::new()),
            std::time::Duration::ZERO,
        )
        .expect("spawn")
    }

    #[test]
    fn first_reason_wins() {
        let shutdown = Shutdown::new();
        assert_eq!(shutdown.reason(), None);
        shutdown.request(ExitReason::WorkerAborted);
        shutdown.request(ExitReason::Interrupted);
        assert_eq!(shutdown.reason(), Some(ExitReason::WorkerAborted));
    }

    #[tokio::test]
    async fn wait_wakes_on_request() {
        let shutdown = Shutdown::new();
        let remote = shutdown.clone();
        let waiter = tokio::spawn(async move { remote.wait().await });
        tokio::task::yield_now().await;
        shutdown.request(ExitReason::ThresholdReached);
        assert_eq!(waiter.await.unwrap(), ExitReason::ThresholdReached);
    }

    #[tokio::test]
    async fn wait_returns_immediately_when_already_requested() {
        let shutdown = Shutdown::new();
        shutdown.request(ExitReason::Interrupted);
        assert_eq!(shutdown.wait().await, ExitReason::Interrupted);
    }

    #[test]
    fn threshold_shutdown_order() {
        let events: Events = Arc::new(Mutex::new(Vec::new()));
        let workers = vec![spawn_worker(&events, "a"), spawn_worker(&events, "b")];
        let system = RecordingSystem {
            events: Arc::clone(&events),
        };

        let store_events = Arc::clone(&events);
        shut_down(
            ExitReason::ThresholdReached,
            workers,
            move || store_events.lock().unwrap().push("store".into()),
            &system,
        )
        .unwrap();

        let log = events.lock().unwrap().clone();
        assert_eq!(log.len(), 4, "{log:?}");
        assert!(log[..2].contains(&"release a".to_string()), "{log:?}");
        assert!(log[..2].contains(&"release b".to_string()), "{log:?}");
        assert_eq!(&log[2..], &["store".to_string(), "restart".to_string()]);
    }

    #[test]
    fn interrupt_does_not_restart() {
        let events: Events = Arc::new(Mutex::new(Vec::new()));
        let workers = vec![spawn_worker(&events, "a")];
        let system = RecordingSystem {
            events: Arc::clone(&events),
        };

        shut_down(ExitReason::Interrupted, workers, || {}, &system).unwrap();

        let log = events.lock().unwrap();
        assert!(log.contains(&"release a".to_string()));
        assert!(!log.contains(&"restart".to_string()));
    }
}

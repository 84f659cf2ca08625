//! # CO2 Core
//!
//! Crate compartilhada do daemon de CO2: protocolo do MT8057, workers dos
//! sensores, fila store-and-forward e ciclo de envio ao ThingSpeak.
//!
//! ## Módulos
//! - [`protocol`] – Decodificação dos frames ofuscados do MT8057
//! - [`types`] – Leitura composta e payloads do ThingSpeak
//! - [`mailbox`] – Último valor de cada sensor
//! - [`sensor`] – Workers, posse exclusiva do dispositivo e política de falha
//! - [`queue`] – Cache SQLite com fallback em memória
//! - [`upload`] – Ciclo periódico de envio e contador de falhas
//! - [`lifecycle`] – Token de desligamento e parada ordenada
//! - [`history`] – Histórico CSV das leituras
//! - [`config`] – Configuração unificada via TOML

pub mod types;
pub mod protocol;
pub mod mailbox;
pub mod sensor;
pub mod queue;
pub mod upload;
pub mod lifecycle;
pub mod history;
pub mod config;

// Re-exports convenientes
pub use types::{Reading, Update};
pub use protocol::{decode, DecodedMetric, RawFrame};
pub use config::AppConfig;
pub use lifecycle::{ExitReason, Shutdown};

//! # CO2 Daemon
//!
//! Lê o MT8057 (CO2 + temperatura, USB) e um DHT (umidade + temperatura,
//! GPIO) e envia as leituras ao ThingSpeak, com cache SQLite enquanto a
//! rede estiver fora. Falhas de envio consecutivas demais reiniciam o host.
//!
//! Requer root para desanexar o driver HID do kernel e para o reboot.
//!
//! ## Uso
//! ```bash
//! sudo co2_daemon                              # config.toml ao lado do executável
//! sudo co2_daemon --config /etc/co2/config.toml
//! RUST_LOG=debug sudo co2_daemon               # payloads completos
//! ```

mod args;
mod dht;
mod mt8057;
mod net;
mod system;
mod thingspeak;

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use co2_core::config::AppConfig;
use co2_core::history::ReadingsLog;
use co2_core::lifecycle::{self, ExitReason, Shutdown};
use co2_core::mailbox::{GasMailbox, HumidityMailbox};
use co2_core::queue::open_queue;
use co2_core::sensor::{self, Claim, WorkerHandle};
use co2_core::upload::{UploadCycle, UploadSettings};
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Registry, reload};

use args::Args;
use dht::IioHumidity;
use mt8057::Mt8057;
use net::OutboundAddress;
use system::RestartCommand;
use thingspeak::ThingSpeak;

type FilterHandle = reload::Handle<EnvFilter, Registry>;

fn main() -> ExitCode {
    // ── Logging ──
    let filter = init_logging();
    let args = Args::parse();

    match run(args, filter.as_ref()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

/// `RUST_LOG` tem prioridade; sem ele, `info` (ou `debug` via config).
fn init_logging() -> Option<FilterHandle> {
    let from_env = EnvFilter::try_from_default_env().ok();
    let overridable = from_env.is_none();
    let (filter, handle) = reload::Layer::new(from_env.unwrap_or_else(|| "info".into()));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    overridable.then_some(handle)
}

fn run(args: Args, filter: Option<&FilterHandle>) -> Result<()> {
    // ── Carregar config ──
    let config_path = args.config.unwrap_or_else(AppConfig::default_path);
    let config = AppConfig::load(&config_path);

    // Salva config padrão se não existir
    if !config_path.exists() {
        if let Err(e) = config.save(&config_path) {
            warn!("Não foi possível salvar config padrão: {e}");
        }
    }

    if config.daemon.debug {
        if let Some(handle) = filter {
            if let Err(e) = handle.reload(EnvFilter::new("debug")) {
                warn!("Não foi possível ativar o log debug: {e}");
            }
        }
    }

    let errors = config.validate();
    if !errors.is_empty() {
        for e in &errors {
            error!("{e}");
        }
        bail!("configuração inválida em {}", config_path.display());
    }

    if !system::is_root() {
        warn!("Sem privilégios de root: o acesso USB e o reboot podem falhar");
    }

    let cloud = &config.cloud;
    let endpoint = cloud.endpoint().context("nenhum endpoint do ThingSpeak")?;
    let settings = UploadSettings::from_config(cloud, &config.cache)
        .context("nenhum endpoint do ThingSpeak")?;
    let timeout = Duration::from_secs_f64(cloud.timeout_secs);

    // ── Sensores ──
    let gas = Mt8057::open(Duration::from_millis(config.gas.read_timeout_ms))
        .context("falha ao abrir o MT8057")?;
    let gas = Claim::new(gas);
    info!("MT8057 inicializado");

    let humidity = IioHumidity::open(&config.humidity)
        .context("falha ao abrir o sensor de umidade")?;
    let humidity = Claim::new(humidity);
    info!("Sensor de umidade inicializado");

    let shutdown = Shutdown::new();
    let gas_mailbox = Arc::new(GasMailbox::new());
    let humidity_mailbox = Arc::new(HumidityMailbox::new());

    let workers = spawn_workers(
        gas,
        humidity,
        &gas_mailbox,
        &humidity_mailbox,
        &config,
        &shutdown,
    )?;

    // ── Runtime / cache / nuvem ──
    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            stop_workers(workers);
            return Err(e).context("falha ao criar o runtime tokio");
        }
    };

    let sink = match ThingSpeak::new(endpoint.clone(), &cloud.api_key, timeout) {
        Ok(sink) => sink,
        Err(e) => {
            stop_workers(workers);
            return Err(e).context("falha ao criar o cliente HTTP");
        }
    };

    let queue = rt.block_on(open_queue(&config.cache));
    let resolver = OutboundAddress::new(&cloud.route_target, timeout);
    let mut cycle = UploadCycle::new(settings, queue, Box::new(sink), Box::new(resolver));

    if !config.daemon.readings_log.is_empty() {
        let path = Path::new(&config.daemon.readings_log);
        match ReadingsLog::open(path) {
            Ok(log) => cycle = cycle.with_readings_log(log),
            Err(e) => warn!("Histórico desativado: {e}"),
        }
    }

    // ── Banner ──
    println!();
    println!("══════════════════════════════════════════════");
    println!("   CO2 DAEMON – ATIVO (Rust)");
    println!("══════════════════════════════════════════════");
    println!("  Destino:   {}", endpoint.url());
    println!("  Intervalo: {}s", cloud.pause_secs);
    println!("  Limite:    {} falhas", cloud.error_limit);
    println!("══════════════════════════════════════════════");
    println!();

    // ── Loop principal ──
    let reason = rt.block_on(async {
        tokio::spawn(watch_signals(shutdown.clone()));
        cycle
            .run(&gas_mailbox, &humidity_mailbox, &shutdown)
            .await
    });

    let restart = RestartCommand::new(config.daemon.restart_command.clone());
    lifecycle::shut_down(
        reason,
        workers,
        || rt.block_on(cycle.close_store()),
        &restart,
    )
    .context("falha ao reiniciar o sistema")?;

    if reason == ExitReason::WorkerAborted {
        bail!("sensor de gás abortou");
    }
    Ok(())
}

fn spawn_workers(
    gas: Claim<Mt8057>,
    humidity: Claim<IioHumidity>,
    gas_mailbox: &Arc<GasMailbox>,
    humidity_mailbox: &Arc<HumidityMailbox>,
    config: &AppConfig,
    shutdown: &Shutdown,
) -> Result<Vec<WorkerHandle>> {
    let gas_worker = sensor::spawn_gas_worker(
        gas,
        Arc::clone(gas_mailbox),
        config.gas.on_read_error,
        shutdown.clone(),
    )
    .context("falha ao iniciar a thread do MT8057")?;

    match sensor::spawn_humidity_worker(
        humidity,
        Arc::clone(humidity_mailbox),
        config.humidity.poll_period(),
    ) {
        Ok(humidity_worker) => Ok(vec![gas_worker, humidity_worker]),
        Err(e) => {
            stop_workers(vec![gas_worker]);
            Err(e).context("falha ao iniciar a thread do sensor de umidade")
        }
    }
}

fn stop_workers(workers: Vec<WorkerHandle>) {
    for worker in &workers {
        worker.stop();
    }
    for worker in workers {
        worker.join();
    }
}

// ──────────────────────────────────────────────
// Sinais
// ──────────────────────────────────────────────

async fn watch_signals(shutdown: Shutdown) {
    let name = wait_for_signal().await;
    info!(signal = name, "Sinal recebido");
    shutdown.request(ExitReason::Interrupted);
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => tokio::select! {
            _ = ctrl_c() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
        },
        Err(e) => {
            warn!("SIGTERM indisponível: {e}");
            ctrl_c().await;
            "SIGINT"
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    ctrl_c().await;
    "SIGINT"
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Ctrl+C indisponível: {e}");
        std::future::pending::<()>().await;
    }
}

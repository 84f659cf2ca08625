use std::path::PathBuf;

use clap::Parser;

/// Daemon de telemetria de CO2 (MT8057 + DHT) para o ThingSpeak.
#[derive(Debug, Parser)]
#[command(version)]
pub struct Args {
    /// Caminho do config.toml (padrão: ao lado do executável)
    #[arg(long, env = "CO2_CONFIG")]
    pub config: Option<PathBuf>,
}

//! Configuração unificada via TOML.
//!
//! Um único `config.toml` ao lado do executável. Campos ausentes usam os
//! valores padrão; a configuração é imutável durante a vida do processo.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::sensor::ReadFailurePolicy;
use crate::upload::UploadMode;

/// Marcador de canal deixado em exemplos de URL.
const CHANNEL_PLACEHOLDER: &str = "CHANNEL_ID";

/// Tamanho padrão do lote / do buffer em memória.
pub const DEFAULT_BULK_SIZE: usize = 960;

/// Destino na nuvem (ThingSpeak).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    /// Write API key do canal
    pub api_key: String,
    /// Endpoint de registro único (form-encoded)
    pub url: String,
    /// Endpoint de envio em lote (JSON), p.ex.
    /// `https://api.thingspeak.com/channels/<id>/bulk_update.json`.
    /// Tem prioridade sobre `url`.
    pub bulk_url: String,
    /// Intervalo entre envios (segundos)
    pub pause_secs: u64,
    /// Falhas consecutivas até reiniciar o host
    pub error_limit: u32,
    /// Timeout por requisição (segundos)
    pub timeout_secs: f64,
    /// Destino usado só para descobrir o IP de saída (nenhum pacote é enviado)
    pub route_target: String,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            url: String::new(),
            bulk_url: String::new(),
            pause_secs: 30,
            error_limit: 120,
            timeout_secs: 5.0,
            route_target: "8.8.8.8:80".into(),
        }
    }
}

/// Endpoint efetivo, escolhido uma vez.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Bulk(String),
    Single(String),
}

impl Endpoint {
    pub fn url(&self) -> &str {
        match self {
            Endpoint::Bulk(url) | Endpoint::Single(url) => url,
        }
    }

    pub fn mode(&self) -> UploadMode {
        match self {
            Endpoint::Bulk(_) => UploadMode::Bulk,
            Endpoint::Single(_) => UploadMode::Single,
        }
    }
}

impl CloudConfig {
    /// `bulk_url` tem prioridade; `None` se nenhum estiver configurado.
    pub fn endpoint(&self) -> Option<Endpoint> {
        if !self.bulk_url.is_empty() {
            Some(Endpoint::Bulk(self.bulk_url.clone()))
        } else if !self.url.is_empty() {
            Some(Endpoint::Single(self.url.clone()))
        } else {
            None
        }
    }
}

/// Sensor de gás USB.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GasConfig {
    /// Timeout de cada leitura USB (ms); 0 = bloqueia indefinidamente
    pub read_timeout_ms: u64,
    /// Política para falhas de leitura: "abort" ou "continue"
    pub on_read_error: ReadFailurePolicy,
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: 1000,
            on_read_error: ReadFailurePolicy::Abort,
        }
    }
}

/// Modelos de sensor de umidade suportados.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HumidityModel {
    Dht11,
    Dht22,
    Am2302,
}

impl HumidityModel {
    /// Código numérico usado no config (0 = sem sensor).
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            11 => Some(HumidityModel::Dht11),
            22 => Some(HumidityModel::Dht22),
            2302 => Some(HumidityModel::Am2302),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HumidityModel::Dht11 => "DHT11",
            HumidityModel::Dht22 => "DHT22",
            HumidityModel::Am2302 => "AM2302",
        }
    }
}

/// Sensor de umidade no GPIO.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HumidityConfig {
    /// 11, 22 ou 2302 (0 = nenhum)
    pub sensor: u16,
    /// Pino GPIO (BCM)
    pub gpio: u8,
    /// Raiz dos dispositivos IIO do kernel
    pub iio_root: PathBuf,
    /// Tentativas por leitura
    pub retries: u32,
    /// Pausa entre tentativas (segundos)
    pub retry_delay_secs: f64,
    /// Intervalo mínimo entre leituras (segundos); o DHT22 amostra a cada 2 s
    pub poll_secs: f64,
}

impl Default for HumidityConfig {
    fn default() -> Self {
        Self {
            sensor: 22,
            gpio: 17,
            iio_root: PathBuf::from("/sys/bus/iio/devices"),
            retries: 15,
            retry_delay_secs: 2.0,
            poll_secs: 2.0,
        }
    }
}

impl HumidityConfig {
    pub fn model(&self) -> Option<HumidityModel> {
        HumidityModel::from_code(self.sensor)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.retry_delay_secs).unwrap_or(Duration::ZERO)
    }

    pub fn poll_period(&self) -> Duration {
        Duration::try_from_secs_f64(self.poll_secs).unwrap_or(Duration::from_secs(2))
    }
}

/// Cache local de leituras.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Arquivo SQLite (relativo ao executável se não for absoluto)
    pub path: PathBuf,
    /// Registros por lote e limite do buffer em memória (0 = padrão)
    pub max_bulk_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("thingspeak_cache.sqlite"),
            max_bulk_size: DEFAULT_BULK_SIZE,
        }
    }
}

impl CacheConfig {
    pub fn limit(&self) -> usize {
        if self.max_bulk_size == 0 {
            DEFAULT_BULK_SIZE
        } else {
            self.max_bulk_size
        }
    }

    pub fn resolved_path(&self) -> PathBuf {
        if self.path.is_absolute() {
            self.path.clone()
        } else {
            exe_dir().join(&self.path)
        }
    }
}

/// Opções gerais do daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Log em nível debug (payloads completos)
    pub debug: bool,
    /// CSV com uma linha por ciclo (vazio = desativado)
    pub readings_log: String,
    /// Comando da ação terminal
    pub restart_command: Vec<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            debug: false,
            readings_log: String::new(),
            restart_command: vec!["sudo".into(), "reboot".into()],
        }
    }
}

/// Configuração raiz do daemon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub cloud: CloudConfig,
    pub gas: GasConfig,
    pub humidity: HumidityConfig,
    pub cache: CacheConfig,
    pub daemon: DaemonConfig,
}

impl AppConfig {
    /// Carrega configuração de um arquivo TOML.
    pub fn load(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(content) => match toml::from_str::<AppConfig>(&content) {
                    Ok(config) => {
                        info!("Configuração carregada de {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        warn!("Erro ao parsear {}: {}", path.display(), e);
                    }
                },
                Err(e) => {
                    warn!("Erro ao ler {}: {}", path.display(), e);
                }
            }
        }

        info!("Usando configuração padrão");
        AppConfig::default()
    }

    /// Salva configuração em arquivo TOML.
    pub fn save(&self, path: &Path) -> Result<(), String> {
        let content = toml::to_string_pretty(self).map_err(|e| e.to_string())?;
        std::fs::write(path, content).map_err(|e| e.to_string())?;
        info!("Configuração salva em {}", path.display());
        Ok(())
    }

    /// Retorna o caminho padrão do config.toml.
    pub fn default_path() -> PathBuf {
        exe_dir().join("config.toml")
    }

    /// Valida a configuração e retorna lista de erros.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let cloud = &self.cloud;

        if cloud.api_key.is_empty() {
            errors.push("Chave do ThingSpeak (cloud.api_key) não encontrada".into());
        }
        match cloud.endpoint() {
            None => errors.push("Nenhuma URL do ThingSpeak configurada (cloud.url / cloud.bulk_url)".into()),
            Some(endpoint) => {
                let url = endpoint.url();
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    errors.push(format!("URL inválida: {url} (deve começar com http:// ou https://)"));
                }
                if url.contains(CHANNEL_PLACEHOLDER) {
                    errors.push(format!("URL com {CHANNEL_PLACEHOLDER} não substituído: {url}"));
                }
            }
        }
        if cloud.pause_secs == 0 {
            errors.push("cloud.pause_secs deve ser maior que 0".into());
        }
        if cloud.error_limit == 0 {
            errors.push("cloud.error_limit deve ser maior que 0".into());
        }
        if !(cloud.timeout_secs > 0.0 && cloud.timeout_secs <= 60.0) {
            errors.push(format!(
                "Timeout inválido: {} (0–60s)",
                cloud.timeout_secs
            ));
        }
        if self.humidity.model().is_none() {
            errors.push(format!(
                "Sensor de umidade inválido: {} (11, 22 ou 2302)",
                self.humidity.sensor
            ));
        }
        let humidity = &self.humidity;
        if !(1..=100).contains(&humidity.retries) {
            errors.push(format!("humidity.retries inválido: {} (1–100)", humidity.retries));
        }
        if !(0.0..=60.0).contains(&humidity.retry_delay_secs) {
            errors.push(format!(
                "humidity.retry_delay_secs inválido: {} (0–60s)",
                humidity.retry_delay_secs
            ));
        }
        if !(1.0..=3600.0).contains(&humidity.poll_secs) {
            errors.push(format!(
                "humidity.poll_secs inválido: {} (1–3600s)",
                humidity.poll_secs
            ));
        }
        if self.daemon.restart_command.is_empty() {
            errors.push("daemon.restart_command não pode ser vazio".into());
        }

        errors
    }
}

fn exe_dir() -> PathBuf {
    std::env::current_exe()
        .map(|p| p.parent().unwrap_or(Path::new(".")).to_path_buf())
        .unwrap_or_else(|_| PathBuf::from("."))
}

//! Sensor de umidade DHT11/DHT22/AM2302 via driver IIO do kernel.
//!
//! Requer o overlay `dht11` (`dtoverlay=dht11,gpiopin=N`). O driver atende os
//! três modelos; os valores chegam em mili-unidades e a leitura falha com
//! frequência (EIO), por isso o retry.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use co2_core::config::{HumidityConfig, HumidityModel};
use co2_core::sensor::{DeviceError, HumidityDriver, Release};
use tracing::{debug, info};

const HUMIDITY_FILE: &str = "in_humidityrelative_input";
const TEMPERATURE_FILE: &str = "in_temp_input";

pub struct IioHumidity {
    device: PathBuf,
    model: HumidityModel,
    retries: u32,
    retry_delay: Duration,
}

impl IioHumidity {
    pub fn open(config: &HumidityConfig) -> Result<Self, DeviceError> {
        let model = config.model().ok_or(DeviceError::NotConfigured)?;
        let device = find_device(&config.iio_root, config.gpio)?;
        info!(
            "✓ {} no GPIO {} ({})",
            model.as_str(),
            config.gpio,
            device.display()
        );

        Ok(Self {
            device,
            model,
            retries: config.retries.max(1),
            retry_delay: config.retry_delay(),
        })
    }

    fn read_once(&self) -> Result<(f64, f64), String> {
        let humidity = read_milli(&self.device.join(HUMIDITY_FILE))?;
        let temperature = read_milli(&self.device.join(TEMPERATURE_FILE))?;
        Ok((humidity, temperature))
    }
}

impl HumidityDriver for IioHumidity {
    fn read_retry(&mut self) -> Result<(Option<f64>, Option<f64>), DeviceError> {
        let mut last_error = String::new();
        for attempt in 1..=self.retries {
            match self.read_once() {
                Ok((humidity, temperature)) => return Ok((Some(humidity), Some(temperature))),
                Err(e) => {
                    debug!("{} tentativa {attempt}/{}: {e}", self.model.as_str(), self.retries);
                    last_error = e;
                }
            }
            if attempt < self.retries {
                std::thread::sleep(self.retry_delay);
            }
        }
        Err(DeviceError::Read(format!(
            "{} sem leitura após {} tentativas: {last_error}",
            self.model.as_str(),
            self.retries
        )))
    }
}

impl Release for IioHumidity {
    fn release(&mut self) {
        debug!("{} liberado", self.model.as_str());
    }
}

/// Dispositivo `dht11@<gpio hex>`; sem correspondência, o primeiro `dht11`.
fn find_device(root: &Path, gpio: u8) -> Result<PathBuf, DeviceError> {
    let entries = fs::read_dir(root)
        .map_err(|e| DeviceError::NotFound(format!("{}: {e}", root.display())))?;

    let wanted = format!("dht11@{gpio:x}");
    let mut candidates: Vec<(PathBuf, String)> = entries
        .flatten()
        .filter_map(|entry| {
            let path = entry.path();
            let name = fs::read_to_string(path.join("name")).ok()?;
            let name = name.trim().to_string();
            name.starts_with("dht11").then_some((path, name))
        })
        .collect();
    candidates.sort();

    if let Some((path, _)) = candidates.iter().find(|(_, name)| *name == wanted) {
        return Ok(path.clone());
    }
    candidates
        .into_iter()
        .next()
        .map(|(path, name)| {
            debug!("{wanted} não encontrado, usando {name}");
            path
        })
        .ok_or_else(|| DeviceError::NotFound(format!("nenhum dispositivo dht11 em {}", root.display())))
}

fn read_milli(path: &Path) -> Result<f64, String> {
    let raw = fs::read_to_string(path).map_err(|e| format!("{}: {e}", path.display()))?;
    let value: i64 = raw
        .trim()
        .parse()
        .map_err(|e| format!("{}: {e}", path.display()))?;
    Ok(value as f64 / 1000.0)
}

//! Leituras compostas e registros enviados ao ThingSpeak.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Formato de `created_at` aceito pelo ThingSpeak (UTC).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ──────────────────────────────────────────────
// Leitura composta
// ──────────────────────────────────────────────

/// Snapshot dos dois sensores num instante.
///
/// Qualquer campo pode estar ausente enquanto o sensor correspondente
/// ainda não produziu um valor válido.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub timestamp: DateTime<Utc>,
    /// CO2 (ppm) – MT8057
    pub co2: Option<u16>,
    /// Temperatura do MT8057 (°C)
    pub temp: Option<f64>,
    /// Umidade relativa (0–100%) – DHT
    pub humidity: Option<f64>,
    /// Temperatura do DHT (°C)
    pub temp2: Option<f64>,
}

impl Reading {
    /// Monta a leitura a partir dos snapshots das duas mailboxes.
    pub fn from_snapshots(
        timestamp: DateTime<Utc>,
        (co2, temp): (Option<u16>, Option<f64>),
        (humidity, temp2): (Option<f64>, Option<f64>),
    ) -> Self {
        Self {
            timestamp,
            co2,
            temp,
            humidity,
            temp2,
        }
    }

    /// `true` só quando as quatro métricas estão presentes.
    pub fn is_complete(&self) -> bool {
        self.co2.is_some() && self.temp.is_some() && self.humidity.is_some() && self.temp2.is_some()
    }

    /// `created_at` no formato do ThingSpeak.
    pub fn created_at(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }

    /// Registro de envio com o IP de origem em `status`.
    pub fn to_update(&self, status: &str) -> Update {
        Update {
            created_at: self.created_at(),
            field1: self.co2,
            field2: self.temp,
            field3: self.humidity,
            field4: self.temp2,
            status: status.to_string(),
        }
    }
}

/// Converte `created_at` de volta para UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

// ──────────────────────────────────────────────
// Cache
// ──────────────────────────────────────────────

/// Leitura persistida na fila, com identificador atribuído pelo backend.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueRecord {
    pub id: i64,
    pub reading: Reading,
}

// ──────────────────────────────────────────────
// Payloads HTTP
// ──────────────────────────────────────────────

/// Um registro no formato de campos do canal ThingSpeak.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Update {
    pub created_at: String,
    /// CO2 (ppm)
    pub field1: Option<u16>,
    /// Temperatura MT8057 (°C)
    pub field2: Option<f64>,
    /// Umidade (%)
    pub field3: Option<f64>,
    /// Temperatura DHT (°C)
    pub field4: Option<f64>,
    /// IP de origem
    pub status: String,
}

/// Corpo JSON do endpoint de envio em lote.
#[derive(Debug, Serialize)]
pub struct BulkUpdate<'a> {
    pub write_api_key: &'a str,
    pub updates: &'a [Update],
}

/// Corpo form-encoded do endpoint de registro único.
#[derive(Debug, Serialize)]
pub struct SingleUpdate<'a> {
    pub api_key: &'a str,
    pub created_at: &'a str,
    pub field1: Option<u16>,
    pub field2: Option<f64>,
    pub field3: Option<f64>,
    pub field4: Option<f64>,
    pub status: &'a str,
}

impl<'a> SingleUpdate<'a> {
    pub fn new(api_key: &'a str, update: &'a Update) -> Self {
        Self {
            api_key,
            created_at: &update.created_at,
            field1: update.field1,
            field2: update.field2,
            field3: update.field3,
            field4: update.field4,
            status: &update.status,
        }
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> Reading {
        Reading {
            timestamp: Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 0).unwrap(),
            co2: Some(812),
            temp: Some(23.5),
            humidity: Some(41.0),
            temp2: Some(22.9),
        }
    }

    #[test]
    fn complete_requires_all_fields() {
        let full = sample();
        assert!(full.is_complete());

        for strip in 0..4 {
            let mut r = full;
            match strip {
                0 => r.co2 = None,
                1 => r.temp = None,
                2 => r.humidity = None,
                _ => r.temp2 = None,
            }
            assert!(!r.is_complete());
        }
    }

    #[test]
    fn created_at_format() {
        assert_eq!(sample().created_at(), "2024-03-09 07:05:00");
        assert_eq!(parse_timestamp("2024-03-09 07:05:00"), Some(sample().timestamp));
        assert_eq!(parse_timestamp("09/03/2024"), None);
    }

    #[test]
    fn bulk_body_shape() {
        let updates = vec![sample().to_update("192.168.1.20")];
        let body = BulkUpdate {
            write_api_key: "KEY",
            updates: &updates,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "write_api_key": "KEY",
                "updates": [{
                    "created_at": "2024-03-09 07:05:00",
                    "field1": 812,
                    "field2": 23.5,
                    "field3": 41.0,
                    "field4": 22.9,
                    "status": "192.168.1.20"
                }]
            })
        );
    }
}

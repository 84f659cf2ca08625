//! Protocolo do MT8057 (e clones ZyAura/Holtek).
//!
//! O dispositivo envia frames de 8 bytes embaralhados. A decodificação
//! desfaz o esquema do fabricante em quatro fases:
//!
//! ```text
//! frame ──permuta──► phase1 ──XOR MAGIC──► phase2 ──rotação de bits──► phase3 ──calibração──► decoded
//! ```
//!
//! Layout de `decoded`:
//!
//! ```text
//! ┌────────┬──────────┬──────────┬──────────┬──────────┬─────────┐
//! │ Tag(1) │ Word hi  │ Word lo  │ Checksum │ 0x0D     │ 3 bytes │
//! └────────┴──────────┴──────────┴──────────┴──────────┴─────────┘
//! ```
//!
//! - Tag `0x42`: temperatura ambiente em 1/16 Kelvin
//! - Tag `0x50`: concentração relativa de CO2 (ppm)
//!
//! Frames com checksum inválido são ruído normal desse tipo de dispositivo
//! e são descartados silenciosamente.

use serde::{Deserialize, Serialize};

/// Tamanho fixo de um frame lido do endpoint USB.
pub const FRAME_LEN: usize = 8;

/// Frame bruto, sem significado antes da decodificação.
pub type RawFrame = [u8; FRAME_LEN];

/// Sequência de "armação" enviada como feature report.
/// Também é a chave XOR do embaralhamento.
pub const MAGIC: [u8; FRAME_LEN] = [0xc4, 0xc6, 0xc0, 0x92, 0x40, 0x23, 0xdc, 0x96];

/// Ordem em que os bytes do frame devem ser lidos.
const SHUFFLE: [usize; FRAME_LEN] = [2, 4, 0, 7, 1, 6, 5, 3];

/// Tabela de calibração subtraída na última fase.
const CALIBRATION: [u8; FRAME_LEN] = [0x84, 0x47, 0x56, 0xd6, 0x07, 0x93, 0x93, 0x56];

/// Tag de temperatura ambiente.
pub const TAG_TEMPERATURE: u8 = 0x42;

/// Tag de concentração de CO2.
pub const TAG_CONCENTRATION: u8 = 0x50;

/// Terminador esperado em `decoded[4]`.
const TERMINATOR: u8 = 0x0d;

/// Kelvin → Celsius.
const KELVIN_OFFSET: f64 = 273.15;

/// Resolução da temperatura (1/16 K).
const TEMPERATURE_STEP: f64 = 0.0625;

/// Métrica decodificada de um frame válido.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum DecodedMetric {
    /// Temperatura ambiente (°C)
    Temperature(f64),
    /// Concentração de CO2 (ppm)
    Concentration(u16),
}

/// Desfaz permutação, XOR, rotação e calibração.
///
/// Não valida nada: o resultado pode ser lixo se o frame for ruído.
pub fn unscramble(frame: &RawFrame) -> [u8; FRAME_LEN] {
    let mut phase2 = [0u8; FRAME_LEN];
    for i in 0..FRAME_LEN {
        phase2[i] = frame[SHUFFLE[i]] ^ MAGIC[i];
    }

    let mut decoded = [0u8; FRAME_LEN];
    for i in 0..FRAME_LEN {
        let prev = phase2[(i + FRAME_LEN - 1) % FRAME_LEN];
        let phase3 = (phase2[i] >> 3) | (prev << 5);
        decoded[i] = phase3.wrapping_sub(CALIBRATION[i]);
    }

    decoded
}

/// Decodifica um frame. `None` para checksum inválido ou tag desconhecida.
pub fn decode(frame: &RawFrame) -> Option<DecodedMetric> {
    let decoded = unscramble(frame);

    let checksum = decoded[0].wrapping_add(decoded[1]).wrapping_add(decoded[2]);
    if decoded[3] != checksum || decoded[4] != TERMINATOR {
        return None;
    }

    let word = u16::from_be_bytes([decoded[1], decoded[2]]);
    match decoded[0] {
        TAG_TEMPERATURE => Some(DecodedMetric::Temperature(
            f64::from(word) * TEMPERATURE_STEP - KELVIN_OFFSET,
        )),
        TAG_CONCENTRATION => Some(DecodedMetric::Concentration(word)),
        _ => None,
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

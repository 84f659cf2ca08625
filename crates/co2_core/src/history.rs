//! Histórico local em CSV: uma linha por ciclo, sem cabeçalho.
//!
//! Colunas: `created_at,co2,temp,humidity,temp2`. Valores ausentes viram
//! células vazias.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::types::Reading;

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("erro de E/S em {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("erro de CSV: {0}")]
    Csv(#[from] csv::Error),
}

/// Arquivo de histórico aberto em modo append.
pub struct ReadingsLog {
    path: PathBuf,
    writer: csv::Writer<File>,
}

impl ReadingsLog {
    pub fn open(path: &Path) -> Result<Self, HistoryError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| HistoryError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        Ok(Self {
            path: path.to_path_buf(),
            writer,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Grava uma linha e descarrega para o disco.
    pub fn append(&mut self, reading: &Reading) -> Result<(), HistoryError> {
        self.writer.write_record([
            reading.created_at(),
            cell(reading.co2),
            cell(reading.temp),
            cell(reading.humidity),
            cell(reading.temp2),
        ])?;
        self.writer.flush().map_err(|source| HistoryError::Io {
            path: self.path.clone(),
            source,
        })?;
        Ok(())
    }
}

fn cell<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

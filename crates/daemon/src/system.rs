//! Ação terminal (restart do host) e verificação de privilégios.

use std::process::Command;

use co2_core::lifecycle::{SystemControl, SystemError};
use tracing::info;

/// Executa o comando configurado (padrão `sudo reboot`).
pub struct RestartCommand {
    argv: Vec<String>,
}

impl RestartCommand {
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }

    fn display(&self) -> String {
        self.argv.join(" ")
    }
}

impl SystemControl for RestartCommand {
    fn request_restart(&self) -> Result<(), SystemError> {
        let (program, args) = self.argv.split_first().ok_or(SystemError::EmptyCommand)?;
        info!("Executando: {}", self.display());

        let status = Command::new(program)
            .args(args)
            .status()
            .map_err(|source| SystemError::Spawn {
                command: self.display(),
                source,
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(SystemError::Failed {
                command: self.display(),
                status: status.to_string(),
            })
        }
    }
}

#[cfg(unix)]
pub fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
pub fn is_root() -> bool {
    false
}

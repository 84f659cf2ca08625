//! Último valor lido por cada worker.
//!
//! Cada worker tem a sua mailbox com lock próprio. As duas nunca são lidas
//! sob um lock combinado: sensores independentes podem refletir instantes
//! de amostragem diferentes.

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Par "last value wins" protegido por mutex.
#[derive(Debug)]
pub struct Mailbox<A, B> {
    slots: Mutex<(Option<A>, Option<B>)>,
}

/// (CO2 ppm, temperatura °C) do MT8057.
pub type GasMailbox = Mailbox<u16, f64>;

/// (umidade %, temperatura °C) do DHT.
pub type HumidityMailbox = Mailbox<f64, f64>;

impl<A, B> Default for Mailbox<A, B> {
    fn default() -> Self {
        Self {
            slots: Mutex::new((None, None)),
        }
    }
}

impl<A: Copy, B: Copy> Mailbox<A, B> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Substitui o par inteiro.
    pub fn set(&self, a: Option<A>, b: Option<B>) {
        *self.lock() = (a, b);
    }

    /// Atualiza só o primeiro valor.
    pub fn set_first(&self, a: A) {
        self.lock().0 = Some(a);
    }

    /// Atualiza só o segundo valor.
    pub fn set_second(&self, b: B) {
        self.lock().1 = Some(b);
    }

    /// Snapshot atômico do par.
    pub fn get(&self) -> (Option<A>, Option<B>) {
        *self.lock()
    }

    // Um worker que entrou em pânico com o lock não invalida o último par.
    fn lock(&self) -> MutexGuard<'_, (Option<A>, Option<B>)> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

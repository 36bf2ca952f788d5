//! Registro compartilhado de temperaturas por dispositivo.
//!
//! Um único escritor (o loop de aquisição) e vários leitores (scrapes HTTP).
//! Um `Mutex` em volta do mapa basta: uma escrita por telegrama, uma leitura
//! por scrape.

use crate::telegram::Address;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

// ──────────────────────────────────────────────
// Leitura
// ──────────────────────────────────────────────

/// Última temperatura decodificada de um dispositivo.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureReading {
    pub address: Address,
    /// Temperatura (°C), sempre dentro da faixa do perfil
    pub celsius: f64,
    /// Momento em que o telegrama foi decodificado
    pub observed_at: SystemTime,
}

impl TemperatureReading {
    pub fn new(address: Address, celsius: f64, observed_at: SystemTime) -> Self {
        Self {
            address,
            celsius,
            observed_at,
        }
    }

    /// Leitura carimbada com o relógio atual.
    pub fn now(address: Address, celsius: f64) -> Self {
        Self::new(address, celsius, SystemTime::now())
    }
}

// ──────────────────────────────────────────────
// Registro
// ──────────────────────────────────────────────

/// Mapa endereço → última leitura. Clonar compartilha o mesmo mapa.
///
/// Leituras nunca expiram: o valor fica até ser sobrescrito ou o processo
/// terminar.
#[derive(Debug, Clone, Default)]
pub struct TemperatureRegistry {
    inner: Arc<Mutex<HashMap<Address, TemperatureReading>>>,
}

impl TemperatureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // Cada escrita é um único insert: um escritor em pânico não deixa
    // entrada pela metade.
    fn lock(&self) -> MutexGuard<'_, HashMap<Address, TemperatureReading>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Substitui a leitura do endereço, visível imediatamente para leitores.
    pub fn set(&self, reading: TemperatureReading) {
        self.lock().insert(reading.address, reading);
    }

    pub fn get(&self, address: Address) -> Option<TemperatureReading> {
        self.lock().get(&address).copied()
    }

    /// Cópia consistente de todas as leituras, ordenada por endereço.
    pub fn snapshot(&self) -> Vec<TemperatureReading> {
        let mut readings: Vec<_> = self.lock().values().copied().collect();
        readings.sort_by_key(|r| r.address);
        readings
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

// ──────────────────────────────────────────────
// Nomes de dispositivos
// ──────────────────────────────────────────────

/// Tabela somente-leitura endereço → nome amigável, vinda da configuração.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceNames(BTreeMap<Address, String>);

impl DeviceNames {
    pub fn get(&self, address: Address) -> Option<&str> {
        self.0.get(&address).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(Address, String)> for DeviceNames {
    fn from_iter<I: IntoIterator<Item = (Address, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

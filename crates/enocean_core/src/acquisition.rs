//! Loop de aquisição: serial → frames → telegramas → °C → registro.
//!
//! Uma instância por porta serial, rodando em thread própria. O estado do
//! link é explícito:
//!
//! ```text
//! Streaming ──erro de I/O──▶ Disconnected ──backoff──▶ Connecting ──ok──▶ Streaming
//!                                 ▲                        │
//!                                 └──────────falha─────────┘
//! ```
//!
//! Uma conexão só zera o contador de falhas depois de entregar um frame
//! válido. Um link que abre e cai logo em seguida conta como falha, e o
//! backoff cresce até `max_attempts` como se a abertura tivesse falhado.

use crate::eep::{CalibrationFn, Eep, temperature_a5_02_05};
use crate::esp3::{FrameReader, LinkStats, RawFrame};
use crate::registry::{DeviceNames, TemperatureReading, TemperatureRegistry};
use crate::serial::{Connector, Link, LinkError};
use crate::shutdown::Shutdown;
use crate::telegram;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Erros que encerram o loop.
#[derive(Debug, thiserror::Error)]
pub enum AcquisitionError {
    #[error("Não foi possível abrir o dispositivo: {0}")]
    Open(#[source] LinkError),

    #[error("Desistindo após {attempts} tentativas de reconexão: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: LinkError,
    },
}

// ──────────────────────────────────────────────
// Backoff
// ──────────────────────────────────────────────

/// Espera exponencial entre tentativas de reconexão.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max }
    }

    /// `initial * 2^failures`, limitado a `max`.
    pub fn delay(&self, failures: u32) -> Duration {
        self.initial
            .saturating_mul(2u32.saturating_pow(failures))
            .min(self.max)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60))
    }
}

// ──────────────────────────────────────────────
// Contadores
// ──────────────────────────────────────────────

/// Contadores do link, compartilhados com o endpoint de métricas.
#[derive(Debug, Default)]
pub struct LinkCounters {
    frames: AtomicU64,
    header_crc_errors: AtomicU64,
    data_crc_errors: AtomicU64,
    discarded_bytes: AtomicU64,
    readings: AtomicU64,
    reconnects: AtomicU64,
}

/// Cópia dos [`LinkCounters`] em um instante.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkTotals {
    pub frames: u64,
    pub header_crc_errors: u64,
    pub data_crc_errors: u64,
    pub discarded_bytes: u64,
    pub readings: u64,
    pub reconnects: u64,
}

impl LinkCounters {
    pub fn totals(&self) -> LinkTotals {
        LinkTotals {
            frames: self.frames.load(Ordering::Relaxed),
            header_crc_errors: self.header_crc_errors.load(Ordering::Relaxed),
            data_crc_errors: self.data_crc_errors.load(Ordering::Relaxed),
            discarded_bytes: self.discarded_bytes.load(Ordering::Relaxed),
            readings: self.readings.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }

    fn add_link_stats(&self, delta: &LinkStats) {
        self.frames.fetch_add(delta.frames, Ordering::Relaxed);
        self.header_crc_errors
            .fetch_add(delta.header_crc_errors, Ordering::Relaxed);
        self.data_crc_errors
            .fetch_add(delta.data_crc_errors, Ordering::Relaxed);
        self.discarded_bytes
            .fetch_add(delta.discarded_bytes, Ordering::Relaxed);
    }
}

// ──────────────────────────────────────────────
// Loop
// ──────────────────────────────────────────────

enum LinkState {
    Disconnected {
        failures: u32,
    },
    Connecting {
        failures: u32,
    },
    Streaming {
        reader: FrameReader<Link>,
        /// Estatísticas do reader já somadas aos contadores
        seen: LinkStats,
        /// Falhas consecutivas enquanto o link ainda não entregou nenhum
        /// frame; `None` depois do primeiro
        unproven: Option<u32>,
    },
}

/// Loop de aquisição de uma porta.
pub struct AcquisitionLoop<C> {
    connector: C,
    registry: TemperatureRegistry,
    names: DeviceNames,
    profile: Eep,
    calibration: CalibrationFn,
    backoff: Backoff,
    max_attempts: Option<u32>,
    counters: Arc<LinkCounters>,
    shutdown: Shutdown,
}

impl<C: Connector> AcquisitionLoop<C> {
    /// Loop com perfil A5-02-05, backoff padrão e reconexão infinita.
    pub fn new(connector: C, registry: TemperatureRegistry, shutdown: Shutdown) -> Self {
        Self {
            connector,
            registry,
            names: DeviceNames::default(),
            profile: Eep::A5_02_05,
            calibration: temperature_a5_02_05,
            backoff: Backoff::default(),
            max_attempts: None,
            counters: Arc::new(LinkCounters::default()),
            shutdown,
        }
    }

    pub fn with_profile(mut self, profile: Eep, calibration: CalibrationFn) -> Self {
        self.profile = profile;
        self.calibration = calibration;
        self
    }

    /// Nomes usados apenas nos logs.
    pub fn with_names(mut self, names: DeviceNames) -> Self {
        self.names = names;
        self
    }

    pub fn with_reconnect(mut self, backoff: Backoff, max_attempts: Option<u32>) -> Self {
        self.backoff = backoff;
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_counters(mut self, counters: Arc<LinkCounters>) -> Self {
        self.counters = counters;
        self
    }

    pub fn counters(&self) -> Arc<LinkCounters> {
        Arc::clone(&self.counters)
    }

    /// Roda até o encerramento (`Ok`) ou até uma falha fatal.
    ///
    /// A primeira abertura não tem retry: sem dispositivo não há o que
    /// exportar. Depois de conectado, quedas do link reconectam com backoff.
    pub fn run(mut self) -> Result<(), AcquisitionError> {
        let device = self.connector.describe();
        let link = self.connector.connect().map_err(|e| {
            error!("Falha ao abrir {device}: {e}");
            AcquisitionError::Open(e)
        })?;
        info!("Aquisição iniciada em {device} (perfil {})", self.profile);

        let mut state = LinkState::Streaming {
            reader: FrameReader::new(link),
            seen: LinkStats::default(),
            unproven: Some(0),
        };

        loop {
            if self.shutdown.is_triggered() {
                info!("Aquisição em {device} encerrada");
                return Ok(());
            }

            state = match state {
                LinkState::Streaming {
                    mut reader,
                    seen,
                    unproven,
                } => {
                    let result = reader.next_frame();
                    let stats = reader.stats();
                    self.counters.add_link_stats(&stats.since(&seen));

                    match result {
                        Ok(frame) => {
                            self.handle_frame(&frame);
                            LinkState::Streaming {
                                reader,
                                seen: stats,
                                unproven: None,
                            }
                        }
                        Err(e) => {
                            drop(reader);
                            if self.shutdown.is_triggered() {
                                info!("Aquisição em {device} encerrada");
                                return Ok(());
                            }
                            match unproven {
                                None => {
                                    warn!("Link {device} perdido: {e}");
                                    LinkState::Disconnected { failures: 0 }
                                }
                                // Caiu antes do primeiro frame: conta como tentativa falha.
                                Some(failures) => {
                                    let last = LinkError::Io {
                                        port: device.clone(),
                                        source: e,
                                    };
                                    self.record_failure(&device, failures, last)?
                                }
                            }
                        }
                    }
                }

                LinkState::Disconnected { failures } => {
                    let delay = self.backoff.delay(failures);
                    debug!("Reconectando {device} em {delay:?}");
                    if self.shutdown.wait(delay) {
                        info!("Aquisição em {device} encerrada");
                        return Ok(());
                    }
                    LinkState::Connecting { failures }
                }

                LinkState::Connecting { failures } => match self.connector.connect() {
                    Ok(link) => {
                        self.counters.reconnects.fetch_add(1, Ordering::Relaxed);
                        info!("Link {device} restabelecido");
                        LinkState::Streaming {
                            reader: FrameReader::new(link),
                            seen: LinkStats::default(),
                            unproven: Some(failures),
                        }
                    }
                    Err(e) => self.record_failure(&device, failures, e)?,
                },
            };
        }
    }

    /// Soma uma falha de reconexão; erro fatal ao atingir `max_attempts`.
    fn record_failure(
        &self,
        device: &str,
        failures: u32,
        e: LinkError,
    ) -> Result<LinkState, AcquisitionError> {
        let failures = failures.saturating_add(1);
        if matches!(self.max_attempts, Some(max) if failures >= max) {
            error!("Desistindo de {device} após {failures} tentativas: {e}");
            return Err(AcquisitionError::RetriesExhausted {
                attempts: failures,
                last: e,
            });
        }
        warn!("Reconexão {failures} de {device} falhou: {e}");
        Ok(LinkState::Disconnected { failures })
    }

    fn handle_frame(&self, frame: &RawFrame) {
        let telegram = match telegram::decode(frame) {
            Ok(telegram) => telegram,
            Err(skip) => {
                trace!("Frame ignorado: {skip}");
                return;
            }
        };

        let celsius = (self.calibration)(&telegram.data);
        let reading = TemperatureReading::now(telegram.sender, celsius);
        self.registry.set(reading);
        self.counters.readings.fetch_add(1, Ordering::Relaxed);

        match self.names.get(telegram.sender) {
            Some(name) => debug!("{} ({name}): {celsius:.2}°C", telegram.sender),
            None => debug!("{}: {celsius:.2}°C", telegram.sender),
        }
    }
}

//! # EnOcean Core
//!
//! Pipeline de aquisição do exporter de temperatura EnOcean: framing ESP3
//! sobre a serial, decodificação de telegramas 4BS, calibração A5-02-05 e
//! registro compartilhado lido pelo endpoint de métricas.
//!
//! ## Módulos
//! - [`esp3`] – Framing ESP3, CRC-8 e ressincronização
//! - [`telegram`] – Telegramas de rádio 4BS e endereços
//! - [`eep`] – Perfis EEP e calibração
//! - [`registry`] – Última leitura por dispositivo
//! - [`acquisition`] – Loop serial com reconexão
//! - [`serial`] – Abertura da porta serial
//! - [`exposition`] – Formato texto do Prometheus
//! - [`config`] – Configuração via TOML
//! - [`shutdown`] – Sinal de encerramento entre threads

pub mod acquisition;
pub mod config;
pub mod eep;
pub mod esp3;
pub mod exposition;
pub mod registry;
pub mod serial;
pub mod shutdown;
pub mod telegram;

// Re-exports convenientes
pub use acquisition::{AcquisitionError, AcquisitionLoop, LinkCounters};
pub use config::{ConfigError, ExporterConfig};
pub use eep::{Eep, Profiles, calibrate};
pub use esp3::{FrameReader, RawFrame};
pub use registry::{DeviceNames, TemperatureReading, TemperatureRegistry};
pub use telegram::{Address, Telegram};

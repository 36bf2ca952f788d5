//! Configuração do exporter via TOML.
//!
//! Um único `config.toml`; campos ausentes assumem o valor padrão.
//!
//! ```toml
//! listen = "0.0.0.0:9100"
//! port = "/dev/ttyUSB0"
//!
//! [devices]
//! "0180A3B2" = "Sala"
//! ```

use crate::acquisition::Backoff;
use crate::eep::Profiles;
use crate::registry::DeviceNames;
use crate::telegram::{Address, AddressParseError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Erros de configuração. Todos são fatais na inicialização.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Erro ao ler {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Erro ao parsear {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Configuração inválida: {}", .0.join("; "))]
    Invalid(Vec<String>),

    #[error(transparent)]
    InvalidAddress(#[from] AddressParseError),

    #[error("Dispositivo {0} configurado mais de uma vez")]
    DuplicateDevice(Address),
}

/// Parâmetros da porta serial. O link é sempre 57600 8N1 (padrão ESP3), por
/// isso `baud_rate` e afins não são aceitos aqui.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SerialConfig {
    /// Silêncio máximo antes de reconectar (segundos, ausente = sem limite)
    pub read_timeout_secs: Option<f64>,
}

impl SerialConfig {
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_secs
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }
}

/// Política de reconexão após perda do link.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub initial_backoff_secs: f64,
    pub max_backoff_secs: f64,
    /// Tentativas consecutivas antes de desistir (ausente = infinitas)
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_backoff_secs: 1.0,
            max_backoff_secs: 60.0,
            max_attempts: None,
        }
    }
}

impl ReconnectConfig {
    pub fn backoff(&self) -> Result<Backoff, ConfigError> {
        let initial = Duration::try_from_secs_f64(self.initial_backoff_secs);
        let max = Duration::try_from_secs_f64(self.max_backoff_secs);
        match (initial, max) {
            (Ok(initial), Ok(max)) if !initial.is_zero() && initial <= max => {
                Ok(Backoff::new(initial, max))
            }
            _ => Err(ConfigError::Invalid(vec![format!(
                "Backoff inválido: inicial {}s, máximo {}s",
                self.initial_backoff_secs, self.max_backoff_secs
            )])),
        }
    }
}

/// Opções da exposição de métricas.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpositionConfig {
    /// Anexa o timestamp (ms) da leitura a cada amostra
    pub timestamps: bool,
    /// Exporta contadores de frames, erros de CRC e reconexões
    pub link_stats: bool,
}

impl Default for ExpositionConfig {
    fn default() -> Self {
        Self {
            timestamps: false,
            link_stats: true,
        }
    }
}

/// Configuração raiz do exporter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExporterConfig {
    /// Endereço host:porta do endpoint de métricas
    pub listen: String,
    /// Porta serial do transceiver
    pub port: String,
    /// Perfil EEP aplicado a todo telegrama 4BS
    pub profile: String,
    /// Endereço (8 dígitos hex) → nome amigável
    pub devices: BTreeMap<String, String>,
    pub serial: SerialConfig,
    pub reconnect: ReconnectConfig,
    pub exposition: ExpositionConfig,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:9100".into(),
            port: "/dev/ttyUSB0".into(),
            profile: "A5-02-05".into(),
            devices: BTreeMap::new(),
            serial: SerialConfig::default(),
            reconnect: ReconnectConfig::default(),
            exposition: ExpositionConfig::default(),
        }
    }
}

impl ExporterConfig {
    /// Carrega configuração de um arquivo TOML.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str::<ExporterConfig>(&content).map_err(|source| {
            ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }
        })?;
        info!("Configuração carregada de {}", path.display());
        Ok(config)
    }

    /// Retorna o caminho padrão do config.toml.
    pub fn default_path() -> PathBuf {
        let exe_dir = std::env::current_exe()
            .map(|p| p.parent().unwrap_or(Path::new(".")).to_path_buf())
            .unwrap_or_else(|_| PathBuf::from("."));
        exe_dir.join("config.toml")
    }

    /// Valida a configuração e retorna lista de erros.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.listen.parse::<SocketAddr>().is_err() {
            errors.push(format!("Endereço listen inválido: \"{}\"", self.listen));
        }
        if self.port.trim().is_empty() {
            errors.push("Porta serial não pode ser vazia".into());
        }
        if let Some(secs) = self.serial.read_timeout_secs {
            if !(secs > 0.0 && secs.is_finite()) {
                errors.push(format!("read_timeout_secs inválido: {secs}"));
            }
        }
        if let Err(ConfigError::Invalid(mut e)) = self.reconnect.backoff() {
            errors.append(&mut e);
        }
        if self.reconnect.max_attempts == Some(0) {
            errors.push("max_attempts deve ser ≥ 1 (omita para tentar sempre)".into());
        }
        if let Err(e) = Profiles::builtin().resolve(&self.profile) {
            errors.push(e.to_string());
        }
        if let Err(e) = self.device_names() {
            errors.push(e.to_string());
        }

        errors
    }

    /// Converte a tabela `devices` em [`DeviceNames`].
    pub fn device_names(&self) -> Result<DeviceNames, ConfigError> {
        let mut parsed = BTreeMap::new();
        for (key, name) in &self.devices {
            let address: Address = key.parse()?;
            if parsed.insert(address, name.clone()).is_some() {
                return Err(ConfigError::DuplicateDevice(address));
            }
        }
        Ok(parsed.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = ExporterConfig::default();
        let errors = config.validate();
        assert!(errors.is_empty(), "Erros: {:?}", errors);
    }

    #[test]
    fn roundtrip_toml() {
        let mut config = ExporterConfig::default();
        config.devices.insert("0180A3B2".into(), "Sala".into());
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: ExporterConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(config.port, parsed.port);
        assert_eq!(config.devices, parsed.devices);
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let partial = r#"
port = "/dev/ttyAMA0"

[devices]
"01234567" = "Sala"
"#;
        let config: ExporterConfig = toml::from_str(partial).unwrap();
        assert_eq!(config.port, "/dev/ttyAMA0");
        assert_eq!(config.listen, "0.0.0.0:9100");
        assert_eq!(config.serial.read_timeout(), None);
        assert_eq!(config.reconnect.max_attempts, None);
        assert!(!config.exposition.timestamps);
    }

    #[test]
    fn serial_line_settings_are_not_configurable() {
        let with_baud = r#"
port = "/dev/ttyUSB0"

[serial]
baud_rate = 9600
"#;
        assert!(toml::from_str::<ExporterConfig>(with_baud).is_err());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{with_baud}").unwrap();
        assert!(matches!(
            ExporterConfig::load(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn device_names_parse_case_insensitive() {
        let mut config = ExporterConfig::default();
        config.devices.insert("0123abcd".into(), "Quarto".into());
        let names = config.device_names().unwrap();
        assert_eq!(names.get(Address::new(0x0123_ABCD)), Some("Quarto"));
    }

    #[test]
    fn duplicate_devices_after_normalisation() {
        let mut config = ExporterConfig::default();
        config.devices.insert("0123ABCD".into(), "A".into());
        config.devices.insert("0123abcd".into(), "B".into());
        assert!(matches!(
            config.device_names(),
            Err(ConfigError::DuplicateDevice(_))
        ));
    }

    #[test]
    fn invalid_values_are_reported() {
        let mut config = ExporterConfig::default();
        config.listen = "not an address".into();
        config.port = " ".into();
        config.profile = "F6-02-01".into();
        config.devices.insert("XYZ".into(), "?".into());
        config.reconnect.initial_backoff_secs = 120.0;
        config.serial.read_timeout_secs = Some(-1.0);

        let errors = config.validate();
        assert_eq!(errors.len(), 6, "Erros: {:?}", errors);
    }

    #[test]
    fn backoff_conversion() {
        let backoff = ReconnectConfig::default().backoff().unwrap();
        assert_eq!(backoff.delay(0), Duration::from_secs(1));

        let zero = ReconnectConfig {
            initial_backoff_secs: 0.0,
            ..Default::default()
        };
        assert!(zero.backoff().is_err());

        let negative = ReconnectConfig {
            initial_backoff_secs: -1.0,
            ..Default::default()
        };
        assert!(negative.backoff().is_err());
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "listen = \"127.0.0.1:9200\"\nport = \"COM3\"").unwrap();
        let config = ExporterConfig::load(file.path()).unwrap();
        assert_eq!(config.listen, "127.0.0.1:9200");
        assert_eq!(config.port, "COM3");
    }

    #[test]
    fn load_reports_missing_and_malformed_files() {
        let missing = ExporterConfig::load(Path::new("/nonexistent/enocean/config.toml"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "listen = [").unwrap();
        let malformed = ExporterConfig::load(file.path());
        assert!(matches!(malformed, Err(ConfigError::Parse { .. })));
    }
}

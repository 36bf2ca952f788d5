//! Conexão com o transceiver EnOcean.
//!
//! O loop de aquisição só enxerga o trait [`Connector`]: a porta serial real
//! fica em [`SerialConnector`], os testes usam streams em memória.

use crate::shutdown::Shutdown;
use serialport::{DataBits, FlowControl, Parity, StopBits};
use std::io::{self, ErrorKind, Read};
use std::time::{Duration, Instant};
use tracing::debug;

/// Baud rate padrão do ESP3.
pub const ESP3_BAUD_RATE: u32 = 57_600;

/// Fatia de espera de cada leitura na porta, para observar shutdown e deadline.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Stream de bytes vindo do transceiver.
pub type Link = Box<dyn Read + Send>;

/// Erros de conexão.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Falha ao abrir porta serial {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[error("Erro de I/O em {port}: {source}")]
    Io {
        port: String,
        #[source]
        source: io::Error,
    },
}

/// Abre (e reabre) o stream de bytes de um dispositivo.
pub trait Connector {
    fn connect(&mut self) -> Result<Link, LinkError>;

    /// Nome do dispositivo para logs.
    fn describe(&self) -> String;
}

// ──────────────────────────────────────────────
// Porta serial real
// ──────────────────────────────────────────────

/// Conector para a porta serial, 57600 8N1 sem controle de fluxo.
#[derive(Debug, Clone)]
pub struct SerialConnector {
    port: String,
    /// Silêncio máximo antes de considerar o link morto (`None` = sem limite)
    read_timeout: Option<Duration>,
    shutdown: Shutdown,
}

impl SerialConnector {
    pub fn new(port: impl Into<String>, shutdown: Shutdown) -> Self {
        Self {
            port: port.into(),
            read_timeout: None,
            shutdown,
        }
    }

    pub fn with_read_timeout(mut self, read_timeout: Option<Duration>) -> Self {
        self.read_timeout = read_timeout;
        self
    }
}

impl Connector for SerialConnector {
    fn connect(&mut self) -> Result<Link, LinkError> {
        let port = serialport::new(self.port.as_str(), ESP3_BAUD_RATE)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(POLL_INTERVAL)
            .open()
            .map_err(|source| LinkError::Open {
                port: self.port.clone(),
                source,
            })?;

        debug!("Porta {} aberta a {ESP3_BAUD_RATE} baud", self.port);
        Ok(Box::new(PollingReader {
            inner: port,
            read_timeout: self.read_timeout,
            shutdown: self.shutdown.clone(),
        }))
    }

    fn describe(&self) -> String {
        self.port.clone()
    }
}

/// Reader que espera em fatias curtas, para que o shutdown e o deadline de
/// silêncio interrompam um `read` bloqueado.
struct PollingReader<P> {
    inner: P,
    read_timeout: Option<Duration>,
    shutdown: Shutdown,
}

impl<P: Read> Read for PollingReader<P> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let started = Instant::now();
        loop {
            if self.shutdown.is_triggered() {
                return Err(io::Error::new(
                    ErrorKind::ConnectionAborted,
                    "encerramento solicitado",
                ));
            }

            match self.inner.read(buf) {
                Ok(n) => return Ok(n),
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                    ) =>
                {
                    if let Some(limit) = self.read_timeout {
                        if started.elapsed() >= limit {
                            return Err(io::Error::new(
                                ErrorKind::TimedOut,
                                format!("nenhum byte recebido em {limit:?}"),
                            ));
                        }
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

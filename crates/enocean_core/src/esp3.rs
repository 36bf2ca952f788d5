//! Framing ESP3 (EnOcean Serial Protocol 3) sobre a porta serial.
//!
//! Formato do frame:
//!
//! ```text
//! ┌─────────┬──────────────────────────────────────┬──────────┬──────────┬─────────┬──────────┐
//! │ Sync(1) │ DataLen(2) OptLen(1) PacketType(1)   │ CRC8H(1) │ Data(N)  │ Opt(M)  │ CRC8D(1) │
//! └─────────┴──────────────────────────────────────┴──────────┴──────────┴─────────┴──────────┘
//! ```
//!
//! - Sync byte `0x55` marca o início de cada frame
//! - `CRC8H` cobre os 4 bytes do header, `CRC8D` cobre data + optional
//! - CRC-8 com polinômio `0x07`, valor inicial 0, sem reflexão
//!
//! O [`FrameReader`] nunca confia no comprimento declarado antes de validar o
//! CRC do header, e em qualquer falha de CRC descarta apenas o sync byte e
//! volta a procurar o próximo `0x55`. Assim um frame truncado na reconexão não
//! engole o frame válido que vem logo depois.

use crc::{CRC_8_SMBUS, Crc};
use std::io::{self, ErrorKind, Read};
use tracing::{debug, trace};

/// Byte de sincronização que inicia todo frame ESP3.
pub const SYNC_BYTE: u8 = 0x55;

/// Tamanho do header (data length + optional length + packet type).
const HEADER_SIZE: usize = 4;

/// Sync + header + CRC do header.
const PREAMBLE_SIZE: usize = 1 + HEADER_SIZE + 1;

/// Quantidade de bytes pedida à fonte em cada leitura.
const READ_CHUNK: usize = 256;

/// Maior campo data de um telegrama ERP1 (RORG + payload VLD + sender + status).
/// Headers de rádio que declaram mais que isso são ruído com CRC coincidente.
const MAX_ERP1_DATA_LEN: usize = 64;

/// CRC-8 do ESP3: polinômio `0x07`, init 0, sem reflexão (= SMBus).
const CRC8: Crc<u8> = Crc::<u8>::new(&CRC_8_SMBUS);

/// Calcula o CRC-8 ESP3 de uma sequência de bytes.
pub fn crc8(bytes: &[u8]) -> u8 {
    CRC8.checksum(bytes)
}

// ──────────────────────────────────────────────
// Tipos de pacote
// ──────────────────────────────────────────────

/// Tipo de pacote ESP3 (byte 4 do header).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    /// Telegrama de rádio ERP1 – o único que o exporter interpreta.
    RadioErp1,
    Response,
    RadioSubTel,
    Event,
    CommonCommand,
    SmartAckCommand,
    RemoteManCommand,
    RadioMessage,
    RadioErp2,
    Other(u8),
}

impl From<u8> for PacketType {
    fn from(value: u8) -> Self {
        match value {
            0x01 => Self::RadioErp1,
            0x02 => Self::Response,
            0x03 => Self::RadioSubTel,
            0x04 => Self::Event,
            0x05 => Self::CommonCommand,
            0x06 => Self::SmartAckCommand,
            0x07 => Self::RemoteManCommand,
            0x09 => Self::RadioMessage,
            0x0A => Self::RadioErp2,
            other => Self::Other(other),
        }
    }
}

impl From<PacketType> for u8 {
    fn from(value: PacketType) -> Self {
        match value {
            PacketType::RadioErp1 => 0x01,
            PacketType::Response => 0x02,
            PacketType::RadioSubTel => 0x03,
            PacketType::Event => 0x04,
            PacketType::CommonCommand => 0x05,
            PacketType::SmartAckCommand => 0x06,
            PacketType::RemoteManCommand => 0x07,
            PacketType::RadioMessage => 0x09,
            PacketType::RadioErp2 => 0x0A,
            PacketType::Other(other) => other,
        }
    }
}

// ──────────────────────────────────────────────
// Frame
// ──────────────────────────────────────────────

/// Frame ESP3 com os dois CRCs já validados.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub packet_type: PacketType,
    pub data: Vec<u8>,
    pub optional: Vec<u8>,
}

/// Erros ao montar um frame para transmissão.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("Data muito longo para ESP3: {0} bytes (máximo 65535)")]
    DataTooLong(usize),

    #[error("Optional data muito longo para ESP3: {0} bytes (máximo 255)")]
    OptionalTooLong(usize),
}

impl RawFrame {
    pub fn new(packet_type: PacketType, data: Vec<u8>, optional: Vec<u8>) -> Self {
        Self {
            packet_type,
            data,
            optional,
        }
    }

    /// Serializa o frame com sync byte e CRCs calculados.
    ///
    /// Retorna bytes no formato: `[0x55][LEN_H][LEN_L][OPT][TYPE][CRC8H][data...][opt...][CRC8D]`
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let data_len =
            u16::try_from(self.data.len()).map_err(|_| EncodeError::DataTooLong(self.data.len()))?;
        let opt_len = u8::try_from(self.optional.len())
            .map_err(|_| EncodeError::OptionalTooLong(self.optional.len()))?;

        let [len_hi, len_lo] = data_len.to_be_bytes();
        let header = [len_hi, len_lo, opt_len, u8::from(self.packet_type)];

        let mut out =
            Vec::with_capacity(PREAMBLE_SIZE + self.data.len() + self.optional.len() + 1);
        out.push(SYNC_BYTE);
        out.extend_from_slice(&header);
        out.push(crc8(&header));
        out.extend_from_slice(&self.data);
        out.extend_from_slice(&self.optional);
        out.push(crc8(&out[PREAMBLE_SIZE..]));
        Ok(out)
    }
}

// ──────────────────────────────────────────────
// Estatísticas
// ──────────────────────────────────────────────

/// Contadores acumulados por um [`FrameReader`] desde a conexão.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    /// Frames válidos entregues
    pub frames: u64,
    /// Headers rejeitados por CRC
    pub header_crc_errors: u64,
    /// Frames completos rejeitados por CRC dos dados
    pub data_crc_errors: u64,
    /// Bytes descartados durante a ressincronização
    pub discarded_bytes: u64,
}

impl LinkStats {
    /// Diferença em relação a uma leitura anterior dos mesmos contadores.
    pub fn since(&self, earlier: &LinkStats) -> LinkStats {
        LinkStats {
            frames: self.frames.saturating_sub(earlier.frames),
            header_crc_errors: self.header_crc_errors.saturating_sub(earlier.header_crc_errors),
            data_crc_errors: self.data_crc_errors.saturating_sub(earlier.data_crc_errors),
            discarded_bytes: self.discarded_bytes.saturating_sub(earlier.discarded_bytes),
        }
    }
}

// ──────────────────────────────────────────────
// Leitor de frames
// ──────────────────────────────────────────────

/// Extrai frames ESP3 válidos de um stream de bytes não confiável.
///
/// Um leitor vale por uma conexão: após um erro de I/O, descarte-o e crie
/// outro sobre o novo stream.
pub struct FrameReader<R> {
    source: R,
    /// Bytes recebidos e ainda não consumidos
    buf: Vec<u8>,
    stats: LinkStats,
}

impl<R: Read> FrameReader<R> {
    pub fn new(source: R) -> Self {
        Self {
            source,
            buf: Vec::with_capacity(READ_CHUNK),
            stats: LinkStats::default(),
        }
    }

    pub fn stats(&self) -> LinkStats {
        self.stats
    }

    /// Bloqueia até o próximo frame válido.
    ///
    /// Falhas de CRC são tratadas internamente; só erros de I/O da fonte
    /// (incluindo fim do stream) são propagados.
    pub fn next_frame(&mut self) -> io::Result<RawFrame> {
        loop {
            if let Some(frame) = self.parse_buffered() {
                return Ok(frame);
            }
            self.fill()?;
        }
    }

    fn fill(&mut self) -> io::Result<()> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.source.read(&mut chunk) {
                Ok(0) => {
                    return Err(io::Error::new(
                        ErrorKind::UnexpectedEof,
                        "fonte de bytes encerrada",
                    ));
                }
                Ok(n) => {
                    self.buf.extend_from_slice(&chunk[..n]);
                    return Ok(());
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Tenta montar um frame a partir do buffer. `None` = faltam bytes.
    fn parse_buffered(&mut self) -> Option<RawFrame> {
        loop {
            match self.buf.iter().position(|&b| b == SYNC_BYTE) {
                Some(0) => {}
                Some(noise) => self.discard(noise),
                None => {
                    self.discard(self.buf.len());
                    return None;
                }
            }

            if self.buf.len() < PREAMBLE_SIZE {
                return None;
            }

            let header = &self.buf[1..1 + HEADER_SIZE];
            let expected = self.buf[1 + HEADER_SIZE];
            if crc8(header) != expected {
                self.stats.header_crc_errors += 1;
                debug!("CRC do header inválido, ressincronizando");
                self.discard(1);
                continue;
            }

            let data_len = u16::from_be_bytes([header[0], header[1]]) as usize;
            let opt_len = header[2] as usize;
            let packet_type = PacketType::from(header[3]);
            let end = PREAMBLE_SIZE + data_len + opt_len;

            if packet_type == PacketType::RadioErp1 && data_len > MAX_ERP1_DATA_LEN {
                debug!("Header ERP1 com {data_len} bytes de dados, ressincronizando");
                self.discard(1);
                continue;
            }

            if self.buf.len() < end + 1 {
                return None;
            }

            let body = &self.buf[PREAMBLE_SIZE..end];
            if crc8(body) != self.buf[end] {
                self.stats.data_crc_errors += 1;
                debug!(
                    "CRC dos dados inválido ({data_len}+{opt_len} bytes, tipo {packet_type:?}), descartando frame"
                );
                self.discard(1);
                continue;
            }

            let frame = RawFrame {
                packet_type,
                data: body[..data_len].to_vec(),
                optional: body[data_len..].to_vec(),
            };
            self.buf.drain(..=end);
            self.stats.frames += 1;
            trace!("Frame {:?}: {} + {} bytes", frame.packet_type, data_len, opt_len);
            return Some(frame);
        }
    }

    fn discard(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        self.buf.drain(..count);
        self.stats.discarded_bytes += count as u64;
    }
}

/// Sequência infinita de frames; termina apenas no primeiro erro de I/O.
impl<R: Read> Iterator for FrameReader<R> {
    type Item = io::Result<RawFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.next_frame())
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

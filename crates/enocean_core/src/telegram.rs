//! Decodificação de telegramas de rádio ERP1 (família 4BS).
//!
//! Layout dos dados de um telegrama 4BS dentro do frame ESP3:
//!
//! ```text
//! ┌─────────┬─────┬─────┬─────┬─────┬───────────────┬───────────┐
//! │ RORG(1) │ DB3 │ DB2 │ DB1 │ DB0 │ Sender ID (4) │ Status(1) │
//! └─────────┴─────┴─────┴─────┴─────┴───────────────┴───────────┘
//! ```

use crate::esp3::{PacketType, RawFrame};
use std::fmt;
use std::str::FromStr;

/// Tamanho dos dados de um telegrama ERP1 4BS.
const FOUR_BS_LEN: usize = 1 + 4 + 4 + 1;

// ──────────────────────────────────────────────
// Endereço
// ──────────────────────────────────────────────

/// Endereço (sender ID) de um dispositivo EnOcean, 4 bytes big-endian.
///
/// Exibido sempre como 8 dígitos hex maiúsculos, ex: `01234567`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(u32);

impl Address {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn from_bytes(bytes: [u8; 4]) -> Self {
        Self(u32::from_be_bytes(bytes))
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08X}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Endereço inválido \"{0}\" (esperado 8 dígitos hex)")]
pub struct AddressParseError(pub String);

impl FromStr for Address {
    type Err = AddressParseError;

    /// Aceita exatamente 8 dígitos hex, maiúsculos ou minúsculos.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 8 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(AddressParseError(s.to_owned()));
        }
        u32::from_str_radix(s, 16)
            .map(Address)
            .map_err(|_| AddressParseError(s.to_owned()))
    }
}

// ──────────────────────────────────────────────
// RORG
// ──────────────────────────────────────────────

/// Código de organização do telegrama (primeiro byte dos dados ERP1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rorg {
    /// Repeated switch
    Rps,
    /// 1 byte sensor
    Bs1,
    /// 4 byte sensor
    Bs4,
    /// Variable length data
    Vld,
    Other(u8),
}

impl From<u8> for Rorg {
    fn from(value: u8) -> Self {
        match value {
            0xF6 => Self::Rps,
            0xD5 => Self::Bs1,
            0xA5 => Self::Bs4,
            0xD2 => Self::Vld,
            other => Self::Other(other),
        }
    }
}

impl From<Rorg> for u8 {
    fn from(value: Rorg) -> Self {
        match value {
            Rorg::Rps => 0xF6,
            Rorg::Bs1 => 0xD5,
            Rorg::Bs4 => 0xA5,
            Rorg::Vld => 0xD2,
            Rorg::Other(other) => other,
        }
    }
}

// ──────────────────────────────────────────────
// Telegrama
// ──────────────────────────────────────────────

/// Os 4 bytes de dados de um telegrama 4BS, na ordem DB3..DB0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FourBsData(pub [u8; 4]);

impl FourBsData {
    /// Byte mais significativo.
    pub fn db3(&self) -> u8 {
        self.0[0]
    }

    pub fn db2(&self) -> u8 {
        self.0[1]
    }

    pub fn db1(&self) -> u8 {
        self.0[2]
    }

    /// Byte menos significativo; o bit 3 é o LRN bit (0 = teach-in).
    pub fn db0(&self) -> u8 {
        self.0[3]
    }
}

/// Telegrama 4BS decodificado. Vive apenas durante o processamento do frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Telegram {
    pub rorg: Rorg,
    pub data: FourBsData,
    pub sender: Address,
    pub status: u8,
}

/// Motivo pelo qual um frame válido não virou telegrama.
///
/// Não é um erro: o frame é simplesmente ignorado.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeSkip {
    #[error("Pacote {0:?} não é telegrama de rádio")]
    NotRadio(PacketType),

    #[error("Telegrama {0:?} não é 4BS")]
    NotFourBs(Rorg),

    #[error("Telegrama 4BS com {0} bytes (esperado {FOUR_BS_LEN})")]
    Malformed(usize),
}

/// Decodifica um frame ESP3 em telegrama 4BS.
pub fn decode(frame: &RawFrame) -> Result<Telegram, DecodeSkip> {
    if frame.packet_type != PacketType::RadioErp1 {
        return Err(DecodeSkip::NotRadio(frame.packet_type));
    }

    let data = &frame.data;
    let Some(&first) = data.first() else {
        return Err(DecodeSkip::Malformed(0));
    };

    let rorg = Rorg::from(first);
    if rorg != Rorg::Bs4 {
        return Err(DecodeSkip::NotFourBs(rorg));
    }
    if data.len() != FOUR_BS_LEN {
        return Err(DecodeSkip::Malformed(data.len()));
    }

    Ok(Telegram {
        rorg,
        data: FourBsData([data[1], data[2], data[3], data[4]]),
        sender: Address::from_bytes([data[5], data[6], data[7], data[8]]),
        status: data[9],
    })
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    use crate::esp3::FrameReader;

    fn four_bs(db: [u8; 4], sender: [u8; 4]) -> RawFrame {
        let mut data = vec![0xA5];
        data.extend_from_slice(&db);
        data.extend_from_slice(&sender);
        data.push(0x00);
        RawFrame::new(PacketType::RadioErp1, data, vec![])
    }

    #[test]
    fn address_display_is_upper_hex() {
        assert_eq!(Address::new(0x0123_ABCD).to_string(), "0123ABCD");
        assert_eq!(Address::new(0x0000_0001).to_string(), "00000001");
    }

    #[test]
    fn address_parse() {
        assert_eq!("0123abcd".parse::<Address>(), Ok(Address::new(0x0123_ABCD)));
        assert_eq!("FFFFFFFF".parse::<Address>(), Ok(Address::new(u32::MAX)));
        assert!("123".parse::<Address>().is_err());
        assert!("+1234567".parse::<Address>().is_err());
        assert!("0123456G".parse::<Address>().is_err());
        assert!("012345678".parse::<Address>().is_err());
    }

    #[test]
    fn decodes_four_bs_through_wire_format() {
        let frame = four_bs([0x7F, 0x12, 0x34, 0x08], [0x01, 0x23, 0x45, 0x67]);
        let bytes = frame.encode().unwrap();
        let parsed = FrameReader::new(Cursor::new(bytes)).next_frame().unwrap();

        let telegram = decode(&parsed).unwrap();
        assert_eq!(telegram.rorg, Rorg::Bs4);
        assert_eq!(telegram.sender, Address::new(0x0123_4567));
        assert_eq!(telegram.data.db3(), 0x7F);
        assert_eq!(telegram.data, FourBsData([0x7F, 0x12, 0x34, 0x08]));
    }

    #[test]
    fn ignores_non_radio_packets() {
        let frame = RawFrame::new(PacketType::Response, vec![0x00], vec![]);
        assert_eq!(decode(&frame), Err(DecodeSkip::NotRadio(PacketType::Response)));
    }

    #[test]
    fn ignores_other_rorgs() {
        let frame = RawFrame::new(
            PacketType::RadioErp1,
            vec![0xF6, 0x50, 0x01, 0x23, 0x45, 0x67, 0x30],
            vec![],
        );
        assert_eq!(decode(&frame), Err(DecodeSkip::NotFourBs(Rorg::Rps)));
    }

    #[test]
    fn rejects_short_four_bs() {
        let frame = RawFrame::new(PacketType::RadioErp1, vec![0xA5, 0x00, 0x00], vec![]);
        assert_eq!(decode(&frame), Err(DecodeSkip::Malformed(3)));

        let empty = RawFrame::new(PacketType::RadioErp1, vec![], vec![]);
        assert_eq!(decode(&empty), Err(DecodeSkip::Malformed(0)));
    }
}

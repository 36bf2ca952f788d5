//! Perfis EEP (EnOcean Equipment Profile) e calibração.
//!
//! Cada perfil registrado associa um identificador `RORG-FUNC-TYPE` a uma
//! função de calibração que converte os dados 4BS em °C. Hoje só existe
//! A5-02-05 (sensor de temperatura, faixa 0–40 °C).

use crate::telegram::FourBsData;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Limite inferior da faixa do A5-02-05 (°C).
pub const A5_02_05_MIN_CELSIUS: f64 = 0.0;

/// Limite superior da faixa do A5-02-05 (°C).
pub const A5_02_05_MAX_CELSIUS: f64 = 40.0;

/// Identificador de perfil, ex: `A5-02-05`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Eep {
    pub rorg: u8,
    pub func: u8,
    pub kind: u8,
}

impl Eep {
    pub const A5_02_05: Eep = Eep {
        rorg: 0xA5,
        func: 0x02,
        kind: 0x05,
    };
}

impl fmt::Display for Eep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}-{:02X}-{:02X}", self.rorg, self.func, self.kind)
    }
}

/// Erros de perfil.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProfileError {
    #[error("Identificador de perfil inválido: \"{0}\" (esperado RR-FF-TT)")]
    Invalid(String),

    #[error("Perfil {0} não suportado")]
    Unknown(Eep),
}

impl FromStr for Eep {
    type Err = ProfileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ProfileError::Invalid(s.to_owned());
        let mut parts = s.trim().split('-').map(|part| {
            if part.len() == 2 {
                u8::from_str_radix(part, 16).ok()
            } else {
                None
            }
        });

        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(Some(rorg)), Some(Some(func)), Some(Some(kind)), None) => {
                Ok(Eep { rorg, func, kind })
            }
            _ => Err(invalid()),
        }
    }
}

/// Converte os dados 4BS de um perfil em °C.
pub type CalibrationFn = fn(&FourBsData) -> f64;

/// Converte o byte bruto do A5-02-05 em °C.
///
/// Escala invertida: 255 → 0 °C, 0 → 40 °C. Função total no domínio do byte,
/// o resultado está sempre em `[0.0, 40.0]`.
pub fn calibrate(raw: u8) -> f64 {
    let span = A5_02_05_MAX_CELSIUS - A5_02_05_MIN_CELSIUS;
    A5_02_05_MIN_CELSIUS + span * f64::from(u8::MAX - raw) / f64::from(u8::MAX)
}

/// Calibração do A5-02-05 a partir do telegrama: amostra em DB3.
pub fn temperature_a5_02_05(data: &FourBsData) -> f64 {
    calibrate(data.db3())
}

/// Tabela de perfis suportados.
#[derive(Debug, Clone)]
pub struct Profiles {
    table: HashMap<Eep, CalibrationFn>,
}

impl Profiles {
    /// Tabela vazia.
    pub fn empty() -> Self {
        Self {
            table: HashMap::new(),
        }
    }

    /// Perfis embutidos no exporter.
    pub fn builtin() -> Self {
        let mut profiles = Self::empty();
        profiles.register(Eep::A5_02_05, temperature_a5_02_05);
        profiles
    }

    pub fn register(&mut self, eep: Eep, calibration: CalibrationFn) {
        self.table.insert(eep, calibration);
    }

    pub fn calibration(&self, eep: &Eep) -> Option<CalibrationFn> {
        self.table.get(eep).copied()
    }

    /// Resolve o perfil configurado (texto) para sua calibração.
    pub fn resolve(&self, profile: &str) -> Result<(Eep, CalibrationFn), ProfileError> {
        let eep: Eep = profile.parse()?;
        self.calibration(&eep)
            .map(|calibration| (eep, calibration))
            .ok_or(ProfileError::Unknown(eep))
    }
}

impl Default for Profiles {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calibration_matches_formula_over_whole_domain() {
        for raw in 0..=u8::MAX {
            let expected = 40.0 * (255.0 - f64::from(raw)) / 255.0;
            let celsius = calibrate(raw);
            assert!((celsius - expected).abs() < 1e-12, "raw {raw}: {celsius} != {expected}");
            assert!((0.0..=40.0).contains(&celsius));
        }
    }

    #[test]
    fn calibration_endpoints() {
        assert_eq!(calibrate(0xFF), 0.0);
        assert_eq!(calibrate(0x00), 40.0);
    }

    #[test]
    fn calibration_is_strictly_decreasing() {
        for raw in 1..=u8::MAX {
            assert!(calibrate(raw) < calibrate(raw - 1));
        }
    }

    #[test]
    fn a5_02_05_reads_db3() {
        let data = FourBsData([0x00, 0xFF, 0xFF, 0x08]);
        assert_eq!(temperature_a5_02_05(&data), 40.0);
    }

    #[test]
    fn eep_parse_and_display() {
        let eep: Eep = "a5-02-05".parse().unwrap();
        assert_eq!(eep, Eep::A5_02_05);
        assert_eq!(eep.to_string(), "A5-02-05");

        assert!("A5-02".parse::<Eep>().is_err());
        assert!("A5-02-05-01".parse::<Eep>().is_err());
        assert!("A5-2-05".parse::<Eep>().is_err());
        assert!("ZZ-02-05".parse::<Eep>().is_err());
    }

    #[test]
    fn builtin_resolves_only_a5_02_05() {
        let profiles = Profiles::builtin();
        let (eep, calibration) = profiles.resolve("A5-02-05").unwrap();
        assert_eq!(eep, Eep::A5_02_05);
        assert_eq!(calibration(&FourBsData([0xFF, 0, 0, 0])), 0.0);

        assert!(matches!(
            profiles.resolve("A5-02-01"),
            Err(ProfileError::Unknown(_))
        ));
    }

    #[test]
    fn custom_profiles_can_be_registered() {
        fn always_ten(_: &FourBsData) -> f64 {
            10.0
        }

        let mut profiles = Profiles::empty();
        assert!(profiles.resolve("A5-02-05").is_err());

        let eep = Eep {
            rorg: 0xA5,
            func: 0x02,
            kind: 0x01,
        };
        profiles.register(eep, always_ten);
        let calibration = profiles.calibration(&eep).unwrap();
        assert_eq!(calibration(&FourBsData([0; 4])), 10.0);
    }
}

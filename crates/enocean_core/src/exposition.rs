//! Renderização das métricas no formato texto do Prometheus (0.0.4).

use crate::acquisition::LinkTotals;
use crate::config::ExpositionConfig;
use crate::registry::{DeviceNames, TemperatureReading};
use std::fmt::Write;
use std::time::UNIX_EPOCH;

/// Content-Type do formato texto.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

pub const TEMPERATURE_METRIC: &str = "enocean_temperature_celsius";

/// Renderiza as leituras como gauge `enocean_temperature_celsius`.
///
/// O label `name` só aparece para endereços configurados. Dispositivos sem
/// nenhuma leitura não geram linha.
pub fn render_temperatures(
    readings: &[TemperatureReading],
    names: &DeviceNames,
    options: &ExpositionConfig,
) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "# HELP {TEMPERATURE_METRIC} Temperature reported by an EnOcean sensor, in °C"
    );
    let _ = writeln!(out, "# TYPE {TEMPERATURE_METRIC} gauge");

    for reading in readings {
        let _ = write!(out, "{TEMPERATURE_METRIC}{{address=\"{}\"", reading.address);
        if let Some(name) = names.get(reading.address) {
            let _ = write!(out, ",name=\"{}\"", escape_label(name));
        }
        let _ = write!(out, "}} {}", reading.celsius);
        if options.timestamps {
            let millis = reading
                .observed_at
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis())
                .unwrap_or(0);
            let _ = write!(out, " {millis}");
        }
        out.push('\n');
    }

    out
}

/// Renderiza os contadores do link serial.
pub fn render_link_totals(totals: &LinkTotals) -> String {
    let mut out = String::new();

    counter(
        &mut out,
        "enocean_frames_total",
        "Valid ESP3 frames received from the transceiver",
        &[("", totals.frames)],
    );
    counter(
        &mut out,
        "enocean_crc_errors_total",
        "ESP3 frames dropped because of a checksum mismatch",
        &[
            ("kind=\"header\"", totals.header_crc_errors),
            ("kind=\"data\"", totals.data_crc_errors),
        ],
    );
    counter(
        &mut out,
        "enocean_discarded_bytes_total",
        "Bytes skipped while resynchronising on the ESP3 sync byte",
        &[("", totals.discarded_bytes)],
    );
    counter(
        &mut out,
        "enocean_readings_total",
        "Temperature telegrams decoded",
        &[("", totals.readings)],
    );
    counter(
        &mut out,
        "enocean_reconnects_total",
        "Serial link reconnections after an I/O failure",
        &[("", totals.reconnects)],
    );

    out
}

fn counter(out: &mut String, metric: &str, help: &str, samples: &[(&str, u64)]) {
    let _ = writeln!(out, "# HELP {metric} {help}");
    let _ = writeln!(out, "# TYPE {metric} counter");
    for (labels, value) in samples {
        if labels.is_empty() {
            let _ = writeln!(out, "{metric} {value}");
        } else {
            let _ = writeln!(out, "{metric}{{{labels}}} {value}");
        }
    }
}

/// Escapa `\`, `"` e quebras de linha em valores de label.
fn escape_label(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telegram::Address;
    use std::time::{Duration, SystemTime};

    fn reading(address: u32, celsius: f64) -> TemperatureReading {
        TemperatureReading::new(
            Address::new(address),
            celsius,
            UNIX_EPOCH + Duration::from_millis(1_700_000_000_123),
        )
    }

    fn sample_lines(text: &str) -> Vec<&str> {
        text.lines().filter(|l| !l.starts_with('#')).collect()
    }

    #[test]
    fn unnamed_device_has_only_address_label() {
        let text = render_temperatures(
            &[reading(0x0123_4567, 0.0)],
            &DeviceNames::default(),
            &ExpositionConfig::default(),
        );
        assert!(text.starts_with("# HELP enocean_temperature_celsius"));
        assert!(text.contains("# TYPE enocean_temperature_celsius gauge\n"));
        assert_eq!(
            sample_lines(&text),
            vec!["enocean_temperature_celsius{address=\"01234567\"} 0"]
        );
    }

    #[test]
    fn named_device_gets_name_label() {
        let names: DeviceNames = [(Address::new(0x0180_A3B2), "Sala".to_string())]
            .into_iter()
            .collect();
        let text = render_temperatures(
            &[reading(0x0180_A3B2, 21.5), reading(0x0000_0001, 40.0)],
            &names,
            &ExpositionConfig::default(),
        );
        assert_eq!(
            sample_lines(&text),
            vec![
                "enocean_temperature_celsius{address=\"0180A3B2\",name=\"Sala\"} 21.5",
                "enocean_temperature_celsius{address=\"00000001\"} 40",
            ]
        );
    }

    #[test]
    fn configured_but_silent_device_is_absent() {
        let names: DeviceNames = [(Address::new(5), "Garagem".to_string())]
            .into_iter()
            .collect();
        let text = render_temperatures(&[], &names, &ExpositionConfig::default());
        assert!(sample_lines(&text).is_empty());
    }

    #[test]
    fn timestamps_are_optional() {
        let options = ExpositionConfig {
            timestamps: true,
            ..Default::default()
        };
        let text = render_temperatures(&[reading(1, 20.0)], &DeviceNames::default(), &options);
        assert_eq!(
            sample_lines(&text),
            vec!["enocean_temperature_celsius{address=\"00000001\"} 20 1700000000123"]
        );
    }

    #[test]
    fn label_values_are_escaped() {
        assert_eq!(escape_label(r#"Sala "A"\1"#), r#"Sala \"A\"\\1"#);
        assert_eq!(escape_label("a\nb"), "a\\nb");
    }

    #[test]
    fn pre_epoch_timestamp_renders_zero() {
        let options = ExpositionConfig {
            timestamps: true,
            ..Default::default()
        };
        let old = TemperatureReading::new(
            Address::new(1),
            1.0,
            SystemTime::UNIX_EPOCH - Duration::from_secs(1),
        );
        let text = render_temperatures(&[old], &DeviceNames::default(), &options);
        assert!(text.ends_with("} 1 0\n"));
    }

    #[test]
    fn link_totals_render_as_counters() {
        let totals = LinkTotals {
            frames: 10,
            header_crc_errors: 2,
            data_crc_errors: 1,
            discarded_bytes: 7,
            readings: 9,
            reconnects: 3,
        };
        let text = render_link_totals(&totals);
        assert!(text.contains("# TYPE enocean_frames_total counter\n"));
        assert!(text.contains("enocean_frames_total 10\n"));
        assert!(text.contains("enocean_crc_errors_total{kind=\"header\"} 2\n"));
        assert!(text.contains("enocean_crc_errors_total{kind=\"data\"} 1\n"));
        assert!(text.contains("enocean_discarded_bytes_total 7\n"));
        assert!(text.contains("enocean_readings_total 9\n"));
        assert!(text.contains("enocean_reconnects_total 3\n"));
    }
}

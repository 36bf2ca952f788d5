//! # EnOcean Exporter
//!
//! Lê telegramas A5-02-05 de um transceiver EnOcean na porta serial e expõe
//! a temperatura de cada sensor em `/metrics` para o Prometheus.
//!
//! ## Uso
//! ```bash
//! enocean_exporter                  # usa config.toml ao lado do executável
//! enocean_exporter /etc/enocean.toml
//! ```

mod http;

use enocean_core::acquisition::{AcquisitionLoop, Backoff, LinkCounters};
use enocean_core::config::ExporterConfig;
use enocean_core::eep::{CalibrationFn, Eep, Profiles};
use enocean_core::registry::{DeviceNames, TemperatureRegistry};
use enocean_core::serial::{ESP3_BAUD_RATE, SerialConnector};
use enocean_core::shutdown;
use http::{MetricsServer, ScrapeState};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use tracing::{error, info};

fn main() -> ExitCode {
    // ── Logging ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // ── Carregar config ──
    let config_path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(ExporterConfig::default_path);
    let config = match ExporterConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let errors = config.validate();
    if !errors.is_empty() {
        for e in &errors {
            error!("Configuração: {e}");
        }
        return ExitCode::FAILURE;
    }

    let (names, (eep, calibration), backoff) = match pipeline_parts(&config) {
        Ok(parts) => parts,
        Err(e) => {
            error!("Configuração: {e}");
            return ExitCode::FAILURE;
        }
    };

    // ── Estado compartilhado ──
    let registry = TemperatureRegistry::new();
    let counters = Arc::new(LinkCounters::default());
    let (shutdown_handle, shutdown) = shutdown::channel();

    // ── Ctrl+C / SIGTERM ──
    let signal_handle = shutdown_handle.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Sinal recebido, encerrando...");
        signal_handle.trigger();
    }) {
        error!("Falha ao instalar handler de sinal: {e}");
        return ExitCode::FAILURE;
    }

    // ── HTTP ──
    let state = ScrapeState {
        registry: registry.clone(),
        names: names.clone(),
        counters: Arc::clone(&counters),
        exposition: config.exposition.clone(),
        port: config.port.clone(),
    };
    let server = match MetricsServer::bind(&config.listen, state) {
        Ok(server) => server,
        Err(e) => {
            error!("Falha ao escutar em {}: {e}", config.listen);
            return ExitCode::FAILURE;
        }
    };

    // ── Banner ──
    println!();
    println!("══════════════════════════════════════════════");
    println!("   🌡 ENOCEAN EXPORTER – ATIVO");
    println!("══════════════════════════════════════════════");
    println!("  Porta:       {} @ {ESP3_BAUD_RATE} baud 8N1", config.port);
    println!("  Perfil:      {eep}");
    println!("  Métricas:    http://{}/metrics", config.listen);
    println!("  Dispositivos nomeados: {}", names.len());
    println!("══════════════════════════════════════════════");
    println!();

    // ── Aquisição ──
    let connector = SerialConnector::new(config.port.clone(), shutdown.clone())
        .with_read_timeout(config.serial.read_timeout());
    let acquisition = AcquisitionLoop::new(connector, registry, shutdown)
        .with_profile(eep, calibration)
        .with_names(names)
        .with_reconnect(backoff, config.reconnect.max_attempts)
        .with_counters(counters);

    let worker = match thread::Builder::new()
        .name("enocean-serial".into())
        .spawn(move || acquisition.run())
    {
        Ok(worker) => worker,
        Err(e) => {
            error!("Falha ao criar thread serial: {e}");
            return ExitCode::FAILURE;
        }
    };

    // A thread HTTP não é aguardada: termina junto com o processo. Se o
    // servidor parar antes, a aquisição é encerrada junto.
    let http_thread = thread::Builder::new().name("metrics-http".into()).spawn(move || {
        server.serve();
        shutdown_handle.trigger();
    });
    if let Err(e) = http_thread {
        error!("Falha ao criar thread HTTP: {e}");
        return ExitCode::FAILURE;
    }

    match worker.join() {
        Ok(Ok(())) => {
            info!("Exporter encerrado");
            ExitCode::SUCCESS
        }
        Ok(Err(e)) => {
            error!("Aquisição encerrada: {e}");
            ExitCode::FAILURE
        }
        Err(_) => {
            error!("Thread serial entrou em pânico");
            ExitCode::FAILURE
        }
    }
}

type PipelineParts = (DeviceNames, (Eep, CalibrationFn), Backoff);

/// Converte a config já validada nas peças do pipeline.
fn pipeline_parts(config: &ExporterConfig) -> Result<PipelineParts, Box<dyn std::error::Error>> {
    let names = config.device_names()?;
    let profile = Profiles::builtin().resolve(&config.profile)?;
    let backoff = config.reconnect.backoff()?;
    Ok((names, profile, backoff))
}

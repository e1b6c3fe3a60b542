// Logging setup: EnvFilter + compact/pretty/json console layer, optional JSON file layer

use crate::settings::LogSettings;
use anyhow::{Context, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber
///
/// Console output goes to stderr so tables on stdout stay clean. The returned
/// guard flushes the file writer and must live until exit.
pub fn init(settings: &LogSettings, verbosity: u8) -> Result<Option<WorkerGuard>> {
    let env_filter = match verbosity {
        0 => EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&settings.filter)),
        1 => EnvFilter::try_new("warn,fleetctl=info,fleet_core=info,fleet_infra_system=info"),
        _ => EnvFilter::try_new("info,fleetctl=debug,fleet_core=debug,fleet_infra_system=debug"),
    }
    .context("Invalid log filter")?;

    let (file_layer, guard) = match &settings.file {
        Some(file) => {
            let path = Path::new(file);
            let dir = path
                .parent()
                .filter(|d| !d.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            let name = path
                .file_name()
                .with_context(|| format!("log.file has no file name: {}", file))?;
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Cannot create log directory {}", dir.display()))?;

            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry().with(env_filter).with(file_layer);
    match settings.format.as_str() {
        "json" => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        "pretty" => registry
            .with(fmt::layer().pretty().with_writer(std::io::stderr))
            .try_init(),
        _ => registry
            .with(fmt::layer().compact().with_target(false).with_writer(std::io::stderr))
            .try_init(),
    }
    .context("Logging already initialized")?;

    Ok(guard)
}

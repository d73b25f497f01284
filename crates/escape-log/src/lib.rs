// ABOUTME: Shared logging setup for escape binaries
// ABOUTME: stderr logging with a level override, and file logging for long-running commands

use std::path::PathBuf;

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Standard logging to stderr. Default: INFO level, RUST_LOG override.
pub fn init() {
    init_with_level(Level::INFO);
}

/// Logging to stderr at `level` for the escape crates and WARN for dependencies.
/// RUST_LOG directives still win.
pub fn init_with_level(level: Level) {
    tracing_subscriber::fmt()
        .with_env_filter(escape_filter(level))
        .with_target(level >= Level::DEBUG)
        .init();
}

/// Path of the log file for `app_name`: ~/.config/escape/{app_name}/{app_name}.log
pub fn log_path(app_name: &str) -> Option<PathBuf> {
    let config_dir = dirs::config_dir()?;
    Some(
        config_dir
            .join("escape")
            .join(app_name)
            .join(format!("{app_name}.log")),
    )
}

/// File-based logging for long-running sessions. Default: WARN level, RUST_LOG override.
/// If setup fails, prints a warning to stderr and continues without logging.
pub fn init_file(app_name: &str) {
    if let Err(e) = init_file_inner(app_name) {
        eprintln!("Warning: failed to set up file logging: {e}");
    }
}

fn init_file_inner(app_name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let path = log_path(app_name).ok_or("could not determine config directory")?;
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::WARN.into()))
        .with_ansi(false)
        .init();

    Ok(())
}

fn escape_filter(level: Level) -> EnvFilter {
    let mut filter = EnvFilter::from_default_env().add_directive(Level::WARN.into());
    for krate in ["escape_airlock", "escape_cli", "escape"] {
        if let Ok(directive) = format!("{krate}={level}").parse() {
            filter = filter.add_directive(directive);
        }
    }
    filter
}

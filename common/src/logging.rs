//! Structured logging init shared by both binaries (SPEC_FULL.md §2.1), built on
//! the teacher's `fern` + `log` pairing.

use std::path::Path;

use fern::colors::{Color, ColoredLevelConfig};
use log::LevelFilter;

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: LevelFilter,
    pub file_level: Option<LevelFilter>,
    pub log_dir: Option<String>,
    pub service_name: &'static str,
}

/// Initializes global logging. Chatty dependency crates are capped at `warn` so
/// request-path logs aren't drowned out, matching the teacher's module-path filters.
pub fn init(config: LoggingConfig) -> Result<(), fern::InitError> {
    let colors = ColoredLevelConfig::new()
        .info(Color::Green)
        .warn(Color::Yellow)
        .error(Color::Red)
        .debug(Color::Blue)
        .trace(Color::Magenta);

    let mut dispatch = fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "{} [{}] [{}] {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                config.service_name,
                colors.color(record.level()),
                message
            ))
        })
        .level(config.level)
        .level_for("sqlx", LevelFilter::Warn)
        .level_for("reqwest", LevelFilter::Warn)
        .level_for("actix_web", LevelFilter::Warn)
        .level_for("actix_server", LevelFilter::Warn)
        .chain(std::io::stdout());

    if let (Some(dir), Some(file_level)) = (&config.log_dir, config.file_level) {
        std::fs::create_dir_all(dir).map_err(fern::InitError::Io)?;
        let path = Path::new(dir).join(format!("{}.log", config.service_name));
        dispatch = dispatch.chain(
            fern::Dispatch::new()
                .level(file_level)
                .chain(fern::log_file(path)?),
        );
    }

    dispatch.apply()?;
    Ok(())
}

//! Logger setup for the binaries.

use std::fs::OpenOptions;
use std::io::Write;

use env_logger::{Builder, Target};

use crate::config::Settings;

/// Install the global logger.
///
/// Lines look like `2024-01-31 12:00:00 | INFO     | finance_dashboard::pipeline - ...`.
/// When `logging.file` is set, output goes to that file (appended) instead of
/// stderr. Calling this twice is harmless; the second call keeps the first logger.
pub fn init(settings: &Settings) -> std::io::Result<()> {
    let mut builder = Builder::new();
    builder
        .filter_level(settings.log_level())
        .format(|buf, record| {
            writeln!(
                buf,
                "{} | {:<8} | {} - {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        });

    if let Some(path) = &settings.logging.file {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        builder.target(Target::Pipe(Box::new(file)));
    }

    // RUST_LOG still wins for ad-hoc module filters
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }

    if let Err(e) = builder.try_init() {
        log::debug!("Logger already installed, keeping it: {}", e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_keeps_the_first_logger() {
        let settings = Settings::default();
        assert!(init(&settings).is_ok());
        assert!(init(&settings).is_ok());
    }
}

use std::io::Write;

use anyhow::{anyhow, Result};
use chrono::Local;
use env_logger::Builder;
use log::LevelFilter;

pub fn parse_level(level: &str) -> Result<LevelFilter> {
    level
        .parse()
        .map_err(|_| anyhow!("unknown log level {level:?}"))
}

/// The logger itself lets everything through; verbosity is controlled by
/// the global max level so it can be changed at runtime.
pub fn init_logger(level: LevelFilter) {
    Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] - {}",
                Local::now().format("%Y-%m-%dT%H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter(None, LevelFilter::Trace)
        .init();

    log::set_max_level(level);
}

pub fn set_level(level: LevelFilter) {
    log::set_max_level(level);
    log::info!("Log level set to {level}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_parse_case_insensitive() {
        assert_eq!(parse_level("debug").unwrap(), LevelFilter::Debug);
        assert_eq!(parse_level("WARN").unwrap(), LevelFilter::Warn);
        assert!(parse_level("chatty").is_err());
    }
}

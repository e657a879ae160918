use std::fs::File;
use std::path::Path;

use anyhow::Context as _;
use log::LevelFilter;

fn level(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Install the global logger.
///
/// With a log file everything goes there so the prompt stays clean;
/// otherwise stderr with `RUST_LOG` taking precedence over `-v`.
pub fn init(verbosity: u8, log_file: Option<&Path>) -> anyhow::Result<()> {
    match log_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("creating log file {}", path.display()))?;
            simplelog::WriteLogger::init(level(verbosity.max(1)), simplelog::Config::default(), file)
                .context("installing file logger")?;
        }
        None => {
            let mut builder = pretty_env_logger::formatted_builder();
            builder.filter_level(level(verbosity));
            if let Ok(filters) = std::env::var("RUST_LOG") {
                builder.parse_filters(&filters);
            }
            builder.try_init().context("installing logger")?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_steps() {
        assert_eq!(level(0), LevelFilter::Warn);
        assert_eq!(level(1), LevelFilter::Info);
        assert_eq!(level(2), LevelFilter::Debug);
        assert_eq!(level(7), LevelFilter::Trace);
    }
}

// Logger setup
//
// RUST_LOG wins over the configured level. With `log_to_file` the log
// goes to the configured file instead of stderr, which keeps validation
// layer spam out of the terminal.

use anyhow::{Context, Result};
use env_logger::{Builder, Env, Target};
use std::fs::OpenOptions;
use std::io::Write;

use crate::config::DebugConfig;

fn builder(config: &DebugConfig) -> Result<Builder> {
    let mut builder = Builder::from_env(Env::default().default_filter_or(config.log_level.as_str()));
    builder.format_timestamp_millis();

    if config.log_to_file {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&config.log_file)
            .with_context(|| format!("Failed to open log file: {}", config.log_file))?;
        writeln!(file, "=== Frame Scheduler Log ===")?;
        builder.target(Target::Pipe(Box::new(file)));
    }
    Ok(builder)
}

pub fn init(config: &DebugConfig) -> Result<()> {
    builder(config)?
        .try_init()
        .context("Logger was already initialized")?;
    if config.log_to_file {
        eprintln!("Logging to {}", config.log_file);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwritable_log_file_is_an_error() {
        let config = DebugConfig {
            log_to_file: true,
            log_file: "/nonexistent-dir/frame.log".to_string(),
            ..DebugConfig::default()
        };
        let err = builder(&config).err().unwrap();
        assert!(format!("{:#}", err).contains("/nonexistent-dir/frame.log"));
    }

    #[test]
    fn stderr_logger_needs_no_file() {
        let config = DebugConfig {
            log_to_file: false,
            ..DebugConfig::default()
        };
        assert!(builder(&config).is_ok());
    }
}

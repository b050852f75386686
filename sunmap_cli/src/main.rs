mod cli;
mod display;
mod error;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, RunCommand};
use log::debug;
use sunmap::config::Config;

const DEFAULT_LOGGING_LEVEL: &str = "warn";

fn main() -> Result<()> {
    // Set RUST_LOG to `DEFAULT_LOGGING_LEVEL` if not set
    let _ =
        std::env::var("RUST_LOG").map_err(|_| std::env::set_var("RUST_LOG", DEFAULT_LOGGING_LEVEL));
    pretty_env_logger::init_timed();
    let args = Cli::parse();
    debug!("args: {args:?}");
    let config: Config = read_config_from_toml(args.config.as_deref())?;
    debug!("config: {config:?}");

    if let Some(command) = args.command {
        command.run(config)?;
    }
    Ok(())
}

fn default_config_path() -> Option<PathBuf> {
    // macOS: ~/Library/Application Support/sunmap/config.toml
    dirs::config_dir().map(|dir| dir.join("sunmap").join("config.toml"))
}

/// Read the given config file, else the one in the user's config directory, else defaults. A
/// missing default file is fine, a missing explicit one is not.
fn read_config_from_toml(path: Option<&Path>) -> Result<Config> {
    let (file_path, explicit) = match path {
        Some(path) => (path.to_path_buf(), true),
        None => match default_config_path() {
            Some(path) => (path, false),
            None => return Ok(Config::default()),
        },
    };
    match std::fs::read_to_string(&file_path) {
        Ok(contents) => toml::from_str(&contents)
            .with_context(|| format!("Invalid TOML in config file {}", file_path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && !explicit => Ok(Config::default()),
        Err(e) => {
            Err(e).with_context(|| format!("Error reading config file {}", file_path.display()))
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn config_should_read_from_explicit_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[data]\nsources = [\"SGU-Solar\", \"SWH-Solar\"]\n").unwrap();
        let config = read_config_from_toml(Some(&path)).unwrap();
        assert_eq!(config.data.sources.len(), 2);
        assert!(config.strict_consistency);
    }

    #[test]
    fn config_should_fail_on_missing_or_invalid_file() {
        let dir = TempDir::new().unwrap();
        assert!(read_config_from_toml(Some(&dir.path().join("missing.toml"))).is_err());
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[data\n").unwrap();
        assert!(read_config_from_toml(Some(&path)).is_err());
    }
}

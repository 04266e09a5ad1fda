//! Command line interface.

use std::path::PathBuf;

use beacon_core::default_config_path;
use clap::Parser;

/// beacon - device presence and geofence tracking server
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "beacon-server")]
#[command(version)]
#[command(about = "Tracks nearby devices against geofences and syncs enter/exit events")]
pub struct Cli {
    /// Configuration file path [default: platform config path]
    #[arg(short, long, env = "BEACON_CONFIG")]
    pub config: Option<PathBuf>,

    /// Keep devices and geofences in memory only; no snapshot is loaded or saved
    #[arg(long)]
    pub ephemeral: bool,
}

impl Cli {
    /// The configuration file to load: the given path, else the platform
    /// default. A missing file means built-in defaults.
    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(default_config_path)
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_config_flag_forms() {
        for args in [
            vec!["beacon-server", "--config", "/tmp/beacon.toml"],
            vec!["beacon-server", "--config=/tmp/beacon.toml"],
            vec!["beacon-server", "-c", "/tmp/beacon.toml"],
        ] {
            let cli = Cli::try_parse_from(args).unwrap();
            assert_eq!(cli.config_path(), PathBuf::from("/tmp/beacon.toml"));
            assert!(!cli.ephemeral);
        }
    }

    #[test]
    fn test_without_config_uses_default_path() {
        let cli = Cli::try_parse_from(["beacon-server", "--ephemeral"]).unwrap();
        assert!(cli.ephemeral);
        if cli.config.is_none() {
            assert_eq!(cli.config_path(), default_config_path());
        }
    }

    #[test]
    fn test_rejects_unknown_flag() {
        assert!(Cli::try_parse_from(["beacon-server", "--verbose"]).is_err());
    }
}

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{
    Config, DEFAULT_INTERVAL_SECS, DEFAULT_TARGET, DEFAULT_THRESHOLD_MS, DEFAULT_TIMEOUT_MS,
};
use crate::prefs::Prefs;

/// Continuous ping monitor with running latency stats and .ping snapshots
#[derive(Parser, Debug, Clone)]
#[command(name = "pingwatch")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Target host to monitor (IP address or hostname; defaults to the saved address)
    pub target: Option<String>,

    /// Probe timeout in milliseconds (100-12000)
    #[arg(short = 't', long = "timeout")]
    pub timeout: Option<u64>,

    /// Seconds between probes (1-60)
    #[arg(short = 'i', long = "interval")]
    pub interval: Option<u64>,

    /// Round trip in ms above which a reply counts as slow (1-5000)
    #[arg(short = 'T', long = "threshold")]
    pub threshold: Option<u32>,

    /// Stop after this many minutes
    #[arg(short = 'd', long = "duration")]
    pub duration: Option<u32>,

    /// Save a .ping snapshot when monitoring stops
    #[arg(short = 's', long = "save")]
    pub save: Option<PathBuf>,

    /// Write the sample history as CSV when done
    #[arg(long = "csv")]
    pub csv: Option<PathBuf>,

    /// Load a .ping snapshot and print it instead of probing
    #[arg(long = "replay", conflicts_with_all = ["target", "save", "duration"])]
    pub replay: Option<PathBuf>,

    /// Store the effective settings as new defaults
    #[arg(long = "remember")]
    pub remember: bool,

    /// Print the stat panel every N probes (0 = only at the end)
    #[arg(long = "stats-every", default_value = "10")]
    pub stats_every: u64,

    /// Log level for diagnostics (error, warn, info, debug, trace)
    #[arg(long = "log-level", default_value = "warn")]
    pub log_level: String,
}

impl Args {
    /// Validate arguments that clap cannot check on its own
    pub fn validate(&self) -> Result<(), String> {
        if let Some(0) = self.duration {
            return Err("Duration must be at least 1 minute".into());
        }

        let level = self.log_level.to_lowercase();
        if !["error", "warn", "info", "debug", "trace"].contains(&level.as_str()) {
            return Err(format!("Unknown log level: {}", self.log_level));
        }

        Ok(())
    }

    /// Build the runtime config: CLI flags > saved prefs > built-in defaults
    pub fn to_config(&self, prefs: &Prefs) -> Config {
        let target = self
            .target
            .clone()
            .or_else(|| prefs.address.clone())
            .unwrap_or_else(|| DEFAULT_TARGET.to_string());
        let timeout = self
            .timeout
            .or(prefs.timeout_ms)
            .unwrap_or(DEFAULT_TIMEOUT_MS);
        let interval = self
            .interval
            .or(prefs.interval_secs)
            .unwrap_or(DEFAULT_INTERVAL_SECS);
        let threshold = self
            .threshold
            .or(prefs.threshold_ms)
            .unwrap_or(DEFAULT_THRESHOLD_MS);

        let config = Config {
            target: target.trim().to_string(),
            timeout: Duration::from_millis(timeout),
            interval: Duration::from_secs(interval),
            threshold_ms: threshold,
            end_time: None,
        };

        match self.duration {
            Some(minutes) => config.run_for_minutes(minutes),
            None => config,
        }
    }
}

/// Prefs holding the values of `config`, for `--remember`
pub fn prefs_from_config(config: &Config) -> Prefs {
    Prefs {
        address: Some(config.target.clone()),
        timeout_ms: Some(config.timeout.as_millis() as u64),
        interval_secs: Some(config.interval.as_secs()),
        threshold_ms: Some(config.threshold_ms),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_prefs() {
        let args = Args::parse_from(["pingwatch"]);
        let config = args.to_config(&Prefs::default());
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_cli_overrides_prefs() {
        let prefs = Prefs {
            address: Some("10.0.0.1".into()),
            timeout_ms: Some(500),
            interval_secs: Some(5),
            threshold_ms: Some(70),
        };
        let args = Args::parse_from(["pingwatch", "1.1.1.1", "-T", "15"]);
        let config = args.to_config(&prefs);

        assert_eq!(config.target, "1.1.1.1");
        assert_eq!(config.threshold_ms, 15);
        assert_eq!(config.timeout, Duration::from_millis(500));
        assert_eq!(config.interval, Duration::from_secs(5));
    }

    #[test]
    fn test_duration_sets_end_time() {
        let args = Args::parse_from(["pingwatch", "1.1.1.1", "--duration", "3"]);
        assert!(args.to_config(&Prefs::default()).end_time.is_some());

        let args = Args::parse_from(["pingwatch", "1.1.1.1", "--duration", "0"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_replay_conflicts_with_target() {
        let result = Args::try_parse_from(["pingwatch", "1.1.1.1", "--replay", "a.ping"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_log_level_validation() {
        let args = Args::parse_from(["pingwatch", "--log-level", "DEBUG"]);
        assert!(args.validate().is_ok());
        let args = Args::parse_from(["pingwatch", "--log-level", "loud"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_prefs_from_config() {
        let config = Config::new("example.com");
        let prefs = prefs_from_config(&config);
        assert_eq!(prefs.address.as_deref(), Some("example.com"));
        assert_eq!(prefs.timeout_ms, Some(1000));
        assert_eq!(prefs.interval_secs, Some(2));
        assert_eq!(prefs.threshold_ms, Some(30));
    }
}

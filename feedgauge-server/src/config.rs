//! Server configuration: CLI flags layered over an optional config file.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::aggregate::IngestMode;

/// How reports are converted to samples, as written in config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ModeSetting {
    /// Producers send pre-computed rates.
    Push,
    /// Producers send raw counts; the server computes rates on a tick.
    Pull,
}

impl From<ModeSetting> for IngestMode {
    fn from(mode: ModeSetting) -> Self {
        match mode {
            ModeSetting::Push => IngestMode::Push,
            ModeSetting::Pull => IngestMode::Pull,
        }
    }
}

/// Complete server settings. Every field has a default, so a bare
/// `feedgauge-server` is a working push-mode server on port 3001.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the NDJSON listener binds to.
    pub listen: String,

    /// Points retained per series (about ten minutes at one point per 15s).
    pub history_points: usize,

    /// Ingestion policy.
    pub mode: ModeSetting,

    /// Pull-mode aggregation tick, seconds.
    pub tick_secs: u64,

    /// Liveness probe interval per subscriber, seconds.
    pub probe_secs: u64,

    /// Probes a peer may leave unanswered before it is terminated.
    pub max_missed_probes: u32,

    /// Maximum concurrent subscribers.
    pub max_subscribers: usize,

    /// Directory holding the history snapshot and sample logs.
    pub data_dir: PathBuf,

    /// Sample log size threshold before rotation, bytes.
    pub max_log_bytes: u64,

    /// Periodic history save cadence, seconds. Zero disables the cadence
    /// (history is still saved at shutdown).
    pub save_secs: u64,

    /// Outbound frames queued per subscriber before frames are dropped.
    pub outbound_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:3001".to_string(),
            history_points: 40,
            mode: ModeSetting::Push,
            tick_secs: 15,
            probe_secs: 30,
            max_missed_probes: 2,
            max_subscribers: 10,
            data_dir: PathBuf::from("data"),
            max_log_bytes: 10 * 1024 * 1024,
            save_secs: 60,
            outbound_queue: 16,
        }
    }
}

impl ServerConfig {
    /// Load settings from a config file (TOML/JSON/YAML, per extension).
    pub fn from_file(path: &std::path::Path) -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_secs)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_secs)
    }

    pub fn save_interval(&self) -> Option<Duration> {
        (self.save_secs > 0).then(|| Duration::from_secs(self.save_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_a_working_push_server() {
        let config = ServerConfig::default();
        assert_eq!(config.mode, ModeSetting::Push);
        assert_eq!(config.history_points, 40);
        assert_eq!(config.max_subscribers, 10);
        assert_eq!(config.save_interval(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn zero_save_secs_disables_cadence() {
        let config = ServerConfig {
            save_secs: 0,
            ..Default::default()
        };
        assert!(config.save_interval().is_none());
    }

    #[test]
    fn file_overrides_merge_over_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "mode = \"pull\"\ntick_secs = 5\nhistory_points = 80").unwrap();

        let config = ServerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.mode, ModeSetting::Pull);
        assert_eq!(config.tick_secs, 5);
        assert_eq!(config.history_points, 80);
        // Untouched fields keep their defaults.
        assert_eq!(config.max_subscribers, 10);
    }
}

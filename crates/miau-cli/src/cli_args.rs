use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser};
use miau_core::LogRotationPolicy;
use miau_gateway::GatewayServerConfig;
use miau_session::{PairingTimings, PresenceDelays};

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(
    name = "miau",
    about = "Multi-tenant WhatsApp gateway with phone-number pairing",
    version
)]
pub struct Cli {
    #[arg(
        long,
        env = "MIAU_BIND",
        default_value = "127.0.0.1:8080",
        help = "Socket address the HTTP gateway listens on"
    )]
    pub bind: String,

    #[arg(
        long = "state-dir",
        env = "MIAU_STATE_DIR",
        default_value = ".miau",
        help = "Directory holding instances.json"
    )]
    pub state_dir: PathBuf,

    #[arg(
        long = "log-dir",
        env = "MIAU_LOG_DIR",
        default_value = "logs",
        help = "Directory for the rotating miau.log file"
    )]
    pub log_dir: PathBuf,

    #[arg(
        long = "log-max-age-hours",
        env = "MIAU_LOG_MAX_AGE_HOURS",
        default_value_t = 36,
        value_parser = parse_positive_u64,
        help = "Log files older than this are deleted by the hourly retention sweep"
    )]
    pub log_max_age_hours: u64,

    #[arg(
        long = "log-rotation-max-bytes",
        value_parser = parse_positive_u64,
        help = "Rotate miau.log once it would exceed this size (falls back to MIAU_LOG_ROTATION_MAX_BYTES)"
    )]
    pub log_rotation_max_bytes: Option<u64>,

    #[arg(
        long = "log-rotation-max-files",
        value_parser = parse_positive_usize,
        help = "Rotated files kept including the live one (falls back to MIAU_LOG_ROTATION_MAX_FILES)"
    )]
    pub log_rotation_max_files: Option<usize>,

    #[arg(
        long = "pairing-window-seconds",
        env = "MIAU_PAIRING_WINDOW_SECONDS",
        default_value_t = 160,
        value_parser = parse_positive_u64,
        help = "Lifetime of an issued pairing code"
    )]
    pub pairing_window_seconds: u64,

    #[arg(
        long = "pairing-grace-seconds",
        env = "MIAU_PAIRING_GRACE_SECONDS",
        default_value_t = 30,
        help = "Retention of an expired pairing session before it is reclaimed"
    )]
    pub pairing_grace_seconds: u64,

    #[arg(
        long = "pairing-poll-interval-ms",
        env = "MIAU_PAIRING_POLL_INTERVAL_MS",
        default_value_t = 2_000,
        value_parser = parse_positive_u64,
        help = "How often the pairing observer checks for a completed login"
    )]
    pub pairing_poll_interval_ms: u64,

    #[arg(
        long = "presence-simulation",
        env = "MIAU_PRESENCE_SIMULATION",
        default_value_t = true,
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        help = "Announce composing presence and wait a typing delay before each send"
    )]
    pub presence_simulation: bool,

    #[arg(
        long = "media-timeout-ms",
        env = "MIAU_MEDIA_TIMEOUT_MS",
        default_value_t = 30_000,
        value_parser = parse_positive_u64,
        help = "Timeout for downloading media referenced by URL"
    )]
    pub media_timeout_ms: u64,

    #[arg(
        long = "api-key",
        env = "MIAU_API_KEY",
        help = "Static key required in the apikey header of every request except /healthz"
    )]
    pub api_key: Option<String>,

    #[arg(
        long = "dry-run-auto-login",
        env = "MIAU_DRY_RUN_AUTO_LOGIN",
        default_value_t = false,
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        help = "Offline protocol client reports a completed login as soon as a code is issued"
    )]
    pub dry_run_auto_login: bool,
}

impl Cli {
    pub fn instances_path(&self) -> PathBuf {
        self.state_dir.join("instances.json")
    }

    pub fn log_max_age(&self) -> Duration {
        Duration::from_secs(self.log_max_age_hours.saturating_mul(60 * 60))
    }

    pub fn log_rotation_policy(&self) -> LogRotationPolicy {
        let from_env = LogRotationPolicy::from_env();
        LogRotationPolicy {
            max_bytes: self.log_rotation_max_bytes.unwrap_or(from_env.max_bytes),
            max_files: self.log_rotation_max_files.unwrap_or(from_env.max_files),
        }
    }

    pub fn pairing_timings(&self) -> PairingTimings {
        let window = Duration::from_secs(self.pairing_window_seconds);
        PairingTimings {
            window,
            grace: Duration::from_secs(self.pairing_grace_seconds),
            poll_interval: Duration::from_millis(self.pairing_poll_interval_ms),
            observer_timeout: window,
        }
    }

    pub fn presence_delays(&self) -> PresenceDelays {
        PresenceDelays {
            enabled: self.presence_simulation,
            ..PresenceDelays::default()
        }
    }

    pub fn media_timeout(&self) -> Duration {
        Duration::from_millis(self.media_timeout_ms)
    }

    pub fn gateway_config(&self) -> GatewayServerConfig {
        GatewayServerConfig {
            bind: self.bind.clone(),
            api_key: self
                .api_key
                .as_deref()
                .map(str::trim)
                .filter(|key| !key.is_empty())
                .map(str::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_defaults_match_documented_values() {
        let cli = Cli::try_parse_from(["miau"]).expect("parse defaults");
        assert_eq!(cli.bind, "127.0.0.1:8080");
        assert_eq!(cli.instances_path(), PathBuf::from(".miau/instances.json"));
        assert_eq!(cli.log_max_age(), Duration::from_secs(36 * 3600));
        assert_eq!(cli.pairing_timings(), PairingTimings::default());
        assert_eq!(cli.presence_delays(), PresenceDelays::default());
        assert_eq!(cli.media_timeout(), Duration::from_secs(30));
        assert_eq!(cli.gateway_config().api_key, None);
        assert!(!cli.dry_run_auto_login);
    }

    #[test]
    fn functional_flags_override_runtime_configs() {
        let cli = Cli::try_parse_from([
            "miau",
            "--bind",
            "0.0.0.0:9000",
            "--pairing-window-seconds",
            "60",
            "--pairing-grace-seconds",
            "0",
            "--presence-simulation=false",
            "--log-rotation-max-bytes",
            "4096",
            "--api-key",
            "  secret ",
        ])
        .expect("parse flags");
        let timings = cli.pairing_timings();
        assert_eq!(timings.window, Duration::from_secs(60));
        assert_eq!(timings.grace, Duration::ZERO);
        assert_eq!(timings.observer_timeout, Duration::from_secs(60));
        assert!(!cli.presence_delays().enabled);
        assert_eq!(cli.log_rotation_policy().max_bytes, 4096);
        let config = cli.gateway_config();
        assert_eq!(config.bind, "0.0.0.0:9000");
        assert_eq!(config.api_key.as_deref(), Some("secret"));
    }

    #[test]
    fn regression_zero_pairing_window_is_rejected() {
        let error = Cli::try_parse_from(["miau", "--pairing-window-seconds", "0"])
            .expect_err("zero window");
        assert!(error.to_string().contains("greater than 0"));
    }
}

//! Server and session configuration.
//!
//! Defaults come from the named constants below. The server binary builds a
//! [`ServerConfig`] from its command line with [`ServerConfig::from_args`].

use crate::network::tcp_transport::MAX_FRAME_SIZE;
use crate::utils::log::{Level, ParseLevelError};
use crate::virtual_machine::vm::Limits;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Pause between two steps when the client sends no `@d` directive.
pub const DEFAULT_DELAY: Duration = Duration::from_millis(150);
/// Larger `@d` values are clamped to this.
pub const MAX_DELAY: Duration = Duration::from_secs(10);
/// How long a paused `read` waits for input.
pub const INPUT_TIMEOUT: Duration = Duration::from_secs(60);
/// Wall-clock budget of one run, pauses included.
pub const MAX_RUN_TIME: Duration = Duration::from_secs(300);
/// Inputs buffered while the machine is running.
pub const INPUT_QUEUE_CAPACITY: usize = 32;
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:7000";

/// Errors produced while reading the command line.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} requires an argument")]
    MissingValue(String),
    #[error("invalid value {value:?} for {flag}")]
    InvalidValue { flag: String, value: String },
    #[error("invalid listen address: {0}")]
    InvalidAddress(String),
    #[error("unexpected argument: {0}")]
    UnexpectedArgument(String),
    #[error(transparent)]
    InvalidLogLevel(#[from] ParseLevelError),
}

/// Per-session pacing and resource settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// Initial pacing delay.
    pub delay: Duration,
    pub max_delay: Duration,
    pub input_timeout: Duration,
    pub max_run_time: Duration,
    pub limits: Limits,
    pub input_queue: usize,
    /// Push a random value in `1..=100` before the first step.
    pub seed_input: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            delay: DEFAULT_DELAY,
            max_delay: MAX_DELAY,
            input_timeout: INPUT_TIMEOUT,
            max_run_time: MAX_RUN_TIME,
            limits: Limits::default(),
            input_queue: INPUT_QUEUE_CAPACITY,
            seed_input: false,
        }
    }
}

impl SessionConfig {
    /// Clamps a requested delay to `max_delay`.
    pub fn clamp_delay(&self, delay: Duration) -> Duration {
        delay.min(self.max_delay)
    }
}

/// Settings of the TCP server binary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub max_frame: usize,
    pub log_level: Level,
    pub session: SessionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 7000)),
            max_frame: MAX_FRAME_SIZE,
            log_level: Level::Info,
            session: SessionConfig::default(),
        }
    }
}

fn parse_value<T: FromStr>(flag: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        flag: flag.to_string(),
        value: value.to_string(),
    })
}

fn parse_seconds(flag: &str, value: &str) -> Result<Duration, ConfigError> {
    let secs: f64 = parse_value(flag, value)?;
    Duration::try_from_secs_f64(secs).map_err(|_| ConfigError::InvalidValue {
        flag: flag.to_string(),
        value: value.to_string(),
    })
}

impl ServerConfig {
    /// Builds a config from command-line arguments (without the program
    /// name) and the value of the log environment variable, if any.
    ///
    /// `--log-level` takes precedence over the environment.
    pub fn from_args(args: &[String], env_level: Option<&str>) -> Result<Self, ConfigError> {
        let mut config = ServerConfig::default();
        if let Some(level) = env_level {
            config.log_level = level.parse()?;
        }

        let mut i = 0;
        if let Some(first) = args.first() {
            if !first.starts_with('-') {
                config.listen = first
                    .parse()
                    .map_err(|_| ConfigError::InvalidAddress(first.clone()))?;
                i = 1;
            }
        }

        while i < args.len() {
            let flag = args[i].as_str();
            if flag == "--seed-input" {
                config.session.seed_input = true;
                i += 1;
                continue;
            }

            let value = args
                .get(i + 1)
                .ok_or_else(|| ConfigError::MissingValue(flag.to_string()))?;
            let session = &mut config.session;
            match flag {
                "--delay" => session.delay = parse_seconds(flag, value)?,
                "--max-delay" => session.max_delay = parse_seconds(flag, value)?,
                "--input-timeout" => session.input_timeout = parse_seconds(flag, value)?,
                "--run-timeout" => session.max_run_time = parse_seconds(flag, value)?,
                "--max-stack" => session.limits.max_stack_depth = parse_value(flag, value)?,
                "--max-steps" => {
                    let steps: u64 = parse_value(flag, value)?;
                    session.limits.max_steps = (steps > 0).then_some(steps);
                }
                "--max-frame" => config.max_frame = parse_value(flag, value)?,
                "--log-level" => config.log_level = value.parse()?,
                other => return Err(ConfigError::UnexpectedArgument(other.to_string())),
            }
            i += 2;
        }

        config.session.delay = config.session.clamp_delay(config.session.delay);
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn defaults() {
        let config = ServerConfig::from_args(&[], None).unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.listen.to_string(), DEFAULT_LISTEN_ADDR);
        assert_eq!(config.session.delay, DEFAULT_DELAY);
        assert_eq!(config.session.limits.max_steps, Some(100_000));
        assert!(!config.session.seed_input);
    }

    #[test]
    fn parses_all_flags() {
        let config = ServerConfig::from_args(
            &args(&[
                "0.0.0.0:9000",
                "--delay",
                "0.5",
                "--max-steps",
                "0",
                "--max-stack",
                "64",
                "--input-timeout",
                "5",
                "--run-timeout",
                "30",
                "--seed-input",
                "--max-frame",
                "1024",
                "--log-level",
                "debug",
            ]),
            None,
        )
        .unwrap();
        assert_eq!(config.listen.to_string(), "0.0.0.0:9000");
        assert_eq!(config.session.delay, Duration::from_millis(500));
        assert_eq!(config.session.limits.max_steps, None);
        assert_eq!(config.session.limits.max_stack_depth, 64);
        assert_eq!(config.session.input_timeout, Duration::from_secs(5));
        assert_eq!(config.session.max_run_time, Duration::from_secs(30));
        assert!(config.session.seed_input);
        assert_eq!(config.max_frame, 1024);
        assert_eq!(config.log_level, Level::Debug);
    }

    #[test]
    fn log_level_flag_overrides_env() {
        let config = ServerConfig::from_args(&[], Some("warn")).unwrap();
        assert_eq!(config.log_level, Level::Warn);
        let config =
            ServerConfig::from_args(&args(&["--log-level", "error"]), Some("warn")).unwrap();
        assert_eq!(config.log_level, Level::Error);
        assert!(matches!(
            ServerConfig::from_args(&[], Some("chatty")),
            Err(ConfigError::InvalidLogLevel(_))
        ));
    }

    #[test]
    fn delay_is_clamped() {
        let config = ServerConfig::from_args(&args(&["--delay", "60"]), None).unwrap();
        assert_eq!(config.session.delay, MAX_DELAY);
    }

    #[test]
    fn rejects_bad_arguments() {
        assert_eq!(
            ServerConfig::from_args(&args(&["--delay"]), None),
            Err(ConfigError::MissingValue("--delay".to_string()))
        );
        assert!(matches!(
            ServerConfig::from_args(&args(&["--delay", "-2"]), None),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            ServerConfig::from_args(&args(&["--max-steps", "many"]), None),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert_eq!(
            ServerConfig::from_args(&args(&["nowhere"]), None),
            Err(ConfigError::InvalidAddress("nowhere".to_string()))
        );
        assert_eq!(
            ServerConfig::from_args(&args(&["--verbose", "1"]), None),
            Err(ConfigError::UnexpectedArgument("--verbose".to_string()))
        );
    }
}

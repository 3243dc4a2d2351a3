//! Process configuration loaded from environment variables.

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use projections::{ConflictPolicy, StaleWritePolicy};
use thiserror::Error;
use transport::{AwsSettings, ReceiveRequest};

use crate::forwarder::ForwarderSettings;
use crate::worker::WorkerSettings;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{var}={value} is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}', expected text or json")),
        }
    }
}

/// Configuration shared by the forwarder and the projection worker.
///
/// Identifiers only one process needs are optional here and demanded by
/// that process through the accessor methods.
///
/// | Variable | Default |
/// |---|---|
/// | `EVENT_STREAM_NAME` | required by the forwarder |
/// | `EVENT_QUEUE_URL` | required |
/// | `DEAD_LETTER_QUEUE_URL` | none |
/// | `READ_DATABASE_URL` | required |
/// | `AWS_REGION` | `us-east-1` |
/// | `AWS_ENDPOINT_URL` | none |
/// | `FORWARDER_BATCH_SIZE` | `10` |
/// | `FORWARDER_POLL_INTERVAL_MS` | `2000` |
/// | `FORWARDER_ERROR_BACKOFF_MS` | `5000` |
/// | `WORKER_MAX_MESSAGES` | `10` (1 to 10) |
/// | `WORKER_WAIT_TIME_SECS` | `5` |
/// | `WORKER_VISIBILITY_TIMEOUT_SECS` | `30` |
/// | `WORKER_IDLE_DELAY_MS` | `2000` |
/// | `WORKER_ERROR_BACKOFF_MS` | `5000` |
/// | `WORKER_MAX_RECEIVE_COUNT` | `5` |
/// | `PROJECTION_CREATE_MODE` | `insert-or-ignore` |
/// | `PROJECTION_STALE_WRITES` | `skip-older` |
/// | `RUN_MIGRATIONS` | `false` |
/// | `OPS_HOST` / `OPS_PORT` | `0.0.0.0` / `9090` |
/// | `RUST_LOG` / `LOG_FORMAT` | `info` / `text` |
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub stream_name: Option<String>,
    pub queue_url: Option<String>,
    pub dead_letter_queue_url: Option<String>,
    pub database_url: Option<String>,
    pub aws: AwsSettings,
    pub forwarder: ForwarderSettings,
    pub worker: WorkerSettings,
    pub run_migrations: bool,
    pub ops_host: String,
    pub ops_port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            stream_name: None,
            queue_url: None,
            dead_letter_queue_url: None,
            database_url: None,
            aws: AwsSettings::default().with_region("us-east-1"),
            forwarder: ForwarderSettings::default(),
            worker: WorkerSettings::default(),
            run_migrations: false,
            ops_host: "0.0.0.0".to_string(),
            ops_port: 9090,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
        }
    }
}

impl Config {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Loads configuration through `lookup`, falling back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(lookup);
        let defaults = Self::default();
        let forwarder_defaults = defaults.forwarder;
        let worker_defaults = defaults.worker;

        let mut aws = AwsSettings::default()
            .with_region(env.string("AWS_REGION").unwrap_or_else(|| "us-east-1".to_string()));
        if let Some(endpoint) = env.string("AWS_ENDPOINT_URL") {
            aws = aws.with_endpoint(endpoint);
        }

        let forwarder = ForwarderSettings {
            batch_size: env.parse("FORWARDER_BATCH_SIZE", forwarder_defaults.batch_size)?,
            poll_interval: env.millis("FORWARDER_POLL_INTERVAL_MS", forwarder_defaults.poll_interval)?,
            error_backoff: env.millis("FORWARDER_ERROR_BACKOFF_MS", forwarder_defaults.error_backoff)?,
        };
        if forwarder.batch_size == 0 {
            return Err(ConfigError::Invalid {
                var: "FORWARDER_BATCH_SIZE",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }

        let worker = WorkerSettings {
            receive: ReceiveRequest {
                max_messages: env.parse("WORKER_MAX_MESSAGES", worker_defaults.receive.max_messages)?,
                wait_time: env.secs("WORKER_WAIT_TIME_SECS", worker_defaults.receive.wait_time)?,
                visibility_timeout: env.secs(
                    "WORKER_VISIBILITY_TIMEOUT_SECS",
                    worker_defaults.receive.visibility_timeout,
                )?,
            },
            idle_delay: env.millis("WORKER_IDLE_DELAY_MS", worker_defaults.idle_delay)?,
            error_backoff: env.millis("WORKER_ERROR_BACKOFF_MS", worker_defaults.error_backoff)?,
            max_receive_count: env.parse("WORKER_MAX_RECEIVE_COUNT", worker_defaults.max_receive_count)?,
            conflict_policy: env.parse::<ConflictPolicy>(
                "PROJECTION_CREATE_MODE",
                worker_defaults.conflict_policy,
            )?,
            stale_write_policy: env.parse::<StaleWritePolicy>(
                "PROJECTION_STALE_WRITES",
                worker_defaults.stale_write_policy,
            )?,
        };
        // SQS refuses receive batches outside this range.
        let max_messages = worker.receive.max_messages;
        if !(1..=10).contains(&max_messages) {
            return Err(ConfigError::Invalid {
                var: "WORKER_MAX_MESSAGES",
                value: max_messages.to_string(),
                reason: "must be between 1 and 10".into(),
            });
        }

        Ok(Self {
            stream_name: env.string("EVENT_STREAM_NAME"),
            queue_url: env.string("EVENT_QUEUE_URL"),
            dead_letter_queue_url: env.string("DEAD_LETTER_QUEUE_URL"),
            database_url: env.string("READ_DATABASE_URL"),
            aws,
            forwarder,
            worker,
            run_migrations: env.parse("RUN_MIGRATIONS", defaults.run_migrations)?,
            ops_host: env.string("OPS_HOST").unwrap_or(defaults.ops_host),
            ops_port: env.parse("OPS_PORT", defaults.ops_port)?,
            log_level: env.string("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: env.parse("LOG_FORMAT", defaults.log_format)?,
        })
    }

    pub fn stream_name(&self) -> Result<&str, ConfigError> {
        self.stream_name
            .as_deref()
            .ok_or(ConfigError::Missing("EVENT_STREAM_NAME"))
    }

    pub fn queue_url(&self) -> Result<&str, ConfigError> {
        self.queue_url
            .as_deref()
            .ok_or(ConfigError::Missing("EVENT_QUEUE_URL"))
    }

    pub fn database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .ok_or(ConfigError::Missing("READ_DATABASE_URL"))
    }

    /// Returns the `"host:port"` bind address of the ops endpoint.
    pub fn ops_addr(&self) -> String {
        format!("{}:{}", self.ops_host, self.ops_port)
    }
}

struct Lookup<F>(F);

impl<F> Lookup<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Non-empty value of `var`.
    fn string(&self, var: &str) -> Option<String> {
        (self.0)(var).filter(|value| !value.trim().is_empty())
    }

    fn parse<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.string(var) {
            None => Ok(default),
            Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                var,
                reason: e.to_string(),
                value,
            }),
        }
    }

    fn millis(&self, var: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        let default = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
        self.parse(var, default).map(Duration::from_millis)
    }

    fn secs(&self, var: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        self.parse(var, default.as_secs()).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|var| vars.get(var).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = load(&[]).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.forwarder.batch_size, 10);
        assert_eq!(config.forwarder.poll_interval, Duration::from_secs(2));
        assert_eq!(config.forwarder.error_backoff, Duration::from_secs(5));
        assert_eq!(config.worker.receive, ReceiveRequest::default());
        assert_eq!(config.worker.max_receive_count, 5);
        assert_eq!(config.aws.region.as_deref(), Some("us-east-1"));
        assert!(!config.run_migrations);
    }

    #[test]
    fn test_required_identifiers_are_reported_by_name() {
        let config = load(&[]).unwrap();
        assert_eq!(
            config.stream_name().unwrap_err(),
            ConfigError::Missing("EVENT_STREAM_NAME")
        );
        assert_eq!(
            config.queue_url().unwrap_err(),
            ConfigError::Missing("EVENT_QUEUE_URL")
        );
        assert_eq!(
            config.database_url().unwrap_err(),
            ConfigError::Missing("READ_DATABASE_URL")
        );
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("EVENT_STREAM_NAME", "intervention-events"),
            ("EVENT_QUEUE_URL", "http://localhost:4566/000000000000/events"),
            ("AWS_ENDPOINT_URL", "http://localhost:4566"),
            ("FORWARDER_BATCH_SIZE", "25"),
            ("WORKER_WAIT_TIME_SECS", "20"),
            ("PROJECTION_CREATE_MODE", "strict"),
            ("PROJECTION_STALE_WRITES", "apply"),
            ("RUN_MIGRATIONS", "true"),
            ("OPS_PORT", "9100"),
            ("LOG_FORMAT", "json"),
        ])
        .unwrap();

        assert_eq!(config.stream_name().unwrap(), "intervention-events");
        assert_eq!(config.aws.endpoint_url.as_deref(), Some("http://localhost:4566"));
        assert_eq!(config.forwarder.batch_size, 25);
        assert_eq!(config.worker.receive.wait_time, Duration::from_secs(20));
        assert_eq!(config.worker.conflict_policy, ConflictPolicy::Strict);
        assert_eq!(config.worker.stale_write_policy, StaleWritePolicy::Apply);
        assert!(config.run_migrations);
        assert_eq!(config.ops_addr(), "0.0.0.0:9100");
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_unparsable_numbers_are_fatal() {
        let err = load(&[("FORWARDER_POLL_INTERVAL_MS", "soon")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                var: "FORWARDER_POLL_INTERVAL_MS",
                ..
            }
        ));

        let err = load(&[("FORWARDER_BATCH_SIZE", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_receive_batch_must_fit_sqs_limits() {
        for value in ["0", "11"] {
            let err = load(&[("WORKER_MAX_MESSAGES", value)]).unwrap_err();
            assert!(matches!(
                &err,
                ConfigError::Invalid {
                    var: "WORKER_MAX_MESSAGES",
                    value: v,
                    ..
                } if v == value
            ));
        }

        let config = load(&[("WORKER_MAX_MESSAGES", "1")]).unwrap();
        assert_eq!(config.worker.receive.max_messages, 1);
        let config = load(&[("WORKER_MAX_MESSAGES", "10")]).unwrap();
        assert_eq!(config.worker.receive.max_messages, 10);
    }

    #[test]
    fn test_unknown_policy_is_fatal() {
        let err = load(&[("PROJECTION_CREATE_MODE", "upsert")]).unwrap_err();
        assert!(err.to_string().contains("PROJECTION_CREATE_MODE"));
    }

    #[test]
    fn test_blank_values_fall_back_to_defaults() {
        let config = load(&[("OPS_PORT", "  "), ("DEAD_LETTER_QUEUE_URL", "")]).unwrap();
        assert_eq!(config.ops_port, 9090);
        assert_eq!(config.dead_letter_queue_url, None);
    }
}

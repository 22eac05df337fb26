use std::time::Duration;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use jobwatch_observer::{ObserverConfig, OutputPatternSet};
use serde_json::Value;

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

fn parse_json_value(value: &str) -> Result<Value, String> {
    serde_json::from_str(value).map_err(|error| format!("failed to parse JSON: {error}"))
}

#[derive(Debug, Parser)]
#[command(
    name = "jobwatch",
    about = "Follow long-running server jobs until they complete or fail",
    version
)]
pub(crate) struct Cli {
    #[arg(
        long = "api-base",
        env = "JOBWATCH_API_BASE",
        default_value = "http://127.0.0.1:8080/api",
        help = "Base URL of the job record API; records are read from {api-base}/jobs/{id}"
    )]
    pub(crate) api_base: String,

    #[arg(
        long = "ws-base",
        env = "JOBWATCH_WS_BASE",
        help = "Push channel base URL; derived from --api-base (http->ws, https->wss) if omitted"
    )]
    pub(crate) ws_base: Option<String>,

    #[arg(
        long = "auth-token",
        env = "JOBWATCH_AUTH_TOKEN",
        hide_env_values = true,
        help = "Bearer token sent to the record API and the push channel"
    )]
    pub(crate) auth_token: Option<String>,

    #[arg(
        long = "request-timeout-ms",
        env = "JOBWATCH_REQUEST_TIMEOUT_MS",
        default_value_t = 10_000,
        value_parser = parse_positive_u64,
        help = "Timeout for a single job record request"
    )]
    pub(crate) request_timeout_ms: u64,

    #[command(subcommand)]
    pub(crate) command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub(crate) enum CliCommand {
    /// Attach to a job and report progress until a terminal outcome.
    Watch(WatchArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum CliPatternPreset {
    Standard,
    Provisioning,
    Generation,
    None,
}

impl From<CliPatternPreset> for OutputPatternSet {
    fn from(value: CliPatternPreset) -> Self {
        match value {
            CliPatternPreset::Standard => OutputPatternSet::standard(),
            CliPatternPreset::Provisioning => OutputPatternSet::provisioning(),
            CliPatternPreset::Generation => OutputPatternSet::generation(),
            CliPatternPreset::None => OutputPatternSet::empty(),
        }
    }
}

#[derive(Debug, Args)]
pub(crate) struct WatchArgs {
    #[arg(value_name = "JOB_ID", help = "Identifier of the job to follow")]
    pub(crate) job_id: String,

    #[arg(
        long,
        default_value_t = false,
        action = ArgAction::SetTrue,
        help = "Emit one JSON object per line instead of human-readable progress"
    )]
    pub(crate) json: bool,

    #[arg(
        long = "no-push",
        env = "JOBWATCH_NO_PUSH",
        default_value_t = false,
        action = ArgAction::SetTrue,
        help = "Skip the websocket push channel and rely on polling"
    )]
    pub(crate) no_push: bool,

    #[arg(
        long,
        env = "JOBWATCH_PATTERNS",
        value_enum,
        default_value_t = CliPatternPreset::Standard,
        help = "Output phrase preset used to detect completion from job output"
    )]
    pub(crate) patterns: CliPatternPreset,

    #[arg(
        long = "poll-grace-ms",
        env = "JOBWATCH_POLL_GRACE_MS",
        default_value_t = 3_000,
        help = "Delay before the first status poll"
    )]
    pub(crate) poll_grace_ms: u64,

    #[arg(
        long = "poll-interval-ms",
        env = "JOBWATCH_POLL_INTERVAL_MS",
        default_value_t = 5_000,
        value_parser = parse_positive_u64,
        help = "Interval between status polls"
    )]
    pub(crate) poll_interval_ms: u64,

    #[arg(
        long = "recheck-interval-ms",
        env = "JOBWATCH_RECHECK_INTERVAL_MS",
        default_value_t = 30_000,
        value_parser = parse_positive_u64,
        help = "Interval of the deadline guard's authoritative re-check"
    )]
    pub(crate) recheck_interval_ms: u64,

    #[arg(
        long = "max-wait-secs",
        env = "JOBWATCH_MAX_WAIT_SECS",
        default_value_t = 900,
        value_parser = parse_positive_u64,
        help = "Hard ceiling after which a still-running job is reported as timed out"
    )]
    pub(crate) max_wait_secs: u64,

    #[arg(
        long = "reconcile-attempts",
        env = "JOBWATCH_RECONCILE_ATTEMPTS",
        default_value_t = 3,
        value_parser = parse_positive_usize,
        help = "Authoritative result fetch attempts after a success signal"
    )]
    pub(crate) reconcile_attempts: usize,

    #[arg(
        long = "reconcile-base-delay-ms",
        env = "JOBWATCH_RECONCILE_BASE_DELAY_MS",
        default_value_t = 1_000,
        value_parser = parse_positive_u64,
        help = "Base delay of the linear backoff between reconciliation attempts"
    )]
    pub(crate) reconcile_base_delay_ms: u64,

    #[arg(
        long = "default-result",
        value_parser = parse_json_value,
        help = "JSON value reported as the result when no payload can be obtained"
    )]
    pub(crate) default_result: Option<Value>,
}

impl WatchArgs {
    pub(crate) fn observer_config(&self) -> ObserverConfig {
        ObserverConfig {
            poll_grace: Duration::from_millis(self.poll_grace_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            recheck_interval: Duration::from_millis(self.recheck_interval_ms),
            hard_ceiling: Duration::from_secs(self.max_wait_secs),
            reconcile_max_attempts: self.reconcile_attempts,
            reconcile_base_delay: Duration::from_millis(self.reconcile_base_delay_ms),
            patterns: self.patterns.into(),
            ..ObserverConfig::default()
        }
    }
}

//! Gate configuration structures.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::GateError;

/// Environment variable prefix read by [`GateConfig::from_env`].
pub const ENV_PREFIX: &str = "OFFLOAD_GATE_";

const MIN_STACK_SIZE: usize = 64 * 1024;

/// Kind of external worker used for `CpuBound` work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerKind {
    /// Dedicated OS threads.
    #[default]
    Thread,
    /// Isolated OS processes running registered jobs.
    Process,
}

impl FromStr for WorkerKind {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "thread" => Ok(Self::Thread),
            "process" => Ok(Self::Process),
            other => Err(GateError::InvalidConfig(format!(
                "unknown worker kind `{other}` (expected thread or process)"
            ))),
        }
    }
}

/// What happens when every worker is busy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Queue up to `max_queue_depth` items, then reject.
    #[default]
    Queue,
    /// Reject as soon as all workers are busy.
    Reject,
}

impl FromStr for OverflowPolicy {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "queue" => Ok(Self::Queue),
            "reject" => Ok(Self::Reject),
            other => Err(GateError::InvalidConfig(format!(
                "unknown overflow policy `{other}` (expected queue or reject)"
            ))),
        }
    }
}

/// Program launched for process-offloaded jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessWorkerConfig {
    /// Worker executable.
    pub program: PathBuf,
    /// Extra arguments passed to every worker.
    #[serde(default)]
    pub args: Vec<String>,
}

impl ProcessWorkerConfig {
    /// Worker config for `program` without extra arguments.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Re-execute the current binary as its own worker.
    ///
    /// Pair with [`crate::infra::process::serve_if_worker`] at the top of
    /// `main`.
    ///
    /// # Errors
    ///
    /// Returns `GateError::InvalidConfig` if the current executable cannot
    /// be determined.
    pub fn current_exe() -> Result<Self, GateError> {
        std::env::current_exe()
            .map(Self::new)
            .map_err(|e| GateError::InvalidConfig(format!("locating current executable: {e}")))
    }

    /// Append an argument.
    #[must_use]
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

/// Offload gate configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateConfig {
    /// Upper bound on concurrently executing offloaded items.
    #[serde(default = "default_concurrency")]
    pub max_worker_concurrency: usize,
    /// Worker kind for `CpuBound` work.
    #[serde(default)]
    pub worker_kind: WorkerKind,
    /// Applied to items without their own timeout.
    #[serde(default)]
    pub default_timeout_ms: Option<u64>,
    /// Waiting items allowed beyond the running ones. Defaults to
    /// `max_worker_concurrency`.
    #[serde(default)]
    pub max_queue_depth: Option<usize>,
    /// Behaviour when all workers are busy.
    #[serde(default)]
    pub overflow: OverflowPolicy,
    /// Stack size of worker threads in bytes.
    #[serde(default = "default_stack_size")]
    pub thread_stack_size: usize,
    /// How long a draining shutdown waits for each worker thread to exit.
    #[serde(default = "default_join_timeout_ms")]
    pub shutdown_join_timeout_ms: u64,
    /// Worker program for process offload.
    #[serde(default)]
    pub process: Option<ProcessWorkerConfig>,
}

fn default_concurrency() -> usize {
    num_cpus::get().max(1)
}

const fn default_stack_size() -> usize {
    2 * 1024 * 1024
}

/// Whole milliseconds, rounding a nonzero remainder below 1ms up.
fn duration_ms(duration: Duration) -> u64 {
    match u64::try_from(duration.as_millis()).unwrap_or(u64::MAX) {
        0 if !duration.is_zero() => 1,
        ms => ms,
    }
}

const fn default_join_timeout_ms() -> u64 {
    5_000
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            max_worker_concurrency: default_concurrency(),
            worker_kind: WorkerKind::Thread,
            default_timeout_ms: None,
            max_queue_depth: None,
            overflow: OverflowPolicy::Queue,
            thread_stack_size: default_stack_size(),
            shutdown_join_timeout_ms: default_join_timeout_ms(),
            process: None,
        }
    }
}

impl GateConfig {
    /// Defaults: one worker per CPU, thread workers, no timeout.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of concurrently executing offloaded items.
    #[must_use]
    pub const fn with_max_worker_concurrency(mut self, n: usize) -> Self {
        self.max_worker_concurrency = n;
        self
    }

    /// Set the worker kind for `CpuBound` work.
    #[must_use]
    pub const fn with_worker_kind(mut self, kind: WorkerKind) -> Self {
        self.worker_kind = kind;
        self
    }

    /// Set the default per-item timeout.
    ///
    /// Sub-millisecond values round up to 1ms; values beyond `u64::MAX`
    /// milliseconds saturate.
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout_ms = Some(duration_ms(timeout));
        self
    }

    /// Set the queue depth.
    #[must_use]
    pub const fn with_max_queue_depth(mut self, depth: usize) -> Self {
        self.max_queue_depth = Some(depth);
        self
    }

    /// Set the overflow policy.
    #[must_use]
    pub const fn with_overflow(mut self, overflow: OverflowPolicy) -> Self {
        self.overflow = overflow;
        self
    }

    /// Set the worker thread stack size.
    #[must_use]
    pub const fn with_thread_stack_size(mut self, bytes: usize) -> Self {
        self.thread_stack_size = bytes;
        self
    }

    /// Set the per-worker join timeout used by draining shutdown.
    #[must_use]
    pub fn with_shutdown_join_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_join_timeout_ms = duration_ms(timeout);
        self
    }

    /// Configure the process worker program.
    #[must_use]
    pub fn with_process(mut self, process: ProcessWorkerConfig) -> Self {
        self.process = Some(process);
        self
    }

    /// Default per-item timeout, if any.
    #[must_use]
    pub const fn default_timeout(&self) -> Option<Duration> {
        match self.default_timeout_ms {
            Some(ms) => Some(Duration::from_millis(ms)),
            None => None,
        }
    }

    /// Effective queue depth after applying the overflow policy.
    #[must_use]
    pub fn queue_depth(&self) -> usize {
        match self.overflow {
            OverflowPolicy::Reject => 0,
            OverflowPolicy::Queue => self.max_queue_depth.unwrap_or(self.max_worker_concurrency),
        }
    }

    /// Join timeout applied per worker thread.
    #[must_use]
    pub const fn shutdown_join_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_join_timeout_ms)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns `GateError::InvalidConfig` describing the first bad value.
    pub fn validate(&self) -> Result<(), GateError> {
        let invalid = |msg: &str| Err(GateError::InvalidConfig(msg.into()));
        if self.max_worker_concurrency == 0 {
            return invalid("max_worker_concurrency must be greater than 0");
        }
        if self.default_timeout_ms == Some(0) {
            return invalid("default_timeout_ms must be greater than 0");
        }
        if self.thread_stack_size < MIN_STACK_SIZE {
            return invalid("thread_stack_size must be at least 64 KiB");
        }
        if self.shutdown_join_timeout_ms == 0 {
            return invalid("shutdown_join_timeout_ms must be greater than 0");
        }
        match &self.process {
            Some(p) if p.program.as_os_str().is_empty() => {
                return invalid("process.program must not be empty");
            }
            None if self.worker_kind == WorkerKind::Process => {
                return invalid("worker_kind = process requires a process worker program");
            }
            _ => {}
        }
        Ok(())
    }

    /// Parse gate configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns `GateError::InvalidConfig` on parse or validation failure.
    pub fn from_json_str(input: &str) -> Result<Self, GateError> {
        let cfg: Self = serde_json::from_str(input)
            .map_err(|e| GateError::InvalidConfig(format!("parse error: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load configuration from `OFFLOAD_GATE_*` environment variables.
    ///
    /// A `.env` file in the working directory is loaded first if present.
    /// Unset variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns `GateError::InvalidConfig` for unparsable or invalid values.
    pub fn from_env() -> Result<Self, GateError> {
        // A missing .env file is fine.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup using the
    /// `OFFLOAD_GATE_*` variable names.
    ///
    /// # Errors
    ///
    /// Returns `GateError::InvalidConfig` for unparsable or invalid values.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, GateError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));
        let mut cfg = Self::default();

        if let Some(v) = get("MAX_WORKER_CONCURRENCY") {
            cfg.max_worker_concurrency = parse_var("MAX_WORKER_CONCURRENCY", &v)?;
        }
        if let Some(v) = get("WORKER_KIND") {
            cfg.worker_kind = v.parse()?;
        }
        if let Some(v) = get("DEFAULT_TIMEOUT_MS") {
            cfg.default_timeout_ms = Some(parse_var("DEFAULT_TIMEOUT_MS", &v)?);
        }
        if let Some(v) = get("MAX_QUEUE_DEPTH") {
            cfg.max_queue_depth = Some(parse_var("MAX_QUEUE_DEPTH", &v)?);
        }
        if let Some(v) = get("OVERFLOW") {
            cfg.overflow = v.parse()?;
        }
        if let Some(v) = get("THREAD_STACK_SIZE") {
            cfg.thread_stack_size = parse_var("THREAD_STACK_SIZE", &v)?;
        }
        if let Some(v) = get("SHUTDOWN_JOIN_TIMEOUT_MS") {
            cfg.shutdown_join_timeout_ms = parse_var("SHUTDOWN_JOIN_TIMEOUT_MS", &v)?;
        }
        if let Some(program) = get("WORKER_PROGRAM") {
            let args = get("WORKER_ARGS")
                .map(|a| a.split_whitespace().map(str::to_owned).collect())
                .unwrap_or_default();
            cfg.process = Some(ProcessWorkerConfig {
                program: PathBuf::from(program),
                args,
            });
        }

        cfg.validate()?;
        Ok(cfg)
    }
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> Result<T, GateError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e| {
        GateError::InvalidConfig(format!("{ENV_PREFIX}{name}=`{value}` is invalid: {e}"))
    })
}

/// Several named gates, for example one for CPU work and one for I/O.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateSetConfig {
    /// Map of gate name to configuration.
    pub gates: HashMap<String, GateConfig>,
}

impl GateSetConfig {
    /// Validate all gates and ensure at least one gate exists.
    ///
    /// # Errors
    ///
    /// Returns `GateError::InvalidConfig` naming the offending gate.
    pub fn validate(&self) -> Result<(), GateError> {
        if self.gates.is_empty() {
            return Err(GateError::InvalidConfig(
                "at least one gate must be defined".into(),
            ));
        }
        for (name, gate) in &self.gates {
            gate.validate().map_err(|e| match e {
                GateError::InvalidConfig(msg) => {
                    GateError::InvalidConfig(format!("gate `{name}`: {msg}"))
                }
                other => other,
            })?;
        }
        Ok(())
    }

    /// Parse a gate set from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns `GateError::InvalidConfig` on parse or validation failure.
    pub fn from_json_str(input: &str) -> Result<Self, GateError> {
        let cfg: Self = serde_json::from_str(input)
            .map_err(|e| GateError::InvalidConfig(format!("parse error: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeouts_saturate_and_round_up() {
        let cfg = GateConfig::new().with_default_timeout(Duration::MAX);
        assert_eq!(cfg.default_timeout_ms, Some(u64::MAX));
        assert!(cfg.validate().is_ok());

        let cfg = GateConfig::new()
            .with_default_timeout(Duration::from_micros(10))
            .with_shutdown_join_timeout(Duration::from_nanos(1));
        assert_eq!(cfg.default_timeout_ms, Some(1));
        assert_eq!(cfg.shutdown_join_timeout_ms, 1);
        assert!(cfg.validate().is_ok());

        let cfg = GateConfig::new().with_default_timeout(Duration::ZERO);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_reject_policy_disables_queue() {
        let cfg = GateConfig::new()
            .with_max_worker_concurrency(4)
            .with_overflow(OverflowPolicy::Reject);
        assert_eq!(cfg.queue_depth(), 0);
        assert_eq!(cfg.with_overflow(OverflowPolicy::Queue).queue_depth(), 4);
    }

    #[test]
    fn test_lookup_reads_prefixed_keys() {
        let cfg = GateConfig::from_lookup(|key| match key {
            "OFFLOAD_GATE_MAX_WORKER_CONCURRENCY" => Some("3".into()),
            "OFFLOAD_GATE_DEFAULT_TIMEOUT_MS" => Some("250".into()),
            "OFFLOAD_GATE_WORKER_KIND" => Some("process".into()),
            "OFFLOAD_GATE_WORKER_PROGRAM" => Some("/bin/worker".into()),
            "OFFLOAD_GATE_WORKER_ARGS" => Some("--quiet --json".into()),
            _ => None,
        })
        .unwrap();

        assert_eq!(cfg.max_worker_concurrency, 3);
        assert_eq!(cfg.default_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(cfg.worker_kind, WorkerKind::Process);
        let process = cfg.process.unwrap();
        assert_eq!(process.args, vec!["--quiet", "--json"]);
    }

    #[test]
    fn test_lookup_rejects_garbage() {
        let err = GateConfig::from_lookup(|key| {
            (key == "OFFLOAD_GATE_MAX_WORKER_CONCURRENCY").then(|| "many".to_owned())
        })
        .unwrap_err();
        assert!(err.to_string().contains("MAX_WORKER_CONCURRENCY"));
    }
}

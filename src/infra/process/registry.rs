//! Named job handlers hosted by a worker process.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::util::panic_message;

use super::wire::{WorkerRequest, WorkerResponse};

type Handler = Box<dyn Fn(Value) -> anyhow::Result<Value> + Send + Sync>;

/// Maps job names to typed handlers.
#[derive(Default)]
pub struct JobRegistry {
    jobs: HashMap<String, Handler>,
}

impl JobRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`, replacing any previous handler.
    ///
    /// The JSON input is decoded into `I` and the returned `O` encoded back
    /// to JSON.
    pub fn register<I, O, F>(&mut self, name: impl Into<String>, handler: F) -> &mut Self
    where
        I: DeserializeOwned,
        O: Serialize,
        F: Fn(I) -> anyhow::Result<O> + Send + Sync + 'static,
    {
        let name = name.into();
        let job = name.clone();
        self.jobs.insert(
            name,
            Box::new(move |input| {
                let input: I = serde_json::from_value(input)
                    .with_context(|| format!("decoding input of job `{job}`"))?;
                let output = handler(input)?;
                serde_json::to_value(output)
                    .with_context(|| format!("encoding output of job `{job}`"))
            }),
        );
        self
    }

    /// Whether a job is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.jobs.contains_key(name)
    }

    /// Registered job names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.jobs.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Run a request to completion; errors and panics become failure
    /// responses.
    #[must_use]
    pub fn run(&self, request: WorkerRequest) -> WorkerResponse {
        let WorkerRequest { id, job, input } = request;
        let Some(handler) = self.jobs.get(&job) else {
            warn!(work_id = %id, %job, "unknown job");
            return WorkerResponse::Failure {
                message: format!("unknown job `{job}`"),
                panicked: false,
            };
        };

        debug!(work_id = %id, %job, "running job");
        match panic::catch_unwind(AssertUnwindSafe(|| handler(input))) {
            Ok(Ok(output)) => WorkerResponse::Success { output },
            Ok(Err(e)) => WorkerResponse::Failure {
                message: format!("{e:#}"),
                panicked: false,
            },
            Err(payload) => WorkerResponse::Failure {
                message: panic_message(payload.as_ref()),
                panicked: true,
            },
        }
    }
}

impl fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRegistry")
            .field("jobs", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::WorkId;
    use serde_json::json;

    fn request(job: &str, input: Value) -> WorkerRequest {
        WorkerRequest {
            id: WorkId::new(),
            job: job.into(),
            input,
        }
    }

    fn registry() -> JobRegistry {
        let mut registry = JobRegistry::new();
        registry
            .register("double", |n: u64| Ok(n * 2))
            .register("explode", |_: ()| -> anyhow::Result<()> { panic!("kaboom") });
        registry
    }

    #[test]
    fn test_runs_typed_handler() {
        let resp = registry().run(request("double", json!(21)));
        assert_eq!(resp, WorkerResponse::Success { output: json!(42) });
    }

    #[test]
    fn test_bad_input_is_reported_with_context() {
        let resp = registry().run(request("double", json!("x")));
        let WorkerResponse::Failure { message, panicked } = resp else {
            panic!("expected failure");
        };
        assert!(!panicked);
        assert!(message.starts_with("decoding input of job `double`"));
    }

    #[test]
    fn test_panic_and_unknown_job() {
        let registry = registry();
        assert_eq!(
            registry.run(request("explode", Value::Null)),
            WorkerResponse::Failure {
                message: "kaboom".into(),
                panicked: true
            }
        );
        assert!(matches!(
            registry.run(request("missing", Value::Null)),
            WorkerResponse::Failure { panicked: false, .. }
        ));
        assert_eq!(registry.names(), vec!["double", "explode"]);
    }
}

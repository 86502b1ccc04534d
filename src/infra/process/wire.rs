//! Line-oriented JSON messages exchanged with worker processes.

use serde::{Deserialize, Serialize};

use crate::core::WorkId;

/// Set in the environment of every spawned worker process.
pub const WORKER_ENV: &str = "OFFLOAD_GATE_WORKER";

/// Request written to a worker's stdin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRequest {
    /// Work item being executed.
    pub id: WorkId,
    /// Registered job name.
    pub job: String,
    /// Job input.
    #[serde(default)]
    pub input: serde_json::Value,
}

/// Response written to a worker's stdout as a single line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WorkerResponse {
    /// The job returned a value.
    #[serde(rename = "ok")]
    Success {
        /// Job output.
        output: serde_json::Value,
    },
    /// The job failed.
    #[serde(rename = "error")]
    Failure {
        /// Error message with its context chain.
        message: String,
        /// Whether the job panicked rather than returning an error.
        #[serde(default)]
        panicked: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_response_wire_shape() {
        let ok = serde_json::to_value(WorkerResponse::Success { output: json!([1, 2]) }).unwrap();
        assert_eq!(ok, json!({"status": "ok", "output": [1, 2]}));

        let parsed: WorkerResponse =
            serde_json::from_str(r#"{"status":"error","message":"nope"}"#).unwrap();
        assert_eq!(
            parsed,
            WorkerResponse::Failure {
                message: "nope".into(),
                panicked: false
            }
        );
    }

    #[test]
    fn test_request_input_defaults_to_null() {
        let id = WorkId::new();
        let req: WorkerRequest =
            serde_json::from_value(json!({"id": id, "job": "noop"})).unwrap();
        assert_eq!(req.id, id);
        assert!(req.input.is_null());
    }
}

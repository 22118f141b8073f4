//! Request and response shapes at the service boundary.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::LimitsConfig;
use crate::orchestrator::ExecutionResult;

/// Bounds applied to inbound requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestPolicy {
    pub max_code_bytes: usize,
    pub default_timeout_seconds: u64,
    pub max_timeout_seconds: u64,
}

impl From<&LimitsConfig> for RequestPolicy {
    fn from(limits: &LimitsConfig) -> Self {
        Self {
            max_code_bytes: limits.max_code_bytes,
            default_timeout_seconds: limits.default_timeout_seconds,
            max_timeout_seconds: limits.max_timeout_seconds,
        }
    }
}

/// Rejected request.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("code is {size} bytes, limit is {limit}")]
    CodeTooLarge { size: usize, limit: usize },

    #[error("timeout must be at least 1 second")]
    TimeoutZero,

    #[error("timeout {requested}s exceeds the maximum of {max}s")]
    TimeoutTooLarge { requested: u64, max: u64 },
}

/// A validated execution request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    code: String,
    timeout_seconds: u64,
}

impl ExecutionRequest {
    pub fn new(
        code: String,
        timeout_seconds: Option<u64>,
        policy: &RequestPolicy,
    ) -> Result<Self, RequestError> {
        if code.len() > policy.max_code_bytes {
            return Err(RequestError::CodeTooLarge {
                size: code.len(),
                limit: policy.max_code_bytes,
            });
        }

        let timeout_seconds = timeout_seconds.unwrap_or(policy.default_timeout_seconds);
        if timeout_seconds == 0 {
            return Err(RequestError::TimeoutZero);
        }
        if timeout_seconds > policy.max_timeout_seconds {
            return Err(RequestError::TimeoutTooLarge {
                requested: timeout_seconds,
                max: policy.max_timeout_seconds,
            });
        }

        Ok(Self {
            code,
            timeout_seconds,
        })
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub const fn timeout_seconds(&self) -> u64 {
        self.timeout_seconds
    }
}

/// What callers get back: `{output, error, exit_code}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub output: String,
    pub error: String,
    pub exit_code: i32,
}

impl From<&ExecutionResult> for ExecuteResponse {
    fn from(result: &ExecutionResult) -> Self {
        Self {
            output: result.stdout.clone(),
            error: result.stderr.clone(),
            exit_code: result.exit_code,
        }
    }
}

/// History row for collaborators that persist executions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionRecord {
    pub code: String,
    pub is_success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl ExecutionRecord {
    pub fn new(request: &ExecutionRequest, result: &ExecutionResult) -> Self {
        Self {
            code: request.code.clone(),
            is_success: result.is_success(),
            stdout: result.stdout.clone(),
            stderr: result.stderr.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::{Termination, TIMEOUT_EXIT_CODE, TIMEOUT_MESSAGE};

    fn policy() -> RequestPolicy {
        RequestPolicy::from(&LimitsConfig::default())
    }

    #[test]
    fn timeout_defaults_to_five_seconds() {
        let request = ExecutionRequest::new("print(1)".into(), None, &policy()).unwrap();
        assert_eq!(request.timeout_seconds(), 5);
        assert_eq!(request.code(), "print(1)");
    }

    #[test]
    fn timeout_bounds() {
        assert_eq!(
            ExecutionRequest::new(String::new(), Some(0), &policy()),
            Err(RequestError::TimeoutZero)
        );
        assert_eq!(
            ExecutionRequest::new(String::new(), Some(31), &policy()),
            Err(RequestError::TimeoutTooLarge {
                requested: 31,
                max: 30
            })
        );
        assert!(ExecutionRequest::new(String::new(), Some(30), &policy()).is_ok());
    }

    #[test]
    fn oversized_code_is_rejected() {
        let policy = RequestPolicy {
            max_code_bytes: 4,
            ..policy()
        };
        let err = ExecutionRequest::new("hello".into(), None, &policy).unwrap_err();
        assert_eq!(err, RequestError::CodeTooLarge { size: 5, limit: 4 });
    }

    #[test]
    fn response_and_record_from_timed_out_result() {
        let request = ExecutionRequest::new("while True: pass".into(), Some(1), &policy()).unwrap();
        let result = ExecutionResult {
            stdout: "partial".into(),
            stderr: TIMEOUT_MESSAGE.into(),
            exit_code: TIMEOUT_EXIT_CODE,
            timed_out: true,
            termination: Termination::DeadlineExpired,
            truncated: false,
        };

        let response = ExecuteResponse::from(&result);
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            serde_json::json!({
                "output": "partial",
                "error": "Execution timed out",
                "exit_code": -1
            })
        );

        let record = ExecutionRecord::new(&request, &result);
        assert!(!record.is_success);
        assert_eq!(record.code, "while True: pass");
        assert_eq!(record.stderr, TIMEOUT_MESSAGE);
    }
}

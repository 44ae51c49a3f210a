//! JSON-lines control protocol spoken between the daemon and the CLI.
//!
//! One request object per line, one response object per line.

use crate::controller::{ControllerHandle, ControllerStatus};
use crate::error::HoldfastResult;
use crate::lock::LockState;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum ControlRequest {
    Status,
    Toggle,
    SetTargets { targets: Vec<String> },
    SetInterval { interval_ms: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ControlResponse {
    Status { status: ControllerStatus },
    Lock { lock: LockState },
    Targets { targets: Vec<String> },
    Interval { interval_ms: u64 },
    /// The request was valid but deliberately dropped (debounced toggles).
    Ignored { reason: String },
    Error { message: String },
}

impl ControlRequest {
    pub fn parse(line: &str) -> HoldfastResult<Self> {
        Ok(serde_json::from_str(line.trim())?)
    }

    pub fn to_line(&self) -> HoldfastResult<String> {
        Ok(format!("{}\n", serde_json::to_string(self)?))
    }
}

impl ControlResponse {
    pub fn parse(line: &str) -> HoldfastResult<Self> {
        Ok(serde_json::from_str(line.trim())?)
    }

    pub fn to_line(&self) -> HoldfastResult<String> {
        Ok(format!("{}\n", serde_json::to_string(self)?))
    }

    fn from_result<T>(result: HoldfastResult<T>, ok: impl FnOnce(T) -> Self) -> Self {
        match result {
            Ok(value) => ok(value),
            Err(err) => ControlResponse::Error {
                message: err.to_string(),
            },
        }
    }
}

/// Apply a request to a running controller. Toggle gating (debounce) is the
/// caller's business; this always forwards.
pub async fn dispatch(handle: &ControllerHandle, request: ControlRequest) -> ControlResponse {
    match request {
        ControlRequest::Status => {
            ControlResponse::from_result(handle.status().await, |status| {
                ControlResponse::Status { status }
            })
        }
        ControlRequest::Toggle => {
            ControlResponse::from_result(handle.toggle().await, |lock| ControlResponse::Lock {
                lock,
            })
        }
        ControlRequest::SetTargets { targets } => {
            ControlResponse::from_result(handle.set_targets(targets).await, |targets| {
                ControlResponse::Targets { targets }
            })
        }
        ControlRequest::SetInterval { interval_ms } => ControlResponse::from_result(
            handle.set_interval_ms(interval_ms).await,
            |interval| ControlResponse::Interval {
                interval_ms: u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
            },
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_use_a_flat_tagged_shape() {
        let line = ControlRequest::SetTargets {
            targets: vec!["a".into(), "b".into()],
        }
        .to_line()
        .unwrap();
        assert_eq!(line, "{\"cmd\":\"set_targets\",\"targets\":[\"a\",\"b\"]}\n");
        assert_eq!(
            ControlRequest::parse("  {\"cmd\":\"toggle\"}\r\n").unwrap(),
            ControlRequest::Toggle
        );
    }

    #[test]
    fn unknown_commands_are_rejected() {
        assert!(ControlRequest::parse("{\"cmd\":\"reboot\"}").is_err());
        assert!(ControlRequest::parse("toggle").is_err());
    }

    #[test]
    fn error_responses_carry_the_message() {
        let response = ControlResponse::parse(
            "{\"result\":\"error\",\"message\":\"invalid configuration: empty\"}",
        )
        .unwrap();
        assert_eq!(
            response,
            ControlResponse::Error {
                message: "invalid configuration: empty".into()
            }
        );
    }
}

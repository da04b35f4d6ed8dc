//! Newline-delimited JSON protocol over the daemon socket, plus the blocking
//! client used by the CLI.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{io_err, DaemonError};
use crate::paths::socket_path;

/// One operation invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpRequest {
    pub op: String,
    #[serde(default)]
    pub args: Value,
}

impl OpRequest {
    pub fn new(op: impl Into<String>, args: Value) -> Self {
        Self {
            op: op.into(),
            args,
        }
    }
}

/// Structured error carried back to the caller. `kind` is the stable
/// machine-readable discriminator (`not_found`, `validation`, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpError {
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
}

/// One operation response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<OpError>,
}

impl OpResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(
        kind: impl Into<String>,
        message: impl Into<String>,
        operation: impl Into<String>,
    ) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(OpError {
                kind: kind.into(),
                message: message.into(),
                operation: Some(operation.into()),
            }),
        }
    }
}

/// Send one request to the daemon socket and return one response.
pub fn send_request(home: &Path, request: &OpRequest) -> Result<OpResponse, DaemonError> {
    let socket = socket_path(home);
    if !socket.exists() {
        return Err(DaemonError::DaemonNotRunning { socket });
    }

    let mut stream = UnixStream::connect(&socket).map_err(|err| {
        if matches!(
            err.kind(),
            std::io::ErrorKind::NotFound
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
        ) {
            DaemonError::DaemonNotRunning {
                socket: socket.clone(),
            }
        } else {
            io_err(&socket, err)
        }
    })?;

    let payload = serde_json::to_string(request)?;
    stream
        .write_all(payload.as_bytes())
        .map_err(|e| io_err(&socket, e))?;
    stream.write_all(b"\n").map_err(|e| io_err(&socket, e))?;
    stream.flush().map_err(|e| io_err(&socket, e))?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    let read = reader
        .read_line(&mut line)
        .map_err(|e| io_err(&socket, e))?;
    if read == 0 {
        return Err(DaemonError::Protocol(
            "daemon closed connection before responding".to_string(),
        ));
    }

    let response: OpResponse = serde_json::from_str(line.trim_end())?;
    Ok(response)
}

/// Invoke a named operation and unwrap its data payload.
pub fn call_op(home: &Path, op: &str, args: Value) -> Result<Value, DaemonError> {
    let response = send_request(home, &OpRequest::new(op, args))?;
    response_into_data(response)
}

/// Daemon liveness probe, retried briefly to cover startup races.
pub fn request_status(home: &Path) -> Result<Value, DaemonError> {
    let request = OpRequest::new("status", Value::Null);

    let mut last_not_running: Option<DaemonError> = None;
    for attempt in 0..5 {
        match send_request(home, &request) {
            Ok(response) => return response_into_data(response),
            Err(err @ DaemonError::DaemonNotRunning { .. }) => {
                last_not_running = Some(err);
                if attempt < 4 {
                    sleep(Duration::from_millis(100));
                    continue;
                }
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_not_running.unwrap_or_else(|| {
        DaemonError::Protocol("daemon status retry loop exited unexpectedly".to_string())
    }))
}

pub fn request_shutdown(home: &Path) -> Result<(), DaemonError> {
    let response = send_request(home, &OpRequest::new("shutdown", Value::Null))?;
    response_into_data(response).map(|_| ())
}

fn response_into_data(response: OpResponse) -> Result<Value, DaemonError> {
    if response.ok {
        Ok(response.data.unwrap_or(Value::Null))
    } else {
        let error = response.error.map_or_else(
            || "unknown daemon error".to_string(),
            |e| format!("{}: {}", e.kind, e.message),
        );
        Err(DaemonError::Protocol(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_defaults_missing_args_to_null() {
        let request: OpRequest = serde_json::from_str(r#"{"op":"get_system_health"}"#).unwrap();
        assert_eq!(request.op, "get_system_health");
        assert_eq!(request.args, Value::Null);
    }

    #[test]
    fn ok_response_omits_error_field() {
        let encoded = serde_json::to_string(&OpResponse::ok(json!({"n": 1}))).unwrap();
        assert!(!encoded.contains("error"));
        let decoded: OpResponse = serde_json::from_str(&encoded).unwrap();
        assert!(decoded.ok);
        assert_eq!(decoded.data, Some(json!({"n": 1})));
    }

    #[test]
    fn error_response_carries_kind_and_operation() {
        let response = OpResponse::error("not_found", "agent missing", "get_agent_health");
        let encoded = serde_json::to_string(&response).unwrap();
        let decoded: OpResponse = serde_json::from_str(&encoded).unwrap();
        let error = decoded.error.unwrap();
        assert_eq!(error.kind, "not_found");
        assert_eq!(error.operation.as_deref(), Some("get_agent_health"));
        assert!(decoded.data.is_none());
    }

    #[test]
    fn error_response_flattens_into_protocol_error() {
        let response = OpResponse::error("validation", "bad branch", "create_worktree");
        let err = response_into_data(response).unwrap_err();
        assert!(err.to_string().contains("validation: bad branch"));
    }
}

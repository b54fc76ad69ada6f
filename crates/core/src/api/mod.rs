//! Camera command API.
//!
//! The rest of the pipeline only sees two narrow seams:
//!
//! - [`CommandTransport`]: post a named JSON command, get the JSON reply.
//! - [`BulkFetch`]: stream one recorded clip straight to a local file.
//!
//! [`HttpClient`] implements both against the camera's `/cgi-bin/api.cgi`
//! endpoint. Tests substitute in-memory fakes.

mod http;

use std::path::Path;
use std::sync::Arc;

use serde_json::Value;

use crate::error::TransportError;

pub use http::{DownloadMethod, HttpClient};

/// Executes a named command against the camera.
pub trait CommandTransport: Send + Sync {
    /// Post `payload` (a JSON array of command objects) as `command` and
    /// return the decoded reply.
    ///
    /// Fails with [`TransportError::Unauthenticated`] when no session token is
    /// held and [`TransportError::HttpStatus`] on non-success HTTP status.
    fn execute(&self, command: &str, payload: Value) -> Result<Value, TransportError>;
}

/// Streams a recorded file from the camera to local storage.
pub trait BulkFetch: Send + Sync {
    /// Copy `remote_path` into `local_path` without buffering the whole file
    /// in memory.
    fn fetch_to_file(&self, remote_path: &str, local_path: &Path) -> Result<(), TransportError>;
}

impl<T: CommandTransport + ?Sized> CommandTransport for Arc<T> {
    fn execute(&self, command: &str, payload: Value) -> Result<Value, TransportError> {
        (**self).execute(command, payload)
    }
}

impl<T: BulkFetch + ?Sized> BulkFetch for Arc<T> {
    fn fetch_to_file(&self, remote_path: &str, local_path: &Path) -> Result<(), TransportError> {
        (**self).fetch_to_file(remote_path, local_path)
    }
}

/// Check the `code` field of the first reply object.
///
/// The camera answers HTTP 200 even when it rejects a command; the verdict
/// lives in the envelope:
///
/// ```text
/// [{"cmd":"Search","code":1,"error":{"detail":"please login first","rspCode":-6}}]
/// ```
pub(crate) fn check_envelope(command: &str, reply: &Value) -> Result<(), TransportError> {
    let Some(first) = reply.as_array().and_then(|items| items.first()) else {
        return Ok(());
    };
    let code = first.get("code").and_then(Value::as_i64).unwrap_or(0);
    if code == 0 {
        return Ok(());
    }

    let error = first.get("error");
    let rsp_code = error
        .and_then(|e| e.get("rspCode"))
        .and_then(Value::as_i64)
        .unwrap_or(code);
    let detail = error
        .and_then(|e| e.get("detail"))
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string();

    // -6: "please login first", -7: token expired
    if rsp_code == -6 || rsp_code == -7 {
        return Err(TransportError::Unauthenticated);
    }

    Err(TransportError::Api {
        command: command.to_string(),
        code: rsp_code,
        detail,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_success_passes() {
        let reply = json!([{"cmd": "Search", "code": 0, "value": {}}]);
        assert!(check_envelope("Search", &reply).is_ok());
    }

    #[test]
    fn envelope_login_required_is_unauthenticated() {
        let reply = json!([{
            "cmd": "Search",
            "code": 1,
            "error": {"detail": "please login first", "rspCode": -6}
        }]);
        assert!(matches!(
            check_envelope("Search", &reply),
            Err(TransportError::Unauthenticated)
        ));
    }

    #[test]
    fn envelope_other_error_carries_detail() {
        let reply = json!([{
            "cmd": "Search",
            "code": 1,
            "error": {"detail": "param error", "rspCode": -4}
        }]);
        match check_envelope("Search", &reply) {
            Err(TransportError::Api { command, code, detail }) => {
                assert_eq!(command, "Search");
                assert_eq!(code, -4);
                assert_eq!(detail, "param error");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn non_array_reply_is_left_to_caller() {
        assert!(check_envelope("Search", &json!({"odd": true})).is_ok());
    }
}

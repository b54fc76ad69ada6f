use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use parking_lot::RwLock;
use reqwest::blocking::{Client, Response};
use serde_json::{Value, json};

use super::{BulkFetch, CommandTransport, check_envelope};
use crate::config::CameraConfig;
use crate::error::TransportError;

/// Which command the camera should serve a clip through.
///
/// `Playback` has been observed to transfer noticeably faster than
/// `Download` on some models, so it is the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DownloadMethod {
    #[default]
    Playback,
    Download,
}

impl DownloadMethod {
    fn as_str(self) -> &'static str {
        match self {
            Self::Playback => "Playback",
            Self::Download => "Download",
        }
    }
}

/// Blocking HTTP client for one camera.
///
/// Holds the session token behind a `RwLock`: it is written by
/// [`login`](Self::login)/[`logout`](Self::logout) and only read by every
/// other call, so one client can be shared (via `Arc`) by the segment
/// locator and all download workers.
pub struct HttpClient {
    config: CameraConfig,
    api_url: String,
    client: Client,
    download_client: Client,
    download_method: DownloadMethod,
    token: RwLock<Option<String>>,
}

impl HttpClient {
    pub fn new(config: CameraConfig) -> Result<Self, TransportError> {
        let client = Self::builder(&config)?.timeout(config.request_timeout).build()?;
        // Clip transfers can run for minutes; only the explicit limit applies.
        let download_client = Self::builder(&config)?.timeout(config.download_timeout).build()?;

        Ok(Self {
            api_url: config.api_url(),
            config,
            client,
            download_client,
            download_method: DownloadMethod::default(),
            token: RwLock::new(None),
        })
    }

    fn builder(config: &CameraConfig) -> Result<reqwest::blocking::ClientBuilder, TransportError> {
        let mut builder = Client::builder()
            .connect_timeout(config.connect_timeout)
            .danger_accept_invalid_certs(config.accept_invalid_certs);
        // Proxying is per camera; environment proxy variables are ignored.
        builder = match &config.proxy {
            Some(proxy) => builder.proxy(proxy.to_reqwest()?),
            None => builder.no_proxy(),
        };
        Ok(builder)
    }

    pub fn with_download_method(mut self, method: DownloadMethod) -> Self {
        self.download_method = method;
        self
    }

    pub fn config(&self) -> &CameraConfig {
        &self.config
    }

    /// Use a token obtained elsewhere.
    pub fn set_token(&self, token: Option<String>) {
        *self.token.write() = token;
    }

    pub fn is_logged_in(&self) -> bool {
        self.token.read().is_some()
    }

    /// Obtain a session token with the configured credentials.
    pub fn login(&self) -> Result<(), TransportError> {
        let body = json!([{
            "cmd": "Login",
            "action": 0,
            "param": {
                "User": {
                    "userName": self.config.credentials.username,
                    "password": self.config.credentials.password,
                }
            }
        }]);

        let response = self
            .client
            .post(&self.api_url)
            .query(&[("cmd", "Login"), ("token", "null")])
            .json(&body)
            .send()?;
        let reply = Self::json_reply(response)?;
        check_envelope("Login", &reply)?;

        let token = reply
            .get(0)
            .and_then(|r| r.pointer("/value/Token/name"))
            .and_then(Value::as_str)
            .ok_or_else(|| TransportError::InvalidResponse("login reply has no token".into()))?;

        *self.token.write() = Some(token.to_string());
        tracing::info!(host = %self.config.host, "logged in");
        Ok(())
    }

    /// Release the session token on the camera. The local token is cleared
    /// even if the camera rejects the request.
    pub fn logout(&self) -> Result<(), TransportError> {
        let result = self
            .execute("Logout", json!([{"cmd": "Logout", "action": 0}]))
            .map(|_| ());
        *self.token.write() = None;
        tracing::info!(host = %self.config.host, "logged out");
        result
    }

    fn current_token(&self) -> Result<String, TransportError> {
        self.token.read().clone().ok_or(TransportError::Unauthenticated)
    }

    fn json_reply(response: Response) -> Result<Value, TransportError> {
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::HttpStatus(status.as_u16()));
        }
        let body = response.text()?;
        serde_json::from_str(&body).map_err(|e| TransportError::InvalidResponse(e.to_string()))
    }
}

impl CommandTransport for HttpClient {
    fn execute(&self, command: &str, payload: Value) -> Result<Value, TransportError> {
        let token = self.current_token()?;

        tracing::debug!(command, "executing command");
        let response = self
            .client
            .post(&self.api_url)
            .query(&[("cmd", command), ("token", token.as_str())])
            .json(&payload)
            .send()?;

        let reply = Self::json_reply(response)?;
        check_envelope(command, &reply)?;
        Ok(reply)
    }
}

impl BulkFetch for HttpClient {
    fn fetch_to_file(&self, remote_path: &str, local_path: &Path) -> Result<(), TransportError> {
        let token = self.current_token()?;
        let method = self.download_method.as_str();

        let mut response = self
            .download_client
            .get(&self.api_url)
            .query(&[
                ("cmd", method),
                ("source", remote_path),
                ("output", remote_path),
                ("token", token.as_str()),
            ])
            .send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::HttpStatus(status.as_u16()));
        }

        // A missing file comes back as a 200 with a JSON error envelope
        // instead of video bytes.
        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/json") || ct.starts_with("text/"));
        if is_json {
            let body = response.text()?;
            let reply: Value = serde_json::from_str(&body)
                .map_err(|_| TransportError::InvalidResponse(format!("unexpected body for {remote_path}")))?;
            check_envelope(method, &reply)?;
            return Err(TransportError::InvalidResponse(format!(
                "camera returned no data for {remote_path}"
            )));
        }

        let mut writer = BufWriter::new(File::create(local_path)?);
        let written = response.copy_to(&mut writer)?;
        writer.flush()?;

        tracing::debug!(remote_path, bytes = written, "clip transferred");
        Ok(())
    }
}

//! Connection configuration.
//!
//! Every transport takes its configuration explicitly. Nothing here is
//! process-global, so several cameras (with different proxies or
//! credentials) can be driven from one process at the same time.

use std::time::Duration;

use crate::metadata::StreamKind;

/// Default RTSP port used by the camera.
pub const DEFAULT_RTSP_PORT: u16 = 554;

/// Login credentials for the camera.
#[derive(Clone, Default)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Proxy type for HTTP command and download traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyType {
    Http,
    Https,
    Socks5,
}

/// Proxy used by one [`HttpClient`](crate::api::HttpClient).
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Proxy server URL (e.g. `http://proxy.example.com:8080`).
    pub url: String,
    pub proxy_type: ProxyType,
    pub auth: Option<Credentials>,
}

impl ProxyConfig {
    /// Build the `reqwest` proxy for this configuration.
    pub fn to_reqwest(&self) -> Result<reqwest::Proxy, reqwest::Error> {
        let mut proxy = match self.proxy_type {
            ProxyType::Http => reqwest::Proxy::http(&self.url)?,
            ProxyType::Https => reqwest::Proxy::https(&self.url)?,
            ProxyType::Socks5 => {
                let url = if self.url.starts_with("socks5://") || self.url.starts_with("socks5h://") {
                    self.url.clone()
                } else {
                    format!("socks5://{}", self.url)
                };
                reqwest::Proxy::all(url)?
            }
        };
        if let Some(auth) = &self.auth {
            proxy = proxy.basic_auth(&auth.username, &auth.password);
        }
        Ok(proxy)
    }
}

/// How to reach one camera.
#[derive(Debug, Clone)]
pub struct CameraConfig {
    /// Hostname or IP address.
    pub host: String,
    /// Use `https://` for the command API.
    pub https: bool,
    /// HTTP(S) port override; `None` uses the scheme default.
    pub http_port: Option<u16>,
    pub rtsp_port: u16,
    pub credentials: Credentials,
    pub proxy: Option<ProxyConfig>,
    /// Cameras ship self-signed certificates.
    pub accept_invalid_certs: bool,
    pub connect_timeout: Duration,
    /// Timeout for command requests. Downloads use `download_timeout`.
    pub request_timeout: Duration,
    /// Overall limit for one clip transfer; `None` means unbounded.
    pub download_timeout: Option<Duration>,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            host: "192.168.1.100".to_string(),
            https: false,
            http_port: None,
            rtsp_port: DEFAULT_RTSP_PORT,
            credentials: Credentials::default(),
            proxy: None,
            accept_invalid_certs: true,
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(15),
            download_timeout: None,
        }
    }
}

impl CameraConfig {
    pub fn new(host: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            host: host.into(),
            credentials,
            ..Self::default()
        }
    }

    /// Base URL of the command endpoint, e.g. `http://10.0.0.5/cgi-bin/api.cgi`.
    pub fn api_url(&self) -> String {
        let scheme = if self.https { "https" } else { "http" };
        match self.http_port {
            Some(port) => format!("{scheme}://{}:{port}/cgi-bin/api.cgi", self.host),
            None => format!("{scheme}://{}/cgi-bin/api.cgi", self.host),
        }
    }

    /// Live-view RTSP URL for a channel (0-based) and profile.
    ///
    /// The camera names channels from 1 with two digits:
    /// `rtsp://host:554//h264Preview_01_main`.
    pub fn rtsp_url(&self, channel: u8, profile: StreamKind) -> String {
        format!(
            "rtsp://{}:{}//h264Preview_{:02}_{}",
            self.host,
            self.rtsp_port,
            u16::from(channel) + 1,
            profile.as_str()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_url_respects_scheme_and_port() {
        let mut config = CameraConfig::new("10.0.0.5", Credentials::default());
        assert_eq!(config.api_url(), "http://10.0.0.5/cgi-bin/api.cgi");

        config.https = true;
        config.http_port = Some(8443);
        assert_eq!(config.api_url(), "https://10.0.0.5:8443/cgi-bin/api.cgi");
    }

    #[test]
    fn rtsp_url_numbers_channels_from_one() {
        let config = CameraConfig::new("cam.local", Credentials::default());
        assert_eq!(
            config.rtsp_url(0, StreamKind::Main),
            "rtsp://cam.local:554//h264Preview_01_main"
        );
        assert_eq!(
            config.rtsp_url(11, StreamKind::Sub),
            "rtsp://cam.local:554//h264Preview_12_sub"
        );
    }

    #[test]
    fn debug_redacts_password() {
        let creds = Credentials::new("admin", "hunter2");
        let shown = format!("{creds:?}");
        assert!(shown.contains("admin"));
        assert!(!shown.contains("hunter2"));
    }

    #[test]
    fn socks_proxy_gets_scheme() {
        let proxy = ProxyConfig {
            url: "127.0.0.1:1080".into(),
            proxy_type: ProxyType::Socks5,
            auth: None,
        };
        assert!(proxy.to_reqwest().is_ok());
    }
}

//! `HttpClient` against a minimal in-process HTTP server.
//!
//! Each connection serves one request and closes, which is enough for the
//! blocking reqwest client to open a fresh connection per call.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread;

use reolink::api::{BulkFetch, CommandTransport, DownloadMethod, HttpClient};
use reolink::{CameraConfig, Credentials, TransportError};
use serde_json::{Value, json};
use url::Url;

#[derive(Debug, Clone)]
struct Recorded {
    method: String,
    query: Vec<(String, String)>,
    body: String,
}

impl Recorded {
    fn param(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

struct Reply {
    status: u16,
    content_type: &'static str,
    body: Vec<u8>,
}

impl Reply {
    fn json(value: Value) -> Self {
        Self {
            status: 200,
            content_type: "application/json",
            body: value.to_string().into_bytes(),
        }
    }
}

struct FakeApi {
    port: u16,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl FakeApi {
    fn start(handler: impl Fn(&Recorded) -> Reply + Send + 'static) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let log = requests.clone();

        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let Some(request) = read_request(&mut reader) else {
                    continue;
                };
                log.lock().unwrap().push(request.clone());

                let reply = handler(&request);
                let mut stream = stream;
                let head = format!(
                    "HTTP/1.1 {} X\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    reply.status,
                    reply.content_type,
                    reply.body.len()
                );
                let _ = stream.write_all(head.as_bytes());
                let _ = stream.write_all(&reply.body);
            }
        });

        Self { port, requests }
    }

    fn client(&self) -> HttpClient {
        let mut config = CameraConfig::new("127.0.0.1", Credentials::new("admin", "pw"));
        config.http_port = Some(self.port);
        HttpClient::new(config).unwrap()
    }

    fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }
}

fn read_request(reader: &mut BufReader<std::net::TcpStream>) -> Option<Recorded> {
    let mut start = String::new();
    reader.read_line(&mut start).ok()?;
    let mut parts = start.split_whitespace();
    let method = parts.next()?.to_string();
    let target = parts.next()?.to_string();

    let mut length = 0;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).ok()? == 0 {
            return None;
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':')
            && name.eq_ignore_ascii_case("content-length")
        {
            length = value.trim().parse().ok()?;
        }
    }
    let mut body = vec![0; length];
    reader.read_exact(&mut body).ok()?;

    let url = Url::parse(&format!("http://fake{target}")).ok()?;
    Some(Recorded {
        method,
        query: url.query_pairs().into_owned().collect(),
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

fn login_reply() -> Reply {
    Reply::json(json!([{
        "cmd": "Login",
        "code": 0,
        "value": {"Token": {"leaseTime": 3600, "name": "9a1b2c3d"}}
    }]))
}

#[test]
fn login_then_execute_carries_the_token() {
    let api = FakeApi::start(|req| match req.param("cmd") {
        Some("Login") => login_reply(),
        _ => Reply::json(json!([{"cmd": "Search", "code": 0, "value": {"SearchResult": {"File": []}}}])),
    });
    let client = api.client();
    assert!(!client.is_logged_in());

    client.login().unwrap();
    assert!(client.is_logged_in());

    let reply = client
        .execute("Search", json!([{"cmd": "Search", "action": 0, "param": {}}]))
        .unwrap();
    assert_eq!(reply[0]["value"]["SearchResult"]["File"], json!([]));

    let requests = api.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].method, "POST");
    assert_eq!(requests[0].param("token"), Some("null"));
    let login: Value = serde_json::from_str(&requests[0].body).unwrap();
    assert_eq!(login[0]["param"]["User"]["userName"], "admin");
    assert_eq!(requests[1].param("cmd"), Some("Search"));
    assert_eq!(requests[1].param("token"), Some("9a1b2c3d"));
}

#[test]
fn rejected_login_surfaces_the_camera_code() {
    let api = FakeApi::start(|_| {
        Reply::json(json!([{"cmd": "Login", "code": 1, "error": {"detail": "login failed", "rspCode": -5}}]))
    });
    let client = api.client();
    let err = client.login().unwrap_err();
    assert!(matches!(err, TransportError::Api { code: -5, .. }), "{err:?}");
    assert!(!client.is_logged_in());
}

#[test]
fn execute_without_token_never_hits_the_network() {
    let api = FakeApi::start(|_| login_reply());
    let client = api.client();
    let err = client.execute("Search", json!([])).unwrap_err();
    assert!(matches!(err, TransportError::Unauthenticated));
    assert!(api.requests().is_empty());
}

#[test]
fn expired_token_maps_to_unauthenticated() {
    let api = FakeApi::start(|_| {
        Reply::json(json!([{"cmd": "Search", "code": 1, "error": {"detail": "please login first", "rspCode": -6}}]))
    });
    let client = api.client();
    client.set_token(Some("stale".into()));
    let err = client.execute("Search", json!([])).unwrap_err();
    assert!(matches!(err, TransportError::Unauthenticated), "{err:?}");
}

#[test]
fn http_error_status_is_reported() {
    let api = FakeApi::start(|_| Reply {
        status: 500,
        content_type: "text/plain",
        body: b"boom".to_vec(),
    });
    let client = api.client();
    client.set_token(Some("t".into()));
    let err = client.execute("Search", json!([])).unwrap_err();
    assert!(matches!(err, TransportError::HttpStatus(500)), "{err:?}");
}

#[test]
fn fetch_streams_clip_to_disk() {
    let clip: Vec<u8> = (0..=255u8).cycle().take(100_000).collect();
    let served = clip.clone();
    let api = FakeApi::start(move |_| Reply {
        status: 200,
        content_type: "application/octet-stream",
        body: served.clone(),
    });
    let client = api.client();
    client.set_token(Some("tok".into()));

    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("clip.mp4");
    let remote = "Mp4Record/2024-03-05/RecM02_20240305_101112_101530_0_6D28808000_2B4E8E.mp4";
    client.fetch_to_file(remote, &target).unwrap();

    assert_eq!(std::fs::read(&target).unwrap(), clip);
    let requests = api.requests();
    let request = &requests[0];
    assert_eq!(request.method, "GET");
    assert_eq!(request.param("cmd"), Some("Playback"));
    assert_eq!(request.param("source"), Some(remote));
    assert_eq!(request.param("output"), Some(remote));
    assert_eq!(request.param("token"), Some("tok"));
}

#[test]
fn json_body_on_download_is_an_error() {
    let api = FakeApi::start(|_| {
        Reply::json(json!([{"cmd": "Download", "code": 1, "error": {"detail": "not exist", "rspCode": -12}}]))
    });
    let client = api.client().with_download_method(DownloadMethod::Download);
    client.set_token(Some("tok".into()));

    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("missing.mp4");
    let err = client.fetch_to_file("Mp4Record/x.mp4", &target).unwrap_err();
    assert!(matches!(err, TransportError::Api { code: -12, .. }), "{err:?}");
    assert!(!target.exists());
    assert_eq!(api.requests()[0].param("cmd"), Some("Download"));
}

#[test]
fn logout_clears_token_even_when_rejected() {
    let api = FakeApi::start(|_| Reply {
        status: 502,
        content_type: "text/plain",
        body: Vec::new(),
    });
    let client = api.client();
    client.set_token(Some("tok".into()));
    assert!(client.logout().is_err());
    assert!(!client.is_logged_in());
}

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{StreamError, TransportError};
use crate::protocol::request::USER_AGENT;
use crate::protocol::{Authenticator, RtspRequest, RtspResponse};

/// Longest response head we accept before giving up on the line.
const MAX_HEAD_BYTES: usize = 16 * 1024;

/// One message read from the RTSP connection.
///
/// With interleaved transport (RFC 2326 §10.12) RTP arrives on the same TCP
/// stream as RTSP replies, framed as:
///
/// ```text
/// '$' (1 byte) | channel (1 byte) | length (u16 BE) | RTP or RTCP packet
/// ```
#[derive(Debug)]
pub enum Message {
    Interleaved { channel: u8, payload: Vec<u8> },
    Response(RtspResponse),
}

/// Interleaved frame cut short by a read timeout. Kept so the next read
/// resumes inside the frame instead of parsing payload bytes as framing.
#[derive(Debug, Default)]
struct PartialFrame {
    header: [u8; 4],
    header_read: usize,
    payload: Option<Vec<u8>>,
    payload_read: usize,
}

/// Write half of the RTSP connection.
///
/// Shared behind a mutex between the reader (keepalives) and any thread
/// that stops the stream (TEARDOWN), so requests never interleave on the
/// wire. Stamps every request with `CSeq`, `User-Agent`, the session id and
/// an `Authorization` header once a challenge has been answered.
pub struct RequestWriter {
    stream: TcpStream,
    cseq: u32,
    session_id: Option<String>,
    auth: Option<Authenticator>,
}

impl RequestWriter {
    /// Send `request`; returns the CSeq it was given.
    pub fn send(&mut self, mut request: RtspRequest) -> io::Result<u32> {
        self.cseq += 1;
        let cseq = self.cseq;
        request = request
            .add_header("CSeq", &cseq.to_string())
            .add_header("User-Agent", USER_AGENT);
        if let Some(session) = &self.session_id {
            request = request.add_header("Session", session);
        }
        if let Some(auth) = self.auth.as_mut() {
            let value = auth.authorization(&request.method, &request.uri);
            request = request.add_header("Authorization", &value);
        }

        tracing::debug!(method = %request.method, uri = %request.uri, cseq, "RTSP request");
        self.stream.write_all(request.serialize().as_bytes())?;
        Ok(cseq)
    }

    pub fn set_session(&mut self, session_id: Option<String>) {
        self.session_id = session_id;
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn set_authenticator(&mut self, auth: Authenticator) {
        self.auth = Some(auth);
    }

    pub fn has_authenticator(&self) -> bool {
        self.auth.is_some()
    }

    /// Close both directions so a read blocked on another thread returns.
    pub fn shutdown(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

/// Client side of an RTSP control connection.
pub struct RtspConnection {
    reader: BufReader<TcpStream>,
    writer: Arc<Mutex<RequestWriter>>,
    peer: SocketAddr,
    local: SocketAddr,
    partial: Option<PartialFrame>,
}

impl RtspConnection {
    pub fn connect(host: &str, port: u16, connect_timeout: Duration) -> Result<Self, StreamError> {
        let addrs = (host, port)
            .to_socket_addrs()
            .map_err(|e| StreamError::InvalidUrl(format!("{host}:{port}: {e}")))?;

        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, connect_timeout) {
                Ok(stream) => return Self::from_stream(stream),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err
            .map(StreamError::from)
            .unwrap_or_else(|| StreamError::InvalidUrl(format!("{host}:{port} resolved to nothing"))))
    }

    pub fn from_stream(stream: TcpStream) -> Result<Self, StreamError> {
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        let local = stream.local_addr()?;
        let reader = BufReader::new(stream.try_clone()?);
        tracing::info!(%peer, "RTSP connection established");

        Ok(Self {
            reader,
            writer: Arc::new(Mutex::new(RequestWriter {
                stream,
                cseq: 0,
                session_id: None,
                auth: None,
            })),
            peer,
            local,
            partial: None,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    pub fn writer(&self) -> Arc<Mutex<RequestWriter>> {
        self.writer.clone()
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.reader.get_ref().set_read_timeout(timeout)
    }

    /// Send a request and wait for its response, skipping interleaved data
    /// and replies to earlier requests.
    pub fn request(&mut self, request: RtspRequest) -> Result<RtspResponse, StreamError> {
        let cseq = self.writer.lock().send(request)?;
        loop {
            match self.read_message()? {
                Message::Response(response) if response.cseq().is_none_or(|c| c == cseq) => {
                    tracing::debug!(status = response.status_code, cseq, "RTSP response");
                    return Ok(response);
                }
                Message::Response(stale) => {
                    tracing::debug!(cseq = ?stale.cseq(), "skipping stale RTSP response");
                }
                Message::Interleaved { channel, .. } => {
                    tracing::trace!(channel, "skipping interleaved data while awaiting response");
                }
            }
        }
    }

    /// Read the next framed message.
    ///
    /// Requests sent by the server and bytes that fit neither framing are
    /// skipped until the stream resynchronizes. A timeout inside an
    /// interleaved frame is resumable: the next call continues the frame.
    /// A timeout inside an RTSP message is reported as a lost connection,
    /// since the bytes already consumed cannot be recovered.
    pub fn read_message(&mut self) -> Result<Message, StreamError> {
        if self.partial.is_some() {
            return self.read_interleaved();
        }
        loop {
            let first = {
                let buf = self.reader.fill_buf()?;
                match buf.first() {
                    Some(&b) => b,
                    None => {
                        return Err(TransportError::ConnectionLost("closed by camera".into()).into());
                    }
                }
            };

            if first == b'$' {
                return self.read_interleaved();
            }

            if !first.is_ascii_uppercase() {
                self.reader.consume(1);
                continue;
            }

            let head = self.read_head().map_err(mid_message)?;
            if head.starts_with("RTSP/") {
                let mut response = RtspResponse::parse_head(&head)?;
                let body = self.read_body(response.content_length()).map_err(mid_message)?;
                if !body.is_empty() {
                    response.body = Some(body);
                }
                return Ok(Message::Response(response));
            }

            // A request from the server (e.g. SET_PARAMETER); not answered.
            let request = RtspRequest::parse(&head);
            let length = request
                .as_ref()
                .ok()
                .and_then(|r| r.get_header("Content-Length"))
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(0);
            self.read_body(length).map_err(mid_message)?;
            tracing::debug!(
                method = request.as_ref().map(|r| r.method.as_str()).unwrap_or("?"),
                "ignoring server request"
            );
        }
    }

    fn read_interleaved(&mut self) -> Result<Message, StreamError> {
        let partial = self.partial.get_or_insert_with(PartialFrame::default);

        while partial.header_read < partial.header.len() {
            let n = read_some(&mut self.reader, &mut partial.header[partial.header_read..])?;
            partial.header_read += n;
        }
        let header = partial.header;
        let len = usize::from(u16::from_be_bytes([header[2], header[3]]));
        let payload = partial.payload.get_or_insert_with(|| vec![0u8; len]);
        while partial.payload_read < len {
            let n = read_some(&mut self.reader, &mut payload[partial.payload_read..])?;
            partial.payload_read += n;
        }

        let payload = std::mem::take(payload);
        self.partial = None;
        Ok(Message::Interleaved {
            channel: header[1],
            payload,
        })
    }

    fn read_head(&mut self) -> Result<String, StreamError> {
        let mut head = Vec::new();
        loop {
            let before = head.len();
            let n = self.reader.read_until(b'\n', &mut head)?;
            if n == 0 {
                return Err(TransportError::ConnectionLost("closed mid-response".into()).into());
            }
            let line = &head[before..];
            if line == b"\r\n" || line == b"\n" {
                break;
            }
            if head.len() > MAX_HEAD_BYTES {
                return Err(StreamError::Parse {
                    kind: crate::error::ParseErrorKind::InvalidHeader,
                });
            }
        }
        Ok(String::from_utf8_lossy(&head).into_owned())
    }

    fn read_body(&mut self, length: usize) -> Result<String, StreamError> {
        if length == 0 {
            return Ok(String::new());
        }
        let mut body = vec![0u8; length];
        self.reader.read_exact(&mut body)?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

/// One `read` call that treats end of stream as a lost connection.
fn read_some(reader: &mut BufReader<TcpStream>, buf: &mut [u8]) -> Result<usize, StreamError> {
    loop {
        match reader.read(buf) {
            Ok(0) => return Err(TransportError::ConnectionLost("closed mid-frame".into()).into()),
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

fn mid_message(err: StreamError) -> StreamError {
    match err {
        StreamError::Transport(TransportError::Timeout) => {
            TransportError::ConnectionLost("timed out inside an RTSP message".into()).into()
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    fn pair(server_bytes: Vec<u8>) -> RtspConnection {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream.write_all(&server_bytes).unwrap();
        });
        RtspConnection::connect("127.0.0.1", addr.port(), Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn reads_interleaved_and_responses() {
        let mut bytes = vec![b'$', 0, 0, 3, 0xAA, 0xBB, 0xCC];
        bytes.extend_from_slice(b"RTSP/1.0 200 OK\r\nCSeq: 7\r\nContent-Length: 4\r\n\r\nbody");
        bytes.extend_from_slice(&[b'$', 1, 0, 1, 0x80]);
        let mut conn = pair(bytes);

        match conn.read_message().unwrap() {
            Message::Interleaved { channel, payload } => {
                assert_eq!(channel, 0);
                assert_eq!(payload, [0xAA, 0xBB, 0xCC]);
            }
            other => panic!("unexpected {other:?}"),
        }
        match conn.read_message().unwrap() {
            Message::Response(r) => {
                assert_eq!(r.cseq(), Some(7));
                assert_eq!(r.body.as_deref(), Some("body"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            conn.read_message().unwrap(),
            Message::Interleaved { channel: 1, .. }
        ));
        assert!(matches!(
            conn.read_message(),
            Err(StreamError::Transport(TransportError::ConnectionLost(_)))
        ));
    }

    /// Serves `chunks`, pausing after each one.
    fn staged(chunks: Vec<(Vec<u8>, Duration)>) -> RtspConnection {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            for (bytes, pause) in chunks {
                stream.write_all(&bytes).unwrap();
                stream.flush().unwrap();
                thread::sleep(pause);
            }
        });
        let conn = RtspConnection::connect("127.0.0.1", addr.port(), Duration::from_secs(2)).unwrap();
        conn.set_read_timeout(Some(Duration::from_millis(100))).unwrap();
        conn
    }

    #[test]
    fn stalled_frame_resumes_after_timeouts() {
        let stall = Duration::from_millis(400);
        let mut conn = staged(vec![
            (vec![b'$', 0], stall),
            (vec![0, 8, 0x24, 0x00, 0x00], stall),
            (vec![0x02, 0xAA, 0xBB, 0x80, 0x60, b'$', 1, 0, 1, 0x7F], stall),
        ]);

        let mut timeouts = 0;
        let message = loop {
            match conn.read_message() {
                Ok(message) => break message,
                Err(StreamError::Transport(TransportError::Timeout)) => timeouts += 1,
                Err(e) => panic!("unexpected {e:?}"),
            }
        };
        assert!(timeouts >= 2, "only {timeouts} timeouts");
        match message {
            Message::Interleaved { channel, payload } => {
                assert_eq!(channel, 0);
                assert_eq!(payload, [0x24, 0x00, 0x00, 0x02, 0xAA, 0xBB, 0x80, 0x60]);
            }
            other => panic!("unexpected {other:?}"),
        }
        match conn.read_message().unwrap() {
            Message::Interleaved { channel, payload } => {
                assert_eq!(channel, 1);
                assert_eq!(payload, [0x7F]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn stall_inside_response_head_loses_the_connection() {
        let mut conn = staged(vec![
            (b"RTSP/1.0 200 OK\r\nCSe".to_vec(), Duration::from_millis(400)),
            (b"q: 3\r\n\r\n".to_vec(), Duration::ZERO),
        ]);
        assert!(matches!(
            conn.read_message(),
            Err(StreamError::Transport(TransportError::ConnectionLost(_)))
        ));
    }

    #[test]
    fn skips_garbage_and_server_requests() {
        let mut bytes = vec![0x00, 0x17, 0xFF];
        bytes.extend_from_slice(b"SET_PARAMETER rtsp://c/ RTSP/1.0\r\nCSeq: 1\r\nContent-Length: 2\r\n\r\nhi");
        bytes.extend_from_slice(&[b'$', 0, 0, 1, 0x42]);
        let mut conn = pair(bytes);

        assert!(matches!(
            conn.read_message().unwrap(),
            Message::Interleaved { channel: 0, .. }
        ));
    }
}

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::session::Negotiated;
use crate::error::{Result, StreamError};
use crate::media::rtp::RtpPacket;
use crate::media::{Depacketizer, VideoFrame, depacketizer_for};
use crate::protocol::{RtspRequest, TransportSpec};
use crate::transport::{Message, RequestWriter, RtspConnection, UdpReceiver};

/// Largest datagram we expect on the RTP socket.
const UDP_BUFFER: usize = 64 * 1024;

/// Keepalives are never sent more often than this.
const MIN_KEEPALIVE: Duration = Duration::from_secs(1);

/// Stop/close state shared by the handle, its stoppers and the read loop.
pub(crate) struct Control {
    stopped: AtomicBool,
    open: AtomicBool,
    released: AtomicBool,
    writer: Arc<Mutex<RequestWriter>>,
    teardown_uri: String,
}

impl Control {
    pub(crate) fn new(writer: Arc<Mutex<RequestWriter>>, teardown_uri: String) -> Self {
        Self {
            stopped: AtomicBool::new(false),
            open: AtomicBool::new(true),
            released: AtomicBool::new(false),
            writer,
            teardown_uri,
        }
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub(crate) fn request_stop(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            tracing::info!(uri = %self.teardown_uri, "stopping stream");
        }
        self.release();
    }

    /// Send TEARDOWN and close the socket. Runs once; later calls only
    /// confirm the closed state.
    pub(crate) fn release(&self) {
        self.open.store(false, Ordering::Release);
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut writer = self.writer.lock();
        if let Err(e) = writer.send(RtspRequest::new("TEARDOWN", &self.teardown_uri)) {
            tracing::debug!(error = %e, "TEARDOWN not delivered");
        }
        writer.shutdown();
        tracing::info!(uri = %self.teardown_uri, "stream transport released");
    }
}

enum Source {
    Interleaved { rtp_channel: u8 },
    Udp { receiver: UdpReceiver, buf: Vec<u8> },
}

/// The read loop behind both pull and push mode.
pub(crate) struct FrameReader {
    conn: RtspConnection,
    source: Source,
    payload_type: u8,
    depacketizer: Box<dyn Depacketizer>,
    control: Arc<Control>,
    keepalive_every: Duration,
    last_keepalive: Instant,
    aggregate_uri: String,
    ended: bool,
}

impl FrameReader {
    pub(crate) fn new(
        conn: RtspConnection,
        negotiated: Negotiated,
        udp: Option<UdpReceiver>,
        control: Arc<Control>,
        read_timeout: Duration,
        keepalive: Option<Duration>,
    ) -> Result<Self> {
        conn.set_read_timeout(Some(read_timeout))?;
        let source = match (udp, negotiated.transport) {
            (Some(receiver), _) => {
                receiver.set_read_timeout(Some(read_timeout))?;
                Source::Udp {
                    receiver,
                    buf: vec![0; UDP_BUFFER],
                }
            }
            (None, TransportSpec::Interleaved { rtp_channel, .. }) => {
                Source::Interleaved { rtp_channel }
            }
            (None, TransportSpec::Udp { .. }) => {
                return Err(StreamError::Rtsp {
                    method: "SETUP",
                    status: 461,
                    reason: "camera answered interleaved request with UDP transport".into(),
                });
            }
        };

        let keepalive_every = keepalive
            .unwrap_or(negotiated.session_timeout / 2)
            .max(MIN_KEEPALIVE);
        tracing::debug!(?keepalive_every, "keepalive interval");

        Ok(Self {
            conn,
            source,
            payload_type: negotiated.video.payload_type,
            depacketizer: depacketizer_for(
                negotiated.video.codec,
                negotiated.video.parameter_sets,
            ),
            control,
            keepalive_every,
            last_keepalive: Instant::now(),
            aggregate_uri: negotiated.aggregate_uri,
            ended: false,
        })
    }

    /// Block until the next complete frame.
    ///
    /// `Ok(None)` means the stream was stopped or has already ended. An
    /// error means the connection is gone; the caller releases the
    /// transport.
    pub(crate) fn read_frame(&mut self) -> Result<Option<VideoFrame>> {
        loop {
            if self.ended || self.control.is_stopped() {
                return Ok(None);
            }
            if let Some(frame) = self.depacketizer.pop_frame() {
                return Ok(Some(frame));
            }

            let step = self.keepalive_if_due().and_then(|()| self.next_packet());
            match step {
                Ok(Some(packet)) => self.handle_packet(&packet),
                Ok(None) => {}
                Err(_) if self.control.is_stopped() => return Ok(None),
                Err(e) if e.is_transient() => {
                    tracing::trace!(error = %e, "transient read error");
                }
                Err(e) => {
                    self.ended = true;
                    tracing::warn!(error = %e, "stream connection lost");
                    return Err(e);
                }
            }
        }
    }

    fn next_packet(&mut self) -> Result<Option<Vec<u8>>> {
        match &mut self.source {
            Source::Interleaved { rtp_channel } => match self.conn.read_message()? {
                Message::Interleaved { channel, payload } if channel == *rtp_channel => {
                    Ok(Some(payload))
                }
                Message::Interleaved { channel, .. } => {
                    tracing::trace!(channel, "ignoring non-video channel");
                    Ok(None)
                }
                Message::Response(response) => {
                    if response.is_success() {
                        tracing::debug!(cseq = ?response.cseq(), "keepalive acknowledged");
                    } else {
                        tracing::warn!(
                            status = response.status_code,
                            reason = %response.status_text,
                            "camera rejected in-stream request"
                        );
                    }
                    Ok(None)
                }
            },
            Source::Udp { receiver, buf } => {
                Ok(receiver.recv(buf)?.map(|len| buf[..len].to_vec()))
            }
        }
    }

    fn handle_packet(&mut self, bytes: &[u8]) {
        let packet = match RtpPacket::parse(bytes) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::debug!(error = %e, "dropping unreadable RTP packet");
                return;
            }
        };
        if packet.payload_type != self.payload_type {
            tracing::trace!(pt = packet.payload_type, "ignoring foreign payload type");
            return;
        }
        if let Err(e) = self.depacketizer.push(&packet) {
            tracing::debug!(error = %e, seq = packet.sequence, "dropping RTP packet");
        }
    }

    fn keepalive_if_due(&mut self) -> Result<()> {
        if self.last_keepalive.elapsed() < self.keepalive_every {
            return Ok(());
        }
        self.last_keepalive = Instant::now();
        let request = RtspRequest::new("GET_PARAMETER", &self.aggregate_uri);
        match self.source {
            // The reply arrives between interleaved packets.
            Source::Interleaved { .. } => {
                self.conn.writer().lock().send(request)?;
            }
            Source::Udp { .. } => {
                let response = self.conn.request(request)?;
                if !response.is_success() {
                    tracing::warn!(status = response.status_code, "keepalive rejected");
                }
            }
        }
        Ok(())
    }
}

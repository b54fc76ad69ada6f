use std::io;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::time::Duration;

/// Attempts at finding a free even/odd port pair before giving up.
const BIND_ATTEMPTS: usize = 16;

/// Client-side UDP sockets for RTP delivery (RFC 3550 §11).
///
/// RTP goes to an even port and RTCP to the next odd one. Both are bound
/// for the lifetime of the stream so the camera's RTCP does not hit a
/// closed port; only RTP is read.
///
/// Datagrams from any address other than the camera are dropped.
pub struct UdpReceiver {
    rtp: UdpSocket,
    _rtcp: UdpSocket,
    camera: IpAddr,
}

impl UdpReceiver {
    /// Bind an RTP/RTCP pair on `local_ip` for packets from `camera`.
    pub fn bind_pair(local_ip: IpAddr, camera: IpAddr) -> io::Result<Self> {
        for _ in 0..BIND_ATTEMPTS {
            let rtp = UdpSocket::bind((local_ip, 0))?;
            let port = rtp.local_addr()?.port();
            if port % 2 != 0 || port == u16::MAX {
                continue;
            }
            if let Ok(rtcp) = UdpSocket::bind((local_ip, port + 1)) {
                tracing::debug!(rtp_port = port, rtcp_port = port + 1, "UDP receive ports bound");
                return Ok(Self {
                    rtp,
                    _rtcp: rtcp,
                    camera,
                });
            }
        }
        Err(io::Error::new(
            io::ErrorKind::AddrInUse,
            "no free RTP/RTCP port pair",
        ))
    }

    /// `(rtp, rtcp)` local ports, for the SETUP `client_port` parameter.
    pub fn ports(&self) -> io::Result<(u16, u16)> {
        let port = self.rtp.local_addr()?.port();
        Ok((port, port + 1))
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.rtp.set_read_timeout(timeout)
    }

    /// Receive one RTP datagram from the camera into `buf`.
    ///
    /// Returns `Ok(None)` for a datagram from some other sender.
    pub fn recv(&self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        let (len, from): (usize, SocketAddr) = self.rtp.recv_from(buf)?;
        if from.ip() != self.camera {
            tracing::trace!(%from, "dropping datagram from unexpected sender");
            return Ok(None);
        }
        Ok(Some(len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn binds_even_odd_pair_and_receives() {
        let lo = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let receiver = UdpReceiver::bind_pair(lo, lo).unwrap();
        let (rtp, rtcp) = receiver.ports().unwrap();
        assert_eq!(rtp % 2, 0);
        assert_eq!(rtcp, rtp + 1);

        let sender = UdpSocket::bind((lo, 0)).unwrap();
        sender.send_to(&[0x80, 0x60], (lo, rtp)).unwrap();

        receiver.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(receiver.recv(&mut buf).unwrap(), Some(2));
        assert_eq!(&buf[..2], &[0x80, 0x60]);
    }
}

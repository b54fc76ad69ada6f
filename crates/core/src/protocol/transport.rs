/// RTP transport negotiated in SETUP (RFC 2326 §12.39).
///
/// ## Wire format
///
/// ```text
/// Client → Server:
///   Transport: RTP/AVP/TCP;unicast;interleaved=0-1
///   Transport: RTP/AVP;unicast;client_port=50000-50001
///
/// Server → Client:
///   Transport: RTP/AVP/TCP;unicast;interleaved=0-1;ssrc=1A2B3C4D
///   Transport: RTP/AVP;unicast;client_port=50000-50001;server_port=6970-6971
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportSpec {
    /// RTP and RTCP multiplexed onto the RTSP connection with `$` framing.
    Interleaved { rtp_channel: u8, rtcp_channel: u8 },
    /// RTP and RTCP over a UDP port pair.
    Udp {
        client_rtp_port: u16,
        client_rtcp_port: u16,
        server_rtp_port: Option<u16>,
        server_rtcp_port: Option<u16>,
    },
}

impl TransportSpec {
    /// Header value for the SETUP request.
    pub fn request_header(&self) -> String {
        match self {
            Self::Interleaved {
                rtp_channel,
                rtcp_channel,
            } => format!("RTP/AVP/TCP;unicast;interleaved={rtp_channel}-{rtcp_channel}"),
            Self::Udp {
                client_rtp_port,
                client_rtcp_port,
                ..
            } => format!("RTP/AVP;unicast;client_port={client_rtp_port}-{client_rtcp_port}"),
        }
    }

    /// Parse the server's `Transport` reply.
    ///
    /// ```
    /// use reolink::protocol::TransportSpec;
    ///
    /// let t = TransportSpec::parse("RTP/AVP/TCP;unicast;interleaved=2-3").unwrap();
    /// assert_eq!(t, TransportSpec::Interleaved { rtp_channel: 2, rtcp_channel: 3 });
    ///
    /// assert!(TransportSpec::parse("RTP/AVP;unicast").is_none());
    /// ```
    pub fn parse(header: &str) -> Option<Self> {
        let mut interleaved = None;
        let mut client_ports = None;
        let mut server_ports = None;

        for part in header.split(';') {
            let part = part.trim();
            if let Some(channels) = part.strip_prefix("interleaved=") {
                interleaved = parse_pair::<u8>(channels);
            } else if let Some(ports) = part.strip_prefix("client_port=") {
                client_ports = parse_pair::<u16>(ports);
            } else if let Some(ports) = part.strip_prefix("server_port=") {
                server_ports = parse_pair::<u16>(ports);
            }
        }

        if let Some((rtp_channel, rtcp_channel)) = interleaved {
            return Some(Self::Interleaved {
                rtp_channel,
                rtcp_channel,
            });
        }

        let (client_rtp_port, client_rtcp_port) = client_ports?;
        Some(Self::Udp {
            client_rtp_port,
            client_rtcp_port,
            server_rtp_port: server_ports.map(|(rtp, _)| rtp),
            server_rtcp_port: server_ports.map(|(_, rtcp)| rtcp),
        })
    }
}

/// `a-b` or a lone `a` (RTCP then defaults to `a + 1`).
fn parse_pair<T>(value: &str) -> Option<(T, T)>
where
    T: std::str::FromStr + Copy + TryFrom<u32>,
    u32: From<T>,
{
    match value.split_once('-') {
        Some((a, b)) => Some((a.trim().parse().ok()?, b.trim().parse().ok()?)),
        None => {
            let a: T = value.trim().parse().ok()?;
            let b = T::try_from(u32::from(a) + 1).ok()?;
            Some((a, b))
        }
    }
}

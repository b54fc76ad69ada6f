//! Network transport for the RTSP client.
//!
//! RTSP uses a split transport model:
//!
//! - **TCP** ([`tcp`]): the control connection. Carries RTSP requests and
//!   responses and, with interleaved transport (RFC 2326 §10.12), the RTP
//!   media itself using `$` framing.
//!
//! - **UDP** ([`udp`]): an RTP/RTCP port pair the camera sends media to
//!   when interleaving is not used.

pub mod tcp;
pub mod udp;

pub use tcp::{Message, RequestWriter, RtspConnection};
pub use udp::UdpReceiver;

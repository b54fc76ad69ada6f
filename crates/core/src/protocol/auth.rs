//! RTSP authentication (RFC 2326 §12.5, RFC 2617).
//!
//! Cameras answer the first DESCRIBE with `401 Unauthorized` and a
//! `WWW-Authenticate` challenge. We support both schemes seen in the wild:
//!
//! ```text
//! WWW-Authenticate: Basic realm="IPC"
//! WWW-Authenticate: Digest realm="IPC", nonce="3d7f1c...", qop="auth"
//! ```

use std::fmt::Write as _;

use base64::prelude::{BASE64_STANDARD, Engine as _};
use md5::{Digest, Md5};
use rand::RngExt;

use crate::config::Credentials;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Challenge {
    Basic,
    Digest {
        realm: String,
        nonce: String,
        opaque: Option<String>,
        /// Set when the server offers `qop=auth`.
        qop_auth: bool,
    },
}

impl Challenge {
    /// Parse one `WWW-Authenticate` header value.
    pub fn parse(header: &str) -> Option<Self> {
        let header = header.trim();
        let (scheme, params) = header.split_once(' ').unwrap_or((header, ""));

        if scheme.eq_ignore_ascii_case("Basic") {
            return Some(Challenge::Basic);
        }
        if !scheme.eq_ignore_ascii_case("Digest") {
            return None;
        }

        let mut realm = None;
        let mut nonce = None;
        let mut opaque = None;
        let mut qop_auth = false;
        for (key, value) in auth_params(params) {
            match key.to_ascii_lowercase().as_str() {
                "realm" => realm = Some(value),
                "nonce" => nonce = Some(value),
                "opaque" => opaque = Some(value),
                "qop" => qop_auth = value.split(',').any(|q| q.trim() == "auth"),
                _ => {}
            }
        }

        Some(Challenge::Digest {
            realm: realm.unwrap_or_default(),
            nonce: nonce?,
            opaque,
            qop_auth,
        })
    }

    /// Pick the strongest challenge among several `WWW-Authenticate` values.
    pub fn select<'a>(headers: impl IntoIterator<Item = &'a str>) -> Option<Self> {
        let mut best = None;
        for challenge in headers.into_iter().filter_map(Self::parse) {
            if matches!(challenge, Challenge::Digest { .. }) {
                return Some(challenge);
            }
            best.get_or_insert(challenge);
        }
        best
    }
}

/// Split `k1="v1", k2=v2` into pairs, honouring quoted commas.
fn auth_params(params: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let mut rest = params.trim();
    while !rest.is_empty() {
        let Some((key, after)) = rest.split_once('=') else { break };
        let key = key.trim().trim_start_matches(',').trim().to_string();
        let after = after.trim_start();
        let (value, remaining) = if let Some(quoted) = after.strip_prefix('"') {
            match quoted.find('"') {
                Some(end) => (quoted[..end].to_string(), &quoted[end + 1..]),
                None => (quoted.to_string(), ""),
            }
        } else {
            match after.find(',') {
                Some(end) => (after[..end].trim().to_string(), &after[end..]),
                None => (after.trim().to_string(), ""),
            }
        };
        pairs.push((key, value));
        rest = remaining.trim_start_matches([',', ' ']);
    }
    pairs
}

/// Produces `Authorization` header values for every request once a
/// challenge has been received.
#[derive(Debug)]
pub struct Authenticator {
    credentials: Credentials,
    challenge: Challenge,
    nonce_count: u32,
}

impl Authenticator {
    pub fn new(credentials: Credentials, challenge: Challenge) -> Self {
        Self {
            credentials,
            challenge,
            nonce_count: 0,
        }
    }

    pub fn authorization(&mut self, method: &str, uri: &str) -> String {
        let user = &self.credentials.username;
        let pass = &self.credentials.password;
        match &self.challenge {
            Challenge::Basic => {
                format!("Basic {}", BASE64_STANDARD.encode(format!("{user}:{pass}")))
            }
            Challenge::Digest {
                realm,
                nonce,
                opaque,
                qop_auth,
            } => {
                let ha1 = md5_hex(&format!("{user}:{realm}:{pass}"));
                let ha2 = md5_hex(&format!("{method}:{uri}"));

                let mut header = format!(
                    "Digest username=\"{user}\", realm=\"{realm}\", nonce=\"{nonce}\", uri=\"{uri}\""
                );
                if *qop_auth {
                    self.nonce_count += 1;
                    let nc = format!("{:08x}", self.nonce_count);
                    let cnonce = format!("{:016x}", rand::rng().random::<u64>());
                    let response = md5_hex(&format!("{ha1}:{nonce}:{nc}:{cnonce}:auth:{ha2}"));
                    let _ = write!(
                        header,
                        ", response=\"{response}\", qop=auth, nc={nc}, cnonce=\"{cnonce}\""
                    );
                } else {
                    let response = md5_hex(&format!("{ha1}:{nonce}:{ha2}"));
                    let _ = write!(header, ", response=\"{response}\"");
                }
                if let Some(opaque) = opaque {
                    let _ = write!(header, ", opaque=\"{opaque}\"");
                }
                header
            }
        }
    }
}

fn md5_hex(input: &str) -> String {
    format!("{:x}", Md5::digest(input.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_digest_challenge() {
        let c = Challenge::parse(r#"Digest realm="IPC", nonce="abc,123", opaque="xyz", qop="auth,auth-int""#)
            .unwrap();
        assert_eq!(
            c,
            Challenge::Digest {
                realm: "IPC".into(),
                nonce: "abc,123".into(),
                opaque: Some("xyz".into()),
                qop_auth: true,
            }
        );
    }

    #[test]
    fn prefers_digest_over_basic() {
        let c = Challenge::select([r#"Basic realm="IPC""#, r#"Digest realm="IPC", nonce="n""#]);
        assert!(matches!(c, Some(Challenge::Digest { .. })));
        assert_eq!(Challenge::select(["Basic realm=\"x\""]), Some(Challenge::Basic));
        assert_eq!(Challenge::select(["Bearer foo"]), None);
    }

    #[test]
    fn basic_header() {
        let mut auth = Authenticator::new(Credentials::new("admin", "secret"), Challenge::Basic);
        assert_eq!(auth.authorization("DESCRIBE", "rtsp://cam/"), "Basic YWRtaW46c2VjcmV0");
    }

    #[test]
    fn digest_matches_rfc2617_example() {
        // RFC 2617 §3.5 worked example
        let challenge = Challenge::Digest {
            realm: "testrealm@host.com".into(),
            nonce: "dcd98b7102dd2f0e8b11d0f600bfb0c093".into(),
            opaque: None,
            qop_auth: false,
        };
        let ha1 = md5_hex("Mufasa:testrealm@host.com:Circle Of Life");
        assert_eq!(ha1, "939e7578ed9e3c518a452acee763bce9");
        // Bytes below 0x10 keep their leading zero.
        assert_eq!(md5_hex("a"), "0cc175b9c0f1b6a831c399e269772661");

        let mut auth = Authenticator::new(Credentials::new("Mufasa", "Circle Of Life"), challenge);
        let header = auth.authorization("GET", "/dir/index.html");
        let ha2 = md5_hex("GET:/dir/index.html");
        let expected = md5_hex(&format!("{ha1}:dcd98b7102dd2f0e8b11d0f600bfb0c093:{ha2}"));
        assert!(header.starts_with("Digest username=\"Mufasa\""));
        assert!(header.contains(&format!("response=\"{expected}\"")));
        assert!(!header.contains("qop"));
    }

    #[test]
    fn digest_with_qop_counts_nonces() {
        let challenge = Challenge::Digest {
            realm: "IPC".into(),
            nonce: "n".into(),
            opaque: Some("o".into()),
            qop_auth: true,
        };
        let mut auth = Authenticator::new(Credentials::new("u", "p"), challenge);
        assert!(auth.authorization("DESCRIBE", "rtsp://c/").contains("nc=00000001"));
        let second = auth.authorization("SETUP", "rtsp://c/t");
        assert!(second.contains("nc=00000002"));
        assert!(second.contains("opaque=\"o\""));
    }
}

//! SDP negotiation for the one media profile this server speaks: PCMU at
//! 8 kHz plus telephone-event, both over RTP/AVP.
//!
//! Parse failures and codec mismatches are distinct: an offer we cannot
//! read at all is a malformed-SDP error (500 on the INVITE), an offer with
//! no PCMU is answered 488.

use std::net::{IpAddr, SocketAddr};

use thiserror::Error;

use crate::rtp::{PT_PCMU, PT_TELEPHONE_EVENT};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SdpError {
    #[error("offer carries no c= connection line")]
    MissingConnection,
    #[error("offer carries no m=audio line")]
    MissingMedia,
    #[error("invalid media port: {0}")]
    BadPort(String),
    #[error("invalid connection address: {0}")]
    BadAddress(String),
    #[error("no common codec (PCMU not offered)")]
    NoCommonCodec,
}

impl SdpError {
    /// True when the offer was readable but incompatible (→ 488); false
    /// when it was malformed (→ 500).
    pub fn is_incompatible(&self) -> bool {
        matches!(self, SdpError::NoCommonCodec)
    }
}

/// The peer's side of a negotiated audio stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMedia {
    pub addr: SocketAddr,
}

/// Extract the peer RTP address from an SDP offer and confirm PCMU is on
/// the table. The media-level c= line wins over the session-level one.
pub fn parse_offer(sdp: &str) -> Result<RemoteMedia, SdpError> {
    let mut session_ip: Option<IpAddr> = None;
    let mut media_ip: Option<IpAddr> = None;
    let mut port: Option<u16> = None;
    let mut payload_types: Vec<u8> = Vec::new();
    let mut in_audio = false;

    for raw in sdp.lines() {
        let line = raw.trim_end_matches('\r');
        if let Some(rest) = line.strip_prefix("c=") {
            let ip = parse_connection(rest)?;
            if in_audio {
                media_ip = Some(ip);
            } else {
                session_ip = Some(ip);
            }
        } else if let Some(rest) = line.strip_prefix("m=") {
            let mut fields = rest.split_whitespace();
            let media = fields.next().unwrap_or_default();
            if media != "audio" {
                in_audio = false;
                continue;
            }
            in_audio = true;
            let port_str = fields.next().unwrap_or_default();
            port = Some(
                port_str
                    .parse::<u16>()
                    .map_err(|_| SdpError::BadPort(port_str.to_string()))?,
            );
            let _proto = fields.next();
            payload_types = fields.filter_map(|f| f.parse::<u8>().ok()).collect();
        }
    }

    let ip = media_ip.or(session_ip).ok_or(SdpError::MissingConnection)?;
    let port = port.ok_or(SdpError::MissingMedia)?;
    if !payload_types.contains(&PT_PCMU) {
        return Err(SdpError::NoCommonCodec);
    }

    Ok(RemoteMedia {
        addr: SocketAddr::new(ip, port),
    })
}

fn parse_connection(rest: &str) -> Result<IpAddr, SdpError> {
    // c=IN IP4 <address>
    let addr = rest
        .split_whitespace()
        .nth(2)
        .ok_or_else(|| SdpError::BadAddress(rest.to_string()))?;
    addr.parse::<IpAddr>()
        .map_err(|_| SdpError::BadAddress(addr.to_string()))
}

/// Build the answer advertising our media address, PCMU and telephone-event.
pub fn build_answer(server_ip: &str, rtp_port: u16, session_id: u64) -> String {
    format!(
        concat!(
            "v=0\r\n",
            "o=- {sid} {sid} IN IP4 {ip}\r\n",
            "s=LingSIP\r\n",
            "c=IN IP4 {ip}\r\n",
            "t=0 0\r\n",
            "m=audio {port} RTP/AVP {pcmu} {te}\r\n",
            "a=rtpmap:{pcmu} PCMU/8000\r\n",
            "a=rtpmap:{te} telephone-event/8000\r\n",
            "a=fmtp:{te} 0-15\r\n",
            "a=sendrecv\r\n",
        ),
        sid = session_id,
        ip = server_ip,
        port = rtp_port,
        pcmu = PT_PCMU,
        te = PT_TELEPHONE_EVENT,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const OFFER: &str = "v=0\r\n\
        o=caller 123 456 IN IP4 192.0.2.10\r\n\
        s=call\r\n\
        c=IN IP4 192.0.2.10\r\n\
        t=0 0\r\n\
        m=audio 40000 RTP/AVP 0 101\r\n\
        a=rtpmap:0 PCMU/8000\r\n";

    #[test]
    fn parses_remote_address_and_port() {
        let media = parse_offer(OFFER).unwrap();
        assert_eq!(media.addr, "192.0.2.10:40000".parse().unwrap());
    }

    #[test]
    fn media_level_connection_wins() {
        let offer = "c=IN IP4 192.0.2.10\r\n\
            m=audio 40000 RTP/AVP 0\r\n\
            c=IN IP4 198.51.100.7\r\n";
        let media = parse_offer(offer).unwrap();
        assert_eq!(media.addr, "198.51.100.7:40000".parse().unwrap());
    }

    #[test]
    fn missing_lines_are_malformed_not_incompatible() {
        let err = parse_offer("v=0\r\nm=audio 40000 RTP/AVP 0\r\n").unwrap_err();
        assert_eq!(err, SdpError::MissingConnection);
        assert!(!err.is_incompatible());

        let err = parse_offer("v=0\r\nc=IN IP4 192.0.2.1\r\n").unwrap_err();
        assert_eq!(err, SdpError::MissingMedia);
        assert!(!err.is_incompatible());
    }

    #[test]
    fn offer_without_pcmu_is_incompatible() {
        let offer = "c=IN IP4 192.0.2.10\r\nm=audio 40000 RTP/AVP 8 101\r\n";
        let err = parse_offer(offer).unwrap_err();
        assert_eq!(err, SdpError::NoCommonCodec);
        assert!(err.is_incompatible());
    }

    #[test]
    fn answer_advertises_both_payload_types() {
        let sdp = build_answer("203.0.113.5", 10000, 99);
        assert!(sdp.contains("s=LingSIP\r\n"));
        assert!(sdp.contains("c=IN IP4 203.0.113.5\r\n"));
        assert!(sdp.contains("m=audio 10000 RTP/AVP 0 101\r\n"));
        assert!(sdp.contains("a=rtpmap:0 PCMU/8000\r\n"));
        assert!(sdp.contains("a=rtpmap:101 telephone-event/8000\r\n"));
        assert!(sdp.contains("a=fmtp:101 0-15\r\n"));
        // our own answers parse back
        let media = parse_offer(&sdp).unwrap();
        assert_eq!(media.addr, "203.0.113.5:10000".parse().unwrap());
    }
}

use thiserror::Error;

use crate::rtp::packet::RtpPacket;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RtpParseError {
    #[error("packet too short")]
    TooShort,
    #[error("unsupported RTP version {0}")]
    UnsupportedVersion(u8),
}

pub fn parse_rtp_packet(buf: &[u8]) -> Result<RtpPacket, RtpParseError> {
    if buf.len() < 12 {
        return Err(RtpParseError::TooShort);
    }

    let b0 = buf[0];
    let b1 = buf[1];

    let version = b0 >> 6;
    let padding = (b0 & 0b0010_0000) != 0;
    let extension = (b0 & 0b0001_0000) != 0;
    let csrc_count = b0 & 0b0000_1111;

    if version != 2 {
        return Err(RtpParseError::UnsupportedVersion(version));
    }

    let marker = (b1 & 0b1000_0000) != 0;
    let payload_type = b1 & 0b0111_1111;

    let sequence_number = u16::from_be_bytes([buf[2], buf[3]]);
    let timestamp = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
    let ssrc = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);

    let mut offset = 12 + csrc_count as usize * 4;
    if buf.len() < offset {
        return Err(RtpParseError::TooShort);
    }

    if extension {
        if buf.len() < offset + 4 {
            return Err(RtpParseError::TooShort);
        }
        let ext_len_words = u16::from_be_bytes([buf[offset + 2], buf[offset + 3]]) as usize;
        offset += 4 + ext_len_words * 4;
        if buf.len() < offset {
            return Err(RtpParseError::TooShort);
        }
    }

    let mut payload_end = buf.len();
    if padding {
        if payload_end <= offset {
            return Err(RtpParseError::TooShort);
        }
        let pad_len = buf[payload_end - 1] as usize;
        if pad_len == 0 || pad_len > payload_end - offset {
            return Err(RtpParseError::TooShort);
        }
        payload_end -= pad_len;
    }

    Ok(RtpPacket {
        version,
        padding,
        extension,
        csrc_count,
        marker,
        payload_type,
        sequence_number,
        timestamp,
        ssrc,
        payload: buf[offset..payload_end].to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtp::builder::build_rtp_packet;

    #[test]
    fn parse_build_roundtrip() {
        let pkt = RtpPacket::new(0, 42, 16000, 0xDEADBEEF, vec![0xFF; 160]);
        let wire = build_rtp_packet(&pkt);
        assert_eq!(wire.len(), 12 + 160);
        let parsed = parse_rtp_packet(&wire).unwrap();
        assert_eq!(parsed, pkt);
    }

    #[test]
    fn rejects_short_and_wrong_version() {
        assert_eq!(parse_rtp_packet(&[0u8; 11]), Err(RtpParseError::TooShort));
        let mut wire = build_rtp_packet(&RtpPacket::new(0, 1, 0, 1, vec![0; 4]));
        wire[0] = 0b0100_0000; // version 1
        assert_eq!(
            parse_rtp_packet(&wire),
            Err(RtpParseError::UnsupportedVersion(1))
        );
    }

    #[test]
    fn strips_padding() {
        let pkt = RtpPacket {
            padding: true,
            ..RtpPacket::new(0, 7, 160, 99, vec![1, 2, 3, 4])
        };
        let mut wire = build_rtp_packet(&pkt);
        wire.extend_from_slice(&[0, 0, 0, 4]); // 4 bytes of padding
        let parsed = parse_rtp_packet(&wire).unwrap();
        assert_eq!(parsed.payload, vec![1, 2, 3, 4]);
    }
}

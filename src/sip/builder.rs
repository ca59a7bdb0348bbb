//! Response and request composition. Responses mirror the request's Via,
//! From, To, Call-ID and CSeq; a To tag is appended when the caller did not
//! send one, so the dialog the peer sees is stable across retransmissions.

use std::fmt::{self, Write};

use crate::sip::message::{SipHeader, SipMethod, SipRequest, SipResponse};

/// To-tag appended to locally-generated dialog responses.
pub const LOCAL_TAG: &str = "lingsip";

/// Methods advertised on OPTIONS.
pub const ALLOW_METHODS: &str = "INVITE, ACK, CANCEL, BYE, OPTIONS, REGISTER, INFO, PUBLISH";

pub struct SipResponseBuilder {
    status_code: u16,
    reason_phrase: String,
    headers: Vec<SipHeader>,
    body: Vec<u8>,
}

impl SipResponseBuilder {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            status_code: code,
            reason_phrase: reason.into(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(SipHeader::new(name, value));
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>, content_type: Option<&str>) -> Self {
        self.body = body.into();
        if let Some(ct) = content_type {
            let has_ct = self
                .headers
                .iter()
                .any(|h| h.name.eq_ignore_ascii_case("Content-Type"));
            if !has_ct {
                self.headers.push(SipHeader::new("Content-Type", ct));
            }
        }
        self
    }

    pub fn build(mut self) -> SipResponse {
        ensure_content_length(&mut self.headers, self.body.len());
        SipResponse {
            version: "SIP/2.0".to_string(),
            status_code: self.status_code,
            reason_phrase: self.reason_phrase,
            headers: self.headers,
            body: self.body,
        }
    }
}

fn ensure_content_length(headers: &mut Vec<SipHeader>, body_len: usize) {
    let has_len = headers
        .iter()
        .any(|h| h.name.eq_ignore_ascii_case("Content-Length"));
    if !has_len {
        headers.push(SipHeader::new("Content-Length", body_len.to_string()));
    }
}

/// To header of the request with our tag appended when the peer sent none.
pub fn tagged_to(req: &SipRequest) -> Option<String> {
    let to = req.header_value("To")?.to_string();
    if to.to_ascii_lowercase().contains("tag=") {
        Some(to)
    } else {
        Some(format!("{to};tag={LOCAL_TAG}"))
    }
}

/// Start a response mirroring the request's dialog headers. `None` when the
/// request is missing any of them (nothing sensible can be sent back).
pub fn response_from_request(req: &SipRequest, code: u16, reason: &str) -> Option<SipResponseBuilder> {
    let via = req.header_value("Via")?;
    let from = req.header_value("From")?;
    let to = tagged_to(req)?;
    let call_id = req.header_value("Call-ID")?;
    let cseq = req.header_value("CSeq")?;

    Some(
        SipResponseBuilder::new(code, reason)
            .header("Via", via)
            .header("From", from)
            .header("To", to)
            .header("Call-ID", call_id)
            .header("CSeq", cseq),
    )
}

/// Plain response with no extra headers or body.
pub fn simple_response(req: &SipRequest, code: u16, reason: &str) -> Option<SipResponse> {
    Some(response_from_request(req, code, reason)?.build())
}

/// 200 to an INVITE: answer SDP plus the Contact some clients need to route
/// their ACK.
pub fn invite_ok(
    req: &SipRequest,
    contact_ip: &str,
    sip_port: u16,
    answer_sdp: &str,
) -> Option<SipResponse> {
    Some(
        response_from_request(req, 200, "OK")?
            .header("Contact", format!("<sip:lingsip@{contact_ip}:{sip_port}>"))
            .body(answer_sdp.as_bytes(), Some("application/sdp"))
            .build(),
    )
}

/// In-dialog BYE for interpreter-initiated hangup. From/To are the dialog's
/// local and remote identities (already swapped by the caller).
pub fn bye_request(
    uri: &str,
    local_identity: &str,
    remote_identity: &str,
    call_id: &str,
    cseq: u32,
    via_host: &str,
    via_port: u16,
    branch: &str,
) -> SipRequest {
    let mut headers = vec![
        SipHeader::new(
            "Via",
            format!("SIP/2.0/UDP {via_host}:{via_port};branch=z9hG4bK{branch}"),
        ),
        SipHeader::new("From", local_identity),
        SipHeader::new("To", remote_identity),
        SipHeader::new("Call-ID", call_id),
        SipHeader::new("CSeq", format!("{cseq} BYE")),
        SipHeader::new("Max-Forwards", "70"),
    ];
    ensure_content_length(&mut headers, 0);
    SipRequest {
        method: SipMethod::Bye,
        uri: uri.to_string(),
        version: "SIP/2.0".to_string(),
        headers,
        body: Vec::new(),
    }
}

fn render_headers(headers: &[SipHeader], out: &mut String) {
    for h in headers {
        let _ = writeln!(out, "{}: {}\r", h.name, h.value);
    }
}

impl fmt::Display for SipResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        let mut headers = self.headers.clone();
        ensure_content_length(&mut headers, self.body.len());
        let _ = writeln!(
            out,
            "{} {} {}\r",
            self.version, self.status_code, self.reason_phrase
        );
        render_headers(&headers, &mut out);
        out.push_str("\r\n");
        f.write_str(&out)
    }
}

impl SipResponse {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = self.to_string().into_bytes();
        buf.extend_from_slice(&self.body);
        buf
    }
}

impl fmt::Display for SipRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        let mut headers = self.headers.clone();
        ensure_content_length(&mut headers, self.body.len());
        let _ = writeln!(
            out,
            "{} {} {}\r",
            self.method.as_str(),
            self.uri,
            self.version
        );
        render_headers(&headers, &mut out);
        out.push_str("\r\n");
        f.write_str(&out)
    }
}

impl SipRequest {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = self.to_string().into_bytes();
        buf.extend_from_slice(&self.body);
        buf
    }
}

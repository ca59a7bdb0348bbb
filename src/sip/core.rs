//! Per-method SIP dialog handling. The core owns protocol state (pending
//! dialogs via the store, in-dialog identities for BYE composition) and
//! emits call-control events the engine driver acts on; it never touches
//! media or the interpreter directly.
//!
//! Handlers are idempotent at the method level: a retransmitted INVITE is
//! answered with the stored 200 and creates no new state, a retransmitted
//! ACK finds no pending dialog and is dropped.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use log::{debug, info, warn};

use crate::entities::{CallRecord, CallStatus};
use crate::sdp;
use crate::sip::builder::{
    bye_request, invite_ok, response_from_request, simple_response, tagged_to, ALLOW_METHODS,
};
use crate::sip::message::{SipMessage, SipMethod, SipRequest};
use crate::sip::parse::parse_sip_message;
use crate::store::{SessionStore, StoreError};
use crate::transport::{SipInput, SipTx};

#[derive(Clone, Debug)]
pub struct SipConfig {
    /// Externally reachable IP advertised in SDP and Contact. When empty or
    /// a wildcard, the host the caller dialed (request URI) is used.
    pub advertised_ip: String,
    pub sip_port: u16,
    pub rtp_port: u16,
    pub max_concurrent_sessions: usize,
}

/// Call-control events surfaced to the engine driver.
#[derive(Debug, PartialEq, Eq)]
pub enum SipEvent {
    /// Three-way handshake completed; media and interpreter may start.
    Answered {
        call_id: String,
        peer_rtp: SocketAddr,
        caller: String,
        callee: String,
    },
    /// Call abandoned before or during setup (CANCEL, or BYE before ACK).
    Cancelled { call_id: String },
    /// Established call torn down by the peer.
    Bye { call_id: String },
}

/// What the core remembers about an answered dialog, enough to retransmit
/// the 200 and to build a best-effort in-dialog BYE.
struct DialogState {
    remote_signaling: SocketAddr,
    local_identity: String,
    remote_identity: String,
    remote_target: String,
    answer: Vec<u8>,
}

/// Pending dialogs older than this are treated as abandoned; an ACK that
/// arrives later finds no dialog and is dropped.
const PENDING_DIALOG_TTL_SECS: i64 = 60;

pub struct SipCore {
    config: SipConfig,
    store: Arc<dyn SessionStore>,
    tx: SipTx,
    dialogs: Mutex<HashMap<String, DialogState>>,
    cseq: AtomicU32,
}

impl SipCore {
    pub fn new(config: SipConfig, store: Arc<dyn SessionStore>, tx: SipTx) -> Self {
        Self {
            config,
            store,
            tx,
            dialogs: Mutex::new(HashMap::new()),
            cseq: AtomicU32::new(1),
        }
    }

    pub async fn handle_input(&self, input: &SipInput) -> Vec<SipEvent> {
        let text = String::from_utf8_lossy(&input.data);
        let message = match parse_sip_message(&text) {
            Ok(m) => m,
            Err(e) => {
                debug!("[sip] unparseable datagram from {}: {e}", input.src);
                return Vec::new();
            }
        };
        let req = match message {
            SipMessage::Request(req) => req,
            SipMessage::Response(res) => {
                debug!(
                    "[sip] response {} {} from {} (ignored)",
                    res.status_code, res.reason_phrase, input.src
                );
                return Vec::new();
            }
        };

        info!(
            "[sip] {} {} from {} call_id={}",
            req.method.as_str(),
            req.uri,
            input.src,
            req.call_id().unwrap_or("-")
        );

        match req.method.clone() {
            SipMethod::Register => self.handle_register(&req, input.src).await,
            SipMethod::Options => self.handle_options(&req, input.src).await,
            SipMethod::Invite => self.handle_invite(&req, input.src).await,
            SipMethod::Ack => self.handle_ack(&req).await,
            SipMethod::Cancel => self.handle_cancel(&req, input.src).await,
            SipMethod::Bye => self.handle_bye(&req, input.src).await,
            SipMethod::Info => self.handle_info(&req, input.src).await,
            SipMethod::Publish => self.handle_publish(&req, input.src).await,
            SipMethod::Unknown(_) => {
                self.respond(&req, input.src, 501, "Not Implemented").await;
                Vec::new()
            }
        }
    }

    async fn respond(&self, req: &SipRequest, dst: SocketAddr, code: u16, reason: &str) {
        match simple_response(req, code, reason) {
            Some(res) => self.tx.send(&res.to_bytes(), dst).await,
            None => warn!("[sip] cannot compose {code} response, dropping request"),
        }
    }

    async fn handle_register(&self, req: &SipRequest, src: SocketAddr) -> Vec<SipEvent> {
        let Some(username) = req.from_user() else {
            warn!("[sip] REGISTER without From user");
            self.respond(req, src, 401, "Unauthorized").await;
            return Vec::new();
        };

        let (contact_ip, contact_port) = req
            .contact_host_port()
            .unwrap_or_else(|| (src.ip().to_string(), src.port()));
        let info = crate::entities::RegistrationInfo {
            username: username.clone(),
            contact_ip,
            contact_port,
            expires: req.expires(),
            user_agent: req.header_value("User-Agent").unwrap_or("").to_string(),
            source_ip: req
                .via_received()
                .unwrap_or_else(|| src.ip().to_string()),
            registered_at: Utc::now(),
        };

        match self.store.put_registration(&info).await {
            Ok(()) => {
                info!(
                    "[sip] registered {username} contact={} expires={}",
                    info.contact(),
                    info.expires
                );
                let mut builder = match response_from_request(req, 200, "OK") {
                    Some(b) => b,
                    None => return Vec::new(),
                };
                if let Some(contact) = req.header_value("Contact") {
                    builder = builder.header("Contact", contact);
                }
                let res = builder
                    .header("Expires", info.expires.to_string())
                    .build();
                self.tx.send(&res.to_bytes(), src).await;
            }
            Err(StoreError::UserUnknown) => {
                self.respond(req, src, 401, "Unauthorized").await;
            }
            Err(StoreError::UserDisabled) => {
                self.respond(req, src, 403, "Forbidden").await;
            }
            Err(e) => {
                warn!("[sip] registration store error for {username}: {e}");
                self.respond(req, src, 500, "Internal Server Error").await;
            }
        }
        Vec::new()
    }

    async fn handle_options(&self, req: &SipRequest, src: SocketAddr) -> Vec<SipEvent> {
        if let Some(builder) = response_from_request(req, 200, "OK") {
            let res = builder.header("Allow", ALLOW_METHODS).build();
            self.tx.send(&res.to_bytes(), src).await;
        }
        Vec::new()
    }

    async fn handle_invite(&self, req: &SipRequest, src: SocketAddr) -> Vec<SipEvent> {
        let Some(call_id) = req.call_id().map(str::to_string) else {
            warn!("[sip] INVITE without Call-ID");
            self.respond(req, src, 500, "Internal Server Error").await;
            return Vec::new();
        };

        // Retransmission: answer again, create nothing.
        let stored = {
            let dialogs = self.dialogs.lock().unwrap();
            dialogs.get(&call_id).map(|d| d.answer.clone())
        };
        if let Some(answer) = stored {
            debug!("[sip] retransmitted INVITE for {call_id}, resending 200");
            self.tx.send(&answer, src).await;
            return Vec::new();
        }

        let remote = match sdp::parse_offer(&req.body_str()) {
            Ok(media) => media,
            Err(e) if e.is_incompatible() => {
                warn!("[sip] INVITE {call_id}: {e}");
                self.respond(req, src, 488, "Not Acceptable Here").await;
                return Vec::new();
            }
            Err(e) => {
                warn!("[sip] INVITE {call_id}: bad SDP: {e}");
                self.respond(req, src, 500, "Internal Server Error").await;
                return Vec::new();
            }
        };

        let server_ip = self.server_ip(req);
        let answer_sdp = sdp::build_answer(&server_ip, self.config.rtp_port, rand::random::<u32>() as u64);

        let Some(res) = invite_ok(req, &server_ip, self.config.sip_port, &answer_sdp) else {
            warn!("[sip] INVITE {call_id}: missing dialog headers");
            self.respond(req, src, 500, "Internal Server Error").await;
            return Vec::new();
        };
        let answer_bytes = res.to_bytes();

        if let Err(e) = self.store.put_pending(&call_id, remote.addr).await {
            warn!("[sip] failed to save pending dialog {call_id}: {e}");
        }

        let mut record = CallRecord::inbound(&call_id);
        record.from_user = req.from_user().unwrap_or_default();
        record.from_uri = req.header_value("From").unwrap_or("").to_string();
        record.from_ip = req
            .via_received()
            .unwrap_or_else(|| src.ip().to_string());
        record.to_user = req.to_user().unwrap_or_default();
        record.to_uri = req.header_value("To").unwrap_or("").to_string();
        record.local_rtp_addr = format!("{server_ip}:{}", self.config.rtp_port);
        record.remote_rtp_addr = remote.addr.to_string();
        if let Err(e) = self.store.put_call(&record).await {
            warn!("[sip] failed to save call record {call_id}: {e}");
        }

        {
            let mut dialogs = self.dialogs.lock().unwrap();
            dialogs.insert(
                call_id.clone(),
                DialogState {
                    remote_signaling: src,
                    local_identity: tagged_to(req).unwrap_or_default(),
                    remote_identity: req.header_value("From").unwrap_or("").to_string(),
                    remote_target: req
                        .header_value("Contact")
                        .and_then(crate::sip::message::uri_from_header)
                        .unwrap_or_else(|| format!("sip:{}@{}", record.from_user, src)),
                    answer: answer_bytes.clone(),
                },
            );
        }

        info!(
            "[sip] INVITE {call_id} answered, peer media {} (waiting for ACK)",
            remote.addr
        );
        self.tx.send(&answer_bytes, src).await;
        Vec::new()
    }

    async fn handle_ack(&self, req: &SipRequest) -> Vec<SipEvent> {
        let Some(call_id) = req.call_id().map(str::to_string) else {
            return Vec::new();
        };
        let pending = match self.store.get_pending(&call_id).await {
            Ok(Some(p)) => p,
            Ok(None) => {
                debug!("[sip] ACK for {call_id} without pending dialog, dropped");
                return Vec::new();
            }
            Err(e) => {
                warn!("[sip] pending lookup failed for {call_id}: {e}");
                return Vec::new();
            }
        };
        if Utc::now() - pending.created_at > chrono::Duration::seconds(PENDING_DIALOG_TTL_SECS) {
            warn!("[sip] pending dialog for {call_id} expired, dropping ACK");
            let _ = self.store.remove_pending(&call_id).await;
            let _ = self
                .store
                .update_call_status(&call_id, CallStatus::Cancelled, None)
                .await;
            return Vec::new();
        }
        if let Err(e) = self.store.remove_pending(&call_id).await {
            warn!("[sip] failed to remove pending dialog {call_id}: {e}");
        }

        // Concurrency bound is enforced here: the ACK is the moment a
        // session would come into existence.
        if self.store.active_count().await >= self.config.max_concurrent_sessions {
            warn!(
                "[sip] rejecting ACK for {call_id}: {} active sessions",
                self.config.max_concurrent_sessions
            );
            let _ = self
                .store
                .update_call_status(&call_id, CallStatus::Failed, None)
                .await;
            self.send_bye(&call_id).await;
            return Vec::new();
        }

        let now = Utc::now();
        if let Err(e) = self
            .store
            .update_call_status(&call_id, CallStatus::Answered, Some(now))
            .await
        {
            warn!("[sip] failed to mark {call_id} answered: {e}");
        }

        let record = self.store.get_call(&call_id).await.ok().flatten();
        let caller = record
            .as_ref()
            .map(|r| r.from_user.clone())
            .filter(|u| !u.is_empty())
            .or_else(|| req.from_user())
            .unwrap_or_default();
        let callee = record
            .as_ref()
            .map(|r| r.to_user.clone())
            .filter(|u| !u.is_empty())
            .or_else(|| req.to_user())
            .unwrap_or_default();

        info!("[sip] ACK for {call_id}, session established (callee {callee})");
        vec![SipEvent::Answered {
            call_id,
            peer_rtp: pending.peer_rtp,
            caller,
            callee,
        }]
    }

    async fn handle_cancel(&self, req: &SipRequest, src: SocketAddr) -> Vec<SipEvent> {
        let Some(call_id) = req.call_id().map(str::to_string) else {
            self.respond(req, src, 200, "OK").await;
            return Vec::new();
        };

        let had_pending = matches!(self.store.get_pending(&call_id).await, Ok(Some(_)));
        if had_pending {
            info!("[sip] CANCEL for {call_id} before ACK");
            let _ = self.store.remove_pending(&call_id).await;
        }
        let has_active = matches!(self.store.get_active(&call_id).await, Ok(Some(_)));

        self.dialogs.lock().unwrap().remove(&call_id);
        self.respond(req, src, 200, "OK").await;

        if had_pending || has_active {
            vec![SipEvent::Cancelled { call_id }]
        } else {
            Vec::new()
        }
    }

    async fn handle_bye(&self, req: &SipRequest, src: SocketAddr) -> Vec<SipEvent> {
        let Some(call_id) = req.call_id().map(str::to_string) else {
            self.respond(req, src, 200, "OK").await;
            return Vec::new();
        };

        let had_pending = matches!(self.store.get_pending(&call_id).await, Ok(Some(_)));
        if had_pending {
            warn!("[sip] BYE for {call_id} before ACK, treating as CANCEL");
            let _ = self.store.remove_pending(&call_id).await;
        }
        let has_active = matches!(self.store.get_active(&call_id).await, Ok(Some(_)));

        self.dialogs.lock().unwrap().remove(&call_id);
        self.respond(req, src, 200, "OK").await;

        if had_pending && !has_active {
            vec![SipEvent::Cancelled { call_id }]
        } else {
            vec![SipEvent::Bye { call_id }]
        }
    }

    async fn handle_info(&self, req: &SipRequest, src: SocketAddr) -> Vec<SipEvent> {
        let call_id = req.call_id().unwrap_or_default().to_string();
        if let Some(digit) = extract_info_digit(&req.body_str()) {
            match self.store.get_active(&call_id).await {
                Ok(Some(active)) => {
                    info!("[sip] INFO DTMF {digit} for {call_id}");
                    active.feed.push_dtmf(digit);
                }
                _ => debug!("[sip] INFO DTMF {digit} for {call_id} without active session"),
            }
        }
        self.respond(req, src, 200, "OK").await;
        Vec::new()
    }

    async fn handle_publish(&self, req: &SipRequest, src: SocketAddr) -> Vec<SipEvent> {
        self.respond(req, src, 200, "OK").await;
        Vec::new()
    }

    /// Best-effort in-dialog BYE for server-initiated hangup. Errors are
    /// logged; the dialog state stays until `forget_dialog`.
    pub async fn send_bye(&self, call_id: &str) {
        let (uri, local, remote, dst) = {
            let dialogs = self.dialogs.lock().unwrap();
            let Some(dialog) = dialogs.get(call_id) else {
                debug!("[sip] no dialog state for {call_id}, BYE skipped");
                return;
            };
            (
                dialog.remote_target.clone(),
                dialog.local_identity.clone(),
                dialog.remote_identity.clone(),
                dialog.remote_signaling,
            )
        };

        let cseq = self.cseq.fetch_add(1, Ordering::Relaxed);
        let branch = format!("{:08x}", rand::random::<u32>());
        let bye = bye_request(
            &uri,
            &local,
            &remote,
            call_id,
            cseq,
            &self.config.advertised_ip,
            self.config.sip_port,
            &branch,
        );
        info!("[sip] sending BYE for {call_id} to {dst}");
        self.tx.send(&bye.to_bytes(), dst).await;
    }

    /// Drop retained dialog state once a call is fully torn down.
    pub fn forget_dialog(&self, call_id: &str) {
        self.dialogs.lock().unwrap().remove(call_id);
    }

    fn server_ip(&self, req: &SipRequest) -> String {
        let configured = self.config.advertised_ip.trim();
        if !configured.is_empty() && configured != "0.0.0.0" {
            return configured.to_string();
        }
        // Fall back to the host the caller dialed.
        request_uri_host(&req.uri).unwrap_or_else(|| "127.0.0.1".to_string())
    }
}

fn request_uri_host(uri: &str) -> Option<String> {
    let rest = uri.strip_prefix("sips:").or_else(|| uri.strip_prefix("sip:"))?;
    let hostport = rest.split_once('@').map_or(rest, |(_, h)| h);
    let hostport = hostport.split(';').next().unwrap_or(hostport);
    let host = hostport.rsplit_once(':').map_or(hostport, |(h, _)| h);
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

/// DTMF digit from an INFO body: `Signal=` or `key=` lines first, then the
/// first plausible digit anywhere in the body.
fn extract_info_digit(body: &str) -> Option<char> {
    for key in ["Signal=", "signal=", "key="] {
        if let Some(pos) = body.find(key) {
            let value = body[pos + key.len()..]
                .lines()
                .next()
                .unwrap_or("")
                .trim()
                .trim_matches('"');
            if let Some(c) = value.chars().next() {
                if is_dtmf_digit(c) {
                    return Some(c);
                }
            }
        }
    }
    body.chars().find(|c| c.is_ascii_digit())
}

fn is_dtmf_digit(c: char) -> bool {
    c.is_ascii_digit() || matches!(c, '*' | '#' | 'A'..='D')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::feed::MediaFeed;
    use crate::store::{ActiveCall, MemoryStore};
    use std::time::Duration;
    use tokio::net::UdpSocket;
    use tokio_util::sync::CancellationToken;

    struct Fixture {
        core: SipCore,
        store: Arc<MemoryStore>,
        caller: UdpSocket,
        caller_addr: SocketAddr,
    }

    async fn fixture() -> Fixture {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let caller = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let caller_addr = caller.local_addr().unwrap();
        let store = Arc::new(MemoryStore::new());
        let core = SipCore::new(
            SipConfig {
                advertised_ip: "127.0.0.1".into(),
                sip_port: 5060,
                rtp_port: 10000,
                max_concurrent_sessions: 2,
            },
            store.clone(),
            SipTx::new(Arc::new(server)),
        );
        Fixture {
            core,
            store,
            caller,
            caller_addr,
        }
    }

    impl Fixture {
        async fn feed(&self, raw: &str) -> Vec<SipEvent> {
            self.core
                .handle_input(&SipInput {
                    data: raw.as_bytes().to_vec(),
                    src: self.caller_addr,
                })
                .await
        }

        async fn recv(&self) -> String {
            let mut buf = vec![0u8; 65536];
            let (len, _) = tokio::time::timeout(Duration::from_secs(1), self.caller.recv_from(&mut buf))
                .await
                .expect("no response")
                .unwrap();
            String::from_utf8_lossy(&buf[..len]).to_string()
        }
    }

    fn invite(call_id: &str) -> String {
        format!(
            "INVITE sip:10086@192.0.2.1 SIP/2.0\r\n\
             Via: SIP/2.0/UDP 192.0.2.9:5060;branch=z9hG4bK1\r\n\
             From: <sip:1001@192.0.2.9>;tag=abc\r\n\
             To: <sip:10086@192.0.2.1>\r\n\
             Call-ID: {call_id}\r\n\
             CSeq: 1 INVITE\r\n\
             Contact: <sip:1001@192.0.2.9:5060>\r\n\
             Content-Type: application/sdp\r\n\
             \r\n\
             v=0\r\n\
             o=- 1 1 IN IP4 192.0.2.9\r\n\
             s=call\r\n\
             c=IN IP4 192.0.2.9\r\n\
             t=0 0\r\n\
             m=audio 40000 RTP/AVP 0 101\r\n"
        )
    }

    fn ack(call_id: &str) -> String {
        format!(
            "ACK sip:10086@192.0.2.1 SIP/2.0\r\n\
             Via: SIP/2.0/UDP 192.0.2.9:5060;branch=z9hG4bK2\r\n\
             From: <sip:1001@192.0.2.9>;tag=abc\r\n\
             To: <sip:10086@192.0.2.1>;tag=lingsip\r\n\
             Call-ID: {call_id}\r\n\
             CSeq: 1 ACK\r\n\r\n"
        )
    }

    #[tokio::test]
    async fn invite_then_ack_promotes_exactly_once() {
        let f = fixture().await;
        let events = f.feed(&invite("c1")).await;
        assert!(events.is_empty());
        let res = f.recv().await;
        assert!(res.starts_with("SIP/2.0 200 OK"));
        assert!(res.contains("s=LingSIP"));
        assert!(res.contains("Contact: <sip:lingsip@127.0.0.1:5060>"));
        assert!(f.store.get_pending("c1").await.unwrap().is_some());

        let events = f.feed(&ack("c1")).await;
        assert_eq!(events.len(), 1);
        match &events[0] {
            SipEvent::Answered {
                call_id,
                peer_rtp,
                caller,
                callee,
            } => {
                assert_eq!(call_id, "c1");
                assert_eq!(peer_rtp.to_string(), "192.0.2.9:40000");
                assert_eq!(caller, "1001");
                assert_eq!(callee, "10086");
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(f.store.get_pending("c1").await.unwrap().is_none());
        let call = f.store.get_call("c1").await.unwrap().unwrap();
        assert_eq!(call.status, CallStatus::Answered);
        assert!(call.answer_time.is_some());

        // retransmitted ACK finds no pending dialog and emits nothing
        assert!(f.feed(&ack("c1")).await.is_empty());
    }

    #[tokio::test]
    async fn retransmitted_invite_is_answered_without_new_state() {
        let f = fixture().await;
        f.feed(&invite("c1")).await;
        f.recv().await;
        f.feed(&invite("c1")).await;
        let res = f.recv().await;
        assert!(res.starts_with("SIP/2.0 200 OK"));
        assert_eq!(f.store.pending_count(), 1);
    }

    #[tokio::test]
    async fn malformed_sdp_gets_500_and_no_pcmu_gets_488() {
        let f = fixture().await;
        let bad = invite("c2").replace("c=IN IP4 192.0.2.9\r\n", "");
        f.feed(&bad).await;
        assert!(f.recv().await.starts_with("SIP/2.0 500"));
        assert!(f.store.get_pending("c2").await.unwrap().is_none());

        let alaw_only = invite("c3").replace("RTP/AVP 0 101", "RTP/AVP 8");
        f.feed(&alaw_only).await;
        assert!(f.recv().await.starts_with("SIP/2.0 488"));
    }

    #[tokio::test]
    async fn cancel_before_ack_clears_pending() {
        let f = fixture().await;
        f.feed(&invite("c4")).await;
        f.recv().await;
        let cancel = invite("c4").replace("INVITE", "CANCEL").replace(
            "Content-Type: application/sdp\r\n",
            "",
        );
        let events = f.feed(&cancel).await;
        assert_eq!(events, vec![SipEvent::Cancelled { call_id: "c4".into() }]);
        assert!(f.store.get_pending("c4").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn bye_before_ack_is_treated_as_cancel() {
        let f = fixture().await;
        f.feed(&invite("c5")).await;
        f.recv().await;
        let bye = ack("c5").replace("ACK", "BYE");
        let events = f.feed(&bye).await;
        assert_eq!(events, vec![SipEvent::Cancelled { call_id: "c5".into() }]);
    }

    #[tokio::test]
    async fn bye_on_established_call_emits_bye() {
        let f = fixture().await;
        f.feed(&invite("c6")).await;
        f.recv().await;
        f.feed(&ack("c6")).await;
        f.store
            .put_active(
                "c6",
                ActiveCall {
                    peer_rtp: "192.0.2.9:40000".parse().unwrap(),
                    feed: MediaFeed::new(),
                    cancel: CancellationToken::new(),
                    recording_path: "/tmp/r.wav".into(),
                },
            )
            .await
            .unwrap();
        let bye = ack("c6").replace("ACK", "BYE");
        let events = f.feed(&bye).await;
        assert_eq!(events, vec![SipEvent::Bye { call_id: "c6".into() }]);
    }

    #[tokio::test]
    async fn ack_beyond_session_limit_is_rejected() {
        let f = fixture().await;
        for id in ["f1", "f2"] {
            f.store
                .put_active(
                    id,
                    ActiveCall {
                        peer_rtp: "192.0.2.9:1".parse().unwrap(),
                        feed: MediaFeed::new(),
                        cancel: CancellationToken::new(),
                        recording_path: "/tmp/r.wav".into(),
                    },
                )
                .await
                .unwrap();
        }
        f.feed(&invite("c7")).await;
        f.recv().await;
        let events = f.feed(&ack("c7")).await;
        assert!(events.is_empty());
        let call = f.store.get_call("c7").await.unwrap().unwrap();
        assert_eq!(call.status, CallStatus::Failed);
    }

    #[tokio::test]
    async fn info_enqueues_dtmf_to_the_active_feed() {
        let f = fixture().await;
        let feed = MediaFeed::new();
        f.store
            .put_active(
                "c8",
                ActiveCall {
                    peer_rtp: "192.0.2.9:1".parse().unwrap(),
                    feed: feed.clone(),
                    cancel: CancellationToken::new(),
                    recording_path: "/tmp/r.wav".into(),
                },
            )
            .await
            .unwrap();
        let info = "INFO sip:10086@192.0.2.1 SIP/2.0\r\n\
            Via: SIP/2.0/UDP 192.0.2.9:5060;branch=z9hG4bK9\r\n\
            From: <sip:1001@192.0.2.9>;tag=abc\r\n\
            To: <sip:10086@192.0.2.1>;tag=lingsip\r\n\
            Call-ID: c8\r\n\
            CSeq: 3 INFO\r\n\
            Content-Type: application/dtmf-relay\r\n\
            \r\n\
            Signal=5\r\nDuration=160\r\n";
        f.feed(info).await;
        assert!(f.recv().await.starts_with("SIP/2.0 200"));
        assert_eq!(feed.pop_dtmf(), Some('5'));
    }

    #[tokio::test]
    async fn register_paths() {
        let f = fixture().await;
        let ok = "REGISTER sip:192.0.2.1 SIP/2.0\r\n\
            Via: SIP/2.0/UDP 192.0.2.9:5060;branch=z9hG4bKr;received=203.0.113.9\r\n\
            From: <sip:2002@192.0.2.1>;tag=r1\r\n\
            To: <sip:2002@192.0.2.1>\r\n\
            Call-ID: reg-1\r\n\
            CSeq: 1 REGISTER\r\n\
            Contact: <sip:2002@192.0.2.9:5062>\r\n\
            User-Agent: TestPhone/1.0\r\n\
            Expires: 600\r\n\r\n";
        f.feed(ok).await;
        let res = f.recv().await;
        assert!(res.starts_with("SIP/2.0 200"));
        assert!(res.contains("Expires: 600"));
        assert!(res.contains("Contact: <sip:2002@192.0.2.9:5062>"));
        let saved = f.store.registration("2002").unwrap();
        assert_eq!(saved.contact(), "192.0.2.9:5062");
        assert_eq!(saved.source_ip, "203.0.113.9");

        let missing_user = ok
            .replace("From: <sip:2002@192.0.2.1>;tag=r1", "From: <sip:192.0.2.1>")
            .replace("Call-ID: reg-1", "Call-ID: reg-2");
        f.feed(&missing_user).await;
        assert!(f.recv().await.starts_with("SIP/2.0 401"));
    }

    #[tokio::test]
    async fn options_and_unknown_methods() {
        let f = fixture().await;
        let options = "OPTIONS sip:192.0.2.1 SIP/2.0\r\n\
            Via: SIP/2.0/UDP 192.0.2.9:5060;branch=z9hG4bKo\r\n\
            From: <sip:1001@192.0.2.9>;tag=o1\r\n\
            To: <sip:192.0.2.1>\r\n\
            Call-ID: opt-1\r\n\
            CSeq: 1 OPTIONS\r\n\r\n";
        f.feed(options).await;
        let res = f.recv().await;
        assert!(res.starts_with("SIP/2.0 200"));
        assert!(res.contains(&format!("Allow: {ALLOW_METHODS}")));

        let subscribe = options
            .replace("OPTIONS", "SUBSCRIBE")
            .replace("CSeq: 1 OPTIONS", "CSeq: 1 SUBSCRIBE");
        f.feed(&subscribe).await;
        assert!(f.recv().await.starts_with("SIP/2.0 501"));
    }

    #[test]
    fn info_digit_extraction() {
        assert_eq!(extract_info_digit("Signal=5\r\nDuration=100"), Some('5'));
        assert_eq!(extract_info_digit("key=#"), Some('#'));
        assert_eq!(extract_info_digit("Signal=\"*\""), Some('*'));
        assert_eq!(extract_info_digit("dtmf digit is 7 ok"), Some('7'));
        assert_eq!(extract_info_digit("nothing here"), None);
    }

    #[test]
    fn request_uri_host_extraction() {
        assert_eq!(request_uri_host("sip:10086@192.0.2.1"), Some("192.0.2.1".into()));
        assert_eq!(
            request_uri_host("sip:10086@pbx.example.com:5070;user=phone"),
            Some("pbx.example.com".into())
        );
        assert_eq!(request_uri_host("tel:+8610086"), None);
    }
}

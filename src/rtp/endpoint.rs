//! Shared RTP endpoint: one UDP socket for every call. A single
//! demultiplexer task routes inbound packets to the owning call's feed by
//! source IP; per-call senders pace outbound frames on the same socket.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};

use log::{debug, warn};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::audio::codec::{decode_mulaw, encode_mulaw};
use crate::audio::{FRAME_INTERVAL, FRAME_SAMPLES};
use crate::media::feed::MediaFeed;
use crate::rtp::builder::build_rtp_packet;
use crate::rtp::event::{digit_for_event, parse_telephone_event};
use crate::rtp::packet::RtpPacket;
use crate::rtp::parser::parse_rtp_packet;
use crate::rtp::{PT_PCMU, PT_TELEPHONE_EVENT};

type FeedMap = Arc<Mutex<HashMap<IpAddr, MediaFeed>>>;

pub struct RtpEndpoint {
    socket: Arc<UdpSocket>,
    local_port: u16,
    feeds: FeedMap,
}

impl RtpEndpoint {
    pub async fn bind(bind_ip: &str, port: u16) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind((bind_ip, port)).await?;
        let local_port = socket.local_addr()?.port();
        Ok(Self {
            socket: Arc::new(socket),
            local_port,
            feeds: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Route inbound packets from `peer` to `feed`. One feed per source IP;
    /// a later registration for the same IP replaces the earlier one.
    pub fn register_feed(&self, peer: IpAddr, feed: MediaFeed) {
        self.feeds.lock().unwrap().insert(peer, feed);
    }

    pub fn unregister_feed(&self, peer: &IpAddr) {
        self.feeds.lock().unwrap().remove(peer);
    }

    /// Paced sender towards one peer. Sequence starts at 1, SSRC is fixed
    /// for the lifetime of the sender.
    pub fn sender(&self, dst: SocketAddr) -> RtpSender {
        RtpSender {
            socket: self.socket.clone(),
            dst,
            ssrc: rand::random(),
            sequence: 1,
            timestamp: 0,
        }
    }

    /// Spawn the demultiplexer task. One per endpoint.
    pub fn spawn_demux(&self) -> JoinHandle<()> {
        let socket = self.socket.clone();
        let feeds = self.feeds.clone();
        tokio::spawn(async move {
            run_demux(socket, feeds).await;
        })
    }
}

async fn run_demux(socket: Arc<UdpSocket>, feeds: FeedMap) {
    let mut buf = vec![0u8; 1500];
    // A key press spans many event packets; remember the active event per
    // source so each press surfaces exactly one digit.
    let mut active_events: HashMap<IpAddr, u8> = HashMap::new();

    loop {
        let (len, src) = match socket.recv_from(&mut buf).await {
            Ok(v) => v,
            Err(e) => {
                warn!("[rtp] recv error: {e}");
                continue;
            }
        };

        let feed = {
            let map = feeds.lock().unwrap();
            map.get(&src.ip()).cloned()
        };
        let Some(feed) = feed else {
            // Packets from addresses that match no session are dropped.
            debug!("[rtp] drop packet from unknown peer {src}");
            continue;
        };

        let pkt = match parse_rtp_packet(&buf[..len]) {
            Ok(p) => p,
            Err(e) => {
                debug!("[rtp] parse error from {src}: {e}");
                continue;
            }
        };

        match pkt.payload_type {
            PT_PCMU => {
                active_events.remove(&src.ip());
                feed.push_audio(&decode_mulaw(&pkt.payload));
            }
            PT_TELEPHONE_EVENT => {
                let Some(ev) = parse_telephone_event(&pkt.payload) else {
                    continue;
                };
                let is_new = active_events.get(&src.ip()) != Some(&ev.event);
                if is_new {
                    active_events.insert(src.ip(), ev.event);
                    if let Some(digit) = digit_for_event(ev.event) {
                        debug!("[rtp] dtmf digit {digit} from {src}");
                        feed.push_dtmf(digit);
                    }
                }
                if ev.end {
                    active_events.remove(&src.ip());
                }
            }
            other => {
                debug!("[rtp] drop payload type {other} from {src}");
            }
        }
    }
}

/// Outcome of a paced send: either the whole buffer went out, or the
/// session's stop signal interrupted it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaceOutcome {
    Completed,
    Cancelled,
}

pub struct RtpSender {
    socket: Arc<UdpSocket>,
    dst: SocketAddr,
    ssrc: u32,
    sequence: u16,
    timestamp: u32,
}

impl RtpSender {
    /// Send PCM towards the peer, one µ-law frame per 20 ms tick. A missed
    /// tick is skipped, never made up for, so a stall shortens the audio
    /// instead of bursting packets. Send errors are logged and the frame is
    /// dropped; sequence numbers keep advancing.
    pub async fn send_pcm(&mut self, pcm: &[i16], cancel: &CancellationToken) -> PaceOutcome {
        let mut tick = interval(FRAME_INTERVAL);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        for frame in pcm.chunks(FRAME_SAMPLES) {
            tokio::select! {
                _ = cancel.cancelled() => return PaceOutcome::Cancelled,
                _ = tick.tick() => {}
            }

            let payload = encode_mulaw(frame);
            let payload_len = payload.len() as u32;
            let pkt = RtpPacket::new(PT_PCMU, self.sequence, self.timestamp, self.ssrc, payload);
            if let Err(e) = self.socket.send_to(&build_rtp_packet(&pkt), self.dst).await {
                warn!("[rtp] send to {} failed: {e}", self.dst);
            }
            self.sequence = self.sequence.wrapping_add(1);
            self.timestamp = self.timestamp.wrapping_add(payload_len);
        }
        PaceOutcome::Completed
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::codec::linear16_to_mulaw;
    use crate::rtp::builder::build_rtp_packet;

    async fn loopback_pair() -> (RtpEndpoint, UdpSocket) {
        let endpoint = RtpEndpoint::bind("127.0.0.1", 0).await.unwrap();
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        (endpoint, peer)
    }

    #[tokio::test]
    async fn sender_sequences_are_strictly_monotonic() {
        let (endpoint, peer) = loopback_pair().await;
        let peer_addr = peer.local_addr().unwrap();

        let mut sender = endpoint.sender(peer_addr);
        let pcm = vec![1000i16; FRAME_SAMPLES * 3 + 40];
        let outcome = sender.send_pcm(&pcm, &CancellationToken::new()).await;
        assert_eq!(outcome, PaceOutcome::Completed);

        let mut buf = vec![0u8; 1500];
        let mut expected_seq = 1u16;
        let mut expected_ts = 0u32;
        for i in 0..4 {
            let (len, _) = peer.recv_from(&mut buf).await.unwrap();
            let pkt = parse_rtp_packet(&buf[..len]).unwrap();
            assert_eq!(pkt.payload_type, PT_PCMU);
            assert_eq!(pkt.sequence_number, expected_seq);
            assert_eq!(pkt.timestamp, expected_ts);
            let expected_len = if i < 3 { FRAME_SAMPLES } else { 40 };
            assert_eq!(pkt.payload.len(), expected_len);
            expected_seq += 1;
            expected_ts += expected_len as u32;
        }
    }

    #[tokio::test]
    async fn cancellation_interrupts_pacing() {
        let (endpoint, peer) = loopback_pair().await;
        let mut sender = endpoint.sender(peer.local_addr().unwrap());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = sender
            .send_pcm(&vec![0i16; FRAME_SAMPLES * 50], &cancel)
            .await;
        assert_eq!(outcome, PaceOutcome::Cancelled);
    }

    #[tokio::test]
    async fn demux_routes_audio_by_source_ip() {
        let (endpoint, peer) = loopback_pair().await;
        let endpoint_addr = format!("127.0.0.1:{}", endpoint.local_port());
        let feed = MediaFeed::new();
        endpoint.register_feed(peer.local_addr().unwrap().ip(), feed.clone());
        let _demux = endpoint.spawn_demux();

        let samples = vec![1200i16; FRAME_SAMPLES];
        let payload: Vec<u8> = samples.iter().map(|&s| linear16_to_mulaw(s)).collect();
        let pkt = RtpPacket::new(PT_PCMU, 1, 0, 7, payload);
        peer.send_to(&build_rtp_packet(&pkt), &endpoint_addr)
            .await
            .unwrap();

        feed.wait_audio(std::time::Duration::from_secs(1)).await;
        let got = feed.take_audio();
        assert_eq!(got.len(), FRAME_SAMPLES);
    }

    #[tokio::test]
    async fn demux_surfaces_one_digit_per_key_press() {
        let (endpoint, peer) = loopback_pair().await;
        let endpoint_addr = format!("127.0.0.1:{}", endpoint.local_port());
        let feed = MediaFeed::new();
        endpoint.register_feed(peer.local_addr().unwrap().ip(), feed.clone());
        let _demux = endpoint.spawn_demux();

        // Three packets for the same press (event 5), end flag on the last.
        for (dur, end) in [(160u16, false), (320, false), (480, true)] {
            let mut payload = vec![5u8, 0x0A, 0, 0];
            if end {
                payload[1] |= 0x80;
            }
            payload[2..4].copy_from_slice(&dur.to_be_bytes());
            let pkt = RtpPacket::new(PT_TELEPHONE_EVENT, 1, 0, 7, payload);
            peer.send_to(&build_rtp_packet(&pkt), &endpoint_addr)
                .await
                .unwrap();
        }

        feed.wait_dtmf(std::time::Duration::from_secs(1)).await;
        assert_eq!(feed.pop_dtmf(), Some('5'));
        // Allow the remaining packets to land; no further digit may appear.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(feed.pop_dtmf(), None);
    }
}

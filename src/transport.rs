//! SIP transport: one UDP socket, a reader task feeding the signaling loop
//! and a cloneable send handle for responses and locally-originated
//! requests.

use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, warn};
use tokio::net::UdpSocket;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

/// Raw datagram handed to the signaling loop.
#[derive(Debug)]
pub struct SipInput {
    pub data: Vec<u8>,
    pub src: SocketAddr,
}

#[derive(Clone)]
pub struct SipTx {
    socket: Arc<UdpSocket>,
}

impl SipTx {
    pub fn new(socket: Arc<UdpSocket>) -> Self {
        Self { socket }
    }

    /// Fire-and-forget send; transport errors are logged, signaling never
    /// blocks on them.
    pub async fn send(&self, data: &[u8], dst: SocketAddr) {
        match self.socket.send_to(data, dst).await {
            Ok(n) => debug!("[transport] sent {n} bytes to {dst}"),
            Err(e) => warn!("[transport] send to {dst} failed: {e}"),
        }
    }
}

/// Read datagrams off the SIP socket into the signaling channel until the
/// channel closes.
pub fn spawn_sip_reader(socket: Arc<UdpSocket>, tx: UnboundedSender<SipInput>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = vec![0u8; 65536];
        loop {
            match socket.recv_from(&mut buf).await {
                Ok((len, src)) => {
                    let input = SipInput {
                        data: buf[..len].to_vec(),
                        src,
                    };
                    if tx.send(input).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("[transport] recv error: {e}");
                }
            }
        }
    })
}

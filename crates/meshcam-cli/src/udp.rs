//! UDP stand-in for the long-range radio
//!
//! Every frame is sent to all configured peer addresses, so a handful of
//! processes on one host (or a LAN) behave like nodes sharing one channel.
//! Reads never block; an empty socket reads as "nothing received".

use meshcam_core::{NodeId, Radio};
use std::io;
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tracing::{debug, trace, warn};

/// UDP carries no signal strength; report a solid link
const NOMINAL_RSSI: i16 = -60;

/// Largest datagram we expect; anything longer is truncated and dropped
const MAX_DATAGRAM: usize = 2048;

#[derive(Debug)]
pub struct UdpRadio {
    socket: UdpSocket,
    peers: Vec<SocketAddr>,
    buf: Vec<u8>,
}

impl UdpRadio {
    pub async fn bind(addr: SocketAddr, peers: Vec<SocketAddr>) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        debug!(local = %socket.local_addr()?, peers = peers.len(), "UDP radio bound");
        Ok(Self {
            socket,
            peers,
            buf: vec![0u8; MAX_DATAGRAM],
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl Radio for UdpRadio {
    fn send_raw(&mut self, destination: NodeId, data: &[u8]) -> bool {
        let mut sent_any = false;
        for peer in &self.peers {
            match self.socket.try_send_to(data, *peer) {
                Ok(_) => sent_any = true,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    trace!(%peer, "Socket busy");
                }
                Err(e) => warn!(%peer, error = %e, "UDP send failed"),
            }
        }
        trace!(%destination, len = data.len(), sent_any, "Frame sent");
        sent_any
    }

    fn receive_raw(&mut self) -> Option<Vec<u8>> {
        loop {
            match self.socket.try_recv_from(&mut self.buf) {
                Ok((len, from)) if len < MAX_DATAGRAM => {
                    trace!(%from, len, "Frame received");
                    return Some(self.buf[..len].to_vec());
                }
                Ok((_, from)) => {
                    debug!(%from, "Oversized datagram dropped");
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return None,
                Err(e) => {
                    warn!(error = %e, "UDP receive failed");
                    return None;
                }
            }
        }
    }

    fn last_rssi(&self) -> i16 {
        NOMINAL_RSSI
    }
}

use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Instant;

use log::{debug, trace, warn};

use super::protocol::{MAX_DATAGRAM_SIZE, RECEIVE_BUFFER_SIZE};
use super::stats::{PacketLossSimulation, SocketStats};

#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
    #[error("datagram of {size} bytes exceeds the {limit} byte limit")]
    DatagramTooLarge { size: usize, limit: usize },
}

pub struct DatagramSocket {
    socket: UdpSocket,
    local_addr: SocketAddr,
    stats: SocketStats,
    loss_simulation: PacketLossSimulation,
    max_datagram_size: usize,
    recv_buffer: Box<[u8; RECEIVE_BUFFER_SIZE]>,
}

impl DatagramSocket {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> Result<Self, SocketError> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;

        let local_addr = socket.local_addr()?;

        Ok(Self {
            socket,
            local_addr,
            stats: SocketStats::default(),
            loss_simulation: PacketLossSimulation::default(),
            max_datagram_size: MAX_DATAGRAM_SIZE,
            recv_buffer: Box::new([0u8; RECEIVE_BUFFER_SIZE]),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> &SocketStats {
        &self.stats
    }

    pub fn set_loss_simulation(&mut self, simulation: PacketLossSimulation) {
        self.loss_simulation = simulation;
    }

    pub fn set_max_datagram_size(&mut self, size: usize) {
        self.max_datagram_size = size.min(RECEIVE_BUFFER_SIZE);
    }

    pub fn max_datagram_size(&self) -> usize {
        self.max_datagram_size
    }

    /// A datagram swallowed by the loss simulation still reports its full
    /// length as sent.
    pub fn send_to(&mut self, data: &[u8], addr: SocketAddr) -> Result<usize, SocketError> {
        if data.len() > self.max_datagram_size {
            return Err(SocketError::DatagramTooLarge {
                size: data.len(),
                limit: self.max_datagram_size,
            });
        }

        if self.loss_simulation.should_drop() {
            self.stats.datagrams_dropped += 1;
            debug!("Simulated loss of {} byte datagram to {}", data.len(), addr);
            return Ok(data.len());
        }

        let bytes = self.socket.send_to(data, addr)?;

        self.stats.datagrams_sent += 1;
        self.stats.bytes_sent += bytes as u64;
        trace!("Sent {} bytes to {}", bytes, addr);

        Ok(bytes)
    }

    pub fn receive(&mut self) -> Result<Vec<(SocketAddr, Vec<u8>)>, SocketError> {
        self.stats.update_rates(Instant::now());

        let socket = &self.socket;
        drain_datagrams(&mut self.stats, &mut self.recv_buffer[..], |buf| {
            socket.recv_from(buf)
        })
    }
}

// ICMP errors from earlier sends, not failures of this socket
fn is_icmp_error(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionRefused
    )
}

fn drain_datagrams(
    stats: &mut SocketStats,
    buffer: &mut [u8],
    mut recv: impl FnMut(&mut [u8]) -> io::Result<(usize, SocketAddr)>,
) -> Result<Vec<(SocketAddr, Vec<u8>)>, SocketError> {
    let mut datagrams = Vec::new();

    loop {
        match recv(buffer) {
            Ok((size, addr)) => {
                stats.datagrams_received += 1;
                stats.bytes_received += size as u64;
                trace!("Received {} bytes from {}", size, addr);

                datagrams.push((addr, buffer[..size].to_vec()));
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(ref e) if is_icmp_error(e) => continue,
            Err(e) if datagrams.is_empty() => return Err(e.into()),
            Err(e) => {
                warn!("Receive failed after {} datagram(s): {}", datagrams.len(), e);
                break;
            }
        }
    }

    Ok(datagrams)
}

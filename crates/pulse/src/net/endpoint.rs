use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use super::protocol::{Envelope, MAX_PACKET_SIZE, Payload};
use super::stats::NetworkStats;

/// Non-blocking UDP endpoint polled from a tick loop. Used by the server and
/// by test harnesses that play the server role.
pub struct NetworkEndpoint {
    socket: UdpSocket,
    local_addr: SocketAddr,
    send_sequence: u32,
    stats: NetworkStats,
    recv_buffer: [u8; MAX_PACKET_SIZE * 2],
}

impl NetworkEndpoint {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;

        let local_addr = socket.local_addr()?;

        Ok(Self {
            socket,
            local_addr,
            send_sequence: 1,
            stats: NetworkStats::default(),
            recv_buffer: [0u8; MAX_PACKET_SIZE * 2],
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    pub fn create_packet(&mut self, payload: Payload) -> Envelope {
        let sequence = self.send_sequence;
        self.send_sequence = self.send_sequence.wrapping_add(1);
        Envelope::new(sequence, payload)
    }

    pub fn send_to(&mut self, envelope: &Envelope, addr: SocketAddr) -> io::Result<usize> {
        let data = envelope
            .serialize()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let bytes = self.socket.send_to(&data, addr)?;

        self.stats.record_sent(bytes);

        Ok(bytes)
    }

    pub fn send_payload(&mut self, payload: Payload, addr: SocketAddr) -> io::Result<usize> {
        let envelope = self.create_packet(payload);
        self.send_to(&envelope, addr)
    }

    /// Sends raw bytes, bypassing the codec.
    pub fn send_raw(&mut self, data: &[u8], addr: SocketAddr) -> io::Result<usize> {
        self.socket.send_to(data, addr)
    }

    pub fn receive(&mut self) -> io::Result<Vec<(Envelope, SocketAddr)>> {
        let mut packets = Vec::new();

        loop {
            match self.socket.recv_from(&mut self.recv_buffer) {
                Ok((size, addr)) => match Envelope::deserialize(&self.recv_buffer[..size]) {
                    Ok(envelope) => {
                        self.stats.record_received(size);
                        packets.push((envelope, addr));
                    }
                    Err(e) => {
                        self.stats.malformed_dropped += 1;
                        log::warn!("Dropping malformed datagram from {}: {}", addr, e);
                    }
                },
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                // Windows reports ICMP port unreachable from an earlier send here.
                Err(ref e) if e.kind() == io::ErrorKind::ConnectionReset => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(packets)
    }
}

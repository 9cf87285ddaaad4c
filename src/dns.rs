//! Catch-all DNS responder for the portal network.
//!
//! Every query is answered with the device's own address no matter which
//! name was asked for, so any hostname a client resolves lands on the
//! portal. Pumped from the control loop, bounded per tick, nothing here
//! blocks.

use std::net::UdpSocket;

use esp_idf_svc::ipv4::Ipv4Addr;

const DNS_PORT: u16 = 53;
/// Upper bound of queries serviced per loop tick.
const MAX_PER_TICK: usize = 8;
const TTL_SECS: u32 = 60;

const FLAG_RESPONSE: u16 = 0x8000;
const FLAG_AUTHORITATIVE: u16 = 0x0400;
const FLAG_RECURSION_DESIRED: u16 = 0x0100;
const FLAG_RECURSION_AVAILABLE: u16 = 0x0080;

const HEADER_LEN: usize = 12;

pub struct CaptiveDns {
    socket: UdpSocket,
    ip: Ipv4Addr,
}

impl CaptiveDns {
    pub fn bind(ip: Ipv4Addr) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", DNS_PORT))?;
        socket.set_nonblocking(true)?;
        log::info!("DNS responder on 0.0.0.0:{}, answering {}", DNS_PORT, ip);
        Ok(Self { socket, ip })
    }

    /// Service pending queries without blocking. Malformed packets are
    /// dropped silently, send errors only logged.
    pub fn pump(&mut self) {
        let mut buf = [0u8; 512];
        for _ in 0..MAX_PER_TICK {
            let (len, peer) = match self.socket.recv_from(&mut buf) {
                Ok(received) => received,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return,
                Err(e) => {
                    log::warn!("DNS recv error: {}", e);
                    return;
                }
            };

            match build_response(&buf[..len], self.ip) {
                Some(reply) => {
                    if let Err(e) = self.socket.send_to(&reply, peer) {
                        log::warn!("DNS send to {} failed: {}", peer, e);
                    }
                }
                None => log::debug!("dropping unparseable DNS packet from {}", peer),
            }
        }
    }
}

/// Build a response claiming our address for the first question.
///
/// Returns `None` for packets that are not plain queries or are too
/// mangled to parse.
fn build_response(query: &[u8], ip: Ipv4Addr) -> Option<Vec<u8>> {
    if query.len() < HEADER_LEN {
        return None;
    }

    let flags = u16::from_be_bytes([query[2], query[3]]);
    if flags & FLAG_RESPONSE != 0 {
        return None;
    }

    let qdcount = u16::from_be_bytes([query[4], query[5]]);
    if qdcount == 0 {
        return None;
    }

    let question_end = skip_question(query, HEADER_LEN)?;

    let reply_flags = FLAG_RESPONSE
        | FLAG_AUTHORITATIVE
        | (flags & FLAG_RECURSION_DESIRED)
        | FLAG_RECURSION_AVAILABLE;

    let mut reply = Vec::with_capacity(question_end + 16);
    reply.extend_from_slice(&query[0..2]); // transaction id echoed
    reply.extend_from_slice(&reply_flags.to_be_bytes());
    reply.extend_from_slice(&1u16.to_be_bytes()); // QDCOUNT
    reply.extend_from_slice(&1u16.to_be_bytes()); // ANCOUNT
    reply.extend_from_slice(&0u16.to_be_bytes()); // NSCOUNT
    reply.extend_from_slice(&0u16.to_be_bytes()); // ARCOUNT
    reply.extend_from_slice(&query[HEADER_LEN..question_end]);

    reply.extend_from_slice(&[0xC0, HEADER_LEN as u8]); // pointer to the question name
    reply.extend_from_slice(&1u16.to_be_bytes()); // TYPE A
    reply.extend_from_slice(&1u16.to_be_bytes()); // CLASS IN
    reply.extend_from_slice(&TTL_SECS.to_be_bytes());
    reply.extend_from_slice(&4u16.to_be_bytes()); // RDLENGTH
    reply.extend_from_slice(&ip.octets());

    Some(reply)
}

/// Walk the label sequence of the first question; returns the offset one
/// past its QTYPE/QCLASS.
fn skip_question(packet: &[u8], mut pos: usize) -> Option<usize> {
    loop {
        let len = *packet.get(pos)? as usize;
        if len == 0 {
            pos += 1;
            break;
        }
        if len & 0xC0 != 0 {
            // compressed name in a question, nobody sends that
            return None;
        }
        pos += 1 + len;
    }

    pos += 4; // QTYPE + QCLASS
    if pos > packet.len() {
        return None;
    }
    Some(pos)
}

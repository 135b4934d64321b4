#[cfg(test)]
mod chunk_test;

use crate::error::Error;

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

pub(crate) const UDP_STR: &str = "udp";

static TAG_CTR: AtomicU64 = AtomicU64::new(0);

/// Encodes a u64 value to a lowercase base36 string, used for the chunk's
/// trace tag. Only uniqueness matters; the value itself carries no meaning.
pub fn base36(value: u64) -> String {
    if value == 0 {
        return "0".repeat(8);
    }

    let mut digits: Vec<u8> = vec![];
    let mut value = value;
    while value > 0 {
        let digit = (value % 36) as usize;
        value /= 36;
        digits.push(b"0123456789abcdefghijklmnopqrstuvwxyz"[digit]);
    }
    digits.reverse();
    format!("{:0>8}", String::from_utf8(digits).unwrap())
}

fn assign_chunk_tag() -> String {
    base36(TAG_CTR.fetch_add(1, Ordering::SeqCst))
}

/// One UDP datagram in transit through the simulator. Immutable once
/// emitted, except for the timestamp the router stamps at enqueue time.
pub trait Chunk: fmt::Display + Send + Sync {
    /// Stamps the chunk with the current time; called by the router when a
    /// chunk enters its forwarding queue.
    fn set_timestamp(&mut self) -> SystemTime;
    fn get_timestamp(&self) -> SystemTime;
    fn get_source_ip(&self) -> IpAddr;
    fn get_destination_ip(&self) -> IpAddr;
    fn source_addr(&self) -> SocketAddr;
    fn destination_addr(&self) -> SocketAddr;
    fn set_source_addr(&mut self, address: &str) -> Result<(), Error>;
    fn set_destination_addr(&mut self, address: &str) -> Result<(), Error>;
    fn user_data(&self) -> Vec<u8>;
    fn tag(&self) -> &str;
    fn clone_to(&self) -> Box<dyn Chunk>;
    /// "udp" for every chunk this crate produces (TCP is a non-goal).
    fn network(&self) -> &'static str;
}

pub(crate) struct ChunkUdp {
    timestamp: SystemTime,
    source_ip: IpAddr,
    destination_ip: IpAddr,
    source_port: u16,
    destination_port: u16,
    tag: String,
    user_data: Vec<u8>,
}

impl fmt::Display for ChunkUdp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} chunk {} {} => {}",
            self.network(),
            self.tag(),
            self.source_addr(),
            self.destination_addr(),
        )
    }
}

impl Chunk for ChunkUdp {
    fn set_timestamp(&mut self) -> SystemTime {
        self.timestamp = SystemTime::now();
        self.timestamp
    }

    fn get_timestamp(&self) -> SystemTime {
        self.timestamp
    }

    fn get_destination_ip(&self) -> IpAddr {
        self.destination_ip
    }

    fn get_source_ip(&self) -> IpAddr {
        self.source_ip
    }

    fn source_addr(&self) -> SocketAddr {
        SocketAddr::new(self.source_ip, self.source_port)
    }

    fn destination_addr(&self) -> SocketAddr {
        SocketAddr::new(self.destination_ip, self.destination_port)
    }

    fn user_data(&self) -> Vec<u8> {
        self.user_data.clone()
    }

    fn tag(&self) -> &str {
        &self.tag
    }

    fn clone_to(&self) -> Box<dyn Chunk> {
        Box::new(ChunkUdp {
            timestamp: self.timestamp,
            source_ip: self.source_ip,
            destination_ip: self.destination_ip,
            source_port: self.source_port,
            destination_port: self.destination_port,
            tag: self.tag.clone(),
            user_data: self.user_data.clone(),
        })
    }

    fn network(&self) -> &'static str {
        UDP_STR
    }

    fn set_source_addr(&mut self, address: &str) -> Result<(), Error> {
        let addr = SocketAddr::from_str(address)?;
        self.source_ip = addr.ip();
        self.source_port = addr.port();
        Ok(())
    }

    fn set_destination_addr(&mut self, address: &str) -> Result<(), Error> {
        let addr = SocketAddr::from_str(address)?;
        self.destination_ip = addr.ip();
        self.destination_port = addr.port();
        Ok(())
    }
}

impl ChunkUdp {
    pub(crate) fn new(src_addr: SocketAddr, dst_addr: SocketAddr, user_data: Vec<u8>) -> Self {
        ChunkUdp {
            timestamp: SystemTime::now(),
            source_ip: src_addr.ip(),
            destination_ip: dst_addr.ip(),
            source_port: src_addr.port(),
            destination_port: dst_addr.port(),
            tag: assign_chunk_tag(),
            user_data,
        }
    }
}

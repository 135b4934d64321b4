
use crate::error::Error;

use ipnet::IpNet;
use std::net::SocketAddr;
use std::str::FromStr;

bitflags::bitflags! {
    /// Mirrors the handful of `net.Flags` bits the simulator cares about.
    pub struct Flags: u32 {
        const UP             = 0b0000_0001;
        const LOOPBACK       = 0b0000_0010;
        const MULTICAST      = 0b0000_0100;
        const BROADCAST      = 0b0000_1000;
        const POINT_TO_POINT = 0b0001_0000;
    }
}

/// A 6-byte hardware (MAC) address. `None` for loopback interfaces.
pub type HardwareAddr = [u8; 6];

/// A named virtual NIC: an index, an MTU, a flag set, an optional hardware
/// address, and the list of IP/mask pairs currently assigned to it.
#[derive(Debug, Clone)]
pub struct Interface {
    pub(crate) name: String,
    pub(crate) index: u32,
    pub(crate) mtu: u32,
    pub(crate) hardware_addr: Option<HardwareAddr>,
    pub(crate) flags: Flags,
    pub(crate) addrs: Vec<IpNet>,
}

impl Interface {
    pub(crate) fn new(
        name: String,
        index: u32,
        mtu: u32,
        hardware_addr: Option<HardwareAddr>,
        flags: Flags,
    ) -> Self {
        Interface {
            name,
            index,
            mtu,
            hardware_addr,
            flags,
            addrs: vec![],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn mtu(&self) -> u32 {
        self.mtu
    }

    pub fn hardware_addr(&self) -> Option<HardwareAddr> {
        self.hardware_addr
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub fn addrs(&self) -> &[IpNet] {
        &self.addrs
    }

    pub(crate) fn add_addr(&mut self, addr: IpNet) {
        self.addrs.push(addr);
    }

    /// Turns a `SocketAddr` plus an optional mask (itself encoded as a
    /// `SocketAddr` whose IP is the netmask) into an `IpNet`. A missing mask
    /// means host-only (`/32` or `/128`).
    pub(crate) fn convert(addr: SocketAddr, mask: Option<SocketAddr>) -> Result<IpNet, Error> {
        let prefix = if let Some(mask) = mask {
            match (addr, mask) {
                (SocketAddr::V4(_), SocketAddr::V4(mask)) => count_mask_bits(&mask.ip().octets()),
                (SocketAddr::V6(_), SocketAddr::V6(mask)) => count_mask_bits(&mask.ip().octets()),
                _ => return Err(Error::ErrInvalidMask),
            }
        } else if addr.is_ipv4() {
            32
        } else {
            128
        };

        Ok(IpNet::from_str(&format!("{}/{}", addr.ip(), prefix))?)
    }
}

fn count_mask_bits(octets: &[u8]) -> u8 {
    octets.iter().map(|o| o.count_ones() as u8).sum()
}

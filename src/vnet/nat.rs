#[cfg(test)]
mod nat_test;

use crate::error::Error;
use crate::vnet::chunk::{Chunk, UDP_STR};

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::ops::Add;
use std::time::SystemTime;
use tokio::time::Duration;

const DEFAULT_NAT_MAPPING_LIFE_TIME: Duration = Duration::from_secs(30);

/// A type of behavioral dependency on the remote endpoint's address or port,
/// used for both port-mapping and filtering behavior (RFC 4787).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EndpointDependencyType {
    EndpointIndependent,
    EndpointAddrDependent,
    EndpointAddrPortDependent,
}

impl Default for EndpointDependencyType {
    fn default() -> Self {
        EndpointDependencyType::EndpointIndependent
    }
}

/// The basic behavior of a [`NetworkAddressTranslator`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NATMode {
    /// Standard NAPT (RFC 2663).
    Normal,
    /// 1:1 DNAT: the external IP is statically mapped to a specific local IP
    /// with the port preserved. When selected, `mapping_behavior`,
    /// `filtering_behavior`, `port_preservation` and `mapping_life_time` are
    /// ignored.
    NAT1To1,
}

impl Default for NATMode {
    fn default() -> Self {
        NATMode::Normal
    }
}

/// The parameters that define a NAT's behavior. Carried end to end as an
/// opaque extension point; this crate's router does not currently translate
/// through it (see `vnet::router`).
#[derive(Default, Debug, Copy, Clone)]
pub struct NATType {
    pub mode: NATMode,
    pub mapping_behavior: EndpointDependencyType,
    pub filtering_behavior: EndpointDependencyType,
    pub hair_pining: bool,
    pub port_preservation: bool,
    pub mapping_life_time: Duration,
}

#[derive(Default, Debug, Clone)]
pub(crate) struct NatConfig {
    pub(crate) name: String,
    pub(crate) nat_type: NATType,
    pub(crate) mapped_ips: Vec<IpAddr>,
    pub(crate) local_ips: Vec<IpAddr>,
}

#[derive(Debug, Clone)]
struct Mapping {
    proto: String,
    local: String,
    mapped: String,
    bound: String,
    filters: HashSet<String>,
    expires: SystemTime,
}

impl Default for Mapping {
    fn default() -> Self {
        Mapping {
            proto: String::new(),
            local: String::new(),
            mapped: String::new(),
            bound: String::new(),
            filters: HashSet::new(),
            expires: SystemTime::now(),
        }
    }
}

/// Translates chunks between a local address space and a mapped (external)
/// one, either via NAPT port mapping or static 1:1 address mapping.
#[derive(Default, Debug, Clone)]
pub(crate) struct NetworkAddressTranslator {
    name: String,
    nat_type: NATType,
    mapped_ips: Vec<IpAddr>,
    local_ips: Vec<IpAddr>,
    outbound_map: HashMap<String, Mapping>,
    inbound_map: HashMap<String, Mapping>,
    udp_port_counter: u16,
}

impl NetworkAddressTranslator {
    pub(crate) fn new(config: NatConfig) -> Result<Self, Error> {
        let mut nat_type = config.nat_type;

        if nat_type.mode == NATMode::NAT1To1 {
            nat_type.mapping_behavior = EndpointDependencyType::EndpointIndependent;
            nat_type.filtering_behavior = EndpointDependencyType::EndpointIndependent;
            nat_type.port_preservation = true;
            nat_type.mapping_life_time = Duration::from_secs(0);

            if config.mapped_ips.is_empty() {
                return Err(Error::ErrNatRequiresMapping);
            }
            if config.mapped_ips.len() != config.local_ips.len() {
                return Err(Error::ErrMismatchLengthIp);
            }
        } else {
            nat_type.mode = NATMode::Normal;
            if nat_type.mapping_life_time == Duration::from_secs(0) {
                nat_type.mapping_life_time = DEFAULT_NAT_MAPPING_LIFE_TIME;
            }
        }

        Ok(NetworkAddressTranslator {
            name: config.name,
            nat_type,
            mapped_ips: config.mapped_ips,
            local_ips: config.local_ips,
            outbound_map: HashMap::new(),
            inbound_map: HashMap::new(),
            udp_port_counter: 0,
        })
    }

    pub(crate) fn get_paired_mapped_ip(&self, loc_ip: &IpAddr) -> Option<&IpAddr> {
        for (i, ip) in self.local_ips.iter().enumerate() {
            if ip == loc_ip {
                return self.mapped_ips.get(i);
            }
        }
        None
    }

    pub(crate) fn get_paired_local_ip(&self, mapped_ip: &IpAddr) -> Option<&IpAddr> {
        for (i, ip) in self.mapped_ips.iter().enumerate() {
            if ip == mapped_ip {
                return self.local_ips.get(i);
            }
        }
        None
    }

    pub(crate) fn translate_outbound(
        &mut self,
        from: &dyn Chunk,
    ) -> Result<Option<Box<dyn Chunk>>, Error> {
        let mut to = from.clone_to();

        if from.network() != UDP_STR {
            return Err(Error::ErrNonUdpTranslationNotSupported);
        }

        if self.nat_type.mode == NATMode::NAT1To1 {
            let src_addr = from.source_addr();
            if let Some(src_ip) = self.get_paired_mapped_ip(&src_addr.ip()) {
                to.set_source_addr(&format!("{}:{}", src_ip, src_addr.port()))?;
            } else {
                log::debug!("[{}] drop outbound chunk {} with no route", self.name, from);
                return Ok(None);
            }
        } else {
            let bound = match self.nat_type.mapping_behavior {
                EndpointDependencyType::EndpointIndependent => "".to_owned(),
                EndpointDependencyType::EndpointAddrDependent => {
                    from.get_destination_ip().to_string()
                }
                EndpointDependencyType::EndpointAddrPortDependent => {
                    from.destination_addr().to_string()
                }
            };

            let filter_key = match self.nat_type.filtering_behavior {
                EndpointDependencyType::EndpointIndependent => "".to_owned(),
                EndpointDependencyType::EndpointAddrDependent => {
                    from.get_destination_ip().to_string()
                }
                EndpointDependencyType::EndpointAddrPortDependent => {
                    from.destination_addr().to_string()
                }
            };

            let o_key = format!("udp:{}:{}", from.source_addr(), bound);
            let name = self.name.clone();

            let m_mapped = if let Some(m) = self.find_outbound_mapping(&o_key) {
                if !m.filters.contains(&filter_key) {
                    log::debug!(
                        "[{}] permit access from {} to {}",
                        name,
                        filter_key,
                        m.mapped
                    );
                    m.filters.insert(filter_key);
                }
                m.mapped.clone()
            } else {
                let mapped_port = 0xC000 + self.udp_port_counter;
                if self.udp_port_counter == 0xFFFF - 0xC000 {
                    self.udp_port_counter = 0;
                } else {
                    self.udp_port_counter += 1;
                }

                let mut m = if let Some(mapped_ips_first) = self.mapped_ips.first() {
                    Mapping {
                        proto: "udp".to_owned(),
                        local: from.source_addr().to_string(),
                        bound,
                        mapped: format!("{}:{}", mapped_ips_first, mapped_port),
                        filters: HashSet::new(),
                        expires: SystemTime::now().add(self.nat_type.mapping_life_time),
                    }
                } else {
                    return Err(Error::ErrNatRequiresMapping);
                };

                self.outbound_map.insert(o_key.clone(), m.clone());

                let i_key = format!("udp:{}", m.mapped);

                log::debug!(
                    "[{}] created a new NAT binding oKey={} i_key={}",
                    self.name,
                    o_key,
                    i_key
                );
                log::debug!(
                    "[{}] permit access from {} to {}",
                    self.name,
                    filter_key,
                    m.mapped
                );

                m.filters.insert(filter_key);

                let m_mapped = m.mapped.clone();
                self.inbound_map.insert(i_key, m);
                m_mapped
            };

            to.set_source_addr(&m_mapped)?;
        }

        log::debug!(
            "[{}] translate outbound chunk from {} to {}",
            self.name,
            from,
            to
        );

        Ok(Some(to))
    }

    pub(crate) fn translate_inbound(
        &mut self,
        from: &dyn Chunk,
    ) -> Result<Option<Box<dyn Chunk>>, Error> {
        let mut to = from.clone_to();

        if from.network() != UDP_STR {
            return Err(Error::ErrNonUdpTranslationNotSupported);
        }

        if self.nat_type.mode == NATMode::NAT1To1 {
            let dst_addr = from.destination_addr();
            if let Some(dst_ip) = self.get_paired_local_ip(&dst_addr.ip()) {
                let dst_port = dst_addr.port();
                to.set_destination_addr(&format!("{}:{}", dst_ip, dst_port))?;
            } else {
                return Err(Error::ErrNoAssociatedLocalAddress);
            }
        } else {
            let filter_key = match self.nat_type.filtering_behavior {
                EndpointDependencyType::EndpointIndependent => "".to_owned(),
                EndpointDependencyType::EndpointAddrDependent => from.get_source_ip().to_string(),
                EndpointDependencyType::EndpointAddrPortDependent => {
                    from.source_addr().to_string()
                }
            };

            let i_key = format!("udp:{}", from.destination_addr());
            if let Some(m) = self.find_inbound_mapping(&i_key) {
                if !m.filters.contains(&filter_key) {
                    return Err(Error::ErrHasNoPermission);
                }
                to.set_destination_addr(&m.local)?;
            } else {
                return Err(Error::ErrNoNatBindingFound);
            }
        }

        log::debug!(
            "[{}] translate inbound chunk from {} to {}",
            self.name,
            from,
            to
        );

        Ok(Some(to))
    }

    pub(crate) fn find_outbound_mapping(&mut self, o_key: &str) -> Option<&mut Mapping> {
        let mapping_life_time = self.nat_type.mapping_life_time;
        let mut expired = false;
        let (in_key, out_key) = if let Some(m) = self.outbound_map.get_mut(o_key) {
            let now = SystemTime::now();

            if now.duration_since(m.expires).is_ok() {
                expired = true;
            } else {
                m.expires = now.add(mapping_life_time);
            }
            (
                NetworkAddressTranslator::get_inbound_map_key(m),
                NetworkAddressTranslator::get_outbound_map_key(m),
            )
        } else {
            (String::new(), String::new())
        };

        if expired {
            self.inbound_map.remove(&in_key);
            self.outbound_map.remove(&out_key);
        }

        self.outbound_map.get_mut(o_key)
    }

    pub(crate) fn find_inbound_mapping(&mut self, i_key: &str) -> Option<&Mapping> {
        let mut expired = false;
        let (in_key, out_key) = if let Some(m) = self.inbound_map.get(i_key) {
            let now = SystemTime::now();

            if now.duration_since(m.expires).is_ok() {
                expired = true;
            }
            (
                NetworkAddressTranslator::get_inbound_map_key(m),
                NetworkAddressTranslator::get_outbound_map_key(m),
            )
        } else {
            (String::new(), String::new())
        };

        if expired {
            self.inbound_map.remove(&in_key);
            self.outbound_map.remove(&out_key);
        }

        self.inbound_map.get(i_key)
    }

    fn get_outbound_map_key(m: &Mapping) -> String {
        format!("{}:{}:{}", m.proto, m.local, m.bound)
    }

    fn get_inbound_map_key(m: &Mapping) -> String {
        format!("{}:{}", m.proto, m.mapped)
    }
}

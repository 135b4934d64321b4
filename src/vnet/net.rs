
use crate::conn::{lookup_host, Conn};
use crate::error::Error;
use crate::vnet::chunk::{Chunk, UDP_STR};
use crate::vnet::conn::{ConnObserver, UdpConn};
use crate::vnet::conn_map::UdpConnMap;
use crate::vnet::interface::{Flags, HardwareAddr, Interface};
use crate::vnet::router::{Router, NIC};

use async_trait::async_trait;
use ipnet::IpNet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;

pub(crate) const LO0_STR: &str = "lo0";
pub(crate) const ETH0_STR: &str = "eth0";

const EPHEMERAL_PORT_START: u16 = 5000;
const EPHEMERAL_PORT_END: u16 = 5999;

static MAC_ADDR_COUNTER: AtomicU64 = AtomicU64::new(0xBEEF_ED91_0200);

/// Hands out a fresh locally-administered MAC for every virtual `eth0`, so
/// two Nets in the same process never collide.
pub(crate) fn new_mac_address() -> HardwareAddr {
    let b = MAC_ADDR_COUNTER.fetch_add(1, Ordering::SeqCst).to_be_bytes();
    let mut mac = [0u8; 6];
    mac.copy_from_slice(&b[2..]);
    mac
}

/// Configuration passed to [`Net::new`]. An array of static IPs assigned to
/// `eth0` once this Net is attached to a router; if empty, the router
/// allocates the next free address in its CIDR instead.
#[derive(Default, Clone)]
pub struct NetConfig {
    pub static_ips: Vec<String>,
}

/// The virtual network stack owned by a [`Net`] in virtual mode: its
/// interfaces, live UDP bindings, and (once attached) a link to its parent
/// router. Reachable through two different `Arc` coercions of the same
/// `Arc<Mutex<VNet>>`: as `Arc<Mutex<dyn NIC>>` for the router's attached-NIC
/// table, and as `Arc<dyn ConnObserver>` for every [`UdpConn`] bound on it.
pub(crate) struct VNet {
    interfaces: Vec<Interface>,
    static_ips: Vec<IpAddr>,
    router: Mutex<Option<Arc<Mutex<Router>>>>,
    udp_conns: UdpConnMap,
}

impl VNet {
    fn get_interfaces(&self) -> &[Interface] {
        &self.interfaces
    }

    /// True iff `ip` is assigned to some interface. `0.0.0.0`/`::` count as
    /// true when this Net has any address of the matching family, matching
    /// the "any family member" semantics `ListenPacket("0.0.0.0:0")` needs.
    fn has_ip_addr(&self, ip: IpAddr) -> bool {
        for ifc in &self.interfaces {
            for addr in ifc.addrs() {
                let a = addr.addr();
                match ip {
                    IpAddr::V4(v4) if v4.is_unspecified() => {
                        if a.is_ipv4() {
                            return true;
                        }
                    }
                    IpAddr::V6(v6) if v6.is_unspecified() => {
                        if a.is_ipv6() {
                            return true;
                        }
                    }
                    _ => {
                        if a == ip {
                            return true;
                        }
                    }
                }
            }
        }
        false
    }

    fn get_all_ip_addrs(&self, ipv6: bool) -> Vec<IpAddr> {
        let mut ips = vec![];
        for ifc in &self.interfaces {
            for addr in ifc.addrs() {
                let a = addr.addr();
                if (ipv6 && a.is_ipv6()) || (!ipv6 && a.is_ipv4()) {
                    ips.push(a);
                }
            }
        }
        ips
    }

    /// Checks that `ip` (or, if unspecified, every address of its family) is
    /// free on `port`. Used both to validate an explicit bind port and to
    /// probe candidates while scanning the ephemeral range.
    async fn allocate_local_addr(&self, ip: IpAddr, port: u16) -> Result<(), Error> {
        let ips = if ip.is_unspecified() {
            self.get_all_ip_addrs(matches!(ip, IpAddr::V6(_)))
        } else if self.has_ip_addr(ip) {
            vec![ip]
        } else {
            vec![]
        };

        if ips.is_empty() {
            return Err(Error::ErrCantAssignRequestedAddr);
        }

        for candidate in ips {
            if self
                .udp_conns
                .find(&SocketAddr::new(candidate, port))
                .await
                .is_some()
            {
                return Err(Error::ErrAddressAlreadyInUse);
            }
        }

        Ok(())
    }

    /// Scans `[start, end]` starting from a random offset for a free port on
    /// `ip`. Order is unspecified but exhaustive, per the port allocator's
    /// contract.
    async fn assign_port(&self, ip: IpAddr, start: u16, end: u16) -> Result<u16, Error> {
        if end < start {
            return Err(Error::ErrEndPortLessThanStart);
        }

        let space = u32::from(end - start) + 1;
        let offset = rand::random::<u32>() % space;
        for i in 0..space {
            let port = u16::try_from(((offset + i) % space) + u32::from(start))
                .map_err(|_| Error::ErrPortSpaceExhausted)?;
            if self.allocate_local_addr(ip, port).await.is_ok() {
                return Ok(port);
            }
        }

        Err(Error::ErrPortSpaceExhausted)
    }

    async fn router_handle(&self) -> Option<Arc<Mutex<Router>>> {
        self.router.lock().await.clone()
    }

    /// Binds a [`UdpConn`], resolving a zero port via the ephemeral
    /// allocator and validating an explicit one, then registers it. Shared
    /// by both `Net::bind` (listen-style) and `Net::dial` (connect-style,
    /// where `rem_addr` is already known).
    async fn bind_locked(
        &self,
        mut loc_addr: SocketAddr,
        rem_addr: Option<SocketAddr>,
        vnet: &Arc<Mutex<VNet>>,
    ) -> Result<Arc<UdpConn>, Error> {
        if loc_addr.port() == 0 {
            let port = self
                .assign_port(loc_addr.ip(), EPHEMERAL_PORT_START, EPHEMERAL_PORT_END)
                .await?;
            loc_addr.set_port(port);
        } else {
            self.allocate_local_addr(loc_addr.ip(), loc_addr.port())
                .await?;
        }

        let obs = Arc::clone(vnet) as Arc<dyn ConnObserver + Send + Sync>;
        let conn = Arc::new(UdpConn::new(loc_addr, rem_addr, obs));
        self.udp_conns.insert(Arc::clone(&conn)).await?;
        Ok(conn)
    }

    async fn determine_src_ip(&self, loc_ip: IpAddr, dst_ip: IpAddr) -> Option<IpAddr> {
        if !loc_ip.is_unspecified() {
            return Some(loc_ip);
        }

        if dst_ip.is_loopback() {
            return Some(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)));
        }

        self.get_interface(ETH0_STR)
            .and_then(|ifc| ifc.addrs().first())
            .map(|net| net.addr())
    }

    async fn write_chunk(&self, c: Box<dyn Chunk>) -> Result<(), Error> {
        if c.get_destination_ip().is_loopback() {
            if let Some(conn) = self.udp_conns.find(&c.destination_addr()).await {
                if let Some(tx) = conn.inbound_sender() {
                    let _ = tx.try_send(c);
                }
            }
            return Ok(());
        }

        match self.router_handle().await {
            Some(router) => {
                router.lock().await.push(c).await;
                Ok(())
            }
            None => Err(Error::ErrNoRouterLinked),
        }
    }

    async fn handle_close(&self, loc_addr: SocketAddr) {
        let _ = self.udp_conns.delete(&loc_addr).await;
    }
}

#[async_trait]
impl NIC for VNet {
    fn get_interface(&self, ifc_name: &str) -> Option<&Interface> {
        self.interfaces.iter().find(|ifc| ifc.name() == ifc_name)
    }

    async fn add_addrs_to_interface(
        &mut self,
        ifc_name: &str,
        addrs: &[IpNet],
    ) -> Result<(), Error> {
        for ifc in &mut self.interfaces {
            if ifc.name() == ifc_name {
                for addr in addrs {
                    ifc.add_addr(*addr);
                }
                return Ok(());
            }
        }

        Err(Error::ErrNotFound(ifc_name.to_owned()))
    }

    async fn on_inbound_chunk(&self, c: Box<dyn Chunk>) {
        if c.network() == UDP_STR {
            if let Some(conn) = self.udp_conns.find(&c.destination_addr()).await {
                if let Some(tx) = conn.inbound_sender() {
                    let _ = tx.try_send(c);
                }
            }
        }
    }

    fn get_static_ips(&self) -> &[IpAddr] {
        &self.static_ips
    }

    async fn set_router(&self, r: Arc<Mutex<Router>>) -> Result<(), Error> {
        let mut router = self.router.lock().await;
        *router = Some(r);
        Ok(())
    }
}

/// Glues [`VNet`]'s inherent, already-locked methods to the [`ConnObserver`]
/// surface each [`UdpConn`] holds. Implemented on the `Mutex` itself (legal:
/// `ConnObserver` is a local trait) so `Arc<Mutex<VNet>>` can be handed to a
/// conn directly and coerced to `Arc<dyn ConnObserver + Send + Sync>`.
#[async_trait]
impl ConnObserver for Mutex<VNet> {
    async fn write(&self, c: Box<dyn Chunk>) -> Result<(), Error> {
        self.lock().await.write_chunk(c).await
    }

    async fn determine_source_ip(&self, loc_ip: IpAddr, dst_ip: IpAddr) -> Option<IpAddr> {
        self.lock().await.determine_src_ip(loc_ip, dst_ip).await
    }

    async fn on_close(&self, loc_addr: SocketAddr) {
        self.lock().await.handle_close(loc_addr).await
    }
}

/// A virtual host-network-compatible endpoint: interfaces, address
/// resolution, and UDP listen/dial. Constructed with `Some(NetConfig)` for
/// the simulator, or `None` to delegate every operation straight to the
/// host's real networking (native mode).
pub struct Net {
    ifs: Vec<Interface>,
    v: Option<Arc<Mutex<VNet>>>,
}

impl Net {
    /// Creates a Net. `None` selects native mode; every operation below then
    /// delegates to `tokio::net::UdpSocket` and a best-effort discovery of
    /// the host's default outbound interface. `Some(config)` builds the
    /// simulator's two default interfaces: `lo0` with `127.0.0.1/8`, and a
    /// bare `eth0` that gets its address only once attached to a
    /// [`Router`](crate::Router).
    pub fn new(config: Option<NetConfig>) -> Self {
        let config = match config {
            Some(c) => c,
            None => return Net {
                ifs: discover_native_interfaces(),
                v: None,
            },
        };

        let mut lo0 = Interface::new(
            LO0_STR.to_owned(),
            1,
            16384,
            None,
            Flags::UP | Flags::LOOPBACK | Flags::MULTICAST,
        );
        if let Ok(ipnet) = Interface::convert(
            SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 0),
            Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::new(255, 0, 0, 0)), 0)),
        ) {
            lo0.add_addr(ipnet);
        }

        let eth0 = Interface::new(
            ETH0_STR.to_owned(),
            2,
            1500,
            Some(new_mac_address()),
            Flags::UP | Flags::MULTICAST,
        );

        let static_ips = config
            .static_ips
            .iter()
            .filter_map(|s| IpAddr::from_str(s).ok())
            .collect();

        let vnet = VNet {
            interfaces: vec![lo0, eth0],
            static_ips,
            router: Mutex::new(None),
            udp_conns: UdpConnMap::new(),
        };

        Net {
            ifs: vec![],
            v: Some(Arc::new(Mutex::new(vnet))),
        }
    }

    /// True when this Net is backed by the simulator, false in native mode.
    pub fn is_virtual(&self) -> bool {
        self.v.is_some()
    }

    /// The NIC handle a [`Router`](crate::Router) attaches via `add_net`, or
    /// that a parent router's resolver is wired through via `set_router`.
    /// Fails in native mode, which has nothing for a router to attach to.
    pub fn get_nic(&self) -> Result<Arc<Mutex<dyn NIC + Send + Sync>>, Error> {
        match &self.v {
            Some(v) => Ok(Arc::clone(v) as Arc<Mutex<dyn NIC + Send + Sync>>),
            None => Err(Error::ErrVnetDisabled),
        }
    }

    /// This Net's interfaces: `[lo0, eth0]` in virtual mode (in construction
    /// order), or the discovered host interfaces in native mode.
    pub async fn get_interfaces(&self) -> Vec<Interface> {
        match &self.v {
            Some(v) => v.lock().await.get_interfaces().to_vec(),
            None => self.ifs.clone(),
        }
    }

    pub async fn get_interface(&self, name: &str) -> Option<Interface> {
        self.get_interfaces()
            .await
            .into_iter()
            .find(|i| i.name() == name)
    }

    pub async fn get_static_ips(&self) -> Vec<IpAddr> {
        match &self.v {
            Some(v) => v.lock().await.get_static_ips().to_vec(),
            None => vec![],
        }
    }

    /// Splits `host:port`, resolving `host` via the attached router's
    /// resolver chain if it isn't already an IP literal. In native mode,
    /// delegates to the host's own resolver.
    pub async fn resolve_addr(&self, use_ipv4: bool, address: &str) -> Result<SocketAddr, Error> {
        let v = match &self.v {
            Some(v) => v,
            None => return Ok(lookup_host(use_ipv4, address).await?),
        };

        let (host, port) = split_host_port(address)?;
        if let Ok(ip) = IpAddr::from_str(&host) {
            return Ok(SocketAddr::new(ip, port));
        }

        let router = {
            let vnet = v.lock().await;
            vnet.router_handle().await
        }
        .ok_or(Error::ErrNoRouterLinked)?;

        let resolver = Arc::clone(&router.lock().await.resolver);
        let ip = resolver
            .lock()
            .await
            .lookup(&host)
            .await
            .ok_or_else(|| Error::ErrNotFound(host.clone()))?;

        Ok(SocketAddr::new(ip, port))
    }

    /// `ListenPacket`/`ListenUDP`: binds a local endpoint. A zero port is
    /// replaced by one scanned from the ephemeral range; an unspecified IP
    /// stays unspecified until the first write resolves it lazily.
    pub async fn bind(&self, addr: SocketAddr) -> Result<Arc<dyn Conn + Send + Sync>, Error> {
        match &self.v {
            Some(v) => {
                if !addr.ip().is_unspecified() {
                    let vnet = v.lock().await;
                    if !vnet.has_ip_addr(addr.ip()) {
                        return Err(Error::ErrCantAssignRequestedAddr);
                    }
                }
                let conn = {
                    let vnet = v.lock().await;
                    vnet.bind_locked(addr, None, v).await?
                };
                Ok(conn as Arc<dyn Conn + Send + Sync>)
            }
            None => {
                let socket = UdpSocket::bind(addr).await?;
                Ok(Arc::new(socket) as Arc<dyn Conn + Send + Sync>)
            }
        }
    }

    /// `Dial`: resolves `address` (hostname or literal), determines the
    /// source IP for that destination up front, and returns a connected
    /// conn bound to an ephemeral port on that source IP.
    pub async fn dial(
        &self,
        use_ipv4: bool,
        address: &str,
    ) -> Result<Arc<dyn Conn + Send + Sync>, Error> {
        let remote = self.resolve_addr(use_ipv4, address).await?;

        match &self.v {
            Some(v) => {
                let conn = {
                    let vnet = v.lock().await;
                    let src_ip = vnet
                        .determine_src_ip(IpAddr::V4(Ipv4Addr::UNSPECIFIED), remote.ip())
                        .await
                        .ok_or(Error::ErrNoRoute)?;
                    vnet.bind_locked(SocketAddr::new(src_ip, 0), Some(remote), v)
                        .await?
                };
                Ok(conn as Arc<dyn Conn + Send + Sync>)
            }
            None => {
                let socket = UdpSocket::bind("0.0.0.0:0").await?;
                Conn::connect(&socket, remote).await?;
                Ok(Arc::new(socket) as Arc<dyn Conn + Send + Sync>)
            }
        }
    }
}

fn split_host_port(address: &str) -> Result<(String, u16), Error> {
    let (host, port_str) = address
        .rsplit_once(':')
        .ok_or_else(|| Error::ErrParse(address.to_owned()))?;
    let port: u16 = port_str
        .parse()
        .map_err(|_| Error::ErrInvalidPortNumber)?;
    Ok((host.to_owned(), port))
}

/// Synthesizes a single `Interface` for native mode by "connecting" a UDP
/// socket to a well-known public IP (no traffic sent) and reading back the
/// kernel-chosen local address: the usual portable trick for discovering
/// the default outbound address without raw sockets or platform FFI.
fn discover_native_interfaces() -> Vec<Interface> {
    let mut ifc = Interface::new("default0".to_owned(), 1, 1500, None, Flags::UP);

    if let Ok(sock) = std::net::UdpSocket::bind("0.0.0.0:0") {
        if sock.connect("8.8.8.8:80").is_ok() {
            if let Ok(local) = sock.local_addr() {
                if let Ok(ipnet) = Interface::convert(local, None) {
                    ifc.add_addr(ipnet);
                }
            }
        }
    }

    vec![ifc]
}

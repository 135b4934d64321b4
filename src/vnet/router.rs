
use crate::error::Error;
use crate::vnet::chunk::Chunk;
use crate::vnet::chunk_queue::ChunkQueue;
use crate::vnet::interface::{Flags, Interface};
use crate::vnet::nat::NATType;
use crate::vnet::net::{new_mac_address, ETH0_STR, LO0_STR};
use crate::vnet::resolver::Resolver;

use async_trait::async_trait;
use ipnet::IpNet;
use std::collections::HashMap;
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::ops::{Add, Sub};
use std::pin::Pin;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Duration;

const DEFAULT_ROUTER_QUEUE_SIZE: usize = 1000;

static ROUTER_ID_CTR: AtomicU64 = AtomicU64::new(0);

fn assign_router_name() -> String {
    let n = ROUTER_ID_CTR.fetch_add(1, Ordering::SeqCst);
    format!("router{}", n)
}

/// Configuration passed to [`Router::new`].
#[derive(Default)]
pub struct RouterConfig {
    /// Name of the router. If empty, a unique one is assigned.
    pub name: String,
    /// CIDR notation, e.g. "192.0.2.0/24".
    pub cidr: String,
    /// Static IP addresses to assign to this router's own interfaces.
    pub static_ips: Vec<String>,
    /// Internal forwarding queue capacity. `0` uses the default.
    pub queue_size: usize,
    /// Extension seam for a future NAT-on-uplink feature; carried but not
    /// consulted by the forwarding loop (see `vnet::nat`).
    pub nat_type: Option<NATType>,
    /// Minimum per-chunk forwarding delay.
    pub min_delay: Duration,
    /// Maximum additional random jitter on top of `min_delay`.
    pub max_jitter: Duration,
}

/// A network interface controller a [`Router`] can forward chunks to: either
/// a `Net` or another `Router` being attached as a child segment.
#[async_trait]
pub trait NIC {
    fn get_interface(&self, ifc_name: &str) -> Option<&Interface>;
    async fn add_addrs_to_interface(
        &mut self,
        ifc_name: &str,
        addrs: &[IpNet],
    ) -> Result<(), Error>;
    async fn on_inbound_chunk(&self, c: Box<dyn Chunk>);
    fn get_static_ips(&self) -> &[IpAddr];
    async fn set_router(&self, r: Arc<Mutex<Router>>) -> Result<(), Error>;
}

/// Predicate run against a chunk as it leaves a router's forwarding queue.
/// Returning `false` drops the chunk; later filters then never see it.
pub type ChunkFilterFn = fn(c: &dyn Chunk) -> bool;

#[derive(Default)]
pub(crate) struct RouterInternal {
    nat_type: Option<NATType>,
    ipv4net: IpNet,
    parent: Option<Arc<Mutex<Router>>>,
    nics: HashMap<String, Arc<Mutex<dyn NIC + Send + Sync>>>,
    chunk_filters: Vec<ChunkFilterFn>,
    last_id: u8,
}

/// A CIDR-owning network segment: attaches child Nets and routers, assigns
/// each an IP from its subnet, and runs a forwarding worker that dequeues
/// chunks and either delivers them to the matching attached NIC or hands
/// them up to the parent router.
#[derive(Default)]
pub struct Router {
    name: String,
    ipv4net: IpNet,
    min_delay: Duration,
    max_jitter: Duration,
    queue: Arc<ChunkQueue>,
    interfaces: Vec<Interface>,
    static_ips: Vec<IpAddr>,
    children: Vec<Arc<Mutex<Router>>>,
    done: Option<mpsc::Sender<()>>,
    pub(crate) resolver: Arc<Mutex<Resolver>>,
    push_ch: Option<mpsc::Sender<()>>,
    router_internal: Arc<Mutex<RouterInternal>>,
}

#[async_trait]
impl NIC for Router {
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
        // A child router's own segment is already a distinct, routable CIDR,
        // so a chunk handed down from the parent needs no translation here.
        self.push(c).await;
    }

    fn get_static_ips(&self) -> &[IpAddr] {
        &self.static_ips
    }

    async fn set_router(&self, parent: Arc<Mutex<Router>>) -> Result<(), Error> {
        {
            let mut router_internal = self.router_internal.lock().await;
            router_internal.parent = Some(Arc::clone(&parent));
        }

        let parent_resolver = {
            let p = parent.lock().await;
            Arc::clone(&p.resolver)
        };
        {
            let mut resolver = self.resolver.lock().await;
            resolver.set_parent(parent_resolver);
        }

        Ok(())
    }
}

impl Router {
    pub fn new(config: RouterConfig) -> Result<Self, Error> {
        let ipv4net: IpNet = config.cidr.parse()?;

        let queue_size = if config.queue_size > 0 {
            config.queue_size
        } else {
            DEFAULT_ROUTER_QUEUE_SIZE
        };

        let mut lo0 = Interface::new(
            LO0_STR.to_owned(),
            1,
            16384,
            None,
            Flags::UP | Flags::LOOPBACK | Flags::MULTICAST,
        );
        if let Ok(ipnet) = Interface::convert(
            SocketAddr::new(Ipv4Addr::new(127, 0, 0, 1).into(), 0),
            Some(SocketAddr::new(Ipv4Addr::new(255, 0, 0, 0).into(), 0)),
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

        let resolver = Arc::new(Mutex::new(Resolver::new()));

        let name = if config.name.is_empty() {
            assign_router_name()
        } else {
            config.name.clone()
        };

        let mut static_ips = vec![];
        for ip_str in &config.static_ips {
            if let Ok(ip) = IpAddr::from_str(ip_str) {
                if !ipv4net.contains(&ip) {
                    return Err(Error::ErrStaticIpIsBeyondSubnet);
                }
                static_ips.push(ip);
            }
        }

        let router_internal = RouterInternal {
            nat_type: config.nat_type,
            ipv4net,
            nics: HashMap::new(),
            ..Default::default()
        };

        Ok(Router {
            name,
            ipv4net,
            interfaces: vec![lo0, eth0],
            static_ips,
            resolver,
            router_internal: Arc::new(Mutex::new(router_internal)),
            queue: Arc::new(ChunkQueue::new(queue_size)),
            min_delay: config.min_delay,
            max_jitter: config.max_jitter,
            ..Default::default()
        })
    }

    pub(crate) fn get_interfaces(&self) -> &[Interface] {
        &self.interfaces
    }

    pub fn start(&mut self) -> Pin<Box<dyn Future<Output = Result<(), Error>> + Send>> {
        if self.done.is_some() {
            return Box::pin(async move { Err(Error::ErrRouterAlreadyStarted) });
        }

        let (done_tx, mut done_rx) = mpsc::channel(1);
        let (push_ch_tx, mut push_ch_rx) = mpsc::channel(1);
        self.done = Some(done_tx);
        self.push_ch = Some(push_ch_tx);

        let router_internal = Arc::clone(&self.router_internal);
        let queue = Arc::clone(&self.queue);
        let max_jitter = self.max_jitter;
        let min_delay = self.min_delay;
        let name = self.name.clone();
        let ipv4net = self.ipv4net;

        tokio::spawn(async move {
            while let Ok(d) = Router::process_chunks(
                &name,
                ipv4net,
                max_jitter,
                min_delay,
                &queue,
                &router_internal,
            )
            .await
            {
                if d == Duration::from_secs(0) {
                    tokio::select! {
                     _ = push_ch_rx.recv() => {},
                     _ = done_rx.recv() => break,
                    }
                } else {
                    let t = tokio::time::sleep(d);
                    tokio::pin!(t);

                    tokio::select! {
                    _ = t.as_mut() => {},
                    _ = done_rx.recv() => break,
                    }
                }
            }
        });

        let children = self.children.clone();

        Box::pin(async move {
            let mut failed = false;
            for child in &children {
                let mut c = child.lock().await;
                if c.start().await.is_err() {
                    failed = true;
                }
            }

            if failed {
                Err(Error::ErrRouterAlreadyStarted)
            } else {
                Ok(())
            }
        })
    }

    pub fn stop(&mut self) -> Pin<Box<dyn Future<Output = Result<(), Error>> + Send>> {
        if self.done.is_none() {
            return Box::pin(async move { Err(Error::ErrRouterAlreadyStopped) });
        }

        self.push_ch.take();
        self.done.take();

        let children = self.children.clone();

        Box::pin(async move {
            let mut failed = false;
            for child in &children {
                let mut c = child.lock().await;
                if c.stop().await.is_err() {
                    failed = true;
                }
            }

            if failed {
                Err(Error::ErrRouterAlreadyStopped)
            } else {
                Ok(())
            }
        })
    }

    /// Adds a child router. The caller must also call
    /// `child.lock().await.set_router(parent)` (or use the NIC's own
    /// `set_router` hook) so the child knows its upstream.
    pub async fn add_router(&mut self, child: Arc<Mutex<Router>>) -> Result<(), Error> {
        let nic = Arc::clone(&child) as Arc<Mutex<dyn NIC + Send + Sync>>;
        self.children.push(child);
        self.add_net(nic).await
    }

    /// Attaches a NIC (typically a `Net`) to this router's subnet, assigning
    /// it an IP if it didn't bring a static one.
    pub async fn add_net(&mut self, nic: Arc<Mutex<dyn NIC + Send + Sync>>) -> Result<(), Error> {
        let mut router_internal = self.router_internal.lock().await;
        router_internal.add_nic(nic).await
    }

    pub async fn add_host(&mut self, host_name: String, ip_addr: String) -> Result<(), Error> {
        let mut resolver = self.resolver.lock().await;
        resolver.add_host(host_name, ip_addr)
    }

    /// Registers a filter run against every chunk this router forwards, in
    /// call order; the first to reject a chunk drops it silently.
    pub async fn add_chunk_filter(&self, filter: ChunkFilterFn) {
        let mut router_internal = self.router_internal.lock().await;
        router_internal.chunk_filters.push(filter);
    }

    pub(crate) async fn push(&self, mut c: Box<dyn Chunk>) {
        log::debug!("[{}] route {}", self.name, c);
        if self.done.is_some() {
            c.set_timestamp();

            if self.queue.push(c).await {
                if let Some(push_ch) = &self.push_ch {
                    let _ = push_ch.try_send(());
                }
            } else {
                log::warn!("[{}] queue was full. dropped a chunk", self.name);
            }
        }
    }

    async fn process_chunks(
        name: &str,
        ipv4net: IpNet,
        max_jitter: Duration,
        min_delay: Duration,
        queue: &Arc<ChunkQueue>,
        router_internal: &Arc<Mutex<RouterInternal>>,
    ) -> Result<Duration, Error> {
        let mj = max_jitter.as_nanos() as u64;
        if mj > 0 {
            let jitter = Duration::from_nanos(rand::random::<u64>() % mj);
            tokio::time::sleep(jitter).await;
        }

        let entered_at = SystemTime::now();
        let cut_off = entered_at.sub(min_delay);

        let mut d;

        loop {
            d = Duration::from_secs(0);
            if let Some(c) = queue.peek().await {
                if c.get_timestamp().duration_since(cut_off).is_ok() {
                    let next_expire = c.get_timestamp().add(min_delay);
                    if let Ok(diff) = next_expire.duration_since(entered_at) {
                        d = diff;
                        break;
                    }
                }
            } else {
                break;
            }

            if let Some(c) = queue.pop().await {
                let ri = router_internal.lock().await;
                let mut blocked = false;
                for filter in &ri.chunk_filters {
                    if !filter(&*c) {
                        blocked = true;
                        break;
                    }
                }
                if blocked {
                    continue;
                }

                let dst_ip = c.get_destination_ip();

                if ipv4net.contains(&dst_ip) {
                    if let Some(nic) = ri.nics.get(&dst_ip.to_string()) {
                        let ni = nic.lock().await;
                        ni.on_inbound_chunk(c).await;
                    } else {
                        log::debug!("[{}] {} unreachable", name, c);
                    }
                    continue;
                }

                if let Some(parent) = &ri.parent {
                    let p = parent.lock().await;
                    p.push(c).await;
                } else {
                    log::debug!("[{}] no route found for {}", name, c);
                }
            } else {
                break;
            }
        }

        Ok(d)
    }
}

impl RouterInternal {
    pub(crate) async fn add_nic(
        &mut self,
        nic: Arc<Mutex<dyn NIC + Send + Sync>>,
    ) -> Result<(), Error> {
        let mut ips = {
            let ni = nic.lock().await;
            ni.get_static_ips().to_vec()
        };

        if ips.is_empty() {
            let ip = self.assign_ip_address()?;
            ips.push(ip);
        }

        let mut ipnets = vec![];
        for ip in &ips {
            if !self.ipv4net.contains(ip) {
                return Err(Error::ErrStaticIpIsBeyondSubnet);
            }
            self.nics.insert(ip.to_string(), Arc::clone(&nic));
            ipnets.push(IpNet::from_str(&format!(
                "{}/{}",
                ip,
                self.ipv4net.prefix_len()
            ))?);
        }

        {
            let mut ni = nic.lock().await;
            let _ = ni.add_addrs_to_interface(ETH0_STR, &ipnets).await;
        }

        Ok(())
    }

    /// Assigns the next free address in the subnet: network-address + 1 for
    /// the first attached NIC, +2 for the second, and so on. The router
    /// itself is never addressed on its own subnet.
    fn assign_ip_address(&mut self) -> Result<IpAddr, Error> {
        if self.last_id == 0xfe {
            return Err(Error::ErrAddressSpaceExhausted);
        }

        self.last_id += 1;
        match self.ipv4net.addr() {
            IpAddr::V4(ipv4) => {
                let mut ip = ipv4.octets();
                ip[3] = ip[3].wrapping_add(self.last_id);
                Ok(IpAddr::V4(Ipv4Addr::from(ip)))
            }
            IpAddr::V6(ipv6) => {
                let mut ip = ipv6.octets();
                ip[15] = ip[15].wrapping_add(self.last_id);
                Ok(IpAddr::V6(Ipv6Addr::from(ip)))
            }
        }
    }
}

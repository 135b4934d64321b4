pub mod conn_udp;


use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use tokio::net::ToSocketAddrs;

/// Common surface shared by a real `tokio::net::UdpSocket` and the
/// simulator's [`crate::vnet::conn::UdpConn`]. `Net::ListenPacket`/`Dial`
/// hand back a `dyn Conn` so callers can't tell which implementation they
/// got.
#[async_trait]
pub trait Conn {
    async fn connect(&self, addr: SocketAddr) -> io::Result<()>;
    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize>;
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;
    async fn send(&self, buf: &[u8]) -> io::Result<usize>;
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize>;
    fn local_addr(&self) -> io::Result<SocketAddr>;
    fn remote_addr(&self) -> Option<SocketAddr>;
    async fn close(&self) -> io::Result<()>;
}

/// Resolves `host` to a single address of the requested family, used by
/// native-mode `Net::resolve_addr` the same way `net.ResolveUDPAddr` would be
/// used against the host resolver.
pub async fn lookup_host<T>(use_ipv4: bool, host: T) -> io::Result<SocketAddr>
where
    T: ToSocketAddrs,
{
    for remote_addr in tokio::net::lookup_host(host).await? {
        if (use_ipv4 && remote_addr.is_ipv4()) || (!use_ipv4 && remote_addr.is_ipv6()) {
            return Ok(remote_addr);
        }
    }

    Err(io::Error::new(
        io::ErrorKind::Other,
        format!(
            "no available {} address found",
            if use_ipv4 { "ipv4" } else { "ipv6" },
        ),
    ))
}

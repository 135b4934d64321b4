use super::*;

use tokio::net::UdpSocket;

/// `Conn` for the real kernel socket, used when a [`crate::vnet::net::Net`]
/// is constructed in native (non-virtual) mode.
#[async_trait]
impl Conn for UdpSocket {
    async fn connect(&self, addr: SocketAddr) -> io::Result<()> {
        UdpSocket::connect(self, addr).await
    }

    async fn recv(&self, b: &mut [u8]) -> io::Result<usize> {
        UdpSocket::recv(self, b).await
    }

    async fn recv_from(&self, b: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, b).await
    }

    async fn send(&self, b: &[u8]) -> io::Result<usize> {
        UdpSocket::send(self, b).await
    }

    async fn send_to(&self, b: &[u8], target: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, b, target).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        UdpSocket::local_addr(self)
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        UdpSocket::peer_addr(self).ok()
    }

    async fn close(&self) -> io::Result<()> {
        Ok(())
    }
}

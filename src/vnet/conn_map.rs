use crate::conn::Conn;
use crate::error::Error;
use crate::vnet::conn::UdpConn;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;

type PortMap = Mutex<HashMap<u16, Vec<Arc<UdpConn>>>>;

/// Registry of bound [`UdpConn`]s, keyed by local port with a linear scan
/// over same-port entries to honor the unspecified-address wildcard (a conn
/// bound to `0.0.0.0:P` matches any destination IP on port `P`, and can only
/// coexist with other conns on `P` if none of them is itself unspecified).
#[derive(Default)]
pub(crate) struct UdpConnMap {
    port_map: PortMap,
}

impl UdpConnMap {
    pub(crate) fn new() -> Self {
        UdpConnMap {
            port_map: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) async fn insert(&self, conn: Arc<UdpConn>) -> Result<(), Error> {
        let addr = conn.local_addr()?;

        let mut port_map = self.port_map.lock().await;
        if let Some(conns) = port_map.get(&addr.port()) {
            if addr.ip().is_unspecified() {
                return Err(Error::ErrAddressAlreadyInUse);
            }

            for c in conns {
                let laddr = c.local_addr()?;
                if laddr.ip().is_unspecified() || laddr.ip() == addr.ip() {
                    return Err(Error::ErrAddressAlreadyInUse);
                }
            }
        }

        port_map
            .entry(addr.port())
            .or_insert_with(Vec::new)
            .push(conn);
        Ok(())
    }

    pub(crate) async fn find(&self, addr: &SocketAddr) -> Option<Arc<UdpConn>> {
        let port_map = self.port_map.lock().await;
        let conns = port_map.get(&addr.port())?;

        if addr.ip().is_unspecified() {
            return conns.first().map(Arc::clone);
        }

        for c in conns {
            let laddr = c.local_addr().ok()?;
            if laddr.ip().is_unspecified() || laddr.ip() == addr.ip() {
                return Some(Arc::clone(c));
            }
        }

        None
    }

    pub(crate) async fn delete(&self, addr: &SocketAddr) -> Result<(), Error> {
        let mut port_map = self.port_map.lock().await;
        let conns = port_map.get(&addr.port()).ok_or_else(|| {
            Error::ErrNotFound("no udp conn bound to this port".to_owned())
        })?;

        let mut remaining = vec![];
        for c in conns {
            let laddr = c.local_addr()?;
            if laddr.ip().is_unspecified() && !addr.ip().is_unspecified() {
                return Err(Error::ErrAddressAlreadyInUse);
            }
            if laddr.ip() == addr.ip() {
                continue;
            }
            remaining.push(Arc::clone(c));
        }

        if remaining.is_empty() {
            port_map.remove(&addr.port());
        } else {
            port_map.insert(addr.port(), remaining);
        }

        Ok(())
    }

    pub(crate) async fn len(&self) -> usize {
        let port_map = self.port_map.lock().await;
        port_map.values().map(Vec::len).sum()
    }
}


use crate::conn::Conn;
use crate::error::Error;
use crate::vnet::chunk::{Chunk, ChunkUdp};

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

use async_trait::async_trait;

const DEFAULT_UDP_CONN_QUEUE_SIZE: usize = 1024;

/// What a [`UdpConn`] needs from its owning `Net` (implemented by `VNet`):
/// where to send an outbound chunk, and how to resolve an unspecified local
/// address at egress time (§4.5 `determineSourceIP`).
#[async_trait]
pub(crate) trait ConnObserver {
    async fn write(&self, c: Box<dyn Chunk>) -> Result<(), Error>;
    async fn determine_source_ip(&self, loc_ip: IpAddr, dst_ip: IpAddr) -> Option<IpAddr>;
    /// Called once, from `Close()`, so the conn can deregister itself from
    /// the Net's bindings map even while a reader is blocked in `recv_from`.
    async fn on_close(&self, loc_addr: SocketAddr);
}

/// A bound UDP endpoint inside the simulator: owning Net (via `obs`), local
/// and optional connected remote address, bounded inbound queue, and a
/// closed flag. Implements the same [`Conn`] surface a real
/// `tokio::net::UdpSocket` does.
pub(crate) struct UdpConn {
    loc_addr: SocketAddr,
    rem_addr: Mutex<Option<SocketAddr>>,
    // A plain std Mutex: only ever locked for a clone/take, never held
    // across an `.await`, so it can't contend with the tokio mutex guarding
    // `inbound_rx` below. `close()` drops the sender through this instead of
    // closing the receiver directly, so it never has to wait on whatever
    // lock a blocked `recv_from` is holding.
    inbound_tx: std::sync::Mutex<Option<mpsc::Sender<Box<dyn Chunk>>>>,
    inbound_rx: Mutex<mpsc::Receiver<Box<dyn Chunk>>>,
    obs: Arc<dyn ConnObserver + Send + Sync>,
    closed: AtomicBool,
}

impl UdpConn {
    pub(crate) fn new(
        loc_addr: SocketAddr,
        rem_addr: Option<SocketAddr>,
        obs: Arc<dyn ConnObserver + Send + Sync>,
    ) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(DEFAULT_UDP_CONN_QUEUE_SIZE);

        UdpConn {
            loc_addr,
            rem_addr: Mutex::new(rem_addr),
            inbound_tx: std::sync::Mutex::new(Some(inbound_tx)),
            inbound_rx: Mutex::new(inbound_rx),
            obs,
            closed: AtomicBool::new(false),
        }
    }

    /// A sender clone handed to the Net's dispatch path; used by
    /// `on_inbound_chunk` to deliver without blocking its caller. `None` once
    /// closed. Sending into a full channel is a silent drop, matching §4.1.
    pub(crate) fn inbound_sender(&self) -> Option<mpsc::Sender<Box<dyn Chunk>>> {
        self.inbound_tx.lock().unwrap().clone()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Conn for UdpConn {
    async fn connect(&self, addr: SocketAddr) -> io::Result<()> {
        let mut rem_addr = self.rem_addr.lock().await;
        *rem_addr = Some(addr);
        Ok(())
    }

    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        let (n, _) = self.recv_from(buf).await?;
        Ok(n)
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let mut inbound_rx = self.inbound_rx.lock().await;
        while let Some(chunk) = inbound_rx.recv().await {
            let addr = chunk.source_addr();
            {
                let rem_addr = self.rem_addr.lock().await;
                if let Some(rem_addr) = &*rem_addr {
                    if &addr != rem_addr {
                        continue; // not from our connected peer, discard
                    }
                }
            }

            let user_data = chunk.user_data();
            let n = std::cmp::min(buf.len(), user_data.len());
            buf[..n].copy_from_slice(&user_data[..n]);
            return Ok((n, addr));
        }

        Err(io::Error::new(
            io::ErrorKind::ConnectionAborted,
            Error::ErrUseClosedNetworkConn.to_string(),
        ))
    }

    async fn send(&self, buf: &[u8]) -> io::Result<usize> {
        let rem_addr = *self.rem_addr.lock().await;
        match rem_addr {
            Some(rem_addr) => self.send_to(buf, rem_addr).await,
            None => Err(Error::ErrNoRemAddr.into()),
        }
    }

    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        if self.is_closed() {
            return Err(Error::ErrUseClosedNetworkConn.into());
        }

        let src_ip = self
            .obs
            .determine_source_ip(self.loc_addr.ip(), target.ip())
            .await
            .ok_or(Error::ErrNoRoute)?;
        let src_addr = SocketAddr::new(src_ip, self.loc_addr.port());

        let chunk: Box<dyn Chunk> = Box::new(ChunkUdp::new(src_addr, target, buf.to_vec()));
        self.obs.write(chunk).await.map_err(io::Error::from)?;

        Ok(buf.len())
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.loc_addr)
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        // Best-effort snapshot; callers that need the authoritative value
        // should prefer not to race a concurrent `connect()`.
        self.rem_addr.try_lock().ok().and_then(|g| *g)
    }

    async fn close(&self) -> io::Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(Error::ErrAlreadyClosed.into());
        }

        // Dropping the sender (rather than locking and closing the
        // receiver) wakes a reader parked in `recv_from` without waiting on
        // the same lock it's holding across its blocking `.recv().await`.
        self.inbound_tx.lock().unwrap().take();
        self.obs.on_close(self.loc_addr).await;
        Ok(())
    }
}


use crate::error::Error;

use std::collections::HashMap;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Hostname-to-IP mapping consulted during `Net::Dial`. Each router owns one
/// and links it to its parent's resolver at attach time, so a lookup that
/// misses locally walks up the router chain.
pub(crate) struct Resolver {
    parent: Option<Arc<Mutex<Resolver>>>,
    hosts: HashMap<String, IpAddr>,
}

impl Resolver {
    pub(crate) fn new() -> Self {
        let mut r = Resolver {
            parent: None,
            hosts: HashMap::new(),
        };

        if let Err(err) = r.add_host("localhost".to_owned(), "127.0.0.1".to_owned()) {
            log::warn!("failed to add localhost to resolver: {}", err);
        }
        r
    }

    pub(crate) fn set_parent(&mut self, p: Arc<Mutex<Resolver>>) {
        self.parent = Some(p);
    }

    pub(crate) fn add_host(&mut self, name: String, ip_addr: String) -> Result<(), Error> {
        if name.is_empty() {
            return Err(Error::ErrHostnameEmpty);
        }
        let ip = IpAddr::from_str(&ip_addr)?;
        self.hosts.insert(name, ip);

        Ok(())
    }

    pub(crate) async fn lookup(&self, host_name: &str) -> Option<IpAddr> {
        if let Some(ip) = self.hosts.get(host_name) {
            return Some(*ip);
        }

        // Walk the parent chain one lock at a time instead of recursing, so
        // we never hold more than one resolver's lock at once.
        let mut cur = self.parent.clone();
        while let Some(p) = cur {
            let guard = p.lock().await;
            if let Some(ip) = guard.hosts.get(host_name) {
                return Some(*ip);
            }
            cur = guard.parent.clone();
        }

        None
    }
}

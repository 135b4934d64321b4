#![warn(rust_2018_idioms)]
#![allow(dead_code)]

pub mod conn;
pub mod error;
pub mod vnet;

pub use crate::conn::Conn;
pub use crate::error::Error;
pub use crate::vnet::net::{Net, NetConfig};
pub use crate::vnet::router::{Router, RouterConfig};

//! Client for the VXI-11 TCP/IP Instrument Protocol (VXIbus Consortium,
//! Rev 1.0, 1995): Ethernet test-and-measurement instruments and LAN/GPIB
//! gateways, addressed through ONC-RPC over TCP.
//!
//! One [`client::Session`] speaks to one instrument. Commands are opaque
//! byte strings (typically SCPI); GPIB semantics — END/EOI, trigger, serial
//! poll, service requests, raw bus control — work the same against native
//! LXI devices and gateways.
//!
//! ```no_run
//! use vxi11_client::client::prelude::*;
//!
//! # async fn demo() -> Result<(), Error> {
//! let session = Session::connect("dmm6500", None).await?;
//! let idn = session.query("*IDN?", 1000).await?;
//! println!("{}", idn);
//! session.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! Service requests invert the transport roles: the instrument calls back
//! into a process-wide [`client::SrqService`] and events are pushed into a
//! per-session channel:
//!
//! ```no_run
//! use std::net::{IpAddr, Ipv4Addr};
//! use vxi11_client::client::prelude::*;
//!
//! # async fn demo(session: &Session) -> Result<(), Error> {
//! let srq = SrqService::start(IpAddr::V4(Ipv4Addr::UNSPECIFIED)).await?;
//! let events = session.enable_srq(&srq, SrqTransport::Tcp).await?;
//! while events.recv().await.is_ok() {
//!     let stb = session.readstb().await?;
//!     println!("service request, status byte {:#04x}", stb);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Diagnostics go through the [`log`] facade; pick a logger in the binary
//! to see them.

pub mod client;
pub mod common;

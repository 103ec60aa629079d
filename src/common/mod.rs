//! Wire-level building blocks: XDR codec, ONC-RPC engine, portmapper and
//! VXI-11 message definitions.
//!
//! Exposed publicly so embedders and test harnesses can speak the protocol
//! directly (mock instruments are built on [`onc_rpc::RpcService`]).

pub mod onc_rpc;
pub mod portmapper;
pub mod vxi11;
pub mod xdr;

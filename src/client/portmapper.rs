//! Portmapper/rpcbind client used to discover the core channel port and to
//! advertise the embedded interrupt service.

use std::io;

use async_std::net::{TcpStream, ToSocketAddrs, UdpSocket};

use crate::common::{
    onc_rpc::prelude::*,
    portmapper::{
        xdr::Mapping, PMAPPROC_GETPORT, PMAPPROC_NULL, PMAPPROC_SET, PMAPPROC_UNSET,
        PORTMAPPER_PROG, PORTMAPPER_VERS,
    },
};

pub mod prelude {
    pub use super::PortMapperClient;
    pub use crate::common::portmapper::{
        xdr::Mapping, PORTMAPPER_PORT, PORTMAPPER_PROG, PORTMAPPER_PROT_TCP, PORTMAPPER_PROT_UDP,
        PORTMAPPER_VERS,
    };
}

pub struct PortMapperClient(RpcClient);

impl PortMapperClient {
    pub async fn connect_tcp(addrs: impl ToSocketAddrs) -> io::Result<Self> {
        let io = TcpStream::connect(addrs).await?;
        Ok(Self(RpcClient::Tcp(StreamRpcClient::new(
            io,
            PORTMAPPER_PROG,
            PORTMAPPER_VERS,
        ))))
    }

    pub async fn connect_udp(addrs: impl ToSocketAddrs) -> io::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(addrs).await?;
        Ok(Self(RpcClient::Udp(UdpRpcClient::new(
            PORTMAPPER_PROG,
            PORTMAPPER_VERS,
            socket,
        ))))
    }

    /// Replace any stale mapping with `mapping`.
    pub async fn register(&mut self, mapping: Mapping) -> Result<(), RpcError> {
        // Unset ignores the port and clears every entry for (prog, vers)
        self.unset(mapping).await?;
        if !self.set(mapping).await? {
            return Err(RpcError::Portmap);
        }
        Ok(())
    }

    pub async fn null(&mut self) -> Result<(), RpcError> {
        self.0.call(PMAPPROC_NULL, ()).await
    }

    pub async fn set(&mut self, mapping: Mapping) -> Result<bool, RpcError> {
        self.0.call(PMAPPROC_SET, mapping).await
    }

    pub async fn unset(&mut self, mapping: Mapping) -> Result<bool, RpcError> {
        self.0.call(PMAPPROC_UNSET, mapping).await
    }

    /// Port the peer has registered for `mapping`, 0 when unregistered.
    pub async fn getport(&mut self, mapping: Mapping) -> Result<u16, RpcError> {
        self.0.call(PMAPPROC_GETPORT, mapping).await
    }
}

//! Minimal ONC-RPC v2 engine: synchronous call/reply clients over TCP record
//! marking or UDP datagrams, plus the service trait used by the embedded
//! interrupt server.

use std::{
    io::{self, Cursor, Error, ErrorKind, Write},
    sync::Arc,
};

use async_std::net::{TcpStream, UdpSocket};
use async_trait::async_trait;
use futures::{AsyncRead, AsyncWrite};

pub mod record;
pub mod xdr;

use self::record::{read_record, write_record};
use self::xdr::{
    AcceptStat, AuthFlavor, AuthStat, MismatchInfo, MsgType, RejectStat, ReplyStat, RpcMessage,
    RPC_VERSION,
};
use crate::common::xdr::prelude::*;

pub mod prelude {
    pub use super::xdr::{AuthStat, MismatchInfo};
    pub use super::{RpcClient, RpcError, RpcService, StreamRpcClient, UdpRpcClient};
}

/// Largest record accepted from a peer before giving up on the channel.
const MAX_RECORD_SIZE: usize = 1024 * 1024;

/// An error which occurred during an RPC call.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// Remote has no such program
    #[error("program unavailable")]
    ProgUnavail,
    /// Remote has the program but not this version
    #[error("program version mismatch (supported {}..={})", .0.low, .0.high)]
    ProgMismatch(MismatchInfo),
    /// Remote program has no such procedure
    #[error("procedure unavailable")]
    ProcUnavail,
    /// Arguments did not deserialize on the remote end
    #[error("garbage arguments")]
    GarbageArgs,
    /// Remote internal error
    #[error("remote system error")]
    SystemErr,
    /// RPC protocol version rejected
    #[error("rpc version mismatch (supported {}..={})", .0.low, .0.high)]
    RpcMismatch(MismatchInfo),
    /// Call rejected by authentication
    #[error("authentication error ({0:?})")]
    AuthError(AuthStat),
    /// Portmapper refused a mapping operation
    #[error("portmapper registration failed")]
    Portmap,
    /// (De-)serialization or socket error on the channel
    #[error("rpc channel i/o: {0}")]
    Io(#[from] Error),
}

/// Decode a reply record, match it against `xid` and extract the results.
fn parse_reply<RET>(record: Vec<u8>, xid: u32) -> Result<RET, RpcError>
where
    RET: XdrDecode + Default,
{
    let mut cursor = Cursor::new(record);
    let mut reply = RpcMessage::default();
    reply.read_xdr(&mut cursor)?;

    if reply.xid != xid {
        return Err(RpcError::Io(Error::new(
            ErrorKind::InvalidData,
            "reply xid does not match call",
        )));
    }

    let body = match reply.mtype {
        MsgType::Reply(body) => body,
        MsgType::Call(_) => {
            return Err(RpcError::Io(Error::new(
                ErrorKind::InvalidData,
                "peer sent a call, expected a reply",
            )))
        }
    };

    match body.stat {
        ReplyStat::Accepted(accepted) => match accepted.stat {
            AcceptStat::Success => {
                let mut ret: RET = Default::default();
                ret.read_xdr(&mut cursor)?;
                Ok(ret)
            }
            AcceptStat::ProgUnavail => Err(RpcError::ProgUnavail),
            AcceptStat::ProgMismatch(info) => Err(RpcError::ProgMismatch(info)),
            AcceptStat::ProcUnavail => Err(RpcError::ProcUnavail),
            AcceptStat::GarbageArgs => Err(RpcError::GarbageArgs),
            AcceptStat::SystemErr => Err(RpcError::SystemErr),
        },
        ReplyStat::Denied(denied) => match denied.stat {
            RejectStat::RpcMismatch(info) => Err(RpcError::RpcMismatch(info)),
            RejectStat::AuthError(stat) => Err(RpcError::AuthError(stat)),
        },
    }
}

/// RPC client for one program/version over a stream transport.
pub struct StreamRpcClient<IO> {
    xid: u32,
    prog: u32,
    vers: u32,
    io: IO,
}

impl<IO> StreamRpcClient<IO> {
    pub fn new(io: IO, prog: u32, vers: u32) -> Self {
        Self {
            xid: 0,
            prog,
            vers,
            io,
        }
    }
}

impl<IO> StreamRpcClient<IO>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    fn encode_call<ARGS>(&mut self, proc: u32, args: ARGS) -> Result<Vec<u8>, RpcError>
    where
        ARGS: XdrEncode,
    {
        self.xid = self.xid.wrapping_add(1);
        let mut cursor = Cursor::new(Vec::new());
        RpcMessage::call(self.xid, self.prog, self.vers, proc).write_xdr(&mut cursor)?;
        args.write_xdr(&mut cursor)?;
        Ok(cursor.into_inner())
    }

    /// Call the null procedure of the program/version.
    pub async fn null(&mut self) -> Result<(), RpcError> {
        self.call(0, ()).await
    }

    /// Call procedure `proc` with `args`, awaiting the decoded result.
    pub async fn call<ARGS, RET>(&mut self, proc: u32, args: ARGS) -> Result<RET, RpcError>
    where
        ARGS: XdrEncode,
        RET: XdrDecode + Default,
    {
        let call = self.encode_call(proc, args)?;
        write_record(&mut self.io, call).await?;

        let record = read_record(&mut self.io, MAX_RECORD_SIZE).await?;
        parse_reply(record, self.xid)
    }

    /// Send a call without waiting for a reply (one-way interrupt style).
    pub async fn call_no_reply<ARGS>(&mut self, proc: u32, args: ARGS) -> Result<(), RpcError>
    where
        ARGS: XdrEncode,
    {
        let call = self.encode_call(proc, args)?;
        write_record(&mut self.io, call).await?;
        Ok(())
    }
}

/// RPC client for one program/version over a connected UDP socket.
pub struct UdpRpcClient {
    xid: u32,
    prog: u32,
    vers: u32,
    socket: UdpSocket,
}

impl UdpRpcClient {
    pub fn new(prog: u32, vers: u32, socket: UdpSocket) -> Self {
        Self {
            xid: 0,
            prog,
            vers,
            socket,
        }
    }

    fn encode_call<ARGS>(&mut self, proc: u32, args: ARGS) -> Result<Vec<u8>, RpcError>
    where
        ARGS: XdrEncode,
    {
        self.xid = self.xid.wrapping_add(1);
        let mut cursor = Cursor::new(Vec::new());
        RpcMessage::call(self.xid, self.prog, self.vers, proc).write_xdr(&mut cursor)?;
        args.write_xdr(&mut cursor)?;
        Ok(cursor.into_inner())
    }

    /// Call the null procedure of the program/version.
    pub async fn null(&mut self) -> Result<(), RpcError> {
        self.call(0, ()).await
    }

    /// Call procedure `proc` with `args`, awaiting the decoded result.
    pub async fn call<ARGS, RET>(&mut self, proc: u32, args: ARGS) -> Result<RET, RpcError>
    where
        ARGS: XdrEncode,
        RET: XdrDecode + Default,
    {
        let call = self.encode_call(proc, args)?;
        self.socket.send(&call).await?;

        let mut buf = vec![0; 8 * 1024];
        let n = self.socket.recv(&mut buf).await?;
        buf.truncate(n);
        parse_reply(buf, self.xid)
    }

    /// Send a call without waiting for a reply.
    pub async fn call_no_reply<ARGS>(&mut self, proc: u32, args: ARGS) -> Result<(), RpcError>
    where
        ARGS: XdrEncode,
    {
        let call = self.encode_call(proc, args)?;
        self.socket.send(&call).await?;
        Ok(())
    }
}

/// Client over either transport, for programs reachable both ways.
pub enum RpcClient {
    Tcp(StreamRpcClient<TcpStream>),
    Udp(UdpRpcClient),
}

impl RpcClient {
    pub async fn call<ARGS, RET>(&mut self, proc: u32, args: ARGS) -> Result<RET, RpcError>
    where
        ARGS: XdrEncode,
        RET: XdrDecode + Default,
    {
        match self {
            RpcClient::Tcp(client) => client.call(proc, args).await,
            RpcClient::Udp(client) => client.call(proc, args).await,
        }
    }

    pub async fn call_no_reply<ARGS>(&mut self, proc: u32, args: ARGS) -> Result<(), RpcError>
    where
        ARGS: XdrEncode,
    {
        match self {
            RpcClient::Tcp(client) => client.call_no_reply(proc, args).await,
            RpcClient::Udp(client) => client.call_no_reply(proc, args).await,
        }
    }
}

/// Dispatch side of the engine: implementors handle decoded calls, the
/// provided methods run the per-connection/per-datagram serve loops.
#[async_trait]
pub trait RpcService {
    /// Handle one call. Arguments are read from `args`, results written to
    /// `ret`; RPC-level failures are returned as the matching [`RpcError`].
    async fn call(
        self: Arc<Self>,
        prog: u32,
        vers: u32,
        proc: u32,
        args: &mut Cursor<Vec<u8>>,
        ret: &mut Cursor<Vec<u8>>,
    ) -> Result<(), RpcError>
    where
        Self: Sync;

    /// Serve call/reply records on a connected TCP stream until it closes.
    async fn serve_tcp_stream(self: Arc<Self>, mut stream: TcpStream) -> io::Result<()>
    where
        Self: Send + Sync + 'static,
    {
        loop {
            let record = read_record(&mut stream, MAX_RECORD_SIZE).await?;
            let reply = self.clone().handle_message(record).await?;
            write_record(&mut stream, reply).await?;
        }
    }

    /// Serve datagrams on a bound UDP socket, replying to each sender.
    /// A datagram that fails to decode is dropped, not fatal.
    async fn serve_udp_socket(self: Arc<Self>, socket: UdpSocket) -> io::Result<()>
    where
        Self: Send + Sync + 'static,
    {
        loop {
            let mut buf = vec![0; 8 * 1024];
            let (n, peer) = socket.recv_from(&mut buf).await?;
            buf.truncate(n);
            match self.clone().handle_message(buf).await {
                Ok(reply) => {
                    socket.send_to(&reply, peer).await?;
                }
                Err(err) => log::debug!("Dropping datagram from {}: {}", peer, err),
            }
        }
    }

    /// Decode one call message, dispatch it, and encode the reply.
    async fn handle_message(self: Arc<Self>, data_in: Vec<u8>) -> io::Result<Vec<u8>>
    where
        Self: Send + Sync + 'static,
    {
        let mut data_in = Cursor::new(data_in);
        let mut ret = Cursor::new(Vec::new());

        let mut msg = RpcMessage::default();
        msg.read_xdr(&mut data_in)?;
        log::trace!("-> {:?}", msg);
        let xid = msg.xid;

        let call = match msg.mtype {
            MsgType::Call(call) => call,
            MsgType::Reply(_) => return Err(ErrorKind::Unsupported.into()),
        };

        let stat = if call.rpc_vers != RPC_VERSION {
            log::debug!("Rejecting rpc version {}", call.rpc_vers);
            ReplyStat::rpc_mismatch(RPC_VERSION, RPC_VERSION)
        } else if call.cred.flavor != AuthFlavor::None {
            log::debug!("Rejecting cred flavor {:?}", call.cred.flavor);
            ReplyStat::auth_error(AuthStat::RejectedCred)
        } else if call.verf.flavor != AuthFlavor::None {
            log::debug!("Rejecting verf flavor {:?}", call.verf.flavor);
            ReplyStat::auth_error(AuthStat::RejectedVerf)
        } else {
            let res = self
                .call(call.prog, call.vers, call.proc, &mut data_in, &mut ret)
                .await;
            let stat = match res {
                Ok(()) => AcceptStat::Success,
                Err(RpcError::ProgUnavail) => AcceptStat::ProgUnavail,
                Err(RpcError::ProgMismatch(info)) => AcceptStat::ProgMismatch(info),
                Err(RpcError::ProcUnavail) => AcceptStat::ProcUnavail,
                Err(RpcError::GarbageArgs) => AcceptStat::GarbageArgs,
                Err(RpcError::Io(err)) => return Err(err),
                Err(_) => AcceptStat::SystemErr,
            };
            ReplyStat::Accepted(xdr::AcceptedReply {
                verf: Default::default(),
                stat,
            })
        };

        let reply = RpcMessage {
            xid,
            mtype: MsgType::Reply(xdr::ReplyBody { stat }),
        };
        log::trace!("<- {:?}", reply);

        let mut data_out = Cursor::new(Vec::new());
        reply.write_xdr(&mut data_out)?;
        data_out.write_all(&ret.into_inner())?;
        Ok(data_out.into_inner())
    }
}

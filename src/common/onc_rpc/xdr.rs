//! ONC-RPC v2 message types, see [RFC5531](https://datatracker.ietf.org/doc/html/rfc5531).
//!
//! Only the `AUTH_NONE` flavor is ever sent; VXI-11 does not authenticate.

use std::io::{ErrorKind, Read, Result, Write};

use crate::common::xdr::prelude::*;

pub const RPC_VERSION: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthFlavor {
    #[default]
    None,
    Sys,
    Short,
}

impl XdrEncode for AuthFlavor {
    fn write_xdr<WR>(&self, writer: &mut WR) -> Result<()>
    where
        WR: Write,
    {
        writer.write_u32::<NetworkEndian>(match self {
            AuthFlavor::None => 0,
            AuthFlavor::Sys => 1,
            AuthFlavor::Short => 2,
        })
    }
}

impl XdrDecode for AuthFlavor {
    fn read_xdr<RD>(&mut self, reader: &mut RD) -> Result<()>
    where
        RD: Read,
    {
        *self = match reader.read_u32::<NetworkEndian>()? {
            0 => Self::None,
            1 => Self::Sys,
            2 => Self::Short,
            _ => return Err(ErrorKind::InvalidData.into()),
        };
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct OpaqueAuth {
    pub flavor: AuthFlavor,
    pub body: Opaque,
}

impl XdrEncode for OpaqueAuth {
    fn write_xdr<WR>(&self, writer: &mut WR) -> Result<()>
    where
        WR: Write,
    {
        self.flavor.write_xdr(writer)?;
        self.body.write_xdr(writer)
    }
}

impl XdrDecode for OpaqueAuth {
    fn read_xdr<RD>(&mut self, reader: &mut RD) -> Result<()>
    where
        RD: Read,
    {
        self.flavor.read_xdr(reader)?;
        self.body.read_xdr(reader)
    }
}

/// Reason an otherwise well-formed call was rejected by authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthStat {
    #[default]
    Ok,
    BadCred,
    RejectedCred,
    BadVerf,
    RejectedVerf,
    TooWeak,
    InvalidResp,
    Failed,
}

impl XdrEncode for AuthStat {
    fn write_xdr<WR>(&self, writer: &mut WR) -> Result<()>
    where
        WR: Write,
    {
        writer.write_u32::<NetworkEndian>(match self {
            AuthStat::Ok => 0,
            AuthStat::BadCred => 1,
            AuthStat::RejectedCred => 2,
            AuthStat::BadVerf => 3,
            AuthStat::RejectedVerf => 4,
            AuthStat::TooWeak => 5,
            AuthStat::InvalidResp => 6,
            AuthStat::Failed => 7,
        })
    }
}

impl XdrDecode for AuthStat {
    fn read_xdr<RD>(&mut self, reader: &mut RD) -> Result<()>
    where
        RD: Read,
    {
        *self = match reader.read_u32::<NetworkEndian>()? {
            0 => Self::Ok,
            1 => Self::BadCred,
            2 => Self::RejectedCred,
            3 => Self::BadVerf,
            4 => Self::RejectedVerf,
            5 => Self::TooWeak,
            6 => Self::InvalidResp,
            7 => Self::Failed,
            _ => return Err(ErrorKind::InvalidData.into()),
        };
        Ok(())
    }
}

/// Lowest and highest version/value the peer would have accepted.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MismatchInfo {
    pub low: u32,
    pub high: u32,
}

impl MismatchInfo {
    pub fn new(low: u32, high: u32) -> Self {
        Self { low, high }
    }
}

impl XdrEncode for MismatchInfo {
    fn write_xdr<WR>(&self, writer: &mut WR) -> Result<()>
    where
        WR: Write,
    {
        self.low.write_xdr(writer)?;
        self.high.write_xdr(writer)
    }
}

impl XdrDecode for MismatchInfo {
    fn read_xdr<RD>(&mut self, reader: &mut RD) -> Result<()>
    where
        RD: Read,
    {
        self.low.read_xdr(reader)?;
        self.high.read_xdr(reader)
    }
}

#[derive(Debug, Default)]
pub struct CallBody {
    pub rpc_vers: u32,
    pub prog: u32,
    pub vers: u32,
    pub proc: u32,
    pub cred: OpaqueAuth,
    pub verf: OpaqueAuth,
    // Procedure arguments follow in the stream
}

impl XdrEncode for CallBody {
    fn write_xdr<WR>(&self, writer: &mut WR) -> Result<()>
    where
        WR: Write,
    {
        self.rpc_vers.write_xdr(writer)?;
        self.prog.write_xdr(writer)?;
        self.vers.write_xdr(writer)?;
        self.proc.write_xdr(writer)?;
        self.cred.write_xdr(writer)?;
        self.verf.write_xdr(writer)
    }
}

impl XdrDecode for CallBody {
    fn read_xdr<RD>(&mut self, reader: &mut RD) -> Result<()>
    where
        RD: Read,
    {
        self.rpc_vers.read_xdr(reader)?;
        self.prog.read_xdr(reader)?;
        self.vers.read_xdr(reader)?;
        self.proc.read_xdr(reader)?;
        self.cred.read_xdr(reader)?;
        self.verf.read_xdr(reader)
    }
}

#[derive(Debug, Default)]
pub enum AcceptStat {
    #[default]
    Success,
    ProgUnavail,
    ProgMismatch(MismatchInfo),
    ProcUnavail,
    GarbageArgs,
    SystemErr,
}

impl XdrEncode for AcceptStat {
    fn write_xdr<WR>(&self, writer: &mut WR) -> Result<()>
    where
        WR: Write,
    {
        writer.write_u32::<NetworkEndian>(match self {
            AcceptStat::Success => 0,
            AcceptStat::ProgUnavail => 1,
            AcceptStat::ProgMismatch(_) => 2,
            AcceptStat::ProcUnavail => 3,
            AcceptStat::GarbageArgs => 4,
            AcceptStat::SystemErr => 5,
        })?;
        if let AcceptStat::ProgMismatch(info) = self {
            info.write_xdr(writer)?;
        }
        Ok(())
    }
}

impl XdrDecode for AcceptStat {
    fn read_xdr<RD>(&mut self, reader: &mut RD) -> Result<()>
    where
        RD: Read,
    {
        *self = match reader.read_u32::<NetworkEndian>()? {
            0 => Self::Success,
            1 => Self::ProgUnavail,
            2 => {
                let mut info = MismatchInfo::default();
                info.read_xdr(reader)?;
                Self::ProgMismatch(info)
            }
            3 => Self::ProcUnavail,
            4 => Self::GarbageArgs,
            5 => Self::SystemErr,
            _ => return Err(ErrorKind::InvalidData.into()),
        };
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct AcceptedReply {
    pub verf: OpaqueAuth,
    pub stat: AcceptStat,
    // Procedure results follow in the stream on Success
}

impl XdrEncode for AcceptedReply {
    fn write_xdr<WR>(&self, writer: &mut WR) -> Result<()>
    where
        WR: Write,
    {
        self.verf.write_xdr(writer)?;
        self.stat.write_xdr(writer)
    }
}

impl XdrDecode for AcceptedReply {
    fn read_xdr<RD>(&mut self, reader: &mut RD) -> Result<()>
    where
        RD: Read,
    {
        self.verf.read_xdr(reader)?;
        self.stat.read_xdr(reader)
    }
}

#[derive(Debug)]
pub enum RejectStat {
    RpcMismatch(MismatchInfo),
    AuthError(AuthStat),
}

impl Default for RejectStat {
    fn default() -> Self {
        Self::RpcMismatch(Default::default())
    }
}

impl XdrEncode for RejectStat {
    fn write_xdr<WR>(&self, writer: &mut WR) -> Result<()>
    where
        WR: Write,
    {
        match self {
            RejectStat::RpcMismatch(info) => {
                writer.write_u32::<NetworkEndian>(0)?;
                info.write_xdr(writer)
            }
            RejectStat::AuthError(stat) => {
                writer.write_u32::<NetworkEndian>(1)?;
                stat.write_xdr(writer)
            }
        }
    }
}

impl XdrDecode for RejectStat {
    fn read_xdr<RD>(&mut self, reader: &mut RD) -> Result<()>
    where
        RD: Read,
    {
        *self = match reader.read_u32::<NetworkEndian>()? {
            0 => {
                let mut info = MismatchInfo::default();
                info.read_xdr(reader)?;
                Self::RpcMismatch(info)
            }
            1 => {
                let mut stat = AuthStat::default();
                stat.read_xdr(reader)?;
                Self::AuthError(stat)
            }
            _ => return Err(ErrorKind::InvalidData.into()),
        };
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RejectedReply {
    pub stat: RejectStat,
}

impl XdrEncode for RejectedReply {
    fn write_xdr<WR>(&self, writer: &mut WR) -> Result<()>
    where
        WR: Write,
    {
        self.stat.write_xdr(writer)
    }
}

impl XdrDecode for RejectedReply {
    fn read_xdr<RD>(&mut self, reader: &mut RD) -> Result<()>
    where
        RD: Read,
    {
        self.stat.read_xdr(reader)
    }
}

#[derive(Debug)]
pub enum ReplyStat {
    Accepted(AcceptedReply),
    Denied(RejectedReply),
}

impl ReplyStat {
    pub fn rpc_mismatch(low: u32, high: u32) -> Self {
        Self::Denied(RejectedReply {
            stat: RejectStat::RpcMismatch(MismatchInfo::new(low, high)),
        })
    }

    pub fn auth_error(stat: AuthStat) -> Self {
        Self::Denied(RejectedReply {
            stat: RejectStat::AuthError(stat),
        })
    }
}

impl Default for ReplyStat {
    fn default() -> Self {
        Self::Accepted(Default::default())
    }
}

impl XdrEncode for ReplyStat {
    fn write_xdr<WR>(&self, writer: &mut WR) -> Result<()>
    where
        WR: Write,
    {
        match self {
            ReplyStat::Accepted(reply) => {
                writer.write_u32::<NetworkEndian>(0)?;
                reply.write_xdr(writer)
            }
            ReplyStat::Denied(reply) => {
                writer.write_u32::<NetworkEndian>(1)?;
                reply.write_xdr(writer)
            }
        }
    }
}

impl XdrDecode for ReplyStat {
    fn read_xdr<RD>(&mut self, reader: &mut RD) -> Result<()>
    where
        RD: Read,
    {
        *self = match reader.read_u32::<NetworkEndian>()? {
            0 => {
                let mut reply = AcceptedReply::default();
                reply.read_xdr(reader)?;
                Self::Accepted(reply)
            }
            1 => {
                let mut reply = RejectedReply::default();
                reply.read_xdr(reader)?;
                Self::Denied(reply)
            }
            _ => return Err(ErrorKind::InvalidData.into()),
        };
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ReplyBody {
    pub stat: ReplyStat,
}

impl XdrEncode for ReplyBody {
    fn write_xdr<WR>(&self, writer: &mut WR) -> Result<()>
    where
        WR: Write,
    {
        self.stat.write_xdr(writer)
    }
}

impl XdrDecode for ReplyBody {
    fn read_xdr<RD>(&mut self, reader: &mut RD) -> Result<()>
    where
        RD: Read,
    {
        self.stat.read_xdr(reader)
    }
}

#[derive(Debug)]
pub enum MsgType {
    Call(CallBody),
    Reply(ReplyBody),
}

impl Default for MsgType {
    fn default() -> Self {
        Self::Call(Default::default())
    }
}

impl XdrEncode for MsgType {
    fn write_xdr<WR>(&self, writer: &mut WR) -> Result<()>
    where
        WR: Write,
    {
        match self {
            MsgType::Call(body) => {
                writer.write_u32::<NetworkEndian>(0)?;
                body.write_xdr(writer)
            }
            MsgType::Reply(body) => {
                writer.write_u32::<NetworkEndian>(1)?;
                body.write_xdr(writer)
            }
        }
    }
}

impl XdrDecode for MsgType {
    fn read_xdr<RD>(&mut self, reader: &mut RD) -> Result<()>
    where
        RD: Read,
    {
        *self = match reader.read_u32::<NetworkEndian>()? {
            0 => {
                let mut body = CallBody::default();
                body.read_xdr(reader)?;
                Self::Call(body)
            }
            1 => {
                let mut body = ReplyBody::default();
                body.read_xdr(reader)?;
                Self::Reply(body)
            }
            _ => return Err(ErrorKind::InvalidData.into()),
        };
        Ok(())
    }
}

/// One RPC call or reply; arguments/results trail the header in the stream.
#[derive(Debug, Default)]
pub struct RpcMessage {
    pub xid: u32,
    pub mtype: MsgType,
}

impl RpcMessage {
    /// Header for an `AUTH_NONE` call of `prog`/`vers` procedure `proc`.
    pub fn call(xid: u32, prog: u32, vers: u32, proc: u32) -> Self {
        Self {
            xid,
            mtype: MsgType::Call(CallBody {
                rpc_vers: RPC_VERSION,
                prog,
                vers,
                proc,
                cred: Default::default(),
                verf: Default::default(),
            }),
        }
    }

    /// Header for a successfully accepted reply; results are appended by the caller.
    pub fn reply_success(xid: u32) -> Self {
        Self {
            xid,
            mtype: MsgType::Reply(ReplyBody {
                stat: ReplyStat::Accepted(AcceptedReply {
                    verf: Default::default(),
                    stat: AcceptStat::Success,
                }),
            }),
        }
    }
}

impl XdrEncode for RpcMessage {
    fn write_xdr<WR>(&self, writer: &mut WR) -> Result<()>
    where
        WR: Write,
    {
        self.xid.write_xdr(writer)?;
        self.mtype.write_xdr(writer)
    }
}

impl XdrDecode for RpcMessage {
    fn read_xdr<RD>(&mut self, reader: &mut RD) -> Result<()>
    where
        RD: Read,
    {
        self.xid.read_xdr(reader)?;
        self.mtype.read_xdr(reader)
    }
}

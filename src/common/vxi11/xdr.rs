//! XDR message structures of the three VXI-11 programs.
//!
//! Field names and layouts follow the `.x` definitions in the VXI-11
//! specification; integers are 32-bit big-endian words, byte payloads are
//! length-prefixed opaques padded to 4 bytes.

use std::io::{Read, Result, Write};

use crate::common::xdr::prelude::*;

/// Server-assigned link identifier from `create_link`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLink(pub u32);

impl From<u32> for DeviceLink {
    fn from(x: u32) -> Self {
        DeviceLink(x)
    }
}

impl XdrEncode for DeviceLink {
    fn write_xdr<WR>(&self, writer: &mut WR) -> Result<()>
    where
        WR: Write,
    {
        self.0.write_xdr(writer)
    }
}

impl XdrDecode for DeviceLink {
    fn read_xdr<RD>(&mut self, reader: &mut RD) -> Result<()>
    where
        RD: Read,
    {
        self.0.read_xdr(reader)
    }
}

/// `device_flags` bitmask carried by most request blocks.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeviceFlags(pub u32);

impl DeviceFlags {
    pub const WAITLOCK: u32 = 0x01;
    pub const END: u32 = 0x08;
    pub const TERMCHRSET: u32 = 0x80;

    /// Block until the device lock is available.
    pub fn waitlock() -> Self {
        Self(Self::WAITLOCK)
    }

    /// This write chunk is the end of the message.
    pub fn end() -> Self {
        Self(Self::END)
    }

    /// A termination character is set in `term_char`.
    pub fn termchrset() -> Self {
        Self(Self::TERMCHRSET)
    }

    pub fn is_waitlock(&self) -> bool {
        self.0 & Self::WAITLOCK != 0
    }

    pub fn is_end(&self) -> bool {
        self.0 & Self::END != 0
    }

    pub fn is_termchrset(&self) -> bool {
        self.0 & Self::TERMCHRSET != 0
    }
}

impl XdrEncode for DeviceFlags {
    fn write_xdr<WR>(&self, writer: &mut WR) -> Result<()>
    where
        WR: Write,
    {
        self.0.write_xdr(writer)
    }
}

impl XdrDecode for DeviceFlags {
    fn read_xdr<RD>(&mut self, reader: &mut RD) -> Result<()>
    where
        RD: Read,
    {
        self.0.read_xdr(reader)
    }
}

/// Why a `device_read` reply ended, as a bitmask.
pub mod reason {
    /// Requested byte count transferred
    pub const REQCNT: u32 = 0x01;
    /// Termination character matched
    pub const CHR: u32 = 0x02;
    /// END indicator (GPIB EOI) received with the last byte
    pub const END: u32 = 0x04;
}

/// Error codes returned by VXI-11 servers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[non_exhaustive]
pub enum DeviceErrorCode {
    #[default]
    NoError,
    SyntaxError,
    DeviceNotAccessible,
    InvalidLinkIdentifier,
    ParameterError,
    ChannelNotEstablished,
    OperationNotSupported,
    OutOfResources,
    DeviceLockedByAnotherLink,
    NoLockHeldByThisLink,
    IoTimeout,
    IoError,
    InvalidAddress,
    Abort,
    ChannelAlreadyEstablished,
    /// Reserved or vendor-specific code; preserved verbatim
    Unknown(u32),
}

impl DeviceErrorCode {
    /// Numeric code as sent on the wire.
    pub fn code(&self) -> u32 {
        match self {
            DeviceErrorCode::NoError => 0,
            DeviceErrorCode::SyntaxError => 1,
            DeviceErrorCode::DeviceNotAccessible => 3,
            DeviceErrorCode::InvalidLinkIdentifier => 4,
            DeviceErrorCode::ParameterError => 5,
            DeviceErrorCode::ChannelNotEstablished => 6,
            DeviceErrorCode::OperationNotSupported => 8,
            DeviceErrorCode::OutOfResources => 9,
            DeviceErrorCode::DeviceLockedByAnotherLink => 11,
            DeviceErrorCode::NoLockHeldByThisLink => 12,
            DeviceErrorCode::IoTimeout => 15,
            DeviceErrorCode::IoError => 17,
            DeviceErrorCode::InvalidAddress => 21,
            DeviceErrorCode::Abort => 23,
            DeviceErrorCode::ChannelAlreadyEstablished => 29,
            DeviceErrorCode::Unknown(x) => *x,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, DeviceErrorCode::NoError)
    }
}

impl From<u32> for DeviceErrorCode {
    fn from(code: u32) -> Self {
        match code {
            0 => DeviceErrorCode::NoError,
            1 => DeviceErrorCode::SyntaxError,
            3 => DeviceErrorCode::DeviceNotAccessible,
            4 => DeviceErrorCode::InvalidLinkIdentifier,
            5 => DeviceErrorCode::ParameterError,
            6 => DeviceErrorCode::ChannelNotEstablished,
            8 => DeviceErrorCode::OperationNotSupported,
            9 => DeviceErrorCode::OutOfResources,
            11 => DeviceErrorCode::DeviceLockedByAnotherLink,
            12 => DeviceErrorCode::NoLockHeldByThisLink,
            15 => DeviceErrorCode::IoTimeout,
            17 => DeviceErrorCode::IoError,
            21 => DeviceErrorCode::InvalidAddress,
            23 => DeviceErrorCode::Abort,
            29 => DeviceErrorCode::ChannelAlreadyEstablished,
            x => DeviceErrorCode::Unknown(x),
        }
    }
}

impl std::fmt::Display for DeviceErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceErrorCode::NoError => write!(f, "no error"),
            DeviceErrorCode::SyntaxError => write!(f, "syntax error (1)"),
            DeviceErrorCode::DeviceNotAccessible => write!(f, "device not accessible (3)"),
            DeviceErrorCode::InvalidLinkIdentifier => write!(f, "invalid link identifier (4)"),
            DeviceErrorCode::ParameterError => write!(f, "parameter error (5)"),
            DeviceErrorCode::ChannelNotEstablished => write!(f, "channel not established (6)"),
            DeviceErrorCode::OperationNotSupported => write!(f, "operation not supported (8)"),
            DeviceErrorCode::OutOfResources => write!(f, "out of resources (9)"),
            DeviceErrorCode::DeviceLockedByAnotherLink => {
                write!(f, "device locked by another link (11)")
            }
            DeviceErrorCode::NoLockHeldByThisLink => write!(f, "no lock held by this link (12)"),
            DeviceErrorCode::IoTimeout => write!(f, "i/o timeout (15)"),
            DeviceErrorCode::IoError => write!(f, "i/o error (17)"),
            DeviceErrorCode::InvalidAddress => write!(f, "invalid address (21)"),
            DeviceErrorCode::Abort => write!(f, "operation aborted (23)"),
            DeviceErrorCode::ChannelAlreadyEstablished => {
                write!(f, "channel already established (29)")
            }
            DeviceErrorCode::Unknown(x) => write!(f, "unknown error {}", x),
        }
    }
}

impl XdrEncode for DeviceErrorCode {
    fn write_xdr<WR>(&self, writer: &mut WR) -> Result<()>
    where
        WR: Write,
    {
        self.code().write_xdr(writer)
    }
}

impl XdrDecode for DeviceErrorCode {
    fn read_xdr<RD>(&mut self, reader: &mut RD) -> Result<()>
    where
        RD: Read,
    {
        let mut code = 0u32;
        code.read_xdr(reader)?;
        *self = code.into();
        Ok(())
    }
}

/// Plain error reply used by most procedures.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeviceError {
    pub error: DeviceErrorCode,
}

impl From<DeviceErrorCode> for DeviceError {
    fn from(error: DeviceErrorCode) -> Self {
        Self { error }
    }
}

impl XdrEncode for DeviceError {
    fn write_xdr<WR>(&self, writer: &mut WR) -> Result<()>
    where
        WR: Write,
    {
        self.error.write_xdr(writer)
    }
}

impl XdrDecode for DeviceError {
    fn read_xdr<RD>(&mut self, reader: &mut RD) -> Result<()>
    where
        RD: Read,
    {
        self.error.read_xdr(reader)
    }
}

/// Transport family of the interrupt channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceAddrFamily {
    #[default]
    Tcp,
    Udp,
}

impl XdrEncode for DeviceAddrFamily {
    fn write_xdr<WR>(&self, writer: &mut WR) -> Result<()>
    where
        WR: Write,
    {
        writer.write_u32::<NetworkEndian>(match self {
            DeviceAddrFamily::Tcp => 0,
            DeviceAddrFamily::Udp => 1,
        })
    }
}

impl XdrDecode for DeviceAddrFamily {
    fn read_xdr<RD>(&mut self, reader: &mut RD) -> Result<()>
    where
        RD: Read,
    {
        *self = match reader.read_u32::<NetworkEndian>()? {
            0 => DeviceAddrFamily::Tcp,
            1 => DeviceAddrFamily::Udp,
            _ => return Err(std::io::ErrorKind::InvalidData.into()),
        };
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct CreateLinkParms {
    pub client_id: i32,
    pub lock_device: bool,
    pub lock_timeout: u32,
    pub device: String,
}

impl XdrEncode for CreateLinkParms {
    fn write_xdr<WR>(&self, writer: &mut WR) -> Result<()>
    where
        WR: Write,
    {
        self.client_id.write_xdr(writer)?;
        self.lock_device.write_xdr(writer)?;
        self.lock_timeout.write_xdr(writer)?;
        self.device.write_xdr(writer)
    }
}

impl XdrDecode for CreateLinkParms {
    fn read_xdr<RD>(&mut self, reader: &mut RD) -> Result<()>
    where
        RD: Read,
    {
        self.client_id.read_xdr(reader)?;
        self.lock_device.read_xdr(reader)?;
        self.lock_timeout.read_xdr(reader)?;
        self.device.read_xdr(reader)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CreateLinkResp {
    pub error: DeviceErrorCode,
    pub lid: DeviceLink,
    pub abort_port: u16,
    pub max_recv_size: u32,
}

impl XdrEncode for CreateLinkResp {
    fn write_xdr<WR>(&self, writer: &mut WR) -> Result<()>
    where
        WR: Write,
    {
        self.error.write_xdr(writer)?;
        self.lid.write_xdr(writer)?;
        self.abort_port.write_xdr(writer)?;
        self.max_recv_size.write_xdr(writer)
    }
}

impl XdrDecode for CreateLinkResp {
    fn read_xdr<RD>(&mut self, reader: &mut RD) -> Result<()>
    where
        RD: Read,
    {
        self.error.read_xdr(reader)?;
        self.lid.read_xdr(reader)?;
        self.abort_port.read_xdr(reader)?;
        self.max_recv_size.read_xdr(reader)
    }
}

#[derive(Debug, Default, Clone)]
pub struct DeviceWriteParms {
    pub lid: DeviceLink,
    pub io_timeout: u32,
    pub lock_timeout: u32,
    pub flags: DeviceFlags,
    pub data: Opaque,
}

impl XdrEncode for DeviceWriteParms {
    fn write_xdr<WR>(&self, writer: &mut WR) -> Result<()>
    where
        WR: Write,
    {
        self.lid.write_xdr(writer)?;
        self.io_timeout.write_xdr(writer)?;
        self.lock_timeout.write_xdr(writer)?;
        self.flags.write_xdr(writer)?;
        self.data.write_xdr(writer)
    }
}

impl XdrDecode for DeviceWriteParms {
    fn read_xdr<RD>(&mut self, reader: &mut RD) -> Result<()>
    where
        RD: Read,
    {
        self.lid.read_xdr(reader)?;
        self.io_timeout.read_xdr(reader)?;
        self.lock_timeout.read_xdr(reader)?;
        self.flags.read_xdr(reader)?;
        self.data.read_xdr(reader)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DeviceWriteResp {
    pub error: DeviceErrorCode,
    pub size: u32,
}

impl XdrEncode for DeviceWriteResp {
    fn write_xdr<WR>(&self, writer: &mut WR) -> Result<()>
    where
        WR: Write,
    {
        self.error.write_xdr(writer)?;
        self.size.write_xdr(writer)
    }
}

impl XdrDecode for DeviceWriteResp {
    fn read_xdr<RD>(&mut self, reader: &mut RD) -> Result<()>
    where
        RD: Read,
    {
        self.error.read_xdr(reader)?;
        self.size.read_xdr(reader)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DeviceReadParms {
    pub lid: DeviceLink,
    pub request_size: u32,
    pub io_timeout: u32,
    pub lock_timeout: u32,
    pub flags: DeviceFlags,
    pub term_char: u8,
}

impl XdrEncode for DeviceReadParms {
    fn write_xdr<WR>(&self, writer: &mut WR) -> Result<()>
    where
        WR: Write,
    {
        self.lid.write_xdr(writer)?;
        self.request_size.write_xdr(writer)?;
        self.io_timeout.write_xdr(writer)?;
        self.lock_timeout.write_xdr(writer)?;
        self.flags.write_xdr(writer)?;
        self.term_char.write_xdr(writer)
    }
}

impl XdrDecode for DeviceReadParms {
    fn read_xdr<RD>(&mut self, reader: &mut RD) -> Result<()>
    where
        RD: Read,
    {
        self.lid.read_xdr(reader)?;
        self.request_size.read_xdr(reader)?;
        self.io_timeout.read_xdr(reader)?;
        self.lock_timeout.read_xdr(reader)?;
        self.flags.read_xdr(reader)?;
        self.term_char.read_xdr(reader)
    }
}

#[derive(Debug, Default, Clone)]
pub struct DeviceReadResp {
    pub error: DeviceErrorCode,
    pub reason: u32,
    pub data: Opaque,
}

impl DeviceReadResp {
    /// Reply carries the END indicator or matched the termination character.
    pub fn is_terminated(&self) -> bool {
        self.reason & (reason::END | reason::CHR) != 0
    }
}

impl XdrEncode for DeviceReadResp {
    fn write_xdr<WR>(&self, writer: &mut WR) -> Result<()>
    where
        WR: Write,
    {
        self.error.write_xdr(writer)?;
        self.reason.write_xdr(writer)?;
        self.data.write_xdr(writer)
    }
}

impl XdrDecode for DeviceReadResp {
    fn read_xdr<RD>(&mut self, reader: &mut RD) -> Result<()>
    where
        RD: Read,
    {
        self.error.read_xdr(reader)?;
        self.reason.read_xdr(reader)?;
        self.data.read_xdr(reader)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DeviceReadStbResp {
    pub error: DeviceErrorCode,
    pub stb: u8,
}

impl XdrEncode for DeviceReadStbResp {
    fn write_xdr<WR>(&self, writer: &mut WR) -> Result<()>
    where
        WR: Write,
    {
        self.error.write_xdr(writer)?;
        self.stb.write_xdr(writer)
    }
}

impl XdrDecode for DeviceReadStbResp {
    fn read_xdr<RD>(&mut self, reader: &mut RD) -> Result<()>
    where
        RD: Read,
    {
        self.error.read_xdr(reader)?;
        self.stb.read_xdr(reader)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DeviceGenericParms {
    pub lid: DeviceLink,
    pub flags: DeviceFlags,
    pub lock_timeout: u32,
    pub io_timeout: u32,
}

impl XdrEncode for DeviceGenericParms {
    fn write_xdr<WR>(&self, writer: &mut WR) -> Result<()>
    where
        WR: Write,
    {
        self.lid.write_xdr(writer)?;
        self.flags.write_xdr(writer)?;
        self.lock_timeout.write_xdr(writer)?;
        self.io_timeout.write_xdr(writer)
    }
}

impl XdrDecode for DeviceGenericParms {
    fn read_xdr<RD>(&mut self, reader: &mut RD) -> Result<()>
    where
        RD: Read,
    {
        self.lid.read_xdr(reader)?;
        self.flags.read_xdr(reader)?;
        self.lock_timeout.read_xdr(reader)?;
        self.io_timeout.read_xdr(reader)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DeviceLockParms {
    pub lid: DeviceLink,
    pub flags: DeviceFlags,
    pub lock_timeout: u32,
}

impl XdrEncode for DeviceLockParms {
    fn write_xdr<WR>(&self, writer: &mut WR) -> Result<()>
    where
        WR: Write,
    {
        self.lid.write_xdr(writer)?;
        self.flags.write_xdr(writer)?;
        self.lock_timeout.write_xdr(writer)
    }
}

impl XdrDecode for DeviceLockParms {
    fn read_xdr<RD>(&mut self, reader: &mut RD) -> Result<()>
    where
        RD: Read,
    {
        self.lid.read_xdr(reader)?;
        self.flags.read_xdr(reader)?;
        self.lock_timeout.read_xdr(reader)
    }
}

/// `create_intr_chan` arguments: where and how the device should call us back.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeviceRemoteFunc {
    pub host_addr: u32,
    pub host_port: u16,
    pub prog_num: u32,
    pub prog_vers: u32,
    pub prog_family: DeviceAddrFamily,
}

impl XdrEncode for DeviceRemoteFunc {
    fn write_xdr<WR>(&self, writer: &mut WR) -> Result<()>
    where
        WR: Write,
    {
        self.host_addr.write_xdr(writer)?;
        self.host_port.write_xdr(writer)?;
        self.prog_num.write_xdr(writer)?;
        self.prog_vers.write_xdr(writer)?;
        self.prog_family.write_xdr(writer)
    }
}

impl XdrDecode for DeviceRemoteFunc {
    fn read_xdr<RD>(&mut self, reader: &mut RD) -> Result<()>
    where
        RD: Read,
    {
        self.host_addr.read_xdr(reader)?;
        self.host_port.read_xdr(reader)?;
        self.prog_num.read_xdr(reader)?;
        self.prog_vers.read_xdr(reader)?;
        self.prog_family.read_xdr(reader)
    }
}

#[derive(Debug, Default, Clone)]
pub struct DeviceEnableSrqParms {
    pub lid: DeviceLink,
    pub enable: bool,
    pub handle: Opaque,
}

impl XdrEncode for DeviceEnableSrqParms {
    fn write_xdr<WR>(&self, writer: &mut WR) -> Result<()>
    where
        WR: Write,
    {
        self.lid.write_xdr(writer)?;
        self.enable.write_xdr(writer)?;
        self.handle.write_xdr(writer)
    }
}

impl XdrDecode for DeviceEnableSrqParms {
    fn read_xdr<RD>(&mut self, reader: &mut RD) -> Result<()>
    where
        RD: Read,
    {
        self.lid.read_xdr(reader)?;
        self.enable.read_xdr(reader)?;
        self.handle.read_xdr(reader)
    }
}

#[derive(Debug, Default, Clone)]
pub struct DeviceDocmdParms {
    pub lid: DeviceLink,
    pub flags: DeviceFlags,
    pub io_timeout: u32,
    pub lock_timeout: u32,
    pub cmd: i32,
    pub network_order: bool,
    pub datasize: u32,
    pub data_in: Opaque,
}

impl XdrEncode for DeviceDocmdParms {
    fn write_xdr<WR>(&self, writer: &mut WR) -> Result<()>
    where
        WR: Write,
    {
        self.lid.write_xdr(writer)?;
        self.flags.write_xdr(writer)?;
        self.io_timeout.write_xdr(writer)?;
        self.lock_timeout.write_xdr(writer)?;
        self.cmd.write_xdr(writer)?;
        self.network_order.write_xdr(writer)?;
        self.datasize.write_xdr(writer)?;
        self.data_in.write_xdr(writer)
    }
}

impl XdrDecode for DeviceDocmdParms {
    fn read_xdr<RD>(&mut self, reader: &mut RD) -> Result<()>
    where
        RD: Read,
    {
        self.lid.read_xdr(reader)?;
        self.flags.read_xdr(reader)?;
        self.io_timeout.read_xdr(reader)?;
        self.lock_timeout.read_xdr(reader)?;
        self.cmd.read_xdr(reader)?;
        self.network_order.read_xdr(reader)?;
        self.datasize.read_xdr(reader)?;
        self.data_in.read_xdr(reader)
    }
}

#[derive(Debug, Default, Clone)]
pub struct DeviceDocmdResp {
    pub error: DeviceErrorCode,
    pub data_out: Opaque,
}

impl XdrEncode for DeviceDocmdResp {
    fn write_xdr<WR>(&self, writer: &mut WR) -> Result<()>
    where
        WR: Write,
    {
        self.error.write_xdr(writer)?;
        self.data_out.write_xdr(writer)
    }
}

impl XdrDecode for DeviceDocmdResp {
    fn read_xdr<RD>(&mut self, reader: &mut RD) -> Result<()>
    where
        RD: Read,
    {
        self.error.read_xdr(reader)?;
        self.data_out.read_xdr(reader)
    }
}

/// `device_intr_srq` arguments: the opaque handle given at enable time.
#[derive(Debug, Default, Clone)]
pub struct DeviceSrqParms {
    pub handle: Opaque,
}

impl DeviceSrqParms {
    pub fn new(handle: Opaque) -> Self {
        Self { handle }
    }
}

impl XdrEncode for DeviceSrqParms {
    fn write_xdr<WR>(&self, writer: &mut WR) -> Result<()>
    where
        WR: Write,
    {
        self.handle.write_xdr(writer)
    }
}

impl XdrDecode for DeviceSrqParms {
    fn read_xdr<RD>(&mut self, reader: &mut RD) -> Result<()>
    where
        RD: Read,
    {
        self.handle.read_xdr(reader)
    }
}

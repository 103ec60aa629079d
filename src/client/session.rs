//! VXI-11 session engine.
//!
//! A [`Session`] owns one link to one instrument (or gateway sub-device):
//! the core channel RPC client, the negotiated chunk size, the lazily
//! created abort channel and the interrupt-enable state. All methods take
//! `&self`, so a session can be shared through an [`Arc`] — which is how
//! [`abort`](Session::abort) interrupts a core call blocked in another task.
//!
//! Core calls serialize on the session's own channel lock; operations
//! execute in the order callers issue them. The abort channel deliberately
//! has its own lock and its own TCP connection so it never queues behind
//! the call it is supposed to cancel.

use std::{
    cmp::min,
    io::ErrorKind,
    net::IpAddr,
    sync::{
        atomic::{AtomicI32, AtomicU32, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_std::{
    future::timeout,
    net::{TcpStream, ToSocketAddrs},
};
use byteorder::{ByteOrder, LittleEndian};
use futures::{lock::Mutex, Future};

use super::{
    portmapper::PortMapperClient,
    srq::{SrqReceiver, SrqService, SRQ_HANDLE_WIDTH},
};
use crate::common::{
    onc_rpc::prelude::*,
    portmapper::{xdr::Mapping, PORTMAPPER_PORT, PORTMAPPER_PROT_TCP},
    vxi11::{
        xdr::{
            CreateLinkParms, CreateLinkResp, DeviceAddrFamily, DeviceDocmdParms, DeviceDocmdResp,
            DeviceEnableSrqParms, DeviceError, DeviceErrorCode, DeviceFlags, DeviceGenericParms,
            DeviceLink, DeviceLockParms, DeviceReadParms, DeviceReadResp, DeviceReadStbResp,
            DeviceRemoteFunc, DeviceWriteParms, DeviceWriteResp,
        },
        CREATE_INTR_CHAN, CREATE_LINK, DESTROY_INTR_CHAN, DESTROY_LINK, DEVICE_ABORT,
        DEVICE_ASYNC, DEVICE_ASYNC_VERSION, DEVICE_CLEAR, DEVICE_CORE, DEVICE_CORE_VERSION,
        DEVICE_DOCMD, DEVICE_ENABLE_SRQ, DEVICE_INTR, DEVICE_INTR_VERSION, DEVICE_LOCAL,
        DEVICE_LOCK, DEVICE_READ, DEVICE_READSTB, DEVICE_REMOTE, DEVICE_TRIGGER, DEVICE_UNLOCK,
        DEVICE_WRITE,
    },
    xdr::prelude::*,
};

/// Device sub-address used when none is given (VXI-11.3 rule B.1.2).
pub const DEFAULT_DEVICE: &str = "inst0";

const DEFAULT_TIMEOUT_MS: u32 = 10_000;

/// Fallback write chunk size when the server advertises no usable maximum.
const FALLBACK_CHUNK: u32 = 1024;

/// Hard bound on any single RPC exchange, deliberately much looser than the
/// protocol-level timeouts so slow instruments get to answer with their own
/// timeout error instead of a dead channel.
const RPC_CALL_TIMEOUT: Duration = Duration::from_secs(120);

/// Reply size used by the numeric query helpers.
const QUERY_REPLY_MAX: usize = 256;

static NEXT_CLIENT_ID: AtomicI32 = AtomicI32::new(1);
static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Errors surfaced by [`Session`] operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("session is already open")]
    AlreadyOpen,
    #[error("session is not open")]
    NotOpen,
    #[error("empty device address")]
    EmptyAddress,
    #[error("address did not resolve to an IPv4 host")]
    NoIpv4,
    #[error("core channel is not registered with the portmapper")]
    NotRegistered,
    #[error("read capacity must be nonzero")]
    ZeroCapacity,
    #[error("termination character must be 7-bit")]
    BadTerminator,
    #[error("interrupt service is not running")]
    SrqServiceStopped,
    /// The server answered the call with a nonzero error code.
    #[error("device returned: {0}")]
    Device(DeviceErrorCode),
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error("read buffer full ({0} bytes) before END indicator")]
    ReadBufferFull(usize),
    #[error("device sent more bytes than requested")]
    ReadOverrun,
    #[error("device acknowledged more bytes than were sent")]
    WriteOverrun,
    #[error("device repeatedly accepted no data")]
    WriteStalled,
    #[error("docmd reply shorter than expected")]
    DocmdUnderrun,
    #[error("response is not valid text")]
    NotText,
    #[error("could not parse response {0:?}")]
    Parse(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Rpc(RpcError::Io(err))
    }
}

fn check(error: DeviceErrorCode) -> Result<(), Error> {
    if error.is_ok() {
        Ok(())
    } else {
        Err(Error::Device(error))
    }
}

/// Bound an RPC exchange by the transport timeout.
async fn rpc_timeout<T, F>(fut: F) -> Result<T, Error>
where
    F: Future<Output = Result<T, RpcError>>,
{
    match timeout(RPC_CALL_TIMEOUT, fut).await {
        Ok(res) => Ok(res?),
        Err(_) => Err(Error::Rpc(RpcError::Io(ErrorKind::TimedOut.into()))),
    }
}

/// Write chunk limit derived from the server's `maxRecvSize` advertisement.
/// Zero and negative-as-signed values mean the server did not say; use the
/// protocol minimum of 1024.
fn chunk_limit(advertised: u32) -> usize {
    if advertised == 0 || advertised > i32::MAX as u32 {
        FALLBACK_CHUNK as usize
    } else {
        advertised as usize
    }
}

fn clamp_ms(timeout: Duration) -> u32 {
    min(timeout.as_millis(), u32::MAX as u128) as u32
}

/// How [`Session::read`] decides a response is complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadTerminator {
    /// Rely on the END indicator (GPIB EOI) alone.
    #[default]
    End,
    /// Additionally stop when this 7-bit character arrives.
    Char(u8),
}

/// Transport the instrument should use for interrupt callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SrqTransport {
    Tcp,
    Udp,
}

/// GPIB bus condition readable through [`Session::docmd_bus_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum BusStatus {
    /// REN line state
    RemoteEnable = 1,
    /// SRQ line state
    ServiceRequest = 2,
    /// NDAC line state
    Ndac = 3,
    /// Interface is system controller
    SystemController = 4,
    /// Interface is controller-in-charge
    ControllerInCharge = 5,
    /// Interface is addressed to talk
    Talker = 6,
    /// Interface is addressed to listen
    Listener = 7,
    /// Interface bus address
    BusAddress = 8,
}

// Gateway docmd opcodes from VXI-11.2 §B.5
const DOCMD_SEND_COMMAND: i32 = 0x02_0000;
const DOCMD_BUS_STATUS: i32 = 0x02_0001;
const DOCMD_ATN_CONTROL: i32 = 0x02_0002;
const DOCMD_REN_CONTROL: i32 = 0x02_0003;
const DOCMD_PASS_CONTROL: i32 = 0x02_0004;
const DOCMD_BUS_ADDRESS: i32 = 0x02_000A;
const DOCMD_IFC_CONTROL: i32 = 0x02_0010;

struct SrqState {
    service: Arc<SrqService>,
    transport: SrqTransport,
    receiver: SrqReceiver,
}

/// Everything owned by an open core channel. Dropping it closes the TCP
/// connection.
struct CoreChannel {
    rpc: StreamRpcClient<TcpStream>,
    lid: DeviceLink,
    max_recv_size: u32,
    device: String,
    /// Local address of the core connection; interrupt channels are
    /// advertised from here.
    local_ip: IpAddr,
    srq: Option<SrqState>,
}

/// Abort target fixed by the `create_link` reply; the client itself is
/// created on first use and kept for later aborts.
struct AbortChannel {
    host: IpAddr,
    port: u16,
    lid: DeviceLink,
    rpc: Option<StreamRpcClient<TcpStream>>,
}

/// One VXI-11 link to one instrument.
pub struct Session {
    id: u64,
    io_timeout_ms: AtomicU32,
    lock_timeout_ms: AtomicU32,
    /// `-1` encodes [`ReadTerminator::End`], `0..=127` the character.
    terminator: AtomicI32,
    core: Mutex<Option<CoreChannel>>,
    abort: Mutex<Option<AbortChannel>>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// New unconnected session with the protocol defaults (10 s timeouts,
    /// END-terminated reads).
    pub fn new() -> Self {
        Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            io_timeout_ms: AtomicU32::new(DEFAULT_TIMEOUT_MS),
            lock_timeout_ms: AtomicU32::new(DEFAULT_TIMEOUT_MS),
            terminator: AtomicI32::new(-1),
            core: Mutex::new(None),
            abort: Mutex::new(None),
        }
    }

    /// Open a session to `device` on `host` in one step.
    ///
    /// `host` is a name or dotted address; the core channel port is
    /// discovered through the host's portmapper. `device` defaults to
    /// `"inst0"`; gateways use addresses like `"gpib0,9"`.
    pub async fn connect(host: &str, device: Option<&str>) -> Result<Self, Error> {
        let session = Self::new();
        session.open(host, device).await?;
        Ok(session)
    }

    /// Open the link (portmapper discovery, TCP connect, `create_link`).
    pub async fn open(&self, host: &str, device: Option<&str>) -> Result<(), Error> {
        let mut guard = self.core.lock().await;
        if guard.is_some() {
            return Err(Error::AlreadyOpen);
        }
        if host.is_empty() {
            return Err(Error::EmptyAddress);
        }

        // The abort and interrupt channels carry IPv4 addresses, so resolve
        // to the first IPv4 candidate.
        let mut candidates = (host, PORTMAPPER_PORT).to_socket_addrs().await?;
        let portmap_addr = candidates.find(|a| a.is_ipv4()).ok_or(Error::NoIpv4)?;

        let mut portmap = PortMapperClient::connect_tcp(portmap_addr).await?;
        let core_port = rpc_timeout(portmap.getport(Mapping::new(
            DEVICE_CORE,
            DEVICE_CORE_VERSION,
            PORTMAPPER_PROT_TCP,
            0,
        )))
        .await?;
        if core_port == 0 {
            return Err(Error::NotRegistered);
        }
        log::debug!("Core channel for {} at port {}", host, core_port);

        self.open_core(&mut guard, portmap_addr.ip(), core_port, device)
            .await
    }

    /// Open the link against a known core channel endpoint, skipping the
    /// portmapper lookup.
    pub async fn open_direct(
        &self,
        addr: std::net::SocketAddr,
        device: Option<&str>,
    ) -> Result<(), Error> {
        let mut guard = self.core.lock().await;
        if guard.is_some() {
            return Err(Error::AlreadyOpen);
        }
        self.open_core(&mut guard, addr.ip(), addr.port(), device)
            .await
    }

    async fn open_core(
        &self,
        slot: &mut Option<CoreChannel>,
        host: IpAddr,
        port: u16,
        device: Option<&str>,
    ) -> Result<(), Error> {
        let device = match device {
            Some(d) if !d.is_empty() => d,
            _ => DEFAULT_DEVICE,
        }
        .to_string();

        let stream = TcpStream::connect((host, port)).await?;
        let local_ip = stream.local_addr()?.ip();
        let mut rpc = StreamRpcClient::new(stream, DEVICE_CORE, DEVICE_CORE_VERSION);

        let parms = CreateLinkParms {
            client_id: NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed),
            lock_device: false,
            lock_timeout: self.io_timeout_ms.load(Ordering::Relaxed),
            device: device.clone(),
        };
        let resp: CreateLinkResp = rpc_timeout(rpc.call(CREATE_LINK, parms)).await?;
        check(resp.error)?;

        log::debug!(
            "Link {} to {} ({}): max chunk {}, abort port {}",
            resp.lid.0,
            host,
            device,
            resp.max_recv_size,
            resp.abort_port,
        );

        *self.abort.lock().await = Some(AbortChannel {
            host,
            port: resp.abort_port,
            lid: resp.lid,
            rpc: None,
        });
        *slot = Some(CoreChannel {
            rpc,
            lid: resp.lid,
            max_recv_size: resp.max_recv_size,
            device,
            local_ip,
            srq: None,
        });
        Ok(())
    }

    /// Tear the link down. Every step runs even when an earlier one fails;
    /// the first failure is reported. Closing a closed session is a no-op.
    pub async fn close(&self) -> Result<(), Error> {
        let mut guard = self.core.lock().await;
        let Some(mut core) = guard.take() else {
            return Ok(());
        };
        let mut first_err = None;

        fn note(first_err: &mut Option<Error>, what: &str, res: Result<(), Error>) {
            if let Err(err) = res {
                log::warn!("close: {} failed: {}", what, err);
                first_err.get_or_insert(err);
            }
        }

        // Withdraw this session's interrupt registration; the process-wide
        // service keeps running for other sessions.
        if let Some(srq) = core.srq.take() {
            let handle = self.srq_handle();
            let parms = DeviceEnableSrqParms {
                lid: core.lid,
                enable: false,
                handle: Opaque(handle.to_vec()),
            };
            let res = rpc_timeout(core.rpc.call::<_, DeviceError>(DEVICE_ENABLE_SRQ, parms))
                .await
                .and_then(|resp| check(resp.error));
            note(&mut first_err, "device_enable_srq(false)", res);

            let res = rpc_timeout(core.rpc.call::<_, DeviceError>(DESTROY_INTR_CHAN, ()))
                .await
                .and_then(|resp| check(resp.error));
            note(&mut first_err, "destroy_intr_chan", res);

            srq.service.unsubscribe(&handle);
        }

        let res = rpc_timeout(core.rpc.call::<_, DeviceError>(DESTROY_LINK, core.lid))
            .await
            .and_then(|resp| check(resp.error));
        note(&mut first_err, "destroy_link", res);

        // Abort channel client, then the core client itself
        *self.abort.lock().await = None;
        drop(core);

        match first_err {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    /// Whether the link is currently established.
    pub async fn is_open(&self) -> bool {
        self.core.lock().await.is_some()
    }

    /// Device sub-address of the open link.
    pub async fn device_name(&self) -> Option<String> {
        self.core.lock().await.as_ref().map(|c| c.device.clone())
    }

    /// Server-advertised maximum write chunk, when open.
    pub async fn max_recv_size(&self) -> Option<u32> {
        self.core.lock().await.as_ref().map(|c| c.max_recv_size)
    }

    /// Set the protocol I/O timeout (carried in every request block).
    /// Zero is accepted; sub-millisecond durations round down.
    pub fn set_timeout(&self, timeout: Duration) {
        self.io_timeout_ms.store(clamp_ms(timeout), Ordering::Relaxed);
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms.load(Ordering::Relaxed) as u64)
    }

    /// Set how long the server may wait for the device lock.
    pub fn set_lock_timeout(&self, timeout: Duration) {
        self.lock_timeout_ms
            .store(clamp_ms(timeout), Ordering::Relaxed);
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms.load(Ordering::Relaxed) as u64)
    }

    /// Configure read termination. Characters above 0x7F are rejected; the
    /// wire field is 7-bit.
    pub fn set_read_terminator(&self, term: ReadTerminator) -> Result<(), Error> {
        match term {
            ReadTerminator::End => self.terminator.store(-1, Ordering::Relaxed),
            ReadTerminator::Char(c) if c <= 0x7F => {
                self.terminator.store(c as i32, Ordering::Relaxed)
            }
            ReadTerminator::Char(_) => return Err(Error::BadTerminator),
        }
        Ok(())
    }

    pub fn read_terminator(&self) -> ReadTerminator {
        match self.terminator.load(Ordering::Relaxed) {
            -1 => ReadTerminator::End,
            c => ReadTerminator::Char(c as u8),
        }
    }

    fn srq_handle(&self) -> [u8; SRQ_HANDLE_WIDTH] {
        self.id.to_be_bytes()
    }

    /// Send `data`, fragmenting against the advertised chunk size; the END
    /// flag rides on the final chunk. Writing nothing is a successful no-op.
    pub async fn write(&self, data: &[u8]) -> Result<(), Error> {
        if data.is_empty() {
            return Ok(());
        }
        let mut guard = self.core.lock().await;
        let core = guard.as_mut().ok_or(Error::NotOpen)?;

        let io_timeout = self.io_timeout_ms.load(Ordering::Relaxed);
        let lock_timeout = self.lock_timeout_ms.load(Ordering::Relaxed);
        let cnt_max = chunk_limit(core.max_recv_size);

        let mut remaining = data;
        let mut stalled = 0;
        while !remaining.is_empty() {
            let last = remaining.len() <= cnt_max;
            let take = min(remaining.len(), cnt_max);
            let parms = DeviceWriteParms {
                lid: core.lid,
                io_timeout,
                lock_timeout,
                flags: if last {
                    DeviceFlags::end()
                } else {
                    DeviceFlags::default()
                },
                data: Opaque(remaining[..take].to_vec()),
            };
            let resp: DeviceWriteResp = rpc_timeout(core.rpc.call(DEVICE_WRITE, parms)).await?;
            check(resp.error)?;

            let accepted = resp.size as usize;
            if accepted > take {
                return Err(Error::WriteOverrun);
            }
            // The server may accept less than offered; resend the tail.
            // Two consecutive empty acceptances mean it never will.
            if accepted == 0 {
                stalled += 1;
                if stalled >= 2 {
                    return Err(Error::WriteStalled);
                }
            } else {
                stalled = 0;
            }
            remaining = &remaining[accepted..];
        }
        Ok(())
    }

    /// [`write`](Session::write) for textual commands.
    pub async fn write_str(&self, command: &str) -> Result<(), Error> {
        self.write(command.as_bytes()).await
    }

    /// Read a response of at most `cap` bytes, accumulating chunks until
    /// the server signals END (or the configured termination character).
    /// Filling `cap` without a terminator is an error.
    pub async fn read(&self, cap: usize) -> Result<Vec<u8>, Error> {
        if cap == 0 {
            return Err(Error::ZeroCapacity);
        }
        let mut guard = self.core.lock().await;
        let core = guard.as_mut().ok_or(Error::NotOpen)?;

        let io_timeout = self.io_timeout_ms.load(Ordering::Relaxed);
        let lock_timeout = self.lock_timeout_ms.load(Ordering::Relaxed);
        let (flags, term_char) = match self.read_terminator() {
            ReadTerminator::End => (DeviceFlags::default(), 0),
            ReadTerminator::Char(c) => (DeviceFlags::termchrset(), c),
        };

        let mut buf = Vec::new();
        loop {
            let parms = DeviceReadParms {
                lid: core.lid,
                request_size: (cap - buf.len()) as u32,
                io_timeout,
                lock_timeout,
                flags,
                term_char,
            };
            let resp: DeviceReadResp = rpc_timeout(core.rpc.call(DEVICE_READ, parms)).await?;
            check(resp.error)?;

            if buf.len() + resp.data.len() > cap {
                return Err(Error::ReadOverrun);
            }
            buf.extend_from_slice(&resp.data);

            if resp.is_terminated() {
                return Ok(buf);
            }
            if buf.len() == cap {
                return Err(Error::ReadBufferFull(cap));
            }
        }
    }

    /// Write `command`, then read back at most `cap` bytes.
    pub async fn query_raw(&self, command: &[u8], cap: usize) -> Result<Vec<u8>, Error> {
        self.write(command).await?;
        self.read(cap).await
    }

    /// Write `command`, then read a textual response of at most `cap` bytes.
    pub async fn query(&self, command: &str, cap: usize) -> Result<String, Error> {
        let bytes = self.query_raw(command.as_bytes(), cap).await?;
        String::from_utf8(bytes).map_err(|_| Error::NotText)
    }

    /// Query a floating-point value, e.g. `"MEAS:VOLT:DC?"`.
    pub async fn query_f64(&self, command: &str) -> Result<f64, Error> {
        let text = self.query(command, QUERY_REPLY_MAX).await?;
        let trimmed = text.trim_matches(|c: char| c.is_ascii_whitespace() || c == '\0');
        trimmed.parse().map_err(|_| Error::Parse(trimmed.into()))
    }

    /// Query an integer value, e.g. `"*ESR?"`.
    pub async fn query_i32(&self, command: &str) -> Result<i32, Error> {
        let text = self.query(command, QUERY_REPLY_MAX).await?;
        let trimmed = text.trim_matches(|c: char| c.is_ascii_whitespace() || c == '\0');
        trimmed.parse().map_err(|_| Error::Parse(trimmed.into()))
    }

    async fn simple_call(&self, proc: u32) -> Result<(), Error> {
        let mut guard = self.core.lock().await;
        let core = guard.as_mut().ok_or(Error::NotOpen)?;
        let parms = DeviceGenericParms {
            lid: core.lid,
            flags: DeviceFlags::default(),
            lock_timeout: self.lock_timeout_ms.load(Ordering::Relaxed),
            io_timeout: self.io_timeout_ms.load(Ordering::Relaxed),
        };
        let resp: DeviceError = rpc_timeout(core.rpc.call(proc, parms)).await?;
        check(resp.error)
    }

    /// Group execute trigger.
    pub async fn trigger(&self) -> Result<(), Error> {
        self.simple_call(DEVICE_TRIGGER).await
    }

    /// Device clear (488.1 DCL/SDC).
    pub async fn clear(&self) -> Result<(), Error> {
        self.simple_call(DEVICE_CLEAR).await
    }

    /// Put the device in remote state.
    pub async fn remote(&self) -> Result<(), Error> {
        self.simple_call(DEVICE_REMOTE).await
    }

    /// Put the device in local state.
    pub async fn local(&self) -> Result<(), Error> {
        self.simple_call(DEVICE_LOCAL).await
    }

    /// Serial poll; returns the status byte.
    pub async fn readstb(&self) -> Result<u8, Error> {
        let mut guard = self.core.lock().await;
        let core = guard.as_mut().ok_or(Error::NotOpen)?;
        let parms = DeviceGenericParms {
            lid: core.lid,
            flags: DeviceFlags::default(),
            lock_timeout: self.lock_timeout_ms.load(Ordering::Relaxed),
            io_timeout: self.io_timeout_ms.load(Ordering::Relaxed),
        };
        let resp: DeviceReadStbResp = rpc_timeout(core.rpc.call(DEVICE_READSTB, parms)).await?;
        check(resp.error)?;
        Ok(resp.stb)
    }

    /// Acquire the device lock, waiting up to the lock timeout.
    pub async fn lock(&self) -> Result<(), Error> {
        let mut guard = self.core.lock().await;
        let core = guard.as_mut().ok_or(Error::NotOpen)?;
        let parms = DeviceLockParms {
            lid: core.lid,
            flags: DeviceFlags::waitlock(),
            lock_timeout: self.lock_timeout_ms.load(Ordering::Relaxed),
        };
        let resp: DeviceError = rpc_timeout(core.rpc.call(DEVICE_LOCK, parms)).await?;
        check(resp.error)
    }

    /// Release the device lock. The server answers code 12 when this link
    /// holds none.
    pub async fn unlock(&self) -> Result<(), Error> {
        let mut guard = self.core.lock().await;
        let core = guard.as_mut().ok_or(Error::NotOpen)?;
        let resp: DeviceError = rpc_timeout(core.rpc.call(DEVICE_UNLOCK, core.lid)).await?;
        check(resp.error)
    }

    /// Abort the core call currently in flight on this session.
    ///
    /// Runs over the separate abort channel (connected on first use to the
    /// port advertised by `create_link`), so it proceeds while the core
    /// channel is blocked; the aborted call returns code 23.
    pub async fn abort(&self) -> Result<(), Error> {
        let mut guard = self.abort.lock().await;
        let chan = guard.as_mut().ok_or(Error::NotOpen)?;

        if chan.rpc.is_none() {
            let stream = TcpStream::connect((chan.host, chan.port)).await?;
            log::debug!("Abort channel to {}:{}", chan.host, chan.port);
            chan.rpc = Some(StreamRpcClient::new(
                stream,
                DEVICE_ASYNC,
                DEVICE_ASYNC_VERSION,
            ));
        }
        let resp: DeviceError = match chan.rpc.as_mut() {
            Some(rpc) => rpc_timeout(rpc.call(DEVICE_ABORT, chan.lid)).await?,
            None => return Err(Error::NotOpen),
        };
        check(resp.error)
    }

    /// Enable service requests, delivered through `service`, which must be
    /// running. Returns the event channel; events are edge triggered and
    /// coalesce.
    ///
    /// Enabling again with the same transport is a no-op; a different
    /// transport rebuilds the interrupt channel.
    pub async fn enable_srq(
        &self,
        service: &Arc<SrqService>,
        transport: SrqTransport,
    ) -> Result<SrqReceiver, Error> {
        let mut guard = self.core.lock().await;
        let core = guard.as_mut().ok_or(Error::NotOpen)?;
        let handle = self.srq_handle();

        if let Some(state) = &core.srq {
            if state.transport == transport {
                return Ok(state.receiver.clone());
            }
        }
        // A shut-down service would accept the registration into a cleared
        // map and never deliver; refuse up front.
        if !service.is_running() {
            return Err(Error::SrqServiceStopped);
        }
        // Switching transport: rebuild the interrupt channel from scratch
        if let Some(old) = core.srq.take() {
            old.service.unsubscribe(&handle);
            Self::srq_server_disable(core, &handle).await?;
        }

        let local_ip = match core.local_ip {
            IpAddr::V4(ip) => ip,
            IpAddr::V6(_) => return Err(Error::NoIpv4),
        };
        let (host_port, prog_family) = match transport {
            SrqTransport::Tcp => (service.tcp_port(), DeviceAddrFamily::Tcp),
            SrqTransport::Udp => (service.udp_port(), DeviceAddrFamily::Udp),
        };

        let parms = DeviceRemoteFunc {
            host_addr: u32::from(local_ip),
            host_port,
            prog_num: DEVICE_INTR,
            prog_vers: DEVICE_INTR_VERSION,
            prog_family,
        };
        let resp: DeviceError = rpc_timeout(core.rpc.call(CREATE_INTR_CHAN, parms)).await?;
        check(resp.error)?;

        let parms = DeviceEnableSrqParms {
            lid: core.lid,
            enable: true,
            handle: Opaque(handle.to_vec()),
        };
        let resp: DeviceError = rpc_timeout(core.rpc.call(DEVICE_ENABLE_SRQ, parms)).await?;
        if let Err(err) = check(resp.error) {
            // Do not leave a half-built interrupt channel behind
            let _ = rpc_timeout(core.rpc.call::<_, DeviceError>(DESTROY_INTR_CHAN, ())).await;
            return Err(err);
        }

        let receiver = service.subscribe(&handle);
        core.srq = Some(SrqState {
            service: service.clone(),
            transport,
            receiver: receiver.clone(),
        });
        log::debug!("SRQ enabled over {:?} on link {}", transport, core.lid.0);
        Ok(receiver)
    }

    /// Disable service requests. The local registration is dropped even if
    /// the server-side teardown fails. Disabling twice is a no-op.
    pub async fn disable_srq(&self) -> Result<(), Error> {
        let mut guard = self.core.lock().await;
        let core = guard.as_mut().ok_or(Error::NotOpen)?;
        let Some(state) = core.srq.take() else {
            return Ok(());
        };
        let handle = self.srq_handle();
        state.service.unsubscribe(&handle);
        Self::srq_server_disable(core, &handle).await
    }

    async fn srq_server_disable(core: &mut CoreChannel, handle: &[u8]) -> Result<(), Error> {
        let parms = DeviceEnableSrqParms {
            lid: core.lid,
            enable: false,
            handle: Opaque(handle.to_vec()),
        };
        let resp: DeviceError = rpc_timeout(core.rpc.call(DEVICE_ENABLE_SRQ, parms)).await?;
        check(resp.error)?;
        let resp: DeviceError = rpc_timeout(core.rpc.call(DESTROY_INTR_CHAN, ())).await?;
        check(resp.error)
    }

    async fn docmd(&self, cmd: i32, datasize: u32, data_in: Vec<u8>) -> Result<Vec<u8>, Error> {
        let mut guard = self.core.lock().await;
        let core = guard.as_mut().ok_or(Error::NotOpen)?;
        let parms = DeviceDocmdParms {
            lid: core.lid,
            flags: DeviceFlags::default(),
            io_timeout: self.io_timeout_ms.load(Ordering::Relaxed),
            lock_timeout: self.lock_timeout_ms.load(Ordering::Relaxed),
            cmd,
            // Payloads are little-endian byte streams
            network_order: false,
            datasize,
            data_in: Opaque(data_in),
        };
        let resp: DeviceDocmdResp = rpc_timeout(core.rpc.call(DEVICE_DOCMD, parms)).await?;
        check(resp.error)?;
        Ok(resp.data_out.into_inner())
    }

    /// Send raw GPIB command bytes with ATN asserted (gateway interfaces).
    pub async fn docmd_send_command(&self, commands: &[u8]) -> Result<(), Error> {
        self.docmd(DOCMD_SEND_COMMAND, 1, commands.to_vec())
            .await
            .map(drop)
    }

    /// Read one GPIB bus condition.
    pub async fn docmd_bus_status(&self, which: BusStatus) -> Result<i16, Error> {
        let mut payload = vec![0u8; 2];
        LittleEndian::write_i16(&mut payload, which as i16);
        let out = self.docmd(DOCMD_BUS_STATUS, 2, payload).await?;
        if out.len() < 2 {
            return Err(Error::DocmdUnderrun);
        }
        Ok(LittleEndian::read_i16(&out))
    }

    /// Assert or release the ATN line.
    pub async fn docmd_atn_control(&self, assert: bool) -> Result<(), Error> {
        let mut payload = vec![0u8; 2];
        LittleEndian::write_i16(&mut payload, assert as i16);
        self.docmd(DOCMD_ATN_CONTROL, 2, payload).await.map(drop)
    }

    /// Assert or release the REN line.
    pub async fn docmd_ren_control(&self, assert: bool) -> Result<(), Error> {
        let mut payload = vec![0u8; 2];
        LittleEndian::write_i16(&mut payload, assert as i16);
        self.docmd(DOCMD_REN_CONTROL, 2, payload).await.map(drop)
    }

    /// Pass controller-in-charge to the device at `addr`.
    pub async fn docmd_pass_control(&self, addr: u32) -> Result<(), Error> {
        let mut payload = vec![0u8; 4];
        LittleEndian::write_u32(&mut payload, addr);
        self.docmd(DOCMD_PASS_CONTROL, 4, payload).await.map(drop)
    }

    /// Set the interface's own bus address (0..=30).
    pub async fn docmd_bus_address(&self, addr: u32) -> Result<(), Error> {
        let mut payload = vec![0u8; 4];
        LittleEndian::write_u32(&mut payload, addr);
        self.docmd(DOCMD_BUS_ADDRESS, 4, payload).await.map(drop)
    }

    /// Pulse the IFC line.
    pub async fn docmd_ifc_control(&self) -> Result<(), Error> {
        self.docmd(DOCMD_IFC_CONTROL, 0, Vec::new()).await.map(drop)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(guard) = self.core.try_lock() {
            if guard.is_some() {
                log::warn!("Session dropped while open; call close() to destroy the link");
            }
        }
    }
}

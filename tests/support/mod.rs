//! In-process mock instrument: scripted CORE and ASYNC services the real
//! client runs against over loopback TCP.

#![allow(dead_code)]

use std::{
    collections::VecDeque,
    io::Cursor,
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use async_std::{
    channel::Receiver,
    net::TcpListener,
    task,
};
use async_trait::async_trait;

use vxi11_client::common::{
    onc_rpc::prelude::*,
    vxi11::{
        xdr::{
            CreateLinkParms, CreateLinkResp, DeviceDocmdParms, DeviceDocmdResp, DeviceError,
            DeviceErrorCode, DeviceLink, DeviceLockParms, DeviceReadParms, DeviceReadResp,
            DeviceReadStbResp, DeviceRemoteFunc, DeviceWriteParms, DeviceWriteResp,
            DeviceEnableSrqParms, DeviceGenericParms,
        },
        CREATE_INTR_CHAN, CREATE_LINK, DESTROY_INTR_CHAN, DESTROY_LINK, DEVICE_ABORT,
        DEVICE_ASYNC, DEVICE_ASYNC_VERSION, DEVICE_CLEAR, DEVICE_CORE, DEVICE_CORE_VERSION,
        DEVICE_DOCMD, DEVICE_ENABLE_SRQ, DEVICE_LOCAL, DEVICE_LOCK, DEVICE_READ, DEVICE_READSTB,
        DEVICE_REMOTE, DEVICE_TRIGGER, DEVICE_UNLOCK, DEVICE_WRITE,
    },
    xdr::prelude::*,
};

pub const MOCK_LID: u32 = 7;
pub const MOCK_STB: u8 = 0x42;

/// Everything the mock records and every scripted reply.
#[derive(Default)]
pub struct CoreState {
    pub create_links: Vec<CreateLinkParms>,
    /// Next `create_link` error; `NoError` when empty
    pub link_errors: VecDeque<DeviceErrorCode>,

    /// `(flags, payload)` of every `device_write`
    pub writes: Vec<(u32, Vec<u8>)>,
    /// Scripted partial acceptance; a full accept when empty
    pub write_accepts: VecDeque<u32>,

    pub read_parms: Vec<DeviceReadParms>,
    pub reads: VecDeque<DeviceReadResp>,

    pub generic_procs: Vec<u32>,
    pub locks: Vec<DeviceLockParms>,
    pub unlocks: u32,

    pub docmds: Vec<DeviceDocmdParms>,
    pub docmd_out: VecDeque<Vec<u8>>,

    pub srq_enables: Vec<(bool, Vec<u8>)>,
    pub intr_chans: Vec<DeviceRemoteFunc>,
    pub destroy_intr_chans: u32,

    pub destroy_links: u32,
}

/// Scripted `DEVICE_CORE` service for one mock instrument.
pub struct MockCoreServer {
    pub max_recv_size: u32,
    pub abort_port: u16,
    pub state: Mutex<CoreState>,
    /// When a read finds no scripted reply, wait here and then answer with
    /// code 23 — models a slow transfer interrupted by `device_abort`.
    pub abort_signal: Option<Receiver<()>>,
}

impl MockCoreServer {
    pub fn new(max_recv_size: u32) -> Arc<Self> {
        Arc::new(Self {
            max_recv_size,
            abort_port: 0,
            state: Mutex::new(CoreState::default()),
            abort_signal: None,
        })
    }

    pub fn read_reply(error: DeviceErrorCode, reason: u32, data: &[u8]) -> DeviceReadResp {
        DeviceReadResp {
            error,
            reason,
            data: Opaque(data.to_vec()),
        }
    }

    pub fn script_read(&self, reason: u32, data: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .reads
            .push_back(Self::read_reply(DeviceErrorCode::NoError, reason, data));
    }
}

#[async_trait]
impl RpcService for MockCoreServer {
    async fn call(
        self: Arc<Self>,
        prog: u32,
        vers: u32,
        proc: u32,
        args: &mut Cursor<Vec<u8>>,
        ret: &mut Cursor<Vec<u8>>,
    ) -> Result<(), RpcError>
    where
        Self: Sync,
    {
        if prog != DEVICE_CORE {
            return Err(RpcError::ProgUnavail);
        }
        if vers != DEVICE_CORE_VERSION {
            return Err(RpcError::ProgMismatch(MismatchInfo::new(
                DEVICE_CORE_VERSION,
                DEVICE_CORE_VERSION,
            )));
        }

        match proc {
            0 => Ok(()),
            CREATE_LINK => {
                let mut parms = CreateLinkParms::default();
                parms.read_xdr(args)?;
                let error = {
                    let mut state = self.state.lock().unwrap();
                    state.create_links.push(parms);
                    state
                        .link_errors
                        .pop_front()
                        .unwrap_or(DeviceErrorCode::NoError)
                };
                CreateLinkResp {
                    error,
                    lid: DeviceLink(MOCK_LID),
                    abort_port: self.abort_port,
                    max_recv_size: self.max_recv_size,
                }
                .write_xdr(ret)?;
                Ok(())
            }
            DEVICE_WRITE => {
                let mut parms = DeviceWriteParms::default();
                parms.read_xdr(args)?;
                let size = {
                    let mut state = self.state.lock().unwrap();
                    let offered = parms.data.len() as u32;
                    state.writes.push((parms.flags.0, parms.data.0.clone()));
                    state.write_accepts.pop_front().unwrap_or(offered)
                };
                DeviceWriteResp {
                    error: DeviceErrorCode::NoError,
                    size,
                }
                .write_xdr(ret)?;
                Ok(())
            }
            DEVICE_READ => {
                let mut parms = DeviceReadParms::default();
                parms.read_xdr(args)?;
                let scripted = {
                    let mut state = self.state.lock().unwrap();
                    state.read_parms.push(parms);
                    state.reads.pop_front()
                };
                let resp = match scripted {
                    Some(resp) => resp,
                    None => match &self.abort_signal {
                        Some(signal) => {
                            let _ = signal.recv().await;
                            Self::read_reply(DeviceErrorCode::Abort, 0, b"")
                        }
                        None => Self::read_reply(DeviceErrorCode::IoError, 0, b""),
                    },
                };
                resp.write_xdr(ret)?;
                Ok(())
            }
            DEVICE_READSTB => {
                let mut parms = DeviceGenericParms::default();
                parms.read_xdr(args)?;
                self.state.lock().unwrap().generic_procs.push(proc);
                DeviceReadStbResp {
                    error: DeviceErrorCode::NoError,
                    stb: MOCK_STB,
                }
                .write_xdr(ret)?;
                Ok(())
            }
            DEVICE_TRIGGER | DEVICE_CLEAR | DEVICE_REMOTE | DEVICE_LOCAL => {
                let mut parms = DeviceGenericParms::default();
                parms.read_xdr(args)?;
                self.state.lock().unwrap().generic_procs.push(proc);
                DeviceError::default().write_xdr(ret)?;
                Ok(())
            }
            DEVICE_LOCK => {
                let mut parms = DeviceLockParms::default();
                parms.read_xdr(args)?;
                self.state.lock().unwrap().locks.push(parms);
                DeviceError::default().write_xdr(ret)?;
                Ok(())
            }
            DEVICE_UNLOCK => {
                let mut parms = DeviceLink::default();
                parms.read_xdr(args)?;
                self.state.lock().unwrap().unlocks += 1;
                DeviceError::default().write_xdr(ret)?;
                Ok(())
            }
            DEVICE_ENABLE_SRQ => {
                let mut parms = DeviceEnableSrqParms::default();
                parms.read_xdr(args)?;
                self.state
                    .lock()
                    .unwrap()
                    .srq_enables
                    .push((parms.enable, parms.handle.0.clone()));
                DeviceError::default().write_xdr(ret)?;
                Ok(())
            }
            CREATE_INTR_CHAN => {
                let mut parms = DeviceRemoteFunc::default();
                parms.read_xdr(args)?;
                self.state.lock().unwrap().intr_chans.push(parms);
                DeviceError::default().write_xdr(ret)?;
                Ok(())
            }
            DESTROY_INTR_CHAN => {
                self.state.lock().unwrap().destroy_intr_chans += 1;
                DeviceError::default().write_xdr(ret)?;
                Ok(())
            }
            DEVICE_DOCMD => {
                let mut parms = DeviceDocmdParms::default();
                parms.read_xdr(args)?;
                let data_out = {
                    let mut state = self.state.lock().unwrap();
                    state.docmds.push(parms);
                    state.docmd_out.pop_front().unwrap_or_default()
                };
                DeviceDocmdResp {
                    error: DeviceErrorCode::NoError,
                    data_out: Opaque(data_out),
                }
                .write_xdr(ret)?;
                Ok(())
            }
            DESTROY_LINK => {
                let mut parms = DeviceLink::default();
                parms.read_xdr(args)?;
                self.state.lock().unwrap().destroy_links += 1;
                DeviceError::default().write_xdr(ret)?;
                Ok(())
            }
            _ => Err(RpcError::ProcUnavail),
        }
    }
}

/// `DEVICE_ASYNC` mock: records aborted links and wakes the core mock.
pub struct MockAsyncServer {
    pub aborts: Mutex<Vec<u32>>,
    pub wake: async_std::channel::Sender<()>,
}

#[async_trait]
impl RpcService for MockAsyncServer {
    async fn call(
        self: Arc<Self>,
        prog: u32,
        vers: u32,
        proc: u32,
        args: &mut Cursor<Vec<u8>>,
        ret: &mut Cursor<Vec<u8>>,
    ) -> Result<(), RpcError>
    where
        Self: Sync,
    {
        if prog != DEVICE_ASYNC {
            return Err(RpcError::ProgUnavail);
        }
        if vers != DEVICE_ASYNC_VERSION {
            return Err(RpcError::ProgMismatch(MismatchInfo::new(
                DEVICE_ASYNC_VERSION,
                DEVICE_ASYNC_VERSION,
            )));
        }

        match proc {
            0 => Ok(()),
            DEVICE_ABORT => {
                let mut parms = DeviceLink::default();
                parms.read_xdr(args)?;
                self.aborts.lock().unwrap().push(parms.0);
                let _ = self.wake.try_send(());
                DeviceError::default().write_xdr(ret)?;
                Ok(())
            }
            _ => Err(RpcError::ProcUnavail),
        }
    }
}

/// Serve `service` on an ephemeral loopback port; returns the bound address.
pub async fn spawn_tcp<S>(service: Arc<S>) -> SocketAddr
where
    S: RpcService + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    task::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let s = service.clone();
            task::spawn(async move {
                let _ = s.serve_tcp_stream(stream).await;
            });
        }
    });
    addr
}

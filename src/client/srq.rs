//! Embedded interrupt channel service.
//!
//! SRQ inverts the client/server roles: the instrument acts as an RPC client
//! of the `DEVICE_INTR` program and calls `device_intr_srq` with the opaque
//! handle supplied at enable time. One [`SrqService`] per process is enough;
//! every session that enables SRQ registers its handle here and interrupts
//! are demultiplexed back to the owning session's event channel.
//!
//! Handles never carry addresses or pointers: a session's handle is the
//! big-endian encoding of a process-unique 64-bit id, and the registry maps
//! those bytes to an event sender.

use std::{
    collections::HashMap,
    io::{self, Cursor},
    net::IpAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_listen::ListenExt;
use async_std::{
    channel::{bounded, Receiver, Sender},
    net::{TcpListener, ToSocketAddrs, UdpSocket},
    stream::StreamExt,
    task::{self, JoinHandle},
};
use async_trait::async_trait;

use super::portmapper::PortMapperClient;
use crate::common::{
    onc_rpc::prelude::*,
    portmapper::{xdr::Mapping, PORTMAPPER_PROT_TCP, PORTMAPPER_PROT_UDP},
    vxi11::{xdr::DeviceSrqParms, DEVICE_INTR, DEVICE_INTR_SRQ, DEVICE_INTR_VERSION, SRQ_HANDLE_MAX},
    xdr::prelude::*,
};

/// Width of the handles this service hands out; interrupts carrying any
/// other width cannot be ours and are dropped.
pub(crate) const SRQ_HANDLE_WIDTH: usize = 8;
const _: () = assert!(SRQ_HANDLE_WIDTH <= SRQ_HANDLE_MAX);

/// Receiving end of a session's interrupt events. Events are edge
/// triggered: interrupts arriving while one is already pending coalesce.
pub type SrqReceiver = Receiver<()>;

/// Process-wide interrupt channel service: one TCP listener and one UDP
/// socket on ephemeral ports, served by background tasks.
pub struct SrqService {
    tcp_port: u16,
    udp_port: u16,
    running: AtomicBool,
    listeners: Mutex<HashMap<Vec<u8>, Sender<()>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SrqService {
    /// Bind the interrupt transports on `bind` and spawn the dispatch tasks.
    pub async fn start(bind: IpAddr) -> io::Result<Arc<Self>> {
        let tcp = TcpListener::bind((bind, 0)).await?;
        let udp = UdpSocket::bind((bind, 0)).await?;

        let service = Arc::new(Self {
            tcp_port: tcp.local_addr()?.port(),
            udp_port: udp.local_addr()?.port(),
            running: AtomicBool::new(true),
            listeners: Mutex::new(HashMap::new()),
            tasks: Mutex::new(Vec::new()),
        });

        let tcp_task = {
            let s = service.clone();
            task::spawn(async move {
                if let Err(err) = s.serve_tcp(tcp).await {
                    log::warn!("Interrupt TCP service stopped: {}", err);
                }
            })
        };
        let udp_task = {
            let s = service.clone();
            task::spawn(async move {
                if let Err(err) = s.serve_udp_socket(udp).await {
                    log::warn!("Interrupt UDP service stopped: {}", err);
                }
            })
        };
        service
            .tasks
            .lock()
            .unwrap()
            .extend([tcp_task, udp_task]);

        Ok(service)
    }

    /// Port of the TCP interrupt transport.
    pub fn tcp_port(&self) -> u16 {
        self.tcp_port
    }

    /// Port of the UDP interrupt transport.
    pub fn udp_port(&self) -> u16 {
        self.udp_port
    }

    /// Advertise both transports with the system portmapper, replacing any
    /// stale `(DEVICE_INTR, 1)` entries.
    pub async fn register_portmap(&self, addrs: impl ToSocketAddrs) -> Result<(), RpcError> {
        let mut portmap = PortMapperClient::connect_tcp(addrs).await?;
        portmap
            .register(Mapping::new(
                DEVICE_INTR,
                DEVICE_INTR_VERSION,
                PORTMAPPER_PROT_TCP,
                self.tcp_port as u32,
            ))
            .await?;
        portmap
            .register(Mapping::new(
                DEVICE_INTR,
                DEVICE_INTR_VERSION,
                PORTMAPPER_PROT_UDP,
                self.udp_port as u32,
            ))
            .await?;
        Ok(())
    }

    /// Withdraw the portmapper entries registered by [`register_portmap`].
    ///
    /// [`register_portmap`]: Self::register_portmap
    pub async fn unregister_portmap(&self, addrs: impl ToSocketAddrs) -> Result<(), RpcError> {
        let mut portmap = PortMapperClient::connect_tcp(addrs).await?;
        portmap
            .unset(Mapping::new(
                DEVICE_INTR,
                DEVICE_INTR_VERSION,
                PORTMAPPER_PROT_TCP,
                0,
            ))
            .await?;
        portmap
            .unset(Mapping::new(
                DEVICE_INTR,
                DEVICE_INTR_VERSION,
                PORTMAPPER_PROT_UDP,
                0,
            ))
            .await?;
        Ok(())
    }

    /// Whether the dispatch tasks are still serving. False after
    /// [`shutdown`](Self::shutdown); enabling SRQ requires a running service.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Cancel the dispatch tasks and drop all registrations. Sessions that
    /// still believe SRQ is enabled will stop receiving events.
    pub async fn shutdown(&self) {
        self.running.store(false, Ordering::Relaxed);
        let tasks: Vec<_> = self.tasks.lock().unwrap().drain(..).collect();
        for task in tasks {
            task.cancel().await;
        }
        self.listeners.lock().unwrap().clear();
        log::debug!("Interrupt service stopped");
    }

    async fn serve_tcp(self: Arc<Self>, listener: TcpListener) -> io::Result<()> {
        log::debug!("Interrupt service on tcp {}", listener.local_addr()?);
        let mut incoming = listener
            .incoming()
            .log_warnings(|warn| log::warn!("Interrupt listener error: {}", warn))
            .handle_errors(Duration::from_millis(100))
            .backpressure(10);

        while let Some((token, stream)) = incoming.next().await {
            let peer = stream.peer_addr()?;
            log::debug!("Interrupt channel from {}", peer);

            let s = self.clone();
            task::spawn(async move {
                if let Err(err) = s.serve_tcp_stream(stream).await {
                    // Instruments drop the channel when done; EOF is routine
                    log::debug!("Interrupt channel {} closed: {}", peer, err);
                }
                drop(token);
            });
        }
        Ok(())
    }

    /// Register `handle` and hand back the event channel it feeds.
    pub(crate) fn subscribe(&self, handle: &[u8]) -> SrqReceiver {
        let (sender, receiver) = bounded(1);
        self.listeners
            .lock()
            .unwrap()
            .insert(handle.to_vec(), sender);
        receiver
    }

    pub(crate) fn unsubscribe(&self, handle: &[u8]) {
        self.listeners.lock().unwrap().remove(handle);
    }

    fn dispatch(&self, handle: &[u8]) {
        let listeners = self.listeners.lock().unwrap();
        match listeners.get(handle) {
            Some(sender) => {
                // A pending event already wakes the session; coalesce
                if sender.try_send(()).is_err() {
                    log::debug!("Interrupt coalesced or listener gone");
                }
            }
            None => log::debug!("Interrupt for unregistered handle {:02x?}", handle),
        }
    }
}

#[async_trait]
impl RpcService for SrqService {
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
        if prog != DEVICE_INTR {
            return Err(RpcError::ProgUnavail);
        }
        if vers != DEVICE_INTR_VERSION {
            return Err(RpcError::ProgMismatch(MismatchInfo::new(
                DEVICE_INTR_VERSION,
                DEVICE_INTR_VERSION,
            )));
        }

        match proc {
            0 => Ok(()),
            DEVICE_INTR_SRQ => {
                let mut parms = DeviceSrqParms::default();
                parms.read_xdr(args)?;

                if parms.handle.len() != SRQ_HANDLE_WIDTH {
                    log::warn!(
                        "Dropping interrupt with unexpected handle width {}",
                        parms.handle.len()
                    );
                } else {
                    self.dispatch(&parms.handle);
                }

                ().write_xdr(ret)?;
                Ok(())
            }
            _ => Err(RpcError::ProcUnavail),
        }
    }
}

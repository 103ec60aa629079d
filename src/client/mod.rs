//! Client-side protocol engines: the per-instrument [`Session`], the
//! process-wide [`SrqService`] and the portmapper client.

pub mod portmapper;
pub mod session;
pub mod srq;

pub use session::{BusStatus, Error, ReadTerminator, Session, SrqTransport, DEFAULT_DEVICE};
pub use srq::{SrqReceiver, SrqService};

pub mod prelude {
    pub use super::portmapper::PortMapperClient;
    pub use super::session::{
        BusStatus, Error, ReadTerminator, Session, SrqTransport, DEFAULT_DEVICE,
    };
    pub use super::srq::{SrqReceiver, SrqService};
    pub use crate::common::vxi11::xdr::DeviceErrorCode;
}

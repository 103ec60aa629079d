//! XDR serialization used by every wire structure in this crate.

pub mod basic;

pub mod prelude {
    pub use super::basic::{Opaque, XdrDecode, XdrEncode};
    pub use byteorder::{NetworkEndian, ReadBytesExt, WriteBytesExt};
}

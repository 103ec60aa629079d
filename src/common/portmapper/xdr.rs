//! Portmapper XDR types, see [RFC1833](https://datatracker.ietf.org/doc/html/rfc1833).

use std::io::{Read, Result, Write};

use crate::common::xdr::prelude::*;

/// One (program, version, protocol) → port mapping.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Mapping {
    pub prog: u32,
    pub vers: u32,
    pub prot: u32,
    pub port: u32,
}

impl Mapping {
    pub fn new(prog: u32, vers: u32, prot: u32, port: u32) -> Self {
        Self {
            prog,
            vers,
            prot,
            port,
        }
    }
}

impl XdrEncode for Mapping {
    fn write_xdr<WR>(&self, writer: &mut WR) -> Result<()>
    where
        WR: Write,
    {
        self.prog.write_xdr(writer)?;
        self.vers.write_xdr(writer)?;
        self.prot.write_xdr(writer)?;
        self.port.write_xdr(writer)
    }
}

impl XdrDecode for Mapping {
    fn read_xdr<RD>(&mut self, reader: &mut RD) -> Result<()>
    where
        RD: Read,
    {
        self.prog.read_xdr(reader)?;
        self.vers.read_xdr(reader)?;
        self.prot.read_xdr(reader)?;
        self.port.read_xdr(reader)
    }
}

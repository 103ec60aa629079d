use std::net::{IpAddr, Ipv4Addr};

use clap::Parser;

use vxi11_client::client::prelude::*;

/// Wait for service requests and serial-poll each one
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Instrument host name or address
    host: String,

    /// Device sub-address
    #[clap(short, long)]
    device: Option<String>,

    /// Deliver interrupts over UDP instead of TCP
    #[clap(short, long)]
    udp: bool,
}

#[async_std::main]
async fn main() -> Result<(), Error> {
    femme::with_level(log::LevelFilter::Debug);
    let args = Args::parse();

    let session = Session::connect(&args.host, args.device.as_deref()).await?;

    let srq = SrqService::start(IpAddr::V4(Ipv4Addr::UNSPECIFIED)).await?;
    let transport = if args.udp {
        SrqTransport::Udp
    } else {
        SrqTransport::Tcp
    };
    let events = session.enable_srq(&srq, transport).await?;

    // Typical setup: assert SRQ on any event; instrument-specific
    session.write_str("*SRE 255").await?;
    println!("Waiting for service requests, ^C to quit");

    while events.recv().await.is_ok() {
        let stb = session.readstb().await?;
        println!("service request, status byte {:#04x}", stb);
    }

    session.disable_srq().await?;
    session.close().await
}

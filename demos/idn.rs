use std::time::Duration;

use clap::Parser;

use vxi11_client::client::prelude::*;

/// Query an instrument's identification over VXI-11
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Instrument host name or address
    host: String,

    /// Device sub-address ("inst0", or "gpib0,9" behind a gateway)
    #[clap(short, long)]
    device: Option<String>,

    /// I/O timeout in seconds
    #[clap(short, long, default_value_t = 10)]
    timeout: u64,
}

#[async_std::main]
async fn main() -> Result<(), Error> {
    femme::with_level(log::LevelFilter::Debug);
    let args = Args::parse();

    let session = Session::connect(&args.host, args.device.as_deref()).await?;
    session.set_timeout(Duration::from_secs(args.timeout));

    let idn = session.query("*IDN?", 1000).await?;
    println!("{}", idn.trim_end());

    session.close().await
}

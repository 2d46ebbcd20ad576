use std::rc::Rc;

use clap::Parser;
use color_eyre::Result;
use log::info;

use teleserver::{Server, SystemClock};

#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
struct Args {
    /// UDP port to listen on (0 picks an ephemeral port)
    #[clap(long, default_value_t = teleserver::coap::DEFAULT_PORT)]
    port: u16,

    /// enable INFO diagnostics including per-datagram RX/TX lines
    #[clap(long)]
    verbose: bool,
}

fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    // RUST_LOG still wins over --verbose when both are given
    let default_filter = if args.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let clock = Rc::new(SystemClock::new());
    let mut server = Server::new(args.port, clock)?;
    info!("teleserver ready on UDP/{}", server.port());

    // runs until the process is terminated externally
    server.run(-1)?;
    Ok(())
}

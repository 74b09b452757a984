use std::{error::Error, net::SocketAddr, path::PathBuf, process};

use clap::Parser;
use env_logger::Env;
use log::info;
use shuttle::{FileStore, TransferServer};

#[derive(Debug, Parser)]
#[command(version, about = "Serve files over the shuttle protocol", long_about = None)]
struct Cli {
    /// Listen for new connections at address
    address: SocketAddr,
    /// Path to storage directory, created if missing
    #[arg(default_value = ".")]
    path: PathBuf,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    ctrlc::set_handler(|| {
        info!("shutting down");
        process::exit(0);
    })?;

    let store = FileStore::open(cli.path)?;
    let server = TransferServer::bind(cli.address, store)?;

    server.listen()?;
    Ok(())
}

use std::{io, path::PathBuf, process::ExitCode};

use clap::{Parser, Subcommand};
use env_logger::Env;
use log::error;
use shuttle::{Client, protocol::ClientError};

#[derive(Debug, Parser)]
#[command(version, about = "Store and retrieve files on a shuttle server", long_about = None)]
struct Cli {
    /// Server address, e.g. 127.0.0.1:9000
    server: String,
    #[command(subcommand)]
    action: Action,
}

#[derive(Debug, Subcommand)]
enum Action {
    /// Upload a local file
    Put {
        /// File to upload
        file: PathBuf,
    },
    /// Download a file from the server
    Get {
        /// Name of the file on the server
        file: String,
        /// Existing directory to download into
        #[arg(default_value = ".")]
        dest: PathBuf,
    },
}

fn run(cli: Cli) -> Result<(), ClientError> {
    if let Action::Get { dest, .. } = &cli.action {
        if !dest.is_dir() {
            let reason = format!("destination is not a directory: {}", dest.display());
            return Err(io::Error::other(reason).into());
        }
    }

    let mut client = Client::connect(cli.server.as_str())?;
    match &cli.action {
        Action::Put { file } => {
            client.put(file)?;
            println!("Storage complete!");
        }
        Action::Get { file, dest } => {
            let summary = client.get(file, dest)?;
            println!("Retrieved {}", summary.path.display());
        }
    }
    client.close()
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

use std::{
    fs::{self, File},
    io::{self, Read, Write},
    net::{TcpStream, ToSocketAddrs},
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use log::{info, warn};
use thiserror::Error;

use crate::{
    checksum::{self, HashingWriter},
    store::{PartialFile, base_name},
};

use super::{Message, PayloadError, ProtocolTransport, Response, TransportError};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("local file error: {0}")]
    Io(#[from] io::Error),
    #[error("'{}' already exists", .0.display())]
    FileExists(PathBuf),
    #[error("'{0}' does not name a file")]
    InvalidFileName(String),
    #[error("server rejected request: {0}")]
    Rejected(String),
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },
    #[error("expected {expected} but received {found}")]
    UnexpectedMessage {
        expected: &'static str,
        found: &'static str,
    },
}

impl From<PayloadError> for ClientError {
    fn from(value: PayloadError) -> Self {
        match value {
            PayloadError::Transport(e) => ClientError::Transport(e),
            PayloadError::Local(e) => ClientError::Io(e),
        }
    }
}

/// Result of a completed PUT or GET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSummary {
    /// Name of the file on the server.
    pub file_name: String,
    /// Local file that was uploaded or written.
    pub path: PathBuf,
    pub bytes: u64,
    pub checksum: Vec<u8>,
    pub elapsed: Duration,
}

/// Initiating side of a connection. Runs one PUT or GET at a time.
pub struct Client<T: Read + Write> {
    transport: ProtocolTransport<T>,
}

impl Client<TcpStream> {
    pub fn connect<A: ToSocketAddrs>(address: A) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(address).map_err(TransportError::from)?;
        if let Ok(peer) = stream.peer_addr() {
            info!("connected to {peer}");
        }
        Ok(Self::new(stream))
    }
}

impl<T: Read + Write> Client<T> {
    pub fn new(stream: T) -> Self {
        Self {
            transport: ProtocolTransport::new(stream),
        }
    }

    /// Uploads `path` to the server under its base name.
    pub fn put(&mut self, path: &Path) -> Result<TransferSummary, ClientError> {
        info!("PUT {}", path.display());
        let start = Instant::now();

        let metadata = fs::metadata(path)?;
        if !metadata.is_file() {
            return Err(ClientError::InvalidFileName(path.display().to_string()));
        }
        let file_name = path
            .to_str()
            .and_then(base_name)
            .ok_or_else(|| ClientError::InvalidFileName(path.display().to_string()))?;
        let size = metadata.len();
        let checksum = checksum::digest_reader(&mut File::open(path)?)?;

        self.transport.send(&Message::StorageRequest {
            file_name: file_name.clone(),
            size,
            checksum: checksum.clone(),
        })?;
        let ready = self.receive_response()?;
        if !ready.ok {
            return Err(ClientError::Rejected(ready.message));
        }

        let mut file = File::open(path)?;
        self.transport.send_payload(&mut file, size)?;

        let done = self.receive_response()?;
        if !done.ok {
            return Err(ClientError::Rejected(done.message));
        }

        let elapsed = start.elapsed();
        info!("PUT completed in {:.3} seconds", elapsed.as_secs_f64());
        Ok(TransferSummary {
            file_name,
            path: path.to_path_buf(),
            bytes: size,
            checksum,
            elapsed,
        })
    }

    /// Downloads `file_name` into `dest_dir`, which must already exist.
    ///
    /// The local file is created exclusively and removed again if the
    /// transfer fails or its checksum does not match.
    pub fn get(
        &mut self,
        file_name: &str,
        dest_dir: &Path,
    ) -> Result<TransferSummary, ClientError> {
        info!("GET {file_name}");
        let start = Instant::now();

        let remote =
            base_name(file_name).ok_or_else(|| ClientError::InvalidFileName(file_name.into()))?;
        self.transport.send(&Message::RetrievalRequest {
            file_name: remote.clone(),
        })?;

        let (resp, size, expected) = match self.transport.receive()? {
            Some(Message::RetrievalResponse {
                resp,
                size,
                checksum,
            }) => (resp, size, checksum),
            Some(other) => {
                return Err(ClientError::UnexpectedMessage {
                    expected: "retrieval response",
                    found: other.kind(),
                });
            }
            None => return Err(TransportError::Closed.into()),
        };
        info!("{}", resp.message);
        if !resp.ok {
            return Err(ClientError::Rejected(resp.message));
        }

        let dest = dest_dir.join(&remote);
        let mut partial = PartialFile::create(dest.clone()).map_err(|e| match e.kind() {
            io::ErrorKind::AlreadyExists => ClientError::FileExists(dest.clone()),
            _ => ClientError::Io(e),
        })?;

        let mut sink = HashingWriter::new(&mut partial);
        self.transport.receive_payload(size, &mut sink)?;
        let actual = sink.finalize();

        if !checksum::verify(&expected, &actual) {
            warn!("FAILED to retrieve {remote}: invalid checksum");
            return Err(ClientError::ChecksumMismatch {
                expected: hex::encode(&expected),
                actual: hex::encode(&actual),
            });
        }
        let path = partial.persist()?;

        let elapsed = start.elapsed();
        info!("GET completed in {:.3} seconds", elapsed.as_secs_f64());
        info!("successfully retrieved file: {}", path.display());
        Ok(TransferSummary {
            file_name: remote,
            path,
            bytes: size,
            checksum: actual,
            elapsed,
        })
    }

    /// Tells the server the session is over.
    pub fn close(mut self) -> Result<(), ClientError> {
        self.transport.send_end()?;
        Ok(())
    }

    fn receive_response(&mut self) -> Result<Response, ClientError> {
        match self.transport.receive()? {
            Some(Message::Response(resp)) => {
                info!("{}", resp.message);
                Ok(resp)
            }
            Some(other) => Err(ClientError::UnexpectedMessage {
                expected: "response",
                found: other.kind(),
            }),
            None => Err(TransportError::Closed.into()),
        }
    }
}

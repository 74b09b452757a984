use std::{
    io::{self, Read, Seek, SeekFrom, Write},
    net::{SocketAddr, TcpListener, TcpStream},
    sync::Arc,
    thread,
};

use log::{debug, error, info, warn};
use thiserror::Error;

use crate::{
    checksum::{self, HashingWriter},
    store::{FileStore, base_name},
};

use super::{Message, PayloadError, ProtocolTransport, Response, TransportError};

/// Failure that ends a single session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("file error: {0}")]
    File(#[from] io::Error),
}

impl From<PayloadError> for SessionError {
    fn from(value: PayloadError) -> Self {
        match value {
            PayloadError::Transport(e) => SessionError::Transport(e),
            PayloadError::Local(e) => SessionError::File(e),
        }
    }
}

pub struct TransferServer {
    listener: TcpListener,
    store: Arc<FileStore>,
}

impl TransferServer {
    pub fn bind(address: SocketAddr, store: FileStore) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(address)?;
        Ok(Self {
            listener,
            store: Arc::new(store),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections forever, one session thread per connection.
    pub fn listen(self) -> Result<(), TransportError> {
        info!("listening at {}", self.local_addr()?);
        info!("storage directory: {}", self.store.root().display());

        for stream in self.listener.incoming() {
            match stream {
                Ok(stream) => self.spawn_session(stream),
                Err(e) => warn!("broken connection: {e:?}"),
            }
        }
        Ok(())
    }

    fn spawn_session(&self, stream: TcpStream) {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown peer".into());
        info!("accepted connection {peer}");

        let store = Arc::clone(&self.store);
        let name = format!("session-{peer}");
        let spawned = thread::Builder::new().name(name).spawn(move || {
            match handle_connection(stream, &store) {
                Ok(()) => info!("session with {peer} finished"),
                Err(e) => warn!("session with {peer} ended: {e}"),
            }
        });
        if let Err(e) = spawned {
            error!("failed to spawn session thread: {e}");
        }
    }
}

/// Serves requests from one peer until it ends the session.
///
/// Rejections are answered in-band and keep the session alive; transport and
/// decoding failures end it.
pub fn handle_connection<T: Read + Write>(
    stream: T,
    store: &FileStore,
) -> Result<(), SessionError> {
    let mut transport = ProtocolTransport::new(stream);

    loop {
        let Some(msg) = transport.receive()? else {
            debug!("received an empty message, terminating session");
            return Ok(());
        };
        debug!("received request: {msg}");

        match msg {
            Message::StorageRequest {
                file_name,
                size,
                checksum,
            } => handle_storage(&mut transport, store, &file_name, size, &checksum)?,
            Message::RetrievalRequest { file_name } => {
                handle_retrieval(&mut transport, store, &file_name)?
            }
            other => warn!("unexpected message type: {}", other.kind()),
        }
    }
}

fn reply<T: Read + Write>(
    transport: &mut ProtocolTransport<T>,
    resp: Response,
) -> Result<(), TransportError> {
    if !resp.ok {
        warn!("rejecting request: {}", resp.message);
    }
    transport.send(&resp.into())
}

fn handle_storage<T: Read + Write>(
    transport: &mut ProtocolTransport<T>,
    store: &FileStore,
    requested: &str,
    size: u64,
    expected: &[u8],
) -> Result<(), SessionError> {
    let Some(name) = base_name(requested) else {
        reply(transport, Response::reject("invalid file name"))?;
        return Ok(());
    };
    info!("attempting to store {name}");

    match store.available_bytes() {
        Ok(available) if available < size => {
            let reason =
                format!("not enough disk space: need {size} bytes, available {available} bytes");
            reply(transport, Response::reject(reason))?;
            return Ok(());
        }
        Ok(_) => {}
        Err(e) => {
            reply(transport, Response::reject(format!("failed to query disk space: {e}")))?;
            return Ok(());
        }
    }

    let mut partial = match store.create(&name) {
        Ok(partial) => partial,
        Err(e) => {
            reply(transport, Response::reject(format!("{name}: {e}")))?;
            return Ok(());
        }
    };

    reply(transport, Response::accept("Ready for data"))?;

    let mut sink = HashingWriter::new(&mut partial);
    match transport.receive_payload(size, &mut sink) {
        Ok(()) => {}
        Err(PayloadError::Local(e)) => {
            drop(partial);
            reply(
                transport,
                Response::reject(format!("failed writing file data: {e}")),
            )?;
            return Ok(());
        }
        Err(PayloadError::Transport(e)) => {
            drop(partial);
            let _ = reply(
                transport,
                Response::reject(format!("failed receiving file data: {e}")),
            );
            return Err(e.into());
        }
    }
    let actual = sink.finalize();

    if !checksum::verify(expected, &actual) {
        warn!(
            "FAILED to store {name}: expected checksum {}, computed {}",
            hex::encode(expected),
            hex::encode(&actual)
        );
        drop(partial);
        reply(transport, Response::reject("Checksum mismatch"))?;
        return Ok(());
    }

    match partial.persist() {
        Ok(path) => {
            info!("successfully stored {} ({size} bytes)", path.display());
            reply(transport, Response::accept("Storage complete"))?;
        }
        Err(e) => reply(transport, Response::reject(format!("failed to save {name}: {e}")))?,
    }
    Ok(())
}

fn handle_retrieval<T: Read + Write>(
    transport: &mut ProtocolTransport<T>,
    store: &FileStore,
    requested: &str,
) -> Result<(), SessionError> {
    let Some(name) = base_name(requested) else {
        transport.send(&Message::retrieval_rejected("invalid file name"))?;
        return Ok(());
    };
    info!("attempting to retrieve {name}");

    // opened before answering, so a missing file is never a half-sent payload
    let mut file = match store.open_file(&name) {
        Ok(file) if file.metadata().is_ok_and(|m| m.is_file()) => file,
        _ => {
            warn!("{name} not found");
            transport.send(&Message::retrieval_rejected("File not found"))?;
            return Ok(());
        }
    };

    let prepared = file.metadata().and_then(|metadata| {
        let checksum = checksum::digest_reader(&mut file)?;
        file.seek(SeekFrom::Start(0))?;
        Ok((metadata.len(), checksum))
    });
    let (size, checksum) = match prepared {
        Ok(prepared) => prepared,
        Err(e) => {
            warn!("failed to read {name}: {e}");
            transport.send(&Message::retrieval_rejected(format!("failed to read file: {e}")))?;
            return Ok(());
        }
    };

    transport.send(&Message::RetrievalResponse {
        resp: Response::accept("Ready to send"),
        size,
        checksum,
    })?;
    transport.send_payload(&mut file, size)?;

    info!("sent {name} ({size} bytes)");
    Ok(())
}

//! Client-server file transfer protocol.
//!
//! This module defines how a client stores files on (PUT) and retrieves files
//! from (GET) a server over a single persistent connection, with every file
//! verified end to end by its content checksum.
//!
//! # Key Components
//!
//! - [`Message`]: The closed set of framed messages exchanged by the peers.
//! - [`ProtocolTransport`]: Framed message channel that also streams raw payload bytes.
//! - [`Client`]: Initiating side, drives PUT and GET.
//! - [`TransferServer`]: Accept loop running one session per connection.
//!
//! # Binary Format
//!
//! - Each message is an 8 byte little-endian body length followed by the
//!   bincode encoded [`Message`]. The enum discriminant tags the variant.
//! - A zero-length frame ends the session.
//! - File content is never framed. It follows either an accepted
//!   [`Message::StorageRequest`] (client to server) or a successful
//!   [`Message::RetrievalResponse`] (server to client), and is exactly `size`
//!   bytes long as announced in that message.
//!
//! # Exchanges
//!
//! ```text
//! PUT  client: StorageRequest{name, size, checksum}
//!      server: Response{true, "Ready for data"}     (or false, and stop)
//!      client: <size raw bytes>
//!      server: Response{ok, ...}                     (ok only if checksum matched)
//!
//! GET  client: RetrievalRequest{name}
//!      server: RetrievalResponse{ok, size, checksum} (false: nothing follows)
//!      server: <size raw bytes>
//! ```
//!
//! Application level failures (missing file, name collision, checksum
//! mismatch, insufficient disk space) are always answered with `ok: false` and
//! leave the connection usable. Transport and decoding failures end the
//! session.
mod client;
mod message;
mod server;
mod transport;

pub use client::{Client, ClientError, TransferSummary};
pub use message::{Message, Response};
pub use server::{SessionError, TransferServer, handle_connection};
pub use transport::{
    LENGTH_PREFIX_SIZE, MAX_FRAME_SIZE, PAYLOAD_CHUNK_SIZE, PayloadError, ProtocolTransport,
    TransportError,
};

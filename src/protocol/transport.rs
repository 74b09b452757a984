use std::io::{self, Read, Write};

use bincode::{
    config::{Configuration, Fixint, LittleEndian},
    decode_from_slice, encode_to_vec,
};
use log::trace;
use thiserror::Error;

use super::Message;

/// Width of the little-endian length prefix in front of every frame.
pub const LENGTH_PREFIX_SIZE: usize = size_of::<u64>();
/// Largest frame body accepted from a peer.
pub const MAX_FRAME_SIZE: u64 = 16 * 1024 * 1024;
/// Chunk size used when streaming raw payload bytes.
pub const PAYLOAD_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to encode message: {0}")]
    Serialize(#[from] bincode::error::EncodeError),
    #[error("failed to decode message: {0}")]
    Deserialize(#[from] bincode::error::DecodeError),
    #[error("frame of {0} bytes exceeds the {max} byte limit", max = MAX_FRAME_SIZE)]
    FrameTooLarge(u64),
    #[error("{extra} unexpected trailing bytes after message")]
    TrailingBytes { extra: usize },
    #[error("connection closed mid-frame")]
    Closed,
    #[error("Transport IO Error: {0}")]
    Io(io::Error),
}

impl From<io::Error> for TransportError {
    fn from(value: io::Error) -> Self {
        match value.kind() {
            io::ErrorKind::UnexpectedEof => TransportError::Closed,
            _ => TransportError::Io(value),
        }
    }
}

/// Failure while streaming raw payload bytes.
#[derive(Debug, Error)]
pub enum PayloadError {
    /// The connection failed; it cannot carry further messages.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The local file failed.
    #[error("local file error: {0}")]
    Local(io::Error),
}

/// Framed message channel over a bidirectional byte stream.
///
/// Messages travel as an 8 byte little-endian length followed by the bincode
/// body. Raw payload bytes bypass framing entirely and are only exchanged when
/// both peers already know their exact length from a previous message.
pub struct ProtocolTransport<T: Read + Write> {
    stream: T,
    config: Configuration<LittleEndian, Fixint>,
}

impl<T: Read + Write> ProtocolTransport<T> {
    pub fn new(stream: T) -> Self {
        let config = bincode::config::standard()
            .with_little_endian()
            .with_fixed_int_encoding();
        Self { stream, config }
    }

    pub fn get_ref(&self) -> &T {
        &self.stream
    }

    pub fn send(&mut self, message: &Message) -> Result<(), TransportError> {
        let body = encode_to_vec(message, self.config)?;
        trace!("sending {} ({} byte frame)", message.kind(), body.len());

        self.write_raw(&(body.len() as u64).to_le_bytes())?;
        self.write_raw(&body)?;
        self.stream.flush()?;
        Ok(())
    }

    /// Sends the zero-length frame that ends a session.
    pub fn send_end(&mut self) -> Result<(), TransportError> {
        self.write_raw(&0u64.to_le_bytes())?;
        self.stream.flush()?;
        Ok(())
    }

    /// Reads the next message.
    ///
    /// Returns `None` when the peer ended the session, either with a
    /// zero-length frame or by closing the stream on a frame boundary.
    pub fn receive(&mut self) -> Result<Option<Message>, TransportError> {
        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        let mut filled = 0;
        while filled < LENGTH_PREFIX_SIZE {
            match self.stream.read(&mut prefix[filled..]) {
                Ok(0) if filled == 0 => return Ok(None),
                Ok(0) => return Err(TransportError::Closed),
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        let len = u64::from_le_bytes(prefix);
        if len == 0 {
            return Ok(None);
        }
        if len > MAX_FRAME_SIZE {
            return Err(TransportError::FrameTooLarge(len));
        }

        let mut body = vec![0u8; len as usize];
        self.read_raw(&mut body)?;

        let (message, read): (Message, usize) = decode_from_slice(&body, self.config)?;
        if read != body.len() {
            return Err(TransportError::TrailingBytes {
                extra: body.len() - read,
            });
        }
        trace!("received {} ({len} byte frame)", message.kind());
        Ok(Some(message))
    }

    /// Fills `buf` with raw bytes from the connection.
    pub fn read_raw(&mut self, buf: &mut [u8]) -> Result<(), TransportError> {
        self.stream.read_exact(buf)?;
        Ok(())
    }

    /// Writes all of `buf` as raw bytes.
    pub fn write_raw(&mut self, buf: &[u8]) -> Result<(), TransportError> {
        self.stream.write_all(buf)?;
        Ok(())
    }

    /// Streams exactly `size` bytes from `source` onto the connection.
    ///
    /// A source shorter than `size` is a local error; the peer is then left
    /// waiting for bytes and the connection must be abandoned.
    pub fn send_payload<R: Read>(
        &mut self,
        source: &mut R,
        size: u64,
    ) -> Result<(), PayloadError> {
        let mut buf = vec![0u8; PAYLOAD_CHUNK_SIZE];
        let mut remaining = size;

        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let n = match source.read(&mut buf[..want]) {
                Ok(0) => {
                    return Err(PayloadError::Local(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("source ended {remaining} bytes short of {size}"),
                    )));
                }
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(PayloadError::Local(e)),
            };
            self.write_raw(&buf[..n])?;
            remaining -= n as u64;
        }

        self.stream.flush().map_err(TransportError::from)?;
        trace!("sent {size} payload bytes");
        Ok(())
    }

    /// Reads exactly `size` raw bytes from the connection into `sink`.
    ///
    /// If `sink` fails the rest of the payload is still consumed, so the
    /// connection stays usable after a [`PayloadError::Local`].
    pub fn receive_payload<W: Write>(
        &mut self,
        size: u64,
        sink: &mut W,
    ) -> Result<(), PayloadError> {
        let mut buf = vec![0u8; PAYLOAD_CHUNK_SIZE];
        let mut remaining = size;
        let mut failure = None;

        while remaining > 0 {
            let n = remaining.min(buf.len() as u64) as usize;
            self.read_raw(&mut buf[..n])?;
            remaining -= n as u64;

            if failure.is_none() {
                if let Err(e) = sink.write_all(&buf[..n]) {
                    failure = Some(e);
                }
            }
        }

        if failure.is_none() {
            if let Err(e) = sink.flush() {
                failure = Some(e);
            }
        }
        trace!("received {size} payload bytes");

        match failure {
            Some(e) => Err(PayloadError::Local(e)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Seek, SeekFrom};

    use crate::protocol::Response;

    use super::*;

    fn rewound(transport: &mut ProtocolTransport<Cursor<Vec<u8>>>) {
        transport.stream.seek(SeekFrom::Start(0)).unwrap();
    }

    struct FailingSink;

    impl Write for FailingSink {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::other("disk on fire"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn read_write_message() {
        let mut transport = ProtocolTransport::new(Cursor::new(Vec::new()));
        let msg = Message::StorageRequest {
            file_name: "a.txt".into(),
            size: 3,
            checksum: vec![1; 16],
        };

        transport.send(&msg).unwrap();
        rewound(&mut transport);
        assert_eq!(transport.receive().unwrap(), Some(msg));
    }

    #[test]
    fn frame_prefix_is_little_endian_body_length() {
        let mut transport = ProtocolTransport::new(Cursor::new(Vec::new()));
        transport
            .send(&Message::RetrievalRequest {
                file_name: "x".into(),
            })
            .unwrap();

        let bytes = transport.get_ref().get_ref();
        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        prefix.copy_from_slice(&bytes[..LENGTH_PREFIX_SIZE]);
        assert_eq!(
            u64::from_le_bytes(prefix) as usize,
            bytes.len() - LENGTH_PREFIX_SIZE
        );
    }

    #[test]
    fn end_of_session() {
        let mut transport = ProtocolTransport::new(Cursor::new(Vec::new()));
        assert_eq!(transport.receive().unwrap(), None);

        transport.send_end().unwrap();
        rewound(&mut transport);
        assert_eq!(transport.receive().unwrap(), None);
    }

    #[test]
    fn closed_mid_prefix() {
        let mut transport = ProtocolTransport::new(Cursor::new(vec![4u8, 0, 0]));
        assert!(matches!(transport.receive(), Err(TransportError::Closed)));
    }

    #[test]
    fn closed_mid_body() {
        let mut bytes = 10u64.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0, 0, 0]);
        let mut transport = ProtocolTransport::new(Cursor::new(bytes));

        assert!(matches!(transport.receive(), Err(TransportError::Closed)));
    }

    #[test]
    fn malformed_body() {
        let mut bytes = 4u64.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0xff, 0xff, 0xff, 0xff]);
        let mut transport = ProtocolTransport::new(Cursor::new(bytes));

        assert!(matches!(
            transport.receive(),
            Err(TransportError::Deserialize(_))
        ));
    }

    #[test]
    fn oversized_frame() {
        let bytes = (MAX_FRAME_SIZE + 1).to_le_bytes().to_vec();
        let mut transport = ProtocolTransport::new(Cursor::new(bytes));

        assert!(matches!(
            transport.receive(),
            Err(TransportError::FrameTooLarge(n)) if n == MAX_FRAME_SIZE + 1
        ));
    }

    #[test]
    fn raw_payload_between_frames() {
        let mut transport = ProtocolTransport::new(Cursor::new(Vec::new()));
        let first = Message::Response(Response::accept("Ready for data"));
        let last = Message::Response(Response::accept("Storage complete"));
        let payload = vec![9u8; PAYLOAD_CHUNK_SIZE + 17];

        transport.send(&first).unwrap();
        transport
            .send_payload(&mut payload.as_slice(), payload.len() as u64)
            .unwrap();
        transport.send(&last).unwrap();
        rewound(&mut transport);

        assert_eq!(transport.receive().unwrap(), Some(first));
        let mut out = Vec::new();
        transport
            .receive_payload(payload.len() as u64, &mut out)
            .unwrap();
        assert_eq!(out, payload);
        assert_eq!(transport.receive().unwrap(), Some(last));
    }

    #[test]
    fn short_source_is_local_error() {
        let mut transport = ProtocolTransport::new(Cursor::new(Vec::new()));
        let err = transport.send_payload(&mut &b"abc"[..], 10).unwrap_err();

        assert!(matches!(
            err,
            PayloadError::Local(e) if e.kind() == io::ErrorKind::UnexpectedEof
        ));
    }

    #[test]
    fn failing_sink_still_drains_payload() {
        let mut transport = ProtocolTransport::new(Cursor::new(Vec::new()));
        let next = Message::RetrievalRequest {
            file_name: "next".into(),
        };
        transport.write_raw(&[1u8; 100]).unwrap();
        transport.send(&next).unwrap();
        rewound(&mut transport);

        let err = transport.receive_payload(100, &mut FailingSink).unwrap_err();
        assert!(matches!(err, PayloadError::Local(_)));
        assert_eq!(transport.receive().unwrap(), Some(next));
    }

    #[test]
    fn payload_cut_short_is_closed() {
        let mut transport = ProtocolTransport::new(Cursor::new(vec![0u8; 10]));
        let err = transport.receive_payload(20, &mut Vec::new()).unwrap_err();

        assert!(matches!(
            err,
            PayloadError::Transport(TransportError::Closed)
        ));
    }
}

use std::fmt;

use bincode::{Decode, Encode};

/// Outcome of a request as reported by the peer.
#[derive(Debug, Clone, Encode, Decode, PartialEq, Eq)]
pub struct Response {
    pub ok: bool,
    pub message: String,
}

impl Response {
    pub fn accept(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
        }
    }

    pub fn reject(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
        }
    }
}

/// Every framed message exchanged over a connection.
///
/// Raw file bytes are never wrapped in a message; they follow a
/// [`Message::StorageRequest`] accepted by the server or a successful
/// [`Message::RetrievalResponse`], and their length is the `size` announced
/// there.
#[derive(Debug, Clone, Encode, Decode, PartialEq, Eq)]
pub enum Message {
    StorageRequest {
        file_name: String,
        size: u64,
        checksum: Vec<u8>,
    },
    RetrievalRequest {
        file_name: String,
    },
    Response(Response),
    RetrievalResponse {
        resp: Response,
        size: u64,
        checksum: Vec<u8>,
    },
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::StorageRequest { .. } => "storage request",
            Message::RetrievalRequest { .. } => "retrieval request",
            Message::Response(_) => "response",
            Message::RetrievalResponse { .. } => "retrieval response",
        }
    }

    /// A retrieval answer that is never followed by payload bytes.
    pub fn retrieval_rejected(message: impl Into<String>) -> Self {
        Message::RetrievalResponse {
            resp: Response::reject(message),
            size: 0,
            checksum: Vec::new(),
        }
    }
}

impl From<Response> for Message {
    fn from(value: Response) -> Self {
        Message::Response(value)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::StorageRequest {
                file_name, size, ..
            } => write!(f, "store '{file_name}' ({size} bytes)"),
            Message::RetrievalRequest { file_name } => write!(f, "retrieve '{file_name}'"),
            Message::Response(resp) => write!(f, "response ok={} '{}'", resp.ok, resp.message),
            Message::RetrievalResponse { resp, size, .. } => write!(
                f,
                "retrieval response ok={} '{}' ({size} bytes)",
                resp.ok, resp.message
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_constructors() {
        assert_eq!(
            Response::accept("Ready for data"),
            Response {
                ok: true,
                message: "Ready for data".into()
            }
        );
        assert!(!Response::reject("Checksum mismatch").ok);
    }

    #[test]
    fn rejected_retrieval_has_no_payload() {
        let msg = Message::retrieval_rejected("File not found");

        assert_eq!(
            msg,
            Message::RetrievalResponse {
                resp: Response::reject("File not found"),
                size: 0,
                checksum: vec![],
            }
        );
        assert_eq!(msg.kind(), "retrieval response");
    }

    #[test]
    fn response_into_message() {
        let msg: Message = Response::accept("Storage complete").into();
        assert_eq!(msg.to_string(), "response ok=true 'Storage complete'");
    }
}

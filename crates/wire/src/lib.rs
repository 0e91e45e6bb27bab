//! weathervane-wire: the aggregation fleet's wire format.
//!
//! Provides:
//! - `read_frame` / `write_frame`: 16-bit big-endian length-prefixed frames
//! - `Request` / `Response`: HTTP-shaped text messages (parse and render)
//!
//! The text inside a frame looks like HTTP/1.1 but is not conformant: one
//! message per frame, no chunking, and `Content-Length` is informational
//! only; the body is simply the remainder of the frame.

pub mod framing;
pub mod message;

pub use framing::{read_frame, write_frame, MAX_FRAME_LEN};
pub use message::{Method, Request, Response, LAMPORT_HEADER};

/// Errors produced by the wire layer.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame of {0} bytes exceeds the 16-bit length prefix")]
    FrameTooLarge(usize),

    #[error("empty message")]
    Empty,

    #[error("malformed start line: {0:?}")]
    MalformedStartLine(String),

    #[error("malformed header line: {0:?}")]
    MalformedHeader(String),

    #[error("unknown method: {0:?}")]
    UnknownMethod(String),
}

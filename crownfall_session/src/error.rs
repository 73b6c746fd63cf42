// Error taxonomy for the session crate.
//
// Only transport-level failures are Rust errors. Protocol violations are
// logged and the offending frame dropped; application-level rejections
// (sit on a taken seat, nickname collision) travel back to the requester
// as typed negative responses on the wire, never as errors here.

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetError {
    /// The outbound dial never produced a connection (refused, unreachable,
    /// or the 5-second connect timeout elapsed).
    #[error("connect failed: {0}")]
    ConnectFailed(#[source] io::Error),

    /// The address string resolved to no usable socket address.
    #[error("address resolved to nothing")]
    AddrResolve,

    /// I/O failure on an established connection or listener.
    #[error("i/o failure: {0}")]
    Io(#[from] io::Error),

    /// The peer closed or rejected the session during the handshake.
    #[error("handshake failed: {0}")]
    Handshake(String),
}

//! Session core shared by the logon and world listeners
//!
//! A [`Session`] owns the protocol state of one connection. The shell in
//! [`shell`] owns the socket and feeds frames from the session's framer into
//! a [`DispatchTable`].

use std::net::SocketAddr;

use bytes::BytesMut;

use crate::error::SessionError;

pub mod dispatch;
pub mod registry;
pub mod shell;
pub mod state;

pub use dispatch::{
    continuation, AccountLevel, BodySize, DispatchEntry, DispatchError, DispatchTable,
    DispatchTableBuilder, HandlerResult, Outcome,
};
pub use registry::{SessionHandle, SessionRegistry, SessionSummary};
pub use shell::ShellLimits;
pub use state::{Protocol, SessionState, StateSet};

/// One complete inbound message: its opcode and body, header stripped.
#[derive(Debug)]
pub struct Frame {
    pub opcode: u16,
    pub body: BytesMut,
}

pub trait Session: Send + 'static {
    const PROTOCOL: Protocol;

    fn state(&self) -> SessionState;

    /// Move to `Closed`. Further frames are ignored and pending work dropped.
    fn close(&mut self);

    fn peer(&self) -> SocketAddr;

    fn security(&self) -> AccountLevel;

    /// Account name once known.
    fn account(&self) -> Option<&str>;

    fn latency_ms(&self) -> Option<u32> {
        None
    }

    /// Cut the next complete frame off the front of `inbound`. `Ok(None)`
    /// means more bytes are needed; an error means the stream can no longer
    /// be framed.
    fn next_frame(&mut self, inbound: &mut BytesMut) -> Result<Option<Frame>, SessionError>;

    /// Bytes queued for the socket since the last call.
    fn take_outbound(&mut self) -> Vec<u8>;
}

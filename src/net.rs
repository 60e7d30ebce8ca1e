//! TCP transport: wire envelopes shared by the client and the server.
//!
//! Every frame is an [`async_bincode`] length-prefixed envelope over a
//! buffered `TcpStream`. A connection carries one call at a time; the client
//! pools connections so concurrent calls each get their own.

pub mod client;
pub mod server;

use crate::{schema::ServiceInfo, status::Status};
use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

#[derive(Serialize, Deserialize, Debug)]
pub(crate) enum Request {
    Ping,
    Services,
    Call(Call),
}

#[derive(Serialize, Deserialize, Debug)]
pub(crate) struct Call {
    pub(crate) id: u64,
    pub(crate) service: String,
    pub(crate) method: String,
    pub(crate) payload: Vec<u8>,
    /// Reserved for per-call deadlines; carried but not enforced.
    pub(crate) deadline_ms: Option<u64>,
}

#[derive(Serialize, Deserialize, Debug)]
pub(crate) enum Response {
    Pong,
    Services(Vec<ServiceInfo>),
    Call { id: u64, outcome: CallOutcome },
}

/// What a server returns for one call: the encoded response message, or the
/// status that replaced it.
pub type CallOutcome = Result<Vec<u8>, Status>;

/// Connection-level failures. A `TransportError` means no answer arrived;
/// a remote rejection arrives as a [`Status`] instead.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("endpoint {addr} unreachable: {source}")]
    Unreachable {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("connection reset mid-call: {0}")]
    Reset(String),

    #[error("channel is closed")]
    Closed,

    #[error("protocol violation: {0}")]
    Protocol(String),
}

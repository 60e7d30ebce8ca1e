use super::{Call, CallOutcome, Request, Response, TransportError};
use crate::{
    codec::{self, CodecError, SchemaViolation},
    config::ChannelConfig,
    schema::{Message, ServiceDescriptor, ServiceInfo},
    status::{Code, Status},
};
use async_bincode::{tokio::AsyncBincodeStream, AsyncDestination};
use futures::{SinkExt, StreamExt};
use std::{
    io,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
};
use thiserror::Error;
use tokio::{
    io::BufStream,
    net::{lookup_host, TcpStream},
    time,
};

type Connection = AsyncBincodeStream<BufStream<TcpStream>, Response, Request, AsyncDestination>;

/// A reusable, cloneable handle to one server endpoint.
///
/// Calls borrow an idle pooled connection or dial a new one, so concurrent
/// calls on the same channel do not wait on each other. Clones share the
/// pool.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

struct ChannelInner {
    addr: SocketAddr,
    config: ChannelConfig,
    idle: Mutex<Vec<Connection>>,
    closed: AtomicBool,
    next_id: AtomicU64,
}

impl Channel {
    pub async fn open(addr: &str) -> Result<Self, TransportError> {
        Self::open_with(addr, ChannelConfig::default()).await
    }

    /// Resolves `addr` and connects once, so an unreachable endpoint is
    /// reported here rather than on the first call. Each resolved address is
    /// tried in turn.
    pub async fn open_with(addr: &str, config: ChannelConfig) -> Result<Self, TransportError> {
        let candidates = lookup_host(addr)
            .await
            .map_err(|source| TransportError::Unreachable {
                addr: addr.to_owned(),
                source,
            })?;

        let mut last_err = None;
        for candidate in candidates {
            match dial(candidate, &config).await {
                Ok(first) => {
                    let inner = ChannelInner {
                        addr: candidate,
                        config,
                        idle: Mutex::new(vec![first]),
                        closed: AtomicBool::new(false),
                        next_id: AtomicU64::new(1),
                    };
                    tracing::debug!(%addr, peer = %candidate, "channel open");
                    return Ok(Self {
                        inner: Arc::new(inner),
                    });
                }
                Err(e) => last_err = Some(e),
            }
        }

        Err(last_err.unwrap_or_else(|| TransportError::Unreachable {
            addr: addr.to_owned(),
            source: io::Error::new(io::ErrorKind::NotFound, "address resolved to nothing"),
        }))
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.addr
    }

    /// Performs one unary round trip with an already-encoded payload.
    pub async fn send(
        &self,
        service: &str,
        method: &str,
        payload: Vec<u8>,
    ) -> Result<CallOutcome, TransportError> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let request = Request::Call(Call {
            id,
            service: service.to_owned(),
            method: method.to_owned(),
            payload,
            deadline_ms: None,
        });
        match self.inner.round_trip(request).await? {
            Response::Call { id: got, outcome } if got == id => Ok(outcome),
            Response::Call { id: got, .. } => Err(TransportError::Protocol(format!(
                "response for call {got} arrived for call {id}"
            ))),
            other => Err(unexpected(other)),
        }
    }

    pub async fn ping(&self) -> Result<(), TransportError> {
        match self.inner.round_trip(Request::Ping).await? {
            Response::Pong => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Lists the services and methods the server has bound.
    pub async fn services(&self) -> Result<Vec<ServiceInfo>, TransportError> {
        match self.inner.round_trip(Request::Services).await? {
            Response::Services(services) => Ok(services),
            other => Err(unexpected(other)),
        }
    }

    /// Drops pooled connections and fails every later call with
    /// [`TransportError::Closed`]. Calling it again does nothing.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            let dropped = self.inner.take_idle().len();
            tracing::debug!(addr = %self.inner.addr, dropped, "channel closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

fn unexpected(response: Response) -> TransportError {
    TransportError::Protocol(format!("unexpected response {response:?}"))
}

async fn dial(addr: SocketAddr, config: &ChannelConfig) -> Result<Connection, TransportError> {
    let unreachable = |source: io::Error| TransportError::Unreachable {
        addr: addr.to_string(),
        source,
    };
    let sock = time::timeout(config.connect_timeout(), TcpStream::connect(addr))
        .await
        .map_err(|_| unreachable(io::Error::new(io::ErrorKind::TimedOut, "connect timed out")))?
        .map_err(unreachable)?;
    sock.set_nodelay(true).map_err(unreachable)?;
    let sock = BufStream::new(sock);
    Ok(AsyncBincodeStream::from(sock).for_async())
}

impl ChannelInner {
    fn checkout(&self) -> Option<Connection> {
        self.idle.lock().ok()?.pop()
    }

    fn take_idle(&self) -> Vec<Connection> {
        match self.idle.lock() {
            Ok(mut idle) => std::mem::take(&mut *idle),
            Err(_) => Vec::new(),
        }
    }

    fn release(&self, conn: Connection) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        if let Ok(mut idle) = self.idle.lock() {
            if idle.len() < self.config.max_idle_connections {
                idle.push(conn);
            }
        }
    }

    async fn round_trip(&self, request: Request) -> Result<Response, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let mut conn = match self.checkout() {
            Some(conn) => conn,
            None => dial(self.addr, &self.config).await?,
        };

        conn.send(request)
            .await
            .map_err(|e| TransportError::Reset(e.to_string()))?;
        let response = match conn.next().await {
            Some(Ok(response)) => response,
            Some(Err(e)) => return Err(TransportError::Reset(e.to_string())),
            None => {
                return Err(TransportError::Reset(
                    "server closed the connection before responding".into(),
                ))
            }
        };

        self.release(conn);
        Ok(response)
    }
}

/// Failure of a stub call. Callers can tell a remote rejection
/// ([`RpcError::Status`]) from an unreachable server
/// ([`RpcError::Transport`]) without looking at bytes.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("request rejected locally: {0}")]
    Schema(#[from] SchemaViolation),

    #[error("undecodable response: {0}")]
    Codec(#[from] CodecError),

    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    #[error("remote call failed: {0}")]
    Status(#[from] Status),
}

impl RpcError {
    pub fn status(&self) -> Option<&Status> {
        match self {
            RpcError::Status(status) => Some(status),
            _ => None,
        }
    }

    pub fn code(&self) -> Option<Code> {
        self.status().map(Status::code)
    }
}

/// Binds a [`Channel`] to a service contract.
#[derive(Clone)]
pub struct Stub {
    channel: Channel,
    service: &'static ServiceDescriptor,
}

impl Stub {
    pub fn new(channel: Channel, service: &'static ServiceDescriptor) -> Self {
        Self { channel, service }
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn service(&self) -> &'static ServiceDescriptor {
        self.service
    }

    pub async fn unary<Req, Resp>(&self, method: &str, request: &Req) -> Result<Resp, RpcError>
    where
        Req: Message,
        Resp: Message,
    {
        let payload = codec::encode(request)?;
        let outcome = self.channel.send(self.service.name, method, payload).await?;
        let bytes = outcome?;
        Ok(codec::decode(&bytes)?)
    }
}

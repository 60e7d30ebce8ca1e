use super::{Call, CallOutcome, Request, Response};
use crate::{
    config::ServerConfig,
    dispatcher::{BindingError, Dispatcher, ServiceBinding},
    schema::ServiceInfo,
    status::Status,
};
use async_bincode::tokio::AsyncBincodeStream;
use futures::{SinkExt, StreamExt};
use std::{io, net::SocketAddr, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::{
    io::BufStream,
    net::{lookup_host, TcpListener, TcpStream},
    sync::{watch, Mutex, Semaphore},
    task::{self, JoinError, JoinHandle, JoinSet},
    time,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Services can be added; no socket is held.
    Created,
    Listening,
    /// No new connections; in-flight calls are finishing.
    Draining,
    Stopped,
}

#[derive(Debug, Error)]
pub enum BindError {
    #[error("malformed address `{addr}`: {reason}")]
    Malformed { addr: String, reason: String },

    #[error("address {addr} already in use")]
    AddrInUse {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("binding {addr}: {source}")]
    Io {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("server can only bind from Created, it is {0:?}")]
    State(ServerState),
}

/// Serves bound services over TCP.
///
/// ```no_run
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// use calcrpc::{calculator::{CalculatorServer, SquareRootCalculator}, Server};
///
/// let mut server = Server::new();
/// server.add_service(CalculatorServer::new(SquareRootCalculator))?;
/// server.bind("127.0.0.1:50051").await?;
/// server.stopped().await;
/// # Ok(())
/// # }
/// ```
pub struct Server {
    shared: Arc<Shared>,
    lifecycle: Mutex<Lifecycle>,
}

struct Shared {
    dispatcher: Dispatcher,
    workers: Arc<Semaphore>,
    config: ServerConfig,
    state: watch::Sender<ServerState>,
}

#[derive(Default)]
struct Lifecycle {
    local_addr: Option<SocketAddr>,
    shutdown: Option<watch::Sender<bool>>,
    accept_task: Option<JoinHandle<()>>,
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl Server {
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    /// A `workers` value of zero is raised to one.
    pub fn with_config(mut config: ServerConfig) -> Self {
        config.workers = config.workers.max(1);
        let (state, _) = watch::channel(ServerState::Created);
        let shared = Shared {
            dispatcher: Dispatcher::default(),
            workers: Arc::new(Semaphore::new(config.workers)),
            config,
            state,
        };
        Self {
            shared: Arc::new(shared),
            lifecycle: Mutex::new(Lifecycle::default()),
        }
    }

    pub fn add_service(
        &mut self,
        binding: impl Into<ServiceBinding>,
    ) -> Result<&mut Self, BindingError> {
        if self.state() != ServerState::Created {
            return Err(BindingError::AlreadyStarted);
        }
        let shared = Arc::get_mut(&mut self.shared).ok_or(BindingError::AlreadyStarted)?;
        shared.dispatcher.add(binding.into())?;
        Ok(self)
    }

    pub fn state(&self) -> ServerState {
        *self.shared.state.borrow()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    pub fn services(&self) -> Vec<ServiceInfo> {
        self.shared.dispatcher.services()
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.lifecycle.lock().await.local_addr
    }

    /// Opens the listening socket and starts accepting connections.
    ///
    /// On error the server stays `Created` and may bind again.
    pub async fn bind(&self, addr: &str) -> Result<SocketAddr, BindError> {
        let mut lifecycle = self.lifecycle.lock().await;
        let state = self.state();
        if state != ServerState::Created {
            return Err(BindError::State(state));
        }

        let socket_addr = resolve(addr).await?;
        let listener = TcpListener::bind(socket_addr)
            .await
            .map_err(|source| match source.kind() {
                io::ErrorKind::AddrInUse => BindError::AddrInUse {
                    addr: socket_addr,
                    source,
                },
                _ => BindError::Io {
                    addr: socket_addr,
                    source,
                },
            })?;
        let local_addr = listener.local_addr().map_err(|source| BindError::Io {
            addr: socket_addr,
            source,
        })?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.shared.state.send_replace(ServerState::Listening);
        let accept_task = task::spawn(serve(listener, Arc::clone(&self.shared), shutdown_rx));

        lifecycle.local_addr = Some(local_addr);
        lifecycle.shutdown = Some(shutdown_tx);
        lifecycle.accept_task = Some(accept_task);
        tracing::info!(%local_addr, workers = self.shared.config.workers, "listening");
        Ok(local_addr)
    }

    /// Stops accepting, lets in-flight calls finish within the grace period,
    /// then releases the listening socket.
    ///
    /// Safe to call in any state and any number of times; returns once the
    /// server is `Stopped`.
    pub async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        match self.state() {
            ServerState::Stopped => return,
            ServerState::Created => {
                self.shared.state.send_replace(ServerState::Stopped);
                return;
            }
            ServerState::Listening | ServerState::Draining => {}
        }

        if let Some(shutdown) = lifecycle.shutdown.take() {
            self.shared.state.send_replace(ServerState::Draining);
            shutdown.send_replace(true);
        }
        if let Some(accept_task) = lifecycle.accept_task.take() {
            if let Err(e) = accept_task.await {
                tracing::error!(error = %e, "accept loop failed");
            }
        }
        self.shared.state.send_replace(ServerState::Stopped);
    }

    /// Waits until the server reaches `Stopped`, however that happens.
    pub async fn stopped(&self) {
        let mut state = self.shared.state.subscribe();
        // Only fails once the sender is gone, and `self` holds it.
        let _ = state.wait_for(|state| *state == ServerState::Stopped).await;
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if let Some(shutdown) = self.lifecycle.get_mut().shutdown.take() {
            self.shared.state.send_replace(ServerState::Draining);
            shutdown.send_replace(true);
        }
    }
}

async fn resolve(addr: &str) -> Result<SocketAddr, BindError> {
    let malformed = |reason: String| BindError::Malformed {
        addr: addr.to_owned(),
        reason,
    };
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| malformed("expected host:port".into()))?;
    if host.is_empty() {
        return Err(malformed("missing host".into()));
    }
    port.parse::<u16>()
        .map_err(|e| malformed(format!("bad port `{port}`: {e}")))?;
    lookup_host(addr)
        .await
        .map_err(|e| malformed(e.to_string()))?
        .next()
        .ok_or_else(|| malformed("address resolved to nothing".into()))
}

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

async fn serve(listener: TcpListener, shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((sock, peer)) => {
                    tracing::debug!(%peer, "accepted connection");
                    connections.spawn(serve_connection(
                        sock,
                        peer,
                        Arc::clone(&shared),
                        shutdown.clone(),
                    ));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to accept connection");
                    // Errors such as EMFILE persist until a connection closes.
                    tokio::select! {
                        _ = time::sleep(ACCEPT_BACKOFF) => {}
                        _ = shutdown.changed() => break,
                    }
                }
            },
            Some(finished) = connections.join_next() => reap(finished),
            _ = shutdown.changed() => break,
        }
    }

    tracing::info!(in_flight = connections.len(), "draining");
    let grace_period = shared.config.grace_period();
    let drained = time::timeout(grace_period, async {
        while let Some(finished) = connections.join_next().await {
            reap(finished);
        }
    })
    .await;
    if drained.is_err() {
        tracing::warn!(
            abandoned = connections.len(),
            ?grace_period,
            "grace period elapsed, closing remaining connections"
        );
        connections.shutdown().await;
    }

    drop(listener);
    shared.state.send_replace(ServerState::Stopped);
    tracing::info!("stopped");
}

fn reap(finished: Result<(), JoinError>) {
    if let Err(e) = finished {
        if e.is_panic() {
            tracing::error!(error = %e, "connection task panicked");
        }
    }
}

async fn serve_connection(
    sock: TcpStream,
    peer: SocketAddr,
    shared: Arc<Shared>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut sock =
        AsyncBincodeStream::<_, Request, Response, _>::from(BufStream::new(sock)).for_async();

    while !*shutdown.borrow() {
        // Prefer a request that has already arrived over the shutdown signal.
        let request = tokio::select! {
            biased;
            frame = sock.next() => match frame {
                Some(Ok(request)) => request,
                Some(Err(e)) => {
                    tracing::warn!(%peer, error = %e, "unreadable frame, closing connection");
                    break;
                }
                None => break,
            },
            _ = shutdown.changed() => break,
        };

        let response = shared.handle(request).await;
        if let Err(e) = sock.send(response).await {
            tracing::debug!(%peer, error = %e, "failed to send response");
            break;
        }
    }
    tracing::debug!(%peer, "connection closed");
}

impl Shared {
    async fn handle(&self, request: Request) -> Response {
        match request {
            Request::Ping => Response::Pong,
            Request::Services => Response::Services(self.dispatcher.services()),
            Request::Call(call) => {
                let id = call.id;
                Response::Call {
                    id,
                    outcome: self.dispatch(call).await,
                }
            }
        }
    }

    async fn dispatch(&self, call: Call) -> CallOutcome {
        let Call {
            service,
            method,
            payload,
            ..
        } = call;
        let handler = self
            .dispatcher
            .lookup(&service, &method)
            .inspect_err(|_| tracing::debug!(%service, %method, "no such method"))?;

        let permit = Arc::clone(&self.workers)
            .acquire_owned()
            .await
            .map_err(|_| Status::unavailable("server is shutting down"))?;
        let joined = task::spawn_blocking(move || {
            let _permit = permit;
            handler.call(&payload)
        })
        .await;

        match joined {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(status)) => {
                tracing::debug!(
                    %service,
                    %method,
                    code = %status.code(),
                    reason = status.message(),
                    "call failed"
                );
                Err(status)
            }
            Err(e) => {
                tracing::error!(%service, %method, error = %e, "handler panicked");
                Err(Status::internal("internal error"))
            }
        }
    }
}
